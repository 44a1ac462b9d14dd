//! # PeerLink State Machine
//!
//! One instance per (broadcaster, listener) pair. Drives the negotiation to a
//! connected state, allows exactly one ICE-restart attempt, and declares
//! failure on timeout or a second degradation.
//!
//! ## States:
//! `Idle → OfferSent → Answered → Connected`, with `Restarting` reachable at
//! most once from `Answered`/`Connected`, and terminal `Failed` reachable
//! from any non-terminal state.
//!
//! "Connected" means the first media frame was observed, not that the
//! handshake completed: handshake success does not guarantee media delivery
//! on restrictive network topologies, and reporting connected without audio
//! would mislead supervisors. Failed links are never resurrected; a retry
//! always builds a brand-new link.

use std::time::Instant;

use crate::hub::HubError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    OfferSent,
    Answered,
    Connected,
    Restarting,
    Failed,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Idle => "idle",
            LinkState::OfferSent => "offer_sent",
            LinkState::Answered => "answered",
            LinkState::Connected => "connected",
            LinkState::Restarting => "restarting",
            LinkState::Failed => "failed",
        }
    }
}

/// Outcome of a transport degradation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradeAction {
    /// First degradation: one restart attempt with a bounded grace period
    Restart,
    /// Restart already spent (or degradation mid-restart): terminal failure
    Fail,
}

/// One negotiated audio path between a broadcaster and one listener.
#[derive(Debug)]
pub struct PeerLink {
    pub listener_connection: String,
    pub broadcaster_connection: String,
    state: LinkState,
    restart_attempted: bool,

    /// Identity token for timer safety: a timer that captured an older
    /// generation must treat its firing as a no-op.
    pub generation: u64,

    pub created_at: Instant,
}

impl PeerLink {
    pub fn new(listener_connection: String, broadcaster_connection: String, generation: u64) -> Self {
        Self {
            listener_connection,
            broadcaster_connection,
            state: LinkState::Idle,
            restart_attempted: false,
            generation,
            created_at: Instant::now(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state != LinkState::Failed
    }

    /// Idle → OfferSent, when the listener's offer goes out.
    pub fn offer_sent(&mut self) -> Result<(), HubError> {
        match self.state {
            LinkState::Idle => {
                self.state = LinkState::OfferSent;
                Ok(())
            }
            other => Err(HubError::NegotiationFailed(format!(
                "cannot send offer in state {}",
                other.as_str()
            ))),
        }
    }

    /// OfferSent → Answered, on receipt of the broadcaster's answer.
    pub fn answer_received(&mut self) -> Result<(), HubError> {
        match self.state {
            LinkState::OfferSent => {
                self.state = LinkState::Answered;
                Ok(())
            }
            other => Err(HubError::NegotiationFailed(format!(
                "unexpected answer in state {}",
                other.as_str()
            ))),
        }
    }

    /// Answered/Restarting → Connected, on the first observed media frame.
    pub fn media_active(&mut self) -> Result<(), HubError> {
        match self.state {
            LinkState::Answered | LinkState::Restarting => {
                self.state = LinkState::Connected;
                Ok(())
            }
            LinkState::Connected => Ok(()), // duplicate media signal
            other => Err(HubError::NegotiationFailed(format!(
                "media signal in state {}",
                other.as_str()
            ))),
        }
    }

    /// Transport degradation. Exactly one restart is permitted; any further
    /// degradation goes straight to Failed to bound resource usage under
    /// flapping networks.
    pub fn degraded(&mut self) -> DegradeAction {
        match self.state {
            LinkState::Answered | LinkState::Connected if !self.restart_attempted => {
                self.restart_attempted = true;
                self.state = LinkState::Restarting;
                DegradeAction::Restart
            }
            LinkState::Failed => DegradeAction::Fail,
            _ => {
                self.state = LinkState::Failed;
                DegradeAction::Fail
            }
        }
    }

    /// Terminal failure from any state (timeout, explicit close).
    pub fn fail(&mut self) {
        self.state = LinkState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> PeerLink {
        PeerLink::new("listener-conn".to_string(), "broadcaster-conn".to_string(), 1)
    }

    #[test]
    fn test_happy_path_to_connected() {
        let mut l = link();
        assert_eq!(l.state(), LinkState::Idle);
        l.offer_sent().unwrap();
        l.answer_received().unwrap();
        l.media_active().unwrap();
        assert_eq!(l.state(), LinkState::Connected);
    }

    #[test]
    fn test_answer_while_idle_is_rejected() {
        let mut l = link();
        let err = l.answer_received().unwrap_err();
        assert_eq!(err.code(), "negotiation_failed");
        assert_eq!(l.state(), LinkState::Idle);
    }

    #[test]
    fn test_media_before_answer_is_rejected() {
        let mut l = link();
        l.offer_sent().unwrap();
        assert!(l.media_active().is_err());
        assert_eq!(l.state(), LinkState::OfferSent);
    }

    #[test]
    fn test_single_restart_attempt() {
        let mut l = link();
        l.offer_sent().unwrap();
        l.answer_received().unwrap();
        l.media_active().unwrap();

        // First degradation gets a restart
        assert_eq!(l.degraded(), DegradeAction::Restart);
        assert_eq!(l.state(), LinkState::Restarting);

        // Media re-observed within the grace period recovers the link
        l.media_active().unwrap();
        assert_eq!(l.state(), LinkState::Connected);

        // Second degradation is terminal, no second restart
        assert_eq!(l.degraded(), DegradeAction::Fail);
        assert_eq!(l.state(), LinkState::Failed);
    }

    #[test]
    fn test_degradation_mid_restart_fails() {
        let mut l = link();
        l.offer_sent().unwrap();
        l.answer_received().unwrap();
        assert_eq!(l.degraded(), DegradeAction::Restart);
        assert_eq!(l.degraded(), DegradeAction::Fail);
        assert_eq!(l.state(), LinkState::Failed);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut l = link();
        l.fail();
        assert!(!l.is_live());
        assert!(l.offer_sent().is_err());
        assert!(l.media_active().is_err());
        assert_eq!(l.degraded(), DegradeAction::Fail);
        assert_eq!(l.state(), LinkState::Failed);
    }
}
