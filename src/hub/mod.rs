//! # Streaming Hub
//!
//! The transport-agnostic core of the broadcast subsystem: room presence,
//! signaling relay, peer-link state machines, stream session lifecycle and
//! the live transcript assembler. The WebSocket layer is a thin adapter on
//! top of these components.

pub mod peer;
pub mod relay;
pub mod rooms;
pub mod session;
pub mod store;
pub mod transcript;

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::config::AppConfig;

/// Domain errors surfaced synchronously by hub operations.
///
/// Link-local failures (timeouts, negotiation errors) never abort a session
/// or affect other listeners; lifecycle errors are returned to the caller so
/// the UI can present an actionable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The broadcaster already owns an active session
    AlreadyStreaming(String),
    /// The broadcaster has no active session to join or feed
    NoActiveSession(String),
    /// A peer link never reached the connected state within the join timeout
    JoinTimeout,
    /// A negotiation message arrived in a state that cannot accept it
    NegotiationFailed(String),
    /// The referenced connection is not registered
    UnknownConnection(String),
}

impl HubError {
    /// Machine-readable code used in `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::AlreadyStreaming(_) => "already_streaming",
            HubError::NoActiveSession(_) => "no_active_session",
            HubError::JoinTimeout => "join_timeout",
            HubError::NegotiationFailed(_) => "negotiation_failed",
            HubError::UnknownConnection(_) => "unknown_connection",
        }
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::AlreadyStreaming(id) => {
                write!(f, "broadcaster {} is already streaming", id)
            }
            HubError::NoActiveSession(id) => {
                write!(f, "broadcaster {} has no active session", id)
            }
            HubError::JoinTimeout => write!(f, "peer link join timed out"),
            HubError::NegotiationFailed(msg) => write!(f, "negotiation failed: {}", msg),
            HubError::UnknownConnection(id) => write!(f, "unknown connection {}", id),
        }
    }
}

impl std::error::Error for HubError {}

/// Aggregates the hub components behind one shared handle.
pub struct Hub {
    pub rooms: Arc<rooms::RoomRegistry>,
    pub relay: Arc<relay::SignalingRelay>,
    pub sessions: Arc<session::SessionManager>,
}

impl Hub {
    pub fn new(config: Arc<RwLock<AppConfig>>, store: Arc<dyn store::TranscriptStore>) -> Self {
        let rooms = Arc::new(rooms::RoomRegistry::new());
        let relay = Arc::new(relay::SignalingRelay::new());
        let sessions = Arc::new(session::SessionManager::new(
            config,
            Arc::clone(&rooms),
            Arc::clone(&relay),
            store,
        ));
        Self {
            rooms,
            relay,
            sessions,
        }
    }
}
