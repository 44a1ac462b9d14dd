//! # StreamSession Lifecycle Manager
//!
//! Owns every broadcaster's active session: start/stop, listener fan-out
//! bookkeeping, emergency-save checkpoints, peer-link timers and the
//! end-of-session transcript reconciliation.
//!
//! ## Concurrency:
//! One mutex per session (plus one per room in the registry) — never a
//! single global lock, so unrelated sessions stay fully independent. All
//! timers are detached tasks that re-check the link/session generation under
//! the lock before acting; a timer firing against torn-down state is a
//! guaranteed no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::hub::peer::{DegradeAction, LinkState, PeerLink};
use crate::hub::relay::SignalingRelay;
use crate::hub::rooms::RoomRegistry;
use crate::hub::store::TranscriptStore;
use crate::hub::transcript::{self, TranscriptBuffer};
use crate::hub::HubError;
use crate::protocol::{ServerMessage, StreamContext, StreamStatus};

/// One broadcaster's active streaming context.
pub struct StreamSession {
    pub id: String,
    pub broadcaster_id: String,
    pub broadcaster_connection: String,
    pub started_at: DateTime<Utc>,
    pub context: StreamContext,

    /// Door label from the most recent transcript event, kept as session
    /// context for the persisted record
    pub last_door_label: Option<String>,

    /// Attached listener links, keyed by listener connection id
    links: HashMap<String, PeerLink>,

    transcript: TranscriptBuffer,

    /// Identity token checked by checkpoint/debounce timers
    generation: u64,
}

impl StreamSession {
    fn live_listener_count(&self) -> usize {
        self.links.values().filter(|l| l.is_live()).count()
    }
}

pub struct SessionManager {
    config: Arc<RwLock<AppConfig>>,
    rooms: Arc<RoomRegistry>,
    relay: Arc<SignalingRelay>,
    store: Arc<dyn TranscriptStore>,

    /// Active sessions keyed by broadcaster id (at most one per broadcaster)
    sessions: RwLock<HashMap<String, Arc<Mutex<StreamSession>>>>,

    /// Broadcaster connection id -> broadcaster id, for disconnect and
    /// signaling lookups
    broadcaster_connections: Mutex<HashMap<String, String>>,

    /// Monotonic source for session and link generations
    generations: AtomicU64,
}

impl SessionManager {
    pub fn new(
        config: Arc<RwLock<AppConfig>>,
        rooms: Arc<RoomRegistry>,
        relay: Arc<SignalingRelay>,
        store: Arc<dyn TranscriptStore>,
    ) -> Self {
        Self {
            config,
            rooms,
            relay,
            store,
            sessions: RwLock::new(HashMap::new()),
            broadcaster_connections: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(1),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    /// Start a session for a broadcaster.
    ///
    /// ## Errors:
    /// `AlreadyStreaming` when the broadcaster already owns an active
    /// session (at-most-one invariant).
    pub fn start_session(
        self: &Arc<Self>,
        broadcaster_id: &str,
        broadcaster_connection: &str,
        context: StreamContext,
    ) -> Result<String, HubError> {
        let (max_chars, checkpoint_ms) = {
            let cfg = self.config.read().unwrap();
            (
                cfg.transcript.max_committed_chars,
                cfg.transcript.checkpoint_interval_ms,
            )
        };

        let generation = self.next_generation();
        let session_id = format!("{}_{}", broadcaster_id, Utc::now().timestamp_millis());
        {
            let mut sessions = self.sessions.write().unwrap();
            if sessions.contains_key(broadcaster_id) {
                return Err(HubError::AlreadyStreaming(broadcaster_id.to_string()));
            }

            let session = StreamSession {
                id: session_id.clone(),
                broadcaster_id: broadcaster_id.to_string(),
                broadcaster_connection: broadcaster_connection.to_string(),
                started_at: Utc::now(),
                context: context.clone(),
                last_door_label: None,
                links: HashMap::new(),
                transcript: TranscriptBuffer::new(max_chars),
                generation,
            };
            sessions.insert(broadcaster_id.to_string(), Arc::new(Mutex::new(session)));
        }
        self.broadcaster_connections
            .lock()
            .unwrap()
            .insert(broadcaster_connection.to_string(), broadcaster_id.to_string());

        info!(
            "broadcaster {} started session {} ({:?})",
            broadcaster_id, session_id, context.building_name
        );

        self.broadcast_to_room(
            Some(broadcaster_connection),
            ServerMessage::StreamStarted {
                broadcaster_id: broadcaster_id.to_string(),
                connection_id: broadcaster_connection.to_string(),
                context,
            },
        );

        // Interim checkpoint loop; exits once the session generation no
        // longer matches (stop, disconnect)
        let manager = Arc::clone(self);
        let owner = broadcaster_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(checkpoint_ms)).await;
                if !manager.checkpoint(&owner, generation) {
                    break;
                }
            }
        });

        Ok(session_id)
    }

    /// Stop a broadcaster's session: tear down every attached link, reconcile
    /// the transcript with the persisted record and notify the room.
    ///
    /// Idempotent — no active session is a no-op, because this is also the
    /// defensive path for abrupt disconnects.
    pub fn stop_session(&self, broadcaster_id: &str) {
        let session = match self.sessions.write().unwrap().remove(broadcaster_id) {
            Some(session) => session,
            None => return,
        };

        let threshold = self.config.read().unwrap().transcript.reconcile_threshold_chars;

        let (session_id, broadcaster_connection, local_text, listeners) = {
            let session = session.lock().unwrap();
            (
                session.id.clone(),
                session.broadcaster_connection.clone(),
                session.transcript.full_text(),
                session.links.keys().cloned().collect::<Vec<_>>(),
            )
        };

        self.broadcaster_connections
            .lock()
            .unwrap()
            .remove(&broadcaster_connection);

        // Notify each listener directly so it releases its local resources
        for listener in &listeners {
            self.relay.send_to(
                listener,
                ServerMessage::LeavePeer {
                    from_connection: broadcaster_connection.clone(),
                },
            );
        }

        self.reconcile(&session_id, &local_text, threshold);

        info!(
            "session {} stopped ({} listeners, {} transcript chars)",
            session_id,
            listeners.len(),
            local_text.chars().count()
        );

        self.broadcast_to_room(
            None,
            ServerMessage::StreamStopped {
                broadcaster_id: broadcaster_id.to_string(),
            },
        );
    }

    /// Checkpoint flush without teardown: the transport may still recover, so
    /// links and the live buffer are left untouched.
    pub fn emergency_save(&self, broadcaster_id: &str) {
        let Some(session) = self.get_session(broadcaster_id) else {
            debug!("emergency save for {} with no active session", broadcaster_id);
            return;
        };

        let (session_id, local_text) = {
            let session = session.lock().unwrap();
            (session.id.clone(), session.transcript.full_text())
        };

        match self.store.patch_session_transcript(&session_id, &local_text) {
            Ok(applied) => info!(
                "emergency save for session {} ({} chars, applied: {})",
                session_id,
                local_text.chars().count(),
                applied
            ),
            Err(e) => warn!("emergency save for session {} failed: {}", session_id, e),
        }
    }

    /// Register a listener on an active session.
    ///
    /// Returns the broadcaster's connection id, where the listener must
    /// address its offer. A retry after failure always builds a brand-new
    /// link — failed links are never resurrected.
    pub fn request_join(
        &self,
        listener_connection: &str,
        broadcaster_id: &str,
    ) -> Result<String, HubError> {
        let session = self
            .get_session(broadcaster_id)
            .ok_or_else(|| HubError::NoActiveSession(broadcaster_id.to_string()))?;

        let generation = self.next_generation();
        let mut session = session.lock().unwrap();
        let broadcaster_connection = session.broadcaster_connection.clone();
        session.links.insert(
            listener_connection.to_string(),
            PeerLink::new(
                listener_connection.to_string(),
                broadcaster_connection.clone(),
                generation,
            ),
        );

        debug!(
            "listener {} joined session of {} (link generation {})",
            listener_connection, broadcaster_id, generation
        );

        Ok(broadcaster_connection)
    }

    /// The listener's offer went out through the relay: move the link to
    /// OfferSent and arm the bounded join timer.
    pub fn on_offer_sent(
        self: &Arc<Self>,
        listener_connection: &str,
        broadcaster_connection: &str,
    ) -> Result<(), HubError> {
        let broadcaster_id = self
            .broadcaster_of_connection(broadcaster_connection)
            .ok_or_else(|| HubError::UnknownConnection(broadcaster_connection.to_string()))?;

        let generation = self.with_link(&broadcaster_id, listener_connection, |link| {
            link.offer_sent()?;
            Ok(link.generation)
        })??;

        let join_timeout = self.config.read().unwrap().signaling.join_timeout_ms;
        let manager = Arc::clone(self);
        let listener = listener_connection.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(join_timeout)).await;
            manager.on_join_timer(&broadcaster_id, &listener, generation);
        });

        Ok(())
    }

    /// The broadcaster's answer reached the listener: OfferSent → Answered.
    pub fn on_answer_sent(
        &self,
        broadcaster_connection: &str,
        listener_connection: &str,
    ) -> Result<(), HubError> {
        let broadcaster_id = self
            .broadcaster_of_connection(broadcaster_connection)
            .ok_or_else(|| HubError::UnknownConnection(broadcaster_connection.to_string()))?;

        self.with_link(&broadcaster_id, listener_connection, |link| {
            link.answer_received()
        })?
    }

    /// The listener observed its first media frame: the authoritative
    /// connected signal.
    pub fn on_media_active(
        &self,
        listener_connection: &str,
        broadcaster_id: &str,
    ) -> Result<(), HubError> {
        self.with_link(broadcaster_id, listener_connection, |link| {
            link.media_active()
        })?
    }

    /// The listener reported transport degradation. The first incident earns
    /// one restart attempt with a bounded grace period to re-observe media;
    /// anything further is terminal.
    pub fn on_link_degraded(
        self: &Arc<Self>,
        listener_connection: &str,
        broadcaster_id: &str,
    ) -> Result<(), HubError> {
        let action = self.with_link(broadcaster_id, listener_connection, |link| {
            Ok((link.degraded(), link.generation))
        })??;

        match action {
            (DegradeAction::Restart, generation) => {
                let grace = self.config.read().unwrap().signaling.restart_grace_ms;
                let manager = Arc::clone(self);
                let owner = broadcaster_id.to_string();
                let listener = listener_connection.to_string();
                debug!(
                    "link {} -> {} restarting (grace {}ms)",
                    listener_connection, broadcaster_id, grace
                );
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(grace)).await;
                    manager.on_restart_timer(&owner, &listener, generation);
                });
                Ok(())
            }
            (DegradeAction::Fail, _) => {
                self.fail_link(broadcaster_id, listener_connection, "degraded_after_restart");
                Ok(())
            }
        }
    }

    /// Explicit teardown notice from either side of a link.
    pub fn on_leave_peer(&self, from_connection: &str, to_connection: &str) {
        // Broadcaster leaving a listener, or listener leaving a broadcaster:
        // resolve which side owns a session and drop the matching link.
        let (broadcaster_connection, listener_connection) =
            if self.broadcaster_of_connection(from_connection).is_some() {
                (from_connection, to_connection)
            } else {
                (to_connection, from_connection)
            };

        if let Some(broadcaster_id) = self.broadcaster_of_connection(broadcaster_connection) {
            self.remove_link(&broadcaster_id, listener_connection);
        }
    }

    /// True when a live (non-failed) link exists between the two connections,
    /// in either direction. Candidate relaying is gated on this.
    pub fn has_live_link(&self, conn_a: &str, conn_b: &str) -> bool {
        for (broadcaster_connection, listener_connection) in
            [(conn_a, conn_b), (conn_b, conn_a)]
        {
            if let Some(broadcaster_id) = self.broadcaster_of_connection(broadcaster_connection) {
                if let Some(session) = self.get_session(&broadcaster_id) {
                    if session
                        .lock()
                        .unwrap()
                        .links
                        .get(listener_connection)
                        .map(|l| l.is_live())
                        .unwrap_or(false)
                    {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Transcript event from the broadcaster's speech engine.
    pub fn transcript_event(
        self: &Arc<Self>,
        broadcaster_id: &str,
        text: &str,
        is_final: bool,
        timestamp: &str,
        door_label: Option<String>,
    ) -> Result<(), HubError> {
        let session = self
            .get_session(broadcaster_id)
            .ok_or_else(|| HubError::NoActiveSession(broadcaster_id.to_string()))?;

        let debounce_ms = self.config.read().unwrap().transcript.partial_debounce_ms;

        let mut session = session.lock().unwrap();
        if door_label.is_some() {
            session.last_door_label = door_label.clone();
        }

        if is_final {
            if session.transcript.apply_final(text) {
                let update = ServerMessage::TranscriptionUpdate {
                    broadcaster_id: broadcaster_id.to_string(),
                    session_id: session.id.clone(),
                    text: text.trim().to_string(),
                    is_final: true,
                    timestamp: timestamp.to_string(),
                    door_label: session.last_door_label.clone(),
                };
                let exclude = session.broadcaster_connection.clone();
                drop(session);
                self.broadcast_to_room(Some(&exclude), update);
            }
            // Re-emitted duplicate finals are absorbed silently
        } else if session.transcript.apply_partial(text) {
            // First partial of a burst: schedule the single flush slot
            let generation = session.generation;
            drop(session);

            let manager = Arc::clone(self);
            let owner = broadcaster_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(debounce_ms)).await;
                manager.flush_partial(&owner, generation);
            });
        }

        Ok(())
    }

    /// Dashboard snapshot: one row per active session.
    pub fn status(&self) -> Vec<StreamStatus> {
        let sessions = self.sessions.read().unwrap();
        let mut streams: Vec<StreamStatus> = sessions
            .values()
            .map(|session| {
                let session = session.lock().unwrap();
                StreamStatus {
                    broadcaster_id: session.broadcaster_id.clone(),
                    is_streaming: true,
                    listener_count: session.live_listener_count(),
                }
            })
            .collect();
        streams.sort_by(|a, b| a.broadcaster_id.cmp(&b.broadcaster_id));
        streams
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Full disconnect cleanup for a closed connection, broadcaster or
    /// listener side. A broadcaster disconnect takes the same teardown path
    /// as an explicit stop, so no orphaned session survives a lost
    /// connection.
    pub fn handle_disconnect(&self, connection_id: &str) {
        if let Some(broadcaster_id) = self.broadcaster_of_connection(connection_id) {
            info!(
                "broadcaster {} disconnected mid-stream, tearing down",
                broadcaster_id
            );
            self.stop_session(&broadcaster_id);
            return;
        }

        // Listener side: drop its links and tell each broadcaster
        let sessions: Vec<Arc<Mutex<StreamSession>>> =
            self.sessions.read().unwrap().values().cloned().collect();
        for session in sessions {
            let (had_link, broadcaster_connection) = {
                let mut session = session.lock().unwrap();
                (
                    session.links.remove(connection_id).is_some(),
                    session.broadcaster_connection.clone(),
                )
            };
            if had_link {
                self.relay.send_to(
                    &broadcaster_connection,
                    ServerMessage::LeavePeer {
                        from_connection: connection_id.to_string(),
                    },
                );
            }
        }
    }

    // --- timer callbacks -------------------------------------------------

    /// Join timer fired: fail the link unless it reached Connected or was
    /// replaced (generation mismatch) in the meantime.
    fn on_join_timer(&self, broadcaster_id: &str, listener_connection: &str, generation: u64) {
        let timed_out = self
            .with_link(broadcaster_id, listener_connection, |link| {
                Ok(link.generation == generation && link.state() != LinkState::Connected)
            })
            .and_then(|r| r)
            .unwrap_or(false);

        if timed_out {
            let err = HubError::JoinTimeout;
            debug!(
                "listener {} on {}: {}",
                listener_connection, broadcaster_id, err
            );
            self.fail_link(broadcaster_id, listener_connection, err.code());
        }
    }

    /// Restart grace timer fired: fail the link unless media came back.
    fn on_restart_timer(&self, broadcaster_id: &str, listener_connection: &str, generation: u64) {
        let still_down = self
            .with_link(broadcaster_id, listener_connection, |link| {
                Ok(link.generation == generation && link.state() == LinkState::Restarting)
            })
            .and_then(|r| r)
            .unwrap_or(false);

        if still_down {
            self.fail_link(broadcaster_id, listener_connection, "restart_timeout");
        }
    }

    /// Debounce timer fired: surface the latest pending partial.
    fn flush_partial(&self, broadcaster_id: &str, generation: u64) {
        let Some(session) = self.get_session(broadcaster_id) else {
            return;
        };

        let update = {
            let mut session = session.lock().unwrap();
            if session.generation != generation {
                return;
            }
            let Some(text) = session.transcript.take_debounced() else {
                return;
            };
            ServerMessage::TranscriptionUpdate {
                broadcaster_id: broadcaster_id.to_string(),
                session_id: session.id.clone(),
                text,
                is_final: false,
                timestamp: Utc::now().to_rfc3339(),
                door_label: session.last_door_label.clone(),
            }
        };

        let exclude = session.lock().unwrap().broadcaster_connection.clone();
        self.broadcast_to_room(Some(&exclude), update);
    }

    /// Interim checkpoint; returns false once the session is gone and the
    /// loop should end.
    fn checkpoint(&self, broadcaster_id: &str, generation: u64) -> bool {
        let Some(session) = self.get_session(broadcaster_id) else {
            return false;
        };

        let (session_id, local_text, matches) = {
            let session = session.lock().unwrap();
            (
                session.id.clone(),
                session.transcript.full_text(),
                session.generation == generation,
            )
        };
        if !matches {
            return false;
        }

        if !local_text.is_empty() {
            if let Err(e) = self.store.patch_session_transcript(&session_id, &local_text) {
                warn!("checkpoint for session {} failed: {}", session_id, e);
            }
        }
        true
    }

    // --- internals -------------------------------------------------------

    fn get_session(&self, broadcaster_id: &str) -> Option<Arc<Mutex<StreamSession>>> {
        self.sessions.read().unwrap().get(broadcaster_id).cloned()
    }

    fn broadcaster_of_connection(&self, connection_id: &str) -> Option<String> {
        self.broadcaster_connections
            .lock()
            .unwrap()
            .get(connection_id)
            .cloned()
    }

    /// Run a closure against one link under its session lock.
    fn with_link<T>(
        &self,
        broadcaster_id: &str,
        listener_connection: &str,
        f: impl FnOnce(&mut PeerLink) -> Result<T, HubError>,
    ) -> Result<Result<T, HubError>, HubError> {
        let session = self
            .get_session(broadcaster_id)
            .ok_or_else(|| HubError::NoActiveSession(broadcaster_id.to_string()))?;
        let mut session = session.lock().unwrap();
        let link = session
            .links
            .get_mut(listener_connection)
            .ok_or_else(|| HubError::UnknownConnection(listener_connection.to_string()))?;
        Ok(f(link))
    }

    /// Terminal link failure: remove it from the session's link set, tell
    /// the listener (distinct "failed" status enabling a manual retry) and
    /// tell the broadcaster to release its side. One listener's failure is
    /// invisible to every other listener.
    fn fail_link(&self, broadcaster_id: &str, listener_connection: &str, reason: &str) {
        let Some(session) = self.get_session(broadcaster_id) else {
            return;
        };

        let broadcaster_connection = {
            let mut session = session.lock().unwrap();
            match session.links.remove(listener_connection) {
                Some(mut link) => {
                    link.fail();
                    session.broadcaster_connection.clone()
                }
                None => return,
            }
        };

        self.relay.send_to(
            listener_connection,
            ServerMessage::LinkFailed {
                broadcaster_id: broadcaster_id.to_string(),
                reason: reason.to_string(),
            },
        );
        self.relay.send_to(
            &broadcaster_connection,
            ServerMessage::LeavePeer {
                from_connection: listener_connection.to_string(),
            },
        );
    }

    fn remove_link(&self, broadcaster_id: &str, listener_connection: &str) {
        if let Some(session) = self.get_session(broadcaster_id) {
            session.lock().unwrap().links.remove(listener_connection);
        }
    }

    fn broadcast_to_room(&self, exclude: Option<&str>, message: ServerMessage) {
        let room = self.config.read().unwrap().signaling.broadcast_room.clone();
        let members = self.rooms.connections_in(&room);
        self.relay.send_to_all(&members, exclude, &message);
    }

    /// Reconciliation against the persisted record. Failures are logged and
    /// never block teardown; the in-memory transcript remains the best-effort
    /// final artifact.
    fn reconcile(&self, session_id: &str, local_text: &str, threshold_chars: usize) {
        let persisted = match self.store.get_session_transcript(session_id) {
            Ok(text) => text,
            Err(e) => {
                warn!("reconciliation skipped for session {}: {}", session_id, e);
                return;
            }
        };

        if !transcript::needs_patch(local_text, &persisted, threshold_chars) {
            debug!(
                "session {}: persisted copy kept (local {} chars, persisted {})",
                session_id,
                local_text.chars().count(),
                persisted.chars().count()
            );
            return;
        }

        match self.store.patch_session_transcript(session_id, local_text) {
            Ok(true) => info!(
                "session {}: persisted record patched with local transcript ({} chars)",
                session_id,
                local_text.chars().count()
            ),
            // The store's own guard may reject stale patches; tolerated
            Ok(false) => debug!("session {}: store rejected the patch", session_id),
            Err(e) => warn!("session {}: patch failed: {}", session_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::store::InMemoryTranscriptStore;

    fn build() -> (
        Arc<SessionManager>,
        Arc<InMemoryTranscriptStore>,
        Arc<SignalingRelay>,
    ) {
        let mut config = AppConfig::default();
        config.signaling.join_timeout_ms = 40;
        config.signaling.restart_grace_ms = 30;
        config.transcript.partial_debounce_ms = 20;
        config.transcript.checkpoint_interval_ms = 10_000;

        let store = Arc::new(InMemoryTranscriptStore::new());
        let relay = Arc::new(SignalingRelay::new());
        let manager = Arc::new(SessionManager::new(
            Arc::new(RwLock::new(config)),
            Arc::new(RoomRegistry::new()),
            Arc::clone(&relay),
            Arc::clone(&store) as Arc<dyn TranscriptStore>,
        ));
        (manager, store, relay)
    }

    fn manager() -> (Arc<SessionManager>, Arc<InMemoryTranscriptStore>) {
        let (manager, store, _relay) = build();
        (manager, store)
    }

    fn link_state(
        manager: &Arc<SessionManager>,
        broadcaster_id: &str,
        listener: &str,
    ) -> Option<LinkState> {
        manager
            .with_link(broadcaster_id, listener, |link| Ok(link.state()))
            .and_then(|r| r)
            .ok()
    }

    #[tokio::test]
    async fn test_at_most_one_session_per_broadcaster() {
        let (manager, _) = manager();
        manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();

        let err = manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap_err();
        assert_eq!(err, HubError::AlreadyStreaming("com-1".to_string()));
    }

    #[tokio::test]
    async fn test_join_without_session_fails() {
        let (manager, _) = manager();
        let err = manager.request_join("conn-l", "com-1").unwrap_err();
        assert_eq!(err, HubError::NoActiveSession("com-1".to_string()));
        assert!(manager.status().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (manager, _) = manager();
        manager.stop_session("nobody");

        manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();
        manager.stop_session("com-1");
        manager.stop_session("com-1");
        assert_eq!(manager.active_session_count(), 0);
    }

    #[tokio::test]
    async fn test_negotiation_reaches_connected() {
        let (manager, _) = manager();
        manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();

        let broadcaster_conn = manager.request_join("conn-l", "com-1").unwrap();
        assert_eq!(broadcaster_conn, "conn-b");

        manager.on_offer_sent("conn-l", "conn-b").unwrap();
        manager.on_answer_sent("conn-b", "conn-l").unwrap();
        manager.on_media_active("conn-l", "com-1").unwrap();

        assert_eq!(link_state(&manager, "com-1", "conn-l"), Some(LinkState::Connected));
        assert_eq!(manager.status()[0].listener_count, 1);
        assert!(manager.has_live_link("conn-l", "conn-b"));
    }

    #[tokio::test]
    async fn test_join_timeout_removes_link() {
        let (manager, _) = manager();
        manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();
        manager.request_join("conn-l", "com-1").unwrap();
        manager.on_offer_sent("conn-l", "conn-b").unwrap();

        // No media signal before the (shortened) join timer elapses
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(link_state(&manager, "com-1", "conn-l").is_none());
        assert_eq!(manager.status()[0].listener_count, 0);
    }

    #[actix::test]
    async fn test_join_timeout_reports_reason_to_listener() {
        use crate::hub::relay::OutboundFrame;
        use actix::prelude::*;

        struct FrameSink {
            received: Arc<Mutex<Vec<ServerMessage>>>,
        }

        impl Actor for FrameSink {
            type Context = Context<Self>;
        }

        impl Handler<OutboundFrame> for FrameSink {
            type Result = ();

            fn handle(&mut self, msg: OutboundFrame, _ctx: &mut Self::Context) {
                self.received.lock().unwrap().push(msg.0);
            }
        }

        let (manager, _store, relay) = build();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let listener = FrameSink {
            received: Arc::clone(&frames),
        }
        .start();
        relay.register("conn-l", listener.recipient());

        manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();
        manager.request_join("conn-l", "com-1").unwrap();
        manager.on_offer_sent("conn-l", "conn-b").unwrap();

        // Past the shortened join timer, plus time for the mailbox to drain
        tokio::time::sleep(Duration::from_millis(100)).await;

        let frames = frames.lock().unwrap();
        assert!(frames.iter().any(|frame| matches!(
            frame,
            ServerMessage::LinkFailed { reason, .. } if reason == HubError::JoinTimeout.code()
        )));
    }

    #[tokio::test]
    async fn test_join_timer_noop_after_connect() {
        let (manager, _) = manager();
        manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();
        manager.request_join("conn-l", "com-1").unwrap();
        manager.on_offer_sent("conn-l", "conn-b").unwrap();
        manager.on_answer_sent("conn-b", "conn-l").unwrap();
        manager.on_media_active("conn-l", "com-1").unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(link_state(&manager, "com-1", "conn-l"), Some(LinkState::Connected));
    }

    #[tokio::test]
    async fn test_single_restart_then_fail() {
        let (manager, _) = manager();
        manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();
        manager.request_join("conn-l", "com-1").unwrap();
        manager.on_offer_sent("conn-l", "conn-b").unwrap();
        manager.on_answer_sent("conn-b", "conn-l").unwrap();
        manager.on_media_active("conn-l", "com-1").unwrap();

        // First degradation: restart, media comes back within the grace
        manager.on_link_degraded("conn-l", "com-1").unwrap();
        assert_eq!(link_state(&manager, "com-1", "conn-l"), Some(LinkState::Restarting));
        manager.on_media_active("conn-l", "com-1").unwrap();

        // Second degradation: straight to removal, no second restart
        manager.on_link_degraded("conn-l", "com-1").unwrap();
        assert!(link_state(&manager, "com-1", "conn-l").is_none());
    }

    #[tokio::test]
    async fn test_restart_grace_expiry_fails_link() {
        let (manager, _) = manager();
        manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();
        manager.request_join("conn-l", "com-1").unwrap();
        manager.on_offer_sent("conn-l", "conn-b").unwrap();
        manager.on_answer_sent("conn-b", "conn-l").unwrap();
        manager.on_media_active("conn-l", "com-1").unwrap();

        manager.on_link_degraded("conn-l", "com-1").unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(link_state(&manager, "com-1", "conn-l").is_none());
    }

    #[tokio::test]
    async fn test_reconciliation_patches_when_longer() {
        let (manager, store) = manager();
        let session_id = manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();

        let long_text = "porte trois personne absente repasser demain matin sans faute";
        manager
            .transcript_event("com-1", long_text, true, "t0", None)
            .unwrap();

        // Persisted copy is far shorter than the local one
        store.patch_session_transcript(&session_id, "porte trois").unwrap();
        manager.stop_session("com-1");

        assert_eq!(store.get_session_transcript(&session_id).unwrap(), long_text);
    }

    #[tokio::test]
    async fn test_reconciliation_keeps_enhanced_copy() {
        let (manager, store) = manager();
        let session_id = manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();

        manager
            .transcript_event("com-1", "bonjour madame porte 3", true, "t0", None)
            .unwrap();

        // Enhanced copy is within the threshold of the local text
        let enhanced = "Bonjour madame, porte 3.";
        store.patch_session_transcript(&session_id, enhanced).unwrap();
        manager.stop_session("com-1");

        assert_eq!(store.get_session_transcript(&session_id).unwrap(), enhanced);
    }

    #[tokio::test]
    async fn test_emergency_save_keeps_session_alive() {
        let (manager, store) = manager();
        let session_id = manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();
        manager.request_join("conn-l", "com-1").unwrap();
        manager
            .transcript_event("com-1", "premier passage", true, "t0", None)
            .unwrap();

        manager.emergency_save("com-1");

        assert_eq!(
            store.get_session_transcript(&session_id).unwrap(),
            "premier passage"
        );
        assert_eq!(manager.active_session_count(), 1);
        assert_eq!(manager.status()[0].listener_count, 1);

        // No session: silently a no-op
        manager.emergency_save("com-2");
    }

    #[tokio::test]
    async fn test_broadcaster_disconnect_tears_down() {
        let (manager, store) = manager();
        let session_id = manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();
        manager
            .transcript_event("com-1", "texte de la visite du jour", true, "t0", None)
            .unwrap();

        manager.handle_disconnect("conn-b");

        assert_eq!(manager.active_session_count(), 0);
        assert_eq!(
            store.get_session_transcript(&session_id).unwrap(),
            "texte de la visite du jour"
        );
    }

    #[tokio::test]
    async fn test_listener_disconnect_drops_only_its_link() {
        let (manager, _) = manager();
        manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();
        manager.request_join("conn-l1", "com-1").unwrap();
        manager.request_join("conn-l2", "com-1").unwrap();

        manager.handle_disconnect("conn-l1");

        assert!(link_state(&manager, "com-1", "conn-l1").is_none());
        assert!(link_state(&manager, "com-1", "conn-l2").is_some());
        assert_eq!(manager.active_session_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_final_committed_once() {
        let (manager, store) = manager();
        let session_id = manager
            .start_session("com-1", "conn-b", StreamContext::default())
            .unwrap();

        manager
            .transcript_event("com-1", "porte 3 absent", true, "t0", None)
            .unwrap();
        manager
            .transcript_event("com-1", "porte 3 absent", true, "t1", None)
            .unwrap();
        manager.stop_session("com-1");

        assert_eq!(
            store.get_session_transcript(&session_id).unwrap(),
            "porte 3 absent"
        );
    }

    #[tokio::test]
    async fn test_transcript_event_without_session() {
        let (manager, _) = manager();
        let err = manager
            .transcript_event("com-1", "hello", true, "t0", None)
            .unwrap_err();
        assert_eq!(err, HubError::NoActiveSession("com-1".to_string()));
    }
}
