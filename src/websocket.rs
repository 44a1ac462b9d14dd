//! # WebSocket Streaming Handler
//!
//! Handles the real-time signaling and transcript channel. Clients connect to
//! `/ws`, identify themselves with a `hello` frame, and from then on exchange
//! the JSON protocol defined in [`crate::protocol`].
//!
//! ## Connection lifecycle:
//! 1. **Connection**: the server assigns a connection id and registers the
//!    actor's mailbox with the signaling relay
//! 2. **Identification**: `hello` binds a participant id and role
//! 3. **Operation**: room membership, stream lifecycle, signaling relay,
//!    transcript events, latency probes
//! 4. **Disconnect**: rooms are left (with `peer_left` notifications), any
//!    owned session is torn down as if stopped, listener links are dropped
//!
//! Audio itself never touches this server; only negotiation payloads and
//! transcript text do.

use crate::config::AppConfig;
use crate::hub::relay::OutboundFrame;
use crate::hub::{Hub, HubError};
use crate::latency::LatencyTracker;
use crate::protocol::{ClientMessage, Role, ServerMessage};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the transport-level heartbeat ping goes out.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a silent client may live before the connection is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket actor for one connected participant.
pub struct StreamWebSocket {
    /// Server-assigned connection id, stable for the socket's lifetime
    connection_id: String,

    /// Participant identity, set by the `hello` frame
    participant_id: Option<String>,
    role: Option<Role>,

    hub: Arc<Hub>,

    /// Latency tunables snapshotted at connection time
    probe_interval: Duration,
    probe_timeout: Duration,
    latency: LatencyTracker,

    /// Last transport-level heartbeat from the client
    last_heartbeat: Instant,
}

impl StreamWebSocket {
    pub fn new(config: &AppConfig, hub: Arc<Hub>) -> Self {
        Self {
            connection_id: Uuid::new_v4().to_string(),
            participant_id: None,
            role: None,
            hub,
            probe_interval: Duration::from_millis(config.latency.probe_interval_ms),
            probe_timeout: Duration::from_millis(config.latency.probe_timeout_ms),
            latency: LatencyTracker::new(
                config.latency.sample_window,
                config.latency.max_missed_probes,
                Duration::from_millis(config.latency.degraded_rtt_ms),
            ),
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("failed to serialize outbound frame: {}", err),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, err: &HubError) {
        warn!("connection {}: {}", self.connection_id, err);
        self.send(
            ctx,
            &ServerMessage::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        );
    }

    /// Participant id for lifecycle operations; errors if `hello` never came.
    fn require_identity(&self, ctx: &mut ws::WebsocketContext<Self>) -> Option<String> {
        match &self.participant_id {
            Some(id) => Some(id.clone()),
            None => {
                self.send(
                    ctx,
                    &ServerMessage::Error {
                        code: "not_identified".to_string(),
                        message: "send hello before lifecycle operations".to_string(),
                    },
                );
                None
            }
        }
    }

    /// Whether this connection declared itself a broadcaster.
    fn is_broadcaster(&self) -> bool {
        self.role == Some(Role::Broadcaster)
    }

    /// Identity check plus role enforcement for broadcaster-only operations.
    fn require_broadcaster(&self, ctx: &mut ws::WebsocketContext<Self>) -> Option<String> {
        let participant_id = self.require_identity(ctx)?;
        if !self.is_broadcaster() {
            self.send(
                ctx,
                &ServerMessage::Error {
                    code: "role_mismatch".to_string(),
                    message: "only broadcasters can perform this operation".to_string(),
                },
            );
            return None;
        }
        Some(participant_id)
    }

    fn dispatch(&mut self, message: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match message {
            ClientMessage::Hello {
                participant_id,
                role,
            } => {
                info!(
                    "connection {} identified as {} ({:?})",
                    self.connection_id, participant_id, role
                );
                self.participant_id = Some(participant_id);
                self.role = Some(role);
                self.send(
                    ctx,
                    &ServerMessage::HelloAck {
                        connection_id: self.connection_id.clone(),
                    },
                );
            }

            ClientMessage::JoinRoom { room } => {
                self.hub.rooms.join(&self.connection_id, &room);
            }

            ClientMessage::LeaveRoom { room } => {
                if self.hub.rooms.leave(&self.connection_id, &room) {
                    self.notify_room_departure(&room);
                }
            }

            ClientMessage::StartStream { context } => {
                let Some(participant_id) = self.require_broadcaster(ctx) else {
                    return;
                };
                if let Err(err) =
                    self.hub
                        .sessions
                        .start_session(&participant_id, &self.connection_id, context)
                {
                    self.send_error(ctx, &err);
                }
            }

            ClientMessage::StopStream => {
                let Some(participant_id) = self.require_broadcaster(ctx) else {
                    return;
                };
                self.hub.sessions.stop_session(&participant_id);
            }

            ClientMessage::EmergencySave => {
                let Some(participant_id) = self.require_broadcaster(ctx) else {
                    return;
                };
                self.hub.sessions.emergency_save(&participant_id);
            }

            ClientMessage::RequestJoin { broadcaster_id } => {
                match self
                    .hub
                    .sessions
                    .request_join(&self.connection_id, &broadcaster_id)
                {
                    Ok(broadcaster_connection) => self.send(
                        ctx,
                        &ServerMessage::JoinAccepted {
                            broadcaster_id,
                            broadcaster_connection,
                        },
                    ),
                    Err(err) => self.send_error(ctx, &err),
                }
            }

            ClientMessage::WebrtcOffer {
                to_connection,
                sdp,
                sdp_type,
            } => {
                let delivered = self.hub.relay.send_to(
                    &to_connection,
                    ServerMessage::WebrtcOffer {
                        from_connection: self.connection_id.clone(),
                        sdp,
                        sdp_type,
                    },
                );
                if delivered {
                    if let Err(err) = self
                        .hub
                        .sessions
                        .on_offer_sent(&self.connection_id, &to_connection)
                    {
                        debug!("offer outside a tracked link: {}", err);
                    }
                }
            }

            ClientMessage::WebrtcAnswer {
                to_connection,
                sdp,
                sdp_type,
            } => {
                let delivered = self.hub.relay.send_to(
                    &to_connection,
                    ServerMessage::WebrtcAnswer {
                        from_connection: self.connection_id.clone(),
                        sdp,
                        sdp_type,
                    },
                );
                if delivered {
                    if let Err(err) = self
                        .hub
                        .sessions
                        .on_answer_sent(&self.connection_id, &to_connection)
                    {
                        debug!("answer outside a tracked link: {}", err);
                    }
                }
            }

            ClientMessage::IceCandidate {
                to_connection,
                candidate,
            } => {
                // Candidates for dead or unknown links are dropped, not
                // relayed; a failed link must stay failed.
                if self
                    .hub
                    .sessions
                    .has_live_link(&self.connection_id, &to_connection)
                {
                    self.hub.relay.send_to(
                        &to_connection,
                        ServerMessage::IceCandidate {
                            from_connection: self.connection_id.clone(),
                            candidate,
                        },
                    );
                } else {
                    debug!(
                        "dropping candidate from {} for {}: no live link",
                        self.connection_id, to_connection
                    );
                }
            }

            ClientMessage::LeavePeer { to_connection } => {
                self.hub.relay.send_to(
                    &to_connection,
                    ServerMessage::LeavePeer {
                        from_connection: self.connection_id.clone(),
                    },
                );
                self.hub
                    .sessions
                    .on_leave_peer(&self.connection_id, &to_connection);
            }

            ClientMessage::MediaActive { broadcaster_id } => {
                if let Err(err) = self
                    .hub
                    .sessions
                    .on_media_active(&self.connection_id, &broadcaster_id)
                {
                    self.send_error(ctx, &err);
                }
            }

            ClientMessage::LinkDegraded { broadcaster_id } => {
                if let Err(err) = self
                    .hub
                    .sessions
                    .on_link_degraded(&self.connection_id, &broadcaster_id)
                {
                    debug!("degradation report without link: {}", err);
                }
            }

            ClientMessage::TranscriptEvent {
                text,
                is_final,
                timestamp,
                door_label,
            } => {
                let Some(participant_id) = self.require_broadcaster(ctx) else {
                    return;
                };
                if let Err(err) = self.hub.sessions.transcript_event(
                    &participant_id,
                    &text,
                    is_final,
                    &timestamp,
                    door_label,
                ) {
                    self.send_error(ctx, &err);
                }
            }

            ClientMessage::StatusRequest => {
                self.send(
                    ctx,
                    &ServerMessage::StatusResponse {
                        streams: self.hub.sessions.status(),
                    },
                );
            }

            ClientMessage::ProbeEcho { correlation_id, .. } => {
                if let Some(rtt) = self.latency.complete_probe(&correlation_id) {
                    debug!(
                        "connection {} rtt {}ms ({})",
                        self.connection_id,
                        rtt.as_millis(),
                        self.latency.status().as_str()
                    );
                }
            }
        }
    }

    /// Tell remaining members of a room that this connection left it.
    fn notify_room_departure(&self, room: &str) {
        let members = self.hub.rooms.connections_in(room);
        self.hub.relay.send_to_all(
            &members,
            Some(&self.connection_id),
            &ServerMessage::PeerLeft {
                connection_id: self.connection_id.clone(),
                room: room.to_string(),
            },
        );
    }
}

impl Actor for StreamWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection {} started", self.connection_id);

        self.hub
            .relay
            .register(&self.connection_id, ctx.address().recipient());

        // Transport heartbeat: ping every interval, drop silent clients
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    "connection {} heartbeat timeout, closing",
                    act.connection_id
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });

        // Application-level latency probe, independent of ws ping/pong
        ctx.run_interval(self.probe_interval, |act, ctx| {
            let (correlation_id, timestamp) = act.latency.begin_probe();
            act.send(
                ctx,
                &ServerMessage::Probe {
                    correlation_id,
                    timestamp,
                },
            );

            // One-shot expiry per probe, so the timeout governs miss
            // detection rather than the probe cadence
            let timeout = act.probe_timeout;
            ctx.run_later(timeout, move |act, _ctx| {
                if act.latency.expire_pending(timeout) {
                    warn!(
                        "connection {} missed a probe ({} consecutive, {})",
                        act.connection_id,
                        act.latency.consecutive_misses(),
                        act.latency.status().as_str()
                    );
                }
            });
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("WebSocket connection {} stopped", self.connection_id);

        self.hub.relay.unregister(&self.connection_id);

        // Leave every room, telling the remaining members
        for room in self.hub.rooms.drop_connection(&self.connection_id) {
            self.notify_room_departure(&room);
        }

        // Session-side cleanup: owned sessions are stopped, listener links
        // are dropped and their broadcasters notified
        self.hub.sessions.handle_disconnect(&self.connection_id);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for StreamWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => self.dispatch(message, ctx),
                Err(err) => {
                    self.send(
                        ctx,
                        &ServerMessage::Error {
                            code: "invalid_json".to_string(),
                            message: format!("Invalid message: {}", err),
                        },
                    );
                }
            },
            Ok(ws::Message::Binary(_)) => {
                // Audio bytes never transit this server
                warn!(
                    "connection {} sent unexpected binary frame",
                    self.connection_id
                );
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(
                    "WebSocket {} closed: {:?}",
                    self.connection_id, reason
                );
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Frames routed to this connection through the signaling relay.
impl Handler<OutboundFrame> for StreamWebSocket {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) {
        self.send(ctx, &msg.0);
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a fresh [`StreamWebSocket`] actor.
pub async fn stream_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New WebSocket connection request from: {:?}",
        req.connection_info().peer_addr()
    );

    let config = app_state.get_config();
    let websocket = StreamWebSocket::new(&config, Arc::clone(&app_state.hub));

    ws::start(websocket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_actor() -> StreamWebSocket {
        let config = AppConfig::default();
        let hub = Arc::new(Hub::new(
            Arc::new(std::sync::RwLock::new(config.clone())),
            Arc::new(crate::hub::store::InMemoryTranscriptStore::new()),
        ));
        StreamWebSocket::new(&config, hub)
    }

    #[test]
    fn test_new_connection_gets_unique_id() {
        let a = test_actor();
        let b = test_actor();
        assert_ne!(a.connection_id, b.connection_id);
        assert!(a.participant_id.is_none());
    }

    #[test]
    fn test_only_broadcasters_manage_streams() {
        let mut ws = test_actor();

        // Unidentified and listener connections are both refused
        assert!(!ws.is_broadcaster());
        ws.participant_id = Some("sup-1".to_string());
        ws.role = Some(Role::Listener);
        assert!(!ws.is_broadcaster());

        ws.participant_id = Some("com-1".to_string());
        ws.role = Some(Role::Broadcaster);
        assert!(ws.is_broadcaster());
    }
}
