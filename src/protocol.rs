//! # Wire Protocol
//!
//! JSON message types exchanged over the `/ws` endpoint. Every frame is an
//! internally-tagged object (`{"type": "...", ...}`) so clients can dispatch
//! on a single discriminator.
//!
//! ## Message Flow:
//! - **Client → Server**: identification, room membership, stream lifecycle,
//!   signaling payloads, transcript events, probe echoes
//! - **Server → Client**: acknowledgements, relayed signaling (tagged with the
//!   sender's connection id), live transcript fan-out, status snapshots, probes

use serde::{Deserialize, Serialize};

/// Role a participant declares when identifying itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Field agent streaming microphone audio and speech-to-text output
    Broadcaster,
    /// Supervisor consuming a broadcaster's audio feed
    Listener,
}

/// Context metadata attached to a stream session (where the broadcaster is).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamContext {
    pub building_id: Option<String>,
    pub building_name: Option<String>,
}

/// One row of the dashboard status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatus {
    pub broadcaster_id: String,
    pub is_streaming: bool,
    pub listener_count: usize,
}

/// Messages sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Identify this connection. Must precede any lifecycle operation.
    #[serde(rename = "hello")]
    Hello { participant_id: String, role: Role },

    /// Join a named room for presence scoping
    #[serde(rename = "join_room")]
    JoinRoom { room: String },

    /// Leave a named room
    #[serde(rename = "leave_room")]
    LeaveRoom { room: String },

    /// Broadcaster starts an audio stream session
    #[serde(rename = "start_stream")]
    StartStream { context: StreamContext },

    /// Broadcaster stops its active session (no-op if none)
    #[serde(rename = "stop_stream")]
    StopStream,

    /// Checkpoint flush triggered by page-hide/connection-loss signals
    #[serde(rename = "emergency_save")]
    EmergencySave,

    /// Listener asks to join a broadcaster's active session
    #[serde(rename = "request_join")]
    RequestJoin { broadcaster_id: String },

    /// Negotiation offer, relayed verbatim to `to_connection`
    #[serde(rename = "webrtc_offer")]
    WebrtcOffer {
        to_connection: String,
        sdp: String,
        sdp_type: String,
    },

    /// Negotiation answer, relayed verbatim to `to_connection`
    #[serde(rename = "webrtc_answer")]
    WebrtcAnswer {
        to_connection: String,
        sdp: String,
        sdp_type: String,
    },

    /// ICE candidate (None signals end-of-candidates)
    #[serde(rename = "ice_candidate")]
    IceCandidate {
        to_connection: String,
        candidate: Option<serde_json::Value>,
    },

    /// Explicit teardown notice to the other side of a link
    #[serde(rename = "leave_peer")]
    LeavePeer { to_connection: String },

    /// Listener reports the first media frame arrived (authoritative
    /// "connected" signal)
    #[serde(rename = "media_active")]
    MediaActive { broadcaster_id: String },

    /// Listener reports transport degradation on its link
    #[serde(rename = "link_degraded")]
    LinkDegraded { broadcaster_id: String },

    /// Speech-recognition output from the broadcaster's engine
    #[serde(rename = "transcript_event")]
    TranscriptEvent {
        text: String,
        is_final: bool,
        timestamp: String,
        door_label: Option<String>,
    },

    /// Dashboard asks for the active stream snapshot
    #[serde(rename = "status_request")]
    StatusRequest,

    /// Echo of a latency probe
    #[serde(rename = "probe_echo")]
    ProbeEcho {
        correlation_id: String,
        timestamp: u64,
    },
}

/// Messages sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Assigned connection id, sent in response to `hello`
    #[serde(rename = "hello_ack")]
    HelloAck { connection_id: String },

    /// Room-wide notification that a broadcaster went live
    #[serde(rename = "stream_started")]
    StreamStarted {
        broadcaster_id: String,
        connection_id: String,
        context: StreamContext,
    },

    /// Room-wide notification that a stream ended
    #[serde(rename = "stream_stopped")]
    StreamStopped { broadcaster_id: String },

    /// Join request accepted; offers should be addressed to
    /// `broadcaster_connection`
    #[serde(rename = "join_accepted")]
    JoinAccepted {
        broadcaster_id: String,
        broadcaster_connection: String,
    },

    /// Relayed negotiation offer
    #[serde(rename = "webrtc_offer")]
    WebrtcOffer {
        from_connection: String,
        sdp: String,
        sdp_type: String,
    },

    /// Relayed negotiation answer
    #[serde(rename = "webrtc_answer")]
    WebrtcAnswer {
        from_connection: String,
        sdp: String,
        sdp_type: String,
    },

    /// Relayed ICE candidate
    #[serde(rename = "ice_candidate")]
    IceCandidate {
        from_connection: String,
        candidate: Option<serde_json::Value>,
    },

    /// Relayed teardown notice
    #[serde(rename = "leave_peer")]
    LeavePeer { from_connection: String },

    /// A link failed terminally; the client may retry with a fresh join
    #[serde(rename = "link_failed")]
    LinkFailed {
        broadcaster_id: String,
        reason: String,
    },

    /// Live transcript fan-out to the session's room
    #[serde(rename = "transcription_update")]
    TranscriptionUpdate {
        broadcaster_id: String,
        session_id: String,
        text: String,
        is_final: bool,
        timestamp: String,
        door_label: Option<String>,
    },

    /// A connection left a room (explicitly or by disconnect)
    #[serde(rename = "peer_left")]
    PeerLeft { connection_id: String, room: String },

    /// Dashboard status snapshot
    #[serde(rename = "status_response")]
    StatusResponse { streams: Vec<StreamStatus> },

    /// Latency probe; clients answer with `probe_echo`
    #[serde(rename = "probe")]
    Probe {
        correlation_id: String,
        timestamp: u64,
    },

    /// Error frame with a machine-readable code
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_tagged_serialization() {
        let msg = ClientMessage::StartStream {
            context: StreamContext {
                building_id: Some("bldg-7".to_string()),
                building_name: Some("Residence Les Lilas".to_string()),
            },
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"start_stream\""));

        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::StartStream { context } => {
                assert_eq!(context.building_id.as_deref(), Some("bldg-7"));
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_end_of_candidates_is_null() {
        let msg = ClientMessage::IceCandidate {
            to_connection: "c1".to_string(),
            candidate: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"candidate\":null"));
    }

    #[test]
    fn test_relayed_offer_carries_sender() {
        let msg = ServerMessage::WebrtcOffer {
            from_connection: "conn-abc".to_string(),
            sdp: "v=0".to_string(),
            sdp_type: "offer".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("from_connection"));
        assert!(json.contains("conn-abc"));
    }
}
