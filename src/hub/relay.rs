//! # Signaling Relay
//!
//! Store-nothing message router between connections. The relay keeps a table
//! of live connection mailboxes and forwards negotiation payloads verbatim,
//! tagged with the sender's connection id; it never inspects payload
//! semantics, never buffers and never reorders. Delivery order relies on the
//! transport's per-connection ordering guarantee.
//!
//! If the destination is gone the message is dropped silently: signaling is
//! best-effort and the peer-link timers own reliability.

use std::collections::HashMap;
use std::sync::RwLock;

use actix::prelude::*;
use tracing::debug;

use crate::protocol::ServerMessage;

/// One outbound frame for a WebSocket connection actor.
#[derive(Message)]
#[rtype(result = "()")]
pub struct OutboundFrame(pub ServerMessage);

pub struct SignalingRelay {
    connections: RwLock<HashMap<String, Recipient<OutboundFrame>>>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection's mailbox under its connection id.
    pub fn register(&self, connection_id: &str, mailbox: Recipient<OutboundFrame>) {
        self.connections
            .write()
            .unwrap()
            .insert(connection_id.to_string(), mailbox);
    }

    /// Remove a closed connection from the table.
    pub fn unregister(&self, connection_id: &str) {
        self.connections.write().unwrap().remove(connection_id);
    }

    pub fn is_registered(&self, connection_id: &str) -> bool {
        self.connections.read().unwrap().contains_key(connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    /// Forward a frame to one connection. Returns false if the destination
    /// is gone (the frame is dropped, not queued).
    pub fn send_to(&self, connection_id: &str, message: ServerMessage) -> bool {
        match self.connections.read().unwrap().get(connection_id) {
            Some(mailbox) => {
                mailbox.do_send(OutboundFrame(message));
                true
            }
            None => {
                debug!(
                    "dropping frame for unknown connection {} (destination gone)",
                    connection_id
                );
                false
            }
        }
    }

    /// Forward a frame to every connection in the given set, except the
    /// optional excluded one (typically the originator).
    pub fn send_to_all(&self, connection_ids: &[String], exclude: Option<&str>, message: &ServerMessage) {
        let connections = self.connections.read().unwrap();
        for id in connection_ids {
            if Some(id.as_str()) == exclude {
                continue;
            }
            if let Some(mailbox) = connections.get(id) {
                mailbox.do_send(OutboundFrame(message.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Minimal actor capturing delivered frames.
    struct Sink {
        received: Arc<Mutex<Vec<ServerMessage>>>,
    }

    impl Actor for Sink {
        type Context = Context<Self>;
    }

    impl Handler<OutboundFrame> for Sink {
        type Result = ();

        fn handle(&mut self, msg: OutboundFrame, _ctx: &mut Self::Context) {
            self.received.lock().unwrap().push(msg.0);
        }
    }

    #[actix::test]
    async fn test_send_to_registered_connection() {
        let relay = SignalingRelay::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let addr = Sink {
            received: Arc::clone(&received),
        }
        .start();

        relay.register("c1", addr.recipient());
        assert!(relay.send_to(
            "c1",
            ServerMessage::LeavePeer {
                from_connection: "c2".to_string(),
            },
        ));

        // Let the actor drain its mailbox
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[actix::test]
    async fn test_unknown_destination_is_dropped_silently() {
        let relay = SignalingRelay::new();
        assert!(!relay.send_to(
            "ghost",
            ServerMessage::LeavePeer {
                from_connection: "c1".to_string(),
            },
        ));
    }

    #[actix::test]
    async fn test_unregister_removes_mailbox() {
        let relay = SignalingRelay::new();
        let addr = Sink {
            received: Arc::new(Mutex::new(Vec::new())),
        }
        .start();

        relay.register("c1", addr.recipient());
        assert!(relay.is_registered("c1"));
        relay.unregister("c1");
        assert!(!relay.is_registered("c1"));
        assert_eq!(relay.connection_count(), 0);
    }
}
