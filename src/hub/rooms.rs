//! # Presence & Room Registry
//!
//! In-memory index of which connections belong to which named rooms. A
//! connection is a room member only after an explicit join and is removed on
//! leave or disconnect.
//!
//! ## Locking:
//! Each room's membership set sits behind its own mutex, so joins and leaves
//! on one room are linearizable while unrelated rooms stay fully independent.
//! The outer map is only locked to look up or create a room entry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

/// Pure in-memory presence index. No persistence.
pub struct RoomRegistry {
    /// Room name -> membership set (one lock per room)
    rooms: RwLock<HashMap<String, Arc<Mutex<HashSet<String>>>>>,

    /// Reverse index: connection id -> rooms it joined
    memberships: Mutex<HashMap<String, HashSet<String>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            memberships: Mutex::new(HashMap::new()),
        }
    }

    /// Add a connection to a room, creating the room on first join.
    pub fn join(&self, connection_id: &str, room: &str) {
        let members = self.room_entry(room);
        members.lock().unwrap().insert(connection_id.to_string());

        self.memberships
            .lock()
            .unwrap()
            .entry(connection_id.to_string())
            .or_default()
            .insert(room.to_string());

        debug!("connection {} joined room {}", connection_id, room);
    }

    /// Remove a connection from a room. Returns true if it was a member.
    pub fn leave(&self, connection_id: &str, room: &str) -> bool {
        let removed = match self.rooms.read().unwrap().get(room) {
            Some(members) => members.lock().unwrap().remove(connection_id),
            None => false,
        };

        if removed {
            let mut memberships = self.memberships.lock().unwrap();
            if let Some(joined) = memberships.get_mut(connection_id) {
                joined.remove(room);
                if joined.is_empty() {
                    memberships.remove(connection_id);
                }
            }
            debug!("connection {} left room {}", connection_id, room);
        }

        removed
    }

    /// Snapshot of the connections currently in a room.
    pub fn connections_in(&self, room: &str) -> Vec<String> {
        match self.rooms.read().unwrap().get(room) {
            Some(members) => members.lock().unwrap().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Snapshot of the rooms a connection has joined.
    pub fn rooms_of(&self, connection_id: &str) -> Vec<String> {
        self.memberships
            .lock()
            .unwrap()
            .get(connection_id)
            .map(|joined| joined.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a closed connection from every room it joined.
    ///
    /// Returns the rooms it was removed from so the caller can emit one
    /// "left" notification per room to the remaining members.
    pub fn drop_connection(&self, connection_id: &str) -> Vec<String> {
        let joined = self
            .memberships
            .lock()
            .unwrap()
            .remove(connection_id)
            .map(|set| set.into_iter().collect::<Vec<_>>())
            .unwrap_or_default();

        let rooms = self.rooms.read().unwrap();
        for room in &joined {
            if let Some(members) = rooms.get(room) {
                members.lock().unwrap().remove(connection_id);
            }
        }

        joined
    }

    /// Number of rooms with at least one member.
    pub fn occupied_room_count(&self) -> usize {
        self.rooms
            .read()
            .unwrap()
            .values()
            .filter(|members| !members.lock().unwrap().is_empty())
            .count()
    }

    fn room_entry(&self, room: &str) -> Arc<Mutex<HashSet<String>>> {
        if let Some(members) = self.rooms.read().unwrap().get(room) {
            return Arc::clone(members);
        }
        let mut rooms = self.rooms.write().unwrap();
        Arc::clone(rooms.entry(room.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let registry = RoomRegistry::new();
        registry.join("c1", "audio-streaming");
        registry.join("c2", "audio-streaming");

        let mut members = registry.connections_in("audio-streaming");
        members.sort();
        assert_eq!(members, vec!["c1", "c2"]);

        assert!(registry.leave("c1", "audio-streaming"));
        assert_eq!(registry.connections_in("audio-streaming"), vec!["c2"]);

        // Leaving twice is not a membership change
        assert!(!registry.leave("c1", "audio-streaming"));
    }

    #[test]
    fn test_rooms_of_tracks_memberships() {
        let registry = RoomRegistry::new();
        registry.join("c1", "room-a");
        registry.join("c1", "room-b");

        let mut rooms = registry.rooms_of("c1");
        rooms.sort();
        assert_eq!(rooms, vec!["room-a", "room-b"]);

        registry.leave("c1", "room-a");
        assert_eq!(registry.rooms_of("c1"), vec!["room-b"]);
    }

    #[test]
    fn test_drop_connection_removes_everywhere() {
        let registry = RoomRegistry::new();
        registry.join("c1", "room-a");
        registry.join("c1", "room-b");
        registry.join("c2", "room-a");

        let mut left = registry.drop_connection("c1");
        left.sort();
        assert_eq!(left, vec!["room-a", "room-b"]);

        assert_eq!(registry.connections_in("room-a"), vec!["c2"]);
        assert!(registry.connections_in("room-b").is_empty());
        assert!(registry.rooms_of("c1").is_empty());

        // A second drop reports nothing, so "left" notifications fire once
        assert!(registry.drop_connection("c1").is_empty());
    }

    #[test]
    fn test_unknown_room_is_empty() {
        let registry = RoomRegistry::new();
        assert!(registry.connections_in("nope").is_empty());
    }
}
