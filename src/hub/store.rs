//! # Persisted Transcript Store
//!
//! Interface to the external transcript history store. The store is consulted
//! once at session end for reconciliation and patched only when the local
//! buffer is demonstrably more complete; an asynchronous enrichment step may
//! rewrite records behind our back, so the store applies its own
//! logically-longer guard and the caller tolerates rejection silently.
//!
//! The in-memory implementation backs tests and standalone deployments; a
//! production deployment implements this trait against the CRUD data layer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store cannot be reached; reconciliation is best-effort
    /// and the caller logs and moves on.
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "transcript store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// get/patch interface to the persisted transcript record.
pub trait TranscriptStore: Send + Sync {
    /// Current persisted text for a session. Missing sessions read as empty.
    fn get_session_transcript(&self, session_id: &str) -> Result<String, StoreError>;

    /// Replace the persisted text. Returns false when the store's own guard
    /// rejected the patch (e.g. the stored text is already at least as long).
    fn patch_session_transcript(&self, session_id: &str, text: &str) -> Result<bool, StoreError>;
}

/// In-memory store with the same logically-longer guard as the external one.
pub struct InMemoryTranscriptStore {
    records: Mutex<HashMap<String, String>>,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl TranscriptStore for InMemoryTranscriptStore {
    fn get_session_transcript(&self, session_id: &str) -> Result<String, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    fn patch_session_transcript(&self, session_id: &str, text: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        let existing = records.get(session_id).map(String::len).unwrap_or(0);
        if text.len() > existing {
            records.insert(session_id.to_string(), text.to_string());
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_session_reads_empty() {
        let store = InMemoryTranscriptStore::new();
        assert_eq!(store.get_session_transcript("nope").unwrap(), "");
    }

    #[test]
    fn test_patch_guard_rejects_shorter_text() {
        let store = InMemoryTranscriptStore::new();
        assert!(store
            .patch_session_transcript("s1", "a long first transcript")
            .unwrap());
        assert!(!store.patch_session_transcript("s1", "short").unwrap());
        assert_eq!(
            store.get_session_transcript("s1").unwrap(),
            "a long first transcript"
        );
    }
}
