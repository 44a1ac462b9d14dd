//! # Live Transcript Assembler
//!
//! Per-session accumulator for the ordered partial/final event stream coming
//! out of the speech-recognition engine. Recognition engines re-emit the same
//! final segment after internal restarts and produce bursts of partials, so
//! the buffer deduplicates finals, debounces partial updates through a single
//! flush slot, and caps the committed text with front truncation (only the
//! tail is semantically valuable for a live view).
//!
//! ## Ownership:
//! The buffer for a session is mutated only under that session's lock, so
//! events arriving from a concurrently-scheduled connection handler can never
//! interleave partial writes.

/// Per-session transcript accumulator.
#[derive(Debug)]
pub struct TranscriptBuffer {
    /// Finalized text, capped at `max_committed_chars` (oldest dropped first)
    committed: String,

    /// Last-seen partial text, not yet surfaced
    pending: String,

    /// Last appended final segment, for duplicate absorption
    last_final_segment: String,

    /// Whether a debounce flush is already scheduled (single-slot: bursts of
    /// partials collapse to the latest value, never one timer per event)
    flush_scheduled: bool,

    max_committed_chars: usize,
}

impl TranscriptBuffer {
    pub fn new(max_committed_chars: usize) -> Self {
        Self {
            committed: String::new(),
            pending: String::new(),
            last_final_segment: String::new(),
            flush_scheduled: false,
            max_committed_chars,
        }
    }

    /// Record a partial event. Returns true when the caller should schedule
    /// a debounce flush; false means one is already pending and this event
    /// only refreshed the slot.
    pub fn apply_partial(&mut self, text: &str) -> bool {
        self.pending = normalize(text);
        if self.flush_scheduled {
            false
        } else {
            self.flush_scheduled = true;
            true
        }
    }

    /// Consume the debounce slot: returns the latest pending value and
    /// re-arms the scheduler. Returns None when the slot was emptied by an
    /// intervening final event.
    pub fn take_debounced(&mut self) -> Option<String> {
        self.flush_scheduled = false;
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.clone())
        }
    }

    /// Record a final event. Returns false when the segment is an exact
    /// re-emission of the previous final and was absorbed.
    pub fn apply_final(&mut self, text: &str) -> bool {
        let segment = normalize(text);
        if segment.is_empty() || segment == self.last_final_segment {
            return false;
        }

        if !self.committed.is_empty() {
            self.committed.push(' ');
        }
        self.committed.push_str(&segment);
        self.truncate_front();

        self.last_final_segment = segment;
        self.pending.clear();
        true
    }

    pub fn committed(&self) -> &str {
        &self.committed
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Full local text: committed plus the trailing pending partial, if any.
    pub fn full_text(&self) -> String {
        if self.pending.is_empty() {
            self.committed.clone()
        } else if self.committed.is_empty() {
            self.pending.clone()
        } else {
            format!("{} {}", self.committed, self.pending)
        }
    }

    fn truncate_front(&mut self) {
        let len = self.committed.chars().count();
        if len > self.max_committed_chars {
            self.committed = self
                .committed
                .chars()
                .skip(len - self.max_committed_chars)
                .collect();
        }
    }
}

/// Collapse whitespace runs and trim, matching what the recognition engine's
/// consumers expect to display.
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reconciliation decision at session end: patch the persisted record only
/// when the local text is longer by more than `threshold_chars`. The
/// persisted version may have been asynchronously rewritten/enhanced, and a
/// longer-but-stale local copy must not clobber that arbitrarily; the length
/// delta is a heuristic guard, not a content-aware merge.
pub fn needs_patch(local: &str, persisted: &str, threshold_chars: usize) -> bool {
    local.chars().count() > persisted.chars().count() + threshold_chars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partials_collapse_to_latest() {
        let mut buf = TranscriptBuffer::new(8000);

        // First partial in a burst schedules the flush, the rest refresh it
        assert!(buf.apply_partial("bonj"));
        assert!(!buf.apply_partial("bonjour"));
        assert!(!buf.apply_partial("bonjour ma"));

        assert_eq!(buf.take_debounced().as_deref(), Some("bonjour ma"));

        // Slot re-armed after the flush
        assert!(buf.apply_partial("bonjour madame"));
    }

    #[test]
    fn test_duplicate_final_absorbed_once() {
        let mut buf = TranscriptBuffer::new(8000);
        assert!(buf.apply_final("porte 3 absent"));
        assert!(!buf.apply_final("porte 3 absent"));
        assert_eq!(buf.committed(), "porte 3 absent");
    }

    #[test]
    fn test_final_appends_with_separator_and_clears_pending() {
        let mut buf = TranscriptBuffer::new(8000);
        buf.apply_final("bonjour madame");
        buf.apply_partial("je passe");
        buf.apply_final("je passais dans le quartier");

        assert_eq!(buf.committed(), "bonjour madame je passais dans le quartier");
        assert_eq!(buf.pending(), "");
        assert!(buf.take_debounced().is_none());
    }

    #[test]
    fn test_committed_capped_from_front() {
        let mut buf = TranscriptBuffer::new(10);
        buf.apply_final("abcdefgh");
        buf.apply_final("ijkl");

        // "abcdefgh ijkl" is 13 chars, the oldest 3 are dropped
        assert_eq!(buf.committed().chars().count(), 10);
        assert_eq!(buf.committed(), "defgh ijkl");
    }

    #[test]
    fn test_full_text_includes_pending() {
        let mut buf = TranscriptBuffer::new(8000);
        buf.apply_final("porte 3 absent");
        buf.apply_partial("porte 4");
        assert_eq!(buf.full_text(), "porte 3 absent porte 4");
    }

    #[test]
    fn test_whitespace_normalized() {
        let mut buf = TranscriptBuffer::new(8000);
        buf.apply_final("  bonjour   madame ");
        assert_eq!(buf.committed(), "bonjour madame");
    }

    #[test]
    fn test_needs_patch_threshold() {
        // 520 vs 515: delta 5 is under the threshold, trust the server copy
        assert!(!needs_patch(&"a".repeat(520), &"b".repeat(515), 10));
        // 600 vs 400: delta 200 exceeds it
        assert!(needs_patch(&"a".repeat(600), &"b".repeat(400), 10));
        // Equal or shorter never patches
        assert!(!needs_patch("same", "same", 10));
        assert!(!needs_patch("short", "a much longer enhanced text", 10));
    }
}
