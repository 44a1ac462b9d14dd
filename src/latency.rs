//! # Latency & Presence Monitor
//!
//! Per-connection application-level probing, independent of the transport's
//! own keepalive. The server emits a correlated probe on a fixed interval;
//! the client echoes it back and the round-trip time feeds a rolling window.
//! Transport keepalives only prove the socket is open — they say nothing
//! about whether the application event loop on the other side is responsive,
//! which is what supervisors actually care about.
//!
//! ## Presence:
//! - `Online` — probes answered, average RTT under the degraded threshold
//! - `Degraded` — answering, but slow
//! - `Offline` — a run of consecutive unanswered probes; a single successful
//!   echo recovers the connection immediately

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Degraded,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Degraded => "degraded",
            PresenceStatus::Offline => "offline",
        }
    }
}

#[derive(Debug)]
struct PendingProbe {
    correlation_id: String,
    sent_at: Instant,
}

/// Rolling RTT window and miss counter for one connection.
#[derive(Debug)]
pub struct LatencyTracker {
    samples: VecDeque<Duration>,
    sample_window: usize,
    consecutive_misses: u32,
    max_missed_probes: u32,
    degraded_rtt: Duration,
    pending: Option<PendingProbe>,
}

impl LatencyTracker {
    pub fn new(sample_window: usize, max_missed_probes: u32, degraded_rtt: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(sample_window),
            sample_window,
            consecutive_misses: 0,
            max_missed_probes,
            degraded_rtt,
            pending: None,
        }
    }

    /// Issue a new probe, replacing any still-pending one. Returns the
    /// correlation id and a millisecond timestamp for the wire frame.
    pub fn begin_probe(&mut self) -> (String, u64) {
        let correlation_id = Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;
        self.pending = Some(PendingProbe {
            correlation_id: correlation_id.clone(),
            sent_at: Instant::now(),
        });
        (correlation_id, timestamp)
    }

    /// Record an echo. A matching correlation id yields the round-trip time
    /// and clears the miss run; stale or unknown ids are ignored so a
    /// late-arriving echo cannot corrupt the window.
    pub fn complete_probe(&mut self, correlation_id: &str) -> Option<Duration> {
        match &self.pending {
            Some(probe) if probe.correlation_id == correlation_id => {
                let rtt = probe.sent_at.elapsed();
                self.pending = None;
                self.consecutive_misses = 0;
                if self.samples.len() == self.sample_window {
                    self.samples.pop_front();
                }
                self.samples.push_back(rtt);
                Some(rtt)
            }
            _ => None,
        }
    }

    /// Expire the pending probe if it has outlived `timeout`. Returns true
    /// when a miss was recorded.
    pub fn expire_pending(&mut self, timeout: Duration) -> bool {
        match &self.pending {
            Some(probe) if probe.sent_at.elapsed() >= timeout => {
                self.pending = None;
                self.consecutive_misses += 1;
                true
            }
            _ => false,
        }
    }

    /// Average over the rolling window, None until the first sample.
    pub fn average_rtt(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn status(&self) -> PresenceStatus {
        if self.consecutive_misses >= self.max_missed_probes {
            return PresenceStatus::Offline;
        }
        match self.average_rtt() {
            Some(avg) if avg > self.degraded_rtt => PresenceStatus::Degraded,
            _ => PresenceStatus::Online,
        }
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }
}
