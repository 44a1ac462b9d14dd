//! # Configuration Management
//!
//! This module handles loading and managing application configuration from
//! multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// Breaking configuration into logical groups (server, signaling, transcript,
/// latency) keeps each subsystem's tunables together and makes partial
/// runtime updates straightforward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub signaling: SignalingConfig,
    pub transcript: TranscriptConfig,
    pub latency: LatencyConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Signaling and peer-link tuning.
///
/// ## Fields:
/// - `broadcast_room`: Room name where stream lifecycle and transcript events
///   are fanned out to dashboards
/// - `join_timeout_ms`: How long a listener's link may stay unconnected
///   before it is declared failed
/// - `restart_grace_ms`: How long a degraded link may spend in its single
///   restart attempt before it is declared failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    pub broadcast_room: String,
    pub join_timeout_ms: u64,
    pub restart_grace_ms: u64,
}

/// Live transcript assembly tuning.
///
/// ## Fields:
/// - `max_committed_chars`: Cap on the committed text, truncated from the
///   front (only the tail matters for a live view)
/// - `partial_debounce_ms`: Quiet window collapsing bursts of partial events
///   into one room update
/// - `reconcile_threshold_chars`: Minimum length advantage the local text
///   needs before the persisted record is patched at session end
/// - `checkpoint_interval_ms`: Period of the interim persistence flush while
///   a session is live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    pub max_committed_chars: usize,
    pub partial_debounce_ms: u64,
    pub reconcile_threshold_chars: usize,
    pub checkpoint_interval_ms: u64,
}

/// Application-level latency probing.
///
/// ## Tuning guidelines:
/// - Shorter probe intervals: faster presence detection, more chatter
/// - `max_missed_probes` consecutive unanswered probes mark a connection
///   offline; a single echo recovers it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyConfig {
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub max_missed_probes: u32,
    pub sample_window: usize,
    pub degraded_rtt_ms: u64,
}

/// Default values ensure the application can start even if no configuration
/// file exists. They also serve as documentation of reasonable starting
/// values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            signaling: SignalingConfig {
                broadcast_room: "audio-streaming".to_string(),
                join_timeout_ms: 10_000,
                restart_grace_ms: 3_000,
            },
            transcript: TranscriptConfig {
                max_committed_chars: 8_000,
                partial_debounce_ms: 150,
                reconcile_threshold_chars: 10,
                checkpoint_interval_ms: 30_000,
            },
            latency: LatencyConfig {
                probe_interval_ms: 10_000,
                probe_timeout_ms: 5_000,
                max_missed_probes: 3,
                sample_window: 5,
                degraded_rtt_ms: 1_000,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_SERVER_PORT=3000`: Override server port
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.signaling.broadcast_room.is_empty() {
            return Err(anyhow::anyhow!("Broadcast room name cannot be empty"));
        }

        if self.signaling.join_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Join timeout must be greater than 0"));
        }

        if self.transcript.max_committed_chars == 0 {
            return Err(anyhow::anyhow!(
                "Max committed transcript size must be greater than 0"
            ));
        }

        if self.latency.sample_window == 0 {
            return Err(anyhow::anyhow!("Latency sample window must be greater than 0"));
        }

        if self.latency.max_missed_probes == 0 {
            return Err(anyhow::anyhow!("Max missed probes must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config
    /// updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are touched. For example,
    /// `{"signaling": {"join_timeout_ms": 15000}}` changes one tunable and
    /// leaves everything else intact. The updated configuration is
    /// re-validated before it is accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(signaling) = partial_config.get("signaling") {
            if let Some(room) = signaling.get("broadcast_room").and_then(|v| v.as_str()) {
                self.signaling.broadcast_room = room.to_string();
            }
            if let Some(timeout) = signaling.get("join_timeout_ms").and_then(|v| v.as_u64()) {
                self.signaling.join_timeout_ms = timeout;
            }
            if let Some(grace) = signaling.get("restart_grace_ms").and_then(|v| v.as_u64()) {
                self.signaling.restart_grace_ms = grace;
            }
        }

        if let Some(transcript) = partial_config.get("transcript") {
            if let Some(cap) = transcript
                .get("max_committed_chars")
                .and_then(|v| v.as_u64())
            {
                self.transcript.max_committed_chars = cap as usize;
            }
            if let Some(debounce) = transcript
                .get("partial_debounce_ms")
                .and_then(|v| v.as_u64())
            {
                self.transcript.partial_debounce_ms = debounce;
            }
            if let Some(threshold) = transcript
                .get("reconcile_threshold_chars")
                .and_then(|v| v.as_u64())
            {
                self.transcript.reconcile_threshold_chars = threshold as usize;
            }
            if let Some(interval) = transcript
                .get("checkpoint_interval_ms")
                .and_then(|v| v.as_u64())
            {
                self.transcript.checkpoint_interval_ms = interval;
            }
        }

        if let Some(latency) = partial_config.get("latency") {
            if let Some(interval) = latency.get("probe_interval_ms").and_then(|v| v.as_u64()) {
                self.latency.probe_interval_ms = interval;
            }
            if let Some(timeout) = latency.get("probe_timeout_ms").and_then(|v| v.as_u64()) {
                self.latency.probe_timeout_ms = timeout;
            }
            if let Some(misses) = latency.get("max_missed_probes").and_then(|v| v.as_u64()) {
                self.latency.max_missed_probes = misses as u32;
            }
            if let Some(window) = latency.get("sample_window").and_then(|v| v.as_u64()) {
                self.latency.sample_window = window as usize;
            }
            if let Some(rtt) = latency.get("degraded_rtt_ms").and_then(|v| v.as_u64()) {
                self.latency.degraded_rtt_ms = rtt;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.signaling.broadcast_room, "audio-streaming");
        assert_eq!(config.signaling.join_timeout_ms, 10_000);
        assert_eq!(config.transcript.max_committed_chars, 8_000);
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.signaling.broadcast_room.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.latency.max_missed_probes = 0;
        assert!(config.validate().is_err());
    }

    /// Test that runtime configuration updates work correctly.
    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"signaling": {"join_timeout_ms": 15000}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.signaling.join_timeout_ms, 15_000);
        // Other fields should remain unchanged
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.signaling.restart_grace_ms, 3_000);
    }

    /// Test that an update leaving the config invalid is rejected.
    #[test]
    fn test_invalid_update_rejected() {
        let mut config = AppConfig::default();
        let json = r#"{"transcript": {"max_committed_chars": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
