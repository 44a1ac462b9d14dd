//! # Application State Management
//!
//! Shared state handed to every HTTP request handler and WebSocket
//! connection.
//!
//! ## Arc<RwLock<T>> Pattern:
//! - **Arc**: Multiple ownership (many handlers hold a reference)
//! - **RwLock**: Multiple readers OR one writer at a time
//!
//! The configuration can be updated at runtime through the config endpoint,
//! so it sits behind a lock; the hub manages its own internal locking (one
//! mutex per session/room, never a global one).

use crate::config::AppConfig;
use crate::hub::Hub;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Streaming hub: rooms, relay, sessions
    pub hub: Arc<Hub>,

    /// When the server started (never changes, no lock needed)
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Arc<RwLock<AppConfig>>, hub: Arc<Hub>) -> Self {
        Self {
            config,
            hub,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately so other threads aren't
    /// blocked; AppConfig is cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it. Hub components read
    /// tunables through the same lock, so new values take effect on the next
    /// operation without a restart.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
