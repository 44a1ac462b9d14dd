//! # Prospect Stream Backend - Main Application Entry Point
//!
//! Coordination server for live door-to-door audio broadcasting: room
//! presence, WebRTC signaling relay, stream session lifecycle and live
//! transcript assembly. Audio flows peer-to-peer between agents and
//! supervisors; this server carries only negotiation payloads, transcript
//! text and presence state.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML files + environment variables)
//! - **state**: Shared application state
//! - **protocol**: JSON wire protocol for the `/ws` channel
//! - **hub**: Rooms, signaling relay, peer links, sessions, transcripts
//! - **latency**: Application-level latency probing and presence
//! - **websocket**: Per-connection WebSocket actor
//! - **health / handlers**: REST endpoints (health, metrics, config, streams)
//! - **error**: Custom error types and HTTP error responses

mod config;
mod error;
mod handlers;
mod health;
mod hub;
mod latency;
mod protocol;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use hub::store::InMemoryTranscriptStore;
use hub::Hub;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handler task and polled by the
/// main task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!(
        "Starting prospect-stream-backend v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // Shared config behind a lock so runtime updates reach the hub, plus the
    // hub itself and the transcript store backing reconciliation
    let shared_config = Arc::new(RwLock::new(config));
    let store = Arc::new(InMemoryTranscriptStore::new());
    let hub = Arc::new(Hub::new(Arc::clone(&shared_config), store));
    let app_state = AppState::new(shared_config, hub);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // Browsers on dashboards and the mobile web app connect cross-origin
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/streams", web::get().to(handlers::list_streams)),
            )
            // Health check at root level for load balancers
            .route("/health", web::get().to(health::health_check))
            .route("/ws", web::get().to(websocket::stream_websocket))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` controls what gets logged; if unset, defaults to
/// "prospect_stream_backend=debug,actix_web=info".
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prospect_stream_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set up SIGTERM/SIGINT handlers for graceful shutdown. Graceful here means
/// in-flight requests finish and WebSocket actors get their `stopped`
/// teardown (session cleanup, transcript reconciliation) before exit.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
