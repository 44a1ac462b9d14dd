use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "signaling": {
                "broadcast_room": config.signaling.broadcast_room,
                "join_timeout_ms": config.signaling.join_timeout_ms,
                "restart_grace_ms": config.signaling.restart_grace_ms
            },
            "transcript": {
                "max_committed_chars": config.transcript.max_committed_chars,
                "partial_debounce_ms": config.transcript.partial_debounce_ms,
                "reconcile_threshold_chars": config.transcript.reconcile_threshold_chars,
                "checkpoint_interval_ms": config.transcript.checkpoint_interval_ms
            },
            "latency": {
                "probe_interval_ms": config.latency.probe_interval_ms,
                "probe_timeout_ms": config.latency.probe_timeout_ms,
                "max_missed_probes": config.latency.max_missed_probes,
                "sample_window": config.latency.sample_window,
                "degraded_rtt_ms": config.latency.degraded_rtt_ms
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port
            },
            "signaling": {
                "broadcast_room": current_config.signaling.broadcast_room,
                "join_timeout_ms": current_config.signaling.join_timeout_ms,
                "restart_grace_ms": current_config.signaling.restart_grace_ms
            },
            "transcript": {
                "max_committed_chars": current_config.transcript.max_committed_chars,
                "partial_debounce_ms": current_config.transcript.partial_debounce_ms,
                "reconcile_threshold_chars": current_config.transcript.reconcile_threshold_chars,
                "checkpoint_interval_ms": current_config.transcript.checkpoint_interval_ms
            },
            "latency": {
                "probe_interval_ms": current_config.latency.probe_interval_ms,
                "probe_timeout_ms": current_config.latency.probe_timeout_ms,
                "max_missed_probes": current_config.latency.max_missed_probes,
                "sample_window": current_config.latency.sample_window,
                "degraded_rtt_ms": current_config.latency.degraded_rtt_ms
            }
        }
    })))
}
