use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let memory_info = get_memory_info();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "prospect-stream-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "streaming": {
            "connections": state.hub.relay.connection_count(),
            "active_sessions": state.hub.sessions.active_session_count(),
            "occupied_rooms": state.hub.rooms.occupied_room_count()
        },
        "memory": memory_info
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let streams: Vec<serde_json::Value> = state
        .hub
        .sessions
        .status()
        .into_iter()
        .map(|s| {
            json!({
                "broadcaster_id": s.broadcaster_id,
                "is_streaming": s.is_streaming,
                "listener_count": s.listener_count
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "connections": state.hub.relay.connection_count(),
            "active_sessions": state.hub.sessions.active_session_count(),
            "occupied_rooms": state.hub.rooms.occupied_room_count()
        },
        "streams": streams,
        "memory": get_memory_info(),
        "tuning": {
            "join_timeout_ms": config.signaling.join_timeout_ms,
            "restart_grace_ms": config.signaling.restart_grace_ms,
            "partial_debounce_ms": config.transcript.partial_debounce_ms,
            "probe_interval_ms": config.latency.probe_interval_ms
        }
    }))
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }

        json!({
            "resident_memory_bytes": 0,
            "virtual_memory_bytes": 0,
            "available": false
        })
    }

    #[cfg(not(target_os = "linux"))]
    {
        json!({
            "resident_memory_bytes": 0,
            "virtual_memory_bytes": 0,
            "available": false,
            "note": "Memory info not available on this platform"
        })
    }
}
