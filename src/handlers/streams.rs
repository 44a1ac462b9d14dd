use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Active stream snapshot for dashboards that poll over REST instead of
/// holding a WebSocket open.
pub async fn list_streams(state: web::Data<AppState>) -> HttpResponse {
    let streams = state.hub.sessions.status();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": streams.len(),
        "streams": streams
    }))
}
