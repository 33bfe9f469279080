use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub message: String,
    pub version: String,
    pub time: DateTime<Utc>,
}

/// Get the health of the server.
pub async fn healthcheck() -> Json<HealthResponse> {
    tracing::info!("Healthcheck!");
    Json(HealthResponse {
        message: "🪶".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        time: Utc::now(),
    })
}
