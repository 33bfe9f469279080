pub mod error;
mod gh;
mod health;
mod sms;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::session::{self, CurrentUser};
use crate::AppState;

pub const API_V0: &str = "/api/v0";

#[derive(Debug, Serialize)]
struct MeResponse {
    display_name: String,
    emails: Vec<String>,
    expires_at: i64,
}

/// Identity echo for the signed-in user.
async fn me(CurrentUser(session): CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        display_name: session.display_name,
        emails: session.emails,
        expires_at: session.expires_at,
    })
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = state
        .config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if state.config.is_local() {
        for origin in [
            "http://localhost",
            "http://127.0.0.1",
            "http://localhost:8000",
            "http://127.0.0.1:8000",
        ] {
            if let Ok(value) = origin.parse() {
                origins.push(value);
            }
        }
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/healthcheck", get(health::healthcheck))
        .route("/me", get(me))
        .route("/sms", post(sms::receive_sms))
        .route("/login/gh", get(gh::login_gh))
        .route("/auth/gh", get(gh::auth_github))
        .route("/wh/gh", post(gh::wh_github));

    Router::new()
        .nest(API_V0, api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state))
        .with_state(state)
}
