//! GitHub-facing routes: OAuth login and callback, and the push webhook.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::db::GitHubUser;
use crate::engine::PushEvent;
use crate::session;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Verify a webhook signature (X-Hub-Signature-256 header)
fn verify_signature(secret: &str, signature_header: &str, payload: &[u8]) -> bool {
    // Signature format: sha256=<hex>
    let signature = match signature_header.strip_prefix("sha256=") {
        Some(sig) => sig,
        None => return false,
    };

    let expected = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    // Constant-time comparison
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub after: String,
    pub repository: PushRepository,
    pub pusher: Pusher,
}

#[derive(Debug, Deserialize)]
pub struct PushRepository {
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
}

#[derive(Debug, Deserialize)]
pub struct Pusher {
    pub name: String,
}

impl From<PushPayload> for PushEvent {
    fn from(payload: PushPayload) -> Self {
        PushEvent {
            repo_full_name: payload.repository.full_name,
            default_branch: payload.repository.default_branch,
            git_ref: payload.git_ref,
            clone_url: payload.repository.clone_url,
            after: payload.after,
            pusher: payload.pusher.name,
        }
    }
}

/// The OAuth callback URL for this deployment. Everything outside a local
/// domain is reachable over https only.
fn callback_url(state: &AppState) -> String {
    let url = format!(
        "{}/api/v0/auth/gh",
        state.config.server.public_url.trim_end_matches('/')
    );
    if state.config.is_local() {
        url
    } else {
        url.replacen("http://", "https://", 1)
    }
}

fn oauth_state() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Start the OAuth flow: respond with a client-redirect header pointing at
/// the authorize endpoint.
pub async fn login_gh(State(state): State<Arc<AppState>>) -> Response {
    let redirect_uri = callback_url(&state);
    let uri = state.oauth.authorize_url(&redirect_uri, &oauth_state());
    (
        StatusCode::OK,
        [(HeaderName::from_static("hx-redirect"), uri)],
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct AuthCallbackQuery {
    pub code: Option<String>,
}

/// OAuth callback: exchange the code, fetch the profile, upsert the user and
/// set the session cookie.
pub async fn auth_github(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthCallbackQuery>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ApiError> {
    let code = query
        .code
        .ok_or_else(|| ApiError::bad_request("Missing authorization code."))?;

    let redirect_uri = callback_url(&state);
    let token = state
        .oauth
        .exchange_code(&code, &redirect_uri)
        .await
        .map_err(|error| {
            tracing::warn!(error = %error, "OAuth code exchange failed");
            ApiError::unauthorized("GitHub authentication failed.")
        })?;
    let profile = state.oauth.fetch_profile(&token).await.map_err(|error| {
        tracing::warn!(error = %error, "Failed to fetch GitHub profile");
        ApiError::unauthorized("GitHub authentication failed.")
    })?;

    GitHubUser::upsert_from_login(&state.db, &profile.login, &profile.emails).await?;

    let (cookie_value, expires_at) = state
        .sessions
        .issue(&profile.login, &profile.emails, profile.raw)
        .map_err(|error| {
            tracing::error!(error = %error, "Failed to issue session");
            ApiError::internal("Failed to establish a session.")
        })?;
    let cookie = session::session_cookie(cookie_value, expires_at, !state.config.is_local());

    let destination = format!(
        "{}/?success=true",
        state.config.server.public_url.trim_end_matches('/')
    );
    Ok((jar.add(cookie), Redirect::to(&destination)))
}

/// Handle a GitHub webhook delivery.
///
/// The pushing identity must be a known, non-waitlisted user. Valid pushes
/// are acknowledged immediately and processed in a spawned task; the
/// response does not wait on clone or deploy.
pub async fn wh_github(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    if let Some(ref secret) = state.config.github.webhook_secret {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::warn!("Webhook missing X-Hub-Signature-256 header");
                ApiError::unauthorized("Missing webhook signature.")
            })?;
        if !verify_signature(secret, signature, &body) {
            tracing::warn!("Webhook signature verification failed");
            return Err(ApiError::unauthorized("Invalid webhook signature."));
        }
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("Malformed webhook payload."))?;

    let pusher = payload
        .get("pusher")
        .and_then(|pusher| pusher.get("name"))
        .and_then(|name| name.as_str())
        .ok_or_else(|| ApiError::bad_request("Malformed webhook payload."))?;

    let user = GitHubUser::find_by_username(&state.db, pusher)
        .await?
        .ok_or_else(|| ApiError::forbidden("Please sign up!"))?;
    if user.waitlisted {
        return Err(ApiError::forbidden("You are waitlisted!"));
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if event_type != "push" {
        tracing::debug!(event_type, "Acknowledging non-push event");
        return Ok(StatusCode::OK);
    }

    let payload: PushPayload = serde_json::from_value(payload)
        .map_err(|_| ApiError::bad_request("Malformed push payload."))?;
    let event = PushEvent::from(payload);

    tracing::info!(
        repo = %event.repo_full_name,
        git_ref = %event.git_ref,
        "Accepted push event"
    );

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.handle(event, user).await;
    });

    Ok(StatusCode::OK)
}
