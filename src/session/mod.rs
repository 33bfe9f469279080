//! Encrypted, expiring browser sessions.
//!
//! The session cookie is the encrypted identity payload issued after a
//! successful GitHub OAuth exchange. Validation never fails loudly: any
//! undecodable, tampered or expired cookie simply means "anonymous", and the
//! middleware clears the bad cookie from the browser.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::crypto::TokenCrypto;
use crate::AppState;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "gh_token";

/// Session lifetime: 48 hours.
pub const SESSION_TTL_SECS: i64 = 172_800;

/// The decrypted, parsed payload of the auth cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionToken {
    pub display_name: String,
    pub emails: Vec<String>,
    pub raw_profile: serde_json::Value,
    pub expires_at: i64,
}

impl SessionToken {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

/// Issues and validates session cookies. Cheap to clone; the derived key
/// lives in the shared [`TokenCrypto`].
#[derive(Clone)]
pub struct SessionService {
    crypto: Arc<TokenCrypto>,
}

impl SessionService {
    pub fn new(crypto: Arc<TokenCrypto>) -> Self {
        Self { crypto }
    }

    /// Issue a session for an authenticated profile. Returns the opaque
    /// cookie value and its expiry as a Unix timestamp.
    pub fn issue(
        &self,
        display_name: &str,
        emails: &[String],
        raw_profile: serde_json::Value,
    ) -> anyhow::Result<(String, i64)> {
        let expires_at = Utc::now().timestamp() + SESSION_TTL_SECS;
        let token = SessionToken {
            display_name: display_name.to_string(),
            emails: emails.to_vec(),
            raw_profile,
            expires_at,
        };
        Ok((self.seal(&token)?, expires_at))
    }

    /// Serialize and encrypt a token into the opaque cookie value.
    pub fn seal(&self, token: &SessionToken) -> anyhow::Result<String> {
        let json = serde_json::to_vec(token)?;
        let encoded = BASE64.encode(&json);
        self.crypto.encrypt(encoded.as_bytes())
    }

    /// Validate a cookie value. Returns `None` for anything other than a
    /// well-formed, authenticated, unexpired session; this is a normal
    /// outcome, never an error.
    pub fn validate(&self, cookie: &str) -> Option<SessionToken> {
        let decrypted = self.crypto.decrypt(cookie).ok()?;
        let raw = BASE64.decode(&decrypted).ok()?;
        let token: SessionToken = serde_json::from_slice(&raw).ok()?;
        if token.is_expired_at(Utc::now().timestamp()) {
            return None;
        }
        Some(token)
    }
}

/// Build the session cookie with transport attributes. `secure` should be
/// set for any non-local deployment.
pub fn session_cookie(value: String, expires_at: i64, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, value);
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(secure);
    if let Ok(expires) = time::OffsetDateTime::from_unix_timestamp(expires_at) {
        cookie.set_expires(expires);
    }
    cookie
}

/// The validated session for this request, stored in request extensions by
/// [`middleware`].
#[derive(Clone)]
pub struct RequestSession(pub Option<SessionToken>);

/// Authentication backend for every request: validates the session cookie
/// before any route-level authorization runs, and instructs the browser to
/// drop a cookie that failed validation.
pub async fn middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let cookie = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let session = cookie.as_deref().and_then(|c| state.sessions.validate(c));
    let had_bad_cookie = cookie.is_some() && session.is_none();

    request.extensions_mut().insert(RequestSession(session));
    let mut response = next.run(request).await;

    if had_bad_cookie {
        let mut removal = Cookie::new(SESSION_COOKIE, "");
        removal.set_path("/");
        removal.set_expires(time::OffsetDateTime::UNIX_EPOCH);
        if let Ok(value) = HeaderValue::from_str(&removal.to_string()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    response
}

/// Extractor for routes that require an authenticated session.
pub struct CurrentUser(pub SessionToken);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestSession>()
            .and_then(|session| session.0.clone())
            .map(CurrentUser)
            .ok_or_else(|| ApiError::unauthorized("Not authenticated."))
    }
}
