//! GitHub OAuth 2.0 authorization-code flow for user login.
//!
//! Three steps: build the authorize URL the browser is sent to, exchange the
//! callback code for an access token, then fetch the user profile and
//! verified email addresses.

use serde::Deserialize;

use crate::config::GitHubConfig;

const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("OAuth request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("code exchange rejected: {0}")]
    Exchange(String),
}

/// One verified-or-not email entry from `GET /user/emails`.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailEntry {
    pub email: String,
    pub verified: bool,
}

/// The authenticated user's profile: login, verified emails and the raw
/// profile document as returned by the API.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub login: String,
    pub emails: Vec<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error_description: Option<String>,
}

/// Keep verified addresses only, dropping GitHub's noreply aliases.
pub fn verified_emails(entries: &[EmailEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|entry| entry.verified && !entry.email.ends_with("users.noreply.github.com"))
        .map(|entry| entry.email.clone())
        .collect()
}

/// URL-encode a string for use in query parameters
fn url_encode(s: &str) -> String {
    let mut encoded = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

pub struct GitHubOAuth {
    client_id: String,
    client_secret: String,
    scope: String,
    authorize_url: String,
    token_url: String,
    api_base: String,
    http: reqwest::Client,
}

impl GitHubOAuth {
    pub fn new(config: &GitHubConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.oauth_scope.clone(),
            authorize_url: config.oauth_authorize_url.clone(),
            token_url: config.oauth_token_url.clone(),
            api_base: DEFAULT_API_BASE.to_string(),
            http: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Build the URL the browser is redirected to for authorization.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}",
            self.authorize_url,
            url_encode(&self.client_id),
            url_encode(redirect_uri),
            url_encode(&self.scope),
            url_encode(state),
        )
    }

    /// Exchange the callback code for an access token.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<String, OAuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await?;

        let token: TokenResponse = response.json().await?;
        token.access_token.ok_or_else(|| {
            OAuthError::Exchange(
                token
                    .error_description
                    .unwrap_or_else(|| "no access token in response".to_string()),
            )
        })
    }

    /// Fetch the user's profile and verified email addresses.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, OAuthError> {
        let raw: serde_json::Value = self
            .get(&format!("{}/user", self.api_base), access_token)
            .await?;
        let entries: Vec<EmailEntry> = self
            .get(&format!("{}/user/emails", self.api_base), access_token)
            .await?;

        let login = raw
            .get("login")
            .and_then(|login| login.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(UserProfile {
            login,
            emails: verified_emails(&entries),
            raw,
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, OAuthError> {
        let response = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "kookaburra")
            .send()
            .await?;
        Ok(response.json().await?)
    }
}
