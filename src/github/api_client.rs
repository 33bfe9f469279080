//! GitHub API client for installation resolution and commit statuses.

use serde::{Deserialize, Serialize};

use super::GitHubError;

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Commit status states reported back to the source host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
        }
    }
}

impl std::fmt::Display for CommitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A GitHub App installation, as returned by the installations listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Installation {
    pub id: i64,
    pub account: InstallationAccount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationAccount {
    pub login: String,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct CommitStatusRequest<'a> {
    state: &'static str,
    target_url: &'a str,
    description: &'a str,
    context: &'static str,
}

/// Match an installation to a repository by its owner segment.
///
/// `full_name` is `owner/repo`; the installation whose account login equals
/// the owner is the one that can access the repository.
pub fn match_installation(installations: &[Installation], full_name: &str) -> Option<i64> {
    let owner = full_name.split('/').next()?;
    installations
        .iter()
        .find(|installation| installation.account.login == owner)
        .map(|installation| installation.id)
}

/// GitHub REST client. The base URL is injectable so the matching and
/// exchange logic is reachable from tests.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
}

impl Default for GitHubClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHubClient {
    pub fn new() -> Self {
        Self::with_api_base(DEFAULT_API_BASE)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GitHubError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(GitHubError::Api {
            status: status.as_u16(),
            body,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder, bearer: &str) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", bearer))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "kookaburra")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// List every installation of the App.
    pub async fn list_installations(&self, jwt: &str) -> Result<Vec<Installation>, GitHubError> {
        let url = format!("{}/app/installations", self.api_base);
        let response = self.request(self.http.get(&url), jwt).send().await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Resolve the installation covering a repository's owner.
    ///
    /// A missing installation is the expected outcome when the owner has not
    /// installed the App; it is non-retryable and surfaced to the user.
    pub async fn resolve_installation_id(
        &self,
        jwt: &str,
        repo_full_name: &str,
    ) -> Result<i64, GitHubError> {
        let installations = self.list_installations(jwt).await?;
        match_installation(&installations, repo_full_name)
            .ok_or_else(|| GitHubError::InstallationNotFound(repo_full_name.to_string()))
    }

    /// Exchange an App JWT for a short-lived installation access token.
    pub async fn create_installation_token(
        &self,
        jwt: &str,
        installation_id: i64,
    ) -> Result<String, GitHubError> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, installation_id
        );
        let response = self.request(self.http.post(&url), jwt).send().await?;
        let response = Self::check(response).await?;
        let token: InstallationTokenResponse = response.json().await?;
        Ok(token.token)
    }

    /// Report pipeline progress on a commit.
    pub async fn post_commit_status(
        &self,
        access_token: &str,
        repo_full_name: &str,
        sha: &str,
        state: CommitState,
        target_url: &str,
        description: &str,
    ) -> Result<(), GitHubError> {
        let url = format!("{}/repos/{}/statuses/{}", self.api_base, repo_full_name, sha);
        let body = CommitStatusRequest {
            state: state.as_str(),
            target_url,
            description,
            context: "kookaburra",
        };
        let response = self
            .request(self.http.post(&url), access_token)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
