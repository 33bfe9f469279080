//! GitHub integration: App credentials, API client and user OAuth.

pub mod api_client;
pub mod oauth;
pub mod token_manager;

pub use api_client::{CommitState, GitHubClient};
pub use oauth::GitHubOAuth;
pub use token_manager::AppAuth;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    /// The repository owner has not installed the App. Non-retryable;
    /// the user has to install it.
    #[error("no GitHub App installation found for {0}")]
    InstallationNotFound(String),

    #[error("GitHub API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to sign App JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// The pipeline's view of the source host: short-lived credentials for
/// cloning plus commit-status reporting.
#[async_trait]
pub trait GitHost: Send + Sync {
    /// Mint an installation access token able to clone the repository.
    async fn installation_token(&self, repo_full_name: &str) -> Result<String, GitHubError>;

    /// Report commit status for a pushed sha.
    async fn post_commit_status(
        &self,
        repo_full_name: &str,
        sha: &str,
        state: CommitState,
        description: &str,
    ) -> Result<(), GitHubError>;
}

/// Production [`GitHost`] backed by the App identity and the GitHub API.
///
/// Every call mints a fresh App JWT; installation credentials live only for
/// the duration of one operation chain.
pub struct GitHubService {
    auth: AppAuth,
    client: GitHubClient,
    target_url: String,
}

impl GitHubService {
    pub fn new(auth: AppAuth, client: GitHubClient, target_url: String) -> Self {
        Self {
            auth,
            client,
            target_url,
        }
    }
}

#[async_trait]
impl GitHost for GitHubService {
    async fn installation_token(&self, repo_full_name: &str) -> Result<String, GitHubError> {
        let jwt = self.auth.mint_jwt()?;
        let installation_id = self
            .client
            .resolve_installation_id(&jwt, repo_full_name)
            .await?;
        self.client
            .create_installation_token(&jwt, installation_id)
            .await
    }

    async fn post_commit_status(
        &self,
        repo_full_name: &str,
        sha: &str,
        state: CommitState,
        description: &str,
    ) -> Result<(), GitHubError> {
        let token = self.installation_token(repo_full_name).await?;
        self.client
            .post_commit_status(
                &token,
                repo_full_name,
                sha,
                state,
                &self.target_url,
                description,
            )
            .await
    }
}
