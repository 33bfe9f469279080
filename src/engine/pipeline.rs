//! Push handling: from an accepted webhook to a reported deploy.
//!
//! Each push runs as one independent task:
//! validate ref → report pending → resolve or provision the LLM record →
//! clone → package → deploy → report success or failure. Failures inside the
//! pipeline are reported as a commit status and then swallowed; the webhook
//! endpoint never surfaces them.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::{DbPool, GitHubUser, Llm};
use crate::engine::fetch::{CloneError, SourceFetcher};
use crate::engine::packager::{package, DeployError, Deployer, PackageError};
use crate::github::{CommitState, GitHost, GitHubError};
use crate::sms::{SmsError, SmsGateway};

/// A parsed push event, immutable once parsed.
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub repo_full_name: String,
    pub default_branch: String,
    pub git_ref: String,
    pub clone_url: String,
    pub after: String,
    pub pusher: String,
}

impl PushEvent {
    /// Only pushes to the repository's default branch are deployed.
    pub fn is_default_branch_push(&self) -> bool {
        self.git_ref.ends_with(&self.default_branch)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Clone(#[from] CloneError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Sms(#[from] SmsError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to create workspace: {0}")]
    Workspace(std::io::Error),
}

/// Orchestrates the deployment of one push event.
///
/// All collaborators are injected once at startup; the pipeline itself holds
/// no credentials, only the handles that can mint them per operation chain.
pub struct PushPipeline {
    db: DbPool,
    github: Arc<dyn GitHost>,
    fetcher: Arc<dyn SourceFetcher>,
    deployer: Arc<dyn Deployer>,
    sms: Arc<dyn SmsGateway>,
    template_dir: PathBuf,
    public_url: String,
    /// Serializes first-push provisioning per clone_url.
    provision_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PushPipeline {
    pub fn new(
        db: DbPool,
        github: Arc<dyn GitHost>,
        fetcher: Arc<dyn SourceFetcher>,
        deployer: Arc<dyn Deployer>,
        sms: Arc<dyn SmsGateway>,
        template_dir: PathBuf,
        public_url: String,
    ) -> Self {
        Self {
            db,
            github,
            fetcher,
            deployer,
            sms,
            template_dir,
            public_url,
            provision_locks: DashMap::new(),
        }
    }

    /// Process a validated push event to completion.
    ///
    /// Never returns an error: anything that goes wrong past validation is
    /// reported as a `failure` commit status and logged.
    pub async fn handle(&self, event: PushEvent, user: GitHubUser) {
        if !event.is_default_branch_push() {
            tracing::debug!(
                repo = %event.repo_full_name,
                git_ref = %event.git_ref,
                "Ignoring push outside the default branch"
            );
            return;
        }

        self.report(&event, CommitState::Pending, "Deploying...").await;

        match self.run(&event, &user).await {
            Ok(llm) => {
                tracing::info!(
                    repo = %event.repo_full_name,
                    llm_id = %llm.id,
                    endpoint = %llm.modal_url,
                    "Deployed"
                );
                self.report(&event, CommitState::Success, "Deployed!").await;
            }
            Err(error) => {
                tracing::error!(
                    repo = %event.repo_full_name,
                    error = %error,
                    "Push deployment failed"
                );
                self.report(&event, CommitState::Failure, "Failed to deploy.")
                    .await;
            }
        }
    }

    async fn run(&self, event: &PushEvent, user: &GitHubUser) -> Result<Llm, PipelineError> {
        let llm = self.resolve_target(event, user).await?;

        let token = self.github.installation_token(&event.repo_full_name).await?;

        // Workspace scoped to this one event; reclaimed on every exit path
        let workspace = tempfile::tempdir().map_err(PipelineError::Workspace)?;
        let app_dir = workspace.path().join("app");
        self.fetcher.fetch(&event.clone_url, &token, &app_dir).await?;

        let bundle = package(&app_dir, &self.template_dir)?;
        tracing::debug!(
            repo = %event.repo_full_name,
            manifest = ?bundle.manifest,
            "Bundle assembled"
        );

        self.deployer.deploy(bundle.path(), &llm.id).await?;

        Ok(llm)
    }

    /// Look up the LLM record for a repository, provisioning it on first
    /// push. Provisioning is serialized per clone_url: at most one record
    /// (and one phone number) is ever created per repository, no matter how
    /// many first pushes race.
    async fn resolve_target(
        &self,
        event: &PushEvent,
        user: &GitHubUser,
    ) -> Result<Llm, PipelineError> {
        if let Some(llm) = Llm::find_by_clone_url(&self.db, &event.clone_url).await? {
            return Ok(llm);
        }

        let lock = self
            .provision_locks
            .entry(event.clone_url.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-check under the lock: a concurrent push may have provisioned
        if let Some(llm) = Llm::find_by_clone_url(&self.db, &event.clone_url).await? {
            return Ok(llm);
        }

        let sms_url = format!("{}/api/v0/sms", self.public_url.trim_end_matches('/'));
        let phone_number = self.sms.provision_phone_number(&sms_url).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let modal_url = self.deployer.endpoint_url(&id);

        match Llm::create(
            &self.db,
            &id,
            &event.clone_url,
            &phone_number,
            &modal_url,
            &user.id,
        )
        .await
        {
            Ok(llm) => {
                tracing::info!(
                    repo = %event.repo_full_name,
                    llm_id = %llm.id,
                    phone_number = %llm.phone_number,
                    "Provisioned LLM"
                );
                Ok(llm)
            }
            // A writer in another process won the UNIQUE(clone_url) race:
            // give the number back and use their record
            Err(sqlx::Error::Database(db_error))
                if db_error.message().contains("UNIQUE constraint failed") =>
            {
                if let Err(error) = self.sms.release_phone_number(&phone_number).await {
                    tracing::warn!(
                        phone_number = %phone_number,
                        error = %error,
                        "Failed to release phone number after lost provisioning race"
                    );
                }
                Llm::find_by_clone_url(&self.db, &event.clone_url)
                    .await?
                    .ok_or(PipelineError::Database(sqlx::Error::RowNotFound))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Best-effort status report: a failure here is logged, never allowed to
    /// abort or roll back the deployment itself.
    async fn report(&self, event: &PushEvent, state: CommitState, description: &str) {
        if let Err(error) = self
            .github
            .post_commit_status(&event.repo_full_name, &event.after, state, description)
            .await
        {
            tracing::warn!(
                repo = %event.repo_full_name,
                state = %state,
                error = %error,
                "Failed to post commit status"
            );
        }
    }
}
