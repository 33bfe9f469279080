//! Shared test doubles and state builders.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::engine::fetch::{CloneError, SourceFetcher};
use crate::engine::packager::{DeployError, Deployer};
use crate::github::{CommitState, GitHost, GitHubError};
use crate::sms::{SmsError, SmsGateway};

/// Records commit statuses instead of talking to GitHub.
#[derive(Default)]
pub struct MockGitHost {
    statuses: Mutex<Vec<String>>,
}

impl MockGitHost {
    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitHost for MockGitHost {
    async fn installation_token(&self, _repo_full_name: &str) -> Result<String, GitHubError> {
        Ok("ghs_test_token".to_string())
    }

    async fn post_commit_status(
        &self,
        _repo_full_name: &str,
        _sha: &str,
        state: CommitState,
        _description: &str,
    ) -> Result<(), GitHubError> {
        self.statuses.lock().unwrap().push(state.as_str().to_string());
        Ok(())
    }
}

/// Simulates a clone by writing a marker file into the destination.
pub struct MockFetcher;

#[async_trait]
impl SourceFetcher for MockFetcher {
    async fn fetch(&self, _clone_url: &str, _token: &str, dest: &Path) -> Result<(), CloneError> {
        tokio::fs::create_dir_all(dest).await?;
        tokio::fs::write(dest.join("cloned.txt"), "cloned").await?;
        Ok(())
    }
}

/// Records deploy calls; optionally fails every deploy.
pub struct MockDeployer {
    fail: bool,
    names: Mutex<Vec<String>>,
    paths: Mutex<Vec<String>>,
    bundles: Mutex<Vec<Vec<String>>>,
}

impl MockDeployer {
    pub fn new(fail: bool) -> Self {
        Self {
            fail,
            names: Mutex::new(Vec::new()),
            paths: Mutex::new(Vec::new()),
            bundles: Mutex::new(Vec::new()),
        }
    }

    pub fn deployed_names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }

    pub fn deployed_paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    /// File names present in each deployed bundle root, captured at deploy
    /// time (the staging directory is gone afterwards).
    pub fn deployed_bundles(&self) -> Vec<Vec<String>> {
        self.bundles.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deployer for MockDeployer {
    async fn deploy(&self, bundle_path: &Path, name: &str) -> Result<String, DeployError> {
        let mut entries = Vec::new();
        if let Ok(dir) = std::fs::read_dir(bundle_path) {
            for entry in dir.flatten() {
                entries.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        self.names.lock().unwrap().push(name.to_string());
        self.paths
            .lock()
            .unwrap()
            .push(bundle_path.to_string_lossy().to_string());
        self.bundles.lock().unwrap().push(entries);

        if self.fail {
            return Err(DeployError::DeployFailed("mock deploy failure".to_string()));
        }
        Ok(self.endpoint_url(name))
    }

    async fn stop(&self, _name: &str) -> Result<(), DeployError> {
        Ok(())
    }

    fn endpoint_url(&self, name: &str) -> String {
        format!("https://testaccount--{}--api.modal.run/", name)
    }
}

/// Hands out sequential phone numbers and counts provisioning calls.
#[derive(Default)]
pub struct MockSmsGateway {
    provisioned: AtomicUsize,
    sent: Mutex<Vec<(String, String, String)>>,
}

impl MockSmsGateway {
    pub fn provision_count(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmsGateway for MockSmsGateway {
    async fn provision_phone_number(&self, _sms_url: &str) -> Result<String, SmsError> {
        let n = self.provisioned.fetch_add(1, Ordering::SeqCst);
        Ok(format!("+1555555{:04}", n))
    }

    async fn release_phone_number(&self, _phone_number: &str) -> Result<(), SmsError> {
        Ok(())
    }

    async fn send_message(&self, from: &str, to: &str, body: &str) -> Result<(), SmsError> {
        self.sent
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string(), body.to_string()));
        Ok(())
    }
}

use crate::config::Config;
use crate::crypto::TokenCrypto;
use crate::db::{DbPool, GitHubUser};
use crate::engine::PushPipeline;
use crate::github::GitHubOAuth;
use crate::session::SessionService;
use crate::AppState;
use std::sync::Arc;

/// Full application state over an in-memory database with every external
/// collaborator mocked.
pub async fn test_state() -> Arc<AppState> {
    test_state_with(|_| {}).await
}

pub async fn test_state_with(customize: impl FnOnce(&mut Config)) -> Arc<AppState> {
    let mut config = Config::default();
    config.crypto.secret = "test-secret".to_string();
    customize(&mut config);

    let db = crate::db::init_memory().await.unwrap();

    let template_dir = tempfile::tempdir().unwrap().keep();
    std::fs::write(
        template_dir.join(crate::engine::packager::DEPLOY_STUB_FILE),
        "stub",
    )
    .unwrap();

    let crypto = Arc::new(TokenCrypto::new(&config.crypto.secret, &config.crypto.salt));
    let sessions = SessionService::new(crypto);
    let oauth = GitHubOAuth::new(&config.github);
    let sms: Arc<dyn SmsGateway> = Arc::new(MockSmsGateway::default());

    let pipeline = Arc::new(PushPipeline::new(
        db.clone(),
        Arc::new(MockGitHost::default()),
        Arc::new(MockFetcher),
        Arc::new(MockDeployer::new(false)),
        sms.clone(),
        template_dir,
        config.server.public_url.clone(),
    ));

    Arc::new(AppState {
        config,
        db,
        http: reqwest::Client::new(),
        sessions,
        oauth,
        sms,
        pipeline,
    })
}

/// A known user allowed past the waitlist.
pub async fn allowed_user(pool: &DbPool, username: &str) -> GitHubUser {
    let user = GitHubUser::create(pool, username, &[]).await.unwrap();
    sqlx::query("UPDATE github_users SET waitlisted = 0 WHERE id = ?")
        .bind(&user.id)
        .execute(pool)
        .await
        .unwrap();
    GitHubUser::find_by_username(pool, username)
        .await
        .unwrap()
        .unwrap()
}
