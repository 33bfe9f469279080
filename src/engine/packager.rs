//! Bundle assembly and serverless deployment.
//!
//! A bundle is the fetched application tree merged with the fixed deployment
//! template. The merged tree lives in an ephemeral staging root owned by the
//! returned [`Bundle`]; dropping the bundle reclaims the staging directory on
//! every exit path, deploy success or failure.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

/// Entrypoint stub supplied by the deployment template.
pub const DEPLOY_STUB_FILE: &str = "_modal.py";

/// Host suffix of every deployed endpoint.
pub const MODAL_API_HOST: &str = "api.modal.run";

const REQUIREMENTS_MANIFEST: &str = "requirements.txt";
const PYPROJECT_MANIFEST: &str = "pyproject.toml";

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("deployment template missing: {0}")]
    TemplateMissing(PathBuf),

    #[error("failed to assemble bundle: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The platform rejected or errored the deploy; retryable.
    #[error("deploy failed: {0}")]
    DeployFailed(String),

    #[error("failed to run deploy command: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Which manifest feeds the deployed image's dependency resolution.
/// Detection runs in priority order; when both manifests are present only
/// the requirements manifest is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyManifest {
    Requirements,
    PyProject,
    Default,
}

pub fn detect_manifest(root: &Path) -> DependencyManifest {
    if root.join(REQUIREMENTS_MANIFEST).is_file() {
        DependencyManifest::Requirements
    } else if root.join(PYPROJECT_MANIFEST).is_file() {
        DependencyManifest::PyProject
    } else {
        DependencyManifest::Default
    }
}

/// A packaged, deployable tree in its ephemeral staging root.
pub struct Bundle {
    staging: TempDir,
    pub manifest: DependencyManifest,
}

impl Bundle {
    pub fn path(&self) -> &Path {
        self.staging.path()
    }
}

/// Merge the application tree with the deployment template.
///
/// The template is copied first and the application over it, so application
/// code wins on path collisions; the template only supplies infrastructure
/// glue the application does not own.
pub fn package(app_dir: &Path, template_dir: &Path) -> Result<Bundle, PackageError> {
    if !template_dir.is_dir() {
        return Err(PackageError::TemplateMissing(template_dir.to_path_buf()));
    }

    let staging = tempfile::Builder::new()
        .prefix("kookaburra-deploy-")
        .tempdir()?;

    copy_tree(template_dir, staging.path())?;
    copy_tree(app_dir, staging.path())?;

    let manifest = detect_manifest(staging.path());
    Ok(Bundle { staging, manifest })
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Serverless deploy operations, injected so the pipeline is testable
/// without invoking a real subprocess.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Deploy the bundle under the given stable name. Repeated deploys of
    /// the same name update the same deployment.
    async fn deploy(&self, bundle_path: &Path, name: &str) -> Result<String, DeployError>;

    /// Stop the deployment with the given name.
    async fn stop(&self, name: &str) -> Result<(), DeployError>;

    /// Deterministic endpoint URL for a deployment name. Computable before
    /// the deploy completes: "reserved", not "live".
    fn endpoint_url(&self, name: &str) -> String;
}

/// [`Deployer`] backed by the Modal CLI.
pub struct ModalDeployer {
    account: String,
    token_id: String,
    token_secret: String,
}

impl ModalDeployer {
    pub fn new(account: String, token_id: String, token_secret: String) -> Self {
        Self {
            account,
            token_id,
            token_secret,
        }
    }

    async fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<(), DeployError> {
        let mut command = Command::new("modal");
        command
            .args(args)
            .env("MODAL_TOKEN_ID", &self.token_id)
            .env("MODAL_TOKEN_SECRET", &self.token_secret)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let output = command.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeployError::DeployFailed(stderr.trim().to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Deployer for ModalDeployer {
    async fn deploy(&self, bundle_path: &Path, name: &str) -> Result<String, DeployError> {
        self.run(&["deploy", "--name", name, DEPLOY_STUB_FILE], Some(bundle_path))
            .await?;
        Ok(self.endpoint_url(name))
    }

    async fn stop(&self, name: &str) -> Result<(), DeployError> {
        self.run(&["app", "stop", name], None).await
    }

    fn endpoint_url(&self, name: &str) -> String {
        format!("https://{}--{}--{}/", self.account, name, MODAL_API_HOST)
    }
}
