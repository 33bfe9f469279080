use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Domains that mark a deployment as local. Local deployments skip the
/// https rewrite on OAuth redirect URIs and set cookies without `Secure`.
pub const LOCAL_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root URL of this deployment, used for OAuth redirects, commit-status
    /// target links and the SMS callback registered on provisioned numbers.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Origins allowed by CORS in addition to the local ones.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
            data_dir: default_data_dir(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_public_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_cors_origins() -> Vec<String> {
    vec!["https://kookaburra.codes".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// Numeric GitHub App ID, used as the `iss` claim of the App JWT.
    #[serde(default)]
    pub app_id: String,
    /// Path to the App's RS256 private key in PEM format.
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_oauth_scope")]
    pub oauth_scope: String,
    #[serde(default = "default_oauth_authorize_url")]
    pub oauth_authorize_url: String,
    #[serde(default = "default_oauth_token_url")]
    pub oauth_token_url: String,
    /// Secret for verifying webhook signatures (X-Hub-Signature-256).
    /// Verification is skipped when unset.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            private_key_path: default_private_key_path(),
            client_id: String::new(),
            client_secret: String::new(),
            oauth_scope: default_oauth_scope(),
            oauth_authorize_url: default_oauth_authorize_url(),
            oauth_token_url: default_oauth_token_url(),
            webhook_secret: None,
        }
    }
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("gh-app.pem")
}

fn default_oauth_scope() -> String {
    "read:user,user:email".to_string()
}

fn default_oauth_authorize_url() -> String {
    "https://github.com/login/oauth/authorize".to_string()
}

fn default_oauth_token_url() -> String {
    "https://github.com/login/oauth/access_token".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    /// Serverless account name, the first segment of every endpoint URL.
    #[serde(default = "default_account_name")]
    pub account_name: String,
    /// Directory holding the deployment template merged into every bundle.
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub token_secret: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            account_name: default_account_name(),
            template_dir: default_template_dir(),
            token_id: String::new(),
            token_secret: String::new(),
        }
    }
}

fn default_account_name() -> String {
    "kookaburracodes".to_string()
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("deploy_template")
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmsConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    /// Long-lived secret fed to the key derivation. The default is random,
    /// which means sessions do not survive a restart; set it in production.
    #[serde(default = "default_crypto_secret")]
    pub secret: String,
    #[serde(default = "default_crypto_salt")]
    pub salt: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            secret: default_crypto_secret(),
            salt: default_crypto_salt(),
        }
    }
}

fn default_crypto_secret() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_crypto_salt() -> String {
    "kookaburra-session-v1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            github: GitHubConfig::default(),
            deploy: DeployConfig::default(),
            sms: SmsConfig::default(),
            crypto: CryptoConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Whether this deployment runs on a local domain.
    pub fn is_local(&self) -> bool {
        LOCAL_DOMAINS
            .iter()
            .any(|domain| self.server.public_url.contains(domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.github.oauth_scope, "read:user,user:email");
        assert!(config
            .github
            .oauth_authorize_url
            .starts_with("https://github.com"));
        assert!(config.github.webhook_secret.is_none());
        assert_eq!(config.crypto.salt, "kookaburra-session-v1");
    }

    #[test]
    fn test_is_local() {
        let mut config = Config::default();
        assert!(config.is_local());

        config.server.public_url = "https://kookaburra.codes".to_string();
        assert!(!config.is_local());

        config.server.public_url = "http://127.0.0.1:8000".to_string();
        assert!(config.is_local());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kookaburra.toml");
        std::fs::write(
            &path,
            r#"
[server]
public_url = "https://kookaburra.codes"

[github]
app_id = "12345"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.github.app_id, "12345");
        assert_eq!(config.server.public_url, "https://kookaburra.codes");
        // Unspecified sections fall back to defaults
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.deploy.account_name, "kookaburracodes");
    }
}
