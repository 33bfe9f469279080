pub mod api;
pub mod config;
pub mod crypto;
pub mod db;
pub mod engine;
pub mod github;
pub mod session;
pub mod sms;

#[cfg(test)]
pub(crate) mod testutil;

pub use db::DbPool;

use std::sync::Arc;

use config::Config;
use engine::PushPipeline;
use github::GitHubOAuth;
use session::SessionService;
use sms::SmsGateway;

/// Shared application state. Every service in here is constructed once at
/// startup and injected; nothing expensive is re-derived per request.
pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub http: reqwest::Client,
    pub sessions: SessionService,
    pub oauth: GitHubOAuth,
    pub sms: Arc<dyn SmsGateway>,
    pub pipeline: Arc<PushPipeline>,
}
