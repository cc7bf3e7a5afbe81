//! Reconciliation engine: identity resolution, field merge policy, status
//! guarding, per-object reconcilers and the run orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use recon_adapters::{HttpClientConfig, RequestQuota, SourceError};
use recon_core::ObjectType;
use recon_storage::StoreError;
use thiserror::Error;

pub mod config;
pub mod entities;
pub mod merge;
pub mod orchestrator;
pub mod profile;
pub mod reconciler;
pub mod report;
pub mod resolver;
pub mod similarity;
pub mod status;
pub mod validation;

pub use config::{MatchSettings, ReconcileSettings};
pub use orchestrator::{MigrationOrchestrator, RunFailed, RunOptions, RunOutcome};
pub use profile::{EntityProfile, FieldMapping, Relationship, ValueKind};
pub use reconciler::{
    EntityReconciler, ObjectOutcome, ReconcileContext, Reconciler, ReconcilerRegistry, ReviewItem,
};
pub use report::{ReportWriter, RunReport};
pub use resolver::{CandidatePool, IdentityResolver, MatchProfile};
pub use status::StatusGuard;
pub use validation::{ValidationReport, Validator};

pub const CRATE_NAME: &str = "recon-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{object_type} record {external_id}: {message}")]
    Record {
        object_type: ObjectType,
        external_id: String,
        message: String,
    },
}

impl SyncError {
    pub fn record(object_type: ObjectType, external_id: &str, message: impl Into<String>) -> Self {
        SyncError::Record {
            object_type,
            external_id: external_id.to_string(),
            message: message.into(),
        }
    }
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub reports_dir: PathBuf,
    pub fixtures_dir: PathBuf,
    pub batch_size: Option<usize>,
    pub settings_path: Option<PathBuf>,
    pub salesforce_login_url: String,
    pub salesforce_api_version: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    /// Source API quota; unset means unthrottled.
    pub api_requests_per_minute: Option<u32>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            reports_dir: std::env::var("RECON_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./reports")),
            fixtures_dir: std::env::var("RECON_FIXTURES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./fixtures")),
            batch_size: std::env::var("RECON_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0),
            settings_path: std::env::var("RECON_CONFIG").ok().map(PathBuf::from),
            salesforce_login_url: std::env::var("SALESFORCE_LOGIN_URL")
                .unwrap_or_else(|_| "https://login.salesforce.com".to_string()),
            salesforce_api_version: std::env::var("SALESFORCE_API_VERSION")
                .unwrap_or_else(|_| "v59.0".to_string()),
            http_timeout_secs: std::env::var("RECON_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            user_agent: std::env::var("RECON_USER_AGENT")
                .unwrap_or_else(|_| "recon-sync/0.1".to_string()),
            api_requests_per_minute: std::env::var("RECON_API_REQUESTS_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &u32| *n > 0),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            quota: self.api_requests_per_minute.map(RequestQuota::per_minute),
            ..HttpClientConfig::default()
        }
    }

    /// YAML overrides (if configured) with the env batch size applied last.
    pub fn reconcile_settings(&self) -> Result<ReconcileSettings, SyncError> {
        let mut settings = match &self.settings_path {
            Some(path) => ReconcileSettings::load(path)?,
            None => ReconcileSettings::default(),
        };
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyncConfig {
        SyncConfig {
            database_url: None,
            reports_dir: PathBuf::from("./reports"),
            fixtures_dir: PathBuf::from("./fixtures"),
            batch_size: Some(50),
            settings_path: None,
            salesforce_login_url: "https://test.salesforce.com".to_string(),
            salesforce_api_version: "v59.0".to_string(),
            http_timeout_secs: 12,
            user_agent: "recon-sync/test".to_string(),
            api_requests_per_minute: None,
        }
    }

    #[test]
    fn api_quota_flows_into_the_http_client() {
        let unthrottled = config().http_client_config();
        assert_eq!(unthrottled.quota, None);
        assert_eq!(unthrottled.timeout, Duration::from_secs(12));
        assert_eq!(unthrottled.user_agent.as_deref(), Some("recon-sync/test"));

        let throttled = SyncConfig {
            api_requests_per_minute: Some(90),
            ..config()
        }
        .http_client_config();
        assert_eq!(throttled.quota, Some(RequestQuota::per_minute(90)));
    }

    #[test]
    fn env_batch_size_overrides_defaults() {
        let settings = config().reconcile_settings().unwrap();
        assert_eq!(settings.batch_size, 50);
    }
}
