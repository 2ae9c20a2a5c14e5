//! Configuration files and environment overrides.
//!
//! A config directory holds up to three JSON files:
//! - `.feishu.config.json`: store credentials and table location ([`StoreConfig`])
//! - `.gemini.config.json`: completion endpoint and model ([`CompletionConfig`])
//! - `recordflow.json`: optional pass settings and prompt directory
//!
//! `FEISHU_APP_SECRET` and `COMPLETION_API_KEY` override the secrets from the
//! files. A missing store secret is not a load error; the first credential
//! request reports it.

use crate::auth::BrokerSettings;
use crate::completion::Sampling;
use crate::errors::RecordflowError;
use crate::retry::RetryConfig;
use crate::stages::presets::IDENTITY_FIELD;
use crate::store::{ReaderConfig, TableRef};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Store settings file.
pub const STORE_CONFIG_FILE: &str = ".feishu.config.json";
/// Completion settings file.
pub const COMPLETION_CONFIG_FILE: &str = ".gemini.config.json";
/// Optional pass settings file.
pub const PASS_CONFIG_FILE: &str = "recordflow.json";

/// Overrides `StoreConfig::app_secret`.
pub const APP_SECRET_ENV: &str = "FEISHU_APP_SECRET";
/// Overrides `CompletionConfig::api_key`.
pub const API_KEY_ENV: &str = "COMPLETION_API_KEY";

fn default_store_base_url() -> String {
    "https://open.feishu.cn".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_page_delay_ms() -> u64 {
    500
}

fn default_token_validity_secs() -> u64 {
    7200
}

fn default_refresh_buffer_secs() -> u64 {
    300
}

fn default_identity_field() -> Option<String> {
    Some(IDENTITY_FIELD.to_string())
}

fn default_endpoint() -> String {
    "/v1/chat/completions".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_workers() -> usize {
    1
}

fn default_record_delay_ms() -> u64 {
    1000
}

/// Data store settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Application id.
    pub app_id: String,
    /// Application secret. Usually supplied through the environment.
    #[serde(default)]
    pub app_secret: Option<String>,
    /// Bitable app token.
    pub app_token: String,
    /// Table id within the app.
    pub table_id: String,
    /// Open Platform origin.
    #[serde(default = "default_store_base_url")]
    pub base_url: String,
    /// Rows per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Pause between listing pages.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    /// Validity assumed when the token endpoint reports none.
    #[serde(default = "default_token_validity_secs")]
    pub token_validity_secs: u64,
    /// How long before expiry the token is refreshed.
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,
    /// Rows without this field are ignored. `null` keeps every row.
    #[serde(default = "default_identity_field")]
    pub identity_field: Option<String>,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("app_id", &self.app_id)
            .field("app_secret", &self.app_secret.as_ref().map(|_| "<redacted>"))
            .field("table", &self.table())
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl StoreConfig {
    /// The configured table.
    #[must_use]
    pub fn table(&self) -> TableRef {
        TableRef::new(&self.app_token, &self.table_id)
    }

    /// Settings for the credential broker.
    #[must_use]
    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            app_id: self.app_id.clone(),
            app_secret: self.app_secret.clone(),
            default_validity: Duration::from_secs(self.token_validity_secs),
            refresh_buffer: Duration::from_secs(self.refresh_buffer_secs),
        }
    }

    /// Settings for the paged reader.
    #[must_use]
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            page_size: self.page_size,
            page_delay: Duration::from_millis(self.page_delay_ms),
            identity_field: self.identity_field.clone(),
        }
    }
}

/// Completion service settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Service origin.
    pub base_url: String,
    /// Path appended to `base_url`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model name sent with each request.
    pub model_id: String,
    /// Bearer key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-attempt timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Default sampling; stages may override it.
    #[serde(default)]
    pub sampling: Sampling,
    /// Attempts and fixed delays.
    #[serde(default)]
    pub retry: RetryConfig,
    /// System message sent before every prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl CompletionConfig {
    /// Per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings for one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassConfig {
    /// Maximum incomplete records processed; `None` processes all of them.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Treat every record as incomplete.
    #[serde(default)]
    pub force_all: bool,
    /// Only produce fields that are missing. Ignored with `force_all`.
    #[serde(default)]
    pub missing_only: bool,
    /// Records processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Minimum spacing between record starts.
    #[serde(default = "default_record_delay_ms")]
    pub record_delay_ms: u64,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            limit: None,
            force_all: false,
            missing_only: false,
            workers: default_workers(),
            record_delay_ms: default_record_delay_ms(),
        }
    }
}

impl PassConfig {
    /// Spacing between record starts.
    #[must_use]
    pub fn record_delay(&self) -> Duration {
        Duration::from_millis(self.record_delay_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
struct LocalSettings {
    #[serde(default)]
    pass: PassConfig,
    #[serde(default)]
    prompts_dir: Option<PathBuf>,
}

/// Everything a run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Data store settings.
    pub store: StoreConfig,
    /// Completion service settings.
    pub completion: CompletionConfig,
    /// Pass settings.
    pub pass: PassConfig,
    /// Directory of `<stage>.md` prompt files, if any.
    pub prompts_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Loads the config files from `dir` and applies environment overrides.
    ///
    /// # Errors
    ///
    /// `Configuration` if a required file is missing, unreadable or invalid.
    pub fn load(dir: &Path) -> Result<Self, RecordflowError> {
        let mut config = Self::load_files(dir)?;
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        info!(
            dir = %dir.display(),
            table = %config.store.table(),
            model = %config.completion.model_id,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads the config files from `dir` without consulting the environment.
    ///
    /// # Errors
    ///
    /// `Configuration` if a required file is missing, unreadable or invalid.
    pub fn load_files(dir: &Path) -> Result<Self, RecordflowError> {
        let store: StoreConfig = read_json(&dir.join(STORE_CONFIG_FILE))?;
        let completion: CompletionConfig = read_json(&dir.join(COMPLETION_CONFIG_FILE))?;

        let local_path = dir.join(PASS_CONFIG_FILE);
        let local: LocalSettings = if local_path.is_file() {
            read_json(&local_path)?
        } else {
            debug!(path = %local_path.display(), "No pass settings file; using defaults");
            LocalSettings::default()
        };

        let prompts_dir = local.prompts_dir.map(|p| if p.is_relative() { dir.join(p) } else { p });
        Ok(Self {
            store,
            completion,
            pass: local.pass,
            prompts_dir,
        })
    }

    /// Replaces secrets with values from `lookup` when it has them.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(APP_SECRET_ENV).filter(|s| !s.trim().is_empty()) {
            debug!(var = APP_SECRET_ENV, "Store secret taken from environment");
            self.store.app_secret = Some(secret);
        }
        if let Some(key) = lookup(API_KEY_ENV).filter(|s| !s.trim().is_empty()) {
            debug!(var = API_KEY_ENV, "Completion key taken from environment");
            self.completion.api_key = Some(key);
        }
    }

    /// Checks values that no later component would reject clearly.
    ///
    /// # Errors
    ///
    /// `Configuration` naming the first offending setting.
    pub fn validate(&self) -> Result<(), RecordflowError> {
        let required = [
            ("app_id", &self.store.app_id),
            ("app_token", &self.store.app_token),
            ("table_id", &self.store.table_id),
            ("base_url", &self.completion.base_url),
            ("model_id", &self.completion.model_id),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(RecordflowError::configuration(format!("{name} must not be empty")));
        }
        if self.store.page_size == 0 {
            return Err(RecordflowError::configuration("page_size must be at least 1"));
        }
        if self.pass.workers == 0 {
            return Err(RecordflowError::configuration("workers must be at least 1"));
        }
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RecordflowError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RecordflowError::configuration(format!("read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| RecordflowError::configuration(format!("parse {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write_required(dir: &Path) {
        fs::write(
            dir.join(STORE_CONFIG_FILE),
            r#"{"app_id": "cli_a1", "app_secret": "file-secret", "app_token": "bascn1", "table_id": "tbl1"}"#,
        )
        .unwrap();
        fs::write(
            dir.join(COMPLETION_CONFIG_FILE),
            r#"{"base_url": "https://llm.example.com", "endpoint": "/v1/chat/completions", "model_id": "gemini-2.5-pro", "api_key": "k"}"#,
        )
        .unwrap();
    }

    #[test]
    fn test_load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_required(dir.path());

        let config = AppConfig::load_files(dir.path()).unwrap();
        assert_eq!(config.store.table(), TableRef::new("bascn1", "tbl1"));
        assert_eq!(config.store.page_size, 100);
        assert_eq!(config.store.identity_field.as_deref(), Some("Demo名称"));
        assert_eq!(config.completion.timeout(), Duration::from_secs(120));
        assert_eq!(config.completion.retry.max_attempts, 3);
        assert_eq!(config.pass, PassConfig::default());
        assert_eq!(config.pass.record_delay(), Duration::from_secs(1));
        assert!(config.prompts_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pass_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        write_required(dir.path());
        fs::write(
            dir.path().join(PASS_CONFIG_FILE),
            r#"{"pass": {"limit": 5, "workers": 2, "missing_only": true}, "prompts_dir": "prompts"}"#,
        )
        .unwrap();

        let config = AppConfig::load_files(dir.path()).unwrap();
        assert_eq!(config.pass.limit, Some(5));
        assert_eq!(config.pass.workers, 2);
        assert!(config.pass.missing_only);
        assert_eq!(config.pass.record_delay_ms, 1000);
        assert_eq!(config.prompts_dir, Some(dir.path().join("prompts")));
    }

    #[test]
    fn test_env_overrides_secrets() {
        let dir = tempfile::tempdir().unwrap();
        write_required(dir.path());
        let mut config = AppConfig::load_files(dir.path()).unwrap();

        config.apply_env_with(|key| match key {
            APP_SECRET_ENV => Some("env-secret".to_string()),
            API_KEY_ENV => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(config.store.app_secret.as_deref(), Some("env-secret"));
        assert_eq!(config.completion.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load_files(dir.path()).unwrap_err();
        assert!(matches!(err, RecordflowError::Configuration(ref m) if m.contains(STORE_CONFIG_FILE)));
    }

    #[test]
    fn test_missing_secret_loads() {
        let dir = tempfile::tempdir().unwrap();
        write_required(dir.path());
        fs::write(
            dir.path().join(STORE_CONFIG_FILE),
            r#"{"app_id": "cli_a1", "app_token": "bascn1", "table_id": "tbl1"}"#,
        )
        .unwrap();
        let config = AppConfig::load_files(dir.path()).unwrap();
        assert!(config.store.app_secret.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let dir = tempfile::tempdir().unwrap();
        write_required(dir.path());
        let mut config = AppConfig::load_files(dir.path()).unwrap();
        config.pass.workers = 0;
        assert!(matches!(config.validate(), Err(RecordflowError::Configuration(_))));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let dir = tempfile::tempdir().unwrap();
        write_required(dir.path());
        let config = AppConfig::load_files(dir.path()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("file-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
