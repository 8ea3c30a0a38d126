//! Layered configuration (section 6 + `SPEC_FULL.md`'s Configuration
//! section): a YAML file overlaid with environment variables via
//! `twelf`, the way the teacher's dependency list always intended but
//! never wired up.

use serde::Deserialize;
use twelf::config;

use crate::session::SessionConfig;

#[config]
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    pub abs_base_url: String,
    pub abs_token: String,
    pub hardcover_endpoint: String,
    pub hardcover_token: String,

    #[serde(default = "default_db_connection_string")]
    pub db_connection_string: String,

    #[serde(default = "default_users")]
    pub users: Vec<String>,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_rate_limit")]
    pub abs_rate_limit_per_minute: u32,
    #[serde(default = "default_rate_limit")]
    pub hardcover_rate_limit_per_minute: u32,

    #[serde(default = "default_session_enabled")]
    pub session_enabled: bool,
    #[serde(default = "default_session_timeout_s")]
    pub session_timeout_s: u64,
    #[serde(default = "default_max_delay_s")]
    pub max_delay_s: u64,
    #[serde(default = "default_immediate_completion")]
    pub immediate_completion: bool,

    #[serde(default)]
    pub auto_add_books: bool,
    #[serde(default)]
    pub dump_failed_syncs: bool,
    #[serde(default = "default_dump_dir")]
    pub dump_dir: String,
}

fn default_users() -> Vec<String> {
    Vec::new()
}
fn default_worker_concurrency() -> usize {
    3
}
fn default_rate_limit() -> u32 {
    55
}
fn default_session_enabled() -> bool {
    true
}
fn default_session_timeout_s() -> u64 {
    900
}
fn default_max_delay_s() -> u64 {
    3600
}
fn default_immediate_completion() -> bool {
    true
}
fn default_dump_dir() -> String {
    "data".to_string()
}
fn default_db_connection_string() -> String {
    "sqlite://shelfbridge.db?mode=rwc".to_string()
}

/// The validated, application-facing config. `RawConfig` is what
/// `twelf` deserializes; this wraps it with derived sub-configs and a
/// single validation pass.
#[derive(Debug, Clone)]
pub struct Config {
    pub abs_base_url: String,
    pub abs_token: String,
    pub hardcover_endpoint: String,
    pub hardcover_token: String,
    pub db_connection_string: String,
    pub users: Vec<String>,
    pub worker_concurrency: usize,
    pub abs_rate_limit_per_minute: u32,
    pub hardcover_rate_limit_per_minute: u32,
    pub session: SessionConfig,
    pub auto_add_books: bool,
    pub dump_failed_syncs: bool,
    pub dump_dir: String,
}

impl Config {
    /// Loads `.env`/`.env.local` via `dotenvy`, then layers the YAML
    /// file named by `SHELFBRIDGE_CONFIG` (default `config.yaml`) with
    /// environment-variable overrides, the way `twelf` composes
    /// sources: later layers win.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        dotenvy::from_filename(".env.local").ok();

        let config_path = std::env::var("SHELFBRIDGE_CONFIG").unwrap_or_else(|_| "config.yaml".into());
        let path = std::path::PathBuf::from(&config_path);

        let mut layers = Vec::new();
        if path.exists() {
            layers.push(twelf::Layer::Yaml(path));
        }
        layers.push(twelf::Layer::Env(Some("SHELFBRIDGE_".to_string())));

        let raw = RawConfig::with_layers(&layers)
            .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;

        let session = SessionConfig {
            enabled: raw.session_enabled,
            session_timeout_s: raw.session_timeout_s,
            max_delay_s: raw.max_delay_s,
            immediate_completion: raw.immediate_completion,
        };

        let config = Config {
            abs_base_url: raw.abs_base_url,
            abs_token: raw.abs_token,
            hardcover_endpoint: raw.hardcover_endpoint,
            hardcover_token: raw.hardcover_token,
            db_connection_string: raw.db_connection_string,
            users: raw.users,
            worker_concurrency: raw.worker_concurrency,
            abs_rate_limit_per_minute: raw.abs_rate_limit_per_minute,
            hardcover_rate_limit_per_minute: raw.hardcover_rate_limit_per_minute,
            session,
            auto_add_books: raw.auto_add_books,
            dump_failed_syncs: raw.dump_failed_syncs,
            dump_dir: raw.dump_dir,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), crate::error::SyncError> {
        use crate::error::SyncError;

        if self.abs_base_url.is_empty() {
            return Err(SyncError::ConfigInvalid("abs_base_url is missing".into()));
        }
        if self.abs_token.is_empty() {
            return Err(SyncError::ConfigInvalid("abs_token is missing".into()));
        }
        if self.hardcover_endpoint.is_empty() {
            return Err(SyncError::ConfigInvalid("hardcover_endpoint is missing".into()));
        }
        if self.hardcover_token.is_empty() {
            return Err(SyncError::ConfigInvalid("hardcover_token is missing".into()));
        }
        if self.users.is_empty() {
            return Err(SyncError::ConfigInvalid("at least one user must be configured".into()));
        }
        if self.worker_concurrency == 0 {
            return Err(SyncError::ConfigInvalid("worker_concurrency must be >= 1".into()));
        }
        self.session
            .validate()
            .map_err(SyncError::ConfigInvalid)?;
        if self.session.session_timeout_s >= self.session.max_delay_s {
            return Err(SyncError::ConfigInvalid(
                "session_timeout_s must be less than max_delay_s".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            abs_base_url: "http://abs.local".into(),
            abs_token: "tok".into(),
            hardcover_endpoint: "https://api.hardcover.app/v1/graphql".into(),
            hardcover_token: "tok".into(),
            db_connection_string: "sqlite::memory:".into(),
            users: vec!["alice".into()],
            worker_concurrency: 3,
            abs_rate_limit_per_minute: 55,
            hardcover_rate_limit_per_minute: 55,
            session: SessionConfig::default(),
            auto_add_books: false,
            dump_failed_syncs: false,
            dump_dir: "data".into(),
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn missing_token_is_fatal() {
        let mut config = valid_config();
        config.abs_token = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn session_timeout_must_be_below_max_delay() {
        let mut config = valid_config();
        config.session.session_timeout_s = config.session.max_delay_s;
        assert!(config.validate().is_err());
    }
}
