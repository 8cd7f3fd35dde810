//! Configuration management for the bias-scoring engine.
//!
//! Supports three-layer configuration loading:
//! 1. Built-in defaults
//! 2. TOML config file (`~/.biasscore/config.toml`)
//! 3. Environment variable overrides (`BIASSCORE_` prefix)
//!
//! The ensemble configuration (model list, formula, weights) is a separate
//! typed load from its own TOML file, since it is authored and rotated
//! independently of the service's own settings.

mod ensemble_config;

pub use ensemble_config::{ConfidenceMethod, EnsembleConfig, Formula, HandleInvalid, ModelConfig, Perspective};

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Top-level configuration for the bias-scoring service.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// LLM transport credentials and defaults.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Data storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Path to the ensemble configuration TOML file.
    #[serde(default = "default_ensemble_config_path")]
    pub ensemble_config_path: String,

    /// When true, the RSS ingestion path must not trigger an automatic rescore.
    #[serde(default)]
    pub auto_analyse_disabled: bool,

    /// Progress tracker and cache TTL settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// LLM transport credentials and call defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Primary API key/credential used for all model calls.
    #[serde(default)]
    pub primary_key: Option<String>,

    /// Secondary credential used on rate-limit failover.
    #[serde(default)]
    pub secondary_key: Option<String>,

    /// Default base URL for OpenAI-compatible chat completions, used when a
    /// model config does not carry its own `url`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Data storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

/// Progress tracker and cache TTL settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Seconds a terminal progress entry survives before eviction.
    #[serde(default = "default_progress_ttl_seconds")]
    pub progress_ttl_seconds: u64,

    /// Seconds a cached article list/detail read survives.
    #[serde(default = "default_article_cache_ttl_seconds")]
    pub article_cache_ttl_seconds: u64,

    /// Per-job deadline in seconds covering an entire Rescore.
    #[serde(default = "default_job_timeout_seconds")]
    pub job_timeout_seconds: u64,
}

/// Logging and observability settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive string, e.g. "biasscore=info".
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary_key: None,
            secondary_key: None,
            base_url: default_base_url(),
            timeout_seconds: default_call_timeout_seconds(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            progress_ttl_seconds: default_progress_ttl_seconds(),
            article_cache_ttl_seconds: default_article_cache_ttl_seconds(),
            job_timeout_seconds: default_job_timeout_seconds(),
        }
    }
}

fn default_ensemble_config_path() -> String {
    "~/.biasscore/ensemble.toml".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_call_timeout_seconds() -> u64 {
    60
}
fn default_db_path() -> String {
    "~/.biasscore/biasscore.db".to_string()
}
fn default_progress_ttl_seconds() -> u64 {
    3600
}
fn default_article_cache_ttl_seconds() -> u64 {
    30
}
fn default_job_timeout_seconds() -> u64 {
    300
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// The loading sequence:
    /// 1. Determine config file path (argument > `BIASSCORE_CONFIG` env var > default)
    /// 2. Parse TOML file (or use defaults if default path doesn't exist)
    /// 3. Apply environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Config, ConfigError> {
        let (path, explicit) = Self::resolve_config_path(config_path);

        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str::<Config>(&contents)
                .map_err(|e| ConfigError::ParseError { source: e })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if explicit {
                    return Err(ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    });
                }
                Config::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Load configuration and validate it, returning all validation errors at once.
    pub fn load_and_validate(config_path: Option<&str>) -> Result<Config, Vec<ConfigError>> {
        let config = Config::load(config_path).map_err(|e| vec![e])?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, returning all errors found (not just the first).
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if self.llm.base_url.is_empty() {
            errors.push(ConfigError::MissingField {
                field: "llm.base_url".to_string(),
            });
        }

        if self.llm.timeout_seconds == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "llm.timeout_seconds".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.runtime.job_timeout_seconds == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "runtime.job_timeout_seconds".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Resolve the config file path from arguments, env vars, or default.
    ///
    /// Returns `(path, explicit)` where `explicit` is true if the path was
    /// explicitly provided (via argument or env var) rather than using the default.
    fn resolve_config_path(config_path: Option<&str>) -> (PathBuf, bool) {
        if let Some(path) = config_path {
            return (expand_tilde(path), true);
        }

        if let Ok(env_path) = env::var("BIASSCORE_CONFIG") {
            return (expand_tilde(&env_path), true);
        }

        (expand_tilde("~/.biasscore/config.toml"), false)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables use the `BIASSCORE_` prefix with double
    /// underscores separating nested keys (e.g., `BIASSCORE_LLM__PRIMARY_KEY`).
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = env::var("BIASSCORE_LLM__PRIMARY_KEY") {
            self.llm.primary_key = Some(val);
        }
        if let Ok(val) = env::var("BIASSCORE_LLM__SECONDARY_KEY") {
            self.llm.secondary_key = Some(val);
        }
        if let Ok(val) = env::var("BIASSCORE_LLM__BASE_URL") {
            self.llm.base_url = val;
        }
        if let Ok(val) = env::var("BIASSCORE_LLM__TIMEOUT_SECONDS") {
            self.llm.timeout_seconds = parse_env_u64("BIASSCORE_LLM__TIMEOUT_SECONDS", &val)?;
        }

        if let Ok(val) = env::var("BIASSCORE_STORAGE__DB_PATH") {
            self.storage.db_path = val;
        }

        if let Ok(val) = env::var("BIASSCORE_ENSEMBLE_CONFIG_PATH") {
            self.ensemble_config_path = val;
        }

        if let Ok(val) = env::var("BIASSCORE_AUTO_ANALYSE_DISABLED") {
            self.auto_analyse_disabled = parse_env_bool("BIASSCORE_AUTO_ANALYSE_DISABLED", &val)?;
        }

        if let Ok(val) = env::var("BIASSCORE_RUNTIME__PROGRESS_TTL_SECONDS") {
            self.runtime.progress_ttl_seconds =
                parse_env_u64("BIASSCORE_RUNTIME__PROGRESS_TTL_SECONDS", &val)?;
        }
        if let Ok(val) = env::var("BIASSCORE_RUNTIME__ARTICLE_CACHE_TTL_SECONDS") {
            self.runtime.article_cache_ttl_seconds =
                parse_env_u64("BIASSCORE_RUNTIME__ARTICLE_CACHE_TTL_SECONDS", &val)?;
        }
        if let Ok(val) = env::var("BIASSCORE_RUNTIME__JOB_TIMEOUT_SECONDS") {
            self.runtime.job_timeout_seconds =
                parse_env_u64("BIASSCORE_RUNTIME__JOB_TIMEOUT_SECONDS", &val)?;
        }

        if let Ok(val) = env::var("BIASSCORE_LOGGING__FILTER") {
            self.logging.filter = val;
        }

        Ok(())
    }
}

/// Expand `~` at the start of a path to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Parse an environment variable value as `u64`.
fn parse_env_u64(var_name: &str, val: &str) -> Result<u64, ConfigError> {
    val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        field: var_name.to_string(),
        message: format!("'{val}' is not a valid u64"),
    })
}

/// Parse an environment variable value as a boolean.
///
/// Accepts: `true`, `false`, `1`, `0`, `yes`, `no` (case-insensitive).
fn parse_env_bool(var_name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: var_name.to_string(),
            message: format!("'{val}' is not a valid boolean (use true/false/1/0/yes/no)"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn load_valid_toml() {
        let toml_str = r#"
[llm]
primary_key = "sk-test"
base_url = "https://example.test/v1/chat/completions"

[storage]
db_path = "/tmp/test.db"

ensemble_config_path = "/tmp/ensemble.toml"
"#;
        let config: Config = toml::from_str(toml_str).expect("valid TOML");
        assert_eq!(config.llm.primary_key.as_deref(), Some("sk-test"));
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.ensemble_config_path, "/tmp/ensemble.toml");
    }

    #[test]
    fn missing_sections_use_defaults() {
        let toml_str = "";
        let config: Config = toml::from_str(toml_str).expect("valid TOML");
        assert_eq!(config.llm.timeout_seconds, 60);
        assert_eq!(config.runtime.progress_ttl_seconds, 3600);
        assert_eq!(config.runtime.article_cache_ttl_seconds, 30);
        assert!(!config.auto_analyse_disabled);
    }

    #[test]
    fn env_var_override_string() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("BIASSCORE_LLM__PRIMARY_KEY", "sk-from-env");
        let mut config = Config::default();
        config.apply_env_overrides().expect("env override");
        assert_eq!(config.llm.primary_key.as_deref(), Some("sk-from-env"));
        env::remove_var("BIASSCORE_LLM__PRIMARY_KEY");
    }

    #[test]
    fn env_var_override_numeric() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("BIASSCORE_RUNTIME__JOB_TIMEOUT_SECONDS", "120");
        let mut config = Config::default();
        config.apply_env_overrides().expect("env override");
        assert_eq!(config.runtime.job_timeout_seconds, 120);
        env::remove_var("BIASSCORE_RUNTIME__JOB_TIMEOUT_SECONDS");
    }

    #[test]
    fn env_var_override_bool() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("BIASSCORE_AUTO_ANALYSE_DISABLED", "true");
        let mut config = Config::default();
        config.apply_env_overrides().expect("env override");
        assert!(config.auto_analyse_disabled);
        env::remove_var("BIASSCORE_AUTO_ANALYSE_DISABLED");
    }

    #[test]
    fn env_var_invalid_numeric_returns_error() {
        let result = parse_env_u64("BIASSCORE_RUNTIME__JOB_TIMEOUT_SECONDS", "not_a_number");
        assert!(result.is_err());
        match result.unwrap_err() {
            ConfigError::InvalidValue { field, .. } => {
                assert_eq!(field, "BIASSCORE_RUNTIME__JOB_TIMEOUT_SECONDS");
            }
            other => panic!("expected InvalidValue, got: {other}"),
        }
    }

    #[test]
    fn validate_valid_config_passes() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_zero_timeout_fails() {
        let mut config = Config::default();
        config.llm.timeout_seconds = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidValue { field, .. } if field == "llm.timeout_seconds")));
    }

    #[test]
    fn config_file_not_found_explicit_path() {
        let result = Config::load(Some("/nonexistent/path/config.toml"));
        assert!(result.is_err());
        match result.unwrap_err() {
            ConfigError::FileNotFound { path } => {
                assert_eq!(path, "/nonexistent/path/config.toml");
            }
            other => panic!("expected FileNotFound, got: {other}"),
        }
    }

    #[test]
    fn expand_tilde_works() {
        let expanded = expand_tilde("~/.biasscore/config.toml");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn parse_env_bool_values() {
        assert!(parse_env_bool("TEST", "true").unwrap());
        assert!(parse_env_bool("TEST", "1").unwrap());
        assert!(parse_env_bool("TEST", "yes").unwrap());
        assert!(!parse_env_bool("TEST", "false").unwrap());
        assert!(!parse_env_bool("TEST", "0").unwrap());
        assert!(!parse_env_bool("TEST", "no").unwrap());
        assert!(parse_env_bool("TEST", "maybe").is_err());
    }
}
