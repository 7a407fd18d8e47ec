//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use learning_assistant_core::EngineConfig;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:5000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// A custom error type for configuration loading failures.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub openai_api_key: String,
    pub content_model: String,
    pub tts_voice: String,
    pub external_timeout: Duration,
    pub auto_summarize: bool,
    pub quiz_question_count: usize,
    /// `None` keeps sessions for the lifetime of the process.
    pub session_idle_ttl: Option<Duration>,
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server Settings ---
        let bind_address = match parse_var::<SocketAddr, _>(&lookup, "BIND_ADDRESS")? {
            Some(addr) => addr,
            None => SocketAddr::from(([0, 0, 0, 0], 5000)),
        };

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- API Keys ---
        let openai_api_key = lookup("OPENAI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        // --- Adapter-specific Settings ---
        let content_model =
            lookup("CONTENT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let tts_voice = lookup("TTS_VOICE").unwrap_or_else(|| "alloy".to_string());

        // --- Session Engine Settings ---
        let timeout_secs = parse_var::<u64, _>(&lookup, "EXTERNAL_TIMEOUT_SECS")?.unwrap_or(30);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "EXTERNAL_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let auto_summarize = parse_var::<bool, _>(&lookup, "AUTO_SUMMARIZE")?.unwrap_or(true);
        let quiz_question_count =
            parse_var::<usize, _>(&lookup, "QUIZ_QUESTION_COUNT")?.unwrap_or(5);
        if quiz_question_count == 0 {
            return Err(ConfigError::InvalidValue(
                "QUIZ_QUESTION_COUNT".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let session_idle_ttl =
            parse_var::<u64, _>(&lookup, "SESSION_IDLE_TTL_SECS")?.map(Duration::from_secs);

        // --- Transport Settings ---
        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();
        let max_upload_bytes = parse_var::<usize, _>(&lookup, "MAX_UPLOAD_BYTES")?
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        Ok(Self {
            bind_address,
            log_level,
            openai_api_key,
            content_model,
            tts_voice,
            external_timeout: Duration::from_secs(timeout_secs),
            auto_summarize,
            quiz_question_count,
            session_idle_ttl,
            allowed_origins,
            max_upload_bytes,
        })
    }

    /// The subset of settings the session engine consumes.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            auto_summarize: self.auto_summarize,
            external_timeout: self.external_timeout,
            default_question_count: self.quiz_question_count,
        }
    }
}

/// Parses a variable if it is set. Unset variables yield `Ok(None)`.
fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_api_key_is_set() {
        let config = config_from(&[("OPENAI_API_KEY", "sk-test")]).unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:5000".parse().unwrap());
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.content_model, "gpt-4o-mini");
        assert_eq!(config.external_timeout, Duration::from_secs(30));
        assert!(config.auto_summarize);
        assert_eq!(config.quiz_question_count, 5);
        assert_eq!(config.session_idle_ttl, None);
        assert_eq!(config.allowed_origins.len(), 2);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn missing_api_key_is_reported() {
        assert_eq!(
            config_from(&[]).unwrap_err(),
            ConfigError::MissingVar("OPENAI_API_KEY".to_string())
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("BIND_ADDRESS", "127.0.0.1:8080"),
            ("RUST_LOG", "debug"),
            ("AUTO_SUMMARIZE", "false"),
            ("QUIZ_QUESTION_COUNT", "8"),
            ("SESSION_IDLE_TTL_SECS", "1800"),
            ("ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
        ])
        .unwrap();

        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(config.log_level, Level::DEBUG);
        assert!(!config.auto_summarize);
        assert_eq!(config.engine_config().default_question_count, 8);
        assert_eq!(config.session_idle_ttl, Some(Duration::from_secs(1800)));
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = config_from(&[("OPENAI_API_KEY", "sk-test"), ("AUTO_SUMMARIZE", "maybe")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(name, _) if name == "AUTO_SUMMARIZE"));

        let err = config_from(&[("OPENAI_API_KEY", "sk-test"), ("QUIZ_QUESTION_COUNT", "0")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(name, _) if name == "QUIZ_QUESTION_COUNT"));
    }
}
