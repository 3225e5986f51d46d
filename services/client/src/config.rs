use crate::ws::chat_endpoint;
use tracing::Level;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_USER_ID: &str = "user1";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP(S) base address of the tutor backend. The chat websocket
    /// endpoint is derived from it.
    pub api_base_url: String,
    pub user_id: String,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_base_url = std::env::var("API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        chat_endpoint(&api_base_url)
            .map_err(|e| ConfigError::InvalidValue("API_BASE_URL".to_string(), e.to_string()))?;

        let user_id =
            std::env::var("TUTOR_USER_ID").unwrap_or_else(|_| DEFAULT_USER_ID.to_string());
        if user_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "TUTOR_USER_ID".to_string(),
                "must not be empty".to_string(),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            api_base_url,
            user_id,
            log_level,
        })
    }
}
