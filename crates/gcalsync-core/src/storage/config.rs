//! TOML-based configuration.
//!
//! Read from `.gcalsync.toml` in the working directory:
//! - OAuth client credentials (required)
//! - pacing of remote calls
//! - the projection window
//! - endpoint overrides (mostly for tests)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::integrations::oauth::OAuthConfig;
use crate::sync::types::MAX_WINDOW_HOURS;
use crate::sync::SyncWindow;

/// File name of the configuration inside the working directory.
pub const CONFIG_FILE: &str = ".gcalsync.toml";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    /// Minimum gap between two remote calls.
    #[serde(default = "default_rate_interval_ms")]
    pub rate_interval_ms: u64,
    #[serde(default = "default_window_past_hours")]
    pub window_past_hours: u64,
    #[serde(default = "default_window_future_hours")]
    pub window_future_hours: u64,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Local port receiving the OAuth redirect.
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
}

// Default functions
fn default_rate_interval_ms() -> u64 {
    400
}
fn default_window_past_hours() -> u64 {
    24
}
fn default_window_future_hours() -> u64 {
    1440
}
fn default_api_base_url() -> String {
    "https://www.googleapis.com/calendar/v3".into()
}
fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".into()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".into()
}
fn default_redirect_port() -> u16 {
    8085
}

impl Config {
    /// Config with the given credentials and every other key at its default.
    pub fn with_credentials(client_id: &str, client_secret: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            rate_interval_ms: default_rate_interval_ms(),
            window_past_hours: default_window_past_hours(),
            window_future_hours: default_window_future_hours(),
            api_base_url: default_api_base_url(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            redirect_port: default_redirect_port(),
        }
    }

    /// Default location: `.gcalsync.toml` in the working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from(CONFIG_FILE)
    }

    /// Load and validate the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, cannot be parsed, or holds
    /// values that make no sense (empty credentials, zero intervals).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(content).map_err(|e| {
            let message = e.message().to_string();
            if let Some(key) = message
                .strip_prefix("missing field `")
                .and_then(|rest| rest.strip_suffix('`'))
            {
                ConfigError::MissingKey(key.to_string())
            } else {
                ConfigError::ParseFailed(e.to_string())
            }
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingKey("client_id".into()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(ConfigError::MissingKey("client_secret".into()));
        }
        for (key, value) in [
            ("rate_interval_ms", self.rate_interval_ms),
            ("window_past_hours", self.window_past_hours),
            ("window_future_hours", self.window_future_hours),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "must be greater than zero".into(),
                });
            }
        }
        for (key, value) in [
            ("window_past_hours", self.window_past_hours),
            ("window_future_hours", self.window_future_hours),
        ] {
            if value > MAX_WINDOW_HOURS {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: format!("must be at most {MAX_WINDOW_HOURS} (100 years)"),
                });
            }
        }
        if url::Url::parse(&self.api_base_url).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "api_base_url".into(),
                message: format!("not a URL: {}", self.api_base_url),
            });
        }
        Ok(())
    }

    pub fn rate_interval(&self) -> Duration {
        Duration::from_millis(self.rate_interval_ms)
    }

    pub fn window(&self) -> SyncWindow {
        SyncWindow::from_hours(self.window_past_hours, self.window_future_hours)
    }

    /// OAuth client settings for the Google Calendar scope.
    pub fn oauth(&self) -> OAuthConfig {
        OAuthConfig {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
            scopes: vec!["https://www.googleapis.com/auth/calendar".to_string()],
            redirect_port: self.redirect_port,
        }
    }
}
