use std::env;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// HTTP + the bidirectional channel share this port.
    pub listen_port: u16,
    /// Reconciliation tick period.
    pub poll_interval: Duration,
    /// Stale-session threshold for heartbeat cleanup.
    pub heartbeat_timeout: Duration,
    /// Interval at which the heartbeat sweep itself runs.
    pub heartbeat_sweep_interval: Duration,
    /// Emails permitted to call `take_master_control`, lower-cased.
    pub allow_list: Vec<String>,
    /// Origins permitted to call the HTTP API. Empty means permit-all,
    /// logged with a warning, since this coordinator has no public
    /// front-end of its own to restrict to by default.
    pub allowed_origins: Vec<String>,
    /// Seed playlist URI for the fallback queue.
    pub fallback_playlist_uri: String,
    /// Directory holding queue.json / sessions.json / history.json.
    pub data_dir: String,
    pub provider_client_id: String,
    pub provider_client_secret: String,
    pub provider_redirect_uri: String,
    /// Verbose reconciliation logging.
    pub debug: bool,
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

const DEFAULT_FALLBACK_PLAYLIST: &str = "spotify:playlist:37i9dQZF1DXcBWIGoYBM5M";

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let listen_port = env::var("LISTEN_PORT")
            .or_else(|_| env::var("PORT"))
            .unwrap_or_else(|_| "4000".to_string())
            .parse()
            .map_err(|_| AppError::ConfigError { message: "LISTEN_PORT must be a valid u16".into() })?;

        let poll_interval_ms: u64 = env::var("POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);

        let heartbeat_timeout_ms: u64 = env::var("HEARTBEAT_TIMEOUT_MS")
            .unwrap_or_else(|_| "60000".to_string())
            .parse()
            .unwrap_or(60_000);

        let heartbeat_sweep_ms: u64 = env::var("HEARTBEAT_SWEEP_INTERVAL_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .unwrap_or(30_000);

        let allow_list = env::var("ALLOW_LIST_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let fallback_playlist_uri = env::var("FALLBACK_PLAYLIST_URI")
            .unwrap_or_else(|_| DEFAULT_FALLBACK_PLAYLIST.to_string());

        let data_dir = env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        // Provider credentials are structurally required: there is no
        // reasonable default for a third-party OAuth client.
        let provider_client_id = env::var("PROVIDER_CLIENT_ID")
            .map_err(|_| AppError::ConfigError { message: "PROVIDER_CLIENT_ID is required".into() })?;
        let provider_client_secret = env::var("PROVIDER_CLIENT_SECRET")
            .map_err(|_| AppError::ConfigError { message: "PROVIDER_CLIENT_SECRET is required".into() })?;
        let provider_redirect_uri = env::var("PROVIDER_REDIRECT_URI")
            .unwrap_or_else(|_| format!("http://localhost:{listen_port}/callback"));

        let debug = env::var("DEBUG")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let log_format = match env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()).to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        };

        let config = Self {
            listen_port,
            poll_interval: Duration::from_millis(poll_interval_ms),
            heartbeat_timeout: Duration::from_millis(heartbeat_timeout_ms),
            heartbeat_sweep_interval: Duration::from_millis(heartbeat_sweep_ms),
            allow_list,
            allowed_origins,
            fallback_playlist_uri,
            data_dir,
            provider_client_id,
            provider_client_secret,
            provider_redirect_uri,
            debug,
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.listen_port == 0 {
            return Err(AppError::ConfigError { message: "listen port cannot be 0".into() });
        }
        if self.data_dir.is_empty() {
            return Err(AppError::ConfigError { message: "data directory cannot be empty".into() });
        }
        if self.poll_interval < Duration::from_millis(100) {
            return Err(AppError::ConfigError { message: "poll interval must be at least 100ms".into() });
        }
        if self.heartbeat_timeout < self.heartbeat_sweep_interval * 2 {
            return Err(AppError::ConfigError {
                message: "heartbeat timeout must be at least double the sweep interval".into(),
            });
        }
        Ok(())
    }

    pub fn is_allow_listed(&self, email: &str) -> bool {
        self.allow_list.iter().any(|e| e == &email.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            listen_port: 4000,
            poll_interval: Duration::from_millis(1000),
            heartbeat_timeout: Duration::from_millis(60_000),
            heartbeat_sweep_interval: Duration::from_millis(30_000),
            allow_list: vec!["conductor@example.com".into()],
            allowed_origins: Vec::new(),
            fallback_playlist_uri: DEFAULT_FALLBACK_PLAYLIST.into(),
            data_dir: "./data".into(),
            provider_client_id: "id".into(),
            provider_client_secret: "secret".into(),
            provider_redirect_uri: "http://localhost:4000/callback".into(),
            debug: false,
            log_format: LogFormat::Pretty,
        }
    }

    #[test]
    fn rejects_zero_port() {
        let mut cfg = base_config();
        cfg.listen_port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_too_short_poll_interval() {
        let mut cfg = base_config();
        cfg.poll_interval = Duration::from_millis(10);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_heartbeat_timeout_too_close_to_sweep() {
        let mut cfg = base_config();
        cfg.heartbeat_timeout = Duration::from_millis(40_000);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn allow_list_is_case_insensitive() {
        let cfg = base_config();
        assert!(cfg.is_allow_listed("Conductor@Example.com"));
        assert!(!cfg.is_allow_listed("someone-else@example.com"));
    }
}
