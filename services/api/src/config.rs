//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use crate::adapters::BrowserConfig;
use schedule_rpa_core::{EngineConfig, SessionConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
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
    pub vendor_base_url: String,
    pub chrome_path: Option<PathBuf>,
    pub cdp_endpoint: Option<String>,
    pub browser_headless: bool,
    pub browser_data_dir: PathBuf,
    pub keep_alive_interval: Duration,
    pub request_timeout: Duration,
    pub login_timeout: Duration,
    pub step_timeout: Duration,
    pub cors_allowed_origin: String,
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
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // --- Server Settings ---
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_allowed_origin =
            var("CORS_ALLOWED_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Vendor and Browser Settings ---
        let vendor_base_url = var("VENDOR_BASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("VENDOR_BASE_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();
        if !vendor_base_url.starts_with("http://") && !vendor_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "VENDOR_BASE_URL".to_string(),
                format!("'{}' is not an http(s) URL", vendor_base_url),
            ));
        }

        let chrome_path = var("CHROME_PATH").map(PathBuf::from);
        let cdp_endpoint = var("CDP_ENDPOINT");
        let browser_headless = parse_bool("BROWSER_HEADLESS", var("BROWSER_HEADLESS"), true)?;
        let browser_data_dir = var("BROWSER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./.browser"));

        // --- Session Timing ---
        let keep_alive_interval =
            parse_millis("KEEP_ALIVE_INTERVAL_MS", var("KEEP_ALIVE_INTERVAL_MS"), 300_000)?;
        let request_timeout =
            parse_millis("REQUEST_TIMEOUT_MS", var("REQUEST_TIMEOUT_MS"), 180_000)?;
        let login_timeout = parse_millis("LOGIN_TIMEOUT_MS", var("LOGIN_TIMEOUT_MS"), 60_000)?;
        let step_timeout = parse_millis("STEP_TIMEOUT_MS", var("STEP_TIMEOUT_MS"), 30_000)?;

        Ok(Self {
            bind_address,
            log_level,
            vendor_base_url,
            chrome_path,
            cdp_endpoint,
            browser_headless,
            browser_data_dir,
            keep_alive_interval,
            request_timeout,
            login_timeout,
            step_timeout,
            cors_allowed_origin,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            keep_alive_interval: self.keep_alive_interval,
            request_timeout: self.request_timeout,
            login_timeout: self.login_timeout,
            step_timeout: self.step_timeout,
            probe_timeout: self.step_timeout,
            ..SessionConfig::new(self.vendor_base_url.clone())
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            step_timeout: self.step_timeout,
            render_timeout: self.step_timeout,
            submit_timeout: self.step_timeout,
        }
    }

    pub fn browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            chrome_path: self.chrome_path.clone(),
            cdp_endpoint: self.cdp_endpoint.clone(),
            headless: self.browser_headless,
            data_dir: self.browser_data_dir.clone(),
            step_timeout: self.step_timeout,
        }
    }
}

fn parse_millis(key: &str, value: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = value else {
        return Ok(Duration::from_millis(default));
    };
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("'{}' is not a positive number of milliseconds", raw),
        )),
    }
}

fn parse_bool(key: &str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = value else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("'{}' is not a boolean", raw),
        )),
    }
}
