//! Client configuration: base URL, per-operation timeouts, upload limits, logging.
//! Two presets (development / production), overridable from the environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Largest image accepted for OCR (5 MB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

const DEV_BASE_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ORDER_INTAKE_BASE_URL is required in production")]
    MissingBaseUrl,

    #[error("invalid base URL {url:?}: {message}")]
    InvalidBaseUrl { url: String, message: String },

    #[error("{key} must be a positive number of milliseconds, got {value:?}")]
    InvalidTimeout { key: &'static str, value: String },

    #[error("unknown environment {0:?} (expected development or production)")]
    UnknownEnvironment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }

    /// Local hosts (`localhost`, `127.0.0.1`, `*.local`) run the development preset.
    pub fn detect(base_url: &str) -> Self {
        let host = reqwest::Url::parse(base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_default();
        if host.is_empty() || host == "localhost" || host == "127.0.0.1" || host.ends_with(".local")
        {
            Environment::Development
        } else {
            Environment::Production
        }
    }
}

/// Per-operation timeouts. OCR is slow, so it gets its own, longer budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub api_request: Duration,
    pub ocr_processing: Duration,
    /// Used for large transfers (spreadsheet export).
    pub upload_file: Duration,
    pub duplicate_check: Duration,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub environment: Environment,
    pub base_url: String,
    pub timeouts: Timeouts,
    pub max_upload_bytes: u64,
    pub log_level: String,
    pub log_json: bool,
    pub debug: bool,
    /// SQLite file for the remembered username and one-shot tips.
    pub prefs_path: Option<PathBuf>,
}

impl ClientConfig {
    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            base_url: DEV_BASE_URL.to_string(),
            timeouts: Timeouts {
                api_request: Duration::from_secs(10),
                ocr_processing: Duration::from_secs(30),
                upload_file: Duration::from_secs(60),
                duplicate_check: Duration::from_secs(10),
            },
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            log_level: "debug".to_string(),
            log_json: false,
            debug: true,
            prefs_path: None,
        }
    }

    pub fn production(base_url: impl Into<String>) -> Self {
        Self {
            environment: Environment::Production,
            base_url: base_url.into(),
            timeouts: Timeouts {
                api_request: Duration::from_secs(30),
                ocr_processing: Duration::from_secs(60),
                upload_file: Duration::from_secs(120),
                duplicate_check: Duration::from_secs(10),
            },
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            log_level: "error".to_string(),
            log_json: false,
            debug: false,
            prefs_path: None,
        }
    }

    /// Load `.env` (if present) and build the configuration from process env vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = get("ORDER_INTAKE_BASE_URL").map(|u| u.trim().trim_end_matches('/').to_string());
        let environment = match get("ORDER_INTAKE_ENV") {
            Some(env) => Environment::parse(&env)?,
            None => base_url
                .as_deref()
                .map(Environment::detect)
                .unwrap_or(Environment::Development),
        };

        let mut config = match environment {
            Environment::Development => {
                let mut c = Self::development();
                if let Some(url) = base_url {
                    c.base_url = url;
                }
                c
            }
            Environment::Production => {
                Self::production(base_url.ok_or(ConfigError::MissingBaseUrl)?)
            }
        };

        if let Err(e) = reqwest::Url::parse(&config.base_url) {
            return Err(ConfigError::InvalidBaseUrl {
                url: config.base_url.clone(),
                message: e.to_string(),
            });
        }

        let t = &mut config.timeouts;
        override_timeout(&get, "ORDER_INTAKE_API_TIMEOUT_MS", &mut t.api_request)?;
        override_timeout(&get, "ORDER_INTAKE_OCR_TIMEOUT_MS", &mut t.ocr_processing)?;
        override_timeout(&get, "ORDER_INTAKE_UPLOAD_TIMEOUT_MS", &mut t.upload_file)?;
        override_timeout(&get, "ORDER_INTAKE_CHECK_TIMEOUT_MS", &mut t.duplicate_check)?;

        if let Some(level) = get("ORDER_INTAKE_LOG_LEVEL") {
            config.log_level = level.trim().to_ascii_lowercase();
        }
        if let Some(json) = get("ORDER_INTAKE_LOG_JSON") {
            config.log_json = matches!(json.trim(), "1" | "true" | "yes");
        }
        config.prefs_path = get("ORDER_INTAKE_PREFS_PATH").map(PathBuf::from);

        Ok(config)
    }
}

fn override_timeout<G>(get: &G, key: &'static str, slot: &mut Duration) -> Result<(), ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        match raw.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => *slot = Duration::from_millis(ms),
            _ => {
                return Err(ConfigError::InvalidTimeout { key, value: raw });
            }
        }
    }
    Ok(())
}
