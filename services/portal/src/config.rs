//! services/portal/src/config.rs
//!
//! Defines the client's configuration structure and loading logic.
//!
//! All configuration is resolved once at startup from environment variables. The
//! `.env` file is used for local development.

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

/// Where record data is read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    /// The clinic's own REST API, e.g. `https://portal.example.com/api`.
    Rest { base_url: String },
    /// A Supabase project; data goes through PostgREST under `/rest/v1`.
    Supabase { url: String, anon_key: String },
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub api_url: String,
    pub use_supabase: bool,
    pub api_timeout: Duration,
    pub panel_cache_ttl: Duration,
    pub session_refresh_low_water: Duration,
    pub storage_path: PathBuf,
    pub storage_prefix: String,
    /// Start with connectivity reported as lost; panels are served from storage.
    pub offline: bool,
    /// Credentials for a non-interactive sign-in when no session was persisted.
    pub portal_email: Option<String>,
    pub portal_password: Option<String>,
    pub log_level: Level,
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

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Supabase credentials ---
        let supabase_url = required(&lookup, "SUPABASE_URL")?
            .trim_end_matches('/')
            .to_string();
        if !supabase_url.starts_with("http://") && !supabase_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "SUPABASE_URL".to_string(),
                format!("'{}' is not an http(s) URL", supabase_url),
            ));
        }
        let supabase_anon_key = required(&lookup, "SUPABASE_ANON_KEY")?;

        // --- REST API settings ---
        let api_url = lookup("API_URL")
            .unwrap_or_else(|| "http://localhost:8000/api".to_string())
            .trim_end_matches('/')
            .to_string();
        let use_supabase = match lookup("USE_SUPABASE") {
            Some(raw) => parse_bool("USE_SUPABASE", &raw)?,
            None => true,
        };
        let api_timeout = Duration::from_millis(parse_or(&lookup, "API_TIMEOUT_MS", 30_000)?);

        // --- Cache and session settings ---
        let panel_cache_ttl = Duration::from_secs(parse_or(&lookup, "PANEL_CACHE_TTL_SECS", 300)?);
        let session_refresh_low_water =
            Duration::from_secs(parse_or(&lookup, "SESSION_REFRESH_LOW_WATER_SECS", 300)?);

        // --- Local storage ---
        let storage_path = lookup("STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./portal_storage.json"));
        let storage_prefix = lookup("STORAGE_PREFIX").unwrap_or_else(|| "portal_medico".to_string());
        let offline = match lookup("PORTAL_OFFLINE") {
            Some(raw) => parse_bool("PORTAL_OFFLINE", &raw)?,
            None => false,
        };

        // --- Sign-in ---
        let portal_email = lookup("PORTAL_EMAIL").filter(|v| !v.trim().is_empty());
        let portal_password = lookup("PORTAL_PASSWORD").filter(|v| !v.is_empty());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            supabase_url,
            supabase_anon_key,
            api_url,
            use_supabase,
            api_timeout,
            panel_cache_ttl,
            session_refresh_low_water,
            storage_path,
            storage_prefix,
            offline,
            portal_email,
            portal_password,
            log_level,
        })
    }

    /// The data backend selected by `USE_SUPABASE`.
    pub fn backend(&self) -> Backend {
        if self.use_supabase {
            Backend::Supabase {
                url: self.supabase_url.clone(),
                anon_key: self.supabase_anon_key.clone(),
            }
        } else {
            Backend::Rest {
                base_url: self.api_url.clone(),
            }
        }
    }
}

fn required<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> Result<String, ConfigError> {
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn parse_or<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str, default: u64) -> Result<u64, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a boolean", other),
        )),
    }
}
