//! Application configuration loaded from environment variables.

use std::time::Duration;

use program_approval::StoreOptions;

use crate::errors::{Result, ServerError};

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL; the file is created if missing
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    pub db_max_connections: u32,
    /// Pool acquire timeout and SQLite busy timeout
    pub storage_timeout_secs: u64,
    /// Lifetime of a login session
    pub session_ttl_hours: u64,
    /// How often (in seconds) expired sessions are purged
    pub session_sweep_interval_secs: u64,
    /// Largest accepted request body, base64 uploads included
    pub max_upload_bytes: usize,
    /// First administrator, created at startup when none exists
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let bootstrap_admin = match (
            lookup("BOOTSTRAP_ADMIN_EMAIL"),
            lookup("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some(BootstrapAdmin {
                name: var("BOOTSTRAP_ADMIN_NAME", "Administrator"),
                email,
                password,
            }),
            (None, None) => None,
            _ => {
                return Err(ServerError::Config(
                    "BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together"
                        .to_string(),
                ))
            }
        };

        Ok(Config {
            database_url: var("DATABASE_URL", "sqlite:./program_approval.db"),
            api_port: parse(&var("API_PORT", "3001"), "API_PORT")?,
            db_max_connections: positive(&var("DB_MAX_CONNECTIONS", "5"), "DB_MAX_CONNECTIONS")?,
            storage_timeout_secs: positive(
                &var("STORAGE_TIMEOUT_SECS", "5"),
                "STORAGE_TIMEOUT_SECS",
            )?,
            session_ttl_hours: parse(&var("SESSION_TTL_HOURS", "12"), "SESSION_TTL_HOURS")?,
            session_sweep_interval_secs: positive(
                &var("SESSION_SWEEP_INTERVAL_SECS", "300"),
                "SESSION_SWEEP_INTERVAL_SECS",
            )?,
            max_upload_bytes: positive(&var("MAX_UPLOAD_BYTES", "33554432"), "MAX_UPLOAD_BYTES")?,
            bootstrap_admin,
        })
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_connections: self.db_max_connections,
            timeout: Duration::from_secs(self.storage_timeout_secs),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_hours.saturating_mul(3600))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ServerError::Config(format!("Invalid {key}: `{value}`")))
}

/// Like [`parse`], but zero is rejected too.
fn positive<T: std::str::FromStr + Default + PartialEq>(value: &str, key: &str) -> Result<T> {
    let parsed: T = parse(value, key)?;
    if parsed == T::default() {
        return Err(ServerError::Config(format!("Invalid {key}: must be positive")));
    }
    Ok(parsed)
}
