use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use courier_filter::FilterConfig;

/// Server settings, read from `COURIER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub filter: FilterConfig,
    pub heartbeat: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take defaults; set but
    /// unparseable numbers are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let ttl_minutes: i64 = parsed(&lookup, "COURIER_TOKEN_TTL_MINUTES", 43_200)?;
        let heartbeat_secs: u64 = parsed(&lookup, "COURIER_HEARTBEAT_SECS", 15)?;
        if heartbeat_secs == 0 {
            anyhow::bail!("COURIER_HEARTBEAT_SECS must be at least 1");
        }

        let error_rate: f64 = parsed(&lookup, "COURIER_FILTER_ERROR_RATE", 0.001)?;
        if !(error_rate > 0.0 && error_rate < 1.0) {
            anyhow::bail!("COURIER_FILTER_ERROR_RATE must be between 0 and 1");
        }

        Ok(Self {
            host: text("COURIER_HOST", "0.0.0.0"),
            port: parsed(&lookup, "COURIER_PORT", 3000)?,
            db_path: PathBuf::from(text("COURIER_DB_PATH", "courier.db")),
            jwt_secret: text("COURIER_JWT_SECRET", "dev-secret-change-me"),
            token_ttl: chrono::Duration::minutes(ttl_minutes),
            filter: FilterConfig {
                path: PathBuf::from(text("COURIER_FILTER_PATH", "username_filter.bloom")),
                capacity: parsed(&lookup, "COURIER_FILTER_CAPACITY", 1_000_000)?,
                error_rate,
            },
            heartbeat: Duration::from_secs(heartbeat_secs),
        })
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
