use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub poll_interval: Duration,
    pub page_size: u32,
    pub db_timeout: Duration,
}

impl Config {
    /// Read `COURIER_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let poll_ms: u64 = parse("COURIER_POLL_INTERVAL_MS", &var("COURIER_POLL_INTERVAL_MS", "1000"))?;
        let page_size: u32 = parse("COURIER_PAGE_SIZE", &var("COURIER_PAGE_SIZE", "10"))?;
        let db_timeout_ms: u64 = parse("COURIER_DB_TIMEOUT_MS", &var("COURIER_DB_TIMEOUT_MS", "5000"))?;

        if poll_ms == 0 {
            bail!("COURIER_POLL_INTERVAL_MS must be greater than 0");
        }
        if page_size == 0 {
            bail!("COURIER_PAGE_SIZE must be greater than 0");
        }
        if db_timeout_ms == 0 {
            bail!("COURIER_DB_TIMEOUT_MS must be greater than 0");
        }

        Ok(Self {
            jwt_secret: var("COURIER_JWT_SECRET", "dev-secret-change-me"),
            db_path: PathBuf::from(var("COURIER_DB_PATH", "courier.db")),
            host: var("COURIER_HOST", "0.0.0.0"),
            port: parse("COURIER_PORT", &var("COURIER_PORT", "3000"))?,
            poll_interval: Duration::from_millis(poll_ms),
            page_size,
            db_timeout: Duration::from_millis(db_timeout_ms),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{} must be a number, got {:?}: {}", key, raw, e))
}
