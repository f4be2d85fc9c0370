use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

/// Runtime settings, read from `PARLOR_*` environment variables (a `.env`
/// file is loaded first when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub token_ttl_hours: i64,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("PARLOR_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLOR_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let db_path = get("PARLOR_DB_PATH").unwrap_or_else(|| "parlor.db".into());
        let host = get("PARLOR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("PARLOR_PORT")
            .unwrap_or_else(|| "8080".into())
            .parse()
            .context("PARLOR_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let token_ttl_hours: i64 = get("PARLOR_TOKEN_TTL_HOURS")
            .unwrap_or_else(|| "24".into())
            .parse()
            .context("PARLOR_TOKEN_TTL_HOURS must be an integer")?;
        if token_ttl_hours <= 0 {
            bail!("PARLOR_TOKEN_TTL_HOURS must be positive");
        }

        let timeout_secs: u64 = get("PARLOR_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".into())
            .parse()
            .context("PARLOR_REQUEST_TIMEOUT_SECS must be an integer")?;

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            addr,
            token_ttl_hours,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
