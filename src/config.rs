use std::{env, path::PathBuf, str::FromStr};

use anyhow::{Context, Result, anyhow};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60;
const DEFAULT_MAX_UPLOAD_MB: usize = 200;

/// Process-wide settings read once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub db_max_connections: u32,
    pub token_ttl_minutes: i64,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET env var is missing")?;
        if jwt_secret.trim().is_empty() {
            return Err(anyhow!("JWT_SECRET must not be empty"));
        }

        let upload_dir = env::var("UPLOAD_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string());

        let max_upload_mb: usize = parse_or("MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB)?;
        let max_upload_bytes = megabytes_to_bytes(max_upload_mb)?;

        Ok(Self {
            database_url,
            jwt_secret,
            port: parse_or("PORT", DEFAULT_PORT)?,
            upload_dir: PathBuf::from(upload_dir),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            token_ttl_minutes: parse_or("TOKEN_TTL_MINUTES", DEFAULT_TOKEN_TTL_MINUTES)?,
            max_upload_bytes,
        })
    }

    /// Settings for tests that never reach the network.
    #[cfg(test)]
    pub fn for_tests(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_url: "postgres://localhost/hr_portal_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            port: DEFAULT_PORT,
            upload_dir: upload_dir.into(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            token_ttl_minutes: DEFAULT_TOKEN_TTL_MINUTES,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow!("invalid value for {key}: {err}")),
        _ => Ok(default),
    }
}

fn megabytes_to_bytes(megabytes: usize) -> Result<usize> {
    megabytes
        .checked_mul(1024 * 1024)
        .ok_or_else(|| anyhow!("invalid value for MAX_UPLOAD_MB: {megabytes} is too large"))
}
