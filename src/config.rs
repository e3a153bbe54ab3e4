//! Runtime settings, read from the environment (and `.env` through `dotenv` in the binaries).

use log::warn;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8001;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_POOL_SIZE: u32 = 10;
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
pub const DEFAULT_DB_WAIT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_ACCESS_TOKEN_EXPIRE_MINUTES: i64 = 30;
const INSECURE_SECRET_KEY: &str = "bookshelf-insecure-secret-key";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub pool_size: u32,
    pub migrations_dir: PathBuf,
    pub db_wait_interval: Duration,
    /// `None` keeps polling until the database answers.
    pub db_wait_max_attempts: Option<usize>,
    pub secret_key: String,
    pub access_token_expire_minutes: i64,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the settings from any key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => compose_database_url(
                &get("POSTGRES_USER").unwrap_or_else(|| "postgres".to_string()),
                &get("POSTGRES_PASSWORD").unwrap_or_default(),
                &get("POSTGRES_HOST").unwrap_or_else(|| "db".to_string()),
                get("POSTGRES_PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5432),
                &get("POSTGRES_DB").unwrap_or_else(|| "postgres".to_string()),
            ),
        };

        let secret_key = match get("SECRET_KEY") {
            Some(key) => key,
            None => {
                warn!("You don't set SECRET_KEY environment variable, so tokens are signed with an insecure default key.");
                INSECURE_SECRET_KEY.to_string()
            }
        };

        Self {
            database_url,
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: get("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            workers: get("WORKERS")
                .and_then(|v| v.parse().ok())
                .filter(|w: &usize| *w > 0)
                .unwrap_or(DEFAULT_WORKERS),
            pool_size: get("POOL_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_POOL_SIZE),
            migrations_dir: PathBuf::from(
                get("MIGRATIONS_DIR").unwrap_or_else(|| DEFAULT_MIGRATIONS_DIR.to_string()),
            ),
            db_wait_interval: Duration::from_millis(
                get("DB_WAIT_INTERVAL_MS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_DB_WAIT_INTERVAL_MS),
            ),
            db_wait_max_attempts: get("DB_WAIT_MAX_ATTEMPTS").and_then(|v| v.parse().ok()),
            secret_key,
            access_token_expire_minutes: get("ACCESS_TOKEN_EXPIRE_MINUTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_ACCESS_TOKEN_EXPIRE_MINUTES),
        }
    }
}

/// Credentials are percent-encoded by `url`, so passwords may contain `@` or `/`.
pub fn compose_database_url(
    user: &str,
    password: &str,
    host: &str,
    port: u16,
    database: &str,
) -> String {
    let raw = format!("postgres://{}:{}/{}", host, port, database);
    match url::Url::parse(&raw) {
        Ok(mut url) => {
            let _ = url.set_username(user);
            if !password.is_empty() {
                let _ = url.set_password(Some(password));
            }
            url.to_string()
        }
        Err(_) => format!("postgres://{}:{}@{}:{}/{}", user, password, host, port, database),
    }
}
