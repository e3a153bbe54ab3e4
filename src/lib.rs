#![doc = include_str!("../README.md")]
//! Bookshelf library: book records over PostgreSQL, served with poem-openapi.

pub mod api;
pub mod config;
pub mod model;
pub mod query_builder;
pub mod startup;

use log::{debug, error, LevelFilter};
use log4rs;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use sqlx::postgres::PgPoolOptions;

pub use startup::migrations::{migrate, run_migrations};
pub use startup::readiness::wait_for_db;

pub fn init_logger(tag_name: &str, level: LevelFilter) -> Result<log4rs::Handle, String> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            &(format!("[{}]", tag_name) + " {d} - {h({l} - {t} - {m}{n})}"),
        )))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .logger(
            Logger::builder()
                .appender("stdout")
                .additive(false)
                .build("stdout", level),
        )
        .build(Root::builder().appender("stdout").build(level))
        .map_err(|e| format!("couldn't build log configuration. Reason: {}", e))?;

    log4rs::init_config(config)
        .map_err(|e| format!("couldn't initialize log configuration. Reason: {}", e))
}

/// A postgres url with a host. The port and the database are optional.
pub fn is_db_url_valid(db_url: &str) -> bool {
    match url::Url::parse(db_url) {
        Ok(url) => {
            matches!(url.scheme(), "postgres" | "postgresql")
                && url.host_str().map_or(false, |h| !h.is_empty())
        }
        Err(_) => false,
    }
}

/// Split a database url into (host, port, username, password, database).
pub fn parse_db_url(db_url: &str) -> Result<(String, u16, String, String, String), anyhow::Error> {
    let url = url::Url::parse(db_url)?;
    let host = match url.host_str() {
        Some(h) => h.to_string(),
        None => return Err(anyhow::anyhow!("The database url has no host: {}", db_url)),
    };
    let port = url.port().unwrap_or(5432);
    let username = url.username().to_string();
    let password = match url.password() {
        Some(p) => p.to_string(),
        None => "".to_string(),
    };
    let database = url.path().to_string().replace("/", "");

    Ok((host, port, username, password, database))
}

pub async fn connect_db(
    database_url: &str,
    max_connections: u32,
) -> Result<sqlx::PgPool, anyhow::Error> {
    if !is_db_url_valid(database_url) {
        error!("Invalid database_url, the format is postgres://<username>:<password>@<host>[:<port>]/<database>");
        return Err(anyhow::anyhow!("Invalid database url."));
    };

    debug!("Connecting to the database with {} connections.", max_connections);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(std::time::Duration::from_secs(600)) // 10 min
        .acquire_timeout(std::time::Duration::from_secs(30)) // 30 seconds
        .max_lifetime(std::time::Duration::from_secs(1800)) // 30 min
        .connect(database_url)
        .await?;

    Ok(pool)
}

// Setup the test database
pub async fn setup_test_db() -> sqlx::PgPool {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(v) => v,
        Err(_) => {
            println!("{}", "DATABASE_URL is not set.");
            std::process::exit(1);
        }
    };
    let pool = connect_db(&database_url, 1)
        .await
        .expect("Failed to connect to the test database");

    let dir = config::Settings::from_env().migrations_dir;
    migrate(&pool, &dir)
        .await
        .expect("Failed to migrate the test database");

    return pool;
}
