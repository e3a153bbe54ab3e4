//! Schema migrations.
//!
//! The migrations directory is mounted into the container. If it holds no migration file yet,
//! an initial migration with the whole schema is written into it. Pending migrations are then
//! applied with the sqlx migrator, in version order.

use crate::model::init_sql::INITIAL_SCHEMA;
use chrono::Utc;
use log::{debug, info};
use sqlx::migrate::Migrator;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const INITIAL_MIGRATION_NAME: &str = "initial_schema";

/// Whether `dir` holds at least one `.sql` migration file. A missing directory holds none.
pub fn has_migration_files(dir: &Path) -> Result<bool, anyhow::Error> {
    if !dir.exists() {
        return Ok(false);
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_sql = path.extension().map_or(false, |ext| ext == "sql");
        if path.is_file() && is_sql {
            debug!("Found migration file: {:?}", path);
            return Ok(true);
        }
    }

    Ok(false)
}

/// Write `<YYYYMMDDHHMMSS>_initial_schema.sql` into `dir`, creating the directory if needed.
pub fn generate_initial_migration(dir: &Path) -> Result<PathBuf, anyhow::Error> {
    std::fs::create_dir_all(dir)?;

    let version = Utc::now().format("%Y%m%d%H%M%S");
    let path = dir.join(format!("{}_{}.sql", version, INITIAL_MIGRATION_NAME));
    let mut file = File::create(&path)?;
    file.write_all(INITIAL_SCHEMA.as_bytes())?;

    info!("Generated the initial migration {:?}.", path);
    Ok(path)
}

/// Generate the initial migration only when `dir` has no migration file yet.
pub fn ensure_initial_migration(dir: &Path) -> Result<Option<PathBuf>, anyhow::Error> {
    if has_migration_files(dir)? {
        info!("Migrations already exist in {:?}, skipping generation.", dir);
        return Ok(None);
    }

    info!("No migrations found in {:?}, generating the initial migration.", dir);
    generate_initial_migration(dir).map(Some)
}

/// Apply every pending migration found in `dir`.
pub async fn run_migrations(pool: &sqlx::PgPool, dir: &Path) -> Result<(), anyhow::Error> {
    info!("Running migrations.");
    let migrator = Migrator::new(dir).await?;
    for migration in migrator.iter() {
        debug!("Known migration: {} {}", migration.version, migration.description);
    }

    migrator.run(pool).await?;
    info!("Migrations finished.");

    Ok(())
}

/// Generate the initial migration if needed, then apply all pending migrations.
pub async fn migrate(pool: &sqlx::PgPool, dir: &Path) -> Result<(), anyhow::Error> {
    ensure_initial_migration(dir)?;
    run_migrations(pool, dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_has_migration_files() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(!has_migration_files(&missing).unwrap());
        assert!(!has_migration_files(dir.path()).unwrap());

        // Non-sql files don't count as migrations.
        std::fs::write(dir.path().join(".gitkeep"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "notes").unwrap();
        assert!(!has_migration_files(dir.path()).unwrap());

        std::fs::write(dir.path().join("20240101000000_books.sql"), "SELECT 1;").unwrap();
        assert!(has_migration_files(dir.path()).unwrap());
    }

    #[test]
    fn test_generate_initial_migration() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("migrations");

        let path = generate_initial_migration(&target).unwrap();
        let filename = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(filename.ends_with("_initial_schema.sql"));
        assert_eq!(filename.split('_').next().unwrap().len(), 14);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("CREATE TABLE IF NOT EXISTS users"));
        assert!(content.contains("CREATE TABLE IF NOT EXISTS books"));
    }

    #[test]
    fn test_ensure_initial_migration_only_when_empty() {
        let dir = tempdir().unwrap();

        let generated = ensure_initial_migration(dir.path()).unwrap();
        assert!(generated.is_some());

        let generated = ensure_initial_migration(dir.path()).unwrap();
        assert!(generated.is_none());

        let count = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_existing_migrations_are_kept() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("20230505000000_custom.sql");
        std::fs::write(&existing, "CREATE TABLE custom (id INTEGER);").unwrap();

        assert!(ensure_initial_migration(dir.path()).unwrap().is_none());
        assert_eq!(
            std::fs::read_to_string(&existing).unwrap(),
            "CREATE TABLE custom (id INTEGER);"
        );
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a PostgreSQL instance"]
    async fn test_migrate_is_idempotent() {
        let pool = crate::setup_test_db().await;
        let dir = crate::config::Settings::from_env().migrations_dir;
        migrate(&pool, &dir).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(row.0 >= 1);
    }
}
