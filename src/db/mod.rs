mod filter;
mod models;

pub use filter::{Filters, SqlArg};
pub use models::*;

use anyhow::{bail, Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::config::{DatabaseConfig, DbType};

pub type DbPool = SqlitePool;

/// Current time in the text format every timestamp column uses.
pub fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Today's date as `YYYY-MM-DD`.
pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(config: &DatabaseConfig) -> Result<DbPool> {
    if config.db_type != DbType::Sqlite {
        bail!(
            "DB_TYPE={} is not supported by this build; use DB_TYPE=sqlite",
            config.db_type
        );
    }

    if let Some(parent) = config.sqlite_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", config.sqlite_path.display());
    info!("Initializing database at {}", config.sqlite_path.display());

    let pool = connect(&db_url, 5).await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Open a pool with foreign keys enforced and `synchronous = NORMAL` on
/// every connection. Both pragmas are per-connection.
pub async fn connect(url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(None)
        .max_lifetime(None)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA synchronous = NORMAL")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    Ok(pool)
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: schools, users, classes, subjects
    if !table_exists(pool, "schools").await? {
        execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;
    }

    // Migration 002: schedules, attendance, grades, homework, announcements, parent links
    if !table_exists(pool, "schedules").await? {
        execute_sql(pool, include_str!("../../migrations/002_school_records.sql")).await?;
    }

    // Migration 003: activity log
    if !table_exists(pool, "audit_logs").await? {
        execute_sql(pool, include_str!("../../migrations/003_audit_logs.sql")).await?;
    }

    info!("Migrations complete");
    Ok(())
}

/// In-memory database with the full schema, for tests.
#[cfg(test)]
pub async fn test_pool() -> DbPool {
    let pool = connect("sqlite::memory:", 1)
        .await
        .expect("in-memory pool");
    run_migrations(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    #[tokio::test]
    async fn test_init_creates_schema_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            sqlite_path: dir.path().join("nested").join("school.db"),
            ..DatabaseConfig::default()
        };

        let pool = init(&config).await.unwrap();
        for table in ["schools", "users", "attendance", "parent_students", "audit_logs"] {
            assert!(table_exists(&pool, table).await.unwrap(), "{} missing", table);
        }

        // Running again is a no-op
        run_migrations(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_pragmas_apply_to_every_connection() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            sqlite_path: dir.path().join("school.db"),
            ..DatabaseConfig::default()
        };
        let pool = init(&config).await.unwrap();

        // Hold every pooled connection so none is reused
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.acquire().await.unwrap());
        }
        for conn in held.iter_mut() {
            let (synchronous,): (i64,) = sqlx::query_as("PRAGMA synchronous")
                .fetch_one(&mut **conn)
                .await
                .unwrap();
            assert_eq!(synchronous, 1, "NORMAL is 1");
            let (foreign_keys,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
                .fetch_one(&mut **conn)
                .await
                .unwrap();
            assert_eq!(foreign_keys, 1);
        }
    }

    #[tokio::test]
    async fn test_postgres_is_rejected() {
        let config = DatabaseConfig {
            db_type: DbType::Postgres,
            ..DatabaseConfig::default()
        };
        let err = init(&config).await.unwrap_err();
        assert!(err.to_string().contains("postgres"));
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let pool = test_pool().await;
        let result = sqlx::query("INSERT INTO classes (school_id, name, year) VALUES (999, 'X', '2025')")
            .execute(&pool)
            .await;
        assert!(result.is_err());
    }
}
