//! Database schema and migrations
//!
//! This module handles database initialization and schema migrations.
//! Uses SQLite with WAL mode for better concurrency and crash safety.

use crate::error::Result;
use sqlx::{sqlite::SqlitePool, Row};

/// Columns the notifier reads from `notification_log`, with the DDL used to
/// add each one to a table created by an older build.
const NOTIFICATION_LOG_COLUMNS: &[(&str, &str)] = &[
    ("recipient", "recipient TEXT NOT NULL DEFAULT ''"),
    ("titular", "titular TEXT NOT NULL DEFAULT ''"),
    ("period_key", "period_key TEXT NOT NULL DEFAULT ''"),
    (
        "sent_at",
        "sent_at TEXT NOT NULL DEFAULT '1970-01-01T00:00:00+00:00'",
    ),
    ("status", "status TEXT NOT NULL DEFAULT 'sent'"),
];

/// Initialize database with schema
pub async fn initialize_database(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Initializing database schema");

    // Enable WAL mode for better performance and crash safety
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version: i32 = sqlx::query("SELECT COALESCE(MAX(version), 0) FROM migrations")
        .fetch_one(pool)
        .await?
        .get(0);

    tracing::info!("Current database version: {}", current_version);

    apply_migrations(pool, current_version).await?;

    tracing::info!("Database initialization complete");
    Ok(())
}

async fn apply_migrations(pool: &SqlitePool, current_version: i32) -> Result<()> {
    let migrations = get_migrations();

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Applying migration version {}", version);

            let mut tx = pool.begin().await?;

            for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
                sqlx::query(statement).execute(&mut *tx).await?;
            }

            sqlx::query("INSERT INTO migrations (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            tracing::info!("Migration version {} applied successfully", version);
        }
    }

    Ok(())
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![
        (1, include_str!("migrations/001_initial_schema.sql")),
        (2, include_str!("migrations/002_notification_log.sql")),
    ]
}

/// Create the notification log, or add whichever of its columns are missing.
///
/// Returns the names of the columns that had to be added. Safe to call on an
/// up-to-date schema, in which case nothing changes.
pub async fn ensure_notification_log_schema(pool: &SqlitePool) -> Result<Vec<&'static str>> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notification_log (
            id TEXT PRIMARY KEY NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let existing: Vec<String> =
        sqlx::query_scalar("SELECT name FROM pragma_table_info('notification_log')")
            .fetch_all(pool)
            .await?;

    let mut added = Vec::new();
    for (column, ddl) in NOTIFICATION_LOG_COLUMNS {
        if existing.iter().any(|name| name == column) {
            continue;
        }

        sqlx::query(&format!("ALTER TABLE notification_log ADD COLUMN {}", ddl))
            .execute(pool)
            .await?;

        tracing::warn!("Added missing notification_log column: {}", column);
        added.push(*column);
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_notification_log_period ON notification_log(titular, period_key)",
    )
    .execute(pool)
    .await?;

    Ok(added)
}
