use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::{info, warn};

use crate::entities::EntityKind;
use crate::{AppError, AppResult};

pub mod backup;
pub mod health;
pub mod manifest;

const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn open_sqlite_pool(db_path: &Path) -> AppResult<Pool<Sqlite>> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| {
                tracing::error!(
                    target: "kiosk",
                    event = "data_dir_create_failed",
                    error = %err,
                    path = %parent.display()
                );
                AppError::from(err)
                    .with_context("operation", "create_data_dir")
                    .with_context("path", parent.display().to_string())
            })?;
        }
    }

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(opts)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "open_pool")
                .with_context("path", db_path.display().to_string())
        })?;

    log_effective_pragmas(&pool, db_path).await;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &SqlitePool, db_path: &Path) {
    let sqlite_ver: String = sqlx::query_scalar("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or_else(|_| String::from("unknown"));
    let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or_else(|_| String::from("unknown"));
    let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or(i64::MIN);

    info!(
        target: "kiosk",
        event = "db_open",
        path = %db_path.display(),
        sqlite_version = %sqlite_ver,
        journal_mode = %journal_mode,
        foreign_keys
    );

    if !journal_mode.eq_ignore_ascii_case("wal") {
        warn!(
            target: "kiosk",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Creates any missing FTS table or sync trigger. Existing definitions are
/// left alone.
pub async fn ensure_text_indexes(pool: &SqlitePool) -> AppResult<()> {
    for kind in EntityKind::ALL {
        let fresh = !table_exists(pool, kind.fts_table()).await?;
        for stmt in kind.schema().fts_create_statements() {
            sqlx::query(&stmt)
                .execute(pool)
                .await
                .map_err(|err| AppError::from(err).with_context("table", kind.fts_table()))?;
        }
        if fresh {
            // Rows written before the index existed are not in it yet.
            let fts = kind.fts_table();
            sqlx::query(&format!("INSERT INTO {fts}({fts}) VALUES('rebuild')"))
                .execute(pool)
                .await?;
            info!(target: "kiosk", event = "fts_index_created", table = fts);
        }
    }
    Ok(())
}

pub async fn table_exists(pool: &SqlitePool, name: &str) -> AppResult<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

/// Row count of every entity table, in kind order.
pub async fn record_counts(pool: &SqlitePool) -> AppResult<Vec<(EntityKind, i64)>> {
    let mut out = Vec::with_capacity(EntityKind::ALL.len());
    for kind in EntityKind::ALL {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", kind.table()))
            .fetch_one(pool)
            .await?;
        out.push((kind, count));
    }
    Ok(out)
}
