use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{pool::PoolConnection, Row, Sqlite};
use tracing::{info, warn};
use ts_rs::TS;

use crate::db::manifest;
use crate::migrate;
use crate::search::{IndexManager, IndexStats};
use crate::state::Store;
use crate::AppResult;

const EXPECTED_JOURNAL_MODE: &str = "wal";

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum DbHealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DbHealthCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    #[ts(type = "number")]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub details: Option<String>,
}

impl DbHealthCheck {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            duration_ms: 0,
            details: None,
        }
    }

    fn fail(&mut self, details: impl Into<String>) {
        self.passed = false;
        self.details = Some(details.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DbHealthOffender {
    pub table: String,
    #[ts(type = "number")]
    pub rowid: i64,
    pub message: String,
}

/// Store integrity plus the state of every text index.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DbHealthReport {
    pub status: DbHealthStatus,
    pub checks: Vec<DbHealthCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offenders: Vec<DbHealthOffender>,
    pub indexes: Vec<IndexStats>,
    pub schema_version: String,
    pub schema_hash: String,
    pub app_version: String,
    pub generated_at: String,
}

impl DbHealthReport {
    pub fn is_ok(&self) -> bool {
        self.status == DbHealthStatus::Ok
    }
}

pub async fn run_health_checks(store: &Store) -> AppResult<DbHealthReport> {
    let pool = store.pool();
    let mut conn = pool.acquire().await?;

    let mut checks = Vec::new();
    checks.push(run_pragma_check(&mut conn, "quick_check", "PRAGMA quick_check;").await);
    checks.push(
        run_pragma_check(&mut conn, "integrity_check", "PRAGMA integrity_check(1);").await,
    );
    let (fk_check, offenders) = run_foreign_key_check(&mut conn).await;
    checks.push(fk_check);
    checks.push(run_journal_check(&mut conn).await);

    let schema_hash = manifest::schema_hash_on(&mut conn)
        .await
        .unwrap_or_default();
    drop(conn);

    let indexes = IndexManager::new(store.clone()).verify_integrity().await;
    let mut index_check = DbHealthCheck::named("text_indexes");
    let unhealthy: Vec<&str> = indexes
        .iter()
        .filter(|stats| !stats.healthy)
        .map(|stats| stats.kind.as_str())
        .collect();
    if !unhealthy.is_empty() {
        index_check.fail(format!("unhealthy: {}", unhealthy.join(", ")));
    }
    checks.push(index_check);

    let schema_version = migrate::schema_version(pool).await.unwrap_or_default();
    let status = if checks.iter().all(|check| check.passed) {
        DbHealthStatus::Ok
    } else {
        DbHealthStatus::Error
    };

    let report = DbHealthReport {
        status,
        checks,
        offenders,
        indexes,
        schema_version,
        schema_hash,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    if report.is_ok() {
        info!(target: "kiosk", event = "db_health_ok");
    } else {
        let failed: Vec<&str> = report
            .checks
            .iter()
            .filter(|check| !check.passed)
            .map(|check| check.name.as_str())
            .collect();
        warn!(target: "kiosk", event = "db_health_failed", failed = %failed.join(","));
    }
    Ok(report)
}

async fn run_pragma_check(
    conn: &mut PoolConnection<Sqlite>,
    name: &str,
    sql: &str,
) -> DbHealthCheck {
    let start = Instant::now();
    let mut check = DbHealthCheck::named(name);
    match sqlx::query_scalar::<_, String>(sql)
        .fetch_one(conn.as_mut())
        .await
    {
        Ok(result) if result.eq_ignore_ascii_case("ok") => {}
        Ok(result) => check.fail(result),
        Err(err) => check.fail(format!("{name} failed: {err}")),
    }
    check.duration_ms = start.elapsed().as_millis() as u64;
    check
}

async fn run_foreign_key_check(
    conn: &mut PoolConnection<Sqlite>,
) -> (DbHealthCheck, Vec<DbHealthOffender>) {
    let start = Instant::now();
    let mut check = DbHealthCheck::named("foreign_key_check");
    let mut offenders = Vec::new();

    match sqlx::query("PRAGMA foreign_key_check;")
        .fetch_all(conn.as_mut())
        .await
    {
        Ok(rows) => {
            offenders.extend(rows.iter().filter_map(offender_from_row));
            if !offenders.is_empty() {
                check.fail(format!("{} foreign key violation(s)", offenders.len()));
            }
        }
        Err(err) => check.fail(format!("foreign_key_check failed: {err}")),
    }

    check.duration_ms = start.elapsed().as_millis() as u64;
    (check, offenders)
}

fn offender_from_row(row: &SqliteRow) -> Option<DbHealthOffender> {
    let table: String = row.try_get("table").ok()?;
    let rowid: i64 = row.try_get("rowid").ok()?;
    let parent: Option<String> = row.try_get("parent").ok();
    let message = match parent {
        Some(parent) => format!("missing parent '{parent}'"),
        None => "foreign key violation".to_string(),
    };
    Some(DbHealthOffender {
        table,
        rowid,
        message,
    })
}

async fn run_journal_check(conn: &mut PoolConnection<Sqlite>) -> DbHealthCheck {
    let start = Instant::now();
    let mut check = DbHealthCheck::named("journal_mode");
    match sqlx::query_scalar::<_, String>("PRAGMA journal_mode;")
        .fetch_one(conn.as_mut())
        .await
    {
        Ok(mode) if mode.eq_ignore_ascii_case(EXPECTED_JOURNAL_MODE) => {
            check.details = Some(format!("journal_mode={mode}"));
        }
        Ok(mode) => check.fail(format!(
            "journal_mode mismatch: expected {EXPECTED_JOURNAL_MODE}, got {mode}"
        )),
        Err(err) => check.fail(format!("journal_mode query failed: {err}")),
    }
    check.duration_ms = start.elapsed().as_millis() as u64;
    check
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_store_is_healthy() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path().join("kiosk.sqlite3")).await.unwrap();
        let report = run_health_checks(&store).await.unwrap();
        assert!(report.is_ok(), "{report:?}");
        assert_eq!(report.indexes.len(), 4);
        assert!(!report.schema_version.is_empty());
        assert!(!report.schema_hash.is_empty());
    }

    #[tokio::test]
    async fn missing_index_fails_the_report() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path().join("kiosk.sqlite3")).await.unwrap();
        sqlx::query("DROP TABLE faculty_fts")
            .execute(store.pool())
            .await
            .unwrap();
        let report = run_health_checks(&store).await.unwrap();
        assert_eq!(report.status, DbHealthStatus::Error);
        let check = report
            .checks
            .iter()
            .find(|c| c.name == "text_indexes")
            .unwrap();
        assert_eq!(check.details.as_deref(), Some("unhealthy: faculty"));
    }
}
