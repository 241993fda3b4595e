//! Maintenance of the per-kind FTS5 indexes.
//!
//! Per-kind state moves `Healthy -> Unhealthy -> Rebuilding -> Healthy`,
//! or back to `Unhealthy` when a repair attempt fails. Nothing retries on
//! its own; callers decide when to verify or repair.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ts_rs::TS;

use crate::entities::EntityKind;
use crate::state::Store;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum IndexState {
    Unknown,
    Healthy,
    Unhealthy,
    Rebuilding,
}

/// Snapshot of one index, recomputed on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct IndexStats {
    pub kind: EntityKind,
    #[ts(type = "number")]
    pub record_count: i64,
    #[ts(type = "number")]
    pub indexed_count: i64,
    #[ts(type = "number")]
    pub index_size_bytes: i64,
    pub healthy: bool,
    pub last_rebuild: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OptimizeReport {
    pub success: bool,
    pub tables_optimized: Vec<EntityKind>,
    pub errors: Vec<String>,
    #[ts(type = "number")]
    pub time_taken_ms: u64,
}

#[derive(Clone)]
pub struct IndexManager {
    store: Store,
    states: Arc<Mutex<BTreeMap<EntityKind, IndexState>>>,
}

impl IndexManager {
    pub fn new(store: Store) -> Self {
        let states = EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, IndexState::Unknown))
            .collect();
        Self {
            store,
            states: Arc::new(Mutex::new(states)),
        }
    }

    pub fn state(&self, kind: EntityKind) -> IndexState {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .copied()
            .unwrap_or(IndexState::Unknown)
    }

    pub fn states(&self) -> BTreeMap<EntityKind, IndexState> {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, kind: EntityKind, state: IndexState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, state);
    }

    /// Re-derives the index from the base table for each kind, then
    /// refreshes planner statistics.
    pub async fn rebuild(&self, kinds: Option<&[EntityKind]>) -> AppResult<()> {
        for kind in EntityKind::resolve(kinds) {
            self.set_state(kind, IndexState::Rebuilding);
            match self.rebuild_one(kind).await {
                Ok(()) => self.set_state(kind, IndexState::Healthy),
                Err(err) => {
                    self.set_state(kind, IndexState::Unhealthy);
                    return Err(err.with_context("kind", kind.as_str()));
                }
            }
        }
        sqlx::query("PRAGMA optimize;")
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    async fn rebuild_one(&self, kind: EntityKind) -> AppResult<()> {
        let start = Instant::now();
        let fts = kind.fts_table();
        sqlx::query(&format!("INSERT INTO {fts}({fts}) VALUES('rebuild')"))
            .execute(self.store.pool())
            .await?;
        self.touch_rebuild(kind).await?;
        info!(
            target: "kiosk",
            event = "index_rebuilt",
            kind = %kind,
            elapsed_ms = start.elapsed().as_millis() as u64
        );
        Ok(())
    }

    async fn touch_rebuild(&self, kind: EntityKind) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO search_index_meta (kind, last_rebuild_at) VALUES (?, ?)
             ON CONFLICT(kind) DO UPDATE SET last_rebuild_at = excluded.last_rebuild_at",
        )
        .bind(kind.as_str())
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Merges index segments. A failing kind does not stop the others.
    pub async fn optimize(&self, kinds: Option<&[EntityKind]>) -> OptimizeReport {
        let start = Instant::now();
        let mut tables_optimized = Vec::new();
        let mut errors = Vec::new();

        for kind in EntityKind::resolve(kinds) {
            let fts = kind.fts_table();
            match sqlx::query(&format!("INSERT INTO {fts}({fts}) VALUES('optimize')"))
                .execute(self.store.pool())
                .await
            {
                Ok(_) => tables_optimized.push(kind),
                Err(err) => {
                    warn!(target: "kiosk", event = "index_optimize_failed", kind = %kind, error = %err);
                    errors.push(format!("{kind}: {err}"));
                }
            }
        }

        let report = OptimizeReport {
            success: errors.is_empty(),
            tables_optimized,
            errors,
            time_taken_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            target: "kiosk",
            event = "index_optimized",
            optimized = report.tables_optimized.len(),
            failed = report.errors.len(),
            elapsed_ms = report.time_taken_ms
        );
        report
    }

    /// Compares base and index row counts and runs a probe query per kind.
    pub async fn verify_integrity(&self) -> Vec<IndexStats> {
        let mut out = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let stats = self.stats_for(kind).await;
            self.set_state(
                kind,
                if stats.healthy {
                    IndexState::Healthy
                } else {
                    IndexState::Unhealthy
                },
            );
            out.push(stats);
        }
        out
    }

    pub async fn stats_for(&self, kind: EntityKind) -> IndexStats {
        let pool = self.store.pool();
        let fts = kind.fts_table();
        let mut errors: Vec<String> = Vec::new();

        let record_count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {}",
            kind.table()
        ))
        .fetch_one(pool)
        .await
        .unwrap_or_else(|err| {
            errors.push(format!("base count: {err}"));
            -1
        });

        let indexed_count =
            sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {fts}_docsize"))
                .fetch_one(pool)
                .await
                .unwrap_or_else(|err| {
                    errors.push(format!("index count: {err}"));
                    -1
                });

        let index_size_bytes = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COALESCE(SUM(LENGTH(block)), 0) FROM {fts}_data"
        ))
        .fetch_one(pool)
        .await
        .unwrap_or_else(|err| {
            errors.push(format!("index size: {err}"));
            0
        });

        if let Err(err) = sqlx::query(&format!(
            "SELECT rowid FROM {fts} WHERE {fts} MATCH 'a*' LIMIT 1"
        ))
        .fetch_optional(pool)
        .await
        {
            errors.push(format!("probe: {err}"));
        }

        let last_rebuild: Option<String> =
            sqlx::query_scalar("SELECT last_rebuild_at FROM search_index_meta WHERE kind = ?")
                .bind(kind.as_str())
                .fetch_optional(pool)
                .await
                .ok()
                .flatten();

        if errors.is_empty() && record_count != indexed_count {
            errors.push(format!(
                "count mismatch: {record_count} rows, {indexed_count} indexed"
            ));
        }

        let healthy = errors.is_empty();
        if !healthy {
            warn!(target: "kiosk", event = "index_unhealthy", kind = %kind, errors = %errors.join("; "));
        }

        IndexStats {
            kind,
            record_count,
            indexed_count,
            index_size_bytes,
            healthy,
            last_rebuild,
            error: if healthy { None } else { Some(errors.join("; ")) },
        }
    }

    /// Drops, recreates and rebuilds every unhealthy index. Returns the
    /// kinds that came back healthy; failures are logged, not raised.
    pub async fn repair_corrupted(&self) -> Vec<EntityKind> {
        let mut repaired = Vec::new();
        for stats in self.verify_integrity().await {
            if stats.healthy {
                continue;
            }
            let kind = stats.kind;
            self.set_state(kind, IndexState::Rebuilding);
            info!(target: "kiosk", event = "index_repair_start", kind = %kind);

            let outcome = match self.recreate(kind).await {
                Ok(()) => {
                    let after = self.stats_for(kind).await;
                    if after.healthy {
                        Ok(())
                    } else {
                        Err(AppError::new(
                            "SEARCH/REPAIR_INCOMPLETE",
                            after.error.unwrap_or_else(|| "still unhealthy".into()),
                        ))
                    }
                }
                Err(err) => Err(err),
            };

            match outcome {
                Ok(()) => {
                    self.set_state(kind, IndexState::Healthy);
                    info!(target: "kiosk", event = "index_repaired", kind = %kind);
                    repaired.push(kind);
                }
                Err(err) => {
                    self.set_state(kind, IndexState::Unhealthy);
                    warn!(target: "kiosk", event = "index_repair_failed", kind = %kind, error = %err);
                }
            }
        }
        repaired
    }

    async fn recreate(&self, kind: EntityKind) -> AppResult<()> {
        let schema = kind.schema();
        let mut tx = self.store.pool().begin().await?;
        let result: AppResult<()> = async {
            for stmt in schema.fts_drop_statements() {
                sqlx::query(&stmt).execute(&mut *tx).await?;
            }
            for stmt in schema.fts_create_statements() {
                sqlx::query(&stmt).execute(&mut *tx).await?;
            }
            let fts = kind.fts_table();
            sqlx::query(&format!("INSERT INTO {fts}({fts}) VALUES('rebuild')"))
                .execute(&mut *tx)
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                tx.commit().await?;
                self.touch_rebuild(kind).await
            }
            Err(err) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::error!(target: "kiosk", event = "db_tx_rollback_failed", error = %rb);
                }
                Err(err)
            }
        }
    }
}
