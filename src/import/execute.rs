use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::{error, info, warn};
use ts_rs::TS;

use super::transform::{transform_row, CellValue, PreparedRow};
use super::validator::validate_rows;
use super::{ImportMode, ImportRow};
use crate::db::backup::{BackupManager, CreateOptions};
use crate::entities::EntityKind;
use crate::search::IndexHook;
use crate::state::Store;
use crate::AppError;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{0}")]
    Busy(String),
    #[error("failed to read CSV input: {0}")]
    Csv(#[from] csv::Error),
    #[error("backup before import failed: {0}")]
    Backup(AppError),
    #[error("row {row}: {message}")]
    Transform { row: usize, message: String },
    #[error("database error while loading {table}: {source}")]
    Database {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("index rebuild failed: {0}")]
    Rebuild(AppError),
    #[error("restoring backup {backup_id} failed: {source}")]
    Restore {
        backup_id: String,
        #[source]
        source: AppError,
    },
}

/// Outcome of one import attempt. Never thrown; failures are listed in
/// `errors` and the pre-import backup id is kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ImportResult {
    pub success: bool,
    pub kind: EntityKind,
    pub mode: ImportMode,
    #[ts(type = "number")]
    pub records_imported: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub backup_id: Option<String>,
    /// The store was rolled back to `backup_id` after a failure.
    pub restored: bool,
    #[ts(type = "number")]
    pub duration_ms: u64,
}

impl ImportResult {
    fn new(kind: EntityKind, mode: ImportMode) -> Self {
        Self {
            success: false,
            kind,
            mode,
            records_imported: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            backup_id: None,
            restored: false,
            duration_ms: 0,
        }
    }

    fn finish(mut self, start: Instant) -> Self {
        self.duration_ms = start.elapsed().as_millis() as u64;
        self
    }
}

#[derive(Clone)]
pub struct ImportManager {
    store: Store,
    backups: BackupManager,
    hook: Arc<dyn IndexHook>,
}

impl ImportManager {
    pub fn new(store: Store, backups: BackupManager, hook: Arc<dyn IndexHook>) -> Self {
        Self {
            store,
            backups,
            hook,
        }
    }

    /// Reads a header row plus records with the `csv` crate, then imports.
    /// Unreadable input fails before any backup is taken.
    pub async fn import_csv<R: Read>(
        &self,
        kind: EntityKind,
        reader: R,
        mode: ImportMode,
    ) -> ImportResult {
        let start = Instant::now();
        match read_csv_rows(reader) {
            Ok(rows) => self.import_records(kind, &rows, mode).await,
            Err(err) => {
                warn!(target: "kiosk", event = "import_csv_unreadable", kind = %kind, error = %err);
                let mut result = ImportResult::new(kind, mode);
                result.errors.push(err.to_string());
                result.finish(start)
            }
        }
    }

    pub async fn import_records(
        &self,
        kind: EntityKind,
        rows: &[ImportRow],
        mode: ImportMode,
    ) -> ImportResult {
        let start = Instant::now();
        let mut result = ImportResult::new(kind, mode);

        let _guard = match self.store.begin_maintenance() {
            Ok(guard) => guard,
            Err(err) => {
                result
                    .errors
                    .push(ImportError::Busy(err.message().to_string()).to_string());
                return result.finish(start);
            }
        };

        info!(target: "kiosk", event = "import_start", kind = %kind, mode = %mode, rows = rows.len());

        let report = validate_rows(kind, rows, mode);
        result.warnings = report.warnings.clone();
        if !report.is_valid() {
            info!(
                target: "kiosk",
                event = "import_validation_failed",
                kind = %kind,
                errors = report.total_errors
            );
            result.errors = report.errors;
            return result.finish(start);
        }

        let backup_id = match self
            .backups
            .create(
                None,
                CreateOptions::automatic(format!("Before {mode} import of {kind}")),
            )
            .await
        {
            Ok(id) => id,
            Err(err) => {
                error!(target: "kiosk", event = "import_backup_failed", kind = %kind, error = %err);
                result.errors.push(ImportError::Backup(err).to_string());
                return result.finish(start);
            }
        };
        result.backup_id = Some(backup_id.clone());

        match self.apply(kind, rows, mode).await {
            Ok(count) => {
                result.success = true;
                result.records_imported = count;
                info!(
                    target: "kiosk",
                    event = "import_complete",
                    kind = %kind,
                    records = count,
                    backup_id = %backup_id
                );
            }
            Err(err) => {
                warn!(target: "kiosk", event = "import_failed", kind = %kind, error = %err);
                result.errors.push(err.to_string());
                match self.backups.restore_unguarded(&backup_id, false).await {
                    Ok(_) => {
                        result.restored = true;
                        info!(target: "kiosk", event = "import_rolled_back", kind = %kind, backup_id = %backup_id);
                    }
                    Err(source) => {
                        error!(
                            target: "kiosk",
                            event = "import_restore_failed",
                            kind = %kind,
                            backup_id = %backup_id,
                            error = %source
                        );
                        result.errors.push(
                            ImportError::Restore {
                                backup_id: backup_id.clone(),
                                source,
                            }
                            .to_string(),
                        );
                    }
                }
                self.hook.invalidate();
            }
        }

        result.finish(start)
    }

    async fn apply(
        &self,
        kind: EntityKind,
        rows: &[ImportRow],
        mode: ImportMode,
    ) -> Result<u64, ImportError> {
        let prepared = rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                transform_row(kind, row).map_err(|message| ImportError::Transform {
                    row: index + 1,
                    message,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = self.load(kind, &prepared, mode).await?;
        self.hook.rebuild(kind).await.map_err(ImportError::Rebuild)?;
        Ok(count)
    }

    async fn load(
        &self,
        kind: EntityKind,
        rows: &[PreparedRow],
        mode: ImportMode,
    ) -> Result<u64, ImportError> {
        let table = kind.table();
        let db_err = |source| ImportError::Database { table, source };

        let mut tx = self.store.pool().begin().await.map_err(db_err)?;
        info!(target: "kiosk", event = "db_tx_begin", table);

        match write_rows(&mut tx, kind, rows, mode).await {
            Ok(count) => {
                tx.commit().await.map_err(db_err)?;
                info!(target: "kiosk", event = "db_tx_commit", table, rows = count);
                Ok(count)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(target: "kiosk", event = "db_tx_rollback_failed", table, error = %rollback_err);
                } else {
                    warn!(target: "kiosk", event = "db_tx_rollback", table);
                }
                Err(db_err(err))
            }
        }
    }
}

async fn write_rows(
    tx: &mut Transaction<'_, Sqlite>,
    kind: EntityKind,
    rows: &[PreparedRow],
    mode: ImportMode,
) -> Result<u64, sqlx::Error> {
    let schema = kind.schema();
    if mode == ImportMode::Replace {
        sqlx::query(&format!("DELETE FROM {}", schema.table))
            .execute(&mut **tx)
            .await?;
    }

    let sql = insert_sql(kind, mode);
    let mut written = 0_u64;
    for row in rows {
        let mut query = sqlx::query(&sql).bind(row.id);
        for cell in &row.values {
            query = match cell {
                CellValue::Null => query.bind(None::<String>),
                CellValue::Text(value) => query.bind(value.as_str()),
                CellValue::Integer(value) => query.bind(*value),
            };
        }
        query.execute(&mut **tx).await?;
        written += 1;
    }
    Ok(written)
}

fn insert_sql(kind: EntityKind, mode: ImportMode) -> String {
    let schema = kind.schema();
    let columns = schema.columns.join(", ");
    let placeholders = vec!["?"; schema.columns.len() + 1].join(", ");
    let mut sql = format!(
        "INSERT INTO {} (id, {columns}) VALUES ({placeholders})",
        schema.table
    );
    if mode == ImportMode::Merge {
        let updates = schema
            .columns
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ON CONFLICT(id) DO UPDATE SET {updates}"));
    }
    sql
}

/// Header names are trimmed and lowercased; missing cells read as empty.
fn read_csv_rows<R: Read>(reader: R) -> Result<Vec<ImportRow>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_ascii_lowercase())
        .collect();

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let row: ImportRow = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !header.is_empty())
            .map(|(index, header)| (header.clone(), record.get(index).unwrap_or("").to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionConfig;
    use crate::AppResult;
    use futures::future::BoxFuture;

    struct CountingHook {
        fail: bool,
    }

    impl IndexHook for CountingHook {
        fn rebuild<'a>(&'a self, _kind: EntityKind) -> BoxFuture<'a, AppResult<()>> {
            Box::pin(async move {
                if self.fail {
                    Err(AppError::new("TEST/REBUILD", "rebuild exploded"))
                } else {
                    Ok(())
                }
            })
        }

        fn invalidate(&self) {}
    }

    async fn manager() -> (tempfile::TempDir, Store, ImportManager) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path().join("kiosk.sqlite3")).await.unwrap();
        let backups = BackupManager::new(store.clone(), RetentionConfig::default());
        let import = ImportManager::new(
            store.clone(),
            backups,
            Arc::new(CountingHook { fail: false }),
        );
        (tmp, store, import)
    }

    async fn count(store: &Store, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    const FACULTY_CSV: &str = "\u{feff}Full_Name,department,position,favourite_colour\n\
        Dr. Alice Ng,Science,Teacher,blue\n\
        Bob Ray,Music,,green\n";

    #[test]
    fn reads_csv_headers_case_insensitively() {
        let rows = read_csv_rows(FACULTY_CSV.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("full_name").map(String::as_str), Some("Dr. Alice Ng"));
        assert_eq!(rows[1].get("position").map(String::as_str), Some(""));
    }

    #[test]
    fn merge_sql_upserts() {
        let sql = insert_sql(EntityKind::Photos, ImportMode::Merge);
        assert!(sql.starts_with("INSERT INTO photos (id, title,"));
        assert!(sql.contains("ON CONFLICT(id) DO UPDATE SET title = excluded.title"));
        assert!(!insert_sql(EntityKind::Photos, ImportMode::Replace).contains("CONFLICT"));
    }

    #[tokio::test]
    async fn imports_csv_and_takes_a_backup() {
        let (_tmp, store, import) = manager().await;
        let result = import
            .import_csv(EntityKind::Faculty, FACULTY_CSV.as_bytes(), ImportMode::Replace)
            .await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.records_imported, 2);
        assert_eq!(result.warnings, vec!["Ignoring unknown column 'favourite_colour'"]);
        assert!(result.backup_id.is_some());
        assert_eq!(count(&store, "faculty").await, 2);
    }

    #[tokio::test]
    async fn invalid_rows_leave_store_and_backups_untouched() {
        let (_tmp, store, import) = manager().await;
        let csv = "full_name,department\nAlice,\n";
        let result = import
            .import_csv(EntityKind::Faculty, csv.as_bytes(), ImportMode::Replace)
            .await;
        assert!(!result.success);
        assert!(result.backup_id.is_none());
        assert!(result.errors[0].contains("'department'"));
        assert_eq!(count(&store, "faculty").await, 0);
    }

    #[tokio::test]
    async fn failed_rebuild_restores_previous_rows() {
        let (_tmp, store, import) = manager().await;
        let first = import
            .import_csv(EntityKind::Faculty, FACULTY_CSV.as_bytes(), ImportMode::Replace)
            .await;
        assert!(first.success);

        let failing = ImportManager::new(
            store.clone(),
            BackupManager::new(store.clone(), RetentionConfig::default()),
            Arc::new(CountingHook { fail: true }),
        );
        let csv = "full_name,department\nCarol Q,Art\n";
        let result = failing
            .import_csv(EntityKind::Faculty, csv.as_bytes(), ImportMode::Replace)
            .await;
        assert!(!result.success);
        assert!(result.restored);
        assert_eq!(result.records_imported, 0);
        assert!(result.errors[0].contains("rebuild exploded"));
        assert_eq!(count(&store, "faculty").await, 2);
    }

    #[tokio::test]
    async fn concurrent_maintenance_is_refused() {
        let (_tmp, store, import) = manager().await;
        let _held = store.begin_maintenance().unwrap();
        let result = import
            .import_csv(EntityKind::Faculty, FACULTY_CSV.as_bytes(), ImportMode::Replace)
            .await;
        assert!(!result.success);
        assert!(result.backup_id.is_none());
    }

    #[tokio::test]
    async fn merge_updates_in_place() {
        let (_tmp, store, import) = manager().await;
        let seed = "id,title,year\n1,Homecoming,1990\n2,Prom,1991\n";
        assert!(
            import
                .import_csv(EntityKind::Photos, seed.as_bytes(), ImportMode::Replace)
                .await
                .success
        );
        let update = "id,title,year\n2,Prom Night,1991\n3,Graduation,1991\n";
        let result = import
            .import_csv(EntityKind::Photos, update.as_bytes(), ImportMode::Merge)
            .await;
        assert!(result.success, "{result:?}");
        assert_eq!(count(&store, "photos").await, 3);
        let title: String = sqlx::query_scalar("SELECT title FROM photos WHERE id = 2")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(title, "Prom Night");
    }
}
