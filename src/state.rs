use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::error::codes;
use crate::{db, migrate, AppError, AppResult};

/// Shared handle to the record store.
///
/// Cloning is cheap; every component receives its own clone at
/// construction. The pool is closed by whoever opened the store.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    db_path: Arc<PathBuf>,
    maintenance: Arc<AtomicBool>,
}

impl Store {
    /// Opens (creating if needed) the store at `db_path`, applies migrations
    /// and makes sure every text index exists.
    pub async fn open(db_path: impl AsRef<Path>) -> AppResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let pool = db::open_sqlite_pool(&db_path).await?;
        migrate::apply_migrations(&pool)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "apply_migrations"))?;
        db::ensure_text_indexes(&pool).await?;
        Ok(Self::from_pool(pool, db_path))
    }

    pub fn from_pool(pool: SqlitePool, db_path: PathBuf) -> Self {
        Self {
            pool,
            db_path: Arc::new(db_path),
            maintenance: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub fn begin_maintenance(&self) -> AppResult<MaintenanceGuard> {
        MaintenanceGuard::begin(self.maintenance.clone())
    }

    pub fn maintenance_active(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Held for the duration of an import or restore; released on drop.
pub struct MaintenanceGuard {
    flag: Arc<AtomicBool>,
}

impl MaintenanceGuard {
    fn begin(flag: Arc<AtomicBool>) -> AppResult<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::new(
                codes::MAINTENANCE_ACTIVE,
                "Database maintenance is already running.",
            ));
        }
        Ok(Self { flag })
    }
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn maintenance_guard_is_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path().join("kiosk.sqlite3")).await.unwrap();

        let guard = store.begin_maintenance().unwrap();
        assert!(store.maintenance_active());
        let err = store.begin_maintenance().err().unwrap();
        assert_eq!(err.code(), codes::MAINTENANCE_ACTIVE);

        drop(guard);
        assert!(!store.maintenance_active());
        assert!(store.begin_maintenance().is_ok());
        store.close().await;
    }

    #[tokio::test]
    async fn open_creates_parent_and_indexes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("kiosk.sqlite3");
        let store = Store::open(&path).await.unwrap();
        assert!(path.exists());

        let fts: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name LIKE '%_fts'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(fts, 4);
        store.close().await;
    }
}
