//! Search and data-integrity engine for the archive kiosk.
//!
//! [`Engine`] wires the record store to its three services: ranked search
//! with a degraded fallback, atomic bulk import, and snapshot backups.

use std::path::Path;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod import;
pub mod logging;
pub mod migrate;
pub mod search;
pub mod state;

pub use config::{RetentionConfig, SearchConfig};
pub use db::backup::{BackupManager, BackupMetadata, CreateOptions, RestoreOutcome};
pub use db::health::{run_health_checks, DbHealthReport, DbHealthStatus};
pub use entities::{EntityKind, EntityRecord, PublicationType};
pub use error::{AppError, AppResult, ErrorKind};
pub use import::{ImportManager, ImportMode, ImportResult};
pub use logging::init_logging;
pub use search::{IndexHook, SearchManager};
pub use state::Store;

/// Everything a front end needs, opened against one database file.
#[derive(Clone)]
pub struct Engine {
    store: Store,
    search: Arc<SearchManager>,
    backups: BackupManager,
    imports: ImportManager,
}

impl Engine {
    /// Opens the store with settings taken from the environment.
    pub async fn open(db_path: impl AsRef<Path>) -> AppResult<Self> {
        Self::open_with(db_path, SearchConfig::from_env(), RetentionConfig::from_env()).await
    }

    pub async fn open_with(
        db_path: impl AsRef<Path>,
        search: SearchConfig,
        retention: RetentionConfig,
    ) -> AppResult<Self> {
        let store = Store::open(db_path).await?;
        let search = Arc::new(SearchManager::new(store.clone(), search));
        let backups = BackupManager::new(store.clone(), retention);
        let hook: Arc<dyn IndexHook> = search.clone();
        let imports = ImportManager::new(store.clone(), backups.clone(), hook);
        tracing::info!(
            target: "kiosk",
            event = "engine_ready",
            path = %store.db_path().display()
        );
        Ok(Self {
            store,
            search,
            backups,
            imports,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn search(&self) -> &SearchManager {
        &self.search
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn imports(&self) -> &ImportManager {
        &self.imports
    }

    /// Restores a snapshot and drops any cached results from before it.
    pub async fn restore_backup(&self, id: &str) -> AppResult<RestoreOutcome> {
        let outcome = self.backups.restore(id).await;
        self.search.clear_cache();
        outcome
    }

    pub async fn health(&self) -> AppResult<DbHealthReport> {
        run_health_checks(&self.store).await
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engine_opens_healthy_store() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::open_with(
            tmp.path().join("kiosk.sqlite3"),
            SearchConfig::default(),
            RetentionConfig::default(),
        )
        .await
        .unwrap();

        let report = engine.health().await.unwrap();
        assert!(report.is_ok(), "{report:?}");
        assert!(engine.backups().list().await.unwrap().is_empty());
        engine.close().await;
    }
}
