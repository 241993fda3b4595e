use std::collections::BTreeMap;

use kiosk_lib::search::SearchFilters;
use kiosk_lib::{CreateOptions, Engine, EntityKind, ErrorKind, ImportMode};

#[path = "util.rs"]
mod util;

use util::{alumni, photo, temp_engine};

async fn snapshot_counts(engine: &Engine) -> BTreeMap<EntityKind, i64> {
    kiosk_lib::db::record_counts(engine.store().pool())
        .await
        .unwrap()
        .into_iter()
        .collect()
}

async fn probe(engine: &Engine) -> Vec<(EntityKind, i64)> {
    engine
        .search()
        .search_all("homecoming", &SearchFilters::default(), 20)
        .await
        .into_iter()
        .map(|hit| (hit.kind, hit.id))
        .collect()
}

#[tokio::test]
async fn restore_of_fresh_backup_is_observably_identical() {
    let (_dir, engine) = temp_engine().await;
    let imports = engine.imports();
    assert!(
        imports
            .import_records(
                EntityKind::Photos,
                &[photo("Homecoming parade", 1998, "events"), photo("Graduation", 1998, "")],
                ImportMode::Replace,
            )
            .await
            .success
    );
    assert!(
        imports
            .import_records(
                EntityKind::Alumni,
                &[alumni("Homecoming", "Queen", 1998)],
                ImportMode::Replace,
            )
            .await
            .success
    );

    let counts_before = snapshot_counts(&engine).await;
    let probe_before = probe(&engine).await;
    assert_eq!(probe_before.len(), 2);

    let id = engine
        .backups()
        .create(Some("roundtrip"), CreateOptions::default())
        .await
        .unwrap();
    assert!(engine.backups().verify(&id).await.unwrap());

    // Diverge, then come back.
    assert!(
        imports
            .import_records(
                EntityKind::Photos,
                &[photo("Senior trip", 1999, "")],
                ImportMode::Replace,
            )
            .await
            .success
    );
    assert_ne!(snapshot_counts(&engine).await, counts_before);

    let outcome = engine.restore_backup(&id).await.unwrap();
    assert_eq!(outcome.restored, id);
    let pre = outcome.pre_restore_backup.expect("pre-restore snapshot");
    assert!(engine.backups().get_info(&pre).await.unwrap().is_some());

    assert_eq!(snapshot_counts(&engine).await, counts_before);
    assert_eq!(probe(&engine).await, probe_before);
    assert!(engine.health().await.unwrap().is_ok());
    engine.close().await;
}

#[tokio::test]
async fn backup_metadata_and_errors() {
    let (_dir, engine) = temp_engine().await;
    let id = engine
        .backups()
        .create(
            None,
            CreateOptions {
                description: Some("before yearbook load".into()),
                ..CreateOptions::default()
            },
        )
        .await
        .unwrap();

    let info = engine.backups().get_info(&id).await.unwrap().unwrap();
    assert_eq!(info.description.as_deref(), Some("before yearbook load"));
    assert!(!info.automatic);
    assert!(info.has_manifest);
    assert_eq!(info.record_counts.get("alumni"), Some(&0));

    let err = engine.restore_backup("no-such-backup").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackupNotFound);
    assert!(engine.backups().get_info("no-such-backup").await.unwrap().is_none());

    engine.backups().delete(&id).await.unwrap();
    assert!(engine.backups().list().await.unwrap().is_empty());
    engine.close().await;
}

#[tokio::test]
async fn retention_caps_snapshot_count() {
    let (_dir, engine) = temp_engine().await;
    for year in 1990..1998 {
        let result = engine
            .imports()
            .import_records(
                EntityKind::Alumni,
                &[alumni("Pat", "Doe", year)],
                ImportMode::Replace,
            )
            .await;
        assert!(result.success, "{:?}", result.errors);
    }
    let backups = engine.backups().list().await.unwrap();
    assert_eq!(backups.len(), engine.backups().retention().max_count);
    engine.close().await;
}

#[tokio::test]
async fn rebuilding_twice_yields_identical_index_stats() {
    let (_dir, engine) = temp_engine().await;
    assert!(
        engine
            .imports()
            .import_records(
                EntityKind::Alumni,
                &[alumni("Ada", "Lovelace", 1990), alumni("Alan", "Turing", 1991)],
                ImportMode::Replace,
            )
            .await
            .success
    );
    let index = engine.search().index();

    index.rebuild(None).await.unwrap();
    let first = index.verify_integrity().await;
    index.rebuild(None).await.unwrap();
    let second = index.verify_integrity().await;

    let summary = |stats: &[kiosk_lib::search::IndexStats]| {
        stats
            .iter()
            .map(|s| (s.kind, s.healthy, s.record_count, s.indexed_count))
            .collect::<Vec<_>>()
    };
    assert!(first.iter().all(|s| s.healthy));
    assert_eq!(summary(&first), summary(&second));
    engine.close().await;
}
