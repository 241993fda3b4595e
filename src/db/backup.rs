//! Point-in-time snapshots of the whole store.
//!
//! Each snapshot lives in `<data dir>/backups/<id>/` as a plain SQLite file
//! plus an optional `manifest.json`. Snapshots are taken and restored with
//! the SQLite online backup API so the live pool never has to be closed.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use fs2::available_space;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::backup::{Backup, StepResult};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tokio::task;
use ts_rs::TS;

use super::manifest::{self, BackupManifest};
use crate::config::{RetentionConfig, DB_FILE_NAME};
use crate::entities::EntityKind;
use crate::error::codes;
use crate::state::Store;
use crate::{db, migrate, AppError, AppResult};

const BACKUP_DIR_NAME: &str = "backups";
const PARTIAL_SUFFIX: &str = ".partial";
const REQUIRED_FREE_MULTIPLIER: f64 = 1.2;
const MIN_REQUIRED_FREE_BYTES: u64 = 1_000_000;
const ID_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const MAX_SLUG_LEN: usize = 40;
const BUSY_RETRIES: u32 = 20;
const BUSY_PAUSE: Duration = Duration::from_millis(50);

static BACKUP_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").expect("static regex"));

/// What operators and the UI see for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BackupMetadata {
    pub id: String,
    pub name: String,
    pub created_at: String,
    #[ts(type = "number")]
    pub size_bytes: u64,
    pub description: Option<String>,
    pub schema_version: String,
    pub automatic: bool,
    #[ts(type = "Record<string, number>")]
    pub record_counts: std::collections::BTreeMap<String, i64>,
    /// False when the snapshot was taken with metadata suppressed; the
    /// other fields are then derived from the directory itself.
    pub has_manifest: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub description: Option<String>,
    pub automatic: bool,
    /// Write the snapshot without a `manifest.json`.
    pub skip_metadata: bool,
}

impl CreateOptions {
    pub fn automatic(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            automatic: true,
            skip_metadata: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RestoreOutcome {
    pub restored: String,
    /// Snapshot of the state that was overwritten.
    pub pre_restore_backup: Option<String>,
}

#[derive(Clone)]
pub struct BackupManager {
    store: Store,
    retention: RetentionConfig,
}

impl BackupManager {
    pub fn new(store: Store, retention: RetentionConfig) -> Self {
        Self { store, retention }
    }

    pub fn root(&self) -> AppResult<PathBuf> {
        backup_root(self.store.db_path())
    }

    pub fn retention(&self) -> RetentionConfig {
        self.retention
    }

    /// Takes a snapshot and returns its identifier.
    pub async fn create(&self, name: Option<&str>, opts: CreateOptions) -> AppResult<String> {
        self.create_protecting(name, opts, &[]).await
    }

    async fn create_protecting(
        &self,
        name: Option<&str>,
        opts: CreateOptions,
        protected: &[String],
    ) -> AppResult<String> {
        let pool = self.store.pool();
        let schema_hash = manifest::schema_hash(pool)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "schema_hash"))?;
        let schema_version = migrate::schema_version(pool)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "schema_version"))?;
        let record_counts = db::record_counts(pool)
            .await?
            .into_iter()
            .map(|(kind, count)| (kind.as_str().to_string(), count))
            .collect();

        let request = SnapshotRequest {
            db_path: self.store.db_path().to_path_buf(),
            name: name.map(str::to_string),
            opts,
            schema_version,
            schema_hash,
            record_counts,
            retention: self.retention,
            protected: protected.to_vec(),
        };
        let id = blocking("create", move || create_snapshot_sync(request)).await?;
        tracing::info!(target: "kiosk", event = "backup_created", id = %id);
        Ok(id)
    }

    /// Overwrites the live store with a snapshot, taking an automatic
    /// backup of the current state first.
    pub async fn restore(&self, id: &str) -> AppResult<RestoreOutcome> {
        let _guard = self.store.begin_maintenance()?;
        self.restore_unguarded(id, true).await
    }

    /// Restore without acquiring the maintenance guard; the caller holds it.
    pub(crate) async fn restore_unguarded(
        &self,
        id: &str,
        take_pre_restore: bool,
    ) -> AppResult<RestoreOutcome> {
        let dir = self.resolve(id)?;
        let snapshot = dir.join(DB_FILE_NAME);

        let check_path = dir.clone();
        if !blocking("verify", move || verify_snapshot_sync(&check_path)).await? {
            return Err(AppError::new(
                codes::BACKUP_CORRUPT,
                "Backup failed verification and was not restored",
            )
            .with_context("id", id.to_string()));
        }

        let pre_restore_backup = if take_pre_restore {
            let pre = self
                .create_protecting(
                    Some("pre-restore"),
                    CreateOptions::automatic(format!("Automatic backup before restoring {id}")),
                    &[id.to_string()],
                )
                .await?;
            Some(pre)
        } else {
            None
        };

        let live = self.store.db_path().to_path_buf();
        blocking("restore", move || copy_database(&snapshot, &live, false)).await?;
        tracing::info!(
            target: "kiosk",
            event = "backup_restored",
            id = %id,
            pre_restore = pre_restore_backup.as_deref().unwrap_or("-")
        );

        Ok(RestoreOutcome {
            restored: id.to_string(),
            pre_restore_backup,
        })
    }

    /// Every snapshot, newest first.
    pub async fn list(&self) -> AppResult<Vec<BackupMetadata>> {
        let root = self.root()?;
        let mut records = blocking("list", move || collect_backups(&root)).await?;
        sort_newest_first(&mut records);
        Ok(records.into_iter().map(|r| r.metadata).collect())
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let dir = self.resolve(id)?;
        fs::remove_dir_all(&dir).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "delete_backup")
                .with_context("path", dir.display().to_string())
        })?;
        tracing::info!(target: "kiosk", event = "backup_deleted", id = %id);
        Ok(())
    }

    /// Loads the snapshot into a scratch in-memory database and checks that
    /// it is readable and recognizable. The live store is never touched.
    pub async fn verify(&self, id: &str) -> AppResult<bool> {
        let dir = self.resolve(id)?;
        let ok = blocking("verify", move || verify_snapshot_sync(&dir)).await?;
        tracing::info!(target: "kiosk", event = "backup_verified", id = %id, ok);
        Ok(ok)
    }

    pub async fn get_info(&self, id: &str) -> AppResult<Option<BackupMetadata>> {
        let dir = match self.resolve(id) {
            Ok(dir) => dir,
            Err(err) if err.code() == codes::BACKUP_NOT_FOUND => return Ok(None),
            Err(err) => return Err(err),
        };
        let record = blocking("get_info", move || load_record(&dir)).await?;
        Ok(Some(record.metadata))
    }

    fn resolve(&self, id: &str) -> AppResult<PathBuf> {
        let not_found = || {
            AppError::new(codes::BACKUP_NOT_FOUND, "Backup not found")
                .with_context("id", id.to_string())
        };
        if !BACKUP_ID_RE.is_match(id) {
            return Err(not_found());
        }
        let dir = self.root()?.join(id);
        if !dir.join(DB_FILE_NAME).is_file() {
            return Err(not_found());
        }
        Ok(dir)
    }
}

async fn blocking<T, F>(operation: &'static str, f: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    task::spawn_blocking(f).await.map_err(|err| {
        AppError::new("DB_BACKUP/TASK", "Backup task panicked")
            .with_context("operation", operation)
            .with_context("error", err.to_string())
    })?
}

struct SnapshotRequest {
    db_path: PathBuf,
    name: Option<String>,
    opts: CreateOptions,
    schema_version: String,
    schema_hash: String,
    record_counts: std::collections::BTreeMap<String, i64>,
    retention: RetentionConfig,
    protected: Vec<String>,
}

struct BackupRecord {
    directory: PathBuf,
    metadata: BackupMetadata,
    created_at: DateTime<Utc>,
}

fn create_snapshot_sync(request: SnapshotRequest) -> AppResult<String> {
    let db_path = request.db_path.as_path();
    let root = backup_root(db_path)?;
    fs::create_dir_all(&root).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create_backups_dir")
            .with_context("path", root.display().to_string())
    })?;

    let db_size = fs::metadata(db_path)
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "db_metadata")
                .with_context("path", db_path.display().to_string())
        })?
        .len();
    let required = required_free_bytes(db_size.saturating_add(journal_and_wal_bytes(db_path)));
    let available = free_disk_space(&root)?;
    if available < required {
        return Err(AppError::new(
            "DB_BACKUP/LOW_DISK",
            format!("Not enough disk space (need ~{}).", format_bytes(required)),
        )
        .with_context("available_bytes", available.to_string())
        .with_context("required_bytes", required.to_string()));
    }

    let timestamp = Utc::now();
    let slug = request.name.as_deref().map(slugify).filter(|s| !s.is_empty());
    let backup_dir = unique_backup_dir(&root, &timestamp, slug.as_deref())?;
    let id = backup_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::new("DB_BACKUP/NAME_COLLISION", "Unable to name backup"))?;
    fs::create_dir_all(&backup_dir).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create_backup_dir")
            .with_context("path", backup_dir.display().to_string())
    })?;

    let partial = backup_dir.join(format!("{DB_FILE_NAME}{PARTIAL_SUFFIX}"));
    let final_path = backup_dir.join(DB_FILE_NAME);
    let result = (|| -> AppResult<()> {
        copy_database(db_path, &partial, true)?;
        fs::rename(&partial, &final_path).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "finalize_backup")
                .with_context("from", partial.display().to_string())
                .with_context("to", final_path.display().to_string())
        })?;
        sync_dir(&backup_dir).ok();

        if request.opts.skip_metadata {
            return Ok(());
        }

        let sha = manifest::file_sha256(&final_path)
            .map_err(|err| AppError::from(err).with_context("operation", "hash_backup"))?;
        let size = fs::metadata(&final_path)
            .map(|meta| meta.len())
            .unwrap_or(db_size);
        let mut manifest = BackupManifest::new(
            id.clone(),
            request.schema_version.clone(),
            request.schema_hash.clone(),
            size,
            sha,
        );
        manifest.created_at = timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        manifest.name = request.name.clone();
        manifest.description = request.opts.description.clone();
        manifest.automatic = request.opts.automatic;
        manifest.record_counts = request.record_counts.clone();

        let manifest_path = backup_dir.join(manifest::MANIFEST_FILE_NAME);
        let payload = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| AppError::from(err).with_context("operation", "serialize_manifest"))?;
        fs::write(&manifest_path, payload).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "write_manifest")
                .with_context("path", manifest_path.display().to_string())
        })?;
        sync_dir(&backup_dir).ok();
        Ok(())
    })();

    if let Err(err) = result {
        discard_partial(&backup_dir);
        return Err(err);
    }

    let mut protected = request.protected;
    protected.push(id.clone());
    apply_retention(&root, &request.retention, &protected)?;
    Ok(id)
}

/// Best-effort removal of a half-written snapshot directory.
fn discard_partial(dir: &Path) -> bool {
    match fs::remove_dir_all(dir) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::warn!(
                target: "kiosk",
                event = "backup_cleanup_failed",
                path = %dir.display(),
                error = %err
            );
            false
        }
    }
}

/// Copies the database at `src` into `dest` page by page, replacing
/// whatever `dest` held. A `standalone` copy is switched out of WAL mode so
/// it is a single self-contained file.
fn copy_database(src: &Path, dest: &Path, standalone: bool) -> AppResult<()> {
    let src_conn = Connection::open_with_flags(
        src,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "open_source_db")
            .with_context("path", src.display().to_string())
    })?;
    let mut dest_conn = Connection::open(dest).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "open_target_db")
            .with_context("path", dest.display().to_string())
    })?;
    src_conn.busy_timeout(Duration::from_secs(5))?;
    dest_conn.busy_timeout(Duration::from_secs(5))?;

    {
        let backup = Backup::new(&src_conn, &mut dest_conn)
            .map_err(|err| AppError::from(err).with_context("operation", "backup_init"))?;
        let mut retries = 0;
        loop {
            match backup
                .step(-1)
                .map_err(|err| AppError::from(err).with_context("operation", "backup_step"))?
            {
                StepResult::Done => break,
                StepResult::More => continue,
                _ if retries < BUSY_RETRIES => {
                    retries += 1;
                    std::thread::sleep(BUSY_PAUSE);
                }
                other => {
                    return Err(AppError::new(
                        "DB_BACKUP/BUSY",
                        "Database stayed locked while copying",
                    )
                    .with_context("step", format!("{other:?}")));
                }
            }
        }
    }

    if standalone {
        dest_conn.execute_batch("PRAGMA journal_mode=DELETE;").ok();
    }

    dest_conn
        .close()
        .map_err(|(_, err)| AppError::from(err).with_context("operation", "close_target_db"))?;
    src_conn
        .close()
        .map_err(|(_, err)| AppError::from(err).with_context("operation", "close_source_db"))?;
    Ok(())
}

fn verify_snapshot_sync(dir: &Path) -> AppResult<bool> {
    let snapshot = dir.join(DB_FILE_NAME);
    let manifest_path = dir.join(manifest::MANIFEST_FILE_NAME);

    if manifest_path.exists() {
        match manifest::read_manifest(&manifest_path) {
            Ok(manifest) => match manifest::file_sha256(&snapshot) {
                Ok(sha) if sha == manifest.sha256 => {}
                Ok(_) => {
                    tracing::warn!(target: "kiosk", event = "backup_checksum_mismatch", path = %snapshot.display());
                    return Ok(false);
                }
                Err(err) => {
                    tracing::warn!(target: "kiosk", event = "backup_unreadable", error = %err);
                    return Ok(false);
                }
            },
            Err(err) => {
                tracing::warn!(target: "kiosk", event = "backup_manifest_invalid", error = %err);
                return Ok(false);
            }
        }
    }

    Ok(scratch_probe(&snapshot).unwrap_or_else(|err| {
        tracing::warn!(target: "kiosk", event = "backup_probe_failed", error = %err);
        false
    }))
}

fn scratch_probe(snapshot: &Path) -> AppResult<bool> {
    let src = Connection::open_with_flags(snapshot, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut scratch = Connection::open_in_memory()?;
    {
        let backup = Backup::new(&src, &mut scratch)?;
        if backup.step(-1)? != StepResult::Done {
            return Ok(false);
        }
    }

    let quick: String = scratch.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if !quick.eq_ignore_ascii_case("ok") {
        return Ok(false);
    }

    let mut recognized = 0;
    for kind in EntityKind::ALL {
        let present: bool = scratch.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1)",
            [kind.table()],
            |row| row.get(0),
        )?;
        if present {
            let _: i64 = scratch.query_row(
                &format!("SELECT COUNT(*) FROM {}", kind.table()),
                [],
                |row| row.get(0),
            )?;
            recognized += 1;
        }
    }
    Ok(recognized > 0)
}

fn backup_root(db_path: &Path) -> AppResult<PathBuf> {
    let parent = db_path.parent().ok_or_else(|| {
        AppError::new(
            "DB_BACKUP/NO_PARENT",
            "Database path does not have a parent directory",
        )
        .with_context("path", db_path.display().to_string())
    })?;
    Ok(parent.join(BACKUP_DIR_NAME))
}

fn required_free_bytes(db_size: u64) -> u64 {
    ((db_size as f64 * REQUIRED_FREE_MULTIPLIER).ceil() as u64).max(MIN_REQUIRED_FREE_BYTES)
}

fn free_disk_space(path: &Path) -> AppResult<u64> {
    if let Ok(fake) = env::var("KIOSK_BACKUP_FAKE_FREE_BYTES") {
        if let Ok(value) = fake.parse::<u64>() {
            return Ok(value);
        }
    }

    available_space(path).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "available_space")
            .with_context("path", path.display().to_string())
    })
}

fn journal_and_wal_bytes(db_path: &Path) -> u64 {
    const SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

    SUFFIXES
        .iter()
        .map(|suffix| {
            let mut candidate = OsString::from(db_path.as_os_str());
            candidate.push(suffix);
            fs::metadata(Path::new(&candidate))
                .map(|meta| meta.len())
                .unwrap_or(0)
        })
        .sum()
}

fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('-').to_string()
}

fn unique_backup_dir(
    root: &Path,
    timestamp: &DateTime<Utc>,
    slug: Option<&str>,
) -> AppResult<PathBuf> {
    let mut base = timestamp.format(ID_TIMESTAMP_FORMAT).to_string();
    if let Some(slug) = slug {
        base.push('-');
        base.push_str(slug);
    }
    for suffix in 0..100 {
        let candidate = if suffix == 0 {
            root.join(&base)
        } else {
            root.join(format!("{base}-{suffix:02}"))
        };
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(AppError::new(
        "DB_BACKUP/NAME_COLLISION",
        "Unable to allocate backup directory",
    ))
}

fn collect_backups(root: &Path) -> AppResult<Vec<BackupRecord>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in fs::read_dir(root).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "read_backups_dir")
            .with_context("path", root.display().to_string())
    })? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(target: "kiosk", event = "skip_invalid_backup_entry", error = %err);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_dir() || !path.join(DB_FILE_NAME).is_file() {
            continue;
        }
        match load_record(&path) {
            Ok(record) => out.push(record),
            Err(err) => {
                tracing::warn!(
                    target: "kiosk",
                    event = "skip_backup_invalid",
                    error = %err,
                    path = %path.display()
                );
            }
        }
    }

    Ok(out)
}

fn load_record(dir: &Path) -> AppResult<BackupRecord> {
    let id = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sqlite_path = dir.join(DB_FILE_NAME);
    let size_bytes = fs::metadata(&sqlite_path)
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "backup_metadata")
                .with_context("path", sqlite_path.display().to_string())
        })?
        .len();

    let manifest_path = dir.join(manifest::MANIFEST_FILE_NAME);
    if manifest_path.exists() {
        let manifest = manifest::read_manifest(&manifest_path).map_err(|err| {
            AppError::from(err).with_context("path", manifest_path.display().to_string())
        })?;
        let created_at = parse_created_at(&manifest.created_at)
            .unwrap_or_else(|| fallback_created_at(&id, dir));
        return Ok(BackupRecord {
            directory: dir.to_path_buf(),
            metadata: BackupMetadata {
                name: manifest.name.clone().unwrap_or_else(|| id.clone()),
                id,
                created_at: manifest.created_at,
                size_bytes,
                description: manifest.description,
                schema_version: manifest.schema_version,
                automatic: manifest.automatic,
                record_counts: manifest.record_counts,
                has_manifest: true,
            },
            created_at,
        });
    }

    let created_at = fallback_created_at(&id, dir);
    Ok(BackupRecord {
        directory: dir.to_path_buf(),
        metadata: BackupMetadata {
            name: id.clone(),
            id,
            created_at: created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            size_bytes,
            description: None,
            schema_version: "unknown".to_string(),
            automatic: false,
            record_counts: Default::default(),
            has_manifest: false,
        },
        created_at,
    })
}

fn parse_created_at(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Timestamp from the id prefix, then the directory mtime.
fn fallback_created_at(id: &str, path: &Path) -> DateTime<Utc> {
    if let Some(prefix) = id.get(..15) {
        if let Ok(naive) = NaiveDateTime::parse_from_str(prefix, ID_TIMESTAMP_FORMAT) {
            return naive.and_utc();
        }
    }
    if let Ok(meta) = fs::metadata(path) {
        if let Ok(modified) = meta.modified() {
            return DateTime::<Utc>::from(modified);
        }
    }
    DateTime::<Utc>::from(SystemTime::UNIX_EPOCH)
}

fn sort_newest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.metadata.id.cmp(&a.metadata.id))
    });
}

/// Deletes the oldest snapshots until the count is back under the cap.
/// Ids in `protected` are never removed.
fn apply_retention(
    root: &Path,
    retention: &RetentionConfig,
    protected: &[String],
) -> AppResult<()> {
    let mut records = collect_backups(root)?;
    if records.len() <= retention.max_count {
        return Ok(());
    }
    sort_newest_first(&mut records);

    let mut excess = records.len() - retention.max_count;
    for record in records.iter().rev() {
        if excess == 0 {
            break;
        }
        if protected.iter().any(|p| p == &record.metadata.id) {
            continue;
        }
        match fs::remove_dir_all(&record.directory) {
            Ok(()) => {
                excess -= 1;
                tracing::info!(
                    target: "kiosk",
                    event = "backup_pruned",
                    id = %record.metadata.id
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: "kiosk",
                    event = "backup_prune_failed",
                    error = %err,
                    path = %record.directory.display()
                );
            }
        }
    }

    Ok(())
}

fn sync_dir(path: &Path) -> io::Result<()> {
    fs::File::open(path)?.sync_all()
}

fn format_bytes(bytes: u64) -> String {
    let mb = (bytes as f64) / 1_000_000.0;
    if mb < 1.0 {
        "1 MB".to_string()
    } else {
        format!("{:.0} MB", mb.ceil())
    }
}
