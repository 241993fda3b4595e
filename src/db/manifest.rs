use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use ts_rs::TS;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Sidecar written next to every snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BackupManifest {
    pub id: String,
    /// Operator-supplied label, if any.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub app_version: String,
    pub schema_version: String,
    pub schema_hash: String,
    #[ts(type = "number")]
    pub db_size_bytes: u64,
    pub created_at: String,
    pub sha256: String,
    /// Rows per entity table at snapshot time.
    #[serde(default)]
    #[ts(type = "Record<string, number>")]
    pub record_counts: BTreeMap<String, i64>,
    /// Taken by the engine itself (pre-import, pre-restore).
    #[serde(default)]
    pub automatic: bool,
}

impl BackupManifest {
    pub fn new(
        id: impl Into<String>,
        schema_version: impl Into<String>,
        schema_hash: impl Into<String>,
        db_size_bytes: u64,
        sha256: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_version: schema_version.into(),
            schema_hash: schema_hash.into(),
            db_size_bytes,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            sha256: sha256.into(),
            record_counts: BTreeMap::new(),
            automatic: false,
        }
    }
}

/// Digest over every user-defined schema object, so two stores with the
/// same DDL hash equal regardless of content.
pub async fn schema_hash(pool: &SqlitePool) -> Result<String> {
    let mut conn = pool
        .acquire()
        .await
        .context("acquire connection for schema hash")?;
    schema_hash_on(&mut conn).await
}

pub async fn schema_hash_on(conn: &mut SqliteConnection) -> Result<String> {
    let rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
        "SELECT type, name, tbl_name, sql FROM sqlite_master \
         WHERE type IN ('table', 'index', 'trigger', 'view') AND name NOT LIKE 'sqlite_%' \
         ORDER BY type, name",
    )
    .fetch_all(conn)
    .await
    .context("read sqlite_master")?;

    let mut hasher = Sha256::new();
    for (kind, name, table, sql) in rows {
        for part in [kind.as_str(), name.as_str(), table.as_str(), sql.as_deref().unwrap_or("")] {
            hasher.update(part.as_bytes());
            hasher.update([0]);
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("open file for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).with_context(|| format!("hash {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn read_manifest(path: &Path) -> Result<BackupManifest> {
    let bytes = fs::read(path).with_context(|| format!("read manifest {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse manifest {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn schema_hash_tracks_ddl() {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("connect in-memory");
        sqlx::query("CREATE TABLE photos(id INTEGER PRIMARY KEY, title TEXT);")
            .execute(&pool)
            .await
            .unwrap();

        let first = schema_hash(&pool).await.unwrap();
        let second = schema_hash(&pool).await.unwrap();
        assert_eq!(first, second);

        sqlx::query("CREATE INDEX idx_photos_title ON photos(title);")
            .execute(&pool)
            .await
            .unwrap();
        assert_ne!(first, schema_hash(&pool).await.unwrap());
    }

    #[test]
    fn file_sha256_matches_manual_digest() {
        let mut tmp = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut tmp, b"class of 1994").unwrap();
        let expected = format!("{:x}", Sha256::digest(b"class of 1994"));
        assert_eq!(expected, file_sha256(tmp.path()).unwrap());
    }

    #[test]
    fn manifest_survives_disk() {
        let mut manifest = BackupManifest::new("20260101-120000", "v1", "abc", 42, "def");
        manifest.automatic = true;
        manifest.record_counts.insert("alumni".into(), 3);
        let tmp = NamedTempFile::new().unwrap();
        serde_json::to_writer_pretty(tmp.as_file(), &manifest).unwrap();
        tmp.as_file().sync_all().unwrap();
        let loaded = read_manifest(tmp.path()).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn older_manifests_default_new_fields() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            br#"{"id":"x","appVersion":"0.1.0","schemaVersion":"v1","schemaHash":"h","dbSizeBytes":1,"createdAt":"2026-01-01T00:00:00.000Z","sha256":"s"}"#,
        )
        .unwrap();
        let loaded = read_manifest(tmp.path()).unwrap();
        assert!(!loaded.automatic);
        assert!(loaded.record_counts.is_empty());
        assert!(loaded.description.is_none());
    }
}
