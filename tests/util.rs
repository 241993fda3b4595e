#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use kiosk_lib::import::ImportRow;
use kiosk_lib::{Engine, RetentionConfig, SearchConfig};
use tempfile::TempDir;

/// Engine over a fresh store in its own temp directory. Keep the
/// directory alive for as long as the engine is used.
pub async fn temp_engine() -> (TempDir, Engine) {
    temp_engine_with(SearchConfig::default()).await
}

pub async fn temp_engine_with(search: SearchConfig) -> (TempDir, Engine) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let engine = Engine::open_with(
        dir.path().join("kiosk.sqlite3"),
        search,
        RetentionConfig::with_max_count(5),
    )
    .await
    .expect("open engine");
    (dir, engine)
}

pub fn row(pairs: &[(&str, &str)]) -> ImportRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn alumni(first: &str, last: &str, year: i32) -> ImportRow {
    row(&[
        ("first_name", first),
        ("last_name", last),
        ("grad_year", &year.to_string()),
    ])
}

pub fn photo(title: &str, year: i32, tags: &str) -> ImportRow {
    row(&[("title", title), ("year", &year.to_string()), ("tags", tags)])
}

pub async fn count(engine: &Engine, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(engine.store().pool())
        .await
        .expect("count rows")
}
