//! Substring search straight over the base tables.
//!
//! Used when the FTS index cannot answer. Ranking is a coarse heuristic and
//! every hit carries [`MatchProvenance::Fallback`] so the UI can show that
//! results are degraded.

use futures::future::BoxFuture;
use sqlx::{QueryBuilder, Sqlite};
use tracing::debug;

use super::filter::fold_key;
use super::manager::{SearchBackend, SearchRequest};
use super::model::{MatchProvenance, QueryMode, SearchFilters, SearchResult};
use super::predicates::{like_escape, push_filters};
use super::query::{sanitize, terms};
use crate::entities::{EntityKind, EntityRecord};
use crate::state::Store;
use crate::AppResult;

/// Rows scanned per kind before scoring; keeps a pathological `LIKE` bounded.
const SCAN_CAP: i64 = 500;

const SCORE_TITLE_PREFIX: f64 = 1.0;
const SCORE_TITLE_WORD: f64 = 0.8;
const SCORE_TITLE_ANY: f64 = 0.6;
const SCORE_OTHER_FIELD: f64 = 0.3;

#[derive(Clone)]
pub struct FallbackSearch {
    store: Store,
}

impl FallbackSearch {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Whether the base store answers at all, independent of index health.
    pub async fn is_available(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(self.store.pool())
            .await
            .is_ok()
    }

    /// Searches one kind, or every kind when `kind` is `None`.
    pub async fn search(
        &self,
        text: &str,
        kind: Option<EntityKind>,
        limit: usize,
    ) -> AppResult<Vec<SearchResult>> {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => EntityKind::ALL.to_vec(),
        };
        let filters = SearchFilters::default();
        let mut out = Vec::new();
        for kind in kinds {
            out.extend(self.search_kind(kind, text, &filters, limit, 0).await?);
        }
        out.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.kind.cmp(&b.kind))
                .then_with(|| a.id.cmp(&b.id))
        });
        out.truncate(limit);
        Ok(out)
    }

    pub async fn search_kind(
        &self,
        kind: EntityKind,
        text: &str,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<SearchResult>> {
        let needle = fold_key(&sanitize(text).replace('"', " "));
        let scan = Scan {
            kind,
            needle: &needle,
            columns: kind.schema().fts_columns,
            filters,
            limit,
            offset,
        };
        self.scan(&scan).await
    }

    async fn scan(&self, scan: &Scan<'_>) -> AppResult<Vec<SearchResult>> {
        let kind = scan.kind;
        let needle = scan.needle;
        let terms: Vec<&str> = needle.split_whitespace().collect();
        if terms.is_empty() || scan.limit == 0 || scan.columns.is_empty() {
            return Ok(Vec::new());
        }

        let schema = kind.schema();
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT t.* FROM {} t WHERE (",
            schema.table
        ));
        let mut first = true;
        for term in &terms {
            for column in scan.columns {
                if !first {
                    qb.push(" OR ");
                }
                first = false;
                qb.push(format!("t.{column} LIKE "));
                qb.push_bind(format!("%{}%", like_escape(term)));
                qb.push(" ESCAPE '\\'");
            }
        }
        qb.push(")");
        push_filters(&mut qb, kind, scan.filters, "t");
        push_title_rank(&mut qb, schema.display_column, needle, &terms);
        qb.push(", t.id LIMIT ");
        qb.push_bind(SCAN_CAP);

        let rows = qb.build().fetch_all(self.store.pool()).await?;
        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = EntityRecord::from_row(kind, row)?;
            let score = heuristic_score(&record, needle, &terms);
            if score > 0.0 {
                scored.push(SearchResult::new(record, score, MatchProvenance::Fallback));
            }
        }
        // Stable on the order the rows arrived in.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        debug!(
            target: "kiosk",
            event = "fallback_scan",
            kind = %kind,
            scanned = rows.len(),
            matched = scored.len()
        );

        Ok(scored
            .into_iter()
            .skip(scan.offset)
            .take(scan.limit)
            .collect())
    }
}

struct Scan<'a> {
    kind: EntityKind,
    /// Folded query text; its words are the terms.
    needle: &'a str,
    columns: &'a [&'static str],
    filters: &'a SearchFilters,
    limit: usize,
    offset: usize,
}

/// `ORDER BY` bucket mirroring [`heuristic_score`] on the title, so the scan
/// cap drops the weakest candidates first.
fn push_title_rank(
    qb: &mut QueryBuilder<'_, Sqlite>,
    title: &str,
    needle: &str,
    terms: &[&str],
) {
    qb.push(format!(" ORDER BY CASE WHEN t.{title} LIKE "));
    qb.push_bind(format!("{}%", like_escape(needle)));
    qb.push(" ESCAPE '\\' THEN 0 WHEN (");
    for (idx, term) in terms.iter().enumerate() {
        if idx > 0 {
            qb.push(" OR ");
        }
        let term = like_escape(term);
        qb.push(format!("t.{title} LIKE "));
        qb.push_bind(format!("{term}%"));
        qb.push(format!(" ESCAPE '\\' OR t.{title} LIKE "));
        qb.push_bind(format!("% {term}%"));
        qb.push(" ESCAPE '\\'");
    }
    qb.push(") THEN 1 WHEN (");
    for (idx, term) in terms.iter().enumerate() {
        if idx > 0 {
            qb.push(" OR ");
        }
        qb.push(format!("t.{title} LIKE "));
        qb.push_bind(format!("%{}%", like_escape(term)));
        qb.push(" ESCAPE '\\'");
    }
    qb.push(") THEN 2 ELSE 3 END");
}

impl SearchBackend for FallbackSearch {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn search<'a>(&'a self, request: &'a SearchRequest) -> BoxFuture<'a, AppResult<Vec<SearchResult>>> {
        Box::pin(async move {
            // Operators carry no meaning in a substring scan.
            let needle = match request.mode {
                QueryMode::Simple => fold_key(&sanitize(&request.text).replace('"', " ")),
                QueryMode::Boolean => fold_key(&terms(&request.text).join(" ")),
            };
            let columns = if request.columns.is_empty() {
                request.kind.schema().fts_columns
            } else {
                request.columns.as_slice()
            };
            let scan = Scan {
                kind: request.kind,
                needle: &needle,
                columns,
                filters: &request.filters,
                limit: request.limit,
                offset: request.offset,
            };
            self.scan(&scan).await
        })
    }
}

/// 1.0 when the title starts with the query, 0.8 for a word in the title
/// starting with a term, 0.6 for a term anywhere in the title, 0.3 when only
/// another field matches. `LIKE` is case-insensitive for ASCII only, so a
/// row can come back with no folded match at all and score zero.
fn heuristic_score(record: &EntityRecord, needle: &str, terms: &[&str]) -> f64 {
    let title = fold_key(record.title());
    if title.starts_with(needle) {
        return SCORE_TITLE_PREFIX;
    }
    let words: Vec<&str> = title.split(' ').collect();
    if terms
        .iter()
        .any(|term| words.iter().any(|word| word.starts_with(term)))
    {
        return SCORE_TITLE_WORD;
    }
    if terms.iter().any(|term| title.contains(term)) {
        return SCORE_TITLE_ANY;
    }
    let other_hit = record
        .secondary_text()
        .into_iter()
        .map(fold_key)
        .any(|field| terms.iter().any(|term| field.contains(term)));
    if other_hit {
        SCORE_OTHER_FIELD
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (tempfile::TempDir, Store) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path().join("kiosk.sqlite3")).await.unwrap();
        for (id, name, caption, year) in [
            (1, "Johnny Appleseed", None, 1990),
            (2, "Mary Johnson", None, 2020),
            (3, "Zed Zulu", Some("Friends with john"), 2020),
            (4, "Ann Other", None, 2020),
        ] {
            sqlx::query(
                "INSERT INTO alumni (id, full_name, first_name, last_name, grad_year, caption, sort_key)
                 VALUES (?, ?, 'f', 'l', ?, ?, ?)",
            )
            .bind(id)
            .bind(name)
            .bind(year)
            .bind(caption)
            .bind(name.to_lowercase())
            .execute(store.pool())
            .await
            .unwrap();
        }
        (tmp, store)
    }

    #[tokio::test]
    async fn ranks_title_prefix_over_other_fields() {
        let (_tmp, store) = seeded().await;
        let fallback = FallbackSearch::new(store);
        let hits = fallback
            .search("john", Some(EntityKind::Alumni), 10)
            .await
            .unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(hits[0].score, SCORE_TITLE_PREFIX);
        assert_eq!(hits[1].score, SCORE_TITLE_WORD);
        assert_eq!(hits[2].score, SCORE_OTHER_FIELD);
        assert!(hits.iter().all(SearchResult::is_fallback));
    }

    #[tokio::test]
    async fn title_hits_survive_the_scan_cap() {
        let (_tmp, store) = seeded().await;
        sqlx::query(
            "WITH RECURSIVE seq(n) AS (SELECT 100 UNION ALL SELECT n + 1 FROM seq WHERE n < 700)
             INSERT INTO alumni (id, full_name, first_name, last_name, grad_year, caption, sort_key)
             SELECT n, 'Person ' || n, 'f', 'l', 2001, 'friends with john', 'person ' || n FROM seq",
        )
        .execute(store.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO alumni (id, full_name, first_name, last_name, grad_year, sort_key)
             VALUES (1000, 'Johnny Walker', 'f', 'l', 2001, 'johnny walker')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let fallback = FallbackSearch::new(store);
        let hits = fallback
            .search("john", Some(EntityKind::Alumni), 3)
            .await
            .unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 1000, 2]);
    }

    #[tokio::test]
    async fn backend_honours_columns_and_ignores_operators() {
        let (_tmp, store) = seeded().await;
        let fallback = FallbackSearch::new(store);
        let request = SearchRequest {
            kind: EntityKind::Alumni,
            text: "john AND zulu".into(),
            query: String::new(),
            mode: QueryMode::Boolean,
            columns: vec!["caption"],
            weights: None,
            filters: SearchFilters::default(),
            limit: 10,
            offset: 0,
        };
        let hits = SearchBackend::search(&fallback, &request).await.unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![3]);
    }

    #[tokio::test]
    async fn empty_text_returns_nothing() {
        let (_tmp, store) = seeded().await;
        let fallback = FallbackSearch::new(store);
        assert!(fallback.search("  \"' ", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn applies_filters_in_sql() {
        let (_tmp, store) = seeded().await;
        let fallback = FallbackSearch::new(store);
        let filters = SearchFilters::default().with_year_range(2020, 2020);
        let hits = fallback
            .search_kind(EntityKind::Alumni, "john", &filters, 10, 0)
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.record.year() == Some(2020)));
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn wildcard_characters_match_literally() {
        let (_tmp, store) = seeded().await;
        let fallback = FallbackSearch::new(store);
        assert!(fallback.search("%", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reports_availability() {
        let (_tmp, store) = seeded().await;
        let fallback = FallbackSearch::new(store.clone());
        assert!(fallback.is_available().await);
        store.close().await;
        assert!(!fallback.is_available().await);
    }
}
