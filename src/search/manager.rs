//! Search orchestration: primary FTS lookups with transparent fallback.
//!
//! Callers of [`SearchManager`] never see an error. A failing primary path
//! (missing or corrupt index, timeout, exhausted retries, open circuit) is
//! replaced by the fallback scan for that call, and the failure is surfaced
//! only through [`SearchManager::status`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder as SqlBuilder, Row, Sqlite};
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use super::cache::{CacheKey, ResultCache};
use super::fallback::FallbackSearch;
use super::filter::{self, Facets, Page, SortDirection, SortField};
use super::index::IndexManager;
use super::model::{MatchProvenance, QueryMode, QueryOptions, SearchFilters, SearchResult};
use super::policy::SearchPolicy;
use super::predicates::{like_escape, push_filters};
use super::query::{self, QueryBuilder};
use crate::config::SearchConfig;
use crate::entities::{EntityKind, EntityRecord};
use crate::error::{codes, ErrorKind};
use crate::state::Store;
use crate::{AppError, AppResult};

/// Rows fetched per kind when building a faceted page.
const PAGE_FETCH_CAP: usize = 200;

/// One per-kind lookup, as handed to a backend.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub kind: EntityKind,
    /// Raw user text; the fallback scan and provenance tagging read it.
    pub text: String,
    /// Match expression produced by the query builder.
    pub query: String,
    pub mode: QueryMode,
    /// Indexed columns the search is limited to; empty means all.
    pub columns: Vec<&'static str>,
    /// bm25 weight per FTS column; `None` keeps the schema defaults.
    pub weights: Option<Vec<f64>>,
    pub filters: SearchFilters,
    pub limit: usize,
    pub offset: usize,
}

/// A way of answering a [`SearchRequest`].
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn search<'a>(&'a self, request: &'a SearchRequest)
        -> BoxFuture<'a, AppResult<Vec<SearchResult>>>;
}

/// Lets bulk loaders refresh the index without knowing about search.
pub trait IndexHook: Send + Sync {
    fn rebuild<'a>(&'a self, kind: EntityKind) -> BoxFuture<'a, AppResult<()>>;
    /// Drops anything derived from the previous data.
    fn invalidate(&self);
}

/// FTS5-backed lookups ranked by weighted bm25.
#[derive(Clone)]
pub struct PrimarySearch {
    store: Store,
}

impl PrimarySearch {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn run(&self, request: &SearchRequest) -> AppResult<Vec<SearchResult>> {
        if request.query.is_empty() || request.limit == 0 {
            return Ok(Vec::new());
        }
        let schema = request.kind.schema();
        let fts = schema.fts_table;
        let rank = match &request.weights {
            Some(weights) => schema.bm25_expr_with(weights),
            None => schema.bm25_expr(),
        };
        let mut qb = SqlBuilder::<Sqlite>::new(format!(
            "SELECT t.*, {rank} AS rank_score FROM {fts} JOIN {} t ON t.id = {fts}.rowid WHERE {fts} MATCH ",
            schema.table
        ));
        qb.push_bind(request.query.clone());
        push_filters(&mut qb, request.kind, &request.filters, "t");
        qb.push(" ORDER BY rank_score ASC, t.id ASC LIMIT ");
        qb.push_bind(request.limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(request.offset as i64);

        let rows = qb.build().fetch_all(self.store.pool()).await?;
        let terms = query::terms(&request.text);
        rows.iter()
            .map(|row| {
                let record = EntityRecord::from_row(request.kind, row)?;
                let rank: f64 = row.try_get("rank_score")?;
                let provenance = provenance_for(&record, &terms);
                Ok(SearchResult::new(record, -rank, provenance))
            })
            .collect()
    }
}

impl SearchBackend for PrimarySearch {
    fn name(&self) -> &'static str {
        "primary"
    }

    fn search<'a>(
        &'a self,
        request: &'a SearchRequest,
    ) -> BoxFuture<'a, AppResult<Vec<SearchResult>>> {
        Box::pin(self.run(request))
    }
}

/// `Exact` when some query term is a whole word of the record's text,
/// otherwise the index matched through stemming or prefix expansion.
fn provenance_for(record: &EntityRecord, terms: &[String]) -> MatchProvenance {
    let mut fields = vec![record.title()];
    fields.extend(record.secondary_text());
    let exact = fields.into_iter().any(|field| {
        let folded = filter::fold_key(field);
        folded
            .split(' ')
            .any(|word| terms.iter().any(|term| term == word))
    });
    if exact {
        MatchProvenance::Exact
    } else {
        MatchProvenance::Stemmed
    }
}

/// Polled by the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RecoveryStatus {
    pub has_error: bool,
    pub error_kind: Option<ErrorKind>,
    pub last_error: Option<String>,
    pub can_recover: bool,
    pub is_recovering: bool,
    pub last_recovery_time: Option<String>,
    /// The breaker is open and searches go straight to the fallback.
    pub fallback_active: bool,
}

#[derive(Debug, Default)]
struct StatusState {
    last_error: Option<(EntityKind, AppError)>,
    is_recovering: bool,
    last_recovery_time: Option<String>,
}

/// What actually reaches the index for one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub expr: String,
    pub columns: Vec<&'static str>,
    pub weights: Option<Vec<f64>>,
    /// The requested form was invalid or too costly and was cut down.
    pub capped: bool,
}

impl CompiledQuery {
    fn cache_text(&self) -> String {
        match &self.weights {
            Some(weights) => format!("{}#{weights:?}", self.expr),
            None => self.expr.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PageRequest {
    pub text: String,
    #[serde(default)]
    pub options: QueryOptions,
    #[serde(default)]
    pub kinds: Option<Vec<EntityKind>>,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub sort: SortField,
    #[serde(default)]
    pub direction: SortDirection,
    #[ts(type = "number")]
    pub page: usize,
    #[ts(type = "number")]
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SearchPage {
    pub results: Page<SearchResult>,
    /// Counted before filtering so every option stays visible.
    pub facets: Facets,
    pub summary: Vec<String>,
    /// Some results came from the fallback scan.
    pub degraded: bool,
}

pub struct SearchManager {
    config: SearchConfig,
    builder: QueryBuilder,
    primary: Arc<dyn SearchBackend>,
    fallback: FallbackSearch,
    index: IndexManager,
    policy: SearchPolicy,
    cache: ResultCache,
    status: Mutex<StatusState>,
}

impl SearchManager {
    pub fn new(store: Store, config: SearchConfig) -> Self {
        let primary: Arc<dyn SearchBackend> = Arc::new(PrimarySearch::new(store.clone()));
        Self::with_primary(store, config, primary)
    }

    /// Uses `primary` instead of the FTS backend.
    pub fn with_primary(
        store: Store,
        config: SearchConfig,
        primary: Arc<dyn SearchBackend>,
    ) -> Self {
        Self {
            builder: QueryBuilder::default(),
            fallback: FallbackSearch::new(store.clone()),
            index: IndexManager::new(store),
            policy: SearchPolicy::new(&config),
            cache: ResultCache::new(config.cache_size, config.cache_ttl),
            status: Mutex::new(StatusState::default()),
            primary,
            config,
        }
    }

    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    pub fn fallback(&self) -> &FallbackSearch {
        &self.fallback
    }

    pub fn query_builder(&self) -> &QueryBuilder {
        &self.builder
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Ranked hits of one kind. Empty text yields no results.
    pub async fn search_entity(
        &self,
        kind: EntityKind,
        text: &str,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> Vec<SearchResult> {
        self.search_entity_with(kind, text, &QueryOptions::default(), filters, limit, offset)
            .await
    }

    /// [`search_entity`](Self::search_entity) with a query mode and column
    /// scope.
    pub async fn search_entity_with(
        &self,
        kind: EntityKind,
        text: &str,
        options: &QueryOptions,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> Vec<SearchResult> {
        let compiled = self.compile_query(kind, text, options);
        if compiled.expr.is_empty() || limit == 0 {
            return Vec::new();
        }

        let key = CacheKey::new(kind, &compiled.cache_text(), filters, limit, offset);
        if let Some(hit) = self.cache.get(&key) {
            debug!(target: "kiosk", event = "search_cache_hit", kind = %kind);
            return hit;
        }

        let request = SearchRequest {
            kind,
            text: text.to_string(),
            query: compiled.expr,
            mode: options.mode,
            columns: compiled.columns,
            weights: compiled.weights,
            filters: filters.clone(),
            limit,
            offset,
        };

        match self.run_primary(&request).await {
            Ok(results)
                if results.is_empty()
                    && offset == 0
                    && options.is_plain()
                    && self.config.substring_fallback =>
            {
                self.run_substring(&request).await
            }
            Ok(results) => {
                self.cache.put(key, results.clone());
                results
            }
            Err(cause) => self.run_fallback(&request, cause).await,
        }
    }

    /// Builds the match expression for `text`: mode, then `optimize`, then
    /// a validity and complexity check, then the column scope. Anything
    /// invalid or over budget is replaced by plain ORed terms that fit.
    /// Requested columns that `kind` does not index are ignored; if none
    /// remain the expression is empty.
    pub fn compile_query(
        &self,
        kind: EntityKind,
        text: &str,
        options: &QueryOptions,
    ) -> CompiledQuery {
        let builder = &self.builder;
        let built = match options.mode {
            QueryMode::Simple => builder.build(text),
            QueryMode::Boolean => builder.build_boolean(text),
        };
        let mut expr = builder.optimize(&built, builder.max_len());
        let mut capped = false;
        if !expr.is_empty() {
            let check = builder.validate(&expr);
            let cost = builder.complexity(&expr);
            if !check.valid || cost > self.config.max_complexity {
                debug!(
                    target: "kiosk",
                    event = "search_query_capped",
                    kind = %kind,
                    complexity = cost,
                    error = check.error.as_deref().unwrap_or("")
                );
                expr = builder.build_within(text, self.config.max_complexity);
                capped = true;
            }
        }

        if options.fields.is_empty() || expr.is_empty() {
            return CompiledQuery {
                expr,
                columns: Vec::new(),
                weights: None,
                capped,
            };
        }

        let schema = kind.schema();
        let mut requested: Vec<(&'static str, f64)> = Vec::new();
        for field in &options.fields {
            if let Some(idx) = schema.fts_column(&field.field) {
                let column = schema.fts_columns[idx];
                if requested.iter().all(|(seen, _)| *seen != column) {
                    requested.push((column, field.weight.unwrap_or(schema.fts_weights[idx])));
                }
            }
        }
        if requested.is_empty() {
            return CompiledQuery {
                expr: String::new(),
                columns: Vec::new(),
                weights: None,
                capped,
            };
        }

        let weighted = builder.weight_expression(&expr, &requested);
        let weights: Vec<f64> = schema
            .fts_columns
            .iter()
            .zip(schema.fts_weights)
            .map(|(column, default)| weighted.weight_of(column).unwrap_or(*default))
            .collect();
        CompiledQuery {
            expr: weighted.expr,
            columns: requested.into_iter().map(|(column, _)| column).collect(),
            weights: Some(weights),
            capped,
        }
    }

    /// Records of the same kind sharing distinctive words with `id`.
    pub async fn similar_to(&self, kind: EntityKind, id: i64, limit: usize) -> Vec<SearchResult> {
        if limit == 0 {
            return Vec::new();
        }
        let record = match self.load_record(kind, id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(target: "kiosk", event = "similar_lookup_failed", kind = %kind, id, error = %err);
                return Vec::new();
            }
        };

        let mut text = record.title().to_string();
        for field in record.secondary_text() {
            text.push(' ');
            text.push_str(field);
        }
        let query = self.builder.build_similarity_query(&text);
        if query.is_empty() {
            return Vec::new();
        }

        let request = SearchRequest {
            kind,
            text,
            query,
            mode: QueryMode::Simple,
            columns: Vec::new(),
            weights: None,
            filters: SearchFilters::default(),
            limit: limit + 1,
            offset: 0,
        };
        let results = match self.run_primary(&request).await {
            Ok(results) => results,
            Err(cause) => self.run_fallback(&request, cause).await,
        };
        results
            .into_iter()
            .filter(|hit| hit.id != id)
            .take(limit)
            .collect()
    }

    async fn load_record(&self, kind: EntityKind, id: i64) -> AppResult<Option<EntityRecord>> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", kind.table());
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.fallback_pool())
            .await?;
        row.map(|row| EntityRecord::from_row(kind, &row)).transpose()
    }

    /// Every kind, merged by score. Scores are not normalized across kinds.
    pub async fn search_all(
        &self,
        text: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Vec<SearchResult> {
        let mut merged = Vec::new();
        for kind in EntityKind::ALL {
            merged.extend(self.search_entity(kind, text, filters, limit, 0).await);
        }
        merge_by_score(&mut merged);
        merged.truncate(limit);
        merged
    }

    /// Distinct display names starting with the typed prefix, across kinds.
    pub async fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        let needle = filter::fold_key(&query::sanitize(prefix).replace('"', " "));
        if needle.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut out: Vec<String> = Vec::new();
        for kind in EntityKind::ALL {
            let titles = match self.suggest_primary(kind, prefix, limit).await {
                Ok(titles) => titles,
                Err(err) => {
                    debug!(target: "kiosk", event = "suggest_fallback", kind = %kind, error = %err);
                    self.suggest_fallback(kind, &needle, limit)
                        .await
                        .unwrap_or_else(|err| {
                            warn!(target: "kiosk", event = "suggest_failed", kind = %kind, error = %err);
                            Vec::new()
                        })
                }
            };
            for title in titles {
                if seen.insert(filter::fold_key(&title)) {
                    out.push(title);
                }
            }
        }

        out.sort_by_cached_key(|title| {
            let folded = filter::fold_key(title);
            (!folded.starts_with(&needle), folded)
        });
        out.truncate(limit);
        out
    }

    async fn suggest_primary(
        &self,
        kind: EntityKind,
        prefix: &str,
        limit: usize,
    ) -> AppResult<Vec<String>> {
        let schema = kind.schema();
        let expr = self
            .builder
            .build_suggestion_query(prefix, Some(schema.display_column));
        if expr.is_empty() {
            return Ok(Vec::new());
        }
        let fts = schema.fts_table;
        let sql = format!(
            "SELECT t.{display} FROM {fts} JOIN {table} t ON t.id = {fts}.rowid \
             WHERE {fts} MATCH ? ORDER BY {bm25}, t.id LIMIT ?",
            display = schema.display_column,
            table = schema.table,
            bm25 = schema.bm25_expr(),
        );
        let fetch = sqlx::query_scalar::<_, String>(&sql)
            .bind(expr)
            .bind(limit as i64)
            .fetch_all(self.fallback_pool());
        match tokio::time::timeout(self.config.timeout, fetch).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(timeout_error(self.config.timeout)),
        }
    }

    async fn suggest_fallback(
        &self,
        kind: EntityKind,
        needle: &str,
        limit: usize,
    ) -> AppResult<Vec<String>> {
        let schema = kind.schema();
        let escaped = like_escape(needle);
        let sql = format!(
            "SELECT {display} FROM {table} \
             WHERE {display} LIKE ? ESCAPE '\\' OR {display} LIKE ? ESCAPE '\\' \
             ORDER BY sort_key, id LIMIT ?",
            display = schema.display_column,
            table = schema.table,
        );
        let titles = sqlx::query_scalar::<_, String>(&sql)
            .bind(format!("{escaped}%"))
            .bind(format!("% {escaped}%"))
            .bind(limit as i64)
            .fetch_all(self.fallback_pool())
            .await?;
        Ok(titles)
    }

    fn fallback_pool(&self) -> &sqlx::SqlitePool {
        self.fallback.store().pool()
    }

    /// Merged, filtered, sorted and paged results with facets.
    pub async fn search_page(&self, request: &PageRequest) -> SearchPage {
        let unfiltered = SearchFilters::default();
        let kinds = EntityKind::resolve(request.kinds.as_deref());

        let mut merged = Vec::new();
        for kind in kinds {
            merged.extend(
                self.search_entity_with(
                    kind,
                    &request.text,
                    &request.options,
                    &unfiltered,
                    PAGE_FETCH_CAP,
                    0,
                )
                .await,
            );
        }
        merge_by_score(&mut merged);

        let degraded = merged.iter().any(SearchResult::is_fallback);
        let facets = filter::facets(&merged, &request.filters);
        let narrowed = filter::apply(merged, &request.filters);
        let ordered = filter::sort(narrowed, request.sort, request.direction);
        let page_size = if request.page_size == 0 {
            20
        } else {
            request.page_size
        };

        SearchPage {
            results: filter::paginate(&ordered, request.page, page_size),
            facets,
            summary: filter::summarize(&request.filters),
            degraded,
        }
    }

    pub fn status(&self) -> RecoveryStatus {
        let state = self.status.lock().unwrap_or_else(|e| e.into_inner());
        let error_kind = state.last_error.as_ref().map(|(_, err)| err.kind());
        RecoveryStatus {
            has_error: state.last_error.is_some(),
            error_kind,
            last_error: state.last_error.as_ref().map(|(_, err)| err.to_string()),
            can_recover: matches!(
                error_kind,
                Some(ErrorKind::IndexCorrupt | ErrorKind::Timeout | ErrorKind::Other)
            ),
            is_recovering: state.is_recovering,
            last_recovery_time: state.last_recovery_time.clone(),
            fallback_active: self.policy.is_open(),
        }
    }

    /// Repairs unhealthy indexes; returns the kinds brought back.
    pub async fn recover(&self) -> Vec<EntityKind> {
        {
            let mut state = self.status.lock().unwrap_or_else(|e| e.into_inner());
            if state.is_recovering {
                return Vec::new();
            }
            state.is_recovering = true;
        }
        info!(target: "kiosk", event = "search_recovery_start");

        let repaired = self.index.repair_corrupted().await;
        let healthy = self
            .index
            .verify_integrity()
            .await
            .iter()
            .all(|stats| stats.healthy);

        {
            let mut state = self.status.lock().unwrap_or_else(|e| e.into_inner());
            state.is_recovering = false;
            state.last_recovery_time =
                Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
            if healthy {
                state.last_error = None;
            }
        }
        if healthy {
            self.policy.reset();
        }
        self.cache.clear();

        info!(
            target: "kiosk",
            event = "search_recovery_finish",
            repaired = repaired.len(),
            healthy
        );
        repaired
    }

    async fn run_primary(&self, request: &SearchRequest) -> AppResult<Vec<SearchResult>> {
        if !self.policy.allow_primary() {
            return Err(AppError::new(
                codes::SEARCH_UNAVAILABLE,
                "Primary index skipped while the circuit is open",
            ));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome =
                match tokio::time::timeout(self.config.timeout, self.primary.search(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(timeout_error(self.config.timeout)),
                };

            match outcome {
                Ok(results) => {
                    self.policy.record_success();
                    self.clear_error(request.kind);
                    return Ok(results);
                }
                Err(err) if self.policy.should_retry(attempt, &err) => {
                    debug!(
                        target: "kiosk",
                        event = "search_retry",
                        kind = %request.kind,
                        attempt,
                        error = %err
                    );
                    tokio::time::sleep(self.policy.retry_delay()).await;
                }
                Err(err) => {
                    let err = err
                        .with_context("kind", request.kind.as_str())
                        .with_context("backend", self.primary.name());
                    if self.policy.record_failure() {
                        warn!(target: "kiosk", event = "search_breaker_open", kind = %request.kind);
                    }
                    self.record_error(request.kind, err.clone());
                    return Err(err);
                }
            }
        }
    }

    async fn run_fallback(&self, request: &SearchRequest, cause: AppError) -> Vec<SearchResult> {
        warn!(
            target: "kiosk",
            event = "search_fallback",
            kind = %request.kind,
            code = %cause.code(),
            error_kind = %cause.kind()
        );
        match SearchBackend::search(&self.fallback, request).await {
            Ok(results) => results,
            Err(err) => {
                error!(target: "kiosk", event = "search_fallback_failed", kind = %request.kind, error = %err);
                self.record_error(request.kind, err);
                Vec::new()
            }
        }
    }

    /// The index answered but found nothing; substring matches inside
    /// words are still worth showing.
    async fn run_substring(&self, request: &SearchRequest) -> Vec<SearchResult> {
        match SearchBackend::search(&self.fallback, request).await {
            Ok(results) => {
                if !results.is_empty() {
                    debug!(
                        target: "kiosk",
                        event = "search_substring_scan",
                        kind = %request.kind,
                        matched = results.len()
                    );
                }
                results
            }
            Err(err) => {
                warn!(target: "kiosk", event = "search_substring_failed", kind = %request.kind, error = %err);
                Vec::new()
            }
        }
    }

    fn record_error(&self, kind: EntityKind, err: AppError) {
        let mut state = self.status.lock().unwrap_or_else(|e| e.into_inner());
        state.last_error = Some((kind, err));
    }

    fn clear_error(&self, kind: EntityKind) {
        let mut state = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(&state.last_error, Some((failed, _)) if *failed == kind) {
            state.last_error = None;
        }
    }
}

impl IndexHook for SearchManager {
    fn rebuild<'a>(&'a self, kind: EntityKind) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async move {
            self.index.rebuild(Some(std::slice::from_ref(&kind))).await?;
            self.cache.clear();
            self.clear_error(kind);
            Ok(())
        })
    }

    fn invalidate(&self) {
        self.cache.clear();
    }
}

/// Score descending, then kind, then id.
pub fn merge_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn timeout_error(limit: std::time::Duration) -> AppError {
    AppError::new(
        codes::SEARCH_TIMEOUT,
        format!("Search did not finish within {} ms", limit.as_millis()),
    )
}
