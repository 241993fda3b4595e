use kiosk_lib::search::{FieldWeight, PageRequest, QueryBuilder, QueryOptions, SearchFilters};
use kiosk_lib::{Engine, EntityKind, ImportMode};

#[path = "util.rs"]
mod util;

use util::{row, temp_engine};

async fn seeded_publications() -> (tempfile::TempDir, Engine) {
    let (dir, engine) = temp_engine().await;
    let rows = vec![
        row(&[
            ("id", "1"),
            ("title", "The Echo"),
            ("pub_type", "newspaper"),
            ("year", "1988"),
            ("department", "Journalism"),
            ("description", "Student weekly news"),
            ("tags", "news"),
        ]),
        row(&[
            ("id", "2"),
            ("title", "Panorama 1989"),
            ("pub_type", "yearbook"),
            ("year", "1989"),
            ("description", "Senior class portraits"),
        ]),
        row(&[
            ("id", "3"),
            ("title", "Spring Concert Program"),
            ("pub_type", "program"),
            ("year", "1990"),
            ("department", "Music"),
            ("description", "Band and choir concert"),
            ("tags", "music"),
        ]),
        row(&[
            ("id", "4"),
            ("title", "Winter Concert Program"),
            ("pub_type", "program"),
            ("year", "1991"),
            ("department", "Music"),
            ("description", "Band performance"),
            ("tags", "music"),
        ]),
        row(&[
            ("id", "5"),
            ("title", "Choir Festival"),
            ("pub_type", "program"),
            ("year", "1992"),
            ("department", "Music"),
            ("description", "Choir only"),
        ]),
    ];
    let result = engine
        .imports()
        .import_records(EntityKind::Publications, &rows, ImportMode::Replace)
        .await;
    assert!(result.success, "{:?}", result.errors);
    (dir, engine)
}

/// Rowids the FTS table returns for `expr`, ascending.
async fn matching(engine: &Engine, expr: &str) -> Vec<i64> {
    sqlx::query_scalar(
        "SELECT rowid FROM publications_fts WHERE publications_fts MATCH ? ORDER BY rowid",
    )
    .bind(expr)
    .fetch_all(engine.store().pool())
    .await
    .unwrap_or_else(|err| panic!("{expr:?} rejected: {err}"))
}

fn sorted_ids(hits: &[kiosk_lib::search::SearchResult]) -> Vec<i64> {
    let mut ids: Vec<i64> = hits.iter().map(|hit| hit.id).collect();
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn every_builder_variant_runs_against_the_index() {
    let (_dir, engine) = seeded_publications().await;
    let qb = QueryBuilder::default();

    assert_eq!(matching(&engine, &qb.build("concert")).await, vec![3, 4]);
    assert_eq!(matching(&engine, &qb.build("\"choir concert\"")).await, vec![3]);
    assert_eq!(
        matching(&engine, &qb.build("\"concert program\" spring")).await,
        vec![3]
    );
    assert_eq!(matching(&engine, &qb.build_boolean("band and choir")).await, vec![3]);
    assert_eq!(matching(&engine, &qb.build_boolean("choir not band")).await, vec![5]);
    assert_eq!(
        matching(&engine, &qb.build_field_query("music", "department")).await,
        vec![3, 4, 5]
    );
    assert_eq!(matching(&engine, &qb.build_field_query("music", "tags")).await, vec![3, 4]);
    assert_eq!(
        matching(&engine, &qb.build_suggestion_query("win conc", Some("title"))).await,
        vec![4]
    );
    assert_eq!(
        matching(&engine, &qb.build_facet_query("concert", "department", "Music")).await,
        vec![3, 4]
    );
    assert_eq!(
        matching(&engine, &qb.build_facet_query("news", "department", "Journalism")).await,
        vec![1]
    );
    assert_eq!(
        matching(&engine, &qb.build_similarity_query("Spring Concert Program")).await,
        vec![3, 4]
    );
    assert_eq!(
        matching(&engine, &qb.optimize("concert* OR concert* OR choir**", 200)).await,
        vec![3, 4, 5]
    );
    let capped = qb.build_within("festival AND choir AND band AND concert", 12);
    assert_eq!(matching(&engine, &capped).await, vec![3, 5]);
}

#[tokio::test]
async fn weighted_query_scopes_columns_and_orders_by_weight() {
    let (_dir, engine) = seeded_publications().await;
    let qb = QueryBuilder::default();
    let schema = EntityKind::Publications.schema();

    let weighted = qb.build_weighted_query("music", &[("department", 5.0), ("tags", 1.0)]);
    assert_eq!(matching(&engine, &weighted.expr).await, vec![3, 4, 5]);

    // Row 5 matches in one scoped column only.
    let weights: Vec<f64> = schema
        .fts_columns
        .iter()
        .map(|column| weighted.weight_of(column).unwrap_or(1.0))
        .collect();
    let sql = format!(
        "SELECT rowid FROM publications_fts WHERE publications_fts MATCH ? ORDER BY {}, rowid",
        schema.bm25_expr_with(&weights)
    );
    let ranked: Vec<i64> = sqlx::query_scalar(&sql)
        .bind(&weighted.expr)
        .fetch_all(engine.store().pool())
        .await
        .unwrap();
    assert_eq!(ranked.len(), 3);
    assert_eq!(ranked.last(), Some(&5));
}

#[tokio::test]
async fn manager_honours_boolean_field_and_phrase_queries() {
    let (_dir, engine) = seeded_publications().await;
    let search = engine.search();
    let none = SearchFilters::default();

    let page = search
        .search_page(&PageRequest {
            text: "band and choir".into(),
            options: QueryOptions::boolean(),
            kinds: Some(vec![EntityKind::Publications]),
            page: 1,
            page_size: 10,
            ..PageRequest::default()
        })
        .await;
    assert_eq!(sorted_ids(&page.results.items), vec![3]);
    assert!(!page.degraded);

    let department = QueryOptions::default().with_fields([FieldWeight::new("department")]);
    let hits = search
        .search_entity_with(EntityKind::Publications, "music", &department, &none, 10, 0)
        .await;
    assert_eq!(sorted_ids(&hits), vec![3, 4, 5]);

    let hits = search
        .search_entity(EntityKind::Publications, "\"concert program\"", &none, 10, 0)
        .await;
    assert_eq!(sorted_ids(&hits), vec![3, 4]);
    assert!(hits.iter().all(|hit| !hit.is_fallback()));

    let similar = search.similar_to(EntityKind::Publications, 3, 10).await;
    assert_eq!(sorted_ids(&similar), vec![4]);
}
