//! SQL renderings of [`SearchFilters`], shared by the primary and fallback
//! paths so both narrow identically.

use sqlx::{QueryBuilder, Sqlite};

use super::model::{SearchFilters, TagMatch};
use crate::entities::{decade_prefix, EntityKind};

/// Appends ` AND ...` clauses for every filter the kind can honour.
/// `alias` qualifies base-table columns (`t` in `FROM alumni t`).
pub(crate) fn push_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    kind: EntityKind,
    filters: &SearchFilters,
    alias: &str,
) {
    let schema = kind.schema();

    if let Some(year) = schema.year_column {
        if let Some(range) = filters.year_range {
            if range.is_empty() {
                qb.push(" AND 0");
            } else {
                qb.push(format!(" AND {alias}.{year} BETWEEN "));
                qb.push_bind(range.start);
                qb.push(" AND ");
                qb.push_bind(range.end);
            }
        }
        if let Some(prefix) = filters.decade().and_then(decade_prefix) {
            qb.push(format!(" AND CAST({alias}.{year} AS TEXT) LIKE "));
            qb.push_bind(format!("{prefix}_"));
        }
    }

    if let (Some(column), Some(value)) = (schema.category_column, filters.category()) {
        qb.push(format!(" AND lower(trim({alias}.{column})) = "));
        qb.push_bind(value.to_lowercase());
    }

    if let (Some(column), Some(value)) = (schema.department_column, filters.department()) {
        qb.push(format!(" AND lower(trim({alias}.{column})) = "));
        qb.push_bind(value.to_lowercase());
    }

    let tags = filters.normalized_tags();
    if !tags.is_empty() {
        let joiner = match filters.tag_match {
            TagMatch::All => " AND ",
            TagMatch::Any => " OR ",
        };
        qb.push(" AND (");
        for (i, tag) in tags.iter().enumerate() {
            if i > 0 {
                qb.push(joiner);
            }
            qb.push(format!(
                "(',' || REPLACE(REPLACE(lower(COALESCE({alias}.tags, '')), ', ', ','), ' ,', ',') || ',') LIKE "
            ));
            qb.push_bind(format!("%,{},%", like_escape(tag)));
            qb.push(" ESCAPE '\\'");
        }
        qb.push(")");
    }
}

/// Escapes `LIKE` wildcards so user text matches literally under
/// `ESCAPE '\'`.
pub(crate) fn like_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(kind: EntityKind, filters: &SearchFilters) -> String {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM t WHERE 1");
        push_filters(&mut qb, kind, filters, "t");
        qb.sql().to_string()
    }

    #[test]
    fn empty_filters_add_nothing() {
        assert_eq!(
            render(EntityKind::Photos, &SearchFilters::default()),
            "SELECT * FROM t WHERE 1"
        );
    }

    #[test]
    fn year_range_becomes_between() {
        let sql = render(
            EntityKind::Alumni,
            &SearchFilters::default().with_year_range(2020, 2020),
        );
        assert!(sql.contains("t.grad_year BETWEEN ? AND ?"), "{sql}");
    }

    #[test]
    fn inverted_range_matches_nothing() {
        let sql = render(
            EntityKind::Alumni,
            &SearchFilters::default().with_year_range(2021, 2020),
        );
        assert!(sql.ends_with(" AND 0"), "{sql}");
    }

    #[test]
    fn attributes_missing_on_kind_are_skipped() {
        let filters = SearchFilters::default()
            .with_category("yearbook")
            .with_department("Science");
        let photos = render(EntityKind::Photos, &filters);
        assert!(!photos.contains("pub_type"));
        assert!(photos.contains("t.collection"));
        let alumni = render(EntityKind::Alumni, &filters);
        assert!(alumni.contains("t.class_role"));
        assert!(!alumni.contains("department"));
    }

    #[test]
    fn any_tags_are_ored() {
        let mut filters = SearchFilters::default().with_tags(["band", "choir"]);
        filters.tag_match = TagMatch::Any;
        let sql = render(EntityKind::Faculty, &filters);
        assert_eq!(sql.matches(" LIKE ?").count(), 2);
        assert!(sql.contains(" OR "));
    }

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(like_escape("50%_off\\"), "50\\%\\_off\\\\");
    }
}
