//! In-memory narrowing, faceting, ordering and paging of result lists.
//!
//! Everything here is a pure function of its inputs.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use unicode_normalization::UnicodeNormalization;

use super::model::{SearchFilters, SearchResult, TagMatch};
use crate::entities::{decade_label, decade_prefix, EntityKind, EntityRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SortField {
    #[default]
    Relevance,
    Title,
    Date,
    Year,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based.
    #[ts(type = "number")]
    pub page: usize,
    #[ts(type = "number")]
    pub page_size: usize,
    #[ts(type = "number")]
    pub total_items: usize,
    #[ts(type = "number")]
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FacetEntry {
    pub value: String,
    #[ts(type = "number")]
    pub count: usize,
    pub selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Facets {
    pub kinds: Vec<FacetEntry>,
    pub years: Vec<FacetEntry>,
    pub decades: Vec<FacetEntry>,
    pub categories: Vec<FacetEntry>,
    pub departments: Vec<FacetEntry>,
    pub tags: Vec<FacetEntry>,
}

/// Keeps results that satisfy every present filter. A filter on an
/// attribute the kind does not have never excludes that kind.
pub fn apply(results: Vec<SearchResult>, filters: &SearchFilters) -> Vec<SearchResult> {
    if filters.is_empty() {
        return results;
    }
    let tags = filters.normalized_tags();
    results
        .into_iter()
        .filter(|r| matches_filters(&r.record, filters, &tags))
        .collect()
}

/// Record-level predicate shared by [`apply`] and the fallback scan.
pub fn matches_filters(record: &EntityRecord, filters: &SearchFilters, tags: &[String]) -> bool {
    let schema = record.kind().schema();

    if schema.year_column.is_some() {
        if let Some(range) = &filters.year_range {
            match record.year() {
                Some(year) if range.contains(year) => {}
                _ => return false,
            }
        }
        if let Some(prefix) = filters.decade().and_then(decade_prefix) {
            match record.year() {
                Some(year) if year.to_string().starts_with(&prefix) => {}
                _ => return false,
            }
        }
    }

    if schema.category_column.is_some() {
        if let Some(wanted) = filters.category() {
            match record.category() {
                Some(value) if value.trim().eq_ignore_ascii_case(wanted) => {}
                _ => return false,
            }
        }
    }

    if schema.department_column.is_some() {
        if let Some(wanted) = filters.department() {
            match record.department() {
                Some(value) if value.trim().eq_ignore_ascii_case(wanted) => {}
                _ => return false,
            }
        }
    }

    if !tags.is_empty() {
        let have = record.tags();
        let hit = |t: &String| have.contains(t);
        let ok = match filters.tag_match {
            TagMatch::All => tags.iter().all(hit),
            TagMatch::Any => tags.iter().any(hit),
        };
        if !ok {
            return false;
        }
    }

    true
}

/// Stable sort; results missing the sort attribute go last either way.
pub fn sort(
    mut results: Vec<SearchResult>,
    field: SortField,
    direction: SortDirection,
) -> Vec<SearchResult> {
    let directed = |ord: Ordering| match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    };

    match field {
        SortField::Relevance => results.sort_by(|a, b| {
            directed(a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
        }),
        SortField::Title => {
            let mut keyed: Vec<(String, SearchResult)> =
                results.into_iter().map(|r| (fold_key(&r.title), r)).collect();
            keyed.sort_by(|(ka, a), (kb, b)| directed(ka.cmp(kb).then_with(|| a.title.cmp(&b.title))));
            results = keyed.into_iter().map(|(_, r)| r).collect();
        }
        SortField::Date => results.sort_by(|a, b| {
            missing_last(a.record.date(), b.record.date(), |x, y| directed(x.cmp(y)))
        }),
        SortField::Year => results.sort_by(|a, b| {
            missing_last(a.record.year(), b.record.year(), |x, y| directed(x.cmp(&y)))
        }),
    }
    results
}

fn missing_last<T>(a: Option<T>, b: Option<T>, cmp: impl Fn(T, T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => cmp(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Accent- and case-insensitive collation key.
pub fn fold_key(value: &str) -> String {
    value
        .nfkd()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Slices one 1-based page. A page past the end is empty, never an error.
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Page<T> {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(page_size);
    let start = (page - 1).saturating_mul(page_size);
    let slice = if start < total_items {
        let end = (start + page_size).min(total_items);
        items[start..end].to_vec()
    } else {
        Vec::new()
    };

    Page {
        items: slice,
        page,
        page_size,
        total_items,
        total_pages,
        has_next: page < total_pages,
        has_previous: page > 1 && total_pages > 0,
    }
}

pub fn facets(results: &[SearchResult], filters: &SearchFilters) -> Facets {
    let mut kinds: BTreeMap<EntityKind, usize> = BTreeMap::new();
    let mut years: BTreeMap<i32, usize> = BTreeMap::new();
    let mut decades: BTreeMap<String, usize> = BTreeMap::new();
    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    let mut departments: BTreeMap<String, usize> = BTreeMap::new();
    let mut tags: BTreeMap<String, usize> = BTreeMap::new();

    for result in results {
        *kinds.entry(result.kind).or_default() += 1;
        if let Some(year) = result.record.year() {
            *years.entry(year).or_default() += 1;
            *decades.entry(decade_label(year)).or_default() += 1;
        }
        if let Some(category) = result.record.category().map(str::trim).filter(|c| !c.is_empty()) {
            *categories.entry(category.to_string()).or_default() += 1;
        }
        if let Some(dept) = result.record.department().map(str::trim).filter(|d| !d.is_empty()) {
            *departments.entry(dept.to_string()).or_default() += 1;
        }
        for tag in result.record.tags() {
            *tags.entry(tag).or_default() += 1;
        }
    }

    let active_decade = filters.decade().and_then(decade_prefix);
    let active_tags = filters.normalized_tags();

    Facets {
        kinds: kinds
            .into_iter()
            .map(|(kind, count)| FacetEntry {
                value: kind.as_str().to_string(),
                count,
                selected: false,
            })
            .collect(),
        years: years
            .into_iter()
            .rev()
            .map(|(year, count)| FacetEntry {
                value: year.to_string(),
                count,
                selected: filters
                    .year_range
                    .map(|r| r.contains(year))
                    .unwrap_or(false),
            })
            .collect(),
        decades: decades
            .into_iter()
            .rev()
            .map(|(decade, count)| FacetEntry {
                selected: active_decade
                    .as_deref()
                    .map(|p| decade.starts_with(p))
                    .unwrap_or(false),
                value: decade,
                count,
            })
            .collect(),
        categories: by_count(categories, |v| {
            filters
                .category()
                .map(|c| c.eq_ignore_ascii_case(v))
                .unwrap_or(false)
        }),
        departments: by_count(departments, |v| {
            filters
                .department()
                .map(|d| d.eq_ignore_ascii_case(v))
                .unwrap_or(false)
        }),
        tags: by_count(tags, |v| active_tags.iter().any(|t| t == v)),
    }
}

fn by_count(counts: BTreeMap<String, usize>, selected: impl Fn(&str) -> bool) -> Vec<FacetEntry> {
    let mut entries: Vec<FacetEntry> = counts
        .into_iter()
        .map(|(value, count)| FacetEntry {
            selected: selected(&value),
            value,
            count,
        })
        .collect();
    // BTreeMap order breaks count ties alphabetically; the sort is stable.
    entries.sort_by(|a, b| b.count.cmp(&a.count));
    entries
}

/// Human-readable list of the active filters.
pub fn summarize(filters: &SearchFilters) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(range) = &filters.year_range {
        if range.is_empty() {
            out.push(format!("Years: {}-{} (no matches)", range.start, range.end));
        } else if range.start == range.end {
            out.push(format!("Year: {}", range.start));
        } else {
            out.push(format!("Years: {}-{}", range.start, range.end));
        }
    }
    if let Some(decade) = filters.decade() {
        let label = decade
            .parse::<i32>()
            .map(decade_label)
            .unwrap_or_else(|_| decade.to_string());
        out.push(format!("Decade: {label}"));
    }
    if let Some(category) = filters.category() {
        out.push(format!("Category: {}", title_case(category)));
    }
    if let Some(department) = filters.department() {
        out.push(format!("Department: {department}"));
    }
    let tags = filters.normalized_tags();
    if !tags.is_empty() {
        let mode = match filters.tag_match {
            TagMatch::All => "all",
            TagMatch::Any => "any",
        };
        out.push(format!("Tags ({mode}): {}", tags.join(", ")));
    }
    out
}

fn title_case(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
