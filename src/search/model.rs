use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::entities::{EntityKind, EntityRecord};

/// How a result was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MatchProvenance {
    /// Primary index; a query term appears verbatim in the record.
    Exact,
    /// Primary index; matched only through stemming or prefix expansion.
    Stemmed,
    /// Substring scan over the base table.
    Fallback,
}

/// One hit. Built fresh for every query and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SearchResult {
    pub kind: EntityKind,
    #[ts(type = "number")]
    pub id: i64,
    pub title: String,
    pub subtitle: Option<String>,
    pub thumbnail: Option<String>,
    /// Larger is more relevant; only comparable within one query execution.
    pub score: f64,
    pub provenance: MatchProvenance,
    pub record: EntityRecord,
}

impl SearchResult {
    pub fn new(record: EntityRecord, score: f64, provenance: MatchProvenance) -> Self {
        Self {
            kind: record.kind(),
            id: record.id(),
            title: record.title().to_string(),
            subtitle: record.subtitle(),
            thumbnail: record.thumbnail().map(str::to_string),
            score: if score.is_finite() { score.max(0.0) } else { 0.0 },
            provenance,
            record,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.provenance == MatchProvenance::Fallback
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    /// An inverted range contains nothing.
    pub fn contains(&self, year: i32) -> bool {
        self.start <= self.end && (self.start..=self.end).contains(&year)
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum TagMatch {
    #[default]
    All,
    Any,
}

/// Structured narrowing. An absent field imposes no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SearchFilters {
    #[serde(default)]
    pub year_range: Option<YearRange>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub decade: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tag_match: TagMatch,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.year_range.is_none()
            && non_blank(&self.category).is_none()
            && non_blank(&self.department).is_none()
            && non_blank(&self.decade).is_none()
            && self.normalized_tags().is_empty()
    }

    pub fn with_year_range(mut self, start: i32, end: i32) -> Self {
        self.year_range = Some(YearRange::new(start, end));
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn with_decade(mut self, decade: impl Into<String>) -> Self {
        self.decade = Some(decade.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn category(&self) -> Option<&str> {
        non_blank(&self.category)
    }

    pub fn department(&self) -> Option<&str> {
        non_blank(&self.department)
    }

    pub fn decade(&self) -> Option<&str> {
        non_blank(&self.decade)
    }

    /// Lowercased, trimmed, de-duplicated tags.
    pub fn normalized_tags(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for tag in &self.tags {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && !out.contains(&tag) {
                out.push(tag);
            }
        }
        out
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// How free text is turned into a match expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum QueryMode {
    /// Terms are ORed; quoted text stays a phrase.
    #[default]
    Simple,
    /// `and`/`or`/`not` between terms are operators.
    Boolean,
}

/// An indexed column to search, optionally boosted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FieldWeight {
    pub field: String,
    /// Replaces the column's default bm25 weight.
    #[serde(default)]
    pub weight: Option<f64>,
}

impl FieldWeight {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            weight: None,
        }
    }

    pub fn boosted(field: impl Into<String>, weight: f64) -> Self {
        Self {
            field: field.into(),
            weight: Some(weight),
        }
    }
}

impl FromStr for FieldWeight {
    type Err = String;

    /// `column` or `column=weight`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once('=') {
            None if !value.trim().is_empty() => Ok(Self::new(value.trim())),
            None => Err("field name is empty".to_string()),
            Some((field, weight)) => {
                let weight: f64 = weight
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid weight '{}'", weight.trim()))?;
                if field.trim().is_empty() || !weight.is_finite() || weight <= 0.0 {
                    return Err(format!("invalid field boost '{value}'"));
                }
                Ok(Self::boosted(field.trim(), weight))
            }
        }
    }
}

/// Shape of a search beyond its text and filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct QueryOptions {
    #[serde(default)]
    pub mode: QueryMode,
    /// Empty searches every indexed column.
    #[serde(default)]
    pub fields: Vec<FieldWeight>,
}

impl QueryOptions {
    pub fn boolean() -> Self {
        Self {
            mode: QueryMode::Boolean,
            ..Self::default()
        }
    }

    pub fn with_fields<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = FieldWeight>,
    {
        self.fields = fields.into_iter().collect();
        self
    }

    /// Plain text over every column.
    pub fn is_plain(&self) -> bool {
        self.mode == QueryMode::Simple && self.fields.is_empty()
    }
}
