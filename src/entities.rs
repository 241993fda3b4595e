//! The four record kinds held by the kiosk store.
//!
//! Each kind owns one base table and one FTS5 external-content index
//! (`<table>_fts`). The [`EntitySchema`] describes which columns feed the
//! index, which attributes are facetable, and how the index DDL is built so
//! the index manager can drop and recreate it without consulting migrations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use ts_rs::TS;

use crate::error::codes;
use crate::{AppError, AppResult};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EntityKind {
    Alumni,
    Publications,
    Photos,
    Faculty,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Alumni,
        EntityKind::Publications,
        EntityKind::Photos,
        EntityKind::Faculty,
    ];

    pub fn as_str(self) -> &'static str {
        self.schema().table
    }

    pub fn table(self) -> &'static str {
        self.schema().table
    }

    pub fn fts_table(self) -> &'static str {
        self.schema().fts_table
    }

    pub fn schema(self) -> &'static EntitySchema {
        match self {
            EntityKind::Alumni => &ALUMNI_SCHEMA,
            EntityKind::Publications => &PUBLICATIONS_SCHEMA,
            EntityKind::Photos => &PHOTOS_SCHEMA,
            EntityKind::Faculty => &FACULTY_SCHEMA,
        }
    }

    /// Resolves `kinds` to an explicit list, defaulting to every kind.
    pub fn resolve(kinds: Option<&[EntityKind]>) -> Vec<EntityKind> {
        match kinds {
            Some(kinds) if !kinds.is_empty() => {
                let mut out: Vec<EntityKind> = kinds.to_vec();
                out.sort();
                out.dedup();
                out
            }
            _ => EntityKind::ALL.to_vec(),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "alumni" | "people" | "person" => Ok(EntityKind::Alumni),
            "publications" | "publication" => Ok(EntityKind::Publications),
            "photos" | "photo" => Ok(EntityKind::Photos),
            "faculty" | "staff" => Ok(EntityKind::Faculty),
            other => Err(
                AppError::new(codes::UNKNOWN_KIND, format!("Unknown entity kind '{other}'"))
                    .with_context("kind", other.to_string()),
            ),
        }
    }
}

/// Static description of one entity table and its text index.
#[derive(Debug)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub table: &'static str,
    pub fts_table: &'static str,
    /// Column holding the display name or title.
    pub display_column: &'static str,
    /// Every non-id column, in insert order.
    pub columns: &'static [&'static str],
    /// Columns a bulk-import row must carry.
    pub required: &'static [&'static str],
    /// Columns mirrored into the FTS index; the first is the display column.
    pub fts_columns: &'static [&'static str],
    /// bm25 weight per FTS column.
    pub fts_weights: &'static [f64],
    pub year_column: Option<&'static str>,
    pub category_column: Option<&'static str>,
    pub department_column: Option<&'static str>,
}

impl EntitySchema {
    /// DDL for the FTS table plus the triggers keeping it in step with the
    /// base table.
    pub fn fts_create_statements(&self) -> Vec<String> {
        let table = self.table;
        let fts = self.fts_table;
        let cols = self.fts_columns.join(", ");
        let new_vals = self
            .fts_columns
            .iter()
            .map(|c| format!("new.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let old_vals = self
            .fts_columns
            .iter()
            .map(|c| format!("old.{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        vec![
            format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5({cols}, content='{table}', content_rowid='id', tokenize='porter unicode61')"
            ),
            format!(
                "CREATE TRIGGER IF NOT EXISTS {table}_fts_ai AFTER INSERT ON {table} BEGIN \
                 INSERT INTO {fts}(rowid, {cols}) VALUES (new.id, {new_vals}); END"
            ),
            format!(
                "CREATE TRIGGER IF NOT EXISTS {table}_fts_ad AFTER DELETE ON {table} BEGIN \
                 INSERT INTO {fts}({fts}, rowid, {cols}) VALUES ('delete', old.id, {old_vals}); END"
            ),
            format!(
                "CREATE TRIGGER IF NOT EXISTS {table}_fts_au AFTER UPDATE ON {table} BEGIN \
                 INSERT INTO {fts}({fts}, rowid, {cols}) VALUES ('delete', old.id, {old_vals}); \
                 INSERT INTO {fts}(rowid, {cols}) VALUES (new.id, {new_vals}); END"
            ),
        ]
    }

    pub fn fts_drop_statements(&self) -> Vec<String> {
        let table = self.table;
        vec![
            format!("DROP TRIGGER IF EXISTS {table}_fts_ai"),
            format!("DROP TRIGGER IF EXISTS {table}_fts_ad"),
            format!("DROP TRIGGER IF EXISTS {table}_fts_au"),
            format!("DROP TABLE IF EXISTS {}", self.fts_table),
        ]
    }

    /// `bm25(<fts>, w1, w2, ...)` expression; lower is better.
    pub fn bm25_expr(&self) -> String {
        self.bm25_expr_with(self.fts_weights)
    }

    /// Same as [`bm25_expr`](Self::bm25_expr) with caller weights, one per
    /// FTS column. Missing or non-positive entries keep the column default.
    pub fn bm25_expr_with(&self, weights: &[f64]) -> String {
        let weights = self
            .fts_weights
            .iter()
            .enumerate()
            .map(|(idx, default)| {
                let weight = weights
                    .get(idx)
                    .copied()
                    .filter(|w| w.is_finite() && *w > 0.0)
                    .unwrap_or(*default);
                format!("{weight:.3}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("bm25({}, {weights})", self.fts_table)
    }

    /// Position of an indexed column, matched case-insensitively.
    pub fn fts_column(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.fts_columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }
}

static ALUMNI_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Alumni,
    table: "alumni",
    fts_table: "alumni_fts",
    display_column: "full_name",
    columns: &[
        "full_name",
        "first_name",
        "middle_name",
        "last_name",
        "class_role",
        "grad_year",
        "grad_date",
        "photo_file",
        "caption",
        "tags",
        "sort_key",
    ],
    required: &["first_name", "last_name", "grad_year"],
    fts_columns: &["full_name", "class_role", "caption", "tags"],
    fts_weights: &[10.0, 2.0, 1.0, 1.0],
    year_column: Some("grad_year"),
    category_column: Some("class_role"),
    department_column: None,
};

static PUBLICATIONS_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Publications,
    table: "publications",
    fts_table: "publications_fts",
    display_column: "title",
    columns: &[
        "title",
        "pub_type",
        "year",
        "volume",
        "issue",
        "issue_date",
        "description",
        "department",
        "tags",
        "pdf_path",
        "thumbnail_path",
        "sort_key",
    ],
    required: &["title", "pub_type", "year"],
    fts_columns: &["title", "description", "department", "tags"],
    fts_weights: &[10.0, 2.0, 1.0, 1.0],
    year_column: Some("year"),
    category_column: Some("pub_type"),
    department_column: Some("department"),
};

static PHOTOS_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Photos,
    table: "photos",
    fts_table: "photos_fts",
    display_column: "title",
    columns: &[
        "title",
        "caption",
        "year",
        "date_taken",
        "collection",
        "photographer",
        "tags",
        "image_path",
        "thumbnail_path",
        "sort_key",
    ],
    required: &["title"],
    fts_columns: &["title", "caption", "collection", "photographer", "tags"],
    fts_weights: &[10.0, 3.0, 1.0, 1.0, 1.0],
    year_column: Some("year"),
    category_column: None,
    department_column: Some("collection"),
};

static FACULTY_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Faculty,
    table: "faculty",
    fts_table: "faculty_fts",
    display_column: "full_name",
    columns: &[
        "full_name",
        "position",
        "department",
        "start_year",
        "end_year",
        "bio",
        "photo_file",
        "tags",
        "sort_key",
    ],
    required: &["full_name", "department"],
    fts_columns: &["full_name", "position", "department", "bio", "tags"],
    fts_weights: &[10.0, 2.0, 2.0, 1.0, 1.0],
    year_column: Some("start_year"),
    category_column: None,
    department_column: Some("department"),
};

/// Closed set of publication categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PublicationType {
    Yearbook,
    Newspaper,
    Magazine,
    Newsletter,
    Program,
}

impl PublicationType {
    pub const ALL: [PublicationType; 5] = [
        PublicationType::Yearbook,
        PublicationType::Newspaper,
        PublicationType::Magazine,
        PublicationType::Newsletter,
        PublicationType::Program,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PublicationType::Yearbook => "yearbook",
            PublicationType::Newspaper => "newspaper",
            PublicationType::Magazine => "magazine",
            PublicationType::Newsletter => "newsletter",
            PublicationType::Program => "program",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PublicationType::Yearbook => "Yearbook",
            PublicationType::Newspaper => "Newspaper",
            PublicationType::Magazine => "Magazine",
            PublicationType::Newsletter => "Newsletter",
            PublicationType::Program => "Program",
        }
    }
}

impl FromStr for PublicationType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim().to_ascii_lowercase();
        PublicationType::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| {
                let allowed = PublicationType::ALL
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("'{}' is not one of: {allowed}", value.trim())
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AlumniRecord {
    #[ts(type = "number")]
    pub id: i64,
    pub full_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub class_role: Option<String>,
    pub grad_year: Option<i32>,
    pub grad_date: Option<String>,
    pub photo_file: Option<String>,
    pub caption: Option<String>,
    pub tags: Option<String>,
    pub sort_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PublicationRecord {
    #[ts(type = "number")]
    pub id: i64,
    pub title: String,
    pub pub_type: PublicationType,
    pub year: Option<i32>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub issue_date: Option<String>,
    pub description: Option<String>,
    pub department: Option<String>,
    pub tags: Option<String>,
    pub pdf_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub sort_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PhotoRecord {
    #[ts(type = "number")]
    pub id: i64,
    pub title: String,
    pub caption: Option<String>,
    pub year: Option<i32>,
    pub date_taken: Option<String>,
    pub collection: Option<String>,
    pub photographer: Option<String>,
    pub tags: Option<String>,
    pub image_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub sort_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FacultyRecord {
    #[ts(type = "number")]
    pub id: i64,
    pub full_name: String,
    pub position: Option<String>,
    pub department: Option<String>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub bio: Option<String>,
    pub photo_file: Option<String>,
    pub tags: Option<String>,
    pub sort_key: String,
}

/// A record of any kind. Cross-kind code only touches the accessors below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum EntityRecord {
    Alumni(AlumniRecord),
    Publications(PublicationRecord),
    Photos(PhotoRecord),
    Faculty(FacultyRecord),
}

impl EntityRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRecord::Alumni(_) => EntityKind::Alumni,
            EntityRecord::Publications(_) => EntityKind::Publications,
            EntityRecord::Photos(_) => EntityKind::Photos,
            EntityRecord::Faculty(_) => EntityKind::Faculty,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            EntityRecord::Alumni(r) => r.id,
            EntityRecord::Publications(r) => r.id,
            EntityRecord::Photos(r) => r.id,
            EntityRecord::Faculty(r) => r.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            EntityRecord::Alumni(r) => &r.full_name,
            EntityRecord::Publications(r) => &r.title,
            EntityRecord::Photos(r) => &r.title,
            EntityRecord::Faculty(r) => &r.full_name,
        }
    }

    pub fn sort_key(&self) -> &str {
        match self {
            EntityRecord::Alumni(r) => &r.sort_key,
            EntityRecord::Publications(r) => &r.sort_key,
            EntityRecord::Photos(r) => &r.sort_key,
            EntityRecord::Faculty(r) => &r.sort_key,
        }
    }

    pub fn subtitle(&self) -> Option<String> {
        match self {
            EntityRecord::Alumni(r) => {
                let class = r.grad_year.map(|y| format!("Class of {y}"));
                join_parts([class, r.class_role.clone()])
            }
            EntityRecord::Publications(r) => join_parts([
                Some(r.pub_type.label().to_string()),
                r.year.map(|y| y.to_string()),
            ]),
            EntityRecord::Photos(r) => {
                join_parts([r.collection.clone(), r.year.map(|y| y.to_string())])
            }
            EntityRecord::Faculty(r) => join_parts([r.position.clone(), r.department.clone()]),
        }
    }

    pub fn thumbnail(&self) -> Option<&str> {
        match self {
            EntityRecord::Alumni(r) => r.photo_file.as_deref(),
            EntityRecord::Publications(r) => r.thumbnail_path.as_deref(),
            EntityRecord::Photos(r) => r.thumbnail_path.as_deref().or(r.image_path.as_deref()),
            EntityRecord::Faculty(r) => r.photo_file.as_deref(),
        }
    }

    pub fn year(&self) -> Option<i32> {
        match self {
            EntityRecord::Alumni(r) => r.grad_year,
            EntityRecord::Publications(r) => r.year,
            EntityRecord::Photos(r) => r.year,
            EntityRecord::Faculty(r) => r.start_year,
        }
    }

    pub fn decade(&self) -> Option<String> {
        self.year().map(decade_label)
    }

    /// Category attribute, `None` for kinds that have no category.
    pub fn category(&self) -> Option<&str> {
        match self {
            EntityRecord::Alumni(r) => r.class_role.as_deref(),
            EntityRecord::Publications(r) => Some(r.pub_type.as_str()),
            EntityRecord::Photos(_) | EntityRecord::Faculty(_) => None,
        }
    }

    pub fn department(&self) -> Option<&str> {
        match self {
            EntityRecord::Alumni(_) => None,
            EntityRecord::Publications(r) => r.department.as_deref(),
            EntityRecord::Photos(r) => r.collection.as_deref(),
            EntityRecord::Faculty(r) => r.department.as_deref(),
        }
    }

    /// ISO date attribute used for date sorting.
    pub fn date(&self) -> Option<&str> {
        match self {
            EntityRecord::Alumni(r) => r.grad_date.as_deref(),
            EntityRecord::Publications(r) => r.issue_date.as_deref(),
            EntityRecord::Photos(r) => r.date_taken.as_deref(),
            EntityRecord::Faculty(_) => None,
        }
    }

    pub fn tags(&self) -> Vec<String> {
        let raw = match self {
            EntityRecord::Alumni(r) => r.tags.as_deref(),
            EntityRecord::Publications(r) => r.tags.as_deref(),
            EntityRecord::Photos(r) => r.tags.as_deref(),
            EntityRecord::Faculty(r) => r.tags.as_deref(),
        };
        split_tags(raw.unwrap_or_default())
    }

    /// Free-text fields other than the title, in descending importance.
    pub fn secondary_text(&self) -> Vec<&str> {
        let fields: Vec<Option<&str>> = match self {
            EntityRecord::Alumni(r) => vec![
                r.class_role.as_deref(),
                r.caption.as_deref(),
                r.tags.as_deref(),
            ],
            EntityRecord::Publications(r) => vec![
                r.description.as_deref(),
                r.department.as_deref(),
                r.tags.as_deref(),
            ],
            EntityRecord::Photos(r) => vec![
                r.caption.as_deref(),
                r.collection.as_deref(),
                r.photographer.as_deref(),
                r.tags.as_deref(),
            ],
            EntityRecord::Faculty(r) => vec![
                r.position.as_deref(),
                r.department.as_deref(),
                r.bio.as_deref(),
                r.tags.as_deref(),
            ],
        };
        fields.into_iter().flatten().collect()
    }

    /// Decodes a `SELECT t.*` row of the given kind.
    pub fn from_row(kind: EntityKind, row: &SqliteRow) -> AppResult<EntityRecord> {
        let record = match kind {
            EntityKind::Alumni => EntityRecord::Alumni(AlumniRecord {
                id: row.try_get("id")?,
                full_name: row.try_get("full_name")?,
                first_name: row.try_get("first_name")?,
                middle_name: row.try_get("middle_name")?,
                last_name: row.try_get("last_name")?,
                class_role: row.try_get("class_role")?,
                grad_year: row.try_get("grad_year")?,
                grad_date: row.try_get("grad_date")?,
                photo_file: row.try_get("photo_file")?,
                caption: row.try_get("caption")?,
                tags: row.try_get("tags")?,
                sort_key: row.try_get("sort_key")?,
            }),
            EntityKind::Publications => {
                let raw_type: String = row.try_get("pub_type")?;
                let pub_type = raw_type.parse::<PublicationType>().map_err(|err| {
                    AppError::new("ENTITY/INVALID_CATEGORY", err)
                        .with_context("table", "publications")
                })?;
                EntityRecord::Publications(PublicationRecord {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    pub_type,
                    year: row.try_get("year")?,
                    volume: row.try_get("volume")?,
                    issue: row.try_get("issue")?,
                    issue_date: row.try_get("issue_date")?,
                    description: row.try_get("description")?,
                    department: row.try_get("department")?,
                    tags: row.try_get("tags")?,
                    pdf_path: row.try_get("pdf_path")?,
                    thumbnail_path: row.try_get("thumbnail_path")?,
                    sort_key: row.try_get("sort_key")?,
                })
            }
            EntityKind::Photos => EntityRecord::Photos(PhotoRecord {
                id: row.try_get("id")?,
                title: row.try_get("title")?,
                caption: row.try_get("caption")?,
                year: row.try_get("year")?,
                date_taken: row.try_get("date_taken")?,
                collection: row.try_get("collection")?,
                photographer: row.try_get("photographer")?,
                tags: row.try_get("tags")?,
                image_path: row.try_get("image_path")?,
                thumbnail_path: row.try_get("thumbnail_path")?,
                sort_key: row.try_get("sort_key")?,
            }),
            EntityKind::Faculty => EntityRecord::Faculty(FacultyRecord {
                id: row.try_get("id")?,
                full_name: row.try_get("full_name")?,
                position: row.try_get("position")?,
                department: row.try_get("department")?,
                start_year: row.try_get("start_year")?,
                end_year: row.try_get("end_year")?,
                bio: row.try_get("bio")?,
                photo_file: row.try_get("photo_file")?,
                tags: row.try_get("tags")?,
                sort_key: row.try_get("sort_key")?,
            }),
        };
        Ok(record)
    }
}

/// `1994` -> `"1990s"`.
pub fn decade_label(year: i32) -> String {
    format!("{}s", year - year.rem_euclid(10))
}

/// Parses `"1990s"`, `"1990"` or `"199"` into the three-digit year prefix
/// shared by every year in that decade.
pub fn decade_prefix(decade: &str) -> Option<String> {
    let digits: String = decade
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() < 3 {
        return None;
    }
    Some(digits[..3].to_string())
}

pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn join_parts<const N: usize>(parts: [Option<String>; N]) -> Option<String> {
    let joined = parts
        .into_iter()
        .flatten()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" · ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}
