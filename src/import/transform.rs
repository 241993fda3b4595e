//! Row normalization into the column order of an entity table.

use super::ImportRow;
use crate::entities::{EntityKind, PublicationType};
use crate::search::filter::fold_key;

const INTEGER_COLUMNS: &[&str] = &["grad_year", "year", "start_year", "end_year"];
const PHOTO_COLUMNS: &[&str] = &["photo_file"];
const PHOTO_ROOT: &str = "/photos/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
}

/// A row ready to bind: `values` follows `EntitySchema::columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRow {
    pub id: Option<i64>,
    pub values: Vec<CellValue>,
}

impl PreparedRow {
    pub fn get(&self, kind: EntityKind, column: &str) -> Option<&CellValue> {
        let index = kind.schema().columns.iter().position(|c| *c == column)?;
        self.values.get(index)
    }
}

/// Trims and normalizes one validated row. Derivable fields (`sort_key`,
/// an alumni `full_name`) are synthesized when absent.
pub fn transform_row(kind: EntityKind, row: &ImportRow) -> Result<PreparedRow, String> {
    let schema = kind.schema();
    let text = |column: &str| {
        row.get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let id = match text("id") {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| format!("id '{raw}' is not an integer"))?,
        ),
        None => None,
    };

    let display = match (kind, text(schema.display_column)) {
        (_, Some(name)) => name,
        (EntityKind::Alumni, None) => {
            let parts: Vec<String> = ["first_name", "middle_name", "last_name"]
                .into_iter()
                .filter_map(text)
                .collect();
            parts.join(" ")
        }
        (_, None) => String::new(),
    };
    if display.is_empty() {
        return Err(format!("{} is empty", schema.display_column));
    }

    let mut values = Vec::with_capacity(schema.columns.len());
    for &column in schema.columns {
        let cell = if column == schema.display_column {
            CellValue::Text(display.clone())
        } else if column == "sort_key" {
            let source = text("sort_key").unwrap_or_else(|| display.clone());
            CellValue::Text(fold_key(&source))
        } else if INTEGER_COLUMNS.contains(&column) {
            match text(column) {
                Some(raw) => CellValue::Integer(
                    raw.parse::<i64>()
                        .map_err(|_| format!("{column} '{raw}' is not a whole number"))?,
                ),
                None => CellValue::Null,
            }
        } else if column == "pub_type" {
            let raw = text(column).unwrap_or_default();
            let parsed = raw
                .parse::<PublicationType>()
                .map_err(|err| format!("pub_type {err}"))?;
            CellValue::Text(parsed.as_str().to_string())
        } else if column == "tags" {
            text(column)
                .map(|raw| normalize_tags(&raw))
                .filter(|tags| !tags.is_empty())
                .map_or(CellValue::Null, CellValue::Text)
        } else if PHOTO_COLUMNS.contains(&column) {
            text(column)
                .and_then(|raw| normalize_photo_path(&raw))
                .map_or(CellValue::Null, CellValue::Text)
        } else {
            text(column).map_or(CellValue::Null, CellValue::Text)
        };
        values.push(cell);
    }

    Ok(PreparedRow { id, values })
}

/// Lowercased, trimmed, de-duplicated and joined with `", "`.
pub fn normalize_tags(raw: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for tag in raw.split(',') {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out.join(", ")
}

/// Reduces an exported photo path to `/photos/<relative>`.
///
/// Spreadsheet exports wrap paths in stray quotes and carry absolute
/// paths from whichever machine produced them. Anything without a
/// `photos/` segment cannot be served by the kiosk and is dropped.
pub fn normalize_photo_path(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .replace('\\', "/");
    let relative = if let Some(index) = cleaned.find(PHOTO_ROOT) {
        &cleaned[index + PHOTO_ROOT.len()..]
    } else if let Some(rest) = cleaned.strip_prefix("photos/") {
        rest
    } else {
        return None;
    };
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        None
    } else {
        Some(format!("{PHOTO_ROOT}{relative}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> ImportRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn synthesizes_alumni_name_and_sort_key() {
        let prepared = transform_row(
            EntityKind::Alumni,
            &row(&[
                ("first_name", " José "),
                ("middle_name", ""),
                ("last_name", "Núñez"),
                ("grad_year", "1994"),
            ]),
        )
        .unwrap();
        assert_eq!(
            prepared.get(EntityKind::Alumni, "full_name"),
            Some(&CellValue::Text("José Núñez".into()))
        );
        assert_eq!(
            prepared.get(EntityKind::Alumni, "sort_key"),
            Some(&CellValue::Text("jose nunez".into()))
        );
        assert_eq!(
            prepared.get(EntityKind::Alumni, "grad_year"),
            Some(&CellValue::Integer(1994))
        );
        assert_eq!(
            prepared.get(EntityKind::Alumni, "caption"),
            Some(&CellValue::Null)
        );
        assert_eq!(prepared.id, None);
    }

    #[test]
    fn canonicalizes_publication_type_and_tags() {
        let prepared = transform_row(
            EntityKind::Publications,
            &row(&[
                ("id", "4"),
                ("title", "The Echo"),
                ("pub_type", " Newspaper "),
                ("year", "1988"),
                ("tags", "Sports, sports ,  Band,"),
            ]),
        )
        .unwrap();
        assert_eq!(prepared.id, Some(4));
        assert_eq!(
            prepared.get(EntityKind::Publications, "pub_type"),
            Some(&CellValue::Text("newspaper".into()))
        );
        assert_eq!(
            prepared.get(EntityKind::Publications, "tags"),
            Some(&CellValue::Text("sports, band".into()))
        );
    }

    #[test]
    fn empty_display_name_is_rejected() {
        let err = transform_row(EntityKind::Photos, &row(&[("title", "  ")])).unwrap_err();
        assert!(err.contains("title"));
    }

    #[test]
    fn photo_paths_are_reduced_to_kiosk_root() {
        assert_eq!(
            normalize_photo_path("\"C:\\Users\\admin\\site\\photos\\1994\\smith.jpg\""),
            Some("/photos/1994/smith.jpg".into())
        );
        assert_eq!(
            normalize_photo_path(" /var/www/photos/a.png "),
            Some("/photos/a.png".into())
        );
        assert_eq!(normalize_photo_path("photos/b.png"), Some("/photos/b.png".into()));
        assert_eq!(normalize_photo_path("smith.jpg"), None);
        assert_eq!(normalize_photo_path("/photos/"), None);
    }
}
