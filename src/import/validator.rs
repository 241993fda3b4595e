use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::{ImportMode, ImportRow, MAX_REPORTED_ERRORS};
use crate::entities::{EntityKind, PublicationType};

pub const MIN_YEAR: i64 = 1800;
pub const MAX_YEAR: i64 = 2100;

const YEAR_COLUMNS: &[&str] = &["grad_year", "year", "start_year", "end_year"];
const DATE_COLUMNS: &[&str] = &["grad_date", "issue_date", "date_taken"];

/// Outcome of checking a dataset before anything is written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ValidationReport {
    #[ts(type = "number")]
    pub rows_checked: usize,
    /// Capped list; see `total_errors` for the real count.
    pub errors: Vec<String>,
    #[ts(type = "number")]
    pub total_errors: usize,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.total_errors == 0
    }

    fn push_error(&mut self, message: String) {
        self.total_errors += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(message);
        }
    }

    fn finish(mut self) -> Self {
        let hidden = self.total_errors.saturating_sub(self.errors.len());
        if hidden > 0 {
            self.errors.push(format!("... and {hidden} more errors"));
        }
        self
    }
}

/// Checks every row and collects every problem; never stops at the first.
pub fn validate_rows(kind: EntityKind, rows: &[ImportRow], mode: ImportMode) -> ValidationReport {
    let schema = kind.schema();
    let mut report = ValidationReport {
        rows_checked: rows.len(),
        ..ValidationReport::default()
    };

    if rows.is_empty() {
        report.push_error("No rows to import".to_string());
        return report.finish();
    }

    let known: HashSet<&str> = schema
        .columns
        .iter()
        .copied()
        .chain(std::iter::once("id"))
        .collect();
    let unknown: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys())
        .map(String::as_str)
        .filter(|column| !known.contains(column))
        .collect();
    for column in unknown {
        report
            .warnings
            .push(format!("Ignoring unknown column '{column}'"));
    }

    let mut seen_ids = HashSet::new();
    for (index, row) in rows.iter().enumerate() {
        let line = index + 1;
        let value = |column: &str| row.get(column).map(|v| v.trim()).filter(|v| !v.is_empty());

        match value("id") {
            Some(raw) => match raw.parse::<i64>() {
                Ok(id) if id > 0 => {
                    if !seen_ids.insert(id) {
                        report.push_error(format!("Row {line}: duplicate id {id}"));
                    }
                }
                _ => report.push_error(format!("Row {line}: id '{raw}' is not a positive integer")),
            },
            None if mode == ImportMode::Merge => {
                report.push_error(format!("Row {line}: missing required field 'id' for merge"));
            }
            None => {}
        }

        for &field in schema.required {
            if value(field).is_none() {
                report.push_error(format!("Row {line}: missing required field '{field}'"));
            }
        }

        for &column in YEAR_COLUMNS.iter().filter(|c| known.contains(**c)) {
            if let Some(raw) = value(column) {
                match raw.parse::<i64>() {
                    Ok(year) if (MIN_YEAR..=MAX_YEAR).contains(&year) => {}
                    Ok(year) => report.push_error(format!(
                        "Row {line}: {column} {year} is outside {MIN_YEAR}-{MAX_YEAR}"
                    )),
                    Err(_) => report.push_error(format!(
                        "Row {line}: {column} '{raw}' is not a whole number"
                    )),
                }
            }
        }

        for &column in DATE_COLUMNS.iter().filter(|c| known.contains(**c)) {
            if let Some(raw) = value(column) {
                if !is_partial_date(raw) {
                    report.push_error(format!(
                        "Row {line}: {column} '{raw}' is not a date (YYYY, YYYY-MM or YYYY-MM-DD)"
                    ));
                }
            }
        }

        if kind == EntityKind::Publications {
            if let Some(raw) = value("pub_type") {
                if let Err(err) = raw.parse::<PublicationType>() {
                    report.push_error(format!("Row {line}: pub_type {err}"));
                }
            }
        }

        if kind == EntityKind::Faculty {
            let start = value("start_year").and_then(|v| v.parse::<i64>().ok());
            let end = value("end_year").and_then(|v| v.parse::<i64>().ok());
            if let (Some(start), Some(end)) = (start, end) {
                if end < start {
                    report.push_error(format!(
                        "Row {line}: end_year {end} is before start_year {start}"
                    ));
                }
            }
        }
    }

    report.finish()
}

fn is_partial_date(raw: &str) -> bool {
    if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() {
        return true;
    }
    if let Some((year, month)) = raw.split_once('-') {
        return year.len() == 4
            && year.parse::<u32>().is_ok()
            && matches!(month.parse::<u32>(), Ok(1..=12));
    }
    raw.len() == 4 && raw.parse::<u32>().is_ok()
}
