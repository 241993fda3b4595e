//! Bulk loading of one entity kind from tabular rows.
//!
//! The pipeline is validate, back up, transform, load in one transaction,
//! rebuild the index. Any failure after the backup restores it, so the
//! store never ends up between the old and new datasets.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub mod execute;
pub mod report;
pub mod transform;
pub mod validator;

pub use execute::{ImportError, ImportManager, ImportResult};
pub use report::write_import_report;
pub use transform::{normalize_photo_path, transform_row, CellValue, PreparedRow};
pub use validator::{validate_rows, ValidationReport};

/// One input row keyed by header name.
pub type ImportRow = BTreeMap<String, String>;

/// Individual validation messages kept before the "N more" summary line.
pub const MAX_REPORTED_ERRORS: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ImportMode {
    /// Upsert by `id`; rows not in the input are kept.
    Merge,
    /// Delete every row of the kind, then insert the input.
    #[default]
    Replace,
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImportMode::Merge => "merge",
            ImportMode::Replace => "replace",
        })
    }
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "merge" | "upsert" => Ok(ImportMode::Merge),
            "replace" => Ok(ImportMode::Replace),
            other => Err(format!("unknown import mode '{other}' (expected merge or replace)")),
        }
    }
}
