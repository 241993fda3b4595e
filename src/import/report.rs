use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use super::execute::ImportResult;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportReportFile<'a> {
    generated_at: String,
    app_version: &'static str,
    source: Option<String>,
    result: &'a ImportResult,
}

/// Writes `import-<kind>-<timestamp>.json` under `reports_dir` and returns
/// its path.
pub fn write_import_report(
    reports_dir: &Path,
    source: Option<&Path>,
    result: &ImportResult,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let now = Utc::now();
    let file_name = format!(
        "import-{}-{}.json",
        result.kind,
        now.format("%Y%m%d-%H%M%S%3f")
    );
    let path = reports_dir.join(file_name);
    let payload = ImportReportFile {
        generated_at: now.to_rfc3339(),
        app_version: env!("CARGO_PKG_VERSION"),
        source: source.map(|p| p.display().to_string()),
        result,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize import report")?;
    fs::write(&path, json).with_context(|| format!("write import report {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityKind;
    use crate::import::ImportMode;

    #[test]
    fn writes_report_json() {
        let tmp = tempfile::tempdir().unwrap();
        let result = ImportResult {
            success: false,
            kind: EntityKind::Alumni,
            mode: ImportMode::Replace,
            records_imported: 0,
            errors: vec!["Row 2: missing required field 'last_name'".into()],
            warnings: Vec::new(),
            backup_id: None,
            restored: false,
            duration_ms: 3,
        };
        let path = write_import_report(&tmp.path().join("reports"), None, &result).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("import-alumni-"));

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["result"]["recordsImported"], 0);
        assert_eq!(value["result"]["errors"][0], "Row 2: missing required field 'last_name'");
    }
}
