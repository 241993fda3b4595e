use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use std::io::Error as IoError;
use ts_rs::TS;

pub mod codes;

/// A structured engine error that can be serialized and surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to an operator.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[ts(as = "Option<HashMap<String, String>>", optional)]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

/// Coarse error families used by the search status object and by callers
/// that need to branch on failure type without parsing codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ErrorKind {
    Syntax,
    IndexCorrupt,
    Connection,
    Timeout,
    Validation,
    BackupNotFound,
    BackupCorrupt,
    Other,
}

impl ErrorKind {
    /// Failures worth retrying against the primary index before giving up on it.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Connection)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::IndexCorrupt => "index_corrupt",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::BackupNotFound => "backup_not_found",
            ErrorKind::BackupCorrupt => "backup_corrupt",
            ErrorKind::Other => "other",
        };
        f.write_str(label)
    }
}

impl AppError {
    /// Default code used when an upstream error does not expose a specific code.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";
    /// Code used for errors created from free-form messages.
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";

    /// Construct a new error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// Classifies the error into one of the engine's error families.
    ///
    /// SQLite reports most failures as a generic `SQLITE_ERROR`, so the
    /// message is inspected for the FTS5 and schema signatures.
    pub fn kind(&self) -> ErrorKind {
        match self.code.as_str() {
            codes::SEARCH_SYNTAX => return ErrorKind::Syntax,
            codes::SEARCH_INDEX_CORRUPT => return ErrorKind::IndexCorrupt,
            codes::SEARCH_TIMEOUT => return ErrorKind::Timeout,
            codes::IMPORT_VALIDATION => return ErrorKind::Validation,
            codes::BACKUP_NOT_FOUND => return ErrorKind::BackupNotFound,
            codes::BACKUP_CORRUPT => return ErrorKind::BackupCorrupt,
            "SQLX/POOL_TIMEOUT" | "SQLX/POOL_CLOSED" => return ErrorKind::Connection,
            _ => {}
        }
        if self.code.starts_with("IO/") {
            return ErrorKind::Connection;
        }

        let message = self.message.to_ascii_lowercase();
        if message.contains("fts5: syntax error")
            || message.contains("unterminated string")
            || message.contains("unknown special query")
        {
            return ErrorKind::Syntax;
        }
        if message.contains("no such table")
            || message.contains("no such column")
            || message.contains("malformed")
            || message.contains("vtable constructor failed")
            || message.contains("corrupt")
            || message.contains("fts5: missing row")
        {
            return ErrorKind::IndexCorrupt;
        }
        if message.contains("database is locked")
            || message.contains("database table is locked")
            || message.contains("unable to open database")
            || matches!(self.code.as_str(), "Sqlite/5" | "Sqlite/6" | "Sqlite/14")
        {
            return ErrorKind::Connection;
        }
        ErrorKind::Other
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else if error.is_io() {
            "JSON/IO"
        } else {
            "JSON/ERROR"
        };

        let mut app_error = AppError::new(code, error.to_string());
        let line = error.line();
        if line > 0 {
            app_error = app_error.with_context("line", line.to_string());
        }
        app_error
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            SqlxError::ColumnNotFound(name) => {
                AppError::new("SQLX/COLUMN_NOT_FOUND", format!("Column not found: {name}"))
            }
            SqlxError::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out acquiring a database connection",
            ),
            SqlxError::PoolClosed => AppError::new("SQLX/POOL_CLOSED", "Database pool is closed"),
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlx"),
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map(|code| format!("Sqlite/{code}"))
                    .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                let mut app_error = AppError::new(code, db.message().to_string());
                if let Some(constraint) = db.constraint() {
                    app_error = app_error.with_context("constraint", constraint.to_string());
                }
                app_error
            }
            SqlxError::ColumnDecode { index, source } => {
                AppError::new("SQLX/COLUMN_DECODE", source.to_string())
                    .with_context("column_index", index.to_string())
            }
            SqlxError::Decode(decode_err) => AppError::new("SQLX/DECODE", decode_err.to_string()),
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(error: rusqlite::Error) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(ffi_err, message) => {
                let code = format!("Sqlite/{}", ffi_err.extended_code);
                AppError::new(
                    code,
                    message.clone().unwrap_or_else(|| ffi_err.to_string()),
                )
                .with_context("source", "rusqlite")
            }
            _ => AppError::new("RUSQLITE/ERROR", error.to_string()),
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(error: csv::Error) -> Self {
        let mut app_error = AppError::new(codes::IMPORT_CSV, error.to_string());
        if let Some(position) = error.position() {
            app_error = app_error.with_context("line", position.line().to_string());
        }
        app_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn builds_error_with_context_and_cause() {
        let error = AppError::new("TEST/CODE", "Something went wrong")
            .with_context("kind", "alumni")
            .with_cause(AppError::from("inner failure"));

        assert_eq!(error.code(), "TEST/CODE");
        assert_eq!(error.context().get("kind"), Some(&"alumni".to_string()));
        let cause = error.cause().expect("cause present");
        assert_eq!(cause.message(), "inner failure");
        assert_eq!(cause.code(), AppError::GENERIC_CODE);
    }

    #[test]
    fn converts_anyhow_error_chain_into_nested_causes() {
        let err = (|| -> anyhow::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
                .context("failed to write snapshot")
        })()
        .unwrap_err();

        let app_error = AppError::from(err);
        assert_eq!(app_error.message(), "failed to write snapshot");
        let cause = app_error.cause().expect("io cause present");
        assert!(cause.message().contains("disk full"));
    }

    #[test]
    fn classifies_fts_failures() {
        let syntax = AppError::new("Sqlite/1", "fts5: syntax error near \"AND\"");
        assert_eq!(syntax.kind(), ErrorKind::Syntax);

        let missing = AppError::new("Sqlite/1", "no such table: alumni_fts");
        assert_eq!(missing.kind(), ErrorKind::IndexCorrupt);

        let busy = AppError::new("Sqlite/5", "database is locked");
        assert_eq!(busy.kind(), ErrorKind::Connection);
        assert!(busy.kind().is_transient());

        let timeout = AppError::new(codes::SEARCH_TIMEOUT, "primary search timed out");
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert!(!timeout.kind().is_transient());
    }

    #[test]
    fn backup_codes_map_to_kinds() {
        assert_eq!(
            AppError::new(codes::BACKUP_NOT_FOUND, "missing").kind(),
            ErrorKind::BackupNotFound
        );
        assert_eq!(
            AppError::new(codes::BACKUP_CORRUPT, "bad").kind(),
            ErrorKind::BackupCorrupt
        );
        assert_eq!(AppError::from("whatever").kind(), ErrorKind::Other);
    }

    #[test]
    fn sqlx_row_not_found_translates_to_specific_code() {
        let app_error = AppError::from(SqlxError::RowNotFound);
        assert_eq!(app_error.code(), "SQLX/ROW_NOT_FOUND");
    }

    #[test]
    fn json_shape_is_flat_struct() {
        let error = AppError::new("IMPORT/VALIDATION", "nope").with_context("field", "title");
        let value = serde_json::to_value(&error).expect("serialize app error");
        assert_eq!(
            value.get("code").and_then(|v| v.as_str()),
            Some("IMPORT/VALIDATION")
        );
        assert_eq!(
            value
                .get("context")
                .and_then(|c| c.get("field"))
                .and_then(|v| v.as_str()),
            Some("title")
        );
        assert!(value.get("cause").is_none());
    }
}
