//! Error codes shared across the engine.

pub const SEARCH_SYNTAX: &str = "SEARCH/SYNTAX";
pub const SEARCH_INDEX_CORRUPT: &str = "SEARCH/INDEX_CORRUPT";
pub const SEARCH_TIMEOUT: &str = "SEARCH/TIMEOUT";
pub const SEARCH_UNAVAILABLE: &str = "SEARCH/UNAVAILABLE";

pub const IMPORT_VALIDATION: &str = "IMPORT/VALIDATION";
pub const IMPORT_CSV: &str = "IMPORT/CSV";

pub const BACKUP_NOT_FOUND: &str = "DB_BACKUP/NOT_FOUND";
pub const BACKUP_CORRUPT: &str = "DB_BACKUP/CORRUPT";

pub const MAINTENANCE_ACTIVE: &str = "DB_MAINTENANCE_ACTIVE";
pub const UNKNOWN_KIND: &str = "ENTITY/UNKNOWN_KIND";
