//! Environment-driven settings.
//!
//! Every knob has a default and, where it makes sense, a hard ceiling;
//! unset or unparsable values fall back to the default rather than failing
//! startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "kiosk.sqlite3";

const DEFAULT_BACKUP_MAX_COUNT: usize = 10;
const HARD_MAX_BACKUP_COUNT: usize = 50;

const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 2_000;
const HARD_MAX_SEARCH_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_CACHE_SIZE: usize = 256;
const HARD_MAX_CACHE_SIZE: usize = 10_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const HARD_MAX_CACHE_TTL_SECS: u64 = 3_600;
const DEFAULT_MAX_ATTEMPTS: u32 = 2;
const HARD_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_DELAY_MS: u64 = 50;
const HARD_MAX_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_BREAKER_THRESHOLD: u32 = 3;
const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 30;
/// Ten ORed quoted terms cost 57.
const DEFAULT_MAX_COMPLEXITY: u32 = 64;
const MIN_MAX_COMPLEXITY: u32 = 8;
const HARD_MAX_COMPLEXITY: u32 = 1_000;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}

/// Root directory for the store, backups, logs and import reports.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = env::var("KIOSK_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir()
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(env::temp_dir)
        .join("kiosk")
}

pub fn default_db_path() -> PathBuf {
    data_dir().join(DB_FILE_NAME)
}

/// Backup retention limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    pub max_count: usize,
}

impl RetentionConfig {
    pub fn from_env() -> Self {
        let max_count = env_parse::<usize>("KIOSK_BACKUP_MAX_COUNT")
            .filter(|value| *value > 0)
            .map(|value| value.min(HARD_MAX_BACKUP_COUNT))
            .unwrap_or(DEFAULT_BACKUP_MAX_COUNT);
        Self { max_count }
    }

    pub fn with_max_count(max_count: usize) -> Self {
        Self {
            max_count: max_count.clamp(1, HARD_MAX_BACKUP_COUNT),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_BACKUP_MAX_COUNT,
        }
    }
}

/// Tuning for the search manager: timeouts, cache, retry and breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub timeout: Duration,
    pub cache_size: usize,
    pub cache_ttl: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Consecutive primary failures before the breaker opens.
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    /// Queries estimated above this are cut down before reaching the index.
    pub max_complexity: u32,
    /// Run the substring scan when the index finds nothing for plain text.
    pub substring_fallback: bool,
}

impl SearchConfig {
    pub fn from_env() -> Self {
        let timeout_ms = env_parse::<u64>("KIOSK_SEARCH_TIMEOUT_MS")
            .filter(|value| *value > 0)
            .map(|value| value.min(HARD_MAX_SEARCH_TIMEOUT_MS))
            .unwrap_or(DEFAULT_SEARCH_TIMEOUT_MS);
        let cache_size = env_parse::<usize>("KIOSK_SEARCH_CACHE_SIZE")
            .map(|value| value.min(HARD_MAX_CACHE_SIZE))
            .unwrap_or(DEFAULT_CACHE_SIZE);
        let cache_ttl = env_parse::<u64>("KIOSK_SEARCH_CACHE_TTL_SECS")
            .map(|value| value.min(HARD_MAX_CACHE_TTL_SECS))
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);
        let max_attempts = env_parse::<u32>("KIOSK_SEARCH_MAX_ATTEMPTS")
            .filter(|value| *value > 0)
            .map(|value| value.min(HARD_MAX_ATTEMPTS))
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let retry_delay_ms = env_parse::<u64>("KIOSK_SEARCH_RETRY_DELAY_MS")
            .map(|value| value.min(HARD_MAX_RETRY_DELAY_MS))
            .unwrap_or(DEFAULT_RETRY_DELAY_MS);
        let max_complexity = env_parse::<u32>("KIOSK_SEARCH_MAX_COMPLEXITY")
            .map(|value| value.clamp(MIN_MAX_COMPLEXITY, HARD_MAX_COMPLEXITY))
            .unwrap_or(DEFAULT_MAX_COMPLEXITY);
        let substring_fallback =
            env_parse::<bool>("KIOSK_SEARCH_SUBSTRING_FALLBACK").unwrap_or(true);

        Self {
            timeout: Duration::from_millis(timeout_ms),
            cache_size,
            cache_ttl: Duration::from_secs(cache_ttl),
            max_attempts,
            retry_delay: Duration::from_millis(retry_delay_ms),
            max_complexity,
            substring_fallback,
            ..Self::default()
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_SEARCH_TIMEOUT_MS),
            cache_size: DEFAULT_CACHE_SIZE,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_cooldown: Duration::from_secs(DEFAULT_BREAKER_COOLDOWN_SECS),
            max_complexity: DEFAULT_MAX_COMPLEXITY,
            substring_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_defaults_and_clamps() {
        assert_eq!(RetentionConfig::default().max_count, DEFAULT_BACKUP_MAX_COUNT);
        assert_eq!(RetentionConfig::with_max_count(0).max_count, 1);
        assert_eq!(
            RetentionConfig::with_max_count(500).max_count,
            HARD_MAX_BACKUP_COUNT
        );
    }

    #[test]
    fn search_defaults() {
        let cfg = SearchConfig::default();
        assert_eq!(cfg.timeout, Duration::from_millis(2_000));
        assert_eq!(cfg.cache_size, 256);
        assert_eq!(cfg.max_attempts, 2);
        assert_eq!(cfg.max_complexity, DEFAULT_MAX_COMPLEXITY);
        assert!(cfg.substring_fallback);
    }
}
