use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::SearchConfig;
use crate::AppError;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Chooses between the primary index and the fallback scan.
///
/// Transient errors are retried up to `max_attempts`. After
/// `breaker_threshold` consecutive failed calls the breaker opens and the
/// primary path is skipped until the cooldown passes; the next call then
/// probes it again.
#[derive(Debug)]
pub struct SearchPolicy {
    max_attempts: u32,
    retry_delay: Duration,
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl SearchPolicy {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
            threshold: config.breaker_threshold.max(1),
            cooldown: config.breaker_cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn allow_primary(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                // Half-open: let one call through; a failure re-opens.
                state.open_until = None;
                state.consecutive_failures = self.threshold.saturating_sub(1);
                true
            }
            None => true,
        }
    }

    pub fn should_retry(&self, attempt: u32, err: &AppError) -> bool {
        attempt < self.max_attempts && err.kind().is_transient()
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    /// Returns `true` when this failure opened the breaker.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.threshold && state.open_until.is_none() {
            state.open_until = Some(Instant::now() + self.cooldown);
            return true;
        }
        false
    }

    pub fn is_open(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        matches!(state.open_until, Some(until) if Instant::now() < until)
    }

    pub fn reset(&self) {
        self.record_success();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    fn policy(threshold: u32, cooldown: Duration) -> SearchPolicy {
        SearchPolicy::new(&SearchConfig {
            breaker_threshold: threshold,
            breaker_cooldown: cooldown,
            ..SearchConfig::default()
        })
    }

    #[test]
    fn opens_after_threshold_failures() {
        let p = policy(2, Duration::from_secs(60));
        assert!(!p.record_failure());
        assert!(p.allow_primary());
        assert!(p.record_failure());
        assert!(p.is_open());
        assert!(!p.allow_primary());
        p.reset();
        assert!(p.allow_primary());
    }

    #[test]
    fn half_open_after_cooldown() {
        let p = policy(1, Duration::ZERO);
        assert!(p.record_failure());
        assert!(p.allow_primary());
        // One more failure trips it again immediately.
        assert!(p.record_failure());
    }

    #[test]
    fn retries_only_transient_errors() {
        let p = policy(3, Duration::from_secs(1));
        let locked = AppError::new("Sqlite/5", "database is locked");
        let corrupt = AppError::new(codes::SEARCH_INDEX_CORRUPT, "bad index");
        assert!(p.should_retry(1, &locked));
        assert!(!p.should_retry(2, &locked));
        assert!(!p.should_retry(1, &corrupt));
    }
}
