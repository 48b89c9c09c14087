//! Retry, recovery and fallback decisions for library imports.
//!
//! Pure: nothing here sleeps, spawns or touches the application.

use std::time::Duration;

use crate::importer::Import;

/// Upper bound on one backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Import mechanism an attempt used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMethod {
    Primary,
    Fallback,
}

impl std::fmt::Display for ImportMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportMethod::Primary => write!(f, "primary"),
            ImportMethod::Fallback => write!(f, "fallback"),
        }
    }
}

/// One import attempt, kept only for the duration of the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportAttemptRecord {
    pub method: ImportMethod,
    /// 1-based, counted per method
    pub attempt: u32,
    /// Backoff slept before this attempt
    pub delay: Duration,
    pub success: bool,
    pub detail: Option<String>,
}

/// What to do after a failed primary attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDecision {
    Retry { delay: Duration },
    RecoverThenRetry { delay: Duration },
    Fallback,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Recovery runs after exactly this failed attempt
    pub recovery_after_attempt: u32,
    pub fallback_enabled: bool,
}

impl RetryPolicy {
    pub fn from_config(import: &Import) -> Self {
        Self {
            max_attempts: import.max_attempts.max(1),
            base_delay: Duration::from_millis(import.base_retry_delay_ms),
            recovery_after_attempt: import.recovery_after_attempt,
            fallback_enabled: import.fallback_enabled,
        }
    }

    /// Decision after primary attempt number `failed_attempt` failed.
    pub fn decide(&self, failed_attempt: u32) -> ImportDecision {
        if failed_attempt < self.max_attempts {
            let delay = self.backoff(failed_attempt);
            if failed_attempt == self.recovery_after_attempt {
                ImportDecision::RecoverThenRetry { delay }
            } else {
                ImportDecision::Retry { delay }
            }
        } else if self.fallback_enabled {
            ImportDecision::Fallback
        } else {
            ImportDecision::Fail
        }
    }

    /// `base * 2^(attempt - 1)`, capped at `MAX_BACKOFF`.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent).min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            recovery_after_attempt: 2,
            fallback_enabled: true,
        }
    }

    #[test]
    fn test_default_schedule() {
        let policy = policy();
        assert_eq!(policy.decide(1), ImportDecision::Retry { delay: Duration::from_millis(1000) });
        assert_eq!(
            policy.decide(2),
            ImportDecision::RecoverThenRetry { delay: Duration::from_millis(2000) }
        );
        assert_eq!(policy.decide(3), ImportDecision::Fallback);
    }

    #[test]
    fn test_fail_without_fallback() {
        let policy = RetryPolicy { fallback_enabled: false, ..policy() };
        assert_eq!(policy.decide(3), ImportDecision::Fail);
    }

    #[test]
    fn test_single_attempt_goes_straight_to_fallback() {
        let policy = RetryPolicy { max_attempts: 1, ..policy() };
        assert_eq!(policy.decide(1), ImportDecision::Fallback);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy { max_attempts: 50, ..policy() };
        assert_eq!(policy.backoff(3), Duration::from_millis(4000));
        assert_eq!(policy.backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn test_default_config_matches_schedule() {
        let policy = RetryPolicy::from_config(&crate::importer::AppConfig::default().import);
        assert_eq!(policy, self::policy());
    }
}
