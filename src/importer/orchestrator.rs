//! Import orchestration
//!
//! This module provides functionality for:
//! 1. Primary imports with retries and exponential backoff
//! 2. Application recovery between retries, as the retry policy dictates
//! 3. A single fallback import once primary attempts are exhausted
//! 4. Feeding every result into the shared health tracker

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::importer::health::{HealthTracker, RestartReason};
use crate::importer::import_policy::{
    ImportAttemptRecord, ImportDecision, ImportMethod, RetryPolicy,
};
use crate::importer::tools::{FallbackImporter, PrimaryImportStatus, PrimaryImporter, ToolSet};

/// Terminal state of one file's import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported(ImportMethod),
    Failed(String),
}

/// Everything that happened while importing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub outcome: ImportOutcome,
    pub attempts: Vec<ImportAttemptRecord>,
    /// Recovery actions requested by the retry policy for this file
    pub recoveries_triggered: u32,
}

pub struct ImportOrchestrator {
    primary: Arc<dyn PrimaryImporter>,
    fallback: Arc<dyn FallbackImporter>,
    health: Arc<HealthTracker>,
    policy: RetryPolicy,
}

impl ImportOrchestrator {
    pub fn new(tools: &ToolSet, health: Arc<HealthTracker>, policy: RetryPolicy) -> Self {
        Self {
            primary: Arc::clone(&tools.primary_importer),
            fallback: Arc::clone(&tools.fallback_importer),
            health,
            policy,
        }
    }

    /// Runs the import state machine for `path` to a terminal outcome.
    pub fn import(&self, path: &Path) -> ImportReport {
        let mut attempts = Vec::new();
        let mut recoveries_triggered = 0;
        let mut attempt = 1;
        let mut delay = Duration::ZERO;

        loop {
            let result = {
                let _guard = self.health.import_guard();
                self.primary.import(path, true)
            };
            let (success, detail) = match result {
                Ok(PrimaryImportStatus::Imported) => (true, None),
                Ok(PrimaryImportStatus::Rejected(reason)) => (false, Some(reason)),
                Err(e) => (false, Some(e.to_string())),
            };
            attempts.push(ImportAttemptRecord {
                method: ImportMethod::Primary,
                attempt,
                delay,
                success,
                detail: detail.clone(),
            });

            if success {
                info!(attempt, "Imported {}", path.display());
                self.after_success();
                return ImportReport {
                    outcome: ImportOutcome::Imported(ImportMethod::Primary),
                    attempts,
                    recoveries_triggered,
                };
            }

            self.health.record_failure();
            let reason = detail.unwrap_or_default();
            warn!(attempt, reason = reason.as_str(), "Primary import of {} failed", path.display());

            match self.policy.decide(attempt) {
                ImportDecision::Retry { delay: next } => {
                    delay = next;
                    thread::sleep(delay);
                }
                ImportDecision::RecoverThenRetry { delay: next } => {
                    recoveries_triggered += 1;
                    let restart = self.health.restart(RestartReason::Recovery);
                    info!("Recovery before retrying {}: {:?}", path.display(), restart);
                    delay = next;
                    thread::sleep(delay);
                }
                ImportDecision::Fallback => {
                    return self.fallback(path, attempts, recoveries_triggered);
                }
                ImportDecision::Fail => {
                    return ImportReport {
                        outcome: ImportOutcome::Failed(reason),
                        attempts,
                        recoveries_triggered,
                    };
                }
            }

            attempt += 1;
        }
    }

    fn fallback(
        &self,
        path: &Path,
        mut attempts: Vec<ImportAttemptRecord>,
        recoveries_triggered: u32,
    ) -> ImportReport {
        info!("Attempting fallback import of {}", path.display());
        let result = {
            let _guard = self.health.import_guard();
            self.fallback.import(path)
        };

        let detail = result.as_ref().err().map(|e| e.to_string());
        attempts.push(ImportAttemptRecord {
            method: ImportMethod::Fallback,
            attempt: 1,
            delay: Duration::ZERO,
            success: result.is_ok(),
            detail: detail.clone(),
        });

        let outcome = match detail {
            None => {
                info!("Imported {} via fallback", path.display());
                self.after_success();
                ImportOutcome::Imported(ImportMethod::Fallback)
            }
            Some(reason) => {
                self.health.record_failure();
                warn!("Fallback import of {} failed: {}", path.display(), reason);
                ImportOutcome::Failed(reason)
            }
        };

        ImportReport {
            outcome,
            attempts,
            recoveries_triggered,
        }
    }

    fn after_success(&self) {
        if self.health.record_success() {
            let state = self.health.snapshot();
            info!(
                "Reached {} successful imports, restarting the application",
                state.total_success_count
            );
            self.health.restart(RestartReason::Periodic);
        }
    }
}
