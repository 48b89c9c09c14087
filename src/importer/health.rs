//! Destination application health tracking
//!
//! This module provides functionality for:
//! 1. Run-wide import counters behind a single lock
//! 2. Restarting the destination application with a cap on restarts
//! 3. Periodic restarts after every N successful imports
//! 4. Forgiving past restarts after a long run of successes
//! 5. Holding imports back while a restart is in progress

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{error, info, warn};

use crate::importer::Import;
use crate::importer::tools::AppLifecycle;

/// Health counters for one run; never persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppHealthState {
    /// Restarts counted against the cap; zeroed after sustained stability
    pub restart_count: u32,
    pub success_since_last_failure: u64,
    pub total_success_count: u64,
    pub total_failure_count: u64,
    /// Every restart performed this run, never reset
    pub restarts_performed: u32,
}

/// Why a restart was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// Import failures clustered on one file
    Recovery,
    /// Every N successful imports
    Periodic,
}

impl std::fmt::Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartReason::Recovery => write!(f, "recovery"),
            RestartReason::Periodic => write!(f, "periodic"),
        }
    }
}

/// Result of a restart request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    Restarted,
    /// Another worker finished a restart while this one waited
    AlreadyRestarted,
    CapReached,
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct HealthSettings {
    pub max_restarts: u32,
    /// 0 disables periodic restarts
    pub imports_per_restart: u64,
    pub stable_success_watermark: u64,
    pub quit_settle: Duration,
    pub launch_settle: Duration,
}

impl HealthSettings {
    pub fn from_config(import: &Import) -> Self {
        Self {
            max_restarts: import.max_restarts,
            imports_per_restart: import.imports_per_restart,
            stable_success_watermark: import.stable_success_watermark,
            quit_settle: Duration::from_secs(import.quit_settle_secs),
            launch_settle: Duration::from_secs(import.launch_settle_secs),
        }
    }
}

struct Inner {
    state: AppHealthState,
    last_restart: Option<Instant>,
}

/// Shared by every worker for the length of a run.
pub struct HealthTracker {
    inner: Mutex<Inner>,
    /// Readers are imports in flight; the writer is a restart
    gate: RwLock<()>,
    lifecycle: Arc<dyn AppLifecycle>,
    settings: HealthSettings,
}

impl HealthTracker {
    pub fn new(lifecycle: Arc<dyn AppLifecycle>, settings: HealthSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: AppHealthState::default(),
                last_restart: None,
            }),
            gate: RwLock::new(()),
            lifecycle,
            settings,
        }
    }

    pub fn snapshot(&self) -> AppHealthState {
        self.inner.lock().state
    }

    /// Held for the duration of one import call; blocks while a restart runs.
    pub fn import_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read()
    }

    /// Counts a success; true when a periodic restart is due.
    pub fn record_success(&self) -> bool {
        let mut inner = self.inner.lock();
        let state = &mut inner.state;
        state.total_success_count += 1;
        state.success_since_last_failure += 1;

        if state.success_since_last_failure > self.settings.stable_success_watermark
            && state.restart_count > 0
        {
            info!(
                "{} imports without a failure, resetting restart count from {}",
                state.success_since_last_failure, state.restart_count
            );
            state.restart_count = 0;
        }

        self.settings.imports_per_restart > 0
            && state.total_success_count % self.settings.imports_per_restart == 0
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.state.success_since_last_failure = 0;
        inner.state.total_failure_count += 1;
    }

    /// Quits (or kills) and relaunches the application, unless the cap is reached.
    pub fn restart(&self, reason: RestartReason) -> RestartOutcome {
        let requested_at = Instant::now();
        let _gate = self.gate.write();

        {
            let inner = self.inner.lock();
            if inner.last_restart.is_some_and(|done| done > requested_at) {
                info!("Skipping {} restart, the application was restarted while waiting", reason);
                return RestartOutcome::AlreadyRestarted;
            }
            if inner.state.restart_count >= self.settings.max_restarts {
                warn!(
                    "Restart limit of {} reached, skipping {} restart",
                    self.settings.max_restarts, reason
                );
                return RestartOutcome::CapReached;
            }
        }

        info!("Restarting the destination application ({})", reason);
        if let Err(e) = self.run_restart_sequence() {
            error!("Application restart failed: {}", e);
            return RestartOutcome::Failed(e);
        }

        let mut inner = self.inner.lock();
        inner.state.restart_count += 1;
        inner.state.restarts_performed += 1;
        inner.last_restart = Some(Instant::now());
        info!(
            "Application restarted ({}/{})",
            inner.state.restart_count, self.settings.max_restarts
        );
        RestartOutcome::Restarted
    }

    fn run_restart_sequence(&self) -> Result<(), String> {
        let running = self.lifecycle.is_running().unwrap_or_else(|e| {
            warn!("Could not tell whether the application is running: {}", e);
            true
        });

        if running {
            if let Err(quit_err) = self.lifecycle.request_quit() {
                warn!("Graceful quit failed ({}), terminating", quit_err);
                self.lifecycle
                    .force_terminate()
                    .map_err(|e| format!("force terminate failed: {}", e))?;
            }
            thread::sleep(self.settings.quit_settle);
        }

        self.lifecycle.launch().map_err(|e| format!("launch failed: {}", e))?;
        thread::sleep(self.settings.launch_settle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::tools::{ToolError, ToolResult};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Lifecycle {
        quit_fails: bool,
        quits: AtomicUsize,
        kills: AtomicUsize,
        launches: AtomicUsize,
    }

    impl AppLifecycle for Lifecycle {
        fn is_running(&self) -> ToolResult<bool> {
            Ok(true)
        }
        fn request_quit(&self) -> ToolResult<()> {
            self.quits.fetch_add(1, Ordering::SeqCst);
            if self.quit_fails {
                Err(ToolError::Failed {
                    program: "osascript".into(),
                    status: Some(1),
                    stderr: "timeout".into(),
                })
            } else {
                Ok(())
            }
        }
        fn force_terminate(&self) -> ToolResult<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn launch(&self) -> ToolResult<()> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Not running, and slow to come back up
    #[derive(Default)]
    struct SlowLaunch {
        launching: AtomicBool,
        launched: AtomicBool,
    }

    impl AppLifecycle for SlowLaunch {
        fn is_running(&self) -> ToolResult<bool> {
            Ok(false)
        }
        fn request_quit(&self) -> ToolResult<()> {
            Ok(())
        }
        fn force_terminate(&self) -> ToolResult<()> {
            Ok(())
        }
        fn launch(&self) -> ToolResult<()> {
            self.launching.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(150));
            self.launched.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn settings(max_restarts: u32, imports_per_restart: u64, watermark: u64) -> HealthSettings {
        HealthSettings {
            max_restarts,
            imports_per_restart,
            stable_success_watermark: watermark,
            quit_settle: Duration::ZERO,
            launch_settle: Duration::ZERO,
        }
    }

    #[test]
    fn test_restart_cap_stops_side_effects() {
        let lifecycle = Arc::new(Lifecycle::default());
        let tracker = HealthTracker::new(lifecycle.clone(), settings(2, 0, 100));

        assert_eq!(tracker.restart(RestartReason::Recovery), RestartOutcome::Restarted);
        assert_eq!(tracker.restart(RestartReason::Recovery), RestartOutcome::Restarted);
        assert_eq!(tracker.restart(RestartReason::Recovery), RestartOutcome::CapReached);

        assert_eq!(lifecycle.launches.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.snapshot().restart_count, 2);
    }

    #[test]
    fn test_imports_wait_for_restart_to_finish() {
        let lifecycle = Arc::new(SlowLaunch::default());
        let tracker = Arc::new(HealthTracker::new(lifecycle.clone(), settings(5, 0, 100)));

        let restarting = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.restart(RestartReason::Recovery))
        };
        while !lifecycle.launching.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        let guard = tracker.import_guard();
        assert!(lifecycle.launched.load(Ordering::SeqCst));
        drop(guard);

        assert_eq!(restarting.join().unwrap(), RestartOutcome::Restarted);
    }

    #[test]
    fn test_failed_quit_falls_back_to_terminate() {
        let lifecycle = Arc::new(Lifecycle { quit_fails: true, ..Default::default() });
        let tracker = HealthTracker::new(lifecycle.clone(), settings(5, 0, 100));

        assert_eq!(tracker.restart(RestartReason::Recovery), RestartOutcome::Restarted);
        assert_eq!(lifecycle.quits.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.kills.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.launches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_periodic_restart_every_n_successes() {
        let tracker = HealthTracker::new(Arc::new(Lifecycle::default()), settings(5, 3, 100));

        let due: Vec<bool> = (0..6).map(|_| tracker.record_success()).collect();
        assert_eq!(due, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn test_watermark_forgives_restarts() {
        let tracker = HealthTracker::new(Arc::new(Lifecycle::default()), settings(5, 0, 3));
        tracker.restart(RestartReason::Recovery);
        assert_eq!(tracker.snapshot().restart_count, 1);

        for _ in 0..3 {
            tracker.record_success();
        }
        assert_eq!(tracker.snapshot().restart_count, 1);

        tracker.record_success();
        let state = tracker.snapshot();
        assert_eq!(state.restart_count, 0);
        assert_eq!(state.restarts_performed, 1);
    }

    #[test]
    fn test_failure_resets_streak() {
        let tracker = HealthTracker::new(Arc::new(Lifecycle::default()), settings(5, 0, 100));
        tracker.record_success();
        tracker.record_success();
        tracker.record_failure();

        let state = tracker.snapshot();
        assert_eq!(state.success_since_last_failure, 0);
        assert_eq!(state.total_success_count, 2);
        assert_eq!(state.total_failure_count, 1);
    }

    #[test]
    fn test_concurrent_counters_are_consistent() {
        let tracker = Arc::new(HealthTracker::new(
            Arc::new(Lifecycle::default()),
            settings(5, 0, u64::MAX),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let _guard = tracker.import_guard();
                        tracker.record_success();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.snapshot().total_success_count, 4000);
    }
}
