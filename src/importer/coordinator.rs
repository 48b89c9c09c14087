//! Concurrency coordinator
//!
//! This module provides functionality for:
//! 1. Walking the source tree lazily and handing files to a bounded worker pool
//! 2. Stopping dispatch when the cancellation flag is raised
//! 3. Containing errors and panics to the file that raised them
//! 4. Aggregating per-file outcomes into the run counters

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::ProgressBar;
use rayon::ThreadPoolBuilder;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::importer::MediaFile;
use crate::importer::classifier::{Discovered, discover};
use crate::importer::health::HealthTracker;
use crate::importer::logger::log_unexpected;
use crate::importer::pipeline::{FileOutcome, FilePipeline};
use crate::importer::reporting::{RunCounters, RunSummary};

/// Error types for the coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Source directory does not exist: {0}")]
    MissingSource(String),

    #[error("Thread pool error: {0}")]
    Pool(String),
}

/// Result type for the coordinator
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

pub struct Coordinator {
    pipeline: Arc<FilePipeline>,
    health: Arc<HealthTracker>,
    counters: Arc<RunCounters>,
    cancel: Arc<AtomicBool>,
    workers: usize,
}

impl Coordinator {
    pub fn new(pipeline: Arc<FilePipeline>, health: Arc<HealthTracker>, workers: usize) -> Self {
        Self {
            pipeline,
            health,
            counters: Arc::new(RunCounters::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            workers: workers.max(1),
        }
    }

    /// Raising this flag stops dispatch; files already running finish.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Processes every supported file under `source_root`.
    pub fn run(&self, source_root: &Path, progress: &ProgressBar) -> CoordinatorResult<RunSummary> {
        if !source_root.is_dir() {
            return Err(CoordinatorError::MissingSource(source_root.display().to_string()));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("import-worker-{}", i))
            .build()
            .map_err(|e| CoordinatorError::Pool(e.to_string()))?;

        info!("Processing {} with {} workers", source_root.display(), self.workers);

        // Zero capacity: a file is only taken off the walk when a worker is free.
        let (sender, receiver) = flume::bounded::<MediaFile>(0);

        pool.in_place_scope(|scope| {
            for _ in 0..self.workers {
                let receiver = receiver.clone();
                scope.spawn(move |_| {
                    for media in receiver.iter() {
                        progress.set_message(media.file_name.clone());
                        let outcome = run_contained(&self.pipeline, &media);
                        self.counters.record(&outcome);
                        progress.inc(1);
                    }
                });
            }
            drop(receiver);

            let mut cancelled = false;
            for discovered in discover(source_root) {
                match discovered {
                    Discovered::Unsupported(path) => {
                        debug!("Skipping unsupported file {}", path.display());
                        self.counters.add_unsupported();
                    }
                    Discovered::Media(media) => {
                        self.counters.add_discovered();
                        progress.inc_length(1);

                        if !cancelled && self.cancel.load(Ordering::SeqCst) {
                            warn!("Cancellation requested, no further files will be dispatched");
                            cancelled = true;
                        }
                        if cancelled || sender.send(media).is_err() {
                            self.counters.add_not_dispatched(1);
                        }
                    }
                }
            }
            drop(sender);
        });

        progress.finish_with_message("done");
        Ok(self.counters.snapshot(self.health.snapshot().restarts_performed))
    }
}

/// Runs one file, turning escaped errors and panics into `Unexpected`.
pub fn run_contained(pipeline: &FilePipeline, media: &MediaFile) -> FileOutcome {
    let path = media.path();
    match panic::catch_unwind(AssertUnwindSafe(|| pipeline.process(media))) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            let details = e.to_string();
            log_unexpected(&path, &details);
            FileOutcome::Unexpected(details)
        }
        Err(payload) => {
            let details = panic_message(payload.as_ref());
            log_unexpected(&path, &details);
            FileOutcome::Unexpected(details)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic with a non-string payload".to_string()
    }
}
