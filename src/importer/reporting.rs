//! Run counters, progress display and the end-of-run summary.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{error, info, warn};

use crate::importer::import_policy::ImportMethod;
use crate::importer::pipeline::FileOutcome;

/// Counters shared by every worker
#[derive(Debug, Default)]
pub struct RunCounters {
    discovered: AtomicU64,
    skipped_unsupported: AtomicU64,
    imported: AtomicU64,
    imported_via_fallback: AtomicU64,
    invalid_metadata: AtomicU64,
    invalid_integrity: AtomicU64,
    duplicates: AtomicU64,
    conversion_failed: AtomicU64,
    import_failed: AtomicU64,
    dry_run: AtomicU64,
    unexpected: AtomicU64,
    not_dispatched: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_discovered(&self) {
        self.discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_unsupported(&self) {
        self.skipped_unsupported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_not_dispatched(&self, count: u64) {
        self.not_dispatched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record(&self, outcome: &FileOutcome) {
        let counter = match outcome {
            FileOutcome::Imported { method, .. } => {
                if *method == ImportMethod::Fallback {
                    self.imported_via_fallback.fetch_add(1, Ordering::Relaxed);
                }
                &self.imported
            }
            FileOutcome::InvalidMetadata { .. } => &self.invalid_metadata,
            FileOutcome::InvalidIntegrity { .. } => &self.invalid_integrity,
            FileOutcome::Duplicate { .. } => &self.duplicates,
            FileOutcome::ConversionFailed { .. } => &self.conversion_failed,
            FileOutcome::ImportFailed { .. } => &self.import_failed,
            FileOutcome::DryRun { .. } => &self.dry_run,
            FileOutcome::Unexpected(_) => &self.unexpected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, restarts: u32) -> RunSummary {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        RunSummary {
            discovered: load(&self.discovered),
            skipped_unsupported: load(&self.skipped_unsupported),
            imported: load(&self.imported),
            imported_via_fallback: load(&self.imported_via_fallback),
            invalid_metadata: load(&self.invalid_metadata),
            invalid_integrity: load(&self.invalid_integrity),
            duplicates: load(&self.duplicates),
            conversion_failed: load(&self.conversion_failed),
            import_failed: load(&self.import_failed),
            dry_run: load(&self.dry_run),
            unexpected: load(&self.unexpected),
            not_dispatched: load(&self.not_dispatched),
            restarts,
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: u64,
    pub skipped_unsupported: u64,
    pub imported: u64,
    pub imported_via_fallback: u64,
    pub invalid_metadata: u64,
    pub invalid_integrity: u64,
    pub duplicates: u64,
    pub conversion_failed: u64,
    pub import_failed: u64,
    pub dry_run: u64,
    pub unexpected: u64,
    pub not_dispatched: u64,
    pub restarts: u32,
}

impl RunSummary {
    /// Files that ended in the failed tree or escaped the pipeline.
    pub fn failed(&self) -> u64 {
        self.invalid_metadata
            + self.invalid_integrity
            + self.conversion_failed
            + self.import_failed
            + self.unexpected
    }

    /// Files with a terminal outcome.
    pub fn finished(&self) -> u64 {
        self.imported + self.duplicates + self.dry_run + self.failed()
    }

    /// Writes the summary for the user, independent of the logging setup.
    pub fn print(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "{}", self)?;
        out.flush()
    }

    /// Logs the summary at a level matching how the run went.
    pub fn log(&self) {
        if self.unexpected > 0 {
            error!("{}", self);
        } else if self.failed() > 0 {
            warn!("{}", self);
        } else {
            info!("{}", self);
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Import run summary")?;
        writeln!(f, "  Discovered:          {}", self.discovered)?;
        writeln!(f, "  Unsupported skipped: {}", self.skipped_unsupported)?;
        writeln!(
            f,
            "  Imported:            {} (primary {}, fallback {})",
            self.imported,
            self.imported - self.imported_via_fallback,
            self.imported_via_fallback
        )?;
        writeln!(f, "  Duplicates:          {}", self.duplicates)?;
        writeln!(f, "  Invalid metadata:    {}", self.invalid_metadata)?;
        writeln!(f, "  Invalid integrity:   {}", self.invalid_integrity)?;
        writeln!(f, "  Conversion failed:   {}", self.conversion_failed)?;
        writeln!(f, "  Import failed:       {}", self.import_failed)?;
        writeln!(f, "  Unexpected errors:   {}", self.unexpected)?;
        if self.dry_run > 0 {
            writeln!(f, "  Dry run (untouched): {}", self.dry_run)?;
        }
        if self.not_dispatched > 0 {
            writeln!(f, "  Not dispatched:      {}", self.not_dispatched)?;
        }
        write!(f, "  Application restarts: {}", self.restarts)
    }
}

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";
const FALLBACK_TEMPLATE: &str = "{spinner} [{elapsed_precise}] {bar} {pos}/{len}";

/// Style for the per-file progress bar, degrading to a simpler template.
pub fn progress_style() -> ProgressStyle {
    match ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
        Ok(style) => style.progress_chars("=>-"),
        Err(err) => {
            warn!("Template error with '{}': {}. Using fallback template.", PROGRESS_TEMPLATE, err);
            ProgressStyle::default_bar()
                .template(FALLBACK_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
        }
    }
}

/// Progress bar over `len` files; hidden when `visible` is false.
pub fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(progress_style());
    if visible {
        bar.enable_steady_tick(Duration::from_millis(100));
    } else {
        bar.set_draw_target(ProgressDrawTarget::hidden());
    }
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_outcomes_land_in_one_counter_each() {
        let counters = RunCounters::new();
        counters.record(&FileOutcome::Imported {
            method: ImportMethod::Primary,
            processed: PathBuf::new(),
        });
        counters.record(&FileOutcome::Imported {
            method: ImportMethod::Fallback,
            processed: PathBuf::new(),
        });
        counters.record(&FileOutcome::Duplicate { failed: PathBuf::new() });
        counters.record(&FileOutcome::InvalidMetadata { failed: PathBuf::new() });
        counters.record(&FileOutcome::Unexpected("panic".into()));

        let summary = counters.snapshot(3);
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.imported_via_fallback, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.finished(), 5);
        assert_eq!(summary.restarts, 3);
    }

    #[test]
    fn test_summary_mentions_every_category() {
        let summary = RunSummary { imported: 4, imported_via_fallback: 1, ..Default::default() };
        let text = summary.to_string();
        assert!(text.contains("primary 3, fallback 1"));
        assert!(text.contains("Application restarts: 0"));
        assert!(!text.contains("Not dispatched"));
    }

    #[test]
    fn test_printed_summary_matches_display() {
        let summary =
            RunSummary { discovered: 7, duplicates: 2, restarts: 1, ..Default::default() };
        let mut out = Vec::new();
        summary.print(&mut out).unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed, format!("{}\n", summary));
        assert!(printed.contains("Duplicates:          2"));
    }
}
