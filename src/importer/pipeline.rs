//! Per-file pipeline
//!
//! This module provides functionality for:
//! 1. Running one file through validation, duplicate screening, conversion and import
//! 2. Routing the original (or the converted output) into the processed or failed tree
//! 3. Dry runs that probe but only log the side effects they would have
//! 4. Attributing every log line for a file through a tracing span

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, info_span};

use crate::importer::converter::{Converter, Platform};
use crate::importer::date_resolver::{DateEvidence, ResolvedDate, read_date_tags};
use crate::importer::duplicates::DigestIndex;
use crate::importer::health::HealthTracker;
use crate::importer::import_policy::{ImportMethod, RetryPolicy};
use crate::importer::logger::{Stage, log_dry_run, log_stage_failure};
use crate::importer::orchestrator::{ImportOrchestrator, ImportOutcome};
use crate::importer::router::{self, RouterError};
use crate::importer::tools::ToolSet;
use crate::importer::validator::{self, ValidationResult};
use crate::importer::{AppConfig, MediaFile};

/// Errors that escape a file's pipeline instead of routing it
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Cannot resolve date of {path}: {source}")]
    Date {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot hash {path}: {source}")]
    Digest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Routing failed: {0}")]
    Router(#[from] RouterError),
}

/// Result type for the per-file pipeline
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Terminal outcome of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Imported {
        method: ImportMethod,
        processed: PathBuf,
    },
    InvalidMetadata {
        failed: PathBuf,
    },
    InvalidIntegrity {
        failed: PathBuf,
        reason: String,
    },
    Duplicate {
        failed: PathBuf,
    },
    ConversionFailed {
        failed: PathBuf,
        reason: String,
    },
    /// The original went to processed, the converted output to failed
    ImportFailed {
        processed: PathBuf,
        failed: PathBuf,
        reason: String,
    },
    /// Passed every read-only check; nothing was written
    DryRun {
        planned_output: PathBuf,
    },
    /// Escaped the pipeline; the file was left where it was
    Unexpected(String),
}

/// Output trees and switches for a run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_root: PathBuf,
    pub processed_root: PathBuf,
    pub failed_root: PathBuf,
    pub dry_run: bool,
    pub duplicates_enabled: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig, dry_run: bool) -> Self {
        Self {
            output_root: PathBuf::from(&config.paths.output_directory),
            processed_root: PathBuf::from(&config.paths.processed_directory),
            failed_root: PathBuf::from(&config.paths.failed_directory),
            dry_run,
            duplicates_enabled: config.duplicates.enabled,
        }
    }
}

pub struct FilePipeline {
    tools: ToolSet,
    converter: Converter,
    orchestrator: ImportOrchestrator,
    index: Arc<DigestIndex>,
    settings: PipelineSettings,
}

impl FilePipeline {
    pub fn new(
        tools: ToolSet,
        config: &AppConfig,
        platform: Platform,
        health: Arc<HealthTracker>,
        index: Arc<DigestIndex>,
        settings: PipelineSettings,
    ) -> Self {
        let converter = Converter::new(&tools, config.conversion.clone(), platform);
        let orchestrator =
            ImportOrchestrator::new(&tools, health, RetryPolicy::from_config(&config.import));
        Self {
            tools,
            converter,
            orchestrator,
            index,
            settings,
        }
    }

    /// Takes `media` to exactly one terminal outcome.
    pub fn process(&self, media: &MediaFile) -> PipelineResult<FileOutcome> {
        let source = media.path();
        let span = info_span!("file", path = %source.display());
        let _entered = span.enter();

        let tags = read_date_tags(&source, self.tools.metadata.as_ref());
        let date = DateEvidence::collect(&source, &tags)
            .resolve(&source)
            .map_err(|e| PipelineError::Date {
                path: source.clone(),
                source: e,
            })?;
        info!("Resolved date {}", date);

        match validator::validate(&source, media.kind, &tags, self.tools.probe.as_ref()) {
            ValidationResult::Valid => {}
            ValidationResult::InvalidMetadata => {
                log_stage_failure(Stage::Validation, &source, "no capture date metadata");
                let failed = self.route(&source, &self.settings.failed_root, &date)?;
                return Ok(FileOutcome::InvalidMetadata { failed });
            }
            ValidationResult::InvalidIntegrity(reason) => {
                log_stage_failure(Stage::Validation, &source, &reason);
                let failed = self.route(&source, &self.settings.failed_root, &date)?;
                return Ok(FileOutcome::InvalidIntegrity { failed, reason });
            }
        }

        let digest = if self.settings.duplicates_enabled {
            let verdict = self.index.is_duplicate(&source).map_err(|e| PipelineError::Digest {
                path: source.clone(),
                source: e,
            })?;
            if verdict.duplicate {
                log_stage_failure(Stage::Duplicates, &source, "already in the library");
                let failed = self.route(&source, &self.settings.failed_root, &date)?;
                return Ok(FileOutcome::Duplicate { failed });
            }
            Some(verdict.digest)
        } else {
            None
        };

        if self.settings.dry_run {
            return self.dry_run(media, &source, &date);
        }

        let converted = match self.converter.convert(media, &date, &self.settings.output_root) {
            Ok(converted) => converted,
            Err(e) => {
                let reason = e.to_string();
                log_stage_failure(Stage::Conversion, &source, &reason);
                let failed = self.route(&source, &self.settings.failed_root, &date)?;
                return Ok(FileOutcome::ConversionFailed { failed, reason });
            }
        };

        let report = self.orchestrator.import(&converted.output);
        let processed = self.route(&source, &self.settings.processed_root, &date)?;

        match report.outcome {
            ImportOutcome::Imported(method) => {
                if let Some(digest) = digest {
                    self.index.insert(digest);
                }
                Ok(FileOutcome::Imported { method, processed })
            }
            ImportOutcome::Failed(reason) => {
                log_stage_failure(Stage::Import, &converted.output, &reason);
                let failed = self.route(&converted.output, &self.settings.failed_root, &date)?;
                Ok(FileOutcome::ImportFailed {
                    processed,
                    failed,
                    reason,
                })
            }
        }
    }

    fn dry_run(
        &self,
        media: &MediaFile,
        source: &Path,
        date: &ResolvedDate,
    ) -> PipelineResult<FileOutcome> {
        let planned_output = match self.converter.plan(media, date, &self.settings.output_root) {
            Ok(plan) => {
                log_dry_run(
                    Stage::Conversion,
                    &format!("{:?} {} -> {}", plan.method, source.display(), plan.output.display()),
                );
                plan.output
            }
            Err(e) => {
                log_stage_failure(Stage::Conversion, source, &e.to_string());
                PathBuf::new()
            }
        };
        log_dry_run(Stage::Import, &format!("import {}", planned_output.display()));
        self.route(source, &self.settings.processed_root, date)?;
        Ok(FileOutcome::DryRun { planned_output })
    }

    /// Moves `file` into `root/<date>`, or only logs the move on a dry run.
    fn route(&self, file: &Path, root: &Path, date: &ResolvedDate) -> PipelineResult<PathBuf> {
        if self.settings.dry_run {
            let planned = router::planned_destination(file, root, date)?;
            log_dry_run(
                Stage::Routing,
                &format!("move {} to {}", file.display(), planned.display()),
            );
            return Ok(planned);
        }
        Ok(router::move_to_bucket(file, root, date)?)
    }
}
