use std::env::current_dir;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Error};
use console::Term;
use tracing::{info, trace, warn};

use crate::Args;
use crate::importer::converter::Platform;
use crate::importer::reporting::progress_bar;
use crate::importer::tools::{check_dependencies, required_programs};
use crate::importer::{
    AppConfig, ConfigManager, Coordinator, DigestCache, DigestIndex, FilePipeline, HealthSettings,
    HealthTracker, Logger, PipelineSettings, RunSummary, ToolSet,
};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Handles the flow of one import run from configuration to summary.
pub(crate) struct Program {
    args: Args,
}

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new(args: Args) -> Self {
        Self { args }
    }

    /// Runs the importer program.
    pub(crate) fn run(&self) -> Result<RunSummary, Error> {
        let manager = ConfigManager::new(&self.args.config_dir)
            .with_context(|| {
                format!("Failed to load configuration from {}", self.args.config_dir.display())
            })?;
        let mut config = manager.get_app_config()?;
        self.apply_overrides(&mut config);
        config.validate().context("Invalid configuration")?;

        // Held until the run ends so buffered file logs are flushed.
        let logger = Logger::init(&config.logging, Path::new(&config.paths.log_directory))?;
        if let Some(dir) = logger.log_dir() {
            trace!("Writing logs to {}", dir.display());
        }

        Term::stdout().set_title("media importer");
        trace!("Starting media importer...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        trace!("Config Directory: {}", manager.config_dir().display());
        if let Ok(dir) = current_dir() {
            trace!("Program Working Directory: {}", dir.display());
        }
        crate::log_system_information();

        if self.args.dry_run {
            info!("[Dry Run] No files will be converted, imported or moved");
        }

        check_dependencies(&required_programs())?;

        let tools = ToolSet::from_config(&config);
        let index = Arc::new(Self::build_digest_index(&config)?);

        let health = Arc::new(HealthTracker::new(
            Arc::clone(&tools.lifecycle),
            HealthSettings::from_config(&config.import),
        ));
        let pipeline = Arc::new(FilePipeline::new(
            tools,
            &config,
            Platform::for_host(),
            Arc::clone(&health),
            index,
            PipelineSettings::from_config(&config, self.args.dry_run),
        ));
        let coordinator = Coordinator::new(pipeline, health, config.pools.workers);
        Self::cancel_on_ctrl_c(coordinator.cancel_handle())?;

        let source = PathBuf::from(&config.paths.source_directory);
        let progress = progress_bar(0, Term::stdout().is_term());
        let summary = coordinator
            .run(&source, &progress)
            .with_context(|| format!("Import run over {} failed", source.display()))?;

        summary.log();
        if let Err(e) = summary.print(&mut Term::stdout()) {
            warn!("Failed to print the run summary: {}", e);
        }
        Ok(summary)
    }

    /// Command-line values win over config.toml for this run only.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(quality) = self.args.quality {
            config.conversion.quality = quality;
        }
        if let Some(workers) = self.args.workers {
            config.pools.workers = workers;
        }
        if let Some(source) = &self.args.source {
            config.paths.source_directory = source.to_string_lossy().into_owned();
        }
    }

    /// Raises `cancel` on the first Ctrl+C; files already in flight still finish.
    fn cancel_on_ctrl_c(cancel: Arc<AtomicBool>) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build the signal runtime")?;

        thread::Builder::new()
            .name("ctrl-c".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => {
                            warn!("Ctrl+C received, finishing files already in progress");
                            cancel.store(true, Ordering::SeqCst);
                        }
                        Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
                    }
                });
            })
            .context("Failed to start the Ctrl+C listener")?;
        Ok(())
    }

    fn build_digest_index(config: &AppConfig) -> Result<DigestIndex, Error> {
        let duplicates = &config.duplicates;
        if !duplicates.enabled {
            warn!("Duplicate screening is disabled");
            return Ok(DigestIndex::empty(duplicates.chunk_size));
        }

        let cache = match &duplicates.cache_file {
            Some(path) => Some(
                DigestCache::open(Path::new(path))
                    .with_context(|| format!("Failed to open digest cache {}", path))?,
            ),
            None => None,
        };

        // Leave some headroom, as the directory walk does.
        let threads = ((num_cpus::get() as f64 * 0.8).floor() as usize).max(1);
        let index = DigestIndex::build(
            &config.library_originals(),
            duplicates.chunk_size,
            threads,
            cache.as_ref(),
        )
        .context("Failed to build the library digest index")?;
        if index.is_empty() {
            warn!(
                "No library originals under {}, only repeats within this run will be caught",
                config.library_originals().display()
            );
        }
        Ok(index)
    }
}
