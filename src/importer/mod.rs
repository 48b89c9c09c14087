//! Media import pipeline
//! Discovers photos and videos, normalizes them and imports them into the photo library

pub mod classifier;
pub mod config_loader;
pub mod converter;
pub mod coordinator;
pub mod date_resolver;
pub mod digest_cache;
pub mod duplicates;
pub mod health;
pub mod import_policy;
pub mod logger;
pub mod orchestrator;
pub mod pipeline;
pub mod reporting;
pub mod router;
pub mod tools;
pub mod validator;

#[cfg(test)]
mod tests;

// Re-export commonly used types for convenience
pub use config_loader::{
    AppConfig, ConfigError, ConfigManager, ConfigResult, Conversion, Duplicates, Import, Logging,
    Paths, Pools, Timeouts,
};

pub use classifier::{Discovered, MediaFile, MediaKind, discover};

pub use date_resolver::{DateEvidence, DateSource, ResolvedDate};

pub use converter::{ConversionError, ConversionOutcome, Converter, Platform};

pub use duplicates::{DigestError, DigestIndex, DigestResult};
pub use digest_cache::DigestCache;

pub use health::{AppHealthState, HealthSettings, HealthTracker};
pub use import_policy::{ImportAttemptRecord, ImportDecision, ImportMethod, RetryPolicy};
pub use orchestrator::{ImportOrchestrator, ImportOutcome, ImportReport};

pub use pipeline::{FileOutcome, FilePipeline, PipelineError, PipelineSettings};
pub use coordinator::{Coordinator, CoordinatorError};
pub use reporting::{RunCounters, RunSummary};

pub use logger::{Logger, LoggerError};
pub use router::RouterError;
pub use tools::{ToolError, ToolSet};
pub use validator::ValidationResult;
