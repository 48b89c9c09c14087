//! External tool seams
//!
//! The pipeline never decodes media, parses EXIF or talks to the photo library
//! itself. Every such operation goes through one of the traits below, so the
//! process-backed adapters in the submodules can be swapped for fakes.

pub mod command;
pub mod exiftool;
pub mod ffmpeg;
pub mod imaging;
pub mod photos;

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::importer::AppConfig;

/// Error types for external tool invocations
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("{program} exited with status {status:?}: {stderr}")]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Failed to parse {program} output: {details}")]
    Parse { program: String, details: String },

    #[error("Required tools are missing: {0:?}")]
    Unavailable(Vec<String>),
}

/// Result type for external tool invocations
pub type ToolResult<T> = Result<T, ToolError>;

/// Reads and writes embedded metadata tags.
pub trait MetadataTool: Send + Sync {
    /// Values for whichever of `tags` are present; absent tags are left out.
    fn read_tags(&self, path: &Path, tags: &[&str]) -> ToolResult<HashMap<String, String>>;

    /// Rewrites the given tags in place.
    fn write_tags(&self, path: &Path, assignments: &[(String, String)]) -> ToolResult<()>;

    /// Copies every transferable tag from `source` onto `target`.
    fn copy_all_tags(&self, source: &Path, target: &Path) -> ToolResult<()>;

    /// Copies only the named tags from `source` onto `target`.
    fn copy_tags(&self, source: &Path, target: &Path, tags: &[&str]) -> ToolResult<()>;
}

/// Read-only decode probes.
pub trait MediaProbe: Send + Sync {
    fn verify_image(&self, path: &Path) -> ToolResult<()>;

    /// Null-output transcode of the whole stream.
    fn verify_video(&self, path: &Path) -> ToolResult<()>;

    /// Codec name of the primary video stream, if there is one.
    fn video_codec(&self, path: &Path) -> ToolResult<Option<String>>;
}

/// Re-encodes a still image into the target container.
pub trait ImageEncoder: Send + Sync {
    fn encode(&self, input: &Path, output: &Path, quality: u8) -> ToolResult<()>;
}

/// Encoder choice and rate control for one transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub encoder: String,
    pub rate_flag: String,
    pub rate_value: u32,
    pub preset: Option<String>,
    pub audio_codec: String,
    pub tag: String,
}

/// Transcodes a video to the target codec.
pub trait VideoTranscoder: Send + Sync {
    fn transcode(&self, input: &Path, output: &Path, settings: &EncoderSettings) -> ToolResult<()>;
}

/// Content-level verdict from the primary import mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryImportStatus {
    Imported,
    Rejected(String),
}

/// Library import through the primary mechanism.
pub trait PrimaryImporter: Send + Sync {
    fn import(&self, path: &Path, skip_duplicates: bool) -> ToolResult<PrimaryImportStatus>;
}

/// Library import through the application's scripting bridge.
pub trait FallbackImporter: Send + Sync {
    fn import(&self, path: &Path) -> ToolResult<()>;
}

/// Lifecycle control of the destination application.
pub trait AppLifecycle: Send + Sync {
    fn is_running(&self) -> ToolResult<bool>;
    fn request_quit(&self) -> ToolResult<()>;
    fn force_terminate(&self) -> ToolResult<()>;
    fn launch(&self) -> ToolResult<()>;
}

/// Every external collaborator the pipeline needs.
#[derive(Clone)]
pub struct ToolSet {
    pub metadata: Arc<dyn MetadataTool>,
    pub probe: Arc<dyn MediaProbe>,
    pub image_encoder: Arc<dyn ImageEncoder>,
    pub transcoder: Arc<dyn VideoTranscoder>,
    pub primary_importer: Arc<dyn PrimaryImporter>,
    pub fallback_importer: Arc<dyn FallbackImporter>,
    pub lifecycle: Arc<dyn AppLifecycle>,
}

impl ToolSet {
    /// Process-backed adapters configured from the timeouts and import sections.
    pub fn from_config(config: &AppConfig) -> Self {
        let timeouts = &config.timeouts;
        let app = config.import.application_name.as_str();
        Self {
            metadata: Arc::new(exiftool::ExifTool::new(secs(timeouts.metadata_secs))),
            probe: Arc::new(ffmpeg::FfmpegProbe::new(secs(timeouts.probe_secs))),
            image_encoder: Arc::new(imaging::HeicEncoder::new(
                imaging::HeicBackend::for_host(),
                secs(timeouts.transcode_secs),
            )),
            transcoder: Arc::new(ffmpeg::FfmpegTranscoder::new(secs(timeouts.transcode_secs))),
            primary_importer: Arc::new(photos::OsxPhotosImporter::new(secs(timeouts.import_secs))),
            fallback_importer: Arc::new(photos::AppleScriptImporter::new(
                app,
                secs(timeouts.import_secs),
            )),
            lifecycle: Arc::new(photos::MacAppLifecycle::new(app, secs(timeouts.lifecycle_secs))),
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

/// Programs the process-backed adapters need on `PATH`.
pub fn required_programs() -> Vec<&'static str> {
    vec![
        photos::OSXPHOTOS,
        exiftool::PROGRAM,
        ffmpeg::FFMPEG,
        ffmpeg::FFPROBE,
        imaging::HeicBackend::for_host().program(),
    ]
}

/// Searches `PATH` for an executable.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Fails with the names of every program not found on `PATH`.
pub fn check_dependencies(programs: &[&str]) -> ToolResult<()> {
    let missing: Vec<String> = programs
        .iter()
        .filter(|program| find_in_path(program).is_none())
        .map(|program| program.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolError::Unavailable(missing))
    }
}
