//! Format conversion engine
//!
//! This module provides functionality for:
//! 1. Re-encoding images into the target container, or byte-copying when already there
//! 2. Transcoding videos to the target codec, or byte-copying when the probe says it already is
//! 3. Choosing the hardware or software encoder by platform
//! 4. Reapplying metadata (all tags, then a minimal date/camera subset) and file times
//! 5. Removing partial output on any failure

use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::importer::date_resolver::ResolvedDate;
use crate::importer::router::unique_destination;
use crate::importer::tools::{
    EncoderSettings, ImageEncoder, MediaProbe, MetadataTool, ToolError, ToolSet, VideoTranscoder,
};
use crate::importer::{Conversion, MediaFile, MediaKind};

/// Tags copied when a full metadata transfer is refused.
pub const MINIMAL_TAGS: &[&str] =
    &["DateTimeOriginal", "CreateDate", "ModifyDate", "Make", "Model"];

/// Codec names that already count as the target codec.
const HEVC_ALIASES: &[&str] = &["hevc", "h265"];

/// Error types for conversion
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Encoding failed: {0}")]
    Encode(#[source] ToolError),

    #[error("Metadata transfer failed: {0}")]
    Metadata(#[source] ToolError),

    #[error("Cannot convert unsupported file {0}")]
    Unsupported(PathBuf),
}

/// Result type for conversion
pub type ConversionResult<T> = Result<T, ConversionError>;

/// Host family, which decides the video encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Other,
}

impl Platform {
    pub fn for_host() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Other
        }
    }
}

/// Encoder and rate control for `quality` (0 to 100) on `platform`.
///
/// The software path maps quality inversely onto x265's CRF scale of 0 to 51.
pub fn encoder_settings(
    platform: Platform,
    quality: u8,
    conversion: &Conversion,
) -> EncoderSettings {
    let quality = quality.min(100) as u32;
    match platform {
        Platform::MacOs => EncoderSettings {
            encoder: "hevc_videotoolbox".to_string(),
            rate_flag: "-q:v".to_string(),
            rate_value: quality,
            preset: None,
            audio_codec: conversion.audio_codec.clone(),
            tag: conversion.video_tag.clone(),
        },
        Platform::Other => EncoderSettings {
            encoder: "libx265".to_string(),
            rate_flag: "-crf".to_string(),
            rate_value: (100 - quality) * 51 / 100,
            preset: Some(conversion.software_preset.clone()),
            audio_codec: conversion.audio_codec.clone(),
            tag: conversion.video_tag.clone(),
        },
    }
}

/// How the output bytes were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMethod {
    Copied,
    Encoded,
}

/// How tags reached the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataTransfer {
    /// Byte copy, tags came along with the bytes
    Intact,
    Full,
    Minimal,
}

/// Output handed over to the import stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOutcome {
    pub output: PathBuf,
    pub method: ConversionMethod,
    pub metadata: MetadataTransfer,
}

/// What a conversion will do, decided before anything is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionPlan {
    pub output: PathBuf,
    pub method: ConversionMethod,
}

pub struct Converter {
    metadata: Arc<dyn MetadataTool>,
    probe: Arc<dyn MediaProbe>,
    image_encoder: Arc<dyn ImageEncoder>,
    transcoder: Arc<dyn VideoTranscoder>,
    conversion: Conversion,
    platform: Platform,
}

impl Converter {
    pub fn new(tools: &ToolSet, conversion: Conversion, platform: Platform) -> Self {
        Self {
            metadata: Arc::clone(&tools.metadata),
            probe: Arc::clone(&tools.probe),
            image_encoder: Arc::clone(&tools.image_encoder),
            transcoder: Arc::clone(&tools.transcoder),
            conversion,
            platform,
        }
    }

    /// Output name and method for `media`, placed under `output_root/<bucket>`.
    pub fn plan(
        &self,
        media: &MediaFile,
        date: &ResolvedDate,
        output_root: &Path,
    ) -> ConversionResult<ConversionPlan> {
        let (file_name, method) = match media.kind {
            MediaKind::Image => {
                if media.extension() == self.conversion.image_target_extension {
                    (media.file_name.clone(), ConversionMethod::Copied)
                } else {
                    (
                        format!("{}.{}", media.stem(), self.conversion.image_target_extension),
                        ConversionMethod::Encoded,
                    )
                }
            }
            MediaKind::Video => {
                if self.already_target_codec(&media.path()) {
                    (media.file_name.clone(), ConversionMethod::Copied)
                } else {
                    (
                        format!(
                            "{}{}.{}",
                            media.stem(),
                            self.conversion.video_output_suffix,
                            self.conversion.video_output_extension
                        ),
                        ConversionMethod::Encoded,
                    )
                }
            }
            MediaKind::Unsupported => return Err(ConversionError::Unsupported(media.path())),
        };

        let bucket = output_root.join(date.bucket());
        Ok(ConversionPlan {
            output: unique_destination(&bucket, &file_name),
            method,
        })
    }

    /// Produces the output for `media`. Any failure leaves no output behind.
    pub fn convert(
        &self,
        media: &MediaFile,
        date: &ResolvedDate,
        output_root: &Path,
    ) -> ConversionResult<ConversionOutcome> {
        let plan = self.plan(media, date, output_root)?;
        let source = media.path();

        if let Some(parent) = plan.output.parent() {
            fs::create_dir_all(parent).map_err(|e| ConversionError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        match self.produce(media, &source, &plan) {
            Ok(metadata) => {
                info!(
                    "Converted {} -> {} ({:?}, metadata {:?})",
                    source.display(),
                    plan.output.display(),
                    plan.method,
                    metadata
                );
                Ok(ConversionOutcome {
                    output: plan.output,
                    method: plan.method,
                    metadata,
                })
            }
            Err(e) => {
                remove_partial(&plan.output);
                Err(e)
            }
        }
    }

    fn produce(
        &self,
        media: &MediaFile,
        source: &Path,
        plan: &ConversionPlan,
    ) -> ConversionResult<MetadataTransfer> {
        let metadata = match plan.method {
            ConversionMethod::Copied => {
                fs::copy(source, &plan.output).map_err(|e| ConversionError::Io {
                    path: plan.output.clone(),
                    source: e,
                })?;
                MetadataTransfer::Intact
            }
            ConversionMethod::Encoded => {
                match media.kind {
                    MediaKind::Image => self
                        .image_encoder
                        .encode(source, &plan.output, self.conversion.quality)
                        .map_err(ConversionError::Encode)?,
                    _ => {
                        let settings = encoder_settings(
                            self.platform,
                            self.conversion.quality,
                            &self.conversion,
                        );
                        self.transcoder
                            .transcode(source, &plan.output, &settings)
                            .map_err(ConversionError::Encode)?
                    }
                }
                self.transfer_metadata(source, &plan.output)?
            }
        };

        restore_file_times(source, &plan.output)?;
        Ok(metadata)
    }

    /// Copies every tag, falling back to the minimal subset.
    fn transfer_metadata(
        &self,
        source: &Path,
        output: &Path,
    ) -> ConversionResult<MetadataTransfer> {
        match self.metadata.copy_all_tags(source, output) {
            Ok(()) => Ok(MetadataTransfer::Full),
            Err(full_err) => {
                warn!(
                    "Full metadata copy to {} failed ({}), copying minimal tags",
                    output.display(),
                    full_err
                );
                self.metadata
                    .copy_tags(source, output, MINIMAL_TAGS)
                    .map_err(ConversionError::Metadata)?;
                Ok(MetadataTransfer::Minimal)
            }
        }
    }

    fn already_target_codec(&self, path: &Path) -> bool {
        let target = self.conversion.video_target_codec.to_ascii_lowercase();
        match self.probe.video_codec(path) {
            Ok(Some(codec)) => {
                codec == target
                    || (HEVC_ALIASES.contains(&target.as_str())
                        && HEVC_ALIASES.contains(&codec.as_str()))
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Codec probe failed for {}, transcoding: {}", path.display(), e);
                false
            }
        }
    }
}

/// Gives `output` the access and modification times of `source`.
pub fn restore_file_times(source: &Path, output: &Path) -> ConversionResult<()> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| ConversionError::Io { path, source }
    };

    let metadata = fs::metadata(source).map_err(io_err(source))?;
    let mut times = FileTimes::new().set_modified(metadata.modified().map_err(io_err(source))?);
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }

    File::options()
        .write(true)
        .open(output)
        .and_then(|file| file.set_times(times))
        .map_err(io_err(output))
}

fn remove_partial(output: &Path) {
    if output.exists() {
        match fs::remove_file(output) {
            Ok(()) => debug!("Removed partial output {}", output.display()),
            Err(e) => warn!("Failed to remove partial output {}: {}", output.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::AppConfig;

    #[test]
    fn test_software_crf_is_inverse_of_quality() {
        let conversion = AppConfig::default().conversion;

        let high = encoder_settings(Platform::Other, 90, &conversion);
        assert_eq!(high.encoder, "libx265");
        assert_eq!(high.rate_value, 5);
        assert_eq!(high.preset.as_deref(), Some("medium"));

        assert_eq!(encoder_settings(Platform::Other, 0, &conversion).rate_value, 51);
        assert_eq!(encoder_settings(Platform::Other, 100, &conversion).rate_value, 0);
        assert_eq!(encoder_settings(Platform::Other, 50, &conversion).rate_value, 25);
        assert!(
            encoder_settings(Platform::Other, 80, &conversion).rate_value
                < encoder_settings(Platform::Other, 20, &conversion).rate_value
        );
    }

    #[test]
    fn test_hardware_path_passes_quality_through() {
        let conversion = AppConfig::default().conversion;
        let settings = encoder_settings(Platform::MacOs, 75, &conversion);

        assert_eq!(settings.encoder, "hevc_videotoolbox");
        assert_eq!(settings.rate_flag, "-q:v");
        assert_eq!(settings.rate_value, 75);
        assert_eq!(settings.preset, None);
        assert_eq!(settings.tag, "hvc1");
    }
}
