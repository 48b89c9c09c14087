//! Integrity and metadata validation.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::importer::MediaKind;
use crate::importer::date_resolver::DATE_TAGS;
use crate::importer::tools::MediaProbe;

/// Verdict for one file; anything but `Valid` stops the file here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    /// No capture-date tag was found
    InvalidMetadata,
    /// Decode or probe failed
    InvalidIntegrity(String),
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationResult::Valid => write!(f, "valid"),
            ValidationResult::InvalidMetadata => write!(f, "no capture date metadata"),
            ValidationResult::InvalidIntegrity(reason) => {
                write!(f, "integrity check failed: {}", reason)
            }
        }
    }
}

/// True when any capture-date tag came back with a value.
pub fn has_capture_tag(tags: &HashMap<String, String>) -> bool {
    DATE_TAGS
        .iter()
        .any(|tag| tags.get(*tag).is_some_and(|value| !value.trim().is_empty()))
}

/// Runs both checks. Integrity goes first so a corrupt file is reported as
/// such even when its tags are also missing.
pub fn validate(
    path: &Path,
    kind: MediaKind,
    date_tags: &HashMap<String, String>,
    probe: &dyn MediaProbe,
) -> ValidationResult {
    let integrity = match kind {
        MediaKind::Image => probe.verify_image(path),
        MediaKind::Video => probe.verify_video(path),
        MediaKind::Unsupported => {
            return ValidationResult::InvalidIntegrity("unsupported media type".to_string());
        }
    };

    if let Err(e) = integrity {
        debug!("Integrity probe failed for {}: {}", path.display(), e);
        return ValidationResult::InvalidIntegrity(e.to_string());
    }

    if !has_capture_tag(date_tags) {
        return ValidationResult::InvalidMetadata;
    }

    ValidationResult::Valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::tools::{ToolError, ToolResult};

    struct Probe {
        healthy: bool,
    }

    impl MediaProbe for Probe {
        fn verify_image(&self, _: &Path) -> ToolResult<()> {
            self.check()
        }
        fn verify_video(&self, _: &Path) -> ToolResult<()> {
            self.check()
        }
        fn video_codec(&self, _: &Path) -> ToolResult<Option<String>> {
            Ok(None)
        }
    }

    impl Probe {
        fn check(&self) -> ToolResult<()> {
            if self.healthy {
                Ok(())
            } else {
                Err(ToolError::Failed {
                    program: "ffmpeg".into(),
                    status: Some(1),
                    stderr: "moov atom not found".into(),
                })
            }
        }
    }

    fn dated() -> HashMap<String, String> {
        HashMap::from([("DateTimeOriginal".to_string(), "2020:05:01 10:00:00".to_string())])
    }

    #[test]
    fn test_valid_file() {
        let result =
            validate(Path::new("a.jpg"), MediaKind::Image, &dated(), &Probe { healthy: true });
        assert_eq!(result, ValidationResult::Valid);
    }

    #[test]
    fn test_missing_tags_is_invalid_metadata() {
        let result = validate(
            Path::new("a.mov"),
            MediaKind::Video,
            &HashMap::new(),
            &Probe { healthy: true },
        );
        assert_eq!(result, ValidationResult::InvalidMetadata);

        let blank = HashMap::from([("CreateDate".to_string(), "  ".to_string())]);
        assert!(!has_capture_tag(&blank));
    }

    #[test]
    fn test_corrupt_file_is_invalid_integrity_even_without_tags() {
        let result = validate(
            Path::new("a.mov"),
            MediaKind::Video,
            &HashMap::new(),
            &Probe { healthy: false },
        );
        assert!(matches!(
            result,
            ValidationResult::InvalidIntegrity(reason) if reason.contains("moov")
        ));
    }
}
