//! Still-image decode checks and HEIC encoding.

use std::path::Path;
use std::time::Duration;

use image::ImageFormat;

use super::command::ToolCommand;
use super::{ImageEncoder, ToolError, ToolResult};

const DECODER_NAME: &str = "image decoder";

/// Fully decodes formats the `image` crate handles; `None` for anything else.
pub fn decode_check(path: &Path) -> Option<ToolResult<()>> {
    let format = ImageFormat::from_path(path).ok()?;
    if !matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Tiff | ImageFormat::Bmp
    ) {
        return None;
    }

    Some(image::open(path).map(|_| ()).map_err(|e| ToolError::Failed {
        program: DECODER_NAME.to_string(),
        status: None,
        stderr: e.to_string(),
    }))
}

/// Which program writes HEIC on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeicBackend {
    /// macOS scriptable image processing system
    Sips,
    ImageMagick,
}

impl HeicBackend {
    pub fn for_host() -> Self {
        if cfg!(target_os = "macos") {
            HeicBackend::Sips
        } else {
            HeicBackend::ImageMagick
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            HeicBackend::Sips => "sips",
            HeicBackend::ImageMagick => "magick",
        }
    }
}

pub struct HeicEncoder {
    backend: HeicBackend,
    timeout: Duration,
}

impl HeicEncoder {
    pub fn new(backend: HeicBackend, timeout: Duration) -> Self {
        Self { backend, timeout }
    }
}

/// Arguments for one encode with the given backend.
pub fn encode_args(backend: HeicBackend, input: &Path, output: &Path, quality: u8) -> Vec<String> {
    let input = input.to_string_lossy().into_owned();
    let output = output.to_string_lossy().into_owned();
    match backend {
        HeicBackend::Sips => vec![
            "-s".to_string(),
            "format".to_string(),
            "heic".to_string(),
            "-s".to_string(),
            "formatOptions".to_string(),
            quality.to_string(),
            input,
            "--out".to_string(),
            output,
        ],
        HeicBackend::ImageMagick => vec![
            input,
            "-quality".to_string(),
            quality.to_string(),
            output,
        ],
    }
}

impl ImageEncoder for HeicEncoder {
    fn encode(&self, input: &Path, output: &Path, quality: u8) -> ToolResult<()> {
        ToolCommand::new(self.backend.program(), self.timeout)
            .args(encode_args(self.backend, input, output, quality))
            .run()?;
        Ok(())
    }
}
