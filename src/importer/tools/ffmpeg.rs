//! FFmpeg/FFprobe adapter for decode probes, codec probes and transcoding.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::command::ToolCommand;
use super::imaging;
use super::{EncoderSettings, MediaProbe, ToolError, ToolResult, VideoTranscoder};

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
}

/// Decode probes backed by ffmpeg, with in-process decoding for common still formats.
pub struct FfmpegProbe {
    probe_timeout: Duration,
}

impl FfmpegProbe {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    fn null_decode(&self, path: &Path) -> ToolResult<()> {
        ToolCommand::new(FFMPEG, self.probe_timeout)
            .args(["-v", "error", "-i"])
            .arg(path)
            .args(["-f", "null", "-"])
            .run()?;
        Ok(())
    }
}

impl MediaProbe for FfmpegProbe {
    fn verify_image(&self, path: &Path) -> ToolResult<()> {
        match imaging::decode_check(path) {
            Some(result) => result,
            None => {
                debug!("No in-process decoder for {}, probing with ffmpeg", path.display());
                self.null_decode(path)
            }
        }
    }

    fn verify_video(&self, path: &Path) -> ToolResult<()> {
        self.null_decode(path)
    }

    fn video_codec(&self, path: &Path) -> ToolResult<Option<String>> {
        let output = ToolCommand::new(FFPROBE, self.probe_timeout)
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-show_entries", "stream=codec_name",
                "-of", "json",
            ])
            .arg(path)
            .run()?;

        parse_codec(&output.stdout)
    }
}

/// Codec of the first stream in `ffprobe -of json` output, lower-cased.
pub fn parse_codec(stdout: &str) -> ToolResult<Option<String>> {
    let parsed: ProbeOutput = serde_json::from_str(stdout).map_err(|e| ToolError::Parse {
        program: FFPROBE.to_string(),
        details: e.to_string(),
    })?;

    Ok(parsed
        .streams
        .into_iter()
        .find_map(|stream| stream.codec_name)
        .map(|codec| codec.to_ascii_lowercase()))
}

pub struct FfmpegTranscoder {
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Arguments for one transcode, in ffmpeg's order.
pub fn transcode_args(input: &Path, output: &Path, settings: &EncoderSettings) -> Vec<String> {
    let mut args = vec![
        "-nostdin".to_string(),
        "-n".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-c:v".to_string(),
        settings.encoder.clone(),
        settings.rate_flag.clone(),
        settings.rate_value.to_string(),
    ];
    if let Some(preset) = &settings.preset {
        args.push("-preset".to_string());
        args.push(preset.clone());
    }
    args.extend([
        "-c:a".to_string(),
        settings.audio_codec.clone(),
        "-tag:v".to_string(),
        settings.tag.clone(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

impl VideoTranscoder for FfmpegTranscoder {
    fn transcode(&self, input: &Path, output: &Path, settings: &EncoderSettings) -> ToolResult<()> {
        ToolCommand::new(FFMPEG, self.timeout)
            .args(transcode_args(input, output, settings))
            .run()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_codec() {
        let stdout = r#"{"programs": [], "streams": [{"codec_name": "HEVC"}]}"#;
        assert_eq!(parse_codec(stdout).unwrap().as_deref(), Some("hevc"));
    }

    #[test]
    fn test_parse_codec_without_video_stream() {
        assert_eq!(parse_codec(r#"{"streams": []}"#).unwrap(), None);
        assert_eq!(parse_codec("{}").unwrap(), None);
    }

    #[test]
    fn test_transcode_args_software_path() {
        let settings = EncoderSettings {
            encoder: "libx265".to_string(),
            rate_flag: "-crf".to_string(),
            rate_value: 5,
            preset: Some("medium".to_string()),
            audio_codec: "aac".to_string(),
            tag: "hvc1".to_string(),
        };
        let args = transcode_args(&PathBuf::from("in.mov"), &PathBuf::from("out.mp4"), &settings);

        assert_eq!(
            args,
            vec![
                "-nostdin", "-n", "-i", "in.mov", "-c:v", "libx265", "-crf", "5",
                "-preset", "medium", "-c:a", "aac", "-tag:v", "hvc1", "out.mp4",
            ]
        );
    }
}
