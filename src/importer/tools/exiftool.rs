//! ExifTool adapter for metadata reads, writes and transfers.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use super::command::ToolCommand;
use super::{MetadataTool, ToolError, ToolResult};

pub const PROGRAM: &str = "exiftool";

pub struct ExifTool {
    timeout: Duration,
}

impl ExifTool {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(&self) -> ToolCommand {
        ToolCommand::new(PROGRAM, self.timeout)
    }
}

impl MetadataTool for ExifTool {
    fn read_tags(&self, path: &Path, tags: &[&str]) -> ToolResult<HashMap<String, String>> {
        let output = self
            .command()
            .args(["-j", "-s"])
            .args(tags.iter().map(|tag| format!("-{}", tag)))
            .arg(path)
            .run()?;

        parse_json_tags(&output.stdout, tags)
    }

    fn write_tags(&self, path: &Path, assignments: &[(String, String)]) -> ToolResult<()> {
        self.command()
            .arg("-overwrite_original")
            .args(assignments.iter().map(|(tag, value)| format!("-{}={}", tag, value)))
            .arg(path)
            .run()?;
        Ok(())
    }

    fn copy_all_tags(&self, source: &Path, target: &Path) -> ToolResult<()> {
        self.command()
            .args(["-overwrite_original", "-tagsFromFile"])
            .arg(source)
            .arg(target)
            .run()?;
        Ok(())
    }

    fn copy_tags(&self, source: &Path, target: &Path, tags: &[&str]) -> ToolResult<()> {
        self.command()
            .args(["-overwrite_original", "-tagsFromFile"])
            .arg(source)
            .args(tags.iter().map(|tag| format!("-{}", tag)))
            .arg(target)
            .run()?;
        Ok(())
    }
}

/// Picks the requested tags out of `exiftool -j` output.
pub fn parse_json_tags(stdout: &str, tags: &[&str]) -> ToolResult<HashMap<String, String>> {
    let parsed: Vec<HashMap<String, Value>> =
        serde_json::from_str(stdout).map_err(|e| ToolError::Parse {
            program: PROGRAM.to_string(),
            details: e.to_string(),
        })?;

    let mut values = HashMap::new();
    let Some(record) = parsed.into_iter().next() else {
        return Ok(values);
    };

    for tag in tags {
        // Group-qualified requests like EXIF:CreateDate come back under the bare name.
        let key = tag.rsplit(':').next().unwrap_or(tag);
        let value = match record.get(key) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => continue,
        };
        if !value.is_empty() {
            values.insert(tag.to_string(), value);
        }
    }

    Ok(values)
}
