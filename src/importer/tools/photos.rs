//! Photo library adapters: osxphotos import, AppleScript import and
//! application lifecycle control.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::command::ToolCommand;
use super::{AppLifecycle, FallbackImporter, PrimaryImportStatus, PrimaryImporter, ToolResult};

pub const OSXPHOTOS: &str = "osxphotos";
pub const OSASCRIPT: &str = "osascript";

/// Text markers osxphotos prints when an import did not land.
const FAILURE_MARKERS: &[&str] = &["Error importing file", "imported 0 file groups"];

/// One row of the `osxphotos import --report` JSON output
#[derive(Debug, Deserialize)]
struct ReportRecord {
    #[serde(default)]
    imported: bool,
    #[serde(default)]
    error: bool,
}

/// Decides whether a primary import landed.
///
/// The JSON report is preferred; the text markers are only consulted when no
/// usable report was written. Exit status alone is not enough because the tool
/// exits 0 after content-level failures.
pub fn interpret_primary_output(
    exit_success: bool,
    combined_output: &str,
    report_json: Option<&str>,
) -> PrimaryImportStatus {
    if !exit_success {
        return PrimaryImportStatus::Rejected(last_line(combined_output));
    }

    if let Some(records) =
        report_json.and_then(|json| serde_json::from_str::<Vec<ReportRecord>>(json).ok())
    {
        if !records.is_empty() {
            if records.iter().any(|record| record.error) {
                return PrimaryImportStatus::Rejected("report lists an import error".to_string());
            }
            if records.iter().any(|record| record.imported) {
                return PrimaryImportStatus::Imported;
            }
            return PrimaryImportStatus::Rejected("report lists 0 imported items".to_string());
        }
    }

    match FAILURE_MARKERS.iter().find(|marker| combined_output.contains(*marker)) {
        Some(marker) => PrimaryImportStatus::Rejected(marker.to_string()),
        None => PrimaryImportStatus::Imported,
    }
}

fn last_line(output: &str) -> String {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no output")
        .trim()
        .to_string()
}

/// Primary import through the osxphotos command line.
pub struct OsxPhotosImporter {
    timeout: Duration,
    report_dir: PathBuf,
}

impl OsxPhotosImporter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            report_dir: std::env::temp_dir(),
        }
    }
}

impl PrimaryImporter for OsxPhotosImporter {
    fn import(&self, path: &Path, skip_duplicates: bool) -> ToolResult<PrimaryImportStatus> {
        let report_path = self.report_dir.join(format!("osxphotos-report-{}.json", Uuid::new_v4()));

        let mut command = ToolCommand::new(OSXPHOTOS, self.timeout).args(["import", "--verbose"]);
        if skip_duplicates {
            command = command.arg("--skip-duplicates");
        }
        let output = command.arg("--report").arg(&report_path).arg(path).output()?;

        let report = fs::read_to_string(&report_path).ok();
        if report.is_none() {
            debug!(
                "No import report written for {}, falling back to output markers",
                path.display()
            );
        }
        let _ = fs::remove_file(&report_path);

        Ok(interpret_primary_output(output.success(), &output.combined(), report.as_deref()))
    }
}

/// Escapes a value for use inside an AppleScript string literal.
pub fn applescript_quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Fallback import that asks the application itself through AppleScript.
pub struct AppleScriptImporter {
    application: String,
    timeout: Duration,
}

impl AppleScriptImporter {
    pub fn new(application: &str, timeout: Duration) -> Self {
        Self {
            application: application.to_string(),
            timeout,
        }
    }

    pub fn script_for(&self, path: &Path) -> String {
        format!(
            "tell application \"{}\"\n    activate\n    import POSIX file \"{}\"\nend tell",
            applescript_quote(&self.application),
            applescript_quote(&path.to_string_lossy())
        )
    }
}

impl FallbackImporter for AppleScriptImporter {
    fn import(&self, path: &Path) -> ToolResult<()> {
        ToolCommand::new(OSASCRIPT, self.timeout)
            .arg("-e")
            .arg(self.script_for(path))
            .run()?;
        Ok(())
    }
}

/// Quit, kill and launch of the destination application.
pub struct MacAppLifecycle {
    application: String,
    timeout: Duration,
}

impl MacAppLifecycle {
    pub fn new(application: &str, timeout: Duration) -> Self {
        Self {
            application: application.to_string(),
            timeout,
        }
    }
}

impl AppLifecycle for MacAppLifecycle {
    fn is_running(&self) -> ToolResult<bool> {
        let output = ToolCommand::new("ps", self.timeout)
            .args(["-ax", "-o", "comm"])
            .run()?;
        let bundle = format!("{}.app", self.application);
        Ok(output.stdout.lines().any(|line| line.contains(&bundle)))
    }

    fn request_quit(&self) -> ToolResult<()> {
        ToolCommand::new(OSASCRIPT, self.timeout)
            .arg("-e")
            .arg(format!("tell application \"{}\" to quit", applescript_quote(&self.application)))
            .run()?;
        Ok(())
    }

    fn force_terminate(&self) -> ToolResult<()> {
        ToolCommand::new("killall", self.timeout)
            .arg(&self.application)
            .run()
            .inspect_err(|e| warn!("killall {} failed: {}", self.application, e))?;
        Ok(())
    }

    fn launch(&self) -> ToolResult<()> {
        ToolCommand::new("open", self.timeout)
            .args(["-a", self.application.as_str()])
            .run()?;
        Ok(())
    }
}
