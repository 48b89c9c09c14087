use std::env::consts::{ARCH, FAMILY, OS};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::trace;

use crate::importer::ToolError;
use crate::program::Program;

mod importer;
mod program;

/// Converts photos and videos and imports them into the photo library.
#[derive(Parser, Debug, Clone)]
#[command(name = "media_importer")]
#[command(about = "Resilient parallel photo and video importer", long_about = None)]
#[command(version)]
pub(crate) struct Args {
    /// Directory holding config.toml
    #[arg(short, long, default_value = "config", env = "MEDIA_IMPORTER_CONFIG_DIR")]
    pub(crate) config_dir: PathBuf,

    /// Source tree to import, overriding paths.source_directory
    #[arg(short, long)]
    pub(crate) source: Option<PathBuf>,

    /// Conversion quality from 0 to 100
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub(crate) quality: Option<u8>,

    /// Number of parallel workers
    #[arg(short, long)]
    pub(crate) workers: Option<usize>,

    /// Log intended actions without converting, importing or moving anything
    #[arg(long)]
    pub(crate) dry_run: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match Program::new(args).run() {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(ToolError::Unavailable(missing)) = err.downcast_ref::<ToolError>() {
                eprintln!("Missing required tools: {}", missing.join(", "));
                return ExitCode::from(2);
            }
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Logs important information about the system being used.
pub(crate) fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_is_range_checked() {
        assert!(Args::try_parse_from(["media_importer", "--quality", "101"]).is_err());
        let args =
            Args::try_parse_from(["media_importer", "-q", "80", "--dry-run", "-w", "8"]).unwrap();
        assert_eq!(args.quality, Some(80));
        assert_eq!(args.workers, Some(8));
        assert!(args.dry_run);
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["media_importer"]).unwrap();
        assert!(!args.dry_run);
        assert!(args.quality.is_none());
        assert!(args.source.is_none());
    }
}
