//! Capture date resolution
//!
//! This module provides functionality for:
//! 1. Collecting candidate dates from embedded metadata tags and the file path
//! 2. Picking the oldest collected candidate
//! 3. Falling back to the last-modified time when nothing was collected
//! 4. Rendering a resolved date as a `YYYY/MM/DD` bucket

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::importer::tools::MetadataTool;

/// Capture and creation tags, in query order.
pub const DATE_TAGS: &[&str] =
    &["CreateDate", "DateTimeOriginal", "MediaCreateDate", "ContentCreateDate"];

/// Strict grammar embedded date values must follow.
const METADATA_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

static SEPARATED_PATH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[\\/](\d{2})[\\/](\d{2})").expect("valid path date pattern"));

static COMPACT_PATH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\D)(\d{4})(\d{2})(\d{2})(?:\D|$)").expect("valid compact date pattern")
});

/// Where a candidate date came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Metadata,
    Path,
    /// Last-modified time, used only when nothing else was found
    Modified,
}

impl fmt::Display for DateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateSource::Metadata => write!(f, "metadata"),
            DateSource::Path => write!(f, "path"),
            DateSource::Modified => write!(f, "modified time"),
        }
    }
}

/// The date a file is filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub value: NaiveDateTime,
    pub source: DateSource,
}

impl ResolvedDate {
    /// Relative `YYYY/MM/DD` directory for date-bucketed trees.
    pub fn bucket(&self) -> PathBuf {
        let date = self.value.date();
        PathBuf::from(date.format("%Y").to_string())
            .join(date.format("%m").to_string())
            .join(date.format("%d").to_string())
    }
}

impl fmt::Display for ResolvedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value.date().format("%Y-%m-%d"), self.source)
    }
}

/// Candidate dates gathered for one file, excluding the filesystem fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateEvidence {
    pub candidates: Vec<(NaiveDateTime, DateSource)>,
}

impl DateEvidence {
    /// Collects candidates from already-read tag values and the path itself.
    pub fn collect(path: &Path, tags: &HashMap<String, String>) -> Self {
        let mut candidates: Vec<(NaiveDateTime, DateSource)> = DATE_TAGS
            .iter()
            .filter_map(|tag| tags.get(*tag))
            .filter_map(|value| parse_metadata_date(value))
            .map(|value| (value, DateSource::Metadata))
            .collect();

        if let Some(date) = path_date(path) {
            candidates.push((date, DateSource::Path));
        }

        Self { candidates }
    }

    /// Oldest collected candidate, if any.
    pub fn oldest(&self) -> Option<ResolvedDate> {
        self.candidates
            .iter()
            .min_by_key(|(value, _)| *value)
            .map(|(value, source)| ResolvedDate { value: *value, source: *source })
    }

    /// Oldest candidate, or the file's last-modified time when there are none.
    pub fn resolve(&self, path: &Path) -> io::Result<ResolvedDate> {
        match self.oldest() {
            Some(resolved) => Ok(resolved),
            None => Ok(ResolvedDate {
                value: modified_time(path)?,
                source: DateSource::Modified,
            }),
        }
    }
}

/// Reads the capture tags of a file; a failed read counts as no tags.
pub fn read_date_tags(path: &Path, metadata: &dyn MetadataTool) -> HashMap<String, String> {
    match metadata.read_tags(path, DATE_TAGS) {
        Ok(tags) => tags,
        Err(e) => {
            debug!("No readable date tags for {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

/// Resolves the capture date of `path` from scratch.
pub fn resolve(path: &Path, metadata: &dyn MetadataTool) -> io::Result<ResolvedDate> {
    let tags = read_date_tags(path, metadata);
    DateEvidence::collect(path, &tags).resolve(path)
}

/// Parses `YYYY:MM:DD HH:MM:SS`; anything else, including sub-second or zone
/// suffixes and impossible calendar values, is rejected.
pub fn parse_metadata_date(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), METADATA_DATE_FORMAT).ok()
}

/// A calendar date embedded in the path, at midnight.
///
/// `YYYY/MM/DD` anywhere in the path wins; otherwise a standalone run of
/// exactly eight digits anywhere in the path is tried.
pub fn path_date(path: &Path) -> Option<NaiveDateTime> {
    let full = path.to_string_lossy();
    first_valid_date(&SEPARATED_PATH_DATE, &full)
        .or_else(|| first_valid_date(&COMPACT_PATH_DATE, &full))
}

fn first_valid_date(pattern: &Regex, haystack: &str) -> Option<NaiveDateTime> {
    pattern.captures_iter(haystack).find_map(|caps| {
        let year = caps[1].parse::<i32>().ok()?;
        let month = caps[2].parse::<u32>().ok()?;
        let day = caps[3].parse::<u32>().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)
    })
}

/// Last-modified time in local time.
pub fn modified_time(path: &Path) -> io::Result<NaiveDateTime> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Local>::from(modified).naive_local())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::tools::{ToolError, ToolResult};
    use std::fs::File;
    use tempfile::tempdir;

    struct StaticTags(HashMap<String, String>);

    impl MetadataTool for StaticTags {
        fn read_tags(&self, _path: &Path, tags: &[&str]) -> ToolResult<HashMap<String, String>> {
            Ok(self
                .0
                .iter()
                .filter(|(k, _)| tags.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }
        fn write_tags(&self, _: &Path, _: &[(String, String)]) -> ToolResult<()> {
            Ok(())
        }
        fn copy_all_tags(&self, _: &Path, _: &Path) -> ToolResult<()> {
            Ok(())
        }
        fn copy_tags(&self, _: &Path, _: &Path, _: &[&str]) -> ToolResult<()> {
            Ok(())
        }
    }

    struct BrokenTool;

    impl MetadataTool for BrokenTool {
        fn read_tags(&self, _: &Path, _: &[&str]) -> ToolResult<HashMap<String, String>> {
            Err(ToolError::Parse { program: "exiftool".into(), details: "boom".into() })
        }
        fn write_tags(&self, _: &Path, _: &[(String, String)]) -> ToolResult<()> {
            Ok(())
        }
        fn copy_all_tags(&self, _: &Path, _: &Path) -> ToolResult<()> {
            Ok(())
        }
        fn copy_tags(&self, _: &Path, _: &Path, _: &[&str]) -> ToolResult<()> {
            Ok(())
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_path_date_older_than_exif_wins() {
        let path = Path::new("/archive/2019/01/01/pic.jpg");
        let evidence =
            DateEvidence::collect(path, &tags(&[("DateTimeOriginal", "2020:05:01 10:00:00")]));

        let resolved = evidence.oldest().unwrap();
        assert_eq!(resolved.value.date(), ymd(2019, 1, 1));
        assert_eq!(resolved.source, DateSource::Path);
        assert_eq!(resolved.bucket(), PathBuf::from("2019").join("01").join("01"));
    }

    #[test]
    fn test_minimum_across_all_tags() {
        let evidence = DateEvidence::collect(
            Path::new("/in/clip.mov"),
            &tags(&[
                ("CreateDate", "2015:09:06 08:00:00"),
                ("MediaCreateDate", "2014:12:31 23:59:59"),
                ("ContentCreateDate", "2016:01:01 00:00:00"),
            ]),
        );

        assert_eq!(evidence.candidates.len(), 3);
        assert_eq!(evidence.oldest().unwrap().value.date(), ymd(2014, 12, 31));
    }

    #[test]
    fn test_malformed_values_are_discarded() {
        assert!(parse_metadata_date("2020:13:01 10:00:00").is_none());
        assert!(parse_metadata_date("0000:00:00 00:00:00").is_none());
        assert!(parse_metadata_date("2020-05-01 10:00:00").is_none());
        assert!(parse_metadata_date("2020:05:01 10:00:00+02:00").is_none());
        assert!(parse_metadata_date(" 2020:05:01 10:00:00 ").is_some());

        let evidence = DateEvidence::collect(
            Path::new("/in/a.jpg"),
            &tags(&[("CreateDate", "garbage"), ("DateTimeOriginal", "2018:02:03 04:05:06")]),
        );
        assert_eq!(evidence.candidates.len(), 1);
    }

    #[test]
    fn test_path_patterns() {
        assert_eq!(path_date(Path::new("/a/2012/07/04/x.jpg")).unwrap().date(), ymd(2012, 7, 4));
        assert_eq!(path_date(Path::new("/a/b/IMG_20170230_x.jpg")), None);
        assert_eq!(
            path_date(Path::new("/a/b/IMG_20170228_x.jpg")).unwrap().date(),
            ymd(2017, 2, 28)
        );
        // Invalid separated date falls through to the file name.
        assert_eq!(
            path_date(Path::new("/a/2012/13/40/VID_20100101.mp4")).unwrap().date(),
            ymd(2010, 1, 1)
        );
        assert_eq!(path_date(Path::new("/a/holiday/x.jpg")), None);
        // Longer digit runs are not dates.
        assert_eq!(path_date(Path::new("/a/b/1234567890.jpg")), None);
    }

    #[test]
    fn test_compact_folder_date_is_collected() {
        let path = Path::new("/archive/20190101/pic.jpg");
        let evidence =
            DateEvidence::collect(path, &tags(&[("DateTimeOriginal", "2020:05:01 10:00:00")]));

        assert_eq!(evidence.candidates.len(), 2);
        let resolved = evidence.oldest().unwrap();
        assert_eq!(resolved.value.date(), ymd(2019, 1, 1));
        assert_eq!(resolved.source, DateSource::Path);
    }

    #[test]
    fn test_falls_back_to_modified_time_exactly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("undated.png");
        File::create(&path).unwrap();

        let resolved = resolve(&path, &BrokenTool).unwrap();
        assert_eq!(resolved.source, DateSource::Modified);
        assert_eq!(resolved.value, modified_time(&path).unwrap());
    }

    #[test]
    fn test_resolve_is_repeatable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        File::create(&path).unwrap();
        let tool = StaticTags(tags(&[("CreateDate", "2001:02:03 04:05:06")]));

        let first = resolve(&path, &tool).unwrap();
        let second = resolve(&path, &tool).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.source, DateSource::Metadata);
    }
}
