//! Outcome routing into date-bucketed trees.

use std::fs::{self, File, FileTimes, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::importer::date_resolver::ResolvedDate;

/// Error types for file routing
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Path has no file name: {0}")]
    MissingFileName(PathBuf),
}

/// Result type for file routing
pub type RouterResult<T> = Result<T, RouterError>;

/// First free path for `file_name` inside `dir`: the name itself, then
/// `stem_1.ext`, `stem_2.ext` and so on.
///
/// Only a suggestion: another worker may take the name first, which
/// `move_to_bucket` detects and retries.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = name.extension().map(|e| e.to_string_lossy().into_owned());

    (1u64..)
        .map(|n| match &extension {
            Some(ext) => dir.join(format!("{}_{}.{}", stem, n, ext)),
            None => dir.join(format!("{}_{}", stem, n)),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Moves `file` to `root/YYYY/MM/DD/<name>`, creating folders and avoiding collisions.
pub fn move_to_bucket(file: &Path, root: &Path, date: &ResolvedDate) -> RouterResult<PathBuf> {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| RouterError::MissingFileName(file.to_path_buf()))?;

    let bucket = root.join(date.bucket());
    fs::create_dir_all(&bucket).map_err(|source| RouterError::Io {
        path: bucket.clone(),
        source,
    })?;

    let destination = place_without_clobber(file, &bucket, &file_name)?;

    info!("Moved {} to {}", file.display(), destination.display());
    Ok(destination)
}

/// Where `move_to_bucket` would put the file, without touching anything.
pub fn planned_destination(file: &Path, root: &Path, date: &ResolvedDate) -> RouterResult<PathBuf> {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| RouterError::MissingFileName(file.to_path_buf()))?;
    Ok(unique_destination(&root.join(date.bucket()), &file_name))
}

/// Moves `from` to the first free name in `dir`, never replacing an existing file.
///
/// A hard link claims the name atomically; where links are not possible
/// (another filesystem) the bytes are copied into a freshly created file.
/// Either way a name taken in the meantime moves on to the next suffix.
fn place_without_clobber(from: &Path, dir: &Path, file_name: &str) -> RouterResult<PathBuf> {
    loop {
        let candidate = unique_destination(dir, file_name);
        let placed = match fs::hard_link(from, &candidate) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
            Err(link_err) => {
                debug!("Hard link of {} failed ({}), copying instead", from.display(), link_err);
                copy_new(from, &candidate)
            }
        };

        match placed {
            Ok(()) => {
                fs::remove_file(from).map_err(|source| RouterError::Io {
                    path: from.to_path_buf(),
                    source,
                })?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} was taken, trying the next name", candidate.display());
            }
            Err(source) => {
                return Err(RouterError::Io {
                    path: candidate,
                    source,
                });
            }
        }
    }
}

/// Copies into a file that must not exist yet, keeping permissions and times.
fn copy_new(from: &Path, to: &Path) -> io::Result<()> {
    let mut target = OpenOptions::new().write(true).create_new(true).open(to)?;
    let result = (|| -> io::Result<()> {
        let mut source = File::open(from)?;
        io::copy(&mut source, &mut target)?;
        let metadata = source.metadata()?;
        target.set_permissions(metadata.permissions())?;
        target.set_times(FileTimes::new().set_modified(metadata.modified()?))
    })();

    if result.is_err() {
        drop(target);
        let _ = fs::remove_file(to);
    }
    result
}
