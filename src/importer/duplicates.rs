//! Content-digest duplicate screening
//!
//! This module provides functionality for:
//! 1. Streaming SHA-256 digests of whole files in fixed-size chunks
//! 2. Building the digest index of the library originals once per run, in parallel
//! 3. Reusing cached digests for unchanged originals when a cache is configured
//! 4. Answering duplicate checks and recording digests of files imported this run

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use parking_lot::RwLock;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::importer::digest_cache::{DigestCache, DigestRecord};

/// Error types for digest index operations
#[derive(Error, Debug)]
pub enum DigestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Thread pool error: {0}")]
    Pool(String),
}

/// Result type for digest index operations
pub type DigestResult<T> = Result<T, DigestError>;

/// Hex SHA-256 of a file, read `chunk_size` bytes at a time.
pub fn hash_file(path: &Path, chunk_size: usize) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Duplicate check result, carrying the digest so it can be recorded later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateVerdict {
    pub duplicate: bool,
    pub digest: String,
}

/// Digests of everything already in the destination library
pub struct DigestIndex {
    digests: RwLock<HashSet<String>>,
    chunk_size: usize,
}

impl DigestIndex {
    pub fn empty(chunk_size: usize) -> Self {
        Self {
            digests: RwLock::new(HashSet::new()),
            chunk_size,
        }
    }

    /// Hashes every file under `originals` using `threads` workers.
    ///
    /// With a cache, files whose size and mtime match their cached row are not
    /// re-read, new digests are written back and rows for vanished files pruned.
    pub fn build(
        originals: &Path,
        chunk_size: usize,
        threads: usize,
        cache: Option<&DigestCache>,
    ) -> DigestResult<Self> {
        let index = Self::empty(chunk_size);
        if !originals.is_dir() {
            warn!(
                "Library originals not found at {}, duplicate index is empty",
                originals.display()
            );
            return Ok(index);
        }

        let files: Vec<PathBuf> = WalkDir::new(originals)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable library entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();

        info!("Building digest index over {} library originals", files.len());

        let cached = match cache {
            Some(cache) => cache.load()?,
            None => Default::default(),
        };

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("digest-worker-{}", i))
            .build()
            .map_err(|e| DigestError::Pool(e.to_string()))?;

        // (digest, fresh row to write back when it was not served from cache)
        let hashed: Vec<(String, Option<DigestRecord>)> = pool.install(|| {
            files
                .par_iter()
                .filter_map(|path| {
                    let (size, modified_ms) = match file_stamp(path) {
                        Ok(stamp) => stamp,
                        Err(e) => {
                            warn!("Cannot stat {}: {}", path.display(), e);
                            return None;
                        }
                    };

                    if let Some(hit) = cached.get(path) {
                        if hit.size == size && hit.modified_ms == modified_ms {
                            return Some((hit.sha256.clone(), None));
                        }
                    }

                    match hash_file(path, chunk_size) {
                        Ok(sha256) => Some((
                            sha256.clone(),
                            Some(DigestRecord {
                                path: path.clone(),
                                size,
                                modified_ms,
                                sha256,
                            }),
                        )),
                        Err(e) => {
                            warn!("Cannot hash {}: {}", path.display(), e);
                            None
                        }
                    }
                })
                .collect()
        });

        let mut fresh = Vec::new();
        {
            let mut digests = index.digests.write();
            for (digest, record) in hashed {
                digests.insert(digest);
                fresh.extend(record);
            }
        }

        if let Some(cache) = cache {
            debug!(
                "{} library digests recomputed, {} served from cache",
                fresh.len(),
                files.len() - fresh.len()
            );
            cache.store(&fresh)?;
            let live: HashSet<PathBuf> = files.into_iter().collect();
            cache.prune(&live)?;
        }

        info!("Digest index ready with {} unique digests", index.len());
        Ok(index)
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.digests.read().contains(digest)
    }

    /// Records a digest; false if it was already known.
    pub fn insert(&self, digest: String) -> bool {
        self.digests.write().insert(digest)
    }

    pub fn len(&self) -> usize {
        self.digests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hashes `path` and checks it against the index.
    pub fn is_duplicate(&self, path: &Path) -> io::Result<DuplicateVerdict> {
        let digest = hash_file(path, self.chunk_size)?;
        Ok(DuplicateVerdict {
            duplicate: self.contains(&digest),
            digest,
        })
    }
}

fn file_stamp(path: &Path) -> io::Result<(u64, i64)> {
    let metadata = fs::metadata(path)?;
    let modified_ms = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();
    Ok((metadata.len(), modified_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_hash_file_matches_known_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        fs::write(&path, b"abc").unwrap();

        // Chunk size smaller than the file exercises the streaming loop.
        assert_eq!(
            hash_file(&path, 2).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_index_detects_library_copies() {
        let library = tempdir().unwrap();
        let nested = library.path().join("originals").join("A");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("one.heic"), b"first photo").unwrap();

        let index = DigestIndex::build(&library.path().join("originals"), 4096, 2, None).unwrap();
        assert_eq!(index.len(), 1);

        let source = tempdir().unwrap();
        let same = source.path().join("copy.heic");
        let different = source.path().join("new.heic");
        fs::write(&same, b"first photo").unwrap();
        fs::write(&different, b"second photo").unwrap();

        assert!(index.is_duplicate(&same).unwrap().duplicate);
        let verdict = index.is_duplicate(&different).unwrap();
        assert!(!verdict.duplicate);

        // Imported during the run, so a second identical source is caught.
        assert!(index.insert(verdict.digest));
        assert!(index.is_duplicate(&different).unwrap().duplicate);
    }

    #[test]
    fn test_missing_library_gives_empty_index() {
        let index =
            DigestIndex::build(Path::new("/definitely/not/a/library"), 4096, 1, None).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_cache_is_filled_and_pruned() {
        let library = tempdir().unwrap();
        let originals = library.path().join("originals");
        fs::create_dir_all(&originals).unwrap();
        fs::write(originals.join("a.jpg"), b"aaa").unwrap();
        fs::write(originals.join("b.jpg"), b"bbb").unwrap();

        let cache = DigestCache::in_memory().unwrap();
        DigestIndex::build(&originals, 4096, 2, Some(&cache)).unwrap();
        assert_eq!(cache.load().unwrap().len(), 2);

        fs::remove_file(originals.join("b.jpg")).unwrap();
        let index = DigestIndex::build(&originals, 4096, 2, Some(&cache)).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(cache.load().unwrap().len(), 1);
    }
}
