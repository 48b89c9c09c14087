//! Persistent digests of library originals
//!
//! This module provides functionality for:
//! 1. Remembering the SHA-256 of each library original by path, size and mtime
//! 2. Letting the digest index skip re-hashing files that have not changed
//! 3. Pruning rows for files that are no longer in the library

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::importer::duplicates::DigestResult;

/// Size and modification stamp a cached digest was computed for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDigest {
    pub size: u64,
    pub modified_ms: i64,
    pub sha256: String,
}

/// One row to upsert
#[derive(Debug, Clone)]
pub struct DigestRecord {
    pub path: PathBuf,
    pub size: u64,
    pub modified_ms: i64,
    pub sha256: String,
}

pub struct DigestCache {
    conn: Mutex<Connection>,
}

impl DigestCache {
    /// Opens (creating if needed) the cache database.
    pub fn open(path: &Path) -> DigestResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        debug!("Opened digest cache at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Cache that lives only as long as the process.
    #[cfg(test)]
    pub fn in_memory() -> DigestResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS library_digests (
                path TEXT PRIMARY KEY,
                size INTEGER NOT NULL,
                modified INTEGER NOT NULL,
                sha256 TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_library_digests_sha256 ON library_digests(sha256)",
            [],
        )?;
        Ok(())
    }

    /// Every cached row keyed by path.
    pub fn load(&self) -> DigestResult<HashMap<PathBuf, CachedDigest>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path, size, modified, sha256 FROM library_digests")?;
        let rows = stmt.query_map([], |row| {
            let path: String = row.get(0)?;
            let size: i64 = row.get(1)?;
            Ok((
                PathBuf::from(path),
                CachedDigest {
                    size: size as u64,
                    modified_ms: row.get(2)?,
                    sha256: row.get(3)?,
                },
            ))
        })?;

        let mut cached = HashMap::new();
        for row in rows {
            let (path, digest) = row?;
            cached.insert(path, digest);
        }
        Ok(cached)
    }

    /// Inserts or replaces rows in one transaction.
    pub fn store(&self, records: &[DigestRecord]) -> DigestResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO library_digests (path, size, modified, sha256)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.path.to_string_lossy(),
                    record.size as i64,
                    record.modified_ms,
                    record.sha256,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes rows whose path is not in `live`; returns how many went.
    pub fn prune(&self, live: &HashSet<PathBuf>) -> DigestResult<usize> {
        let stale: Vec<PathBuf> = self
            .load()?
            .into_keys()
            .filter(|path| !live.contains(path))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM library_digests WHERE path = ?1")?;
            for path in &stale {
                stmt.execute(params![path.to_string_lossy()])?;
            }
        }
        tx.commit()?;

        info!("Pruned {} stale digest cache rows", stale.len());
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(path: &str, sha: &str) -> DigestRecord {
        DigestRecord {
            path: PathBuf::from(path),
            size: 10,
            modified_ms: 1_700_000_000_000,
            sha256: sha.to_string(),
        }
    }

    #[test]
    fn test_store_and_load() {
        let cache = DigestCache::in_memory().unwrap();
        cache.store(&[record("/lib/a.heic", "aa"), record("/lib/b.heic", "bb")]).unwrap();
        // Upsert replaces the digest for an existing path.
        cache.store(&[record("/lib/a.heic", "cc")]).unwrap();

        let loaded = cache.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[&PathBuf::from("/lib/a.heic")].sha256, "cc");
        assert_eq!(loaded[&PathBuf::from("/lib/b.heic")].size, 10);
    }

    #[test]
    fn test_prune_removes_vanished_paths() {
        let cache = DigestCache::in_memory().unwrap();
        cache.store(&[record("/lib/a.heic", "aa"), record("/lib/b.heic", "bb")]).unwrap();

        let live = HashSet::from([PathBuf::from("/lib/a.heic")]);
        assert_eq!(cache.prune(&live).unwrap(), 1);
        assert_eq!(cache.prune(&live).unwrap(), 0);
        assert!(cache.load().unwrap().contains_key(&PathBuf::from("/lib/a.heic")));
    }

    #[test]
    fn test_file_cache_persists() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("cache").join("digests.sqlite");

        DigestCache::open(&db).unwrap().store(&[record("/lib/a.heic", "aa")]).unwrap();
        let reopened = DigestCache::open(&db).unwrap();
        assert_eq!(reopened.load().unwrap().len(), 1);
    }
}
