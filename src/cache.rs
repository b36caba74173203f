//! The Cache Layer (C8): an in-memory cache keyed by `option_key`, backed by
//! an on-disk cache keyed by the full composite hash.

use crate::{
    error::{BundleIoError, Result},
    options::BundleOptions,
    utils, BundleMetadata, WorkflowBundle,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
    time::{Duration, SystemTime},
};

const DEFAULT_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// `H = SHA-256(option_key || file_hash)`.
pub fn composite_hash(options: &BundleOptions, file_hash: &str) -> String {
    utils::sha256_hex(format!("{}{}", options.option_key(), file_hash).as_bytes())
}

/// The fast-path file identity: entrypoint modtime + size. Falls back to the
/// content hash of every matching source file when the caller asks for it
/// (`use_content_hash`).
pub fn file_hash(workflows_path: &Path, use_content_hash: bool) -> Result<String> {
    if use_content_hash {
        let root = workflows_path.parent().unwrap_or_else(|| Path::new("."));
        return utils::hash_tree(root, DEFAULT_EXTENSIONS);
    }

    let meta = std::fs::metadata(workflows_path)
        .map_err(|e| BundleIoError::new(e, workflows_path))?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(format!("{}:{}", modified, meta.len()))
}

struct MemoryEntry {
    bundle: WorkflowBundle,
    file_hash: String,
    #[allow(dead_code)]
    timestamp: SystemTime,
}

/// Process-wide in-memory cache keyed by `option_key`. See §5: reads never
/// block a writer on another key; writes to the same key race the last
/// writer wins.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached bundle if present and its stored `file_hash`
    /// matches `current_file_hash`.
    pub fn get(&self, option_key: &str, current_file_hash: &str) -> Option<WorkflowBundle> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(option_key)?;
        (entry.file_hash == current_file_hash).then(|| entry.bundle.clone())
    }

    pub fn insert(&self, option_key: String, bundle: WorkflowBundle, file_hash: String) {
        self.entries
            .write()
            .unwrap()
            .insert(option_key, MemoryEntry { bundle, file_hash, timestamp: SystemTime::now() });
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct OnDiskEntry {
    bundle_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_map: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<BundleMetadata>,
    composite_hash: String,
    created_at: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheStatsEntry {
    pub key: String,
    pub bytes: u64,
    pub created_at: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CacheStats {
    pub count: usize,
    pub size: u64,
    pub entries: Vec<CacheStatsEntry>,
}

/// The on-disk, cross-process cache (§4.8). Every read/write goes through a
/// single file per `composite_hash`; writes are atomic creations so a
/// concurrent eviction racing a read only ever produces a clean miss.
pub struct DiskCache {
    dir: PathBuf,
    max_age: Duration,
    max_size: u64,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration, max_size: u64) -> Self {
        Self { dir: dir.into(), max_age, max_size }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Reads the entry for `composite_hash`. An expired entry is deleted and
    /// treated as a miss.
    pub fn get(&self, composite_hash: &str) -> Option<WorkflowBundle> {
        let path = self.entry_path(composite_hash);
        let entry: OnDiskEntry = utils::read_json_file(&path).ok()?;

        let meta = std::fs::metadata(&path).ok()?;
        let age = meta.modified().ok()?.elapsed().unwrap_or_default();
        if age > self.max_age {
            let _ = std::fs::remove_file(&path);
            return None;
        }

        Some(WorkflowBundle {
            code: entry.bundle_code,
            source_map: entry.source_map,
            metadata: entry.metadata,
        })
    }

    /// Writes `bundle` under `composite_hash`, then evicts oldest-first
    /// until the directory is back under `max_size`.
    pub fn put(&self, composite_hash: &str, bundle: &WorkflowBundle) -> Result<()> {
        let entry = OnDiskEntry {
            bundle_code: bundle.code.clone(),
            source_map: bundle.source_map.clone(),
            metadata: bundle.metadata.clone(),
            composite_hash: composite_hash.to_string(),
            created_at: utils::iso_now(),
        };
        utils::write_json_file(&entry, self.entry_path(composite_hash))?;
        self.evict_to_budget()
    }

    /// Evicts oldest-first until under budget. The most recently written
    /// entry is never evicted, even if it alone exceeds `max_size`, so a
    /// single oversized bundle doesn't make the cache unusable.
    fn evict_to_budget(&self) -> Result<()> {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else { return Ok(()) };
        let mut files: Vec<(PathBuf, SystemTime, u64)> = read_dir
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                Some((e.path(), meta.modified().ok()?, meta.len()))
            })
            .collect();
        files.sort_by_key(|(_, modified, _)| *modified);

        let mut total: u64 = files.iter().map(|(_, _, len)| len).sum();
        let evictable = files.len().saturating_sub(1);
        for (path, _, len) in &files[..evictable] {
            if total <= self.max_size {
                break;
            }
            if std::fs::remove_file(path).is_ok() {
                total = total.saturating_sub(*len);
            }
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else { return Ok(()) };
        for entry in read_dir.filter_map(|e| e.ok()) {
            let _ = std::fs::remove_file(entry.path());
        }
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else { return CacheStats::default() };
        let mut stats = CacheStats::default();
        for entry in read_dir.filter_map(|e| e.ok()) {
            let Ok(meta) = entry.metadata() else { continue };
            let key = entry
                .path()
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let created_at = meta
                .modified()
                .ok()
                .map(utils::iso_from_system_time)
                .unwrap_or_default();
            stats.count += 1;
            stats.size += meta.len();
            stats.entries.push(CacheStatsEntry { key, bytes: meta.len(), created_at });
        }
        stats
    }
}
