//! Small filesystem and hashing helpers shared across the cache and
//! orchestrator.

use crate::error::{BundleIoError, Result};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Creates the parent directory of `file`, if any.
pub fn create_parent_dir_all(file: impl AsRef<Path>) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BundleIoError::new(e, parent))?;
    }
    Ok(())
}

pub fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| BundleIoError::new(e, path))?;
    Ok(serde_json::from_str(&content)?)
}

pub fn write_json_file<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    create_parent_dir_all(path)?;
    let content = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, content).map_err(|e| BundleIoError::new(e, path))?;
    Ok(())
}

pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Hashes `(relative_path, content_bytes)` for every regular file under
/// `root` whose extension is one of `extensions`, walked in sorted order so
/// the result is stable across platforms and directory-iteration order.
pub fn hash_tree(root: &Path, extensions: &[&str]) -> Result<String> {
    let mut files = Vec::new();
    collect_files(root, root, extensions, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for (relative, absolute) in &files {
        let bytes = std::fs::read(absolute).map_err(|e| BundleIoError::new(e, absolute))?;
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_files(
    root: &Path,
    dir: &Path,
    extensions: &[&str],
    out: &mut Vec<(PathBuf, PathBuf)>,
) -> Result<()> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Ok(()) };
    for entry in entries {
        let entry = entry.map_err(|e| BundleIoError::new(e, dir))?;
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().and_then(|n| n.to_str()) == Some("node_modules") {
                continue;
            }
            collect_files(root, &path, extensions, out)?;
        } else if extensions.iter().any(|ext| path.extension().and_then(|e| e.to_str()) == Some(ext))
        {
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            out.push((relative, path));
        }
    }
    Ok(())
}

/// RFC 3339 / ISO-8601 timestamp for `SystemTime::now()`.
pub fn iso_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn iso_from_system_time(time: std::time::SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(sha256_hex(b"hello"), sha256_hex(b"hello"));
        assert_ne!(sha256_hex(b"hello"), sha256_hex(b"world"));
    }

    #[test]
    fn hash_tree_is_order_independent_of_os_readdir() {
        let dir = std::env::temp_dir().join(format!("wb-hash-tree-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("a.ts"), "a").unwrap();
        std::fs::write(dir.join("sub").join("b.ts"), "b").unwrap();
        let h1 = hash_tree(&dir, &["ts"]).unwrap();
        let h2 = hash_tree(&dir, &["ts"]).unwrap();
        assert_eq!(h1, h2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_write_json_roundtrips() {
        let path = std::env::temp_dir().join(format!("wb-utils-{}.json", std::process::id()));
        write_json_file(&vec![1, 2, 3], &path).unwrap();
        let value: Vec<i32> = read_json_file(&path).unwrap();
        assert_eq!(value, vec![1, 2, 3]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn iso_now_is_rfc3339_like() {
        let s = iso_now();
        assert!(s.contains('T'));
    }
}
