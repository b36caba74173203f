//! URL-import fetch and on-disk cache (C4), shared with the on-disk bundle
//! cache's atomic-create-then-verify pattern (C8).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UrlCacheMeta {
    pub url: String,
    pub local_path: PathBuf,
    pub integrity: String,
    pub fetched_at: String,
    pub content_type: Option<String>,
}

fn safe_path_component(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// `cache_key = hostname + safe(path) + first 16 hex of SHA-256(url)`.
pub fn cache_key(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or("unknown-host");
    let safe = safe_path_component(url.path());
    let digest = hex::encode(Sha256::digest(url.as_str().as_bytes()));
    format!("{host}{safe}{}", &digest[..16])
}

pub struct UrlImportCache {
    dir: PathBuf,
}

impl UrlImportCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn content_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.meta.json"))
    }

    /// Returns cached content for `url` if present and its integrity checks
    /// out against the stored metadata.
    pub fn get(&self, url: &url::Url) -> Option<Vec<u8>> {
        let key = cache_key(url);
        let content = std::fs::read(self.content_path(&key)).ok()?;
        let meta_raw = std::fs::read_to_string(self.meta_path(&key)).ok()?;
        let meta: UrlCacheMeta = serde_json::from_str(&meta_raw).ok()?;
        let actual = hex::encode(Sha256::digest(&content));
        (actual == meta.integrity).then_some(content)
    }

    /// Persists fetched `content` for `url` plus its metadata file.
    pub fn put(
        &self,
        url: &url::Url,
        content: &[u8],
        content_type: Option<String>,
        fetched_at: String,
    ) -> crate::error::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| crate::error::BundleIoError::new(e, &self.dir))?;
        let key = cache_key(url);
        let content_path = self.content_path(&key);
        std::fs::write(&content_path, content)
            .map_err(|e| crate::error::BundleIoError::new(e, &content_path))?;
        let meta = UrlCacheMeta {
            url: url.to_string(),
            local_path: content_path.clone(),
            integrity: hex::encode(Sha256::digest(content)),
            fetched_at,
            content_type,
        };
        let meta_path = self.meta_path(&key);
        std::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?)
            .map_err(|e| crate::error::BundleIoError::new(e, &meta_path))?;
        Ok(())
    }
}

/// Chooses a loader (by file extension) for a fetched URL import, falling
/// back to sniffing the content-type for a handful of known keywords.
pub fn loader_for(url: &url::Url, content_type: Option<&str>) -> &'static str {
    let path = url.path();
    for (ext, loader) in [(".ts", "ts"), (".tsx", "tsx"), (".jsx", "jsx"), (".mjs", "js"), (".js", "js"), (".json", "json")] {
        if path.ends_with(ext) {
            return loader;
        }
    }
    if let Some(ct) = content_type {
        if ct.contains("typescript") {
            return "ts";
        }
        if ct.contains("json") {
            return "json";
        }
    }
    "js"
}

/// A path segment pins a version either as `vX.Y...` or as a deno-style
/// `name@X.Y...` suffix.
pub fn is_pinned(url: &url::Url) -> bool {
    let path = url.path();
    path.split('/').any(|seg| {
        if let Some((_, version)) = seg.split_once('@') {
            return version.chars().next().is_some_and(|c| c.is_ascii_digit());
        }
        seg.starts_with('v') && seg[1..].chars().next().is_some_and(|c| c.is_ascii_digit())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_by_extension() {
        let u = url::Url::parse("https://deno.land/x/foo/mod.ts").unwrap();
        assert_eq!(loader_for(&u, None), "ts");
    }

    #[test]
    fn loader_by_content_type_fallback() {
        let u = url::Url::parse("https://deno.land/x/foo/mod").unwrap();
        assert_eq!(loader_for(&u, Some("application/typescript")), "ts");
    }

    #[test]
    fn pinned_url_with_version_segment() {
        let u = url::Url::parse("https://deno.land/x/foo@1.2.3/mod.ts").unwrap();
        assert!(is_pinned(&u));
        let u2 = url::Url::parse("https://deno.land/x/foo/mod.ts").unwrap();
        assert!(!is_pinned(&u2));
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = std::env::temp_dir().join(format!("wb-url-cache-{}", std::process::id()));
        let cache = UrlImportCache::new(&dir);
        let u = url::Url::parse("https://example.com/a/b.ts").unwrap();
        cache.put(&u, b"hello", None, "2024-01-01T00:00:00Z".into()).unwrap();
        assert_eq!(cache.get(&u), Some(b"hello".to_vec()));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn torn_write_detected_via_integrity_mismatch() {
        let dir = std::env::temp_dir().join(format!("wb-url-cache-torn-{}", std::process::id()));
        let cache = UrlImportCache::new(&dir);
        let u = url::Url::parse("https://example.com/a/b.ts").unwrap();
        cache.put(&u, b"hello", None, "2024-01-01T00:00:00Z".into()).unwrap();
        std::fs::write(cache.content_path(&cache_key(&u)), b"corrupted").unwrap();
        assert_eq!(cache.get(&u), None);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
