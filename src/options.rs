//! `BundleOptions`: the request that drives one build. Validated once by the
//! Orchestrator (C7) before any work starts.

use crate::{
    error::{BundleError, Result},
    importmap::{ImportMap, InputFlavor},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    Production,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMapMode {
    Inline,
    External,
    None,
}

/// Cache-layer knobs (C8); split out so [`BundleOptions`] itself stays a flat
/// serde surface matching the wire contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheOptions {
    pub cache_dir: PathBuf,
    /// Entries older than this are evicted on access. Default 7 days.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Total on-disk budget before oldest-first eviction kicks in. Default 100 MB.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

const fn default_max_age_secs() -> u64 {
    7 * 24 * 60 * 60
}

const fn default_max_size_bytes() -> u64 {
    100 * 1024 * 1024
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleOptions {
    pub workflows_path: PathBuf,
    #[serde(default)]
    pub interceptor_modules: Vec<String>,
    #[serde(default)]
    pub payload_converter_path: Option<PathBuf>,
    #[serde(default)]
    pub failure_converter_path: Option<PathBuf>,
    #[serde(default)]
    pub ignore_modules: Vec<String>,
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default = "default_source_map")]
    pub source_map: SourceMapMode,
    #[serde(default = "default_tree_shake")]
    pub tree_shake: bool,
    #[serde(default)]
    pub extra_bundler_options: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub input_flavor: InputFlavor,
    #[serde(default)]
    pub import_map_path: Option<PathBuf>,
    #[serde(default)]
    pub tsconfig_path: Option<PathBuf>,
    #[serde(default)]
    pub allow_url_imports: bool,
    #[serde(default)]
    pub require_pinned_urls: bool,
    #[serde(default = "default_url_cache_dir")]
    pub url_cache_dir: PathBuf,
    #[serde(default)]
    pub cache: Option<CacheOptions>,
    /// Non-forbidden-but-replay-unsafe findings escalate to a fatal error
    /// instead of accumulating in `metadata.warnings`.
    #[serde(default)]
    pub strict: bool,
}

const fn default_mode() -> Mode {
    Mode::Development
}

const fn default_source_map() -> SourceMapMode {
    SourceMapMode::Inline
}

const fn default_tree_shake() -> bool {
    true
}

fn default_url_cache_dir() -> PathBuf {
    std::env::temp_dir().join("workflow-bundler-url-cache")
}

impl Default for InputFlavor {
    fn default() -> Self {
        Self::Auto
    }
}

impl BundleOptions {
    pub fn builder(workflows_path: impl Into<PathBuf>) -> BundleOptionsBuilder {
        BundleOptionsBuilder::new(workflows_path)
    }

    /// Enforces the orchestrator's non-negotiable invariants. A contradicting
    /// user override fails fast with `CONFIG_INVALID` rather than silently
    /// winning or silently being dropped.
    pub fn validate(&self) -> Result<()> {
        if self.require_pinned_urls && !self.allow_url_imports {
            return Err(BundleError::config_invalid(
                "require_pinned_urls cannot be set while allow_url_imports is false",
            ));
        }

        if self.mode == Mode::Production && !self.tree_shake {
            return Err(BundleError::config_invalid(
                "tree_shake cannot be disabled in production mode",
            ));
        }

        if self.import_map_path.is_some() && self.input_flavor == InputFlavor::Node {
            return Err(BundleError::config_invalid(
                "import_map_path requires input_flavor deno, bun, or auto",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for module in &self.ignore_modules {
            if !seen.insert(module) {
                return Err(BundleError::config_invalid(format!(
                    "ignore_modules contains a duplicate entry: {module}"
                )));
            }
        }

        Ok(())
    }

    /// Parses the configured import map, if any, anchored at the workflows
    /// file's parent directory.
    pub fn load_import_map(&self) -> Result<Option<ImportMap>> {
        let Some(path) = &self.import_map_path else { return Ok(None) };
        let base_dir = self.workflows_path.parent().unwrap_or_else(|| Path::new("."));
        let source = std::fs::read_to_string(path)
            .map_err(|e| crate::error::BundleIoError::new(e, path))?;
        Ok(Some(ImportMap::parse(&source, base_dir)?))
    }

    /// A stable, delimiter-safe serialization of every option that affects
    /// build output, used as half of the cache's composite hash.
    pub fn option_key(&self) -> String {
        let mut ignore_modules = self.ignore_modules.clone();
        ignore_modules.sort();
        let mut interceptor_modules = self.interceptor_modules.clone();
        interceptor_modules.sort();

        let parts = [
            format!("mode={:?}", self.mode),
            format!("source_map={:?}", self.source_map),
            format!("tree_shake={}", self.tree_shake),
            format!("ignore_modules={}", ignore_modules.join(",")),
            format!("interceptor_modules={}", interceptor_modules.join(",")),
            format!(
                "payload_converter_path={}",
                self.payload_converter_path.as_ref().map_or(String::new(), |p| p.display().to_string())
            ),
            format!(
                "failure_converter_path={}",
                self.failure_converter_path.as_ref().map_or(String::new(), |p| p.display().to_string())
            ),
        ];
        parts.join("|")
    }
}

/// Builder mirroring the teacher's `ProjectBuilder`: construct incrementally,
/// `build()` validates once at the end.
#[derive(Default)]
pub struct BundleOptionsBuilder {
    workflows_path: PathBuf,
    interceptor_modules: Vec<String>,
    payload_converter_path: Option<PathBuf>,
    failure_converter_path: Option<PathBuf>,
    ignore_modules: Vec<String>,
    mode: Option<Mode>,
    source_map: Option<SourceMapMode>,
    tree_shake: Option<bool>,
    extra_bundler_options: HashMap<String, serde_json::Value>,
    input_flavor: InputFlavor,
    import_map_path: Option<PathBuf>,
    tsconfig_path: Option<PathBuf>,
    allow_url_imports: bool,
    require_pinned_urls: bool,
    url_cache_dir: Option<PathBuf>,
    cache: Option<CacheOptions>,
    strict: bool,
}

impl BundleOptionsBuilder {
    pub fn new(workflows_path: impl Into<PathBuf>) -> Self {
        Self { workflows_path: workflows_path.into(), ..Default::default() }
    }

    pub fn interceptor_modules(mut self, modules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.interceptor_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn payload_converter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.payload_converter_path = Some(path.into());
        self
    }

    pub fn failure_converter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.failure_converter_path = Some(path.into());
        self
    }

    pub fn ignore_modules(mut self, modules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignore_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn source_map(mut self, mode: SourceMapMode) -> Self {
        self.source_map = Some(mode);
        self
    }

    pub fn tree_shake(mut self, enabled: bool) -> Self {
        self.tree_shake = Some(enabled);
        self
    }

    pub fn input_flavor(mut self, flavor: InputFlavor) -> Self {
        self.input_flavor = flavor;
        self
    }

    pub fn import_map_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.import_map_path = Some(path.into());
        self
    }

    pub fn tsconfig_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tsconfig_path = Some(path.into());
        self
    }

    pub fn allow_url_imports(mut self, allow: bool) -> Self {
        self.allow_url_imports = allow;
        self
    }

    pub fn require_pinned_urls(mut self, require: bool) -> Self {
        self.require_pinned_urls = require;
        self
    }

    pub fn url_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.url_cache_dir = Some(dir.into());
        self
    }

    pub fn cache(mut self, cache: CacheOptions) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn build(self) -> Result<BundleOptions> {
        let options = BundleOptions {
            workflows_path: self.workflows_path,
            interceptor_modules: self.interceptor_modules,
            payload_converter_path: self.payload_converter_path,
            failure_converter_path: self.failure_converter_path,
            ignore_modules: self.ignore_modules,
            mode: self.mode.unwrap_or_else(default_mode),
            source_map: self.source_map.unwrap_or_else(default_source_map),
            tree_shake: self.tree_shake.unwrap_or_else(default_tree_shake),
            extra_bundler_options: self.extra_bundler_options,
            input_flavor: self.input_flavor,
            import_map_path: self.import_map_path,
            tsconfig_path: self.tsconfig_path,
            allow_url_imports: self.allow_url_imports,
            require_pinned_urls: self.require_pinned_urls,
            url_cache_dir: self.url_cache_dir.unwrap_or_else(default_url_cache_dir),
            cache: self.cache,
            strict: self.strict,
        };
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_build_succeeds() {
        let opts = BundleOptions::builder("workflows.ts").build().unwrap();
        assert_eq!(opts.mode, Mode::Development);
        assert!(opts.tree_shake);
    }

    #[test]
    fn pinned_urls_without_allow_url_imports_rejected() {
        let err = BundleOptions::builder("workflows.ts")
            .require_pinned_urls(true)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn disabling_tree_shake_in_production_rejected() {
        let err = BundleOptions::builder("workflows.ts")
            .mode(Mode::Production)
            .tree_shake(false)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn import_map_requires_non_node_flavor() {
        let err = BundleOptions::builder("workflows.ts")
            .import_map_path("import_map.json")
            .input_flavor(InputFlavor::Node)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn duplicate_ignore_modules_rejected() {
        let err = BundleOptions::builder("workflows.ts")
            .ignore_modules(["fs", "fs"])
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn option_key_is_stable_under_reordering() {
        let a = BundleOptions::builder("workflows.ts").ignore_modules(["b", "a"]).build().unwrap();
        let b = BundleOptions::builder("workflows.ts").ignore_modules(["a", "b"]).build().unwrap();
        assert_eq!(a.option_key(), b.option_key());
    }
}
