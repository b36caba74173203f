//! The Bundle Orchestrator (C7): validates options, drives one build
//! end-to-end, and assembles the final [`WorkflowBundle`].

use crate::{
    cache::{self, DiskCache, MemoryCache},
    entrypoint::{self, EntrypointRequest, ENTRY_SPECIFIER},
    error::{BundleError, ErrorContext, Result},
    graph::{format_chain, DependencyGraph},
    options::{BundleOptions, Mode},
    resolver::{self, ResolverPlugin},
    scanner, shim,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use swc_common::{sync::Lrc, FileName, SourceMap};
use tracing::instrument;

pub const BUNDLER_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SDK_VERSION: &str = "1.0.0";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub created_at: String,
    pub mode: Mode,
    pub entry_hash: String,
    pub bundler_version: String,
    pub sdk_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub externals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowBundle {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_map: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BundleMetadata>,
}

/// Owns the process-wide caches. Cheap to clone (an `Arc` internally would
/// be the natural extension; today one `Bundler` is expected to live for
/// the process lifetime, matching the teacher's single long-lived `Project`).
pub struct Bundler {
    memory_cache: MemoryCache,
    disk_cache: Option<DiskCache>,
}

pub struct BundlerBuilder {
    disk_cache_dir: Option<std::path::PathBuf>,
    max_age: Duration,
    max_size: u64,
}

impl Default for BundlerBuilder {
    fn default() -> Self {
        Self {
            disk_cache_dir: None,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_size: 100 * 1024 * 1024,
        }
    }
}

impl BundlerBuilder {
    pub fn disk_cache_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.disk_cache_dir = Some(dir.into());
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn build(self) -> Bundler {
        Bundler {
            memory_cache: MemoryCache::new(),
            disk_cache: self
                .disk_cache_dir
                .map(|dir| DiskCache::new(dir, self.max_age, self.max_size)),
        }
    }
}

impl Default for Bundler {
    fn default() -> Self {
        BundlerBuilder::default().build()
    }
}

impl Bundler {
    pub fn builder() -> BundlerBuilder {
        BundlerBuilder::default()
    }

    /// The main call: `bundle_workflow_code`. No caching; always rebuilds.
    #[instrument(skip_all, fields(workflows_path = %options.workflows_path.display()))]
    pub fn bundle_workflow_code(&self, options: &BundleOptions) -> Result<WorkflowBundle> {
        build_once(options)
    }

    /// Cache-aware variant: `get_cached_bundle`.
    pub fn get_cached_bundle(
        &self,
        options: &BundleOptions,
        force_rebuild: bool,
        use_content_hash: bool,
    ) -> Result<WorkflowBundle> {
        let option_key = options.option_key();
        let current_file_hash = cache::file_hash(&options.workflows_path, use_content_hash)?;

        if !force_rebuild {
            if let Some(bundle) = self.memory_cache.get(&option_key, &current_file_hash) {
                debug!(workflows_path = %options.workflows_path.display(), "memory cache hit");
                return Ok(bundle);
            }
            let composite = cache::composite_hash(options, &current_file_hash);
            if let Some(disk) = &self.disk_cache {
                if let Some(bundle) = disk.get(&composite) {
                    debug!(workflows_path = %options.workflows_path.display(), "disk cache hit");
                    self.memory_cache.insert(option_key, bundle.clone(), current_file_hash);
                    return Ok(bundle);
                }
            }
        }

        info!(workflows_path = %options.workflows_path.display(), force_rebuild, "building workflow bundle");
        let bundle = build_once(options)?;
        let composite = cache::composite_hash(options, &current_file_hash);
        if let Some(disk) = &self.disk_cache {
            disk.put(&composite, &bundle)?;
        }
        self.memory_cache.insert(option_key, bundle.clone(), current_file_hash);
        Ok(bundle)
    }

    /// `preload_bundles`: warms the cache for each option set in turn.
    pub fn preload_bundles(&self, many: &[BundleOptions]) -> Result<Vec<WorkflowBundle>> {
        many.iter().map(|options| self.get_cached_bundle(options, false, false)).collect()
    }

    pub fn clear_bundle_cache(&self) -> Result<()> {
        self.memory_cache.clear();
        if let Some(disk) = &self.disk_cache {
            disk.clear()?;
        }
        Ok(())
    }

    pub fn get_bundle_cache_stats(&self) -> cache::CacheStats {
        self.disk_cache.as_ref().map(DiskCache::stats).unwrap_or_default()
    }

    /// `verify_deterministic_build`: runs the real pipeline against `options`
    /// `requested_builds` times and reports whether every run agrees.
    pub fn verify_determinism(
        &self,
        options: &BundleOptions,
        requested_builds: u32,
    ) -> Result<crate::verify::DeterminismReport> {
        crate::verify::verify_deterministic_build(options, requested_builds, || {
            Ok(build_once(options)?.code)
        })
    }

    /// `load_bundle`: reads a previously-written bundle artifact off disk,
    /// optionally validating its shape and checking its SDK version.
    pub fn load_bundle(&self, request: LoadBundleRequest) -> Result<LoadBundleResult> {
        load_bundle(request)
    }
}

/// Request for [`Bundler::load_bundle`] / the free function [`load_bundle`].
#[derive(Clone, Debug)]
pub struct LoadBundleRequest {
    pub path: std::path::PathBuf,
    pub source_map_path: Option<std::path::PathBuf>,
    pub validate: bool,
    pub expected_sdk_version: Option<String>,
}

impl LoadBundleRequest {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into(), source_map_path: None, validate: false, expected_sdk_version: None }
    }

    pub fn source_map_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.source_map_path = Some(path.into());
        self
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn expected_sdk_version(mut self, version: impl Into<String>) -> Self {
        self.expected_sdk_version = Some(version.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct LoadBundleResult {
    pub bundle: WorkflowBundle,
    #[allow(clippy::struct_field_names)]
    pub warnings: Vec<String>,
    pub path: std::path::PathBuf,
}

/// Reads the artifact at `request.path` (the same JSON [`WorkflowBundle`]
/// written by a prior build), optionally re-validating its shim contract and
/// comparing its recorded SDK version against the caller's expectation.
pub fn load_bundle(request: LoadBundleRequest) -> Result<LoadBundleResult> {
    let raw = std::fs::read_to_string(&request.path)
        .map_err(|e| crate::error::BundleIoError::new(e, &request.path))?;
    let mut bundle: WorkflowBundle = serde_json::from_str(&raw)?;

    if let Some(source_map_path) = &request.source_map_path {
        let source_map = std::fs::read_to_string(source_map_path)
            .map_err(|e| crate::error::BundleIoError::new(e, source_map_path))?;
        bundle.source_map = Some(source_map);
    }

    let mut warnings = Vec::new();

    if request.validate {
        shim::validate(&bundle.code)?;
    }

    if let Some(expected) = &request.expected_sdk_version {
        let actual = bundle.metadata.as_ref().map(|m| m.sdk_version.as_str()).unwrap_or_default();
        if actual != expected {
            warnings.push(format!(
                "bundle was built against sdk_version '{actual}', expected '{expected}'"
            ));
        }
    }

    Ok(LoadBundleResult { bundle, warnings, path: request.path })
}

struct TempDirGuard(std::path::PathBuf);

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Runs the full pipeline once (§4.7), uncached.
fn build_once(options: &BundleOptions) -> Result<WorkflowBundle> {
    options.validate()?;

    if !options.workflows_path.exists() {
        return Err(BundleError::entrypoint_not_found(options.workflows_path.display().to_string()));
    }

    let workflow_source = std::fs::read_to_string(&options.workflows_path)
        .map_err(|e| crate::error::BundleIoError::new(e, &options.workflows_path))?;

    // Caught here rather than left to the underlying bundler: a dynamic
    // `import()` target is often unresolvable (it's dynamic), which would
    // otherwise surface as an opaque resolution failure instead of the
    // precise, file/line-located error this deserves.
    let dynamic_hits = resolver::scan::find_dynamic_imports(&workflow_source);
    if !dynamic_hits.is_empty() {
        let sites = dynamic_hits
            .iter()
            .map(|h| crate::error::SourceSite {
                file: options.workflows_path.clone(),
                line: h.line,
                column: h.column,
            })
            .collect();
        return Err(BundleError::DynamicImport { ctx: ErrorContext::default().with_sites(sites) });
    }

    let mut warnings = Vec::new();
    let violations = scanner::scan(&options.workflows_path, &workflow_source);
    for v in &violations {
        if v.severity == scanner::Severity::Error && options.strict {
            return Err(BundleError::BuildFailed {
                ctx: ErrorContext::default()
                    .with_details(v.format())
                    .with_details(format!("violations: {}", violations.len())),
            });
        }
        warnings.push(v.format());
    }

    let request = EntrypointRequest {
        workflows_path: options.workflows_path.clone(),
        interceptor_modules: options.interceptor_modules.clone(),
        payload_converter_path: options.payload_converter_path.clone(),
        failure_converter_path: options.failure_converter_path.clone(),
    };
    let entry_source = entrypoint::generate_bootstrap_source(&request);
    let entry_hash = request.entry_hash();

    // The underlying bundler loads every resolved file straight off disk
    // (see `ResolverPlugin::load_source`), so the synthetic entry needs a
    // real temporary file rather than a virtual namespace.
    let entry_dir = std::env::temp_dir().join(format!("workflow-bundle-entry-{entry_hash}"));
    std::fs::create_dir_all(&entry_dir).map_err(|e| crate::error::BundleIoError::new(e, &entry_dir))?;
    let entry_path = entry_dir.join(ENTRY_SPECIFIER);
    std::fs::write(&entry_path, &entry_source)
        .map_err(|e| crate::error::BundleIoError::new(e, &entry_path))?;
    let _entry_dir_guard = TempDirGuard(entry_dir);

    let cm: Lrc<SourceMap> = Default::default();
    let plugin = ResolverPlugin::new(Arc::new(options.clone()), cm.clone())?;

    let (pre_shim, source_map) = crate::backend::bundle_to_source(
        ENTRY_SPECIFIER,
        FileName::Real(entry_path),
        plugin.clone(),
        cm,
        options.tree_shake,
        options.source_map,
    )?;
    plugin.on_end();

    let state = plugin.state.snapshot();

    if !state.dynamic_imports.is_empty() {
        resolver::finalize(&state, Default::default())?;
    }

    if !state.forbidden_direct.is_empty() {
        let graph = DependencyGraph::from_edges(&state.edges);
        let entry = graph.discover_entrypoint(ENTRY_SPECIFIER);
        let mut chains = std::collections::HashMap::new();
        for module in state.forbidden_direct.keys() {
            if let Some(path) = graph.shortest_path(&entry, module) {
                chains.insert(module.clone(), format_chain(&path));
            }
        }
        resolver::finalize(&state, chains)?;
    }

    for specifier in state.forbidden_transitive.keys() {
        warn!(specifier, "forbidden module used transitively through a dependency");
        warnings.push(format!("'{specifier}' is used transitively through a dependency"));
    }

    for hit in &state.alternate_runtime_hits {
        warn!(
            file = %hit.file.display(),
            api = %hit.api,
            "alternate-runtime API used in a build not targeting that runtime"
        );
        warnings.push(format!(
            "{}:{}:{}: '{}' is an alternate-runtime API not available to this build's flavor",
            hit.file.display(),
            hit.line,
            hit.column,
            hit.api
        ));
    }

    let shimmed = shim::apply(&pre_shim);
    shim::validate(&shimmed)?;

    let metadata = BundleMetadata {
        created_at: crate::utils::iso_now(),
        mode: options.mode,
        entry_hash,
        bundler_version: BUNDLER_VERSION.to_string(),
        sdk_version: SDK_VERSION.to_string(),
        externals: vec![],
        warnings,
    };

    Ok(WorkflowBundle { code: shimmed, source_map, metadata: Some(metadata) })
}
