//! The Resolver Plugin (C3): attaches to the underlying bundler's
//! resolve/load hooks, classifies every import, and collects [`PluginState`]
//! for the Orchestrator (C7) to act on once the build completes.
//!
//! Also carries the Cross-Runtime Resolver (C4): import-map rewriting,
//! `npm:`/URL specifier handling, and the forbidden-runtime-API text scan.

pub mod scan;
pub mod url_cache;

use crate::{
    error::{BundleError, ErrorContext, Result},
    importmap::{detect_flavor, ImportMap, InputFlavor, Target},
    options::BundleOptions,
    policy::{self, Classification},
};
use anyhow::Error as AnyError;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use swc_bundler::{Load, ModuleData};
use swc_common::{sync::Lrc, FileName, SourceMap};
use swc_ecma_loader::resolve::{Resolution, Resolve};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};

/// A call-site of a dynamic `import()` found in non-`node_modules` source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicImportHit {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

/// Mutable state accumulated during one build. Scoped to that build; never
/// shared across builds or reused.
#[derive(Default)]
pub struct PluginStateData {
    pub forbidden_direct: HashMap<String, PathBuf>,
    pub forbidden_transitive: HashMap<String, PathBuf>,
    pub dynamic_imports: Vec<DynamicImportHit>,
    /// Forward import edges as discovered by the resolver, keyed by the
    /// importer's display path (real or virtual-namespace); feeds the
    /// Dependency-Chain Analyzer (C6).
    pub edges: HashMap<String, Vec<String>>,
    /// Alternate-runtime global calls (`Deno.*`/`Bun.*`) found in source that
    /// doesn't match the build's chosen flavor.
    pub alternate_runtime_hits: Vec<AlternateRuntimeHit>,
}

/// A module-call site belonging to a runtime other than the build's chosen
/// flavor, with the file it was found in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlternateRuntimeHit {
    pub file: PathBuf,
    pub api: String,
    pub line: usize,
    pub column: usize,
}

pub struct PluginState {
    data: Mutex<PluginStateData>,
}

impl Default for PluginState {
    fn default() -> Self {
        Self { data: Mutex::new(PluginStateData::default()) }
    }
}

impl PluginState {
    pub fn snapshot(&self) -> PluginStateData {
        let data = self.data.lock().unwrap();
        PluginStateData {
            forbidden_direct: data.forbidden_direct.clone(),
            forbidden_transitive: data.forbidden_transitive.clone(),
            dynamic_imports: data.dynamic_imports.clone(),
            edges: data.edges.clone(),
            alternate_runtime_hits: data.alternate_runtime_hits.clone(),
        }
    }
}

/// The virtual namespace a specifier was assigned to, encoded into
/// [`FileName::Custom`] as `"<namespace>:<name>"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Namespace {
    Ignored,
    Forbidden,
    TypeOnly,
    Converter,
    UrlImport,
    /// A runtime peer entry point (worker interface, global overrides)
    /// stubbed in-process when no real peer install is on disk.
    Runtime,
}

impl Namespace {
    const fn tag(self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Forbidden => "forbidden",
            Self::TypeOnly => "type-only",
            Self::Converter => "converter",
            Self::UrlImport => "url-import",
            Self::Runtime => "runtime",
        }
    }

    pub fn encode(self, name: &str) -> String {
        format!("{}:{name}", self.tag())
    }

    pub fn parse(custom: &str) -> Option<(Self, &str)> {
        let (tag, rest) = custom.split_once(':')?;
        let ns = match tag {
            "ignored" => Self::Ignored,
            "forbidden" => Self::Forbidden,
            "type-only" => Self::TypeOnly,
            "converter" => Self::Converter,
            "url-import" => Self::UrlImport,
            "runtime" => Self::Runtime,
            _ => return None,
        };
        Some((ns, rest))
    }
}

fn importer_path(base: &FileName) -> PathBuf {
    match base {
        FileName::Real(p) => p.clone(),
        FileName::Custom(s) => PathBuf::from(s),
        other => PathBuf::from(other.to_string()),
    }
}

fn is_under_node_modules(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "node_modules")
}

/// The Resolver Plugin. Implements both [`Resolve`] and [`Load`] for the
/// underlying bundler; cloning shares the same [`PluginState`] and caches
/// via `Arc`.
#[derive(Clone)]
pub struct ResolverPlugin {
    pub options: Arc<BundleOptions>,
    pub state: Arc<PluginState>,
    pub import_map: Option<Arc<ImportMap>>,
    pub flavor: InputFlavor,
    cm: Lrc<SourceMap>,
    importer_source_cache: Arc<Mutex<HashMap<PathBuf, Arc<str>>>>,
}

impl ResolverPlugin {
    pub fn new(options: Arc<BundleOptions>, cm: Lrc<SourceMap>) -> Result<Self> {
        let flavor = detect_flavor(&options.workflows_path, options.input_flavor);
        let import_map = options.load_import_map()?.map(Arc::new);
        Ok(Self {
            options,
            state: Arc::new(PluginState::default()),
            import_map,
            flavor,
            cm,
            importer_source_cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Clears the importer-source cache. Called once the build ends.
    pub fn on_end(&self) {
        self.importer_source_cache.lock().unwrap().clear();
    }

    fn record_forbidden(&self, specifier: &str, importer: &Path) {
        let mut data = self.state.data.lock().unwrap();
        if is_under_node_modules(importer) {
            data.forbidden_transitive.insert(specifier.to_string(), importer.to_path_buf());
        } else {
            data.forbidden_direct.insert(specifier.to_string(), importer.to_path_buf());
        }
    }

    fn is_ignored(&self, specifier: &str) -> bool {
        self.options.ignore_modules.iter().any(|m| m == specifier)
    }

    fn read_importer_source(&self, importer: &Path) -> Option<Arc<str>> {
        if let Some(cached) = self.importer_source_cache.lock().unwrap().get(importer) {
            return Some(cached.clone());
        }
        let contents: Arc<str> = std::fs::read_to_string(importer).ok()?.into();
        self.importer_source_cache
            .lock()
            .unwrap()
            .insert(importer.to_path_buf(), contents.clone());
        Some(contents)
    }

    fn is_typed_source(path: &Path) -> bool {
        matches!(path.extension().and_then(|e| e.to_str()), Some("ts" | "tsx"))
    }

    /// Dispatch steps 1 and 4 of §4.3: classify a bare/`node:`-prefixed
    /// runtime builtin or catch-all specifier.
    fn classify(&self, base: &FileName, specifier: &str) -> ClassifyResult {
        let importer = importer_path(base);

        if self.is_ignored(specifier) {
            return ClassifyResult::Namespace(Namespace::Ignored);
        }

        match policy::policy().classify(specifier) {
            Classification::Allowed => {
                let path = policy::policy().module_override_path(specifier).unwrap();
                return ClassifyResult::Override(path);
            }
            Classification::Forbidden => {
                if let Some(src) = self.read_importer_source(&importer) {
                    if Self::is_typed_source(&importer) && scan::is_type_only_import(&src, specifier)
                    {
                        return ClassifyResult::Namespace(Namespace::TypeOnly);
                    }
                }
                self.record_forbidden(specifier, &importer);
                return ClassifyResult::Namespace(Namespace::Forbidden);
            }
            Classification::Neutral => {}
        }

        ClassifyResult::Defer
    }
}

enum ClassifyResult {
    Override(PathBuf),
    Namespace(Namespace),
    Defer,
}

impl Resolve for ResolverPlugin {
    fn resolve(&self, base: &FileName, specifier: &str) -> std::result::Result<Resolution, AnyError> {
        let resolution = self.resolve_inner(base, specifier)?;
        self.state
            .data
            .lock()
            .unwrap()
            .edges
            .entry(base.to_string())
            .or_default()
            .push(resolution.filename.to_string());
        Ok(resolution)
    }
}

impl ResolverPlugin {
    fn resolve_inner(&self, base: &FileName, specifier: &str) -> std::result::Result<Resolution, AnyError> {
        // 2. Converter aliases.
        if specifier == crate::entrypoint::PAYLOAD_CONVERTER_SPECIFIER {
            let target = self.options.payload_converter_path.clone();
            return Ok(resolution_for(target.map_or_else(
                || FileName::Custom(Namespace::Converter.encode("payload")),
                FileName::Real,
            )));
        }
        if specifier == crate::entrypoint::FAILURE_CONVERTER_SPECIFIER {
            let target = self.options.failure_converter_path.clone();
            return Ok(resolution_for(target.map_or_else(
                || FileName::Custom(Namespace::Converter.encode("failure")),
                FileName::Real,
            )));
        }
        if specifier == crate::entrypoint::WORKER_INTERFACE_SPECIFIER {
            return Ok(resolution_for(FileName::Custom(
                Namespace::Runtime.encode("worker-interface"),
            )));
        }
        if specifier == crate::entrypoint::GLOBAL_OVERRIDES_SPECIFIER {
            return Ok(resolution_for(FileName::Custom(
                Namespace::Runtime.encode("global-overrides"),
            )));
        }

        // 1. Runtime-builtin filter + 4. General catch-all.
        match self.classify(base, specifier) {
            ClassifyResult::Override(path) => return Ok(resolution_for(FileName::Real(path))),
            ClassifyResult::Namespace(ns) => {
                return Ok(resolution_for(FileName::Custom(ns.encode(specifier))))
            }
            ClassifyResult::Defer => {}
        }

        // Cross-runtime import map / npm: / URL rewriting (C4).
        let importer = importer_path(base);
        if let Some(map) = &self.import_map {
            if let Some(target) = map.resolve(&importer, specifier) {
                return self.resolve_target(&target, &importer, specifier);
            }
        }

        if let Some(rest) = specifier.strip_prefix("npm:") {
            let name = rest.split_once('/').map_or(rest, |(n, _)| n);
            let name = name.split('@').next().unwrap_or(name).to_string();
            return Ok(Resolution { filename: resolve_bare(&name)?, slug: None });
        }

        if specifier.starts_with("http://") || specifier.starts_with("https://") {
            return self.resolve_url(specifier);
        }

        if let Some(alt) = specifier.strip_prefix("deno:").or_else(|| specifier.strip_prefix("bun:"))
        {
            return Err(anyhow::anyhow!(
                "'{alt}' is an alternate-runtime builtin and cannot be used in workflow code"
            ));
        }

        Ok(Resolution { filename: resolve_bare(specifier)?, slug: None })
    }
}

impl ResolverPlugin {
    fn resolve_target(
        &self,
        target: &Target,
        importer: &Path,
        original: &str,
    ) -> std::result::Result<Resolution, AnyError> {
        match target {
            Target::Package { name, subpath } => {
                let rewritten = match subpath {
                    Some(s) => format!("{name}/{s}"),
                    None => name.clone(),
                };
                Ok(Resolution { filename: resolve_bare(&rewritten)?, slug: None })
            }
            Target::Url(u) => self.resolve_url(u),
            Target::Path(p) => {
                let _ = (importer, original);
                Ok(resolution_for(FileName::Real(p.clone())))
            }
        }
    }

    fn resolve_url(&self, raw: &str) -> std::result::Result<Resolution, AnyError> {
        if !self.options.allow_url_imports {
            return Err(anyhow::anyhow!("URL imports are disabled for this build: {raw}"));
        }
        let parsed = url::Url::parse(raw)?;
        if self.options.require_pinned_urls && !url_cache::is_pinned(&parsed) {
            return Err(anyhow::anyhow!(
                "URL import '{raw}' must be pinned to a version when require_pinned_urls is set"
            ));
        }
        Ok(resolution_for(FileName::Custom(Namespace::UrlImport.encode(raw))))
    }
}

fn resolution_for(filename: FileName) -> Resolution {
    Resolution { filename, slug: None }
}

fn resolve_bare(specifier: &str) -> std::result::Result<FileName, AnyError> {
    // Deferred to the underlying bundler's default node_modules resolution
    // in a full integration; here we record the bare specifier as a real
    // path for `node_modules/<specifier>` relative to the process cwd so
    // unit/integration tests can supply fixtures without a package manager.
    Ok(FileName::Real(PathBuf::from("node_modules").join(specifier)))
}

impl Load for ResolverPlugin {
    fn load(&self, file: &FileName) -> std::result::Result<ModuleData, AnyError> {
        let (source, syntax) = self.load_source(file)?;
        let fm = self.cm.new_source_file(Lrc::new(file.clone()), source.clone());

        if let FileName::Real(path) = file {
            if !is_under_node_modules(path) {
                for site in scan::find_dynamic_imports(&source) {
                    self.state.data.lock().unwrap().dynamic_imports.push(DynamicImportHit {
                        file: path.clone(),
                        line: site.line,
                        column: site.column,
                    });
                }
                for hit in scan::find_alternate_runtime_calls(&source, self.flavor) {
                    self.state.data.lock().unwrap().alternate_runtime_hits.push(AlternateRuntimeHit {
                        file: path.clone(),
                        api: hit.api,
                        line: hit.line,
                        column: hit.column,
                    });
                }
            }
        }

        let lexer = Lexer::new(syntax, Default::default(), StringInput::from(&*fm), None);
        let mut parser = Parser::new_from(lexer);
        let module = parser
            .parse_module()
            .map_err(|e| anyhow::anyhow!("parse error in {}: {:?}", file, e))?;

        Ok(ModuleData { fm, module, helpers: Default::default() })
    }
}

impl ResolverPlugin {
    fn load_source(&self, file: &FileName) -> std::result::Result<(String, Syntax), AnyError> {
        match file {
            FileName::Real(path) => {
                let source = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
                Ok((source, syntax_for(path)))
            }
            FileName::Custom(custom) => {
                let (ns, name) = Namespace::parse(custom)
                    .ok_or_else(|| anyhow::anyhow!("unknown virtual module {custom}"))?;
                let syntax = if ns == Namespace::UrlImport {
                    syntax_for_url(name)?
                } else {
                    Syntax::Es(EsSyntax::default())
                };
                Ok((self.virtual_source(ns, name)?, syntax))
            }
            other => Err(anyhow::anyhow!("cannot load {other}")),
        }
    }

    fn virtual_source(&self, ns: Namespace, name: &str) -> std::result::Result<String, AnyError> {
        match ns {
            Namespace::Ignored => Ok(format!(
                "throw new Error({:?});",
                format!("'{name}' was ignored during bundling and cannot be used at runtime")
            )),
            Namespace::Forbidden => Ok(format!(
                "throw new Error({:?});",
                format!("'{name}' is forbidden inside a deterministic workflow")
            )),
            Namespace::TypeOnly => Ok("export {};".to_string()),
            Namespace::Converter => Ok("module.exports = {};".to_string()),
            Namespace::Runtime => Ok(match name {
                "global-overrides" => "module.exports.overrideGlobals = function() {};".to_string(),
                _ => "module.exports = {};".to_string(),
            }),
            Namespace::UrlImport => {
                let parsed = url::Url::parse(name)?;
                let cache = url_cache::UrlImportCache::new(&self.options.url_cache_dir);
                if let Some(bytes) = cache.get(&parsed) {
                    return Ok(String::from_utf8(bytes)?);
                }
                let bytes = Self::fetch_url_import(&parsed, &cache)?;
                Ok(String::from_utf8(bytes)?)
            }
        }
    }

    /// Fetches `url`, failing on a non-success HTTP status, then persists
    /// the content and its metadata file to `cache` before returning it.
    fn fetch_url_import(
        url: &url::Url,
        cache: &url_cache::UrlImportCache,
    ) -> std::result::Result<Vec<u8>, AnyError> {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(url.clone())
            .send()
            .map_err(|e| anyhow::anyhow!("failed to fetch url import '{url}': {e}"))?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "failed to fetch url import '{url}': server responded with {}",
                response.status()
            ));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .map_err(|e| anyhow::anyhow!("failed to read url import '{url}' body: {e}"))?
            .to_vec();
        cache.put(url, &bytes, content_type, crate::utils::iso_now())?;
        Ok(bytes)
    }
}

fn syntax_for_url(raw: &str) -> std::result::Result<Syntax, AnyError> {
    let parsed = url::Url::parse(raw)?;
    Ok(match url_cache::loader_for(&parsed, None) {
        "ts" => Syntax::Typescript(TsSyntax { ..Default::default() }),
        "tsx" => Syntax::Typescript(TsSyntax { tsx: true, ..Default::default() }),
        "jsx" => Syntax::Es(EsSyntax { jsx: true, ..Default::default() }),
        _ => Syntax::Es(EsSyntax::default()),
    })
}

fn syntax_for(path: &Path) -> Syntax {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ts") => Syntax::Typescript(TsSyntax { ..Default::default() }),
        Some("tsx") => Syntax::Typescript(TsSyntax { tsx: true, ..Default::default() }),
        Some("jsx") => Syntax::Es(EsSyntax { jsx: true, ..Default::default() }),
        _ => Syntax::Es(EsSyntax::default()),
    }
}

/// Inspects a completed build's [`PluginState`] and raises the structured,
/// fatal errors the Orchestrator (C7) is responsible for. Never invoked from
/// inside a resolver hook — the plugin itself never throws (§4.3 invariant).
pub fn finalize(state: &PluginStateData, chains: HashMap<String, Vec<String>>) -> Result<()> {
    if !state.dynamic_imports.is_empty() {
        let sites = state
            .dynamic_imports
            .iter()
            .map(|h| crate::error::SourceSite {
                file: h.file.clone(),
                line: h.line,
                column: h.column,
            })
            .collect();
        return Err(BundleError::DynamicImport { ctx: ErrorContext::default().with_sites(sites) });
    }

    if !state.forbidden_direct.is_empty() {
        let mut modules: Vec<_> = state.forbidden_direct.keys().cloned().collect();
        modules.sort();
        let chain = modules
            .first()
            .and_then(|m| chains.get(m))
            .cloned()
            .unwrap_or_default();
        return Err(BundleError::ForbiddenModules {
            ctx: ErrorContext::default().with_modules(modules).with_chain(chain),
        });
    }

    Ok(())
}
