//! The synthetic entrypoint generator (C2): emits the bootstrap module the
//! underlying bundler treats as the build's entry, and its stable hash.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// The well-known relative path the underlying bundler resolves the
/// synthetic entry source under. It never exists on disk.
pub const ENTRY_SPECIFIER: &str = "__workflow_bundle_entry__.js";

/// Literal specifiers the generated entry resolves against the configured
/// payload/failure converter paths (or a stub, if unset).
pub const PAYLOAD_CONVERTER_SPECIFIER: &str = "__temporal_custom_payload_converter__";
pub const FAILURE_CONVERTER_SPECIFIER: &str = "__temporal_custom_failure_converter__";

/// The runtime peer's worker-facing interface and global-override entry
/// points. Resolved to an embedded stub when no real peer install provides
/// them (see [`crate::resolver::Namespace::Runtime`]).
pub const WORKER_INTERFACE_SPECIFIER: &str = "@temporalio/workflow/lib/worker-interface.js";
pub const GLOBAL_OVERRIDES_SPECIFIER: &str = "@temporalio/workflow/lib/global-overrides.js";

/// The request that determines the bootstrap's behavior. Two requests that
/// are equal after interceptor dedup produce the same [`entry_hash`].
#[derive(Clone, Debug, Serialize)]
pub struct EntrypointRequest {
    pub workflows_path: PathBuf,
    pub interceptor_modules: Vec<String>,
    pub payload_converter_path: Option<PathBuf>,
    pub failure_converter_path: Option<PathBuf>,
}

impl EntrypointRequest {
    /// Deduplicates `interceptor_modules`, preserving the first occurrence of
    /// each entry, then hashes the canonical JSON of the resulting tuple.
    ///
    /// The hash covers only the request, never the emitted source text, so
    /// cosmetic changes to the emitter never invalidate a cache keyed on it.
    pub fn entry_hash(&self) -> String {
        let canonical = CanonicalRequest {
            workflows_path: self.workflows_path.to_string_lossy().into_owned(),
            interceptor_modules: dedup_preserve_order(&self.interceptor_modules),
            payload_converter_path: self
                .payload_converter_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            failure_converter_path: self
                .failure_converter_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        };
        let json = serde_json::to_vec(&canonical).expect("canonical request always serializes");
        let digest = Sha256::digest(json);
        hex::encode(digest)[..16].to_string()
    }
}

#[derive(Serialize)]
struct CanonicalRequest {
    workflows_path: String,
    interceptor_modules: Vec<String>,
    payload_converter_path: Option<String>,
    failure_converter_path: Option<String>,
}

/// Deduplicates while preserving insertion order of first occurrence.
pub fn dedup_preserve_order(items: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.iter().filter(|i| seen.insert((*i).clone())).cloned().collect()
}

/// Produces the deterministic bootstrap source in a single common-module
/// (CommonJS) format.
///
/// The emitted module:
/// 1. imports the runtime peer's worker interface and re-exports it as `api`
/// 2. invokes the peer's global-override routine exactly once at load
/// 3. exports `import_workflows()`, which stabilizes each exported
///    function's observable `name` on the user workflows module
/// 4. exports `import_interceptors()`, returning deduplicated interceptors
///    in first-occurrence order
///
/// The user's workflows module and interceptors are brought in via static
/// ES `import` declarations rather than `require()`: both are real source
/// files that may themselves use `import`/`export`, and the underlying
/// bundler only merges that syntax correctly into modules reached by
/// `import`, not ones pulled in through a `require()` call.
pub fn generate_bootstrap_source(req: &EntrypointRequest) -> String {
    let workflows_specifier = js_string_literal(&req.workflows_path);
    let interceptors = dedup_preserve_order(&req.interceptor_modules);

    let interceptor_imports: String = interceptors
        .iter()
        .enumerate()
        .map(|(i, m)| {
            format!("import __workflow_bundle_interceptor_{i}__ from {};\n", js_string_literal(Path::new(m)))
        })
        .collect();
    let interceptor_list: String = (0..interceptors.len())
        .map(|i| format!("    __workflow_bundle_interceptor_{i}__,\n"))
        .collect();

    format!(
        r#"'use strict';
import * as __workflow_bundle_workflows__ from {workflows_specifier};
{interceptor_imports}const api = require('{worker_interface}');
const {{ overrideGlobals }} = require('{global_overrides}');

overrideGlobals();

module.exports.api = api;

module.exports.importWorkflows = function importWorkflows() {{
  for (const [key, value] of Object.entries(__workflow_bundle_workflows__)) {{
    if (typeof value === 'function' && value.name !== key) {{
      Object.defineProperty(value, 'name', {{ value: key, configurable: true }});
    }}
  }}
  return __workflow_bundle_workflows__;
}};

module.exports.importInterceptors = function importInterceptors() {{
  return [
{interceptor_list}  ];
}};

module.exports.{payload} = function() {{
  return {{ payloadConverter: undefined }};
}};

module.exports.{failure} = function() {{
  return {{ failureConverter: undefined }};
}};
"#,
        worker_interface = WORKER_INTERFACE_SPECIFIER,
        global_overrides = GLOBAL_OVERRIDES_SPECIFIER,
        payload = PAYLOAD_CONVERTER_SPECIFIER,
        failure = FAILURE_CONVERTER_SPECIFIER,
    )
}

fn js_string_literal(path: &Path) -> String {
    format!("{:?}", path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(interceptors: &[&str]) -> EntrypointRequest {
        EntrypointRequest {
            workflows_path: PathBuf::from("workflows.ts"),
            interceptor_modules: interceptors.iter().map(|s| s.to_string()).collect(),
            payload_converter_path: None,
            failure_converter_path: None,
        }
    }

    #[test]
    fn entry_hash_is_16_hex_chars() {
        let h = req(&[]).entry_hash();
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn entry_hash_ignores_interceptor_duplicate_ordering_after_dedup() {
        let a = req(&["a", "b", "a"]);
        let b = req(&["a", "b"]);
        assert_eq!(a.entry_hash(), b.entry_hash());
    }

    #[test]
    fn entry_hash_distinguishes_genuinely_different_order() {
        let a = req(&["a", "b"]);
        let b = req(&["b", "a"]);
        assert_ne!(a.entry_hash(), b.entry_hash());
    }

    #[test]
    fn dedup_preserves_first_occurrence() {
        let items: Vec<String> = ["x", "y", "x", "z", "y"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dedup_preserve_order(&items), vec!["x", "y", "z"]);
    }

    #[test]
    fn bootstrap_source_contains_contract_symbols() {
        let src = generate_bootstrap_source(&req(&["my-interceptor"]));
        assert!(src.contains("importWorkflows"));
        assert!(src.contains("importInterceptors"));
        assert!(src.contains("my-interceptor"));
    }
}
