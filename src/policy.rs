//! The determinism policy engine (C1): classifies a module specifier as
//! allowed, forbidden, or neutral, and resolves allowed-builtin overrides.

use once_cell::sync::OnceCell;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

/// A normalized, platform-neutral import string.
///
/// Normalization strips the optional `node:` scheme prefix. Idempotent:
/// `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(specifier: &str) -> &str {
    specifier.strip_prefix("node:").unwrap_or(specifier)
}

/// Runtime builtins the bundle is allowed to reference directly; their real
/// implementation is swapped in via [`Policy::module_override_path`].
const DEFAULT_ALLOWED_BUILTINS: &[&str] = &["assert", "url", "util"];

/// The closed set of runtime builtin module names known to the host.
/// Anything in here that is not in the allow-set is forbidden.
const RUNTIME_BUILTINS: &[&str] = &[
    "assert", "async_hooks", "buffer", "child_process", "cluster", "crypto", "dgram", "dns",
    "domain", "events", "fs", "http", "http2", "https", "net", "os", "path", "perf_hooks",
    "process", "punycode", "querystring", "readline", "repl", "stream", "string_decoder", "sys",
    "timers", "tls", "trace_events", "tty", "url", "util", "v8", "vm", "worker_threads", "zlib",
];

/// Forbidden peer packages in addition to the computed runtime builtin set,
/// e.g. workflow-engine client packages that themselves perform I/O.
const EXPLICIT_FORBIDDEN_PACKAGES: &[&str] = &["@temporalio/client", "@temporalio/activity"];

/// Path a given allowed builtin is redirected to inside the bundle.
fn override_path_for(name: &str) -> PathBuf {
    PathBuf::from(format!("__workflow_runtime_builtins__/{name}.js"))
}

/// The allow/forbid module classifier.
///
/// Loaded once at process start from the installed runtime peer if present,
/// falling back to the bundled default; cached for the process lifetime.
#[derive(Clone, Debug)]
pub struct Policy {
    allowed: HashSet<String>,
    forbidden: HashSet<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    Allowed,
    Forbidden,
    Neutral,
}

impl Policy {
    fn matches(set: &HashSet<String>, specifier: &str) -> bool {
        let norm = normalize(specifier);
        set.contains(norm) || set.iter().any(|m| subpath_matches(norm, m))
    }

    pub fn is_allowed_builtin(&self, specifier: &str) -> bool {
        Self::matches(&self.allowed, specifier)
    }

    pub fn is_forbidden(&self, specifier: &str) -> bool {
        Self::matches(&self.forbidden, specifier)
    }

    pub fn classify(&self, specifier: &str) -> Classification {
        if self.is_allowed_builtin(specifier) {
            Classification::Allowed
        } else if self.is_forbidden(specifier) {
            Classification::Forbidden
        } else {
            Classification::Neutral
        }
    }

    /// Returns the runtime stub path for an allowed builtin.
    ///
    /// # Errors
    ///
    /// Fails if `specifier` is not in the allow-set.
    pub fn module_override_path(&self, specifier: &str) -> Option<PathBuf> {
        self.is_allowed_builtin(specifier).then(|| override_path_for(normalize(specifier)))
    }

    /// A debug-oriented dump of the effective sets, used by tests and by
    /// `tracing` instrumentation when a build fails.
    pub fn describe(&self) -> String {
        let mut allowed: Vec<_> = self.allowed.iter().cloned().collect();
        let mut forbidden: Vec<_> = self.forbidden.iter().cloned().collect();
        allowed.sort();
        forbidden.sort();
        format!("allowed={allowed:?}, forbidden={forbidden:?}")
    }
}

/// Matches the two-segment-prefix rule for scoped packages: `@a/b/x`
/// subpath-matches `@a/b`, never just `@a`.
fn subpath_matches(specifier: &str, candidate: &str) -> bool {
    specifier.strip_prefix(candidate).is_some_and(|rest| rest.starts_with('/'))
}

fn default_policy() -> Policy {
    let allowed: HashSet<String> =
        DEFAULT_ALLOWED_BUILTINS.iter().map(|s| (*s).to_string()).collect();
    let forbidden: HashSet<String> = RUNTIME_BUILTINS
        .iter()
        .filter(|b| !allowed.contains(**b))
        .chain(EXPLICIT_FORBIDDEN_PACKAGES.iter())
        .map(|s| (*s).to_string())
        .collect();
    Policy { allowed, forbidden }
}

/// Attempts to load a peer-supplied override manifest, a JSON file of the
/// shape `{"allowed": [...], "forbidden": [...]}` colocated with the
/// installed runtime peer package (`node_modules/<peer>/bundler-policy.json`).
/// Falls back to [`default_policy`] on any failure.
fn load_policy_from_peer(peer_root: Option<&Path>) -> Policy {
    let Some(root) = peer_root else { return default_policy() };
    let manifest_path = root.join("bundler-policy.json");
    let Ok(contents) = std::fs::read_to_string(&manifest_path) else { return default_policy() };

    #[derive(serde::Deserialize)]
    struct Manifest {
        #[serde(default)]
        allowed: Vec<String>,
        #[serde(default)]
        forbidden: Vec<String>,
    }

    match serde_json::from_str::<Manifest>(&contents) {
        Ok(manifest) if !manifest.allowed.is_empty() || !manifest.forbidden.is_empty() => Policy {
            allowed: manifest.allowed.into_iter().collect(),
            forbidden: manifest.forbidden.into_iter().collect(),
        },
        _ => default_policy(),
    }
}

static POLICY: OnceCell<Policy> = OnceCell::new();

/// Loads the process-wide policy, caching it for subsequent calls.
pub fn policy() -> &'static Policy {
    POLICY.get_or_init(|| load_policy_from_peer(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_node_scheme() {
        assert_eq!(normalize("node:fs"), "fs");
        assert_eq!(normalize("fs"), "fs");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["node:fs", "fs", "@a/b/c"] {
            assert_eq!(normalize(normalize(s)), normalize(s));
        }
    }

    #[test]
    fn allowed_builtins_are_not_forbidden() {
        let p = default_policy();
        assert!(p.is_allowed_builtin("url"));
        assert!(!p.is_forbidden("url"));
        assert!(!p.is_forbidden("node:url"));
    }

    #[test]
    fn fs_is_forbidden_bare_and_scheme_prefixed() {
        let p = default_policy();
        assert!(p.is_forbidden("fs"));
        assert!(p.is_forbidden("node:fs"));
        assert!(p.is_forbidden("fs/promises"));
    }

    #[test]
    fn scoped_package_matches_two_segment_prefix_only() {
        let mut p = default_policy();
        p.forbidden.insert("@scope/pkg".to_string());
        assert!(p.is_forbidden("@scope/pkg/sub"));
        assert!(!p.is_forbidden("@scope/other"));
        assert!(!p.is_forbidden("@scope"));
    }

    #[test]
    fn case_sensitive_matching() {
        let p = default_policy();
        assert!(!p.is_forbidden("FS"));
    }

    #[test]
    fn module_override_path_only_for_allowed() {
        let p = default_policy();
        assert!(p.module_override_path("url").is_some());
        assert!(p.module_override_path("fs").is_none());
    }
}
