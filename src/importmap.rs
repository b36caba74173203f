//! The cross-runtime resolver's configuration surface (C4): input-flavor
//! detection and import-map parsing. URL fetch/cache lives in
//! [`crate::resolver::url_cache`].

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFlavor {
    Node,
    Deno,
    Bun,
    Auto,
}

/// Ascends up to three parent directories from `workflows_path` looking for
/// a runtime config file; an explicit flavor always wins over detection.
pub fn detect_flavor(workflows_path: &Path, explicit: InputFlavor) -> InputFlavor {
    if explicit != InputFlavor::Auto {
        return explicit;
    }

    let mut dir = workflows_path.parent();
    for _ in 0..4 {
        let Some(d) = dir else { break };
        if d.join("deno.json").exists() || d.join("deno.jsonc").exists() {
            return InputFlavor::Deno;
        }
        if d.join("bunfig.toml").exists() {
            return InputFlavor::Bun;
        }
        dir = d.parent();
    }
    InputFlavor::Node
}

/// A specifier-rewrite target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// `npm:NAME[@VERSION][/SUBPATH]`
    Package { name: String, subpath: Option<String> },
    Url(String),
    Path(PathBuf),
}

fn parse_target(raw: &str, base_dir: &Path) -> Target {
    if let Some(rest) = raw.strip_prefix("npm:") {
        let (name, subpath) = split_npm_specifier(rest);
        Target::Package { name, subpath }
    } else if raw.starts_with("http://") || raw.starts_with("https://") {
        Target::Url(raw.to_string())
    } else {
        Target::Path(base_dir.join(raw))
    }
}

/// Splits `NAME[@VERSION][/SUBPATH]` (or `@SCOPE/NAME[@VERSION][/SUBPATH]`
/// for scoped packages) into the bare package name and an optional subpath.
fn split_npm_specifier(rest: &str) -> (String, Option<String>) {
    let scoped = rest.starts_with('@');
    let mut parts = rest.splitn(if scoped { 3 } else { 2 }, '/');
    let name = if scoped {
        let scope = parts.next().unwrap_or_default();
        let pkg = strip_version(parts.next().unwrap_or_default());
        format!("{scope}/{pkg}")
    } else {
        strip_version(parts.next().unwrap_or_default())
    };
    let subpath = parts.next().map(|s| s.to_string());
    (name, subpath)
}

fn strip_version(segment: &str) -> String {
    segment.split('@').next().unwrap_or(segment).to_string()
}

/// Appends `tail` (the unmatched remainder past a trailing-slash prefix key)
/// onto a resolved target.
fn extend_target(target: &Target, tail: &str) -> Target {
    match target {
        Target::Package { name, subpath } => Target::Package {
            name: name.clone(),
            subpath: Some(format!("{}{tail}", subpath.as_deref().unwrap_or(""))),
        },
        Target::Url(u) => Target::Url(format!("{u}{tail}")),
        Target::Path(p) => Target::Path(p.join(tail)),
    }
}

/// `{ imports: map<Specifier, Target>?, scopes: map<PathPrefix, map<Specifier, Target>>? }`
#[derive(Clone, Debug, Default)]
pub struct ImportMap {
    pub imports: BTreeMap<String, Target>,
    pub scopes: BTreeMap<String, BTreeMap<String, Target>>,
    base_dir: PathBuf,
}

#[derive(Deserialize, Default)]
struct RawImportMap {
    #[serde(default)]
    imports: BTreeMap<String, String>,
    #[serde(default)]
    scopes: BTreeMap<String, BTreeMap<String, String>>,
}

impl ImportMap {
    /// Parses a JSON-with-comments import map. `base_dir` anchors relative
    /// path targets.
    pub fn parse(source: &str, base_dir: &Path) -> crate::error::Result<Self> {
        let value = jsonc_parser::parse_to_serde_value(source, &Default::default())
            .map_err(|e| crate::error::BundleError::config_invalid(e.to_string()))?
            .unwrap_or(serde_json::Value::Null);
        let raw: RawImportMap = serde_json::from_value(value)?;

        let imports =
            raw.imports.into_iter().map(|(k, v)| (k, parse_target(&v, base_dir))).collect();
        let scopes = raw
            .scopes
            .into_iter()
            .map(|(prefix, map)| {
                let map =
                    map.into_iter().map(|(k, v)| (k, parse_target(&v, base_dir))).collect();
                (prefix, map)
            })
            .collect();

        Ok(Self { imports, scopes, base_dir: base_dir.to_path_buf() })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolves `specifier` against exact keys, then prefix keys (keys
    /// ending in `/`), within `scopes` matching `importer_path` first, then
    /// the top-level `imports`. A prefix match appends the unmatched tail of
    /// `specifier` onto the target, mirroring how the browser import maps
    /// spec extends a trailing-slash mapping.
    pub fn resolve(&self, importer_path: &Path, specifier: &str) -> Option<Target> {
        for (prefix, map) in &self.scopes {
            if importer_path.starts_with(prefix) {
                if let Some(t) = Self::resolve_in(map, specifier) {
                    return Some(t);
                }
            }
        }
        Self::resolve_in(&self.imports, specifier)
    }

    fn resolve_in(map: &BTreeMap<String, Target>, specifier: &str) -> Option<Target> {
        if let Some(t) = map.get(specifier) {
            return Some(t.clone());
        }
        map.iter()
            .filter(|(k, _)| k.ends_with('/') && specifier.starts_with(k.as_str()))
            .max_by_key(|(k, _)| k.len())
            .map(|(k, v)| extend_target(v, &specifier[k.len()..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_and_prefix_imports() {
        let json = r#"{
            // a comment
            "imports": {
                "helper": "./utils/helper.ts",
                "lodash/": "npm:lodash@4.17.21/"
            }
        }"#;
        let map = ImportMap::parse(json, Path::new("/root")).unwrap();
        assert_eq!(
            map.resolve(Path::new("/root/wf.ts"), "helper"),
            Some(Target::Path(PathBuf::from("/root/./utils/helper.ts")))
        );
        match map.resolve(Path::new("/root/wf.ts"), "lodash/throttle") {
            Some(Target::Package { name, subpath }) => {
                assert_eq!(name, "lodash");
                assert_eq!(subpath.as_deref(), Some("throttle"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn scoped_npm_package_name_keeps_scope() {
        let target = parse_target("npm:@temporalio/common@1.9.0/lib/x", Path::new("/root"));
        assert_eq!(
            target,
            Target::Package { name: "@temporalio/common".into(), subpath: Some("lib/x".into()) }
        );
    }

    #[test]
    fn url_target_detected() {
        let target = parse_target("https://deno.land/x/foo/mod.ts", Path::new("/root"));
        assert_eq!(target, Target::Url("https://deno.land/x/foo/mod.ts".into()));
    }

    #[test]
    fn scope_prefix_overrides_top_level() {
        let json = r#"{
            "imports": { "helper": "./a.ts" },
            "scopes": { "src/": { "helper": "./b.ts" } }
        }"#;
        let map = ImportMap::parse(json, Path::new("/root")).unwrap();
        assert_eq!(
            map.resolve(Path::new("src/wf.ts"), "helper"),
            Some(Target::Path(PathBuf::from("/root/./b.ts")))
        );
        assert_eq!(
            map.resolve(Path::new("other/wf.ts"), "helper"),
            Some(Target::Path(PathBuf::from("/root/./a.ts")))
        );
    }

    #[test]
    fn auto_detects_deno_flavor() {
        let tmp = tempfile_dir();
        std::fs::write(tmp.join("deno.json"), "{}").unwrap();
        let wf = tmp.join("src").join("workflows.ts");
        std::fs::create_dir_all(wf.parent().unwrap()).unwrap();
        assert_eq!(detect_flavor(&wf, InputFlavor::Auto), InputFlavor::Deno);
    }

    #[test]
    fn explicit_flavor_overrides_detection() {
        let tmp = tempfile_dir();
        std::fs::write(tmp.join("deno.json"), "{}").unwrap();
        assert_eq!(detect_flavor(&tmp.join("workflows.ts"), InputFlavor::Node), InputFlavor::Node);
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "workflow-bundler-test-{}",
            std::process::id().wrapping_add(line!() as u32)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
