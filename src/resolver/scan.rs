//! Shared text-scanning helpers: comment-span detection, dynamic `import()`
//! call-site detection, and the type-only-import heuristic. Used by both the
//! Resolver Plugin (C3) and the Static Replay-Safety Scanner (C10).

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

/// Byte ranges of line comments (`// ...`) and block comments (`/* ... */`)
/// found by a simple linear scan that respects string/template literals just
/// enough not to be fooled by `"// not a comment"`.
pub fn comment_spans(source: &str) -> Vec<Range<usize>> {
    let bytes = source.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    let mut in_string: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(quote) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }

        match b {
            b'"' | b'\'' | b'`' => {
                in_string = Some(b);
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let start = i;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                spans.push(start..i);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let start = i;
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
                spans.push(start..i);
            }
            _ => i += 1,
        }
    }

    spans
}

pub fn is_within(spans: &[Range<usize>], offset: usize) -> bool {
    spans.iter().any(|s| s.contains(&offset))
}

/// A call-site of a dynamic `import(expr)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicImportSite {
    pub line: usize,
    pub column: usize,
}

static DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bimport\s*\(").unwrap());

/// Finds every `import(<expr>)` call in `source` that is not inside a line-
/// or block-comment. `import type(...)` and static `import ... from` forms
/// never match this regex because they lack the call-parenthesis form.
pub fn find_dynamic_imports(source: &str) -> Vec<DynamicImportSite> {
    let spans = comment_spans(source);
    let mut line = 1usize;
    let mut col = 1usize;
    let mut line_starts = vec![0usize];
    for (i, ch) in source.char_indices() {
        if ch == '\n' {
            line_starts.push(i + 1);
        }
    }
    let _ = (&mut line, &mut col);

    DYNAMIC_IMPORT
        .find_iter(source)
        .filter(|m| !is_within(&spans, m.start()))
        .map(|m| {
            let line_idx = line_starts.partition_point(|&s| s <= m.start()) - 1;
            let col = m.start() - line_starts[line_idx] + 1;
            DynamicImportSite { line: line_idx + 1, column: col }
        })
        .collect()
}

/// Heuristic type-only-import detection (per §4.3/§9's open question):
/// `true` iff the file contains `import type { ... } from '<specifier>'` or
/// a named import whose brace-list is entirely `type`-prefixed, AND no value
/// `import ... from '<specifier>'` nor `require(...)` of the same specifier
/// appears anywhere in the file.
pub fn is_type_only_import(source: &str, specifier: &str) -> bool {
    let spans = comment_spans(source);
    let quoted = [format!("'{specifier}'"), format!("\"{specifier}\"")];

    let from_this_specifier = |line: &str| quoted.iter().any(|q| line.contains(q.as_str()));

    let mut has_type_only = false;
    let mut has_value_import = false;

    for (line_start, line) in line_offsets(source) {
        if !from_this_specifier(line) {
            continue;
        }
        if is_within(&spans, line_start) {
            continue;
        }
        if !line.trim_start().starts_with("import") {
            continue;
        }
        if line.trim_start().starts_with("import type") {
            has_type_only = true;
        } else {
            has_value_import = true;
        }
    }

    let require_re = Regex::new(&format!(
        r#"require\s*\(\s*['"]{}['"]\s*\)"#,
        regex::escape(specifier)
    ))
    .unwrap();
    let has_require = require_re.is_match(source);

    has_type_only && !has_value_import && !has_require
}

fn line_offsets(source: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    source.split('\n').map(move |line| {
        let start = offset;
        offset += line.len() + 1;
        (start, line)
    })
}

/// A call-site of a module-level global belonging to a runtime other than
/// the chosen input flavor (e.g. `Deno.readFile` in a Node-flavored build).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlternateRuntimeHit {
    pub api: String,
    pub line: usize,
    pub column: usize,
}

/// The runtime-global prefixes that are foreign to `flavor`, per §4.4's
/// forbidden-runtime-API detection keyed by chosen flavor.
fn alternate_prefixes(flavor: crate::importmap::InputFlavor) -> &'static [&'static str] {
    use crate::importmap::InputFlavor;
    match flavor {
        InputFlavor::Deno => &["Bun."],
        InputFlavor::Bun => &["Deno."],
        InputFlavor::Node | InputFlavor::Auto => &["Deno.", "Bun."],
    }
}

/// Finds module-call patterns belonging to a runtime other than `flavor`
/// (`Deno.*` / `Bun.*`), outside of comments, reported as line-numbered hits.
pub fn find_alternate_runtime_calls(
    source: &str,
    flavor: crate::importmap::InputFlavor,
) -> Vec<AlternateRuntimeHit> {
    let spans = comment_spans(source);
    let mut hits = Vec::new();
    for prefix in alternate_prefixes(flavor) {
        let mut start = 0;
        while let Some(rel) = source[start..].find(prefix) {
            let offset = start + rel;
            start = offset + prefix.len();
            if is_within(&spans, offset) {
                continue;
            }
            let (line, column) = {
                let mut line = 1;
                let mut col = 1;
                for ch in source[..offset].chars() {
                    if ch == '\n' {
                        line += 1;
                        col = 1;
                    } else {
                        col += 1;
                    }
                }
                (line, col)
            };
            hits.push(AlternateRuntimeHit { api: prefix.to_string(), line, column });
        }
    }
    hits.sort_by_key(|h| (h.line, h.column));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_dynamic_import_with_line_column() {
        let src = "a();\nconst m = import(moduleName);";
        let sites = find_dynamic_imports(src);
        assert_eq!(sites, vec![DynamicImportSite { line: 2, column: 11 }]);
    }

    #[test]
    fn ignores_dynamic_import_inside_comment() {
        let src = "// import(foo)\nconst x = 1;";
        assert!(find_dynamic_imports(src).is_empty());
    }

    #[test]
    fn ignores_dynamic_import_inside_block_comment() {
        let src = "/* import(foo) */\nconst x = 1;";
        assert!(find_dynamic_imports(src).is_empty());
    }

    #[test]
    fn static_import_does_not_match() {
        let src = "import { foo } from 'bar';";
        assert!(find_dynamic_imports(src).is_empty());
    }

    #[test]
    fn detects_type_only_import() {
        let src = "import type { Stats } from 'fs';\nconsole.log('x');";
        assert!(is_type_only_import(src, "fs"));
    }

    #[test]
    fn value_import_disqualifies_type_only() {
        let src = "import type { Stats } from 'fs';\nimport { readFileSync } from 'fs';";
        assert!(!is_type_only_import(src, "fs"));
    }

    #[test]
    fn require_disqualifies_type_only() {
        let src = "import type { Stats } from 'fs';\nconst fs = require('fs');";
        assert!(!is_type_only_import(src, "fs"));
    }

    #[test]
    fn no_import_at_all_is_not_type_only() {
        assert!(!is_type_only_import("const x = 1;", "fs"));
    }

    #[test]
    fn flags_deno_calls_in_a_node_flavored_build() {
        let src = "async function wf() { return Deno.readFile('x'); }";
        let hits = find_alternate_runtime_calls(src, crate::importmap::InputFlavor::Node);
        assert_eq!(hits, vec![AlternateRuntimeHit { api: "Deno.".to_string(), line: 1, column: 30 }]);
    }

    #[test]
    fn ignores_deno_calls_when_deno_is_the_chosen_flavor() {
        let src = "Deno.readFile('x');";
        assert!(find_alternate_runtime_calls(src, crate::importmap::InputFlavor::Deno).is_empty());
    }

    #[test]
    fn flags_bun_calls_when_deno_is_the_chosen_flavor() {
        let src = "Bun.file('x');";
        let hits = find_alternate_runtime_calls(src, crate::importmap::InputFlavor::Deno);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].api, "Bun.");
    }

    #[test]
    fn ignores_alternate_runtime_calls_inside_comments() {
        let src = "// Deno.readFile('x') example\nconst x = 1;";
        assert!(find_alternate_runtime_calls(src, crate::importmap::InputFlavor::Node).is_empty());
    }
}
