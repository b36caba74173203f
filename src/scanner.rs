//! The static replay-safety scanner (C10): a pre-build regex scan of
//! workflow source for replay-unsafe runtime calls.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

struct Pattern {
    regex: Regex,
    reason: &'static str,
    suggestion: &'static str,
    severity: Severity,
}

macro_rules! pattern {
    ($re:literal, $reason:literal, $suggestion:literal, $severity:expr) => {
        Pattern {
            regex: Regex::new($re).unwrap(),
            reason: $reason,
            suggestion: $suggestion,
            severity: $severity,
        }
    };
}

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| vec![
    pattern!(
        r"\bDate\.now\s*\(",
        "Date.now() is nondeterministic across replay",
        "use workflow.now() or the current time from activity results",
        Severity::Error
    ),
    pattern!(
        r"new\s+Date\s*\(\s*\)",
        "`new Date()` reads the wall clock, which differs across replay",
        "use workflow.now() or pass the timestamp in as workflow input",
        Severity::Error
    ),
    pattern!(
        r"\bMath\.random\s*\(",
        "Math.random() is nondeterministic across replay",
        "use workflow.uuid4() or a seeded PRNG fed by workflow input",
        Severity::Error
    ),
    pattern!(
        r"\bset(Timeout|Interval|Immediate)\s*\(",
        "native timers are not replay-safe",
        "use workflow.sleep() instead of native timers",
        Severity::Error
    ),
    pattern!(
        r#"\brequire\s*\(\s*['"]net['"]\s*\)"#,
        "direct network access breaks deterministic replay",
        "move network calls into an activity",
        Severity::Error
    ),
    pattern!(
        r"\b(fetch|XMLHttpRequest)\s*\(",
        "network I/O is not replay-safe inside a workflow",
        "move network calls into an activity",
        Severity::Error
    ),
    pattern!(
        r#"\brequire\s*\(\s*['"]fs['"]\s*\)"#,
        "file I/O is not replay-safe inside a workflow",
        "move file I/O into an activity",
        Severity::Error
    ),
    pattern!(
        r#"\brequire\s*\(\s*['"]child_process['"]\s*\)"#,
        "spawning child processes is not replay-safe",
        "move the subprocess call into an activity",
        Severity::Warning
    ),
    pattern!(
        r"\bcrypto\.randomBytes\s*\(",
        "crypto.randomBytes is nondeterministic across replay",
        "use workflow.uuid4() or seed randomness from workflow input",
        Severity::Warning
    ),
]);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub file: std::path::PathBuf,
    pub line: usize,
    pub column: usize,
    pub source_line: String,
    pub reason: String,
    pub suggestion: String,
    pub severity: Severity,
}

impl Violation {
    pub fn format(&self) -> String {
        format!(
            "{}:{}:{}: {} ({})",
            self.file.display(),
            self.line,
            self.column,
            self.reason,
            self.suggestion
        )
    }
}

/// Scans `source` (the contents of `file`) for replay-unsafe call sites.
///
/// Matches inside line/block comments are excluded. A match is also
/// excluded when it looks like a type-annotation position on the same
/// line (a `:` precedes it with no `=` between, e.g. `foo: typeof Date`).
pub fn scan(file: &Path, source: &str) -> Vec<Violation> {
    let comment_spans = crate::resolver::scan::comment_spans(source);
    let mut violations = Vec::new();

    for pattern in PATTERNS.iter() {
        for m in pattern.regex.find_iter(source) {
            if crate::resolver::scan::is_within(&comment_spans, m.start()) {
                continue;
            }
            if is_type_annotation_position(source, m.start()) {
                continue;
            }
            let (line, column) = line_col(source, m.start());
            let source_line = source.lines().nth(line.saturating_sub(1)).unwrap_or("").to_string();
            violations.push(Violation {
                file: file.to_path_buf(),
                line,
                column,
                source_line,
                reason: pattern.reason.to_string(),
                suggestion: pattern.suggestion.to_string(),
                severity: pattern.severity,
            });
        }
    }

    violations.sort_by_key(|v| (v.line, v.column));
    violations
}

/// Heuristic: a `:` appears before the match on the same line with no `=`
/// in between, suggesting a type position (`x: typeof Date`) rather than a
/// value use.
fn is_type_annotation_position(source: &str, offset: usize) -> bool {
    let line_start = source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let prefix = &source[line_start..offset];
    match (prefix.rfind(':'), prefix.rfind('=')) {
        (Some(colon), eq) => eq.map_or(true, |eq| eq < colon),
        (None, _) => false,
    }
}

fn line_col(source: &str, offset: usize) -> (usize, usize) {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_date_now() {
        let v = scan(Path::new("wf.ts"), "const t = Date.now();");
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Error);
    }

    #[test]
    fn detects_math_random() {
        let v = scan(Path::new("wf.ts"), "const r = Math.random();");
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn ignores_matches_inside_line_comment() {
        let v = scan(Path::new("wf.ts"), "// Date.now() is unsafe, don't call it\nconst x = 1;");
        assert!(v.is_empty());
    }

    #[test]
    fn ignores_matches_inside_block_comment() {
        let v = scan(Path::new("wf.ts"), "/* Math.random() example */\nconst x = 1;");
        assert!(v.is_empty());
    }

    #[test]
    fn ignores_type_annotation_position() {
        let v = scan(Path::new("wf.ts"), "function f(cb: typeof setTimeout) {}");
        assert!(v.is_empty());
    }

    #[test]
    fn reports_line_and_column() {
        let v = scan(Path::new("wf.ts"), "a();\nb();\nconst t = Date.now();");
        assert_eq!(v[0].line, 3);
        assert_eq!(v[0].column, 11);
    }
}
