//! Determinism Verifier (C9): builds the same options N times and confirms
//! every build produces byte-identical (normalized) output.

use crate::{
    error::{BundleError, Result},
    options::BundleOptions,
    utils,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

const MIN_BUILDS: u32 = 2;
const MAX_BUILDS: u32 = 10;

#[derive(Clone, Debug, Serialize)]
pub struct DeterminismReport {
    pub deterministic: bool,
    pub build_count: u32,
    pub reference_hash: String,
    pub hashes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub differences: Option<Vec<LineDiff>>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct LineDiff {
    pub line: usize,
    pub reference: String,
    pub other: String,
}

static ISO_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?Z").unwrap()
});
static UNIX_TIMESTAMP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b1[5-9]\d{8}\b").unwrap());
static METADATA_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*//\s*workflow-bundle.*$").unwrap());

/// Strips ISO timestamps, unix timestamps, and metadata comment spans so
/// two builds that differ only in "when" still compare equal.
pub fn normalize(code: &str) -> String {
    let code = ISO_TIMESTAMP.replace_all(code, "<timestamp>");
    let code = UNIX_TIMESTAMP.replace_all(&code, "<timestamp>");
    METADATA_COMMENT.replace_all(&code, "").into_owned()
}

/// Runs `build` `requested_builds` times (clamped to `[2, 10]`), disabling
/// metadata emission on each call, and reports whether all builds agree.
pub fn verify_deterministic_build(
    _options: &BundleOptions,
    requested_builds: u32,
    mut build: impl FnMut() -> Result<String>,
) -> Result<DeterminismReport> {
    let build_count = requested_builds.clamp(MIN_BUILDS, MAX_BUILDS);

    let mut codes = Vec::with_capacity(build_count as usize);
    for _ in 0..build_count {
        codes.push(normalize(&build()?));
    }

    let hashes: Vec<String> = codes.iter().map(utils::sha256_hex).collect();
    let reference_hash = hashes[0].clone();
    let deterministic = hashes.iter().all(|h| h == &reference_hash);

    let differences = if deterministic {
        None
    } else {
        let mismatch_idx = hashes.iter().position(|h| h != &reference_hash).ok_or_else(|| {
            BundleError::build_failed("non-deterministic report claimed but no mismatch found")
        })?;
        Some(diff_lines(&codes[0], &codes[mismatch_idx]))
    };

    Ok(DeterminismReport { deterministic, build_count, reference_hash, hashes, differences })
}

/// Up to five line-wise diffs of the first pair that differ.
fn diff_lines(reference: &str, other: &str) -> Vec<LineDiff> {
    reference
        .lines()
        .enumerate()
        .zip(other.lines())
        .filter(|((_, r), o)| r != o)
        .take(5)
        .map(|((i, r), o)| LineDiff { line: i + 1, reference: r.to_string(), other: o.to_string() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> BundleOptions {
        BundleOptions::builder("workflows.ts").build().unwrap()
    }

    #[test]
    fn identical_builds_are_deterministic() {
        let report =
            verify_deterministic_build(&opts(), 3, || Ok("const a = 1;".to_string())).unwrap();
        assert!(report.deterministic);
        assert_eq!(report.build_count, 3);
        assert!(report.differences.is_none());
    }

    #[test]
    fn differing_builds_report_line_diffs() {
        let mut call = 0;
        let report = verify_deterministic_build(&opts(), 2, || {
            call += 1;
            Ok(format!("const a = {call};"))
        })
        .unwrap();
        assert!(!report.deterministic);
        assert_eq!(report.differences.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn build_count_is_clamped() {
        let report = verify_deterministic_build(&opts(), 50, || Ok("x".to_string())).unwrap();
        assert_eq!(report.build_count, MAX_BUILDS);
        let report = verify_deterministic_build(&opts(), 0, || Ok("x".to_string())).unwrap();
        assert_eq!(report.build_count, MIN_BUILDS);
    }

    #[test]
    fn normalize_strips_iso_and_unix_timestamps_and_metadata_comment() {
        let code = "// workflow-bundle abc123\nconst t = '2024-01-01T00:00:00Z';\nconst u = 1700000000;";
        let normalized = normalize(code);
        assert!(!normalized.contains("2024-01-01"));
        assert!(!normalized.contains("1700000000"));
        assert!(!normalized.contains("workflow-bundle"));
    }

    #[test]
    fn builds_that_differ_only_in_timestamp_are_still_deterministic() {
        let mut call = 0;
        let report = verify_deterministic_build(&opts(), 2, || {
            call += 1;
            Ok(format!("// workflow-bundle {call}\nconst a = 1;"))
        })
        .unwrap();
        assert!(report.deterministic);
    }
}
