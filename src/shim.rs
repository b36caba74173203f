//! Output Shim & Validator (C5): wraps bundler output into the runtime
//! contract and checks its shape before it is handed back as a
//! [`crate::WorkflowBundle`].

use crate::{error::BundleError, utils};

const SOURCE_MAP_PREFIX: &str = "//# sourceMappingURL=";

/// Splits `bytes` into `(body, trailing_source_map_directive)`. The
/// directive, if present, is the final non-whitespace line.
fn split_trailing_source_map(bytes: &str) -> (&str, Option<&str>) {
    let trimmed_end = bytes.trim_end();
    let last_line_start = trimmed_end.rfind('\n').map_or(0, |i| i + 1);
    let last_line = &trimmed_end[last_line_start..];
    if last_line.starts_with(SOURCE_MAP_PREFIX) {
        (&bytes[..last_line_start], Some(last_line))
    } else {
        (bytes, None)
    }
}

/// Wraps pre-shim bundler output as an immediately-invoked scope that
/// publishes the shared module cache and `__TEMPORAL__`, preserving a
/// trailing inline source-map directive as the final non-whitespace line.
pub fn apply(pre_shim: &str) -> String {
    let (body, source_map_directive) = split_trailing_source_map(pre_shim);
    let identifier = utils::sha256_hex(pre_shim.as_bytes())[..16].to_string();

    let mut out = format!(
        r#"(function (global) {{
  'use strict';
  // workflow-bundle {identifier}
  global.__webpack_module_cache__ = global.__webpack_module_cache__ || {{}};
  var module = {{ exports: {{}} }};
  (function (module, exports, __webpack_module_cache__) {{
{body}
  }})(module, module.exports, global.__webpack_module_cache__);
  global.__TEMPORAL__ = module.exports;
}})(typeof globalThis !== 'undefined' ? globalThis : this);
"#,
    );

    if let Some(directive) = source_map_directive {
        out.push_str(directive);
        out.push('\n');
    }
    out
}

/// Rejects output that does not reference both the shared module cache and
/// the `__TEMPORAL__` publication.
pub fn validate(shimmed: &str) -> Result<(), BundleError> {
    if !shimmed.contains("__webpack_module_cache__") {
        return Err(BundleError::build_failed(
            "shimmed output does not reference __webpack_module_cache__",
        ));
    }
    if !shimmed.contains("__TEMPORAL__") {
        return Err(BundleError::build_failed("shimmed output does not publish __TEMPORAL__"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shim_references_both_contract_globals() {
        let out = apply("module.exports.greetingWorkflow = async function() {};");
        assert!(validate(&out).is_ok());
    }

    #[test]
    fn validator_rejects_missing_temporal_global() {
        let err = validate("global.__webpack_module_cache__ = {};").unwrap_err();
        assert_eq!(err.code(), "BUILD_FAILED");
    }

    #[test]
    fn validator_rejects_missing_module_cache() {
        let err = validate("global.__TEMPORAL__ = {};").unwrap_err();
        assert_eq!(err.code(), "BUILD_FAILED");
    }

    #[test]
    fn preserves_trailing_inline_source_map_as_last_line() {
        let pre_shim = "module.exports = {};\n//# sourceMappingURL=data:application/json;base64,abc123\n";
        let out = apply(pre_shim);
        let last_line = out.trim_end().lines().last().unwrap();
        assert_eq!(last_line, "//# sourceMappingURL=data:application/json;base64,abc123");
    }

    #[test]
    fn identifier_differs_for_different_input() {
        let a = apply("module.exports = 1;");
        let b = apply("module.exports = 2;");
        assert_ne!(a, b);
    }

    #[test]
    fn no_source_map_directive_when_absent() {
        let out = apply("module.exports = {};");
        assert!(!out.trim_end().lines().last().unwrap().starts_with(SOURCE_MAP_PREFIX));
    }
}
