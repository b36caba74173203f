//! Wiring to the underlying bundler (`swc_bundler`): invokes it against the
//! synthetic entry and the [`ResolverPlugin`](crate::resolver::ResolverPlugin),
//! then prints the merged module back to a single common-module source
//! string.

use crate::{
    error::{BundleError, Result},
    options::SourceMapMode,
    resolver::ResolverPlugin,
};
use std::collections::HashMap;
use swc_bundler::{Bundler, Config as BundlerConfig, Hook, ModuleRecord};
use swc_common::{
    source_map::DefaultSourceMapGenConfig, sync::Lrc, FileName, Globals, SourceMap, GLOBALS,
};
use swc_ecma_ast::KeyValueProp;
use swc_ecma_codegen::{text_writer::JsWriter, Config as CodegenConfig, Emitter};

const SOURCE_MAP_PREFIX: &str = "//# sourceMappingURL=";

/// No import-meta properties are ever needed: workflow code never reads
/// `import.meta`, and the entrypoint is synthetic CommonJS.
struct NoopHook;

impl Hook for NoopHook {
    fn get_import_meta_props(
        &self,
        _span: swc_common::Span,
        _record: &ModuleRecord,
    ) -> std::result::Result<Vec<KeyValueProp>, anyhow::Error> {
        Ok(vec![])
    }
}

/// Runs the underlying bundler against `entry_name` (the synthetic entry
/// specifier) and prints the result as single-module CommonJS source.
///
/// Per §4.7's hard-override table: no minification, no identifier mangling,
/// no code splitting, name-preservation always on, tree-shaking follows the
/// caller's option but never relaxes name preservation.
///
/// Returns `(code, source_map)`: for [`SourceMapMode::Inline`] the map is
/// embedded as a trailing `//# sourceMappingURL=` data URL in `code` and the
/// second element is `None`; for [`SourceMapMode::External`] the map is
/// returned separately as a JSON string; for [`SourceMapMode::None`] no map
/// is generated at all.
pub fn bundle_to_source(
    entry_name: &str,
    entry_filename: FileName,
    plugin: ResolverPlugin,
    cm: Lrc<SourceMap>,
    tree_shake: bool,
    source_map_mode: SourceMapMode,
) -> Result<(String, Option<String>)> {
    let globals = Globals::new();
    GLOBALS.set(&globals, || {
        let config = BundlerConfig {
            require: true,
            disable_inliner: true,
            disable_hygiene: false,
            disable_fixer: false,
            disable_dce: !tree_shake,
            external_modules: vec![],
            module: swc_bundler::ModuleType::Es,
        };

        let mut bundler =
            Bundler::new(&globals, cm.clone(), plugin.clone(), plugin, config, Box::new(NoopHook));

        let mut entries = HashMap::new();
        entries.insert(entry_name.to_string(), entry_filename);

        let mut bundles = bundler
            .bundle(entries)
            .map_err(|e| BundleError::build_failed(format!("{e:#}")))?;

        let bundle = bundles.pop().ok_or_else(|| {
            BundleError::build_failed("the underlying bundler produced no output")
        })?;

        print_module(&cm, &bundle.module, source_map_mode)
    })
}

fn print_module(
    cm: &Lrc<SourceMap>,
    module: &swc_ecma_ast::Module,
    source_map_mode: SourceMapMode,
) -> Result<(String, Option<String>)> {
    let want_map = source_map_mode != SourceMapMode::None;
    let mut mappings = Vec::new();
    let mut buf = Vec::new();
    {
        let mappings_buf = if want_map { Some(&mut mappings) } else { None };
        let writer = JsWriter::new(cm.clone(), "\n", &mut buf, mappings_buf);
        let mut emitter = Emitter {
            cfg: CodegenConfig::default().with_minify(false).with_target(swc_ecma_ast::EsVersion::Es2022),
            cm: cm.clone(),
            comments: None,
            wr: writer,
        };
        emitter
            .emit_module(module)
            .map_err(|e| BundleError::build_failed(format!("codegen failed: {e}")))?;
    }
    let code = String::from_utf8(buf).map_err(|e| BundleError::Utf8(e.utf8_error()))?;

    if !want_map {
        return Ok((code, None));
    }

    let built = cm.build_source_map(&mappings, None, DefaultSourceMapGenConfig);
    match source_map_mode {
        SourceMapMode::Inline => {
            let data_url = built
                .to_data_url()
                .map_err(|e| BundleError::build_failed(format!("source map encoding failed: {e}")))?;
            let code = format!("{code}\n{SOURCE_MAP_PREFIX}{data_url}\n");
            Ok((code, None))
        }
        SourceMapMode::External => {
            let mut json = Vec::new();
            built
                .to_writer(&mut json)
                .map_err(|e| BundleError::build_failed(format!("source map encoding failed: {e}")))?;
            let json = String::from_utf8(json).map_err(|e| BundleError::Utf8(e.utf8_error()))?;
            Ok((code, Some(json)))
        }
        SourceMapMode::None => unreachable!(),
    }
}
