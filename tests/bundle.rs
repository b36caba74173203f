//! Integration tests over the full orchestrator pipeline, exercised against
//! throwaway workflow project fixtures.

use workflow_bundler::{
    bundle_workflow_code, bundler_util::TempWorkflowProject, importmap::InputFlavor, Mode,
};

// S1: basic success.
#[test]
fn basic_success() {
    let project =
        TempWorkflowProject::new("export async function greetingWorkflow(name) { return name; }")
            .unwrap();
    let options = project.options_builder().build().unwrap();
    let bundle = bundle_workflow_code(&options).unwrap();

    assert!(bundle.code.contains("__TEMPORAL__"));
    assert!(bundle.code.contains("__webpack_module_cache__"));
    assert_eq!(bundle.metadata.as_ref().unwrap().mode, Mode::Development);
    assert!(!bundle.code.is_empty());
}

// S2: direct forbidden import.
#[test]
fn direct_forbidden_import_reports_modules_and_chain() {
    let project =
        TempWorkflowProject::new("import fs from 'fs';\nexport async function wf() {}").unwrap();
    let options = project.options_builder().build().unwrap();
    let err = bundle_workflow_code(&options).unwrap_err();

    assert_eq!(err.code(), "FORBIDDEN_MODULES");
    let ctx = err.context().unwrap();
    assert!(ctx.modules.contains(&"fs".to_string()));
    assert!(!ctx.dependency_chain.is_empty());
}

// S4: ignored module builds successfully with a runtime throw stub.
#[test]
fn ignored_module_builds_with_runtime_stub() {
    let project =
        TempWorkflowProject::new("import fs from 'fs';\nexport async function wf() {}").unwrap();
    let options = project.options_builder().ignore_modules(["fs"]).build().unwrap();
    let bundle = bundle_workflow_code(&options).unwrap();

    assert!(bundle.code.contains("was ignored during bundling"));
}

// S5: dynamic import is rejected with a located site.
#[test]
fn dynamic_import_is_rejected_with_a_location() {
    let project = TempWorkflowProject::new(
        "export async function wf(name) { const m = await import(name); return m; }",
    )
    .unwrap();
    let options = project.options_builder().build().unwrap();
    let err = bundle_workflow_code(&options).unwrap_err();

    assert_eq!(err.code(), "DYNAMIC_IMPORT");
    assert!(!err.context().unwrap().sites.is_empty());
}

// S6: a type-only import of an otherwise-forbidden module does not fail the build.
#[test]
fn type_only_import_of_forbidden_module_succeeds() {
    let project = TempWorkflowProject::new(
        "import type { Stats } from 'fs';\nexport async function wf() { return 1; }",
    )
    .unwrap();
    let options = project.options_builder().build().unwrap();
    let bundle = bundle_workflow_code(&options).unwrap();

    assert!(bundle.code.contains("__TEMPORAL__"));
}

// S10: a Deno-flavor import map rewrites a bare specifier to a local file.
#[test]
fn import_map_rewrite_resolves_to_local_helper() {
    let project =
        TempWorkflowProject::new("import { greet } from 'helper';\nexport async function wf() { return greet(); }")
            .unwrap();
    project
        .write_file(
            "utils/helper.ts",
            "export function greet() { return 'hello from helper'; }",
        )
        .unwrap();
    project
        .write_file(
            "import_map.json",
            r#"{ "imports": { "helper": "./utils/helper.ts" } }"#,
        )
        .unwrap();

    let options = project
        .options_builder()
        .input_flavor(InputFlavor::Deno)
        .import_map_path(project.root().join("import_map.json"))
        .build()
        .unwrap();
    let bundle = bundle_workflow_code(&options).unwrap();

    assert!(bundle.code.contains("hello from helper"));
}
