//! Cache-layer integration coverage (S8).

use workflow_bundler::{bundler_util::TempWorkflowProject, Bundler};

// S8: cache hit returns an equal bundle; force_rebuild produces a fresh one
// with the same code.
#[test]
fn cache_hit_then_forced_rebuild() {
    let project =
        TempWorkflowProject::new("export async function greetingWorkflow(name) { return name; }")
            .unwrap();
    let options = project.options_builder().build().unwrap();
    let bundler = Bundler::default();

    let first = bundler.get_cached_bundle(&options, false, false).unwrap();
    let second = bundler.get_cached_bundle(&options, false, false).unwrap();
    assert_eq!(first.code, second.code);

    let rebuilt = bundler.get_cached_bundle(&options, true, false).unwrap();
    assert_eq!(rebuilt.code, first.code);
}

#[test]
fn clearing_the_cache_forces_a_rebuild_on_next_call() {
    let project =
        TempWorkflowProject::new("export async function greetingWorkflow(name) { return name; }")
            .unwrap();
    let options = project.options_builder().build().unwrap();
    let bundler = Bundler::default();

    let _ = bundler.get_cached_bundle(&options, false, false).unwrap();
    bundler.clear_bundle_cache().unwrap();
    let after_clear = bundler.get_cached_bundle(&options, false, false).unwrap();
    assert!(after_clear.code.contains("__TEMPORAL__"));
}

#[test]
fn disk_cache_stats_report_after_a_build_with_disk_cache_configured() {
    let project =
        TempWorkflowProject::new("export async function greetingWorkflow(name) { return name; }")
            .unwrap();
    let options = project.options_builder().build().unwrap();

    let cache_dir = project.root().join("bundle-cache");
    let bundler = Bundler::builder().disk_cache_dir(&cache_dir).build();

    let _ = bundler.get_cached_bundle(&options, false, false).unwrap();
    let stats = bundler.get_bundle_cache_stats();
    assert_eq!(stats.count, 1);
}
