//! bundle many benches
#[macro_use]
extern crate criterion;

use criterion::Criterion;
use std::io::Write;
use workflow_bundler::{BundleOptions, Bundler};

fn bundle_many_benchmark(c: &mut Criterion) {
    let dir = std::env::temp_dir().join("workflow-bundler-bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("workflows.ts");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        "export async function greetingWorkflow(name) {{ return 'hello ' + name; }}"
    )
    .unwrap();
    drop(f);

    let options = BundleOptions::builder(&path).build().unwrap();
    let bundler = Bundler::default();

    let mut group = c.benchmark_group("bundle many");
    group.sample_size(10);
    group.bench_function("uncached", |b| {
        b.iter(|| {
            let _ = bundler.bundle_workflow_code(&options).unwrap();
        });
    });
    group.bench_function("cached", |b| {
        let _ = bundler.get_cached_bundle(&options, false, false).unwrap();
        b.iter(|| {
            let _ = bundler.get_cached_bundle(&options, false, false).unwrap();
        });
    });

    let _ = std::fs::remove_dir_all(&dir);
}

criterion_group!(benches, bundle_many_benchmark);
criterion_main!(benches);
