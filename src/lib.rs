#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod error;

pub mod backend;
pub mod cache;
pub mod entrypoint;
pub mod graph;
pub mod importmap;
pub mod options;
pub mod orchestrator;
pub mod policy;
pub mod resolver;
pub mod scanner;
pub mod shim;
pub mod utils;
pub mod verify;

#[cfg(feature = "bundler-util")]
pub mod bundler_util;

pub use cache::{CacheStats, CacheStatsEntry, DiskCache, MemoryCache};
pub use entrypoint::{EntrypointRequest, ENTRY_SPECIFIER};
pub use error::{BundleError, ErrorContext, Result};
pub use graph::DependencyGraph;
pub use importmap::{ImportMap, InputFlavor};
pub use options::{BundleOptions, BundleOptionsBuilder, CacheOptions, Mode, SourceMapMode};
pub use orchestrator::{
    load_bundle, Bundler, BundleMetadata, BundlerBuilder, LoadBundleRequest, LoadBundleResult,
    WorkflowBundle,
};
pub use scanner::{Severity, Violation};
pub use verify::{verify_deterministic_build, DeterminismReport, LineDiff};

/// Builds a workflow bundle once, bypassing the process-wide caches
/// entirely. Equivalent to `Bundler::default().bundle_workflow_code(options)`.
pub fn bundle_workflow_code(options: &BundleOptions) -> Result<WorkflowBundle> {
    Bundler::default().bundle_workflow_code(options)
}
