//! Error types produced by the bundler pipeline.

use std::{fmt, io, path::PathBuf};

/// A (line, column) location of a violation inside a source file.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceSite {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

/// Structured context attached to an error, matching the wire contract's
/// `context` object (`modules`, `details`, `hint`, `dependency_chain`, `violations`).
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependency_chain: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<crate::scanner::Violation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sites: Vec<SourceSite>,
}

impl ErrorContext {
    pub fn with_modules(mut self, modules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.modules = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_chain(mut self, chain: Vec<String>) -> Self {
        self.dependency_chain = chain;
        self
    }

    pub fn with_sites(mut self, sites: Vec<SourceSite>) -> Self {
        self.sites = sites;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// A single fatal or infrastructure error produced while building a bundle.
///
/// Every variant maps 1:1 to a wire error code from the external contract.
#[derive(thiserror::Error, Debug)]
pub enum BundleError {
    #[error("one or more forbidden modules were found in the workflow bundle")]
    ForbiddenModules { ctx: ErrorContext },

    #[error("dynamic `import()` calls are not permitted in workflow code")]
    DynamicImport { ctx: ErrorContext },

    #[error("failed to resolve a module specifier")]
    ResolutionFailed { ctx: ErrorContext },

    #[error("a module ignored during bundling was referenced at runtime")]
    IgnoredModuleUsed { ctx: ErrorContext },

    #[error("invalid bundle configuration")]
    ConfigInvalid { ctx: ErrorContext },

    #[error("the underlying bundler failed to produce output")]
    BuildFailed { ctx: ErrorContext },

    #[error("the workflow entrypoint file does not exist")]
    EntrypointNotFound { ctx: ErrorContext },

    #[error(transparent)]
    Io(#[from] BundleIoError),

    #[error("failed to (de)serialize: {0}")]
    Json(#[from] serde_json::Error),

    #[error("source is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl BundleError {
    /// The wire error code, e.g. `FORBIDDEN_MODULES`.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ForbiddenModules { .. } => "FORBIDDEN_MODULES",
            Self::DynamicImport { .. } => "DYNAMIC_IMPORT",
            Self::ResolutionFailed { .. } => "RESOLUTION_FAILED",
            Self::IgnoredModuleUsed { .. } => "IGNORED_MODULE_USED",
            Self::ConfigInvalid { .. } => "CONFIG_INVALID",
            Self::BuildFailed { .. } => "BUILD_FAILED",
            Self::EntrypointNotFound { .. } => "ENTRYPOINT_NOT_FOUND",
            Self::Io(_) => "BUILD_FAILED",
            Self::Json(_) => "BUILD_FAILED",
            Self::Utf8(_) => "BUILD_FAILED",
        }
    }

    /// A single actionable hint for this error code, so callers never have to
    /// guess what to try next.
    pub fn hint(&self) -> &'static str {
        match self.code() {
            "FORBIDDEN_MODULES" => {
                "remove the import, move the logic to an activity, or add it to `ignore_modules` \
                 if the reference is dead code"
            }
            "DYNAMIC_IMPORT" => {
                "replace the dynamic `import()` with a static import so the dependency graph is \
                 resolvable at build time"
            }
            "RESOLUTION_FAILED" => "check the specifier spelling and any configured import map",
            "IGNORED_MODULE_USED" => {
                "the module was ignored at build time; remove the runtime reference or drop it \
                 from `ignore_modules`"
            }
            "CONFIG_INVALID" => "remove the conflicting option; the orchestrator enforces it",
            "BUILD_FAILED" => "inspect the wrapped bundler error for the underlying cause",
            "ENTRYPOINT_NOT_FOUND" => "check `workflows_path` points at an existing file",
            _ => "",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::ForbiddenModules { ctx }
            | Self::DynamicImport { ctx }
            | Self::ResolutionFailed { ctx }
            | Self::IgnoredModuleUsed { ctx }
            | Self::ConfigInvalid { ctx }
            | Self::BuildFailed { ctx }
            | Self::EntrypointNotFound { ctx } => Some(ctx),
            Self::Io(_) | Self::Json(_) | Self::Utf8(_) => None,
        }
    }

    pub fn config_invalid(details: impl Into<String>) -> Self {
        Self::ConfigInvalid { ctx: ErrorContext::default().with_details(details) }
    }

    pub fn build_failed(details: impl Into<String>) -> Self {
        Self::BuildFailed { ctx: ErrorContext::default().with_details(details) }
    }

    pub fn entrypoint_not_found(path: impl Into<String>) -> Self {
        Self::EntrypointNotFound { ctx: ErrorContext::default().with_details(path.into()) }
    }
}

/// An [`io::Error`] paired with the path that caused it, so messages stay actionable.
#[derive(Debug)]
pub struct BundleIoError {
    pub io: io::Error,
    pub path: PathBuf,
}

impl BundleIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }
}

impl fmt::Display for BundleIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.io)
    }
}

impl std::error::Error for BundleIoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.io)
    }
}

pub type Result<T, E = BundleError> = std::result::Result<T, E>;
