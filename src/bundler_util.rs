//! Utilities for creating, mocking and testing throwaway workflow project
//! fixtures. Mirrors the ad hoc temp-directory fixtures integration tests
//! otherwise hand-roll, but reusable and self-cleaning.

use crate::{error::Result, options::BundleOptionsBuilder, BundleOptions};
use std::path::{Path, PathBuf};

/// A throwaway directory holding a workflow entrypoint and any number of
/// auxiliary source files, removed when dropped.
pub struct TempWorkflowProject {
    dir: tempfile::TempDir,
    workflows_path: PathBuf,
}

impl TempWorkflowProject {
    /// Creates a new fixture with `workflows.ts` containing `entrypoint_source`.
    pub fn new(entrypoint_source: impl AsRef<str>) -> Result<Self> {
        let dir = tempfile::tempdir().map_err(|e| {
            crate::error::BundleIoError::new(e, std::env::temp_dir())
        })?;
        let workflows_path = dir.path().join("workflows.ts");
        std::fs::write(&workflows_path, entrypoint_source.as_ref())
            .map_err(|e| crate::error::BundleIoError::new(e, &workflows_path))?;
        Ok(Self { dir, workflows_path })
    }

    /// Writes an additional file relative to the fixture root, creating
    /// parent directories as needed. Useful for populating `node_modules`
    /// fixtures or sibling modules the entrypoint imports.
    pub fn write_file(&self, relative: impl AsRef<Path>, contents: impl AsRef<str>) -> Result<PathBuf> {
        let path = self.dir.path().join(relative.as_ref());
        crate::utils::create_parent_dir_all(&path)?;
        std::fs::write(&path, contents.as_ref())
            .map_err(|e| crate::error::BundleIoError::new(e, &path))?;
        Ok(path)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn workflows_path(&self) -> &Path {
        &self.workflows_path
    }

    /// A [`BundleOptionsBuilder`] pre-seeded with this fixture's entrypoint.
    pub fn options_builder(&self) -> BundleOptionsBuilder {
        BundleOptions::builder(self.workflows_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_entrypoint_and_reports_its_path() {
        let project = TempWorkflowProject::new("export async function wf() {}").unwrap();
        assert!(project.workflows_path().exists());
        assert_eq!(project.workflows_path().file_name().unwrap(), "workflows.ts");
    }

    #[test]
    fn write_file_creates_parent_directories() {
        let project = TempWorkflowProject::new("export async function wf() {}").unwrap();
        let path = project.write_file("node_modules/helper/index.js", "module.exports = {};").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn options_builder_points_at_the_fixture_entrypoint() {
        let project = TempWorkflowProject::new("export async function wf() {}").unwrap();
        let options = project.options_builder().build().unwrap();
        assert_eq!(options.workflows_path, project.workflows_path());
    }
}
