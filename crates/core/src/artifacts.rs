//! Discovers files produced by a run via a before/after diff of the
//! operation's output directory.
//!
//! The wrapped CLI places artifacts under `<project>/<name>/...`; the
//! scanner snapshots that directory immediately before spawn and reports
//! every file that appeared since, lexically sorted. A directory that
//! cannot be read yields an empty list plus a warning, never an error.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::operation::OperationRequest;

/// Result of the post-run directory diff.
#[derive(Debug, Clone, Default)]
pub struct ArtifactScan {
    /// New file paths, relative to the scanner base, lexically sorted.
    pub artifacts: Vec<String>,
    /// Set when the output directory could not be read.
    pub warning: Option<String>,
}

/// Scans the output-directory convention of the wrapped CLI.
#[derive(Debug, Clone)]
pub struct ArtifactScanner {
    base: Option<PathBuf>,
}

impl ArtifactScanner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            base: config.working_dir.clone(),
        }
    }

    /// The output directory for `request`: `<project>[/<name>]`, with the
    /// per-operation `runs/<mode>` default when no project is named.
    pub fn output_dir(&self, request: &OperationRequest) -> PathBuf {
        let project = request
            .params
            .project
            .clone()
            .unwrap_or_else(|| request.operation.default_project());
        let mut dir = match &self.base {
            Some(base) => base.join(project),
            None => PathBuf::from(project),
        };
        if let Some(name) = &request.params.name {
            dir.push(name);
        }
        dir
    }

    /// Point-in-time set of files under `dir`. A missing or unreadable
    /// directory snapshots as empty: everything readable afterwards will
    /// be reported as new.
    pub fn snapshot(&self, dir: &Path) -> HashSet<PathBuf> {
        let mut files = Vec::new();
        let _ = walk_files(dir, &mut files);
        files.into_iter().collect()
    }

    /// Every file under `dir` not present in `snapshot`, sorted.
    pub fn scan_new(&self, dir: &Path, snapshot: &HashSet<PathBuf>) -> ArtifactScan {
        if !dir.exists() {
            return ArtifactScan::default();
        }

        let mut files = Vec::new();
        if let Err(err) = walk_files(dir, &mut files) {
            return ArtifactScan {
                artifacts: Vec::new(),
                warning: Some(format!(
                    "could not read output directory '{}': {err}",
                    dir.display()
                )),
            };
        }

        let mut artifacts: Vec<String> = files
            .into_iter()
            .filter(|p| !snapshot.contains(p))
            .map(|p| self.display_path(&p))
            .collect();
        artifacts.sort();

        ArtifactScan {
            artifacts,
            warning: None,
        }
    }

    /// Render a path relative to the scanner base where possible.
    fn display_path(&self, path: &Path) -> String {
        match &self.base {
            Some(base) => path
                .strip_prefix(base)
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned(),
            None => path.to_string_lossy().into_owned(),
        }
    }
}

/// Recursively collect every regular file under `dir`.
fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
