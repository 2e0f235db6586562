//! Verbatim static asset stage
//!
//! Copies the static directory tree into the output, preserving relative
//! paths. Stylesheet sources are excluded by default since the style stage
//! consumes them instead. Implemented natively; there is nothing to shell
//! out to for a file copy.

use crate::pipeline::artifact::OutputArtifact;
use crate::pipeline::stage::{BuildStage, StageContext};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use glob::Pattern;
use std::path::{Path, PathBuf};

/// Stage producing one artifact per static file, logical name = path
/// relative to the source directory (extension included, template `{name}`).
#[derive(Debug)]
pub struct CopyStaticStage {
    source_dir: PathBuf,
    excludes: Vec<Pattern>,
}

impl CopyStaticStage {
    /// `source_dir` is relative to the project root; `excludes` are file
    /// name patterns (not full paths).
    pub fn new(source_dir: impl Into<PathBuf>, excludes: &[&str]) -> Self {
        let excludes = excludes
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();
        Self {
            source_dir: source_dir.into(),
            excludes,
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => self.excludes.iter().any(|p| p.matches(name)),
            None => false,
        }
    }

    fn collect(&self, dir: &Path, root: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("reading static directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path, root, files)?;
            } else if !self.is_excluded(&path) {
                files.push(path);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BuildStage for CopyStaticStage {
    fn name(&self) -> &'static str {
        "copy-static"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<Vec<OutputArtifact>> {
        let root = ctx.project_root.join(&self.source_dir);
        if !root.is_dir() {
            bail!("static directory {} not found", root.display());
        }

        let mut files = Vec::new();
        self.collect(&root, &root, &mut files)?;
        files.sort();

        let mut artifacts = Vec::with_capacity(files.len());
        for path in files {
            if ctx.is_cancelled() {
                bail!("cancelled");
            }
            let relative = path
                .strip_prefix(&root)
                .expect("collected under root")
                .to_path_buf();
            let payload = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string();
            artifacts.push(OutputArtifact::new(
                self.name(),
                relative.to_string_lossy().to_string(),
                extension,
                payload,
            ));
        }
        Ok(artifacts)
    }
}
