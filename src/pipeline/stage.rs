//! Stage contract
//!
//! A stage is a unit of work with declared inputs, a declared output naming
//! template, and an execution function. The transformation a stage performs
//! (wasm compilation, Sass preprocessing, JS bundling) lives in external
//! tooling; the trait here is the narrow contract the orchestrator consumes.

use super::artifact::OutputArtifact;
use super::graph::StructuralError;
use crate::config::BuildMode;
use anyhow::Result;
use async_trait::async_trait;
use glob::Pattern;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Execution function of a stage.
///
/// Implementations must be side-effect-isolated: they read their resolved
/// inputs, return artifacts as in-memory values, and leave the write-to-disk
/// step to the scheduler. Long-running implementations should check
/// `ctx.is_cancelled()` between discrete units of work.
#[async_trait]
pub trait BuildStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &StageContext) -> Result<Vec<OutputArtifact>>;
}

/// Everything a stage execution may look at. Built fresh per run by the
/// scheduler.
#[derive(Clone)]
pub struct StageContext {
    /// Project root all relative paths resolve against
    pub project_root: PathBuf,

    /// Build mode for mode-dependent stage behavior
    pub mode: BuildMode,

    /// Input files resolved from the stage's declared patterns, sorted
    pub inputs: Vec<PathBuf>,

    /// Opaque option table from the manifest, passed through verbatim
    pub options: Option<toml::Value>,

    /// Cooperative cancellation signal for the watch session
    cancel: watch::Receiver<bool>,
}

impl StageContext {
    pub fn new(
        project_root: PathBuf,
        mode: BuildMode,
        inputs: Vec<PathBuf>,
        options: Option<toml::Value>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            project_root,
            mode,
            inputs,
            options,
            cancel,
        }
    }

    /// True once the watch session's shutdown signal fired.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// A registered stage: unique name, input patterns, output template, and the
/// execution function. Registered once at pipeline construction and
/// immutable thereafter.
pub struct StageSpec {
    name: String,
    patterns: Vec<Pattern>,
    pattern_sources: Vec<String>,
    excludes: Vec<Pattern>,
    exclude_sources: Vec<String>,
    output_template: String,
    runner: Arc<dyn BuildStage>,
}

impl StageSpec {
    /// Compiles the input patterns eagerly so that a bad glob is a
    /// construction-time structural error, not a runtime surprise.
    pub fn new(
        name: impl Into<String>,
        input_patterns: Vec<String>,
        output_template: impl Into<String>,
        runner: Arc<dyn BuildStage>,
    ) -> Result<Self, StructuralError> {
        let name = name.into();
        let mut patterns = Vec::with_capacity(input_patterns.len());
        for source in &input_patterns {
            let pattern = Pattern::new(source).map_err(|e| StructuralError::Pattern {
                stage: name.clone(),
                pattern: source.clone(),
                message: e.to_string(),
            })?;
            patterns.push(pattern);
        }
        Ok(Self {
            name,
            patterns,
            pattern_sources: input_patterns,
            excludes: Vec::new(),
            exclude_sources: Vec::new(),
            output_template: output_template.into(),
            runner,
        })
    }

    /// Input paths matching any of these patterns are ignored, for both
    /// input resolution and watch staleness. A stage that skips a subset of
    /// the files its input globs sweep up must declare that subset here, or
    /// changes to those files would re-run it for nothing.
    pub fn with_excludes(mut self, patterns: Vec<String>) -> Result<Self, StructuralError> {
        for source in &patterns {
            let pattern = Pattern::new(source).map_err(|e| StructuralError::Pattern {
                stage: self.name.clone(),
                pattern: source.clone(),
                message: e.to_string(),
            })?;
            self.excludes.push(pattern);
        }
        self.exclude_sources.extend(patterns);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_template(&self) -> &str {
        &self.output_template
    }

    pub fn runner(&self) -> &Arc<dyn BuildStage> {
        &self.runner
    }

    /// Whether a path (relative to the project root) matches any declared
    /// input pattern and none of the exclude patterns. Drives watch-mode
    /// staleness.
    pub fn matches(&self, relative: &Path) -> bool {
        if self.excludes.iter().any(|p| p.matches_path(relative)) {
            return false;
        }
        self.patterns.iter().any(|p| p.matches_path(relative))
    }

    /// Expands the declared patterns under `root` into concrete input files,
    /// sorted for deterministic ordering.
    pub fn resolve_inputs(&self, root: &Path) -> Vec<PathBuf> {
        let mut inputs = Vec::new();
        for source in &self.pattern_sources {
            let absolute = root.join(source);
            let Some(pattern) = absolute.to_str() else {
                continue;
            };
            if let Ok(entries) = glob::glob(pattern) {
                inputs.extend(entries.flatten().filter(|p| p.is_file()));
            }
        }
        inputs.retain(|p| {
            let relative = p.strip_prefix(root).unwrap_or(p);
            !self.excludes.iter().any(|x| x.matches_path(relative))
        });
        inputs.sort();
        inputs.dedup();
        inputs
    }
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("patterns", &self.pattern_sources)
            .field("excludes", &self.exclude_sources)
            .field("output_template", &self.output_template)
            .finish()
    }
}
