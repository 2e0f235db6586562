//! External-command stage adapter
//!
//! The orchestrator does not reimplement wasm compilation, Sass, or JS
//! bundling; it drives external tooling through a narrow contract: run a
//! configured command in the project root, then collect the declared output
//! files as in-memory artifacts. A non-zero exit status fails the stage with
//! the tool's own stderr as the diagnostic.

use crate::pipeline::artifact::OutputArtifact;
use crate::pipeline::stage::{BuildStage, StageContext};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// One file the external command is expected to leave behind, relative to
/// the project root, and the logical artifact name it maps to.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub file: PathBuf,
    pub logical_name: String,
}

impl CommandOutput {
    pub fn new(file: impl Into<PathBuf>, logical_name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            logical_name: logical_name.into(),
        }
    }
}

/// Stage that shells out to a build tool (wasm-pack, esbuild, sass, ...).
#[derive(Debug)]
pub struct ExternalCommandStage {
    stage_name: &'static str,
    program: String,
    args: Vec<String>,
    outputs: Vec<CommandOutput>,
}

impl ExternalCommandStage {
    pub fn new(
        stage_name: &'static str,
        program: impl Into<String>,
        args: Vec<String>,
        outputs: Vec<CommandOutput>,
    ) -> Self {
        Self {
            stage_name,
            program: program.into(),
            args,
            outputs,
        }
    }
}

#[async_trait]
impl BuildStage for ExternalCommandStage {
    fn name(&self) -> &'static str {
        self.stage_name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<Vec<OutputArtifact>> {
        if ctx.is_cancelled() {
            bail!("cancelled before execution");
        }

        // Tools like sass won't create missing parent directories for their
        // output paths.
        for output in &self.outputs {
            if let Some(parent) = output.file.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(ctx.project_root.join(parent)).with_context(|| {
                        format!("creating staging directory {}", parent.display())
                    })?;
                }
            }
        }

        debug!(
            stage = %self.stage_name,
            command = %self.program,
            args = ?self.args,
            "Running external command"
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&ctx.project_root)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("spawning '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        if ctx.is_cancelled() {
            bail!("cancelled after command completed");
        }

        let mut artifacts = Vec::with_capacity(self.outputs.len());
        for declared in &self.outputs {
            let path = ctx.project_root.join(&declared.file);
            let payload = tokio::fs::read(&path).await.with_context(|| {
                format!(
                    "'{}' did not produce declared output {}",
                    self.program,
                    declared.file.display()
                )
            })?;
            let extension = declared
                .file
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string();
            artifacts.push(OutputArtifact::new(
                self.stage_name,
                declared.logical_name.clone(),
                extension,
                payload,
            ));
        }
        Ok(artifacts)
    }
}
