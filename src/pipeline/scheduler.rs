//! Pipeline scheduler
//!
//! Walks the dependency graph and executes stages. Independent stages run
//! concurrently in worker tasks; a consumer starts only after all of its
//! producers completed successfully. A failed stage never aborts unrelated
//! work: its transitive dependents are reported as skipped with the root
//! cause, everything else runs to completion, and the pass ends with a
//! per-stage summary.
//!
//! Watch mode re-runs only the stages whose declared inputs intersect a
//! change batch, plus their transitive dependents. Rebuild passes are
//! serialized: a batch arriving mid-pass queues behind it.

use super::artifact::{ArtifactRecord, OutputArtifact};
use super::graph::{DependencyGraph, StructuralError};
use super::namer::{ArtifactNamer, PathClaims};
use super::stage::{StageContext, StageSpec};
use super::state::BuildState;
use super::watcher::{ChangeStream, WatchError};
use crate::config::BuildConfig;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Pushed to subscribers (the dev server) after a rebuild pass that updated
/// at least one artifact.
#[derive(Debug, Clone)]
pub struct RebuildNotice {
    /// Monotonic rebuild pass number within this watch session
    pub pass: u64,

    /// Stages that ran in the pass
    pub stages: Vec<String>,
}

/// Terminal status of one stage within a build pass.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded {
        artifacts: Vec<ArtifactRecord>,
        duration_ms: u64,
        /// Completion order within the pass; consumers always carry a
        /// higher sequence than their producers.
        sequence: u64,
    },
    Failed {
        message: String,
    },
    Skipped {
        /// Name of the originating failed stage
        cause: String,
    },
}

impl StageStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Succeeded { .. })
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Succeeded {
                artifacts,
                duration_ms,
                ..
            } => write!(f, "ok ({} artifacts, {}ms)", artifacts.len(), duration_ms),
            StageStatus::Failed { message } => write!(f, "failed: {}", message),
            StageStatus::Skipped { cause } => write!(f, "skipped (caused by '{}')", cause),
        }
    }
}

/// Per-stage outcome in topological order.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: String,
    pub status: StageStatus,
}

/// Result of one build pass.
#[derive(Debug, Clone, Serialize, Default)]
pub struct BuildReport {
    outcomes: Vec<StageOutcome>,
    pub total_ms: u64,
}

impl BuildReport {
    pub fn from_parts(outcomes: Vec<StageOutcome>, total_ms: u64) -> Self {
        Self { outcomes, total_ms }
    }

    pub fn outcomes(&self) -> &[StageOutcome] {
        &self.outcomes
    }

    pub fn status_of(&self, stage: &str) -> Option<&StageStatus> {
        self.outcomes
            .iter()
            .find(|o| o.stage == stage)
            .map(|o| &o.status)
    }

    /// True when every stage in the pass succeeded.
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_success())
    }

    /// True when at least one stage updated its artifacts.
    pub fn any_succeeded(&self) -> bool {
        self.outcomes.iter().any(|o| o.status.is_success())
    }

    pub fn artifact_count(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match &o.status {
                StageStatus::Succeeded { artifacts, .. } => artifacts.len(),
                _ => 0,
            })
            .sum()
    }
}

/// The build pipeline: configuration, stage graph, and artifact namer.
///
/// Constructed once per invocation. Construction validates the graph (cycle
/// check) and every output template, so structural errors surface before any
/// stage runs.
pub struct Pipeline {
    config: Arc<BuildConfig>,
    graph: DependencyGraph,
    namer: ArtifactNamer,
}

impl Pipeline {
    pub fn new(config: Arc<BuildConfig>, graph: DependencyGraph) -> Result<Self, StructuralError> {
        graph.topological_order()?;
        for spec in graph.stages() {
            ArtifactNamer::validate_template(spec.name(), spec.output_template())?;
        }
        let namer = ArtifactNamer::new(config.output_dir.clone(), config.mode);
        Ok(Self {
            config,
            graph,
            namer,
        })
    }

    /// Builds the default stage graph for the configuration and wraps it in
    /// a pipeline.
    pub fn from_config(config: Arc<BuildConfig>) -> Result<Self, StructuralError> {
        let graph = super::stages::default_graph(&config)?;
        Self::new(config, graph)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn config(&self) -> &Arc<BuildConfig> {
        &self.config
    }

    /// Runs every stage once, to completion, and returns the per-stage
    /// report. Only structural errors (cycle, template, collision) abort the
    /// pass; individual stage failures are collected in the report.
    pub async fn run_once(&self, state: &mut BuildState) -> Result<BuildReport, StructuralError> {
        let all: HashSet<String> = self
            .graph
            .stages()
            .map(|s| s.name().to_string())
            .collect();
        let (_hold, cancel) = watch::channel(false);
        self.run_subset(&all, state, &cancel).await
    }

    /// Runs the given subset of stages in topological order. Producers
    /// outside the subset are treated as up to date.
    pub async fn run_subset(
        &self,
        subset: &HashSet<String>,
        state: &mut BuildState,
        cancel: &watch::Receiver<bool>,
    ) -> Result<BuildReport, StructuralError> {
        let start = Instant::now();
        let order: Vec<Arc<StageSpec>> = self
            .graph
            .topological_order()?
            .into_iter()
            .filter(|s| subset.contains(s.name()))
            .collect();

        let mut statuses: HashMap<String, StageStatus> = HashMap::new();
        let mut scheduled: HashSet<String> = HashSet::new();
        let mut claims = PathClaims::new();
        let mut tasks: JoinSet<(String, anyhow::Result<Vec<OutputArtifact>>, u64)> = JoinSet::new();
        let mut task_names: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut sequence: u64 = 0;

        loop {
            // Propagate failures before scheduling: a stage with a failed or
            // skipped producer is skipped with the root cause.
            for spec in &order {
                let name = spec.name();
                if scheduled.contains(name) || statuses.contains_key(name) {
                    continue;
                }
                let producers: Vec<&str> = self
                    .graph
                    .producers_of(name)
                    .into_iter()
                    .filter(|p| subset.contains(*p))
                    .collect();

                if let Some(cause) = producers.iter().find_map(|p| match statuses.get(*p) {
                    Some(StageStatus::Failed { .. }) => Some((*p).to_string()),
                    Some(StageStatus::Skipped { cause }) => Some(cause.clone()),
                    _ => None,
                }) {
                    statuses.insert(name.to_string(), StageStatus::Skipped { cause });
                    continue;
                }

                let ready = producers
                    .iter()
                    .all(|p| matches!(statuses.get(*p), Some(s) if s.is_success()));
                if !ready {
                    continue;
                }

                if *cancel.borrow() {
                    statuses.insert(
                        name.to_string(),
                        StageStatus::Skipped {
                            cause: "shutdown".to_string(),
                        },
                    );
                    continue;
                }

                info!(stage = %name, "Starting stage");
                let ctx = StageContext::new(
                    self.config.project_root.clone(),
                    self.config.mode,
                    spec.resolve_inputs(&self.config.project_root),
                    self.config.stage_options(name).cloned(),
                    cancel.clone(),
                );
                let runner = spec.runner().clone();
                let stage_name = name.to_string();
                let handle = tasks.spawn(async move {
                    let stage_start = Instant::now();
                    let result = runner.execute(&ctx).await;
                    (
                        stage_name,
                        result,
                        stage_start.elapsed().as_millis() as u64,
                    )
                });
                task_names.insert(handle.id(), name.to_string());
                scheduled.insert(name.to_string());
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };

            match joined {
                Ok((id, (name, result, duration_ms))) => {
                    task_names.remove(&id);
                    match result {
                        Ok(artifacts) => {
                            sequence += 1;
                            match self.commit_stage(&name, artifacts, &mut claims, state)? {
                                Ok(records) => {
                                    info!(
                                        stage = %name,
                                        duration_ms,
                                        artifacts = records.len(),
                                        "Stage complete"
                                    );
                                    statuses.insert(
                                        name,
                                        StageStatus::Succeeded {
                                            artifacts: records,
                                            duration_ms,
                                            sequence,
                                        },
                                    );
                                }
                                Err(message) => {
                                    statuses.insert(name, StageStatus::Failed { message });
                                }
                            }
                        }
                        Err(e) => {
                            statuses.insert(
                                name,
                                StageStatus::Failed {
                                    message: format!("{:#}", e),
                                },
                            );
                        }
                    }
                }
                Err(join_error) => {
                    let name = task_names
                        .remove(&join_error.id())
                        .unwrap_or_else(|| "unknown".to_string());
                    statuses.insert(
                        name,
                        StageStatus::Failed {
                            message: format!("stage task aborted: {}", join_error),
                        },
                    );
                }
            }
        }

        let outcomes: Vec<StageOutcome> = order
            .iter()
            .map(|spec| StageOutcome {
                stage: spec.name().to_string(),
                status: statuses.remove(spec.name()).unwrap_or(StageStatus::Skipped {
                    cause: "shutdown".to_string(),
                }),
            })
            .collect();

        let report = BuildReport {
            outcomes,
            total_ms: start.elapsed().as_millis() as u64,
        };
        self.log_summary(&report);
        Ok(report)
    }

    /// Names, collision-checks, and writes one stage's artifacts. Naming and
    /// collision problems are structural (outer `Err` aborts the build);
    /// write failures are the stage's own failure (inner `Err`).
    #[allow(clippy::type_complexity)]
    fn commit_stage(
        &self,
        stage: &str,
        mut artifacts: Vec<OutputArtifact>,
        claims: &mut PathClaims,
        state: &mut BuildState,
    ) -> Result<Result<Vec<ArtifactRecord>, String>, StructuralError> {
        artifacts.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));

        let spec = self
            .graph
            .get(stage)
            .ok_or_else(|| StructuralError::UnknownStage(stage.to_string()))?;

        // Resolve and claim every path before writing anything.
        let mut resolved = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            let path = self.namer.resolve(spec.output_template(), artifact)?;
            claims.claim(&path, stage)?;
            resolved.push(path);
        }

        let mut records = Vec::with_capacity(artifacts.len());
        let mut written = HashSet::new();
        for (artifact, path) in artifacts.iter().zip(&resolved) {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return Ok(Err(format!(
                        "creating {}: {}",
                        parent.display(),
                        e
                    )));
                }
            }
            if let Err(e) = std::fs::write(path, &artifact.payload) {
                return Ok(Err(format!("writing {}: {}", path.display(), e)));
            }
            written.insert(path.clone());
            records.push(ArtifactRecord {
                logical_name: artifact.logical_name.clone(),
                path: path.clone(),
                hash: artifact.hash.clone(),
            });
        }

        // Prune paths this stage wrote on a previous pass but not this one.
        for stale in state.record_outputs(stage, written) {
            debug!(path = %stale.display(), "Pruning stale artifact");
            if let Err(e) = std::fs::remove_file(&stale) {
                warn!(path = %stale.display(), error = %e, "Failed to prune stale artifact");
            }
        }

        Ok(Ok(records))
    }

    fn log_summary(&self, report: &BuildReport) {
        for outcome in report.outcomes() {
            match &outcome.status {
                StageStatus::Failed { message } => {
                    warn!(stage = %outcome.stage, "Stage failed: {}", message);
                }
                StageStatus::Skipped { cause } => {
                    warn!(stage = %outcome.stage, cause = %cause, "Stage skipped");
                }
                StageStatus::Succeeded { .. } => {}
            }
        }
        info!(
            stages = report.outcomes().len(),
            artifacts = report.artifact_count(),
            total_ms = report.total_ms,
            success = report.success(),
            "Build pass complete"
        );
    }

    /// Stages whose declared inputs intersect the changed paths, plus the
    /// transitive closure of their dependents. Paths under the output
    /// directory are ignored so a build never re-triggers itself.
    pub fn stale_stages(&self, changed: &[PathBuf]) -> HashSet<String> {
        let mut direct = HashSet::new();
        for path in changed {
            if path.starts_with(&self.config.output_dir) {
                continue;
            }
            let relative = match path.strip_prefix(&self.config.project_root) {
                Ok(rel) => rel,
                Err(_) => path.as_path(),
            };
            for spec in self.graph.stages() {
                if spec.matches(relative) {
                    direct.insert(spec.name().to_string());
                }
            }
        }
        if direct.is_empty() {
            direct
        } else {
            self.graph.dependents_closure(&direct)
        }
    }

    /// Drops watcher-reported paths no stage cares about, so output-dir and
    /// staging churn never accrues fingerprints in the build state.
    fn watch_relevant(&self, paths: Vec<PathBuf>) -> Vec<PathBuf> {
        paths
            .into_iter()
            .filter(|path| {
                if path.starts_with(&self.config.output_dir) {
                    return false;
                }
                let relative = path
                    .strip_prefix(&self.config.project_root)
                    .unwrap_or(path.as_path());
                self.graph.stages().any(|spec| spec.matches(relative))
            })
            .collect()
    }

    /// Watch loop: full initial pass, then incremental passes on coalesced
    /// change batches until the shutdown signal fires. Structural errors
    /// abort the session; stage failures and watcher hiccups do not.
    pub async fn run_watch(
        &self,
        state: &mut BuildState,
        mut shutdown: watch::Receiver<bool>,
        reload: Option<broadcast::Sender<RebuildNotice>>,
    ) -> Result<(), WatchError> {
        let mut stream = ChangeStream::watch(
            &self.config.project_root,
            Duration::from_millis(self.config.watch_debounce_ms),
        )?;

        // Baseline fingerprints so the first events diff against reality.
        for spec in self.graph.stages() {
            state.seed(&spec.resolve_inputs(&self.config.project_root));
        }

        let report = self.run_once(state).await?;
        let mut pass: u64 = 0;
        if report.any_succeeded() {
            notify_reload(&reload, pass, &report);
        }
        info!(root = %self.config.project_root.display(), "Watching for changes");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Watch session shutting down");
                        return Ok(());
                    }
                }
                batch = stream.next_batch() => {
                    let Some(paths) = batch else {
                        return Err(WatchError::ChannelClosed);
                    };
                    let paths = self.watch_relevant(paths);
                    if paths.is_empty() {
                        continue;
                    }
                    let changed = state.changed(&paths);
                    if changed.is_empty() {
                        continue;
                    }
                    let stale = self.stale_stages(&changed);
                    if stale.is_empty() {
                        continue;
                    }
                    debug!(changed = changed.len(), stages = ?stale, "Incremental rebuild");
                    pass += 1;
                    let report = self.run_subset(&stale, state, &shutdown).await?;
                    if report.any_succeeded() {
                        notify_reload(&reload, pass, &report);
                    }
                }
            }
        }
    }
}

fn notify_reload(reload: &Option<broadcast::Sender<RebuildNotice>>, pass: u64, report: &BuildReport) {
    if let Some(tx) = reload {
        let notice = RebuildNotice {
            pass,
            stages: report
                .outcomes()
                .iter()
                .map(|o| o.stage.clone())
                .collect(),
        };
        // No receivers is fine: clients that reconnect later fetch current
        // files anyway.
        let _ = tx.send(notice);
    }
}
