//! sitepack - build orchestrator for wasm-based web applications
//!
//! This library assembles a deployable web application from heterogeneous
//! inputs: a natively-compiled wasm module, Sass/SCSS stylesheets, verbatim
//! static assets, and a bundled JavaScript entry point. A declarative
//! manifest describes the inputs; sitepack turns it into a single output
//! directory of self-consistent artifacts and, during development, serves
//! that directory with live reload.
//!
//! # Core Concepts
//!
//! - **Stage**: a single build transformation with declared input patterns
//!   and an output naming template. The transformation itself is an external
//!   tool behind a narrow contract; sitepack only orchestrates.
//! - **Dependency Graph**: ordering constraints between stages (the wasm
//!   module must exist before the script bundle can reference it).
//! - **Scheduler**: runs stages in topological order, concurrently where no
//!   edge orders them, and in watch mode re-runs only stages whose inputs
//!   changed.
//! - **Artifact Namer**: deterministic output paths, with content-hash
//!   cache busting in production builds only.
//! - **Dev Server**: serves the output directory locally and pushes reload
//!   notifications to connected browsers after each completed rebuild.
//!
//! # Example Usage
//!
//! ```ignore
//! use sitepack::{BuildConfig, Pipeline, BuildState};
//! use std::sync::Arc;
//!
//! async fn build() -> anyhow::Result<()> {
//!     let config = Arc::new(BuildConfig::load("sitepack.toml")?);
//!     let pipeline = Pipeline::from_config(config)?;
//!
//!     let mut state = BuildState::new();
//!     let report = pipeline.run_once(&mut state).await?;
//!
//!     for outcome in report.outcomes() {
//!         println!("{}: {}", outcome.stage, outcome.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`config`]: the build manifest and its validation
//! - [`pipeline`]: dependency graph, scheduler, artifact naming, stages
//! - [`server`]: the development HTTP server with live reload
//! - [`cli`]: command-line surface

pub mod cli;
pub mod config;
pub mod pipeline;
pub mod server;

// Re-export key types for convenient access
pub use config::{BuildConfig, BuildMode, ConfigError, DevServerConfig};
pub use pipeline::artifact::{ContentHash, OutputArtifact};
pub use pipeline::graph::{DependencyGraph, StructuralError};
pub use pipeline::scheduler::{BuildReport, Pipeline, RebuildNotice, StageStatus};
pub use pipeline::stage::{BuildStage, StageContext, StageSpec};
pub use pipeline::state::BuildState;
pub use pipeline::watcher::WatchError;
pub use server::{DevServer, ServerError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
