pub mod artifact;
pub mod graph;
pub mod namer;
pub mod scheduler;
pub mod stage;
pub mod stages;
pub mod state;
pub mod watcher;

pub use artifact::{ContentHash, OutputArtifact};
pub use graph::{DependencyGraph, StructuralError};
pub use namer::ArtifactNamer;
pub use scheduler::{BuildReport, Pipeline, RebuildNotice, StageStatus};
pub use stage::{BuildStage, StageContext, StageSpec};
pub use state::BuildState;
pub use watcher::{ChangeStream, WatchError};
