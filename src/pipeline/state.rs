//! Watch-session build state
//!
//! Tracks a modification fingerprint per input path so the scheduler can
//! tell real changes from redundant watcher events, and remembers each
//! stage's previously-written output paths so shrunken output sets get
//! pruned instead of rotting in the output directory.
//!
//! Lives for the duration of one watch session and is owned exclusively by
//! the scheduler; it resets on process restart.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Cheap staleness fingerprint: mtime plus byte length. Content hashes are
/// still computed for artifacts, so staleness stays cheap while outputs stay
/// verifiable.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    mtime: SystemTime,
    len: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            mtime: meta.modified().ok()?,
            len: meta.len(),
        })
    }
}

/// Per-session mutable state for incremental rebuilds.
#[derive(Debug, Default)]
pub struct BuildState {
    fingerprints: HashMap<PathBuf, Fingerprint>,
    outputs: HashMap<String, HashSet<PathBuf>>,
}

impl BuildState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refreshes fingerprints for the given paths and returns the subset
    /// whose fingerprint actually changed (including paths that appeared or
    /// disappeared). Paths with an unchanged fingerprint are dropped, which
    /// coalesces editor write-then-touch noise into nothing.
    pub fn changed(&mut self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for path in paths {
            let current = Fingerprint::of(path);
            let previous = self.fingerprints.get(path);
            let is_changed = match (&current, previous) {
                (Some(now), Some(before)) => now != before,
                (Some(_), None) | (None, Some(_)) => true,
                (None, None) => false,
            };
            if is_changed {
                match current {
                    Some(fp) => {
                        self.fingerprints.insert(path.clone(), fp);
                    }
                    None => {
                        self.fingerprints.remove(path);
                    }
                }
                changed.push(path.clone());
            }
        }
        changed
    }

    /// Seeds fingerprints without reporting changes, used after the initial
    /// full build so the first watcher events diff against a real baseline.
    pub fn seed(&mut self, paths: &[PathBuf]) {
        for path in paths {
            if let Some(fp) = Fingerprint::of(path) {
                self.fingerprints.insert(path.clone(), fp);
            }
        }
    }

    /// Records the output paths a stage just wrote and returns paths the
    /// stage wrote on a previous pass but not this one. The caller prunes
    /// those from the output directory.
    pub fn record_outputs(&mut self, stage: &str, written: HashSet<PathBuf>) -> Vec<PathBuf> {
        let stale = match self.outputs.get(stage) {
            Some(previous) => previous.difference(&written).cloned().collect(),
            None => Vec::new(),
        };
        self.outputs.insert(stage.to_string(), written);
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    #[test]
    fn test_first_sighting_is_a_change() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.scss");
        std::fs::write(&file, "body {}").unwrap();

        let mut state = BuildState::new();
        let changed = state.changed(&[file.clone()]);
        assert_eq!(changed, vec![file]);
    }

    #[test]
    fn test_unchanged_path_not_reported_twice() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.scss");
        std::fs::write(&file, "body {}").unwrap();

        let mut state = BuildState::new();
        state.changed(&[file.clone()]);
        assert!(state.changed(&[file]).is_empty());
    }

    #[test]
    fn test_mtime_bump_reported() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.scss");
        std::fs::write(&file, "body {}").unwrap();

        let mut state = BuildState::new();
        state.changed(&[file.clone()]);

        set_file_mtime(&file, FileTime::from_unix_time(2_000_000_000, 0)).unwrap();
        assert_eq!(state.changed(&[file.clone()]), vec![file]);
    }

    #[test]
    fn test_seed_suppresses_initial_change() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.scss");
        std::fs::write(&file, "body {}").unwrap();

        let mut state = BuildState::new();
        state.seed(&[file.clone()]);
        assert!(state.changed(&[file]).is_empty());
    }

    #[test]
    fn test_deleted_path_reported_once() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.scss");
        std::fs::write(&file, "body {}").unwrap();

        let mut state = BuildState::new();
        state.changed(&[file.clone()]);

        std::fs::remove_file(&file).unwrap();
        assert_eq!(state.changed(&[file.clone()]), vec![file.clone()]);
        assert!(state.changed(&[file]).is_empty());
    }

    #[test]
    fn test_record_outputs_reports_shrinkage() {
        let mut state = BuildState::new();
        let a = PathBuf::from("/out/a.css");
        let b = PathBuf::from("/out/b.css");

        let stale = state.record_outputs("preprocess-style", [a.clone(), b.clone()].into());
        assert!(stale.is_empty());

        let stale = state.record_outputs("preprocess-style", [a].into());
        assert_eq!(stale, vec![b]);
    }
}
