//! Deterministic artifact naming
//!
//! Resolves each stage's output naming template into a concrete path inside
//! the output directory. Recognized placeholders: `{name}` (the artifact's
//! logical name), `{hash}` (leading hex of the content hash, substituted in
//! production only so dev paths stay stable and readable), and `{ext}`.
//!
//! Two artifacts resolving to the same path within one build is a collision,
//! caught before anything is written so one stage's output can never
//! silently clobber another's.

use super::artifact::OutputArtifact;
use super::graph::StructuralError;
use crate::config::BuildMode;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const PLACEHOLDERS: [&str; 3] = ["name", "hash", "ext"];

/// Resolves output templates for one build mode and output directory.
#[derive(Debug, Clone)]
pub struct ArtifactNamer {
    output_dir: PathBuf,
    mode: BuildMode,
}

impl ArtifactNamer {
    pub fn new(output_dir: impl Into<PathBuf>, mode: BuildMode) -> Self {
        Self {
            output_dir: output_dir.into(),
            mode,
        }
    }

    /// Checks that a template only uses recognized placeholders. Run at
    /// pipeline construction so template typos fail before any stage does
    /// any work.
    pub fn validate_template(stage: &str, template: &str) -> Result<(), StructuralError> {
        for placeholder in placeholders_in(template) {
            if !PLACEHOLDERS.contains(&placeholder.as_str()) {
                return Err(StructuralError::Template {
                    stage: stage.to_string(),
                    template: template.to_string(),
                    placeholder,
                });
            }
        }
        Ok(())
    }

    /// Resolves `template` for `artifact` into a path under the output
    /// directory.
    pub fn resolve(
        &self,
        template: &str,
        artifact: &OutputArtifact,
    ) -> Result<PathBuf, StructuralError> {
        Self::validate_template(&artifact.source_stage, template)?;

        let rendered = match self.mode {
            // Dev builds keep stable, human-readable names: the hash and
            // one adjacent separator drop out of the template entirely.
            BuildMode::Development => strip_hash(template),
            BuildMode::Production => template.replace("{hash}", artifact.hash.short()),
        };

        let rendered = rendered
            .replace("{name}", &artifact.logical_name)
            .replace("{ext}", &artifact.extension);

        Ok(self.output_dir.join(rendered))
    }
}

/// Removes `{hash}` plus one adjacent `.` or `-` separator, so
/// `{name}.{hash}.{ext}` degrades to `{name}.{ext}` rather than
/// `{name}..{ext}`.
fn strip_hash(template: &str) -> String {
    for form in [".{hash}", "-{hash}", "{hash}.", "{hash}-", "{hash}"] {
        if template.contains(form) {
            return template.replacen(form, "", 1);
        }
    }
    template.to_string()
}

fn placeholders_in(template: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rest = &rest[open + 1..];
        if let Some(close) = rest.find('}') {
            found.push(rest[..close].to_string());
            rest = &rest[close + 1..];
        } else {
            break;
        }
    }
    found
}

/// Tracks resolved paths claimed during one build pass. Claiming the same
/// path twice is the collision error; the check happens before any write so
/// concurrent stages are guaranteed disjoint output paths.
#[derive(Debug, Default)]
pub struct PathClaims {
    claimed: HashMap<PathBuf, String>,
}

impl PathClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, path: &Path, stage: &str) -> Result<(), StructuralError> {
        if let Some(first) = self.claimed.get(path) {
            return Err(StructuralError::Collision {
                path: path.to_path_buf(),
                first: first.clone(),
                second: stage.to_string(),
            });
        }
        self.claimed.insert(path.to_path_buf(), stage.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str, ext: &str, payload: &[u8]) -> OutputArtifact {
        OutputArtifact::new("test-stage", name, ext, payload.to_vec())
    }

    #[test]
    fn test_development_omits_hash() {
        let namer = ArtifactNamer::new("/out", BuildMode::Development);
        let a = artifact("app", "js", b"one");
        let path = namer.resolve("{name}.{hash}.{ext}", &a).unwrap();
        assert_eq!(path, PathBuf::from("/out/app.js"));
    }

    #[test]
    fn test_development_path_independent_of_content() {
        let namer = ArtifactNamer::new("/out", BuildMode::Development);
        let a = artifact("app", "js", b"one");
        let b = artifact("app", "js", b"two");
        assert_eq!(
            namer.resolve("{name}.{hash}.{ext}", &a).unwrap(),
            namer.resolve("{name}.{hash}.{ext}", &b).unwrap()
        );
    }

    #[test]
    fn test_production_embeds_short_hash() {
        let namer = ArtifactNamer::new("/out", BuildMode::Production);
        let a = artifact("app", "js", b"one");
        let path = namer.resolve("{name}.{hash}.{ext}", &a).unwrap();
        let expected = format!("/out/app.{}.js", a.hash.short());
        assert_eq!(path, PathBuf::from(expected));
    }

    #[test]
    fn test_production_distinct_content_distinct_paths() {
        let namer = ArtifactNamer::new("/out", BuildMode::Production);
        let a = artifact("app", "js", b"one");
        let b = artifact("app", "js", b"two");
        assert_ne!(
            namer.resolve("{name}.{hash}.{ext}", &a).unwrap(),
            namer.resolve("{name}.{hash}.{ext}", &b).unwrap()
        );
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let result = ArtifactNamer::validate_template("s", "{name}.{chunk}.{ext}");
        assert!(matches!(
            result,
            Err(StructuralError::Template { placeholder, .. }) if placeholder == "chunk"
        ));
    }

    #[test]
    fn test_verbatim_template() {
        let namer = ArtifactNamer::new("/out", BuildMode::Development);
        let a = artifact("img/logo.png", "png", b"bytes");
        let path = namer.resolve("{name}", &a).unwrap();
        assert_eq!(path, PathBuf::from("/out/img/logo.png"));
    }

    #[test]
    fn test_collision_detected() {
        let mut claims = PathClaims::new();
        claims.claim(Path::new("/out/app.js"), "bundle-script").unwrap();
        let err = claims.claim(Path::new("/out/app.js"), "copy-static");
        assert!(matches!(
            err,
            Err(StructuralError::Collision { first, second, .. })
                if first == "bundle-script" && second == "copy-static"
        ));
    }

    #[test]
    fn test_distinct_paths_no_collision() {
        let mut claims = PathClaims::new();
        claims.claim(Path::new("/out/app.js"), "a").unwrap();
        claims.claim(Path::new("/out/app.css"), "b").unwrap();
    }
}
