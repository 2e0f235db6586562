//! Default stage set
//!
//! Builds the dependency graph for a standard web application: a wasm
//! module compiled from the crate sources, a bundled JS entry point that
//! references it, preprocessed stylesheets, and verbatim static assets.
//! Which adapter runs for which inputs is resolved here, once, at graph
//! construction; per-stage manifest tables override the commands, input
//! patterns, declared outputs, and naming templates.

pub mod command;
pub mod copy_static;

pub use command::{CommandOutput, ExternalCommandStage};
pub use copy_static::CopyStaticStage;

use super::graph::{DependencyGraph, StructuralError};
use super::stage::StageSpec;
use crate::config::BuildConfig;
use std::path::PathBuf;
use std::sync::Arc;

pub const COMPILE_NATIVE: &str = "compile-native";
pub const BUNDLE_SCRIPT: &str = "bundle-script";
pub const PREPROCESS_STYLE: &str = "preprocess-style";
pub const COPY_STATIC: &str = "copy-static";

/// Intermediate files external commands write before the scheduler names
/// and places the real artifacts.
const STAGING_DIR: &str = ".sitepack";

const HASHED_TEMPLATE: &str = "{name}.{hash}.{ext}";

/// Constructs the default four-stage graph with the single ordering edge:
/// the script bundle consumes the compiled wasm module.
pub fn default_graph(config: &BuildConfig) -> Result<DependencyGraph, StructuralError> {
    let mut graph = DependencyGraph::new();
    graph.add_stage(compile_native(config)?)?;
    graph.add_stage(bundle_script(config)?)?;
    graph.add_stage(preprocess_style(config)?)?;
    graph.add_stage(copy_static(config)?)?;
    graph.add_edge(COMPILE_NATIVE, BUNDLE_SCRIPT)?;
    Ok(graph)
}

fn compile_native(config: &BuildConfig) -> Result<StageSpec, StructuralError> {
    let opts = StageOverrides::for_stage(config, COMPILE_NATIVE);
    let stage = ExternalCommandStage::new(
        COMPILE_NATIVE,
        opts.command("wasm-pack"),
        opts.args(&["build", "--no-typescript", "--target", "web"]),
        opts.outputs(&[("pkg/app_bg.wasm", "app")]),
    );
    StageSpec::new(
        COMPILE_NATIVE,
        opts.inputs(&["src/**/*.rs", "Cargo.toml"]),
        opts.template(HASHED_TEMPLATE),
        Arc::new(stage),
    )
}

fn bundle_script(config: &BuildConfig) -> Result<StageSpec, StructuralError> {
    let opts = StageOverrides::for_stage(config, BUNDLE_SCRIPT);
    let entry = config.entry_point.to_string_lossy().to_string();
    let bundle_file = format!("{}/bundle.js", STAGING_DIR);
    let stage = ExternalCommandStage::new(
        BUNDLE_SCRIPT,
        opts.command("esbuild"),
        opts.args(&[
            &entry,
            "--bundle",
            &format!("--outfile={}", bundle_file),
        ]),
        opts.outputs(&[(bundle_file.as_str(), "app")]),
    );
    StageSpec::new(
        BUNDLE_SCRIPT,
        opts.inputs(&[&entry, "js/**/*.js"]),
        opts.template(HASHED_TEMPLATE),
        Arc::new(stage),
    )
}

fn preprocess_style(config: &BuildConfig) -> Result<StageSpec, StructuralError> {
    let opts = StageOverrides::for_stage(config, PREPROCESS_STYLE);
    let css_file = format!("{}/styles.css", STAGING_DIR);
    let stage = ExternalCommandStage::new(
        PREPROCESS_STYLE,
        opts.command("sass"),
        opts.args(&["static/styles.scss", &css_file, "--no-source-map"]),
        opts.outputs(&[(css_file.as_str(), "styles")]),
    );
    StageSpec::new(
        PREPROCESS_STYLE,
        opts.inputs(&["static/**/*.scss", "static/**/*.sass"]),
        opts.template(HASHED_TEMPLATE),
        Arc::new(stage),
    )
}

fn copy_static(config: &BuildConfig) -> Result<StageSpec, StructuralError> {
    let opts = StageOverrides::for_stage(config, COPY_STATIC);
    let source = opts
        .string("source")
        .unwrap_or_else(|| "static".to_string());
    let stage = CopyStaticStage::new(source, &["*.scss", "*.sass"]);
    // Stylesheet sources under static/ belong to preprocess-style; keeping
    // them out of this stage's inputs keeps stylesheet edits from re-running
    // the copy in watch mode.
    StageSpec::new(
        COPY_STATIC,
        opts.inputs(&["static/**/*"]),
        opts.template("{name}"),
        Arc::new(stage),
    )?
    .with_excludes(vec!["**/*.scss".to_string(), "**/*.sass".to_string()])
}

/// Thin reader over a stage's opaque manifest table.
struct StageOverrides<'a> {
    table: Option<&'a toml::Value>,
}

impl<'a> StageOverrides<'a> {
    fn for_stage(config: &'a BuildConfig, stage: &str) -> Self {
        Self {
            table: config.stage_options(stage),
        }
    }

    fn string(&self, key: &str) -> Option<String> {
        self.table
            .and_then(|t| t.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    fn string_array(&self, key: &str) -> Option<Vec<String>> {
        self.table.and_then(|t| t.get(key)).and_then(|v| {
            v.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str())
                    .map(str::to_string)
                    .collect()
            })
        })
    }

    fn command(&self, default: &str) -> String {
        self.string("command").unwrap_or_else(|| default.to_string())
    }

    fn args(&self, default: &[&str]) -> Vec<String> {
        self.string_array("args")
            .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
    }

    fn inputs(&self, default: &[&str]) -> Vec<String> {
        self.string_array("inputs")
            .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
    }

    fn template(&self, default: &str) -> String {
        self.string("template").unwrap_or_else(|| default.to_string())
    }

    /// `outputs = [{ file = "...", name = "..." }, ...]`
    fn outputs(&self, default: &[(&str, &str)]) -> Vec<CommandOutput> {
        let declared = self.table.and_then(|t| t.get("outputs")).and_then(|v| {
            v.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let file = item.get("file")?.as_str()?;
                        let name = item
                            .get("name")
                            .and_then(|n| n.as_str())
                            .map(str::to_string)
                            .or_else(|| {
                                PathBuf::from(file)
                                    .file_stem()
                                    .map(|s| s.to_string_lossy().to_string())
                            })?;
                        Some(CommandOutput::new(file, name))
                    })
                    .collect::<Vec<_>>()
            })
        });
        declared.unwrap_or_else(|| {
            default
                .iter()
                .map(|(file, name)| CommandOutput::new(*file, *name))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::Path;

    fn config(manifest_stages: &str) -> BuildConfig {
        let raw = format!("entry = \"index.js\"\n{}", manifest_stages);
        let temp = tempfile::TempDir::new().unwrap();
        let manifest = temp.path().join("sitepack.toml");
        std::fs::write(&manifest, raw).unwrap();
        BuildConfig::load(&manifest).unwrap()
    }

    #[test]
    #[serial]
    fn test_default_graph_shape() {
        let config = config("");
        let graph = default_graph(&config).unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.producers_of(BUNDLE_SCRIPT), vec![COMPILE_NATIVE]);
        assert!(graph.producers_of(PREPROCESS_STYLE).is_empty());
        assert!(graph.producers_of(COPY_STATIC).is_empty());

        let order = graph.topological_order().unwrap();
        let pos = |n: &str| order.iter().position(|s| s.name() == n).unwrap();
        assert!(pos(COMPILE_NATIVE) < pos(BUNDLE_SCRIPT));
    }

    #[test]
    #[serial]
    fn test_default_input_patterns() {
        let config = config("");
        let graph = default_graph(&config).unwrap();
        let style = graph.get(PREPROCESS_STYLE).unwrap();
        assert!(style.matches(Path::new("static/styles.scss")));
        assert!(!style.matches(Path::new("src/lib.rs")));

        let native = graph.get(COMPILE_NATIVE).unwrap();
        assert!(native.matches(Path::new("src/lib.rs")));
        assert!(native.matches(Path::new("Cargo.toml")));
    }

    #[test]
    #[serial]
    fn test_stylesheet_sources_are_not_copy_static_inputs() {
        let config = config("");
        let graph = default_graph(&config).unwrap();
        let copy = graph.get(COPY_STATIC).unwrap();
        assert!(copy.matches(Path::new("static/index.html")));
        assert!(copy.matches(Path::new("static/img/logo.png")));
        assert!(!copy.matches(Path::new("static/styles.scss")));
        assert!(!copy.matches(Path::new("static/theme/dark.sass")));
    }

    #[test]
    #[serial]
    fn test_manifest_overrides_template_and_inputs() {
        let config = config(
            r#"
            [stages.bundle-script]
            template = "{name}.{ext}"
            inputs = ["app/main.js"]
            command = "webpack"
            "#,
        );
        let graph = default_graph(&config).unwrap();
        let bundle = graph.get(BUNDLE_SCRIPT).unwrap();
        assert_eq!(bundle.output_template(), "{name}.{ext}");
        assert!(bundle.matches(Path::new("app/main.js")));
        assert!(!bundle.matches(Path::new("index.js")));
    }

    #[test]
    #[serial]
    fn test_manifest_overrides_outputs() {
        let config = config(
            r#"
            [stages.compile-native]
            outputs = [{ file = "pkg/site_bg.wasm", name = "site" }]
            "#,
        );
        // construction succeeds; the declared output surfaces at run time
        let graph = default_graph(&config).unwrap();
        assert!(graph.get(COMPILE_NATIVE).is_some());
    }
}
