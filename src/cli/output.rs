//! Build report formatting
//!
//! Renders a [`BuildReport`] as machine-readable JSON or human-readable
//! text. The human format mirrors the topological order of the pass so a
//! failed stage appears before the stages it caused to be skipped.
//!
//! # Example
//!
//! ```ignore
//! use sitepack::cli::output::{OutputFormat, OutputFormatter};
//!
//! let formatter = OutputFormatter::new(OutputFormat::Human);
//! println!("{}", formatter.format_report(&report)?);
//! ```

use anyhow::{Context, Result};

use crate::pipeline::scheduler::{BuildReport, StageStatus};

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// Human-readable formatted text
    Human,
}

/// Formatter for build reports
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_report(&self, report: &BuildReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => self.format_json(report),
            OutputFormat::Human => Ok(self.format_human(report)),
        }
    }

    fn format_json(&self, report: &BuildReport) -> Result<String> {
        serde_json::to_string_pretty(report).context("Failed to serialize build report to JSON")
    }

    fn format_human(&self, report: &BuildReport) -> String {
        let mut output = String::new();

        if report.success() {
            output.push_str("\u{2713} Build Succeeded\n");
        } else {
            output.push_str("\u{2717} Build Failed\n");
        }
        output.push_str(&"\u{2501}".repeat(42));
        output.push_str("\n\n");

        let outcomes = report.outcomes();
        for (i, outcome) in outcomes.iter().enumerate() {
            let is_last = i == outcomes.len() - 1;
            let connector = if is_last { "\u{2514}" } else { "\u{251C}" };
            let marker = match &outcome.status {
                StageStatus::Succeeded { .. } => "\u{2713}",
                StageStatus::Failed { .. } => "\u{2717}",
                StageStatus::Skipped { .. } => "\u{2013}",
            };
            output.push_str(&format!(
                "{}\u{2500} {} {:<18} {}\n",
                connector, marker, outcome.stage, outcome.status
            ));

            if let StageStatus::Succeeded { artifacts, .. } = &outcome.status {
                for artifact in artifacts {
                    let pad = if is_last { " " } else { "\u{2502}" };
                    output.push_str(&format!(
                        "{}      {} ({})\n",
                        pad,
                        artifact.path.display(),
                        artifact.hash.short()
                    ));
                }
            }
        }

        output.push_str(&format!(
            "\n{} artifacts in {}ms\n",
            report.artifact_count(),
            report.total_ms
        ));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::artifact::{ArtifactRecord, ContentHash};
    use crate::pipeline::scheduler::StageOutcome;
    use std::path::PathBuf;

    fn sample_report() -> BuildReport {
        BuildReport::from_parts(
            vec![
                StageOutcome {
                    stage: "compile-native".to_string(),
                    status: StageStatus::Succeeded {
                        artifacts: vec![ArtifactRecord {
                            logical_name: "app".to_string(),
                            path: PathBuf::from("dist/app.wasm"),
                            hash: ContentHash::of_bytes(b"wasm"),
                        }],
                        duration_ms: 812,
                        sequence: 0,
                    },
                },
                StageOutcome {
                    stage: "bundle-script".to_string(),
                    status: StageStatus::Failed {
                        message: "esbuild exited with status 1".to_string(),
                    },
                },
                StageOutcome {
                    stage: "copy-static".to_string(),
                    status: StageStatus::Skipped {
                        cause: "bundle-script".to_string(),
                    },
                },
            ],
            891,
        )
    }

    #[test]
    fn test_json_format() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format_report(&sample_report()).unwrap();

        assert!(output.contains("compile-native"));
        assert!(output.contains("dist/app.wasm"));
        assert!(output.contains("\"state\": \"failed\""));

        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["total_ms"], 891);
    }

    #[test]
    fn test_human_format() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_report(&sample_report()).unwrap();

        assert!(output.contains("Build Failed"));
        assert!(output.contains("compile-native"));
        assert!(output.contains("dist/app.wasm"));
        assert!(output.contains("esbuild exited with status 1"));
        assert!(output.contains("skipped (caused by 'bundle-script')"));
        assert!(output.contains("1 artifacts in 891ms"));
    }

    #[test]
    fn test_human_format_success_header() {
        let report = BuildReport::from_parts(
            vec![StageOutcome {
                stage: "copy-static".to_string(),
                status: StageStatus::Succeeded {
                    artifacts: vec![],
                    duration_ms: 3,
                    sequence: 0,
                },
            }],
            5,
        );
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format_report(&report).unwrap();
        assert!(output.starts_with("\u{2713} Build Succeeded"));
    }
}
