//! Build manifest loading and validation
//!
//! The manifest (`sitepack.toml` by convention) is the declarative
//! description of a build: the JavaScript entry point, the output directory,
//! the build mode, dev-server settings, and per-stage option tables that are
//! passed through opaquely to each stage. It is loaded once per invocation
//! and never mutated afterwards; every component receives it by shared
//! reference, so there is no ambient cross-stage state.
//!
//! # Environment Variables
//!
//! - `SITEPACK_MODE`: build mode override (development|production)
//! - `SITEPACK_OUTPUT`: output directory override
//! - `SITEPACK_PORT`: dev-server port override
//! - `SITEPACK_LOG_LEVEL`: logging level - default: "info" (read in main)
//!
//! # Example
//!
//! ```no_run
//! use sitepack::BuildConfig;
//!
//! let config = BuildConfig::load("sitepack.toml").expect("manifest");
//! config.validate().expect("valid manifest");
//! println!("{}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Default values for configuration
const DEFAULT_DEV_SERVER_PORT: u16 = 8000;
const DEFAULT_LIVE_RELOAD: bool = true;
const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 100;
const DEFAULT_OUTPUT_DIR: &str = "dist";
const DEFAULT_ENTRY_POINT: &str = "index.js";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Manifest file could not be read
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest file is not valid TOML
    #[error("Failed to parse manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Invalid build mode name
    #[error("Invalid mode: {0}. Valid options: development, production")]
    InvalidMode(String),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Build mode, selecting artifact naming and dev-server behavior.
///
/// Development keeps output paths stable and human-readable; production
/// embeds content hashes for long-term caching and enables response
/// compression on the dev server by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Development,
    Production,
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Development => write!(f, "development"),
            BuildMode::Production => write!(f, "production"),
        }
    }
}

impl FromStr for BuildMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(BuildMode::Development),
            "production" | "prod" => Ok(BuildMode::Production),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

/// Dev-server settings from the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerConfig {
    /// Port to bind on localhost
    #[serde(default = "default_port")]
    pub port: u16,

    /// Push reload notifications to connected clients after rebuilds
    #[serde(default = "default_live_reload")]
    pub live_reload: bool,

    /// Gzip responses. Defaults to the production-mode convention when unset.
    #[serde(default)]
    pub compress: Option<bool>,
}

fn default_port() -> u16 {
    DEFAULT_DEV_SERVER_PORT
}

fn default_live_reload() -> bool {
    DEFAULT_LIVE_RELOAD
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DEV_SERVER_PORT,
            live_reload: DEFAULT_LIVE_RELOAD,
            compress: None,
        }
    }
}

/// On-disk manifest shape. Kept private; `BuildConfig` is the loaded,
/// root-resolved form handed to the pipeline.
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default = "default_entry")]
    entry: PathBuf,

    #[serde(default = "default_output")]
    output: PathBuf,

    mode: Option<BuildMode>,

    #[serde(default = "default_debounce")]
    watch_debounce_ms: u64,

    #[serde(default)]
    dev_server: DevServerConfig,

    /// Per-stage opaque option tables, passed through verbatim
    #[serde(default)]
    stages: HashMap<String, toml::Value>,
}

fn default_entry() -> PathBuf {
    PathBuf::from(DEFAULT_ENTRY_POINT)
}

fn default_output() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_debounce() -> u64 {
    DEFAULT_WATCH_DEBOUNCE_MS
}

/// The loaded build configuration.
///
/// Immutable once constructed for a given build invocation; CLI overrides
/// are applied before the pipeline is created, never after.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Directory containing the manifest; all relative paths resolve here
    pub project_root: PathBuf,

    /// JavaScript entry point, relative to the project root
    pub entry_point: PathBuf,

    /// Output directory, resolved against the project root
    pub output_dir: PathBuf,

    /// Build mode (development or production)
    pub mode: BuildMode,

    /// Debounce window for coalescing filesystem change events
    pub watch_debounce_ms: u64,

    /// Dev-server settings
    pub dev_server: DevServerConfig,

    /// Per-stage opaque option tables
    pub stage_options: HashMap<String, toml::Value>,
}

impl BuildConfig {
    /// Loads the manifest at `path` and applies `SITEPACK_*` environment
    /// overrides. The manifest's parent directory becomes the project root.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let project_root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        Self::from_manifest(manifest, project_root)
    }

    fn from_manifest(manifest: Manifest, project_root: PathBuf) -> Result<Self, ConfigError> {
        // Watch backends report absolute, symlink-resolved paths; prefix
        // matching against the root needs it in the same form.
        let project_root = std::fs::canonicalize(&project_root).unwrap_or(project_root);

        let mode = match env::var("SITEPACK_MODE") {
            Ok(s) => s.parse()?,
            Err(_) => manifest.mode.unwrap_or(BuildMode::Development),
        };

        let output = env::var("SITEPACK_OUTPUT")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(manifest.output);

        let mut dev_server = manifest.dev_server;
        if let Some(port) = env::var("SITEPACK_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            dev_server.port = port;
        }

        let output_dir = if output.is_absolute() {
            output
        } else {
            project_root.join(output)
        };

        Ok(Self {
            project_root,
            entry_point: manifest.entry,
            output_dir,
            mode,
            watch_debounce_ms: manifest.watch_debounce_ms,
            dev_server,
            stage_options: manifest.stages,
        })
    }

    /// Builds a configuration with defaults for a project directory that has
    /// no manifest file.
    pub fn defaults_for(project_root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let manifest: Manifest = toml::from_str("").expect("empty manifest has full defaults");
        Self::from_manifest(manifest, project_root.into())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if the port is zero, the
    /// debounce window is outside 10ms..=5s, or the output directory is the
    /// project root itself (a build would clobber its own sources).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dev_server.port == 0 {
            return Err(ConfigError::ValidationFailed(
                "Dev server port must be non-zero".to_string(),
            ));
        }

        if self.watch_debounce_ms < 10 || self.watch_debounce_ms > 5_000 {
            return Err(ConfigError::ValidationFailed(format!(
                "Watch debounce must be between 10 and 5000 ms, got {}",
                self.watch_debounce_ms
            )));
        }

        if self.output_dir == self.project_root {
            return Err(ConfigError::ValidationFailed(
                "Output directory must not be the project root".to_string(),
            ));
        }

        if self.entry_point.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Entry point must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Opaque option table for a stage, if the manifest declares one.
    pub fn stage_options(&self, stage: &str) -> Option<&toml::Value> {
        self.stage_options.get(stage)
    }

    /// Whether dev-server responses are gzipped. Follows the original
    /// bundler convention: compress in production unless overridden.
    pub fn compress_enabled(&self) -> bool {
        self.dev_server
            .compress
            .unwrap_or(self.mode == BuildMode::Production)
    }

}

impl fmt::Display for BuildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sitepack Configuration:")?;
        writeln!(f, "  Project Root: {}", self.project_root.display())?;
        writeln!(f, "  Entry Point: {}", self.entry_point.display())?;
        writeln!(f, "  Output Dir: {}", self.output_dir.display())?;
        writeln!(f, "  Mode: {}", self.mode)?;
        writeln!(f, "  Dev Server Port: {}", self.dev_server.port)?;
        writeln!(f, "  Live Reload: {}", self.dev_server.live_reload)?;
        writeln!(f, "  Compress: {}", self.compress_enabled())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn manifest(raw: &str) -> BuildConfig {
        let m: Manifest = toml::from_str(raw).unwrap();
        BuildConfig::from_manifest(m, PathBuf::from("/proj")).unwrap()
    }

    #[test]
    #[serial]
    fn test_defaults() {
        let config = manifest("");
        assert_eq!(config.entry_point, PathBuf::from("index.js"));
        assert_eq!(config.output_dir, PathBuf::from("/proj/dist"));
        assert_eq!(config.mode, BuildMode::Development);
        assert_eq!(config.dev_server.port, 8000);
        assert!(config.dev_server.live_reload);
        assert_eq!(config.watch_debounce_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_manifest_parsing() {
        let config = manifest(
            r#"
            entry = "app.js"
            output = "build"
            mode = "production"

            [dev_server]
            port = 9000
            live_reload = false

            [stages.preprocess-style]
            command = "sass"
            "#,
        );
        assert_eq!(config.entry_point, PathBuf::from("app.js"));
        assert_eq!(config.output_dir, PathBuf::from("/proj/build"));
        assert_eq!(config.mode, BuildMode::Production);
        assert_eq!(config.dev_server.port, 9000);
        assert!(!config.dev_server.live_reload);
        assert!(config.stage_options("preprocess-style").is_some());
        assert!(config.stage_options("copy-static").is_none());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let _guards = vec![
            EnvGuard::set("SITEPACK_MODE", "production"),
            EnvGuard::set("SITEPACK_PORT", "4321"),
        ];

        let config = manifest("mode = \"development\"");
        assert_eq!(config.mode, BuildMode::Production);
        assert_eq!(config.dev_server.port, 4321);
    }

    #[test]
    #[serial]
    fn test_compress_follows_mode() {
        let dev = manifest("mode = \"development\"");
        assert!(!dev.compress_enabled());

        let prod = manifest("mode = \"production\"");
        assert!(prod.compress_enabled());

        let overridden = manifest("mode = \"production\"\n[dev_server]\ncompress = false");
        assert!(!overridden.compress_enabled());
    }

    #[test]
    #[serial]
    fn test_validation_rejects_zero_port() {
        let config = manifest("[dev_server]\nport = 0");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    #[serial]
    fn test_validation_rejects_output_at_root() {
        let m: Manifest = toml::from_str("output = \".\"").unwrap();
        let config = BuildConfig::from_manifest(m, PathBuf::from(".")).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_project_root_is_canonicalized() {
        let temp = tempfile::TempDir::new().unwrap();
        let m: Manifest = toml::from_str("").unwrap();
        let config = BuildConfig::from_manifest(m, temp.path().to_path_buf()).unwrap();
        assert_eq!(config.project_root, temp.path().canonicalize().unwrap());
        assert!(config.project_root.is_absolute());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(
            "production".parse::<BuildMode>().unwrap(),
            BuildMode::Production
        );
        assert_eq!("dev".parse::<BuildMode>().unwrap(), BuildMode::Development);
        assert!("staging".parse::<BuildMode>().is_err());
    }

    #[test]
    #[serial]
    fn test_config_display() {
        let config = manifest("");
        let display = format!("{}", config);
        assert!(display.contains("Sitepack Configuration:"));
        assert!(display.contains("Mode: development"));
    }
}
