use crate::config::BuildMode;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Build orchestrator for wasm-based web applications
#[derive(Parser, Debug)]
#[command(
    name = "sitepack",
    about = "Build orchestrator for wasm-based web applications",
    version,
    author,
    long_about = "sitepack assembles a deployable web application from a wasm module, \
                  Sass stylesheets, static assets, and a bundled JavaScript entry point. \
                  Stages run concurrently where the dependency graph allows, and watch \
                  mode rebuilds only the stages whose inputs changed."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Increase verbosity")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Run the build pipeline once (or continuously with --watch)",
        long_about = "Runs every build stage in dependency order and writes the output \
                      directory.\n\n\
                      Examples:\n  \
                      sitepack build\n  \
                      sitepack build /path/to/project --mode production\n  \
                      sitepack build --watch\n  \
                      sitepack build --format json"
    )]
    Build(BuildArgs),

    #[command(
        about = "Build, watch, and serve the output directory with live reload",
        long_about = "Runs an initial build, then watches the project for changes and \
                      serves the output directory on localhost. Connected browsers are \
                      told to reload after each completed rebuild.\n\n\
                      Examples:\n  \
                      sitepack serve\n  \
                      sitepack serve /path/to/project --port 3000\n  \
                      sitepack serve --no-reload"
    )]
    Serve(ServeArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(
        value_name = "PATH",
        help = "Path to the project (defaults to current directory)"
    )]
    pub project_path: Option<PathBuf>,

    #[arg(
        short = 'm',
        long,
        value_enum,
        help = "Build mode (overrides the manifest)"
    )]
    pub mode: Option<BuildMode>,

    #[arg(short = 'w', long, help = "Rebuild on input changes until interrupted")]
    pub watch: bool,

    #[arg(
        short = 'c',
        long,
        value_name = "FILE",
        help = "Manifest file (defaults to sitepack.toml in the project)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'o',
        long,
        value_name = "DIR",
        help = "Output directory (overrides the manifest)"
    )]
    pub out: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Report format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    #[arg(
        value_name = "PATH",
        help = "Path to the project (defaults to current directory)"
    )]
    pub project_path: Option<PathBuf>,

    #[arg(short = 'p', long, help = "Dev server port (overrides the manifest)")]
    pub port: Option<u16>,

    #[arg(long, help = "Disable live-reload notifications")]
    pub no_reload: bool,

    #[arg(
        short = 'c',
        long,
        value_name = "FILE",
        help = "Manifest file (defaults to sitepack.toml in the project)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'm',
        long,
        value_enum,
        help = "Build mode (serve defaults to development)"
    )]
    pub mode: Option<BuildMode>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_default_build_args() {
        let args = CliArgs::parse_from(["sitepack", "build"]);
        match args.command {
            Commands::Build(build_args) => {
                assert!(build_args.project_path.is_none());
                assert!(build_args.mode.is_none());
                assert!(!build_args.watch);
                assert!(build_args.out.is_none());
                assert_eq!(build_args.format, OutputFormatArg::Human);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_build_with_options() {
        let args = CliArgs::parse_from([
            "sitepack",
            "build",
            "/tmp/app",
            "--mode",
            "production",
            "--watch",
            "--out",
            "public",
            "--format",
            "json",
        ]);
        match args.command {
            Commands::Build(build_args) => {
                assert_eq!(build_args.project_path, Some(PathBuf::from("/tmp/app")));
                assert_eq!(build_args.mode, Some(BuildMode::Production));
                assert!(build_args.watch);
                assert_eq!(build_args.out, Some(PathBuf::from("public")));
                assert_eq!(build_args.format, OutputFormatArg::Json);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_serve_command() {
        let args = CliArgs::parse_from(["sitepack", "serve", "--port", "3000", "--no-reload"]);
        match args.command {
            Commands::Serve(serve_args) => {
                assert_eq!(serve_args.port, Some(3000));
                assert!(serve_args.no_reload);
                assert!(serve_args.mode.is_none());
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_global_verbose_flag() {
        let args = CliArgs::parse_from(["sitepack", "-v", "build"]);
        assert!(args.verbose);
        assert!(!args.quiet);
    }

    #[test]
    fn test_global_quiet_flag() {
        let args = CliArgs::parse_from(["sitepack", "-q", "build"]);
        assert!(!args.verbose);
        assert!(args.quiet);
    }

    #[test]
    fn test_log_level_flag() {
        let args = CliArgs::parse_from(["sitepack", "--log-level", "debug", "build"]);
        assert_eq!(args.log_level, Some("debug".to_string()));
    }
}
