//! Command handlers
//!
//! Each handler loads configuration, applies CLI overrides, drives the
//! pipeline, and returns a process exit code. Configuration and structural
//! errors exit 1 before any stage runs; a pass with failed stages also
//! exits 1 but still reports every outcome.

use crate::cli::commands::{BuildArgs, ServeArgs};
use crate::cli::output::OutputFormatter;
use crate::config::{BuildConfig, BuildMode, ConfigError};
use crate::pipeline::scheduler::{Pipeline, RebuildNotice};
use crate::pipeline::state::BuildState;
use crate::server::DevServer;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};

const MANIFEST_FILE: &str = "sitepack.toml";

/// Capacity for rebuild notices; a browser that lags this far behind just
/// gets a single coalesced reload.
const RELOAD_CHANNEL_CAPACITY: usize = 16;

pub async fn handle_build(args: &BuildArgs, quiet: bool) -> i32 {
    let config = match load_config(
        args.project_path.as_deref(),
        args.config.as_deref(),
        args.mode,
        args.out.as_deref(),
        None,
    ) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Configuration error: {}", e);
            return 1;
        }
    };
    debug!("{}", config);

    let pipeline = match Pipeline::from_config(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Invalid build graph: {}", e);
            return 1;
        }
    };

    let mut state = BuildState::new();

    if args.watch {
        let shutdown = shutdown_on_ctrl_c();
        return match pipeline.run_watch(&mut state, shutdown, None).await {
            Ok(()) => 0,
            Err(e) => {
                error!("Watch session failed: {}", e);
                1
            }
        };
    }

    let report = match pipeline.run_once(&mut state).await {
        Ok(report) => report,
        Err(e) => {
            error!("Build aborted: {}", e);
            return 1;
        }
    };

    if !quiet {
        let formatter = OutputFormatter::new(args.format.into());
        match formatter.format_report(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Failed to format report: {}", e);
                return 1;
            }
        }
    }

    if report.success() {
        0
    } else {
        1
    }
}

pub async fn handle_serve(args: &ServeArgs, _quiet: bool) -> i32 {
    // Serve is a development workflow: unhashed artifact names keep the
    // paths a reloading browser requests stable across rebuilds.
    let mode = args.mode.or(Some(BuildMode::Development));
    let config = match load_config(
        args.project_path.as_deref(),
        args.config.as_deref(),
        mode,
        None,
        args.port,
    ) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Configuration error: {}", e);
            return 1;
        }
    };
    debug!("{}", config);

    let pipeline = match Pipeline::from_config(config.clone()) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Invalid build graph: {}", e);
            return 1;
        }
    };

    let live_reload = config.dev_server.live_reload && !args.no_reload;
    let (reload_tx, _) = broadcast::channel::<RebuildNotice>(RELOAD_CHANNEL_CAPACITY);

    // Bind before the first build so a port conflict fails fast.
    let server = match DevServer::bind(
        config.dev_server.port,
        &config.output_dir,
        live_reload,
        config.compress_enabled(),
        reload_tx.clone(),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };
    info!(
        "Serving {} at http://{}",
        config.output_dir.display(),
        server.local_addr()
    );

    let shutdown = shutdown_on_ctrl_c();
    let mut state = BuildState::new();
    let reload = live_reload.then(|| reload_tx.clone());

    let (watch_result, serve_result) = tokio::join!(
        pipeline.run_watch(&mut state, shutdown.clone(), reload),
        server.serve(shutdown),
    );

    let mut code = 0;
    if let Err(e) = watch_result {
        error!("Watch session failed: {}", e);
        code = 1;
    }
    if let Err(e) = serve_result {
        error!("Dev server failed: {}", e);
        code = 1;
    }
    code
}

/// Loads the manifest (or defaults when the project has none) and applies
/// CLI overrides, then validates the result.
fn load_config(
    project_path: Option<&Path>,
    manifest: Option<&Path>,
    mode: Option<BuildMode>,
    out: Option<&Path>,
    port: Option<u16>,
) -> Result<BuildConfig, ConfigError> {
    let root = project_path.unwrap_or(Path::new(".")).to_path_buf();
    let manifest_path = manifest
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.join(MANIFEST_FILE));

    let mut config = if manifest_path.is_file() {
        BuildConfig::load(&manifest_path)?
    } else {
        debug!(
            "No manifest at {}, using defaults",
            manifest_path.display()
        );
        BuildConfig::defaults_for(root)?
    };

    if let Some(mode) = mode {
        config.mode = mode;
    }
    if let Some(out) = out {
        config.output_dir = if out.is_absolute() {
            out.to_path_buf()
        } else {
            config.project_root.join(out)
        };
    }
    if let Some(port) = port {
        config.dev_server.port = port;
    }

    config.validate()?;
    Ok(config)
}

/// A watch channel that flips to `true` on the first Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = tx.send(true);
        }
    });
    rx
}
