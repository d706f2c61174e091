//! chartmgr CLI entrypoint.
//!
//! This is the main entrypoint for the chartmgr command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chartmgr::cli::{Cli, Commands, FileReport, LogFormat, OutputFormatter, StatusEntry};
use chartmgr::config::{ConfigParser, ControllerConfig};
use chartmgr::controller::{Controller, EventHandler, LivenessServer};
use chartmgr::convergence::{wait_for_signal, ConvergenceMonitor, Shutdown};
use chartmgr::error::{ChartMgrError, Result};
use chartmgr::reconciler::Reconciler;
use chartmgr::release::{ChartResolver, DeploymentBackend, HttpBackend, ReleaseManager};
use chartmgr::resource::ResourceValidator;
use chartmgr::store::{load_manifest, LocalResourceStore, ResourceStore};

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the verbosity flag.
fn init_logging(verbose: bool, format: LogFormat) {
    let debug_env = std::env::var("CHARTMGR_DEBUG")
        .is_ok_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"));
    let default_level = if verbose || debug_env { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Main async entry point. Returns false when the command ran but found problems.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Manage {
            manifest_dir,
            backend_url,
        } => {
            let mut config = config;
            if let Some(dir) = manifest_dir {
                config.manifest_dir = dir;
            }
            if let Some(url) = backend_url {
                config.backend_url = url;
            }
            config.check()?;
            cmd_manage(&config).await.map(|()| true)
        }
        Commands::Validate { files } => cmd_validate(&config, files, &formatter).await,
        Commands::Status => cmd_status(&config, &formatter).await.map(|()| true),
        Commands::ReleaseName { file } => cmd_release_name(&file, &formatter).await.map(|()| true),
    }
}

/// Loads configuration from the given file, a discovered file, or defaults.
fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    let base = path
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let config = ConfigParser::new().with_base_path(base).load(path)?;
    debug!("Effective configuration: {config:?}");
    Ok(config)
}

/// Runs the controller until a shutdown signal arrives.
async fn cmd_manage(config: &ControllerConfig) -> Result<()> {
    info!(
        "Starting controller: backend {}, manifests in {}",
        config.backend_url,
        config.manifest_dir.display()
    );

    let backend = Arc::new(HttpBackend::with_timeout(
        &config.backend_url,
        config.backend_token.as_deref(),
        config.http_timeout(),
    )?);
    let releases = ReleaseManager::new(Arc::clone(&backend) as Arc<dyn DeploymentBackend>);
    let monitor = ConvergenceMonitor::new(releases.clone());

    let store: Arc<dyn ResourceStore> = Arc::new(
        LocalResourceStore::new(&config.manifest_dir).with_resync_interval(config.resync_interval()),
    );

    let reconciler = Reconciler::new(
        releases,
        backend as Arc<dyn ChartResolver>,
        monitor,
        Arc::clone(&store),
        config.reconcile_settings(),
    );
    let controller = Controller::new(Arc::new(reconciler) as Arc<dyn EventHandler>, store);

    let (trigger, shutdown) = Shutdown::channel();
    let trigger = Arc::new(trigger);
    let liveness = LivenessServer::bind(config.liveness_addr, controller.liveness()).await?;
    let liveness_task = tokio::spawn(liveness.serve(shutdown.clone()));

    let signal_trigger = Arc::clone(&trigger);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        signal_trigger.trigger();
    });

    let result = controller.run(shutdown).await;
    trigger.trigger();

    match liveness_task.await {
        Ok(Err(e)) => error!("Liveness endpoint failed: {e}"),
        Err(e) => error!("Liveness task failed: {e}"),
        Ok(Ok(())) => {}
    }

    let summary = result?;
    info!(
        "Controller exited: {} reconciliations succeeded, {} failed",
        summary.succeeded, summary.failed
    );
    Ok(())
}

/// Validates manifest files. Returns false if any is invalid.
async fn cmd_validate(
    config: &ControllerConfig,
    files: Vec<PathBuf>,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let files = if files.is_empty() {
        manifest_files(&config.manifest_dir)?
    } else {
        files
    };
    info!("Validating {} manifest(s)", files.len());

    let validator = ResourceValidator::new();
    let mut reports = Vec::with_capacity(files.len());
    for path in files {
        let outcome = match load_manifest(&path).await {
            Ok(desired) => Ok(validator.check(&desired)),
            Err(e) => Err(e.to_string()),
        };
        reports.push(FileReport { path, outcome });
    }

    emit(&formatter.format_validation(&reports))?;
    Ok(reports.iter().all(FileReport::is_valid))
}

/// Shows the last recorded status of every manifest.
async fn cmd_status(config: &ControllerConfig, formatter: &OutputFormatter) -> Result<()> {
    let store = LocalResourceStore::new(&config.manifest_dir);

    let mut entries = Vec::new();
    for desired in store.list().await? {
        let status = store.get_status(desired.identity()).await?;
        entries.push(StatusEntry::new(&desired, status));
    }

    emit(&formatter.format_status(&entries))
}

/// Prints the release name a manifest reconciles to.
async fn cmd_release_name(file: &Path, formatter: &OutputFormatter) -> Result<()> {
    let desired = load_manifest(file).await?;
    emit(&formatter.format_release_name(&desired))
}

/// Lists manifest files in a directory, sorted.
fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ChartMgrError::internal(format!(
            "Manifest directory not found: {}",
            dir.display()
        )));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "yaml" || e == "yml")
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", output.trim_end())?;
    Ok(())
}
