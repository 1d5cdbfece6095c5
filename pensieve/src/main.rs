mod config;

use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use directory::Directory;
use directory::source::{self, SourceError};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use telemetry::errors::TelemetryError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(version, about = "Application performance and error telemetry service")]
enum CliCommand {
    /// Serve ingestion and queries
    Run(ConfigArgs),
    /// Load and validate a config file, then exit
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, short, default_value = "pensieve.yaml")]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not load projects: {0}")]
    Directory(#[from] SourceError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::Run(args) => run(args),
        CliCommand::CheckConfig(args) => check_config(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn check_config(args: ConfigArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config)?;
    let projects = source::from_config(&config.directory).load()?;
    println!(
        "{}: ok ({} projects)",
        args.config.display(),
        projects.len()
    );
    Ok(())
}

fn run(args: ConfigArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config)?;

    let logging = config.logging();
    let _sentry = init_sentry(&logging);
    init_tracing(&logging);

    if let Some(metrics_config) = &config.common.metrics {
        init_statsd(metrics_config)?;
    }
    shared::metrics_defs::describe_all(directory::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(telemetry::metrics_defs::ALL_METRICS);

    let directory = Directory::from_source(source::from_config(&config.directory).as_ref())?;
    tracing::info!(projects = directory.len(), "Loaded project directory");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                return;
            }
            tracing::info!("Received Ctrl+C");
            signal.cancel();
        });

        tracing::info!(
            host = %config.telemetry.listener.host,
            port = config.telemetry.listener.port,
            "Starting pensieve"
        );
        telemetry::run(config.telemetry, directory, shutdown).await
    })?;

    Ok(())
}

fn init_sentry(logging: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = logging.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let sentry_layer = logging
        .sentry_dsn
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();
}

fn init_statsd(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some("pensieve"))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Exporting metrics to statsd"
    );
    Ok(())
}
