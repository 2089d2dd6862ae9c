use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use greeter_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use greeter_server::bootstrap::{self, Application};

#[derive(Debug, Parser)]
#[command(name = "greeter-server", version, about = "Slack greeting bot and items API")]
struct Args {
    /// Path to a greeter.toml config file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    bind: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn into_load_options(self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config,
            overrides: ConfigOverrides {
                bind_address: self.bind,
                port: self.port,
                log_level: self.log_level,
                ..ConfigOverrides::default()
            },
        }
    }
}

fn init_logging(config: &AppConfig) {
    use greeter_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Args::parse()).await
}

async fn run(args: Args) -> Result<()> {
    // Logging needs the resolved config, so load it before bootstrapping.
    let config = AppConfig::load(args.into_load_options())?;
    init_logging(&config);

    let Application { config, state, workers } = bootstrap::bootstrap_with_config(config).await?;
    let address = config.listen_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        events_path = %config.server.events_path,
        "greeter-server listening"
    );

    let app = greeter_server::router(state, &config.server.events_path);
    axum::serve(listener, app).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "draining reply queue"
    );
    let grace = Duration::from_secs(config.server.graceful_shutdown_secs);
    let drained = workers.shutdown(grace).await;
    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        workers_drained = drained,
        "greeter-server stopped"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
