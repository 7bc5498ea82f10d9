use clap::Parser;
use kube::Client;
use tracing::metadata::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vmi_disruption_budget::controller_manager;

pub mod opts;

#[tokio::main]
async fn main() {
    let opts = opts::Opts::parse();

    let log_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(!opts.no_ansi))
        .with(log_filter)
        .init();

    info!(?opts, "Running");
    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(error) => {
            error!(%error, "Failed to create kubernetes client");
            std::process::exit(1);
        }
    };

    if let Err(error) = controller_manager::run(client, opts.controller_config()).await {
        error!(%error, "Controller manager failed");
        std::process::exit(1);
    }
}
