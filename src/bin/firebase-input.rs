//! # Firebase Input
//!
//! Runs one input against the realtime database, writing every event to
//! stdout as a JSON document per line. Logs go to stderr and the `log/`
//! directory. Ctrl-C stops the input gracefully.

use anyhow::Context;
use clap::Parser;
use firebase_input::logging::init_structured_logging;
use firebase_input::{ConfigManager, FirebaseInput, JsonLinesSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "firebase-input")]
#[command(about = "Ingest Firebase Realtime Database references as JSON events")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Environment name (defaults to FIREBASE_INPUT_ENV, APP_ENV, then development)
    #[arg(short, long)]
    environment: Option<String>,

    /// Run a single pull cycle and exit
    #[arg(long)]
    once: bool,

    /// Validate the configuration and exit without connecting
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_structured_logging();

    let environment = cli
        .environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);
    let manager = ConfigManager::load_with_env(&cli.config, &environment)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    if cli.validate {
        println!("✅ Configuration is valid");
        println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        return Ok(());
    }

    let sink = Arc::new(JsonLinesSink::stdout());
    let input = FirebaseInput::register_with_rest_client(manager.config(), sink)
        .context("registering input")?;

    if cli.once {
        let summary = input.run_once().await?;
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "🏁 Single pull cycle finished"
        );
        return Ok(());
    }

    let stop = input.stop_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Could not listen for interrupt signal");
            return;
        }
        info!("🛑 Interrupt received, stopping input");
        stop.stop().await;
    });

    info!(
        environment = %environment,
        mode = %input.mode(),
        "🚀 Firebase input running"
    );
    input.run().await?;
    info!("👋 Firebase input stopped");
    Ok(())
}
