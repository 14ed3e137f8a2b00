//! Lookout - child-safety risk detection and guardian alert relay

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use lookout::{config::Args, logging, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init_tracing("lookout", &args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Lookout - guardian alert relay");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Database: {}", args.database_path);
    info!(
        "Heartbeat: every {}s, timeout {}s",
        args.heartbeat_interval_secs, args.heartbeat_timeout_secs
    );
    info!("Activity alert after {} minutes", args.activity_alert_minutes);

    let state = Arc::new(AppState::from_args(args)?);
    server::run(state).await?;

    Ok(())
}
