//! Guardian monitor - terminal client for the lookout push channel
//!
//! Connects to `/ws/guardian/{guardian_id}`, keeps the connection alive
//! with heartbeats, reconnects after a fixed backoff and polls unresolved
//! alerts as a fallback. Emergencies ring the terminal bell.
//!
//! Usage:
//!   guardian-monitor --server-url http://localhost:8000 --guardian-id parent-1

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use lookout::client::{ClientConfig, GuardianClient, TerminalSink};
use lookout::logging;

#[derive(Parser, Debug)]
#[command(name = "guardian-monitor")]
#[command(about = "Watch a guardian's safety alerts in the terminal")]
struct Args {
    /// Base HTTP URL of the lookout server
    #[arg(long, env = "SERVER_URL", default_value = "http://localhost:8000")]
    server_url: String,

    /// Guardian whose alerts to watch
    #[arg(long, env = "GUARDIAN_ID")]
    guardian_id: String,

    /// Seconds between `ping` heartbeats
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value = "30")]
    heartbeat_interval_secs: u64,

    /// Fixed delay before reconnecting a dropped push channel
    #[arg(long, env = "RECONNECT_BACKOFF_SECS", default_value = "5")]
    reconnect_backoff_secs: u64,

    /// Seconds between fallback polls
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "10")]
    poll_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    logging::init_tracing("lookout", &args.log_level, false);

    if args.heartbeat_interval_secs == 0 || args.poll_interval_secs == 0 {
        anyhow::bail!("heartbeat and poll intervals must be greater than zero");
    }

    let mut config = ClientConfig::new(&args.server_url, &args.guardian_id);
    config.heartbeat_interval = Duration::from_secs(args.heartbeat_interval_secs);
    config.reconnect_backoff = Duration::from_secs(args.reconnect_backoff_secs);
    config.poll_interval = Duration::from_secs(args.poll_interval_secs);

    println!("Watching alerts for guardian {} at {}", args.guardian_id, args.server_url);
    let mounted = GuardianClient::new(config, Arc::new(TerminalSink)).mount();

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, unmounting");
    mounted.unmount().await;

    Ok(())
}
