//! Configuration for lookout
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Lookout - child-safety risk detection and guardian alert relay
#[derive(Parser, Debug, Clone)]
#[command(name = "lookout")]
#[command(about = "Real-time safety alert pipeline for guardian monitoring")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// SQLite database file for alerts (":memory:" for an ephemeral store)
    #[arg(long, env = "DATABASE_PATH", default_value = "lookout.db")]
    pub database_path: String,

    /// Semantic risk service configuration
    #[command(flatten)]
    pub semantic: SemanticArgs,

    /// Expected client heartbeat interval in seconds
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value = "30")]
    pub heartbeat_interval_secs: u64,

    /// Silence after which a guardian connection is closed.
    /// Must be at least twice the heartbeat interval.
    #[arg(long, env = "HEARTBEAT_TIMEOUT_SECS", default_value = "75")]
    pub heartbeat_timeout_secs: u64,

    /// Timeout for writing a single frame to a guardian socket
    #[arg(long, env = "WRITE_TIMEOUT_MS", default_value = "5000")]
    pub write_timeout_ms: u64,

    /// Outbound frames buffered per guardian connection before it is
    /// considered too slow and torn down
    #[arg(long, env = "CONNECTION_QUEUE_CAPACITY", default_value = "64")]
    pub connection_queue_capacity: usize,

    /// Continuous activity (minutes) after which an info alert is raised
    #[arg(long, env = "ACTIVITY_ALERT_MINUTES", default_value = "120")]
    pub activity_alert_minutes: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

/// Semantic risk service (OpenAI-compatible chat completions endpoint)
#[derive(Parser, Debug, Clone)]
pub struct SemanticArgs {
    /// Base URL of the chat completions API
    #[arg(
        long,
        env = "SEMANTIC_URL",
        default_value = "https://integrate.api.nvidia.com/v1"
    )]
    pub semantic_url: String,

    /// API key (semantic layer is disabled when unset)
    #[arg(long, env = "SEMANTIC_API_KEY")]
    pub semantic_api_key: Option<String>,

    /// Model name passed to the completions API
    #[arg(
        long,
        env = "SEMANTIC_MODEL",
        default_value = "llama-3.3-nemotron-super-49b-v1.5"
    )]
    pub semantic_model: String,

    /// Upper bound on a single semantic or emotion call
    #[arg(long, env = "SEMANTIC_TIMEOUT_MS", default_value = "8000")]
    pub semantic_timeout_ms: u64,
}

impl Args {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Whether the semantic layer has credentials to run
    pub fn semantic_enabled(&self) -> bool {
        self.semantic
            .semantic_api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval_secs == 0 {
            return Err("HEARTBEAT_INTERVAL_SECS must be greater than zero".to_string());
        }

        if self.heartbeat_timeout_secs < self.heartbeat_interval_secs * 2 {
            return Err(format!(
                "HEARTBEAT_TIMEOUT_SECS ({}) must be at least twice HEARTBEAT_INTERVAL_SECS ({})",
                self.heartbeat_timeout_secs, self.heartbeat_interval_secs
            ));
        }

        if self.write_timeout_ms == 0 {
            return Err("WRITE_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.connection_queue_capacity == 0 {
            return Err("CONNECTION_QUEUE_CAPACITY must be greater than zero".to_string());
        }

        if self.semantic.semantic_timeout_ms == 0 {
            return Err("SEMANTIC_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.database_path.trim().is_empty() {
            return Err("DATABASE_PATH must not be empty".to_string());
        }

        Ok(())
    }
}
