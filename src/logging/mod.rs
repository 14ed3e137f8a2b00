//! Logging infrastructure for lookout
//!
//! Tracing subscriber setup shared by both binaries, plus the safety audit
//! trail emitted for every alert.

pub mod audit;

pub use audit::{log_classification_failure, log_safety_alert};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `{target}={log_level},info`.
pub fn init_tracing(target: &str, log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={},info", target, log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}
