//! Lookout - child-safety risk detection and guardian alert relay
//!
//! Every message a child sends during a session is classified; when the
//! guardian must know, an alert is persisted and pushed in real time to
//! every live monitoring connection of that guardian. A fallback poll
//! guarantees eventual delivery across disconnects.
//!
//! ## Components
//!
//! - **Classifier**: keyword, semantic and emotion layers plus the explicit
//!   emergency trigger
//! - **Alerts**: alert lifecycle, SQLite or in-memory persistence
//! - **Broker**: per-guardian connection registry, push fan-out, heartbeat
//! - **Client**: a conforming guardian monitor (push + fallback poll)

pub mod alerts;
pub mod broker;
pub mod classifier;
pub mod client;
pub mod config;
pub mod db;
pub mod logging;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, serve, AppState};
pub use types::{LookoutError, Result};
