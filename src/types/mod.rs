//! Shared types for lookout

mod error;

pub use error::{LookoutError, Result};
