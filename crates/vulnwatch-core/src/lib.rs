//! Core utilities and types shared across all Vulnwatch crates

pub mod error;
pub mod image_ref;
pub mod types;

// Re-export commonly used types
pub use error::*;
pub use image_ref::*;
pub use types::*;

// Re-export external dependencies
pub use anyhow;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;
pub use uuid;
