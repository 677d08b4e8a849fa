//! Canonical datetime types shared across all Vulnwatch crates

use chrono::{DateTime as ChronoDateTime, Utc};

/// Database DateTime type used across all Vulnwatch crates
///
/// This is the canonical datetime type for database TIMESTAMPTZ columns.
pub type DBDateTime = ChronoDateTime<Utc>;

/// Standard UTC DateTime type used across all Vulnwatch crates
///
/// Serializes as ISO 8601 with 'Z' suffix (e.g. `2025-10-12T12:15:47.609192Z`).
pub type UtcDateTime = ChronoDateTime<Utc>;
