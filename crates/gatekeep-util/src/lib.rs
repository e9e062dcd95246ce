//! Shared utilities for gatekeep
//!
//! This crate provides:
//! - ID types (SessionId, SelectionId, ItemId)
//! - Wall-clock helpers (time-of-day, weekday masks, windows that may cross midnight)
//! - Default paths for the data directory and config file

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
