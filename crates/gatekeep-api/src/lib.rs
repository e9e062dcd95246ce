//! Session model for gatekeep
//!
//! This crate defines the types shared by the coordinator and its collaborators:
//! - Sessions (a closed sum over the six trigger kinds)
//! - Selections (restriction target sets)
//! - Persisted snapshots, pending background events and history records
//! - Live status and notification payloads

mod records;
mod selection;
mod session;
mod status;

pub use records::*;
pub use selection::*;
pub use session::*;
pub use status::*;

/// Current version of every persisted document
pub const SNAPSHOT_VERSION: u32 = 1;
