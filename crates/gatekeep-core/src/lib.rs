//! Session coordination core for gatekeep
//!
//! This crate is the heart of gatekeep, containing:
//! - The session registry (at most one session per kind) and its lifecycle
//! - The blocking rule merger, the only writer of the enforcement primitive
//! - Persistence of snapshots, selections and history, and restoration at launch
//! - Background reconciliation that records pending events while suspended
//!
//! Every operation takes `now` explicitly so callers can drive a simulated clock.

mod coordinator;
mod error;
mod events;
mod merger;
mod monitors;
mod persistence;
mod reconcile;
mod restore;
mod selection;

pub use coordinator::*;
pub use error::*;
pub use events::*;
pub use merger::*;
pub use persistence::*;
pub use reconcile::*;
pub use restore::*;
pub use selection::*;
