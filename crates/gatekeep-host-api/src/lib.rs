//! Collaborator interfaces for gatekeep
//!
//! This crate defines the narrow interfaces between the session coordinator
//! and the platform: the enforcement primitive, location and step sensors,
//! the checklist item source, notification/live-status delivery, and the
//! background scheduler. It contains no platform code itself, only traits,
//! the event channel collaborators report through, and mocks for tests.

mod mock;
mod services;
mod traits;

pub use mock::*;
pub use services::*;
pub use traits::*;
