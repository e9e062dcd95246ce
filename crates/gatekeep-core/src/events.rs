//! Core events emitted by the coordinator

use gatekeep_api::{CompletedSessionRecord, SessionKind};
use gatekeep_util::SessionId;

/// Events emitted by the session coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// Session registered in its slot
    SessionStarted {
        session_id: SessionId,
        kind: SessionKind,
        name: String,
        enforcing: bool,
    },

    /// Session began or stopped contributing its selection
    EnforcementChanged {
        session_id: SessionId,
        kind: SessionKind,
        enforcing: bool,
    },

    /// Session left its slot
    SessionEnded { record: CompletedSessionRecord },
}
