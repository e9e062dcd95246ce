//! Persisted documents: snapshots, pending background events, history

use chrono::{DateTime, Local};
use gatekeep_util::SessionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{RestrictionSet, SNAPSHOT_VERSION, Session, SessionKind};

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Trigger condition satisfied (deadline reached, checklist done, goal met)
    Completed,
    /// Ended on request
    Cancelled,
    /// Deadline passed while the process was not running
    Expired,
    /// Drained by a bulk force-end
    ForceEnded,
}

impl EndReason {
    pub fn is_completion(&self) -> bool {
        matches!(self, EndReason::Completed | EndReason::Expired)
    }
}

/// History entry appended when a session ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedSessionRecord {
    pub session_id: SessionId,
    pub kind: SessionKind,
    pub name: String,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    pub completed: bool,
    pub reason: EndReason,
}

impl CompletedSessionRecord {
    pub fn new(session: &Session, reason: EndReason, ended_at: DateTime<Local>) -> Self {
        Self {
            session_id: session.id,
            kind: session.kind(),
            name: session.name.clone(),
            started_at: session.created_at,
            ended_at,
            completed: reason.is_completion(),
            reason,
        }
    }

    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Everything needed to resume a session after process death
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSessionSnapshot {
    pub version: u32,
    pub written_at: DateTime<Local>,
    pub session: Session,
    /// Selection the session contributed when the snapshot was written
    #[serde(default)]
    pub selection: Option<RestrictionSet>,
}

impl PersistedSessionSnapshot {
    pub fn new(session: Session, selection: Option<RestrictionSet>, written_at: DateTime<Local>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            written_at,
            session,
            selection,
        }
    }
}

/// Event detected by background reconciliation, finalized on next launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingEventKind {
    Completion,
    WindowEntered,
    WindowExited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub kind: SessionKind,
    pub session_id: SessionId,
    pub event: PendingEventKind,
    pub detected_at: DateTime<Local>,
}

/// Last foreground/background transitions of the host process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleMarks {
    pub last_foreground: Option<DateTime<Local>>,
    pub last_background: Option<DateTime<Local>>,
}

impl LifecycleMarks {
    /// Whether the previous process looks like it died without going to the
    /// background first.
    pub fn looks_uncontrolled(&self, threshold: Duration) -> bool {
        match (self.last_foreground, self.last_background) {
            (Some(fg), Some(bg)) => (fg - bg).to_std().is_ok_and(|gap| gap > threshold),
            (Some(_), None) => true,
            _ => false,
        }
    }
}
