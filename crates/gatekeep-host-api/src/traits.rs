//! Collaborator traits

use async_trait::async_trait;
use chrono::{DateTime, Local};
use gatekeep_api::{
    Coordinate, ItemStatus, LiveState, NotificationContext, NotificationKind, RegionTransition,
    RestrictionSet, WakeupKind,
};
use gatekeep_util::{ItemId, SessionId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from collaborator operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Enforcement rejected: {0}")]
    EnforcementRejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Events collaborators push to the coordinator.
///
/// All monitors share one ordered channel; the coordinator consumes it from
/// its own task, so no collaborator ever mutates session state directly.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Boundary crossing for a monitored region
    Region {
        session_id: SessionId,
        transition: RegionTransition,
    },

    /// Step count for today changed
    StepCountChanged { count: u64 },

    /// One or more monitored checklist items changed
    ChecklistChanged { items: Vec<ItemStatus> },
}

pub type EventSender = mpsc::UnboundedSender<HostEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<HostEvent>;

/// Create the single channel all monitors report through
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Region handed to the location collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub session_id: SessionId,
    pub center: Coordinate,
    pub radius_meters: f64,
}

/// The platform capability that actually blocks restriction targets.
///
/// Only the blocking rule merger may call `replace_restriction_set`.
#[async_trait]
pub trait RestrictionEnforcer: Send + Sync {
    /// Ask the platform for permission to restrict apps
    async fn request_authorization(&self) -> HostResult<()>;

    /// Replace the whole enforced set. Must be idempotent.
    fn replace_restriction_set(&self, set: &RestrictionSet) -> HostResult<()>;
}

#[async_trait]
pub trait LocationMonitor: Send + Sync {
    async fn request_authorization(&self) -> HostResult<()>;

    /// Smallest radius the platform can monitor reliably
    fn minimum_radius_meters(&self) -> f64;

    /// Begin reporting crossings of `region` as [`HostEvent::Region`]
    fn start_monitoring(&self, region: &Region, events: EventSender) -> HostResult<()>;

    fn stop_monitoring(&self, session_id: &SessionId);
}

#[async_trait]
pub trait StepCounter: Send + Sync {
    async fn request_authorization(&self) -> HostResult<()>;

    /// Steps counted so far today
    async fn fetch_current_count(&self) -> HostResult<u64>;

    /// Begin reporting count changes as [`HostEvent::StepCountChanged`]
    fn observe_changes(&self, events: EventSender) -> HostResult<()>;

    fn stop_observing(&self);
}

/// Task-list store backing checklist sessions
pub trait ItemSource: Send + Sync {
    /// Begin reporting changes to `items` as [`HostEvent::ChecklistChanged`].
    /// Returns the current status of each item.
    fn observe_changes(&self, items: &[ItemId], events: EventSender) -> HostResult<Vec<ItemStatus>>;

    fn stop_observing(&self);
}

/// Notification and live-status delivery. Fire-and-forget for the core.
pub trait StatusSink: Send + Sync {
    fn post(&self, kind: NotificationKind, context: &NotificationContext) -> HostResult<()>;

    fn update_live_status(&self, session_id: &SessionId, state: &LiveState) -> HostResult<()>;

    fn end_live_status(&self, session_id: &SessionId) -> HostResult<()>;
}

/// Host facility that wakes the process in the background
pub trait BackgroundScheduler: Send + Sync {
    fn schedule_wakeup(&self, kind: WakeupKind, not_before: DateTime<Local>) -> HostResult<()>;
}
