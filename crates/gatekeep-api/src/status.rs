//! Payloads for the notification and live-status collaborator

use chrono::{DateTime, Local};
use gatekeep_util::SessionId;
use serde::{Deserialize, Serialize};

use crate::SessionKind;

/// Phase shown in the live-status projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivePhase {
    /// Session exists and its selection is enforced
    Active,
    /// Session exists but currently contributes nothing (outside window, outside region)
    Waiting,
    /// Trigger satisfied, teardown in progress
    Completing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub kind: SessionKind,
    pub name: String,
    pub phase: LivePhase,
    /// When the restriction is expected to lift, if known
    pub ends_at: Option<DateTime<Local>>,
    /// Completion progress in percent, if the kind has one
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SessionStarted,
    SessionCompleted,
    /// Daily step goal met; restriction lifted until tomorrow
    GoalReached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationContext {
    pub kind: SessionKind,
    pub session_id: SessionId,
    pub name: String,
    pub message: String,
}

/// Background wake-up flavours the host schedules for us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeupKind {
    /// Lightweight re-evaluation of time-based sessions
    SessionCheck,
    /// Heavier sensor pull (step count)
    SensorRefresh,
}

impl WakeupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakeupKind::SessionCheck => "session_check",
            WakeupKind::SensorRefresh => "sensor_refresh",
        }
    }
}

impl std::str::FromStr for WakeupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "session_check" => Ok(WakeupKind::SessionCheck),
            "sensor_refresh" => Ok(WakeupKind::SensorRefresh),
            _ => Err(format!("Unknown wake-up kind: {s}")),
        }
    }
}

impl std::fmt::Display for WakeupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
