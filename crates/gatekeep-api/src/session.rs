//! Session kinds and their variant-specific state

use chrono::{DateTime, Local, NaiveDate};
use gatekeep_util::{DaysOfWeek, ItemId, SelectionId, SessionId, TimeWindow, WallClock, chrono_duration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Session kind tag; the registry holds at most one session per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Timed,
    Scheduled,
    Checklist,
    Geofenced,
    StepGoal,
    SleepWindow,
}

impl SessionKind {
    /// Every kind, in the fixed order used for restoration and bulk teardown
    pub const ALL: [SessionKind; 6] = [
        SessionKind::Timed,
        SessionKind::Scheduled,
        SessionKind::Checklist,
        SessionKind::Geofenced,
        SessionKind::StepGoal,
        SessionKind::SleepWindow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Timed => "timed",
            SessionKind::Scheduled => "scheduled",
            SessionKind::Checklist => "checklist",
            SessionKind::Geofenced => "geofenced",
            SessionKind::StepGoal => "step_goal",
            SessionKind::SleepWindow => "sleep_window",
        }
    }

    /// Fixed selection id this kind registers with the merger
    pub fn selection_id(&self) -> SelectionId {
        SelectionId::new(format!("selection.{}", self.as_str()))
    }

    /// Kinds whose enforcement follows a wall-clock predicate
    pub fn is_time_based(&self) -> bool {
        matches!(
            self,
            SessionKind::Timed | SessionKind::Scheduled | SessionKind::SleepWindow
        )
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        SessionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("Unknown session kind: {s}"))
    }
}

/// Which days a scheduled session recurs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "days", rename_all = "snake_case")]
pub enum Recurrence {
    Daily,
    Weekdays,
    Weekends,
    Custom(DaysOfWeek),
}

impl Recurrence {
    pub fn days(&self) -> DaysOfWeek {
        match self {
            Recurrence::Daily => DaysOfWeek::ALL_DAYS,
            Recurrence::Weekdays => DaysOfWeek::WEEKDAYS,
            Recurrence::Weekends => DaysOfWeek::WEEKENDS,
            Recurrence::Custom(days) => *days,
        }
    }
}

/// Region boundary crossing reported by the location collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionTransition {
    Entered,
    Exited,
}

/// How region crossings map onto enforcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Restrict from the first entry until the session ends
    OnEnter,
    /// Restrict only while inside the region
    WhileInside,
    /// Restrict after leaving; entering lifts it again
    OnExit,
}

impl TriggerMode {
    /// Enforcement membership after `transition`, given the current membership
    pub fn enforcing_after(&self, transition: RegionTransition, currently: bool) -> bool {
        match (self, transition) {
            (TriggerMode::OnEnter, RegionTransition::Entered) => true,
            (TriggerMode::OnEnter, RegionTransition::Exited) => currently,
            (TriggerMode::WhileInside, RegionTransition::Entered) => true,
            (TriggerMode::WhileInside, RegionTransition::Exited) => false,
            (TriggerMode::OnExit, RegionTransition::Entered) => false,
            (TriggerMode::OnExit, RegionTransition::Exited) => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// Longest accepted Timed duration
pub const MAX_TIMED_DURATION: Duration = Duration::from_secs(366 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedSession {
    pub duration: Duration,
}

impl TimedSession {
    /// Deadline with the duration capped at [`MAX_TIMED_DURATION`]. Never
    /// overflows; a start too close to the end of time counts as expired.
    pub fn deadline(&self, started_at: DateTime<Local>) -> DateTime<Local> {
        started_at
            .checked_add_signed(chrono_duration(self.duration.min(MAX_TIMED_DURATION)))
            .unwrap_or(started_at)
    }

    pub fn remaining(&self, started_at: DateTime<Local>, now: DateTime<Local>) -> Duration {
        (self.deadline(started_at) - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, started_at: DateTime<Local>, now: DateTime<Local>) -> bool {
        now >= self.deadline(started_at)
    }

    /// Elapsed share of the duration, clamped to `0.0..=100.0`
    pub fn percent_elapsed(&self, started_at: DateTime<Local>, now: DateTime<Local>) -> f64 {
        if self.duration.is_zero() {
            return 100.0;
        }
        let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64() * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSession {
    pub recurrence: Recurrence,
    pub start: WallClock,
    pub end: WallClock,
}

impl ScheduledSession {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.recurrence.days(), self.start, self.end)
    }
}

/// Checklist item state as reported by the item source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatus {
    pub id: ItemId,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistSession {
    pub items: Vec<ItemId>,
    #[serde(default)]
    pub completed: BTreeSet<ItemId>,
}

impl ChecklistSession {
    /// Fold item updates into the completed set. Items not monitored are ignored.
    /// Returns whether anything changed.
    pub fn apply_statuses(&mut self, statuses: &[ItemStatus]) -> bool {
        let mut changed = false;
        for status in statuses.iter().filter(|s| self.items.contains(&s.id)) {
            changed |= if status.completed {
                self.completed.insert(status.id.clone())
            } else {
                self.completed.remove(&status.id)
            };
        }
        changed
    }

    pub fn is_satisfied(&self) -> bool {
        self.items.iter().all(|item| self.completed.contains(item))
    }

    /// `(completed, total)`
    pub fn progress(&self) -> (usize, usize) {
        let done = self.items.iter().filter(|item| self.completed.contains(*item)).count();
        (done, self.items.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofencedSession {
    pub center: Coordinate,
    pub radius_meters: f64,
    pub trigger: TriggerMode,
    /// Last boundary crossing seen, if any
    #[serde(default)]
    pub last_transition: Option<RegionTransition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepGoalSession {
    pub target: u64,
    pub daily_reset: bool,
    #[serde(default)]
    pub last_count: u64,
    /// Day the goal was reached; only kept for daily-reset goals
    #[serde(default)]
    pub satisfied_on: Option<NaiveDate>,
}

impl StepGoalSession {
    pub fn is_reached(&self, count: u64) -> bool {
        count >= self.target
    }

    pub fn satisfied_today(&self, today: NaiveDate) -> bool {
        self.satisfied_on == Some(today)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepWindowSession {
    pub bedtime: WallClock,
    pub wake: WallClock,
    pub days: DaysOfWeek,
}

impl SleepWindowSession {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.days, self.bedtime, self.wake)
    }
}

/// Variant-specific part of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionVariant {
    Timed(TimedSession),
    Scheduled(ScheduledSession),
    Checklist(ChecklistSession),
    Geofenced(GeofencedSession),
    StepGoal(StepGoalSession),
    SleepWindow(SleepWindowSession),
}

impl SessionVariant {
    pub fn timed(duration: Duration) -> Self {
        Self::Timed(TimedSession { duration })
    }

    pub fn scheduled(recurrence: Recurrence, start: WallClock, end: WallClock) -> Self {
        Self::Scheduled(ScheduledSession { recurrence, start, end })
    }

    pub fn checklist(items: impl IntoIterator<Item = ItemId>) -> Self {
        Self::Checklist(ChecklistSession {
            items: items.into_iter().collect(),
            completed: BTreeSet::new(),
        })
    }

    pub fn geofenced(center: Coordinate, radius_meters: f64, trigger: TriggerMode) -> Self {
        Self::Geofenced(GeofencedSession {
            center,
            radius_meters,
            trigger,
            last_transition: None,
        })
    }

    pub fn step_goal(target: u64, daily_reset: bool) -> Self {
        Self::StepGoal(StepGoalSession {
            target,
            daily_reset,
            last_count: 0,
            satisfied_on: None,
        })
    }

    pub fn sleep_window(bedtime: WallClock, wake: WallClock, days: DaysOfWeek) -> Self {
        Self::SleepWindow(SleepWindowSession { bedtime, wake, days })
    }

    pub fn kind(&self) -> SessionKind {
        match self {
            SessionVariant::Timed(_) => SessionKind::Timed,
            SessionVariant::Scheduled(_) => SessionKind::Scheduled,
            SessionVariant::Checklist(_) => SessionKind::Checklist,
            SessionVariant::Geofenced(_) => SessionKind::Geofenced,
            SessionVariant::StepGoal(_) => SessionKind::StepGoal,
            SessionVariant::SleepWindow(_) => SessionKind::SleepWindow,
        }
    }

    /// Reject parameters no session can be started with
    pub fn validate(&self) -> Result<(), String> {
        match self {
            SessionVariant::Timed(t) if t.duration.is_zero() => Err("duration must be positive".into()),
            SessionVariant::Timed(t) if t.duration > MAX_TIMED_DURATION => {
                Err("duration is longer than a year".into())
            }
            SessionVariant::Scheduled(s) if s.window().is_empty() => {
                Err("schedule window is empty".into())
            }
            SessionVariant::Checklist(c) if c.items.is_empty() => {
                Err("checklist needs at least one item".into())
            }
            SessionVariant::Geofenced(g)
                if !(-90.0..=90.0).contains(&g.center.latitude)
                    || !(-180.0..=180.0).contains(&g.center.longitude) =>
            {
                Err("center coordinate is out of range".into())
            }
            SessionVariant::StepGoal(s) if s.target == 0 => Err("step target must be positive".into()),
            SessionVariant::SleepWindow(s) if s.window().is_empty() => {
                Err("sleep window is empty".into())
            }
            _ => Ok(()),
        }
    }
}

/// One session of any kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub created_at: DateTime<Local>,
    /// Whether the session currently contributes its selection to the merged set
    pub active: bool,
    pub variant: SessionVariant,
}

impl Session {
    pub fn new(name: impl Into<String>, variant: SessionVariant, now: DateTime<Local>) -> Self {
        Self {
            id: SessionId::new(),
            name: name.into(),
            created_at: now,
            active: false,
            variant,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.variant.kind()
    }

    /// Wall-clock window for Scheduled and SleepWindow sessions
    pub fn window(&self) -> Option<TimeWindow> {
        match &self.variant {
            SessionVariant::Scheduled(s) => Some(s.window()),
            SessionVariant::SleepWindow(s) => Some(s.window()),
            _ => None,
        }
    }

    /// Deadline of a Timed session
    pub fn deadline(&self) -> Option<DateTime<Local>> {
        match &self.variant {
            SessionVariant::Timed(t) => Some(t.deadline(self.created_at)),
            _ => None,
        }
    }

    /// Remaining time of a Timed session
    pub fn remaining(&self, now: DateTime<Local>) -> Option<Duration> {
        match &self.variant {
            SessionVariant::Timed(t) => Some(t.remaining(self.created_at, now)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in SessionKind::ALL {
            assert_eq!(kind.as_str().parse::<SessionKind>().unwrap(), kind);
        }
        assert_eq!("step-goal".parse::<SessionKind>().unwrap(), SessionKind::StepGoal);
        assert!("pomodoro".parse::<SessionKind>().is_err());
    }

    #[test]
    fn selection_ids_are_distinct_per_kind() {
        let ids: BTreeSet<_> = SessionKind::ALL.iter().map(|k| k.selection_id()).collect();
        assert_eq!(ids.len(), SessionKind::ALL.len());
        assert!(ids.iter().all(|id| !id.is_legacy()));
    }

    #[test]
    fn timed_remaining_and_percent() {
        let timed = TimedSession {
            duration: Duration::from_secs(600),
        };
        let later = t0() + chrono::Duration::seconds(150);

        assert_eq!(timed.remaining(t0(), later), Duration::from_secs(450));
        assert!((timed.percent_elapsed(t0(), later) - 25.0).abs() < f64::EPSILON);
        assert!(!timed.is_expired(t0(), later));

        let past = t0() + chrono::Duration::seconds(1000);
        assert_eq!(timed.remaining(t0(), past), Duration::ZERO);
        assert_eq!(timed.percent_elapsed(t0(), past), 100.0);
        assert!(timed.is_expired(t0(), past));
    }

    #[test]
    fn oversized_timer_deadline_is_capped() {
        let timed = TimedSession {
            duration: Duration::from_secs(10u64.pow(13)),
        };
        assert_eq!(timed.deadline(t0()), t0() + chrono_duration(MAX_TIMED_DURATION));
        assert!(!timed.is_expired(t0(), t0() + chrono::Duration::days(30)));

        let forever = TimedSession {
            duration: Duration::MAX,
        };
        assert_eq!(forever.deadline(t0()), timed.deadline(t0()));
    }

    #[test]
    fn checklist_satisfaction() {
        let SessionVariant::Checklist(mut list) =
            SessionVariant::checklist(["a".into(), "b".into()])
        else {
            unreachable!()
        };

        assert!(!list.is_satisfied());
        let changed = list.apply_statuses(&[
            ItemStatus { id: "a".into(), completed: true },
            ItemStatus { id: "zzz".into(), completed: true },
        ]);
        assert!(changed);
        assert_eq!(list.progress(), (1, 2));

        assert!(!list.apply_statuses(&[ItemStatus { id: "a".into(), completed: true }]));
        list.apply_statuses(&[ItemStatus { id: "b".into(), completed: true }]);
        assert!(list.is_satisfied());

        list.apply_statuses(&[ItemStatus { id: "a".into(), completed: false }]);
        assert!(!list.is_satisfied());
    }

    #[test]
    fn trigger_modes() {
        use RegionTransition::*;

        assert!(TriggerMode::WhileInside.enforcing_after(Entered, false));
        assert!(!TriggerMode::WhileInside.enforcing_after(Exited, true));
        assert!(TriggerMode::OnEnter.enforcing_after(Exited, true));
        assert!(!TriggerMode::OnEnter.enforcing_after(Exited, false));
        assert!(TriggerMode::OnExit.enforcing_after(Exited, false));
        assert!(!TriggerMode::OnExit.enforcing_after(Entered, true));
    }

    #[test]
    fn validation_rejects_degenerate_sessions() {
        let noon: WallClock = "12:00".parse().unwrap();
        assert!(SessionVariant::timed(Duration::ZERO).validate().is_err());
        assert!(SessionVariant::timed(MAX_TIMED_DURATION).validate().is_ok());
        assert!(
            SessionVariant::timed(MAX_TIMED_DURATION + Duration::from_secs(1))
                .validate()
                .is_err()
        );
        assert!(SessionVariant::checklist(Vec::new()).validate().is_err());
        assert!(SessionVariant::step_goal(0, false).validate().is_err());
        assert!(SessionVariant::scheduled(Recurrence::Daily, noon, noon).validate().is_err());
        assert!(
            SessionVariant::geofenced(
                Coordinate { latitude: 91.0, longitude: 0.0 },
                100.0,
                TriggerMode::WhileInside
            )
            .validate()
            .is_err()
        );
        assert!(SessionVariant::timed(Duration::from_secs(60)).validate().is_ok());
    }

    #[test]
    fn session_serializes_with_kind_tag() {
        let session = Session::new("Focus", SessionVariant::timed(Duration::from_secs(1800)), t0());
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["variant"]["kind"], "timed");

        let parsed: Session = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, session);
        assert_eq!(parsed.deadline(), Some(t0() + chrono::Duration::seconds(1800)));
    }
}
