//! Background reconciliation: wake-up handlers that run while the
//! coordinator is not live
//!
//! Handlers read snapshots and write pending events for the next launch.
//! They never touch the enforcer.

use chrono::{DateTime, Local};
use gatekeep_api::{PendingEvent, PendingEventKind, SessionKind, SessionVariant, WakeupKind};
use gatekeep_config::BackgroundConfig;
use gatekeep_host_api::{HostError, HostServices};
use gatekeep_util::chrono_duration;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{PersistenceEngine, SessionError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{kind} wake-up exceeded its {budget:?} budget")]
    BudgetExceeded { kind: WakeupKind, budget: Duration },

    #[error("Sensor error: {0}")]
    Sensor(#[from] HostError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result of one completed wake-up
#[derive(Debug, Clone, PartialEq)]
pub struct WakeupOutcome {
    pub kind: WakeupKind,
    /// Pending events written during this wake-up
    pub pending: Vec<PendingEvent>,
    /// When the successor was scheduled for
    pub next_wakeup: DateTime<Local>,
}

pub struct BackgroundReconciler {
    config: BackgroundConfig,
    persistence: PersistenceEngine,
    services: HostServices,
}

impl BackgroundReconciler {
    pub fn new(config: BackgroundConfig, persistence: PersistenceEngine, services: HostServices) -> Self {
        Self {
            config,
            persistence,
            services,
        }
    }

    fn interval(&self, kind: WakeupKind) -> Duration {
        match kind {
            WakeupKind::SessionCheck => self.config.session_check_interval,
            WakeupKind::SensorRefresh => self.config.sensor_refresh_interval,
        }
    }

    /// Ask the host for the next wake-up of `kind`
    pub fn schedule(&self, kind: WakeupKind, now: DateTime<Local>) -> DateTime<Local> {
        let next = now + chrono_duration(self.interval(kind));
        match self.services.scheduler.schedule_wakeup(kind, next) {
            Ok(()) => debug!(kind = %kind, next = %next, "Wake-up scheduled"),
            Err(e) => warn!(kind = %kind, error = %e, "Failed to schedule wake-up"),
        }
        next
    }

    /// Schedule both wake-up kinds
    pub fn schedule_all(&self, now: DateTime<Local>) {
        self.schedule(WakeupKind::SessionCheck, now);
        self.schedule(WakeupKind::SensorRefresh, now);
    }

    /// Handle one wake-up. The successor is scheduled before any work runs.
    pub async fn handle_wakeup(
        &self,
        kind: WakeupKind,
        now: DateTime<Local>,
    ) -> Result<WakeupOutcome, ReconcileError> {
        let next_wakeup = self.schedule(kind, now);

        let result = match kind {
            WakeupKind::SessionCheck => self.session_check(now),
            WakeupKind::SensorRefresh => self.sensor_refresh(now).await,
        };

        match result {
            Ok(pending) => {
                info!(kind = %kind, pending = pending.len(), "Wake-up handled");
                Ok(WakeupOutcome {
                    kind,
                    pending,
                    next_wakeup,
                })
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "Wake-up failed");
                Err(e)
            }
        }
    }

    /// Cooperative pass over the time-based slots; the budget is checked
    /// before each slot.
    fn session_check(&self, now: DateTime<Local>) -> Result<Vec<PendingEvent>, ReconcileError> {
        let started = Instant::now();
        let budget = self.config.time_budget;
        let mut pending = Vec::new();

        for kind in SessionKind::ALL.into_iter().filter(SessionKind::is_time_based) {
            if started.elapsed() >= budget {
                return Err(ReconcileError::BudgetExceeded {
                    kind: WakeupKind::SessionCheck,
                    budget,
                });
            }

            let snapshot = match self.persistence.load_snapshot(kind) {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Snapshot unreadable, skipping");
                    continue;
                }
            };
            let session = &snapshot.session;

            let event = if session.deadline().is_some_and(|deadline| now >= deadline) {
                Some(PendingEventKind::Completion)
            } else {
                match session.window().map(|w| w.contains(&now)) {
                    Some(true) if !session.active => Some(PendingEventKind::WindowEntered),
                    Some(false) if session.active => Some(PendingEventKind::WindowExited),
                    _ => None,
                }
            };

            if let Some(event) = event {
                let flag = PendingEvent {
                    kind,
                    session_id: session.id,
                    event,
                    detected_at: now,
                };
                self.persistence.write_pending(&flag)?;
                pending.push(flag);
            }
        }

        Ok(pending)
    }

    /// Pull the step count under the budget and flag a met non-daily goal
    async fn sensor_refresh(&self, now: DateTime<Local>) -> Result<Vec<PendingEvent>, ReconcileError> {
        let kind = SessionKind::StepGoal;
        let snapshot = match self.persistence.load_snapshot(kind) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(Vec::new()),
            Err(e) => {
                warn!(kind = %kind, error = %e, "Snapshot unreadable, skipping");
                return Ok(Vec::new());
            }
        };
        let SessionVariant::StepGoal(goal) = &snapshot.session.variant else {
            return Ok(Vec::new());
        };

        let budget = self.config.time_budget;
        let count = tokio::time::timeout(budget, self.services.steps.fetch_current_count())
            .await
            .map_err(|_| ReconcileError::BudgetExceeded {
                kind: WakeupKind::SensorRefresh,
                budget,
            })??;

        debug!(count, target = goal.target, "Background step count");
        if goal.daily_reset || !goal.is_reached(count) {
            return Ok(Vec::new());
        }

        let flag = PendingEvent {
            kind,
            session_id: snapshot.session.id,
            event: PendingEventKind::Completion,
            detected_at: now,
        };
        self.persistence.write_pending(&flag)?;
        Ok(vec![flag])
    }
}

impl std::fmt::Debug for BackgroundReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundReconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gatekeep_api::{Recurrence, Session};
    use gatekeep_host_api::MockHost;
    use gatekeep_store::SqliteStore;
    use std::sync::Arc;

    // Monday
    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn setup(budget: Duration) -> (BackgroundReconciler, PersistenceEngine, MockHost) {
        let host = MockHost::new();
        let persistence = PersistenceEngine::new(Arc::new(SqliteStore::in_memory().unwrap()), 50);
        let config = BackgroundConfig {
            session_check_interval: Duration::from_secs(900),
            sensor_refresh_interval: Duration::from_secs(1800),
            time_budget: budget,
        };
        let reconciler = BackgroundReconciler::new(config, persistence.clone(), host.services());
        (reconciler, persistence, host)
    }

    #[tokio::test]
    async fn session_check_flags_expired_timer_and_window_changes() {
        let (reconciler, persistence, host) = setup(Duration::from_secs(25));

        let mut timed = Session::new("Focus", SessionVariant::timed(Duration::from_secs(600)), at(9, 0));
        timed.active = true;
        persistence.save_snapshot(&timed, None, at(9, 0)).unwrap();

        let scheduled = Session::new(
            "School",
            SessionVariant::scheduled(
                Recurrence::Weekdays,
                "09:00".parse().unwrap(),
                "15:00".parse().unwrap(),
            ),
            at(8, 0),
        );
        persistence.save_snapshot(&scheduled, None, at(8, 0)).unwrap();

        let outcome = reconciler
            .handle_wakeup(WakeupKind::SessionCheck, at(9, 30))
            .await
            .unwrap();

        let events: Vec<_> = outcome.pending.iter().map(|p| (p.kind, p.event)).collect();
        assert_eq!(
            events,
            vec![
                (SessionKind::Timed, PendingEventKind::Completion),
                (SessionKind::Scheduled, PendingEventKind::WindowEntered),
            ]
        );
        assert!(persistence.load_pending(SessionKind::Timed).unwrap().is_some());

        // Successor scheduled first, one interval out
        assert_eq!(
            host.scheduler.scheduled(),
            vec![(WakeupKind::SessionCheck, at(9, 45))]
        );
        assert_eq!(outcome.next_wakeup, at(9, 45));
    }

    #[tokio::test]
    async fn unreadable_slot_does_not_stop_the_check() {
        let (reconciler, persistence, _) = setup(Duration::from_secs(25));

        let long = Session::new("Long", SessionVariant::timed(Duration::from_secs(10u64.pow(13))), at(8, 0));
        persistence.save_snapshot(&long, None, at(8, 0)).unwrap();
        let scheduled = Session::new(
            "School",
            SessionVariant::scheduled(
                Recurrence::Weekdays,
                "09:00".parse().unwrap(),
                "15:00".parse().unwrap(),
            ),
            at(8, 0),
        );
        persistence.save_snapshot(&scheduled, None, at(8, 0)).unwrap();

        let outcome = reconciler
            .handle_wakeup(WakeupKind::SessionCheck, at(9, 30))
            .await
            .unwrap();
        let kinds: Vec<_> = outcome.pending.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![SessionKind::Scheduled]);
        assert!(persistence.load_pending(SessionKind::Timed).unwrap().is_none());
    }

    #[tokio::test]
    async fn exhausted_budget_is_a_failure() {
        let (reconciler, persistence, host) = setup(Duration::ZERO);
        let timed = Session::new("Focus", SessionVariant::timed(Duration::from_secs(60)), at(9, 0));
        persistence.save_snapshot(&timed, None, at(9, 0)).unwrap();

        let result = reconciler.handle_wakeup(WakeupKind::SessionCheck, at(10, 0)).await;
        assert!(matches!(
            result,
            Err(ReconcileError::BudgetExceeded {
                kind: WakeupKind::SessionCheck,
                ..
            })
        ));
        // Rescheduled even though the work failed
        assert_eq!(host.scheduler.scheduled().len(), 1);
    }

    #[tokio::test]
    async fn sensor_refresh_flags_met_goal() {
        let (reconciler, persistence, host) = setup(Duration::from_secs(5));
        let goal = Session::new("Walk", SessionVariant::step_goal(5000, false), at(8, 0));
        persistence.save_snapshot(&goal, None, at(8, 0)).unwrap();

        host.steps.set_count(4000);
        let outcome = reconciler
            .handle_wakeup(WakeupKind::SensorRefresh, at(12, 0))
            .await
            .unwrap();
        assert!(outcome.pending.is_empty());

        host.steps.set_count(5200);
        let outcome = reconciler
            .handle_wakeup(WakeupKind::SensorRefresh, at(12, 30))
            .await
            .unwrap();
        assert_eq!(outcome.pending.len(), 1);
        assert_eq!(outcome.pending[0].session_id, goal.id);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sensor_exceeds_budget() {
        let (reconciler, persistence, host) = setup(Duration::from_secs(5));
        let goal = Session::new("Walk", SessionVariant::step_goal(5000, false), at(8, 0));
        persistence.save_snapshot(&goal, None, at(8, 0)).unwrap();

        *host.steps.fetch_delay.lock().unwrap() = Some(Duration::from_secs(60));
        let result = reconciler.handle_wakeup(WakeupKind::SensorRefresh, at(12, 0)).await;
        assert!(matches!(
            result,
            Err(ReconcileError::BudgetExceeded {
                kind: WakeupKind::SensorRefresh,
                ..
            })
        ));
        assert!(persistence.load_pending(SessionKind::StepGoal).unwrap().is_none());
    }
}
