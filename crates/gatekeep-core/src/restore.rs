//! Restoration of session state at process start

use chrono::{DateTime, Local};
use gatekeep_api::{
    CompletedSessionRecord, EndReason, PendingEvent, PendingEventKind, PersistedSessionSnapshot,
    Session, SessionKind, SessionVariant,
};
use gatekeep_util::SelectionId;
use tracing::{debug, info, warn};

use crate::{SessionCoordinator, SessionError, SessionResult};

/// What `restore_all` found and did
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Kinds whose session is live again
    pub restored: Vec<SessionKind>,
    /// Sessions that finished while the process was gone
    pub ended: Vec<CompletedSessionRecord>,
    /// Per-slot failures; the slot was treated as empty
    pub failures: Vec<SessionError>,
    /// The previous process stopped without a background transition
    pub uncontrolled_termination: bool,
}

enum SlotOutcome {
    Empty,
    Restored,
    Ended(CompletedSessionRecord),
}

impl SessionCoordinator {
    /// Rebuild every slot from the durable store. Run once per process start,
    /// before any other operation.
    pub fn restore_all(&mut self, now: DateTime<Local>) -> RestoreReport {
        let mut report = RestoreReport::default();

        match self.persistence.lifecycle() {
            Ok(marks) => {
                report.uncontrolled_termination =
                    marks.looks_uncontrolled(self.config.termination_threshold);
            }
            Err(e) => {
                warn!(error = %e, "Lifecycle marks unreadable");
                report.failures.push(e);
            }
        }
        if report.uncontrolled_termination {
            warn!("Previous process ended without reaching the background");
        }

        for kind in SessionKind::ALL {
            let pending = self.persistence.load_pending(kind).unwrap_or_else(|e| {
                warn!(kind = %kind, error = %e, "Pending event unreadable, ignoring");
                None
            });

            match self.restore_slot(kind, pending.as_ref(), now) {
                Ok(SlotOutcome::Empty) => {}
                Ok(SlotOutcome::Restored) => report.restored.push(kind),
                Ok(SlotOutcome::Ended(record)) => report.ended.push(record),
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Slot not restored");
                    if matches!(e, SessionError::PersistenceDecodeFailure { .. })
                        && let Err(e) = self.persistence.delete_snapshot(kind)
                    {
                        warn!(kind = %kind, error = %e, "Failed to remove corrupt snapshot");
                    }
                    report.failures.push(e);
                }
            }

            if let Err(e) = self.persistence.clear_pending(kind) {
                warn!(kind = %kind, error = %e, "Failed to clear pending event");
            }
        }

        let legacy = SelectionId::legacy();
        if let Some(set) = self.selections.get(&legacy).cloned()
            && let Err(e) = self.merger.register(legacy, set)
        {
            warn!(error = %e, "Legacy selection not enforced");
        }

        // Reconcile whatever a previous process left applied
        if let Err(e) = self.merger.sync() {
            report.failures.push(e);
        }
        self.last_window_check = Some(now);

        info!(
            restored = report.restored.len(),
            ended = report.ended.len(),
            failures = report.failures.len(),
            uncontrolled = report.uncontrolled_termination,
            "Restoration complete"
        );
        report
    }

    fn restore_slot(
        &mut self,
        kind: SessionKind,
        pending: Option<&PendingEvent>,
        now: DateTime<Local>,
    ) -> SessionResult<SlotOutcome> {
        if self.slots.contains_key(&kind) {
            debug!(kind = %kind, "Slot already occupied, skipping restore");
            return Ok(SlotOutcome::Empty);
        }
        let Some(snapshot) = self.persistence.load_snapshot(kind)? else {
            return Ok(SlotOutcome::Empty);
        };
        let PersistedSessionSnapshot {
            mut session,
            selection,
            ..
        } = snapshot;

        let selection = match selection {
            Some(set) => set,
            None => self.resolve_selection(kind, None),
        };
        if let Err(e) = self.selections.put(kind.selection_id(), selection) {
            warn!(kind = %kind, error = %e, "Failed to persist restored selection");
        }

        if let Some(event) = pending {
            match event.event {
                PendingEventKind::Completion if event.session_id == session.id => {
                    info!(kind = %kind, session_id = %session.id, "Completed while in background");
                    return Ok(self.finish(session, EndReason::Completed, now));
                }
                PendingEventKind::Completion => {
                    debug!(kind = %kind, "Completion flag for another session, ignoring");
                }
                PendingEventKind::WindowEntered | PendingEventKind::WindowExited => {
                    debug!(kind = %kind, event = ?event.event, "Window change acknowledged");
                }
            }
        }

        if session.deadline().is_some_and(|deadline| now >= deadline) {
            info!(kind = %kind, session_id = %session.id, "Expired while not running");
            return Ok(self.finish(session, EndReason::Expired, now));
        }

        let active = enforcing_on_restore(&mut session, now);
        session.active = active;
        let statuses = match self.monitors.install(&session) {
            Ok(statuses) => statuses,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Monitor unavailable, session restored without it");
                Vec::new()
            }
        };

        info!(kind = %kind, session_id = %session.id, enforcing = active, "Session restored");
        self.slots.insert(kind, session);
        if active {
            self.enforce(kind);
        }

        if kind == SessionKind::Checklist
            && let Some(record) = self.apply_checklist(&statuses, now)
        {
            return Ok(SlotOutcome::Ended(record));
        }

        self.persist_slot(kind, now);
        self.update_live(kind, now);
        Ok(SlotOutcome::Restored)
    }

    /// Run the end path for a session that is not coming back
    fn finish(&mut self, session: Session, reason: EndReason, now: DateTime<Local>) -> SlotOutcome {
        let kind = session.kind();
        self.slots.insert(kind, session);
        match self.end(kind, reason, now) {
            Some(record) => SlotOutcome::Ended(record),
            None => SlotOutcome::Empty,
        }
    }
}

/// Enforcement state of a restored session as of `now`
fn enforcing_on_restore(session: &mut Session, now: DateTime<Local>) -> bool {
    let window = session.window();
    match &mut session.variant {
        SessionVariant::Timed(_) | SessionVariant::Checklist(_) => true,
        SessionVariant::Scheduled(_) | SessionVariant::SleepWindow(_) => {
            window.is_some_and(|w| w.contains(&now))
        }
        SessionVariant::Geofenced(_) => session.active,
        SessionVariant::StepGoal(goal) => {
            let today = now.date_naive();
            if goal.daily_reset && goal.satisfied_today(today) {
                false
            } else {
                if goal.satisfied_on.take().is_some() {
                    goal.last_count = 0;
                }
                true
            }
        }
    }
}
