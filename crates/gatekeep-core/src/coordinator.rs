//! Session registry and lifecycle manager

use chrono::{DateTime, Local};
use gatekeep_api::{
    CompletedSessionRecord, EndReason, ItemStatus, LivePhase, LiveState, NotificationContext,
    NotificationKind, RegionTransition, RestrictionSet, Session, SessionKind, SessionVariant,
};
use gatekeep_config::{Preset, SessionsConfig, Settings};
use gatekeep_host_api::{EventSender, HostEvent, HostServices};
use gatekeep_store::Store;
use gatekeep_util::{SelectionId, SessionId, chrono_duration};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::monitors::Monitors;
use crate::{
    BlockingRuleMerger, CoreEvent, PersistenceEngine, SelectionStore, SessionError, SessionResult,
};

/// Parameters for [`SessionCoordinator::start`]
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub name: String,
    pub variant: SessionVariant,
    /// Restriction targets for this session. When absent, the selection
    /// previously committed for the kind is used, then the legacy one.
    pub selection: Option<RestrictionSet>,
}

impl StartRequest {
    pub fn new(name: impl Into<String>, variant: SessionVariant) -> Self {
        Self {
            name: name.into(),
            variant,
            selection: None,
        }
    }

    pub fn with_selection(mut self, selection: RestrictionSet) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn from_preset(preset: &Preset, settings: &Settings) -> Self {
        Self {
            name: preset.name.clone(),
            variant: preset.variant.clone(),
            selection: settings.preset_selection(preset).cloned(),
        }
    }
}

/// Owns the per-kind session slots and everything that changes with them.
///
/// A single task owns the coordinator and mutates it through `&mut self`.
/// Collaborators report through the [`HostEvent`] channel, which the owner
/// feeds into [`SessionCoordinator::handle_host_event`].
pub struct SessionCoordinator {
    pub(crate) config: SessionsConfig,
    pub(crate) services: HostServices,
    pub(crate) persistence: PersistenceEngine,
    pub(crate) selections: SelectionStore,
    pub(crate) merger: BlockingRuleMerger,
    pub(crate) monitors: Monitors,
    pub(crate) slots: BTreeMap<SessionKind, Session>,
    pub(crate) last_window_check: Option<DateTime<Local>>,
    events: Vec<CoreEvent>,
}

impl SessionCoordinator {
    pub fn new(
        config: SessionsConfig,
        services: HostServices,
        store: Arc<dyn Store>,
        events: EventSender,
    ) -> Self {
        let persistence = PersistenceEngine::new(store, config.history_limit);
        let selections = SelectionStore::load(persistence.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "Selections unreadable, starting empty");
            SelectionStore::empty(persistence.clone())
        });

        info!(
            history_limit = config.history_limit,
            window_check_secs = config.window_check_interval.as_secs(),
            "Session coordinator initialized"
        );

        Self {
            merger: BlockingRuleMerger::new(services.enforcer.clone()),
            monitors: Monitors::new(services.clone(), events),
            config,
            services,
            persistence,
            selections,
            slots: BTreeMap::new(),
            last_window_check: None,
            events: Vec::new(),
        }
    }

    pub fn persistence(&self) -> &PersistenceEngine {
        &self.persistence
    }

    /// Start a session in its kind's slot
    pub async fn start(&mut self, request: StartRequest, now: DateTime<Local>) -> SessionResult<SessionId> {
        let kind = request.variant.kind();
        request.variant.validate().map_err(SessionError::InvalidRequest)?;

        if self.slots.contains_key(&kind) {
            warn!(kind = %kind, "Start rejected, a session of this kind is active");
            return Err(SessionError::AlreadyActive(kind));
        }

        self.authorize(kind).await.inspect_err(|e| {
            warn!(kind = %kind, error = %e, "Start rejected");
        })?;

        let name = match request.name.trim() {
            "" => kind.to_string(),
            name => name.to_string(),
        };
        let mut session = Session::new(name, request.variant, now);
        if let SessionVariant::Geofenced(fence) = &mut session.variant {
            fence.radius_meters = self.monitors.clamp_radius(fence.radius_meters);
        }
        session.active = initially_enforcing(&session, now);

        let selection = self.resolve_selection(kind, request.selection);
        if let Err(e) = self.selections.put(kind.selection_id(), selection) {
            warn!(kind = %kind, error = %e, "Failed to persist selection");
        }
        if session.active {
            self.enforce(kind);
        }
        self.persist(&session, now);

        let statuses = match self.monitors.install(&session) {
            Ok(statuses) => statuses,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Monitor installation failed, rolling back");
                self.release(kind);
                if let Err(e) = self.selections.remove(&kind.selection_id()) {
                    warn!(kind = %kind, error = %e, "Failed to remove selection");
                }
                if let Err(e) = self.persistence.delete_snapshot(kind) {
                    warn!(kind = %kind, error = %e, "Failed to delete snapshot");
                }
                return Err(e);
            }
        };

        let session_id = session.id;
        let enforcing = session.active;
        info!(
            kind = %kind,
            session_id = %session_id,
            name = %session.name,
            enforcing,
            "Session started"
        );
        self.notify(
            NotificationKind::SessionStarted,
            &session,
            format!("{} started", session.name),
        );
        self.events.push(CoreEvent::SessionStarted {
            session_id,
            kind,
            name: session.name.clone(),
            enforcing,
        });
        self.slots.insert(kind, session);
        self.update_live(kind, now);

        match kind {
            SessionKind::Checklist => {
                self.apply_checklist(&statuses, now);
            }
            SessionKind::StepGoal => {
                if let Err(e) = self.refresh_step_count(now).await {
                    debug!(error = %e, "Initial step count unavailable");
                }
            }
            _ => {}
        }

        Ok(session_id)
    }

    /// End the session in `kind`'s slot. `None` when the slot is empty.
    pub fn end(
        &mut self,
        kind: SessionKind,
        reason: EndReason,
        now: DateTime<Local>,
    ) -> Option<CompletedSessionRecord> {
        let session = self.slots.remove(&kind)?;

        self.monitors.remove(&session);
        self.release(kind);
        if let Err(e) = self.selections.remove(&kind.selection_id()) {
            warn!(kind = %kind, error = %e, "Failed to remove selection");
        }
        if let Err(e) = self.persistence.delete_snapshot(kind) {
            warn!(kind = %kind, error = %e, "Failed to delete snapshot");
        }
        if let Err(e) = self.persistence.clear_pending(kind) {
            warn!(kind = %kind, error = %e, "Failed to clear pending event");
        }

        let record = CompletedSessionRecord::new(&session, reason, now);
        if let Err(e) = self.persistence.append_history(&record) {
            warn!(kind = %kind, error = %e, "Failed to append history");
        }

        if let Err(e) = self.services.status.end_live_status(&session.id) {
            warn!(kind = %kind, error = %e, "Failed to end live status");
        }
        if record.completed {
            self.notify(
                NotificationKind::SessionCompleted,
                &session,
                format!("{} complete", session.name),
            );
        }

        info!(
            kind = %kind,
            session_id = %session.id,
            reason = ?reason,
            duration_secs = record.duration().as_secs(),
            "Session ended"
        );
        self.events.push(CoreEvent::SessionEnded {
            record: record.clone(),
        });

        Some(record)
    }

    /// End every session, in fixed kind order
    pub fn force_end_all(&mut self, now: DateTime<Local>) -> Vec<CompletedSessionRecord> {
        let mut records = Vec::new();

        for kind in SessionKind::ALL {
            if let Some(record) = self.end(kind, EndReason::ForceEnded, now) {
                records.push(record);
            }
            // Leftovers from slots that were never restored
            if let Err(e) = self.persistence.delete_snapshot(kind) {
                warn!(kind = %kind, error = %e, "Failed to delete snapshot");
            }
            if let Err(e) = self.persistence.clear_pending(kind) {
                warn!(kind = %kind, error = %e, "Failed to clear pending event");
            }
        }

        info!(count = records.len(), "All sessions force-ended");
        records
    }

    pub fn active_session(&self, kind: SessionKind) -> Option<&Session> {
        self.slots.get(&kind)
    }

    /// Every occupied slot, in kind order
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.slots.values()
    }

    pub fn is_any_session_active(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Most recent first
    pub fn history(&self, limit: usize) -> Vec<CompletedSessionRecord> {
        self.persistence.history(limit).unwrap_or_else(|e| {
            warn!(error = %e, "History unreadable");
            Vec::new()
        })
    }

    pub fn selection(&self, kind: SessionKind) -> Option<&RestrictionSet> {
        self.selections.get(&kind.selection_id())
    }

    /// The set currently handed to the enforcer
    pub fn merged_restrictions(&self) -> RestrictionSet {
        self.merger.merged()
    }

    /// Commit the selection a kind will use. Replaces the registration of
    /// an enforcing session of that kind.
    pub fn commit_selection(
        &mut self,
        kind: SessionKind,
        set: RestrictionSet,
        now: DateTime<Local>,
    ) -> SessionResult<()> {
        self.selections.put(kind.selection_id(), set)?;
        if self.slots.get(&kind).is_some_and(|s| s.active) {
            self.enforce(kind);
        }
        self.persist_slot(kind, now);
        debug!(kind = %kind, "Selection committed");
        Ok(())
    }

    /// Selection written by call sites without a session of their own
    pub fn set_legacy_selection(&mut self, set: Option<RestrictionSet>) -> SessionResult<()> {
        let id = SelectionId::legacy();
        let result = match set {
            Some(set) => {
                self.selections.put(id.clone(), set.clone())?;
                self.merger.register(id, set)
            }
            None => {
                self.selections.remove(&id)?;
                self.merger.unregister(&id)
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "Legacy selection not enforced");
        }
        Ok(())
    }

    /// Periodic evaluation: Timed deadlines, windows, daily step resets
    pub fn tick(&mut self, now: DateTime<Local>) {
        if self
            .slots
            .get(&SessionKind::Timed)
            .and_then(Session::deadline)
            .is_some_and(|deadline| now >= deadline)
        {
            info!("Timed session reached its deadline");
            self.complete(SessionKind::Timed, now);
        }

        let due = match self.last_window_check {
            None => true,
            Some(last) if now < last => true,
            Some(last) => (now - last)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= self.config.window_check_interval),
        };
        if due {
            self.evaluate_windows(now);
        }

        self.roll_over_step_goal(now);
    }

    /// Re-evaluate Scheduled and SleepWindow enforcement right now
    pub fn evaluate_windows(&mut self, now: DateTime<Local>) {
        self.last_window_check = Some(now);

        for kind in [SessionKind::Scheduled, SessionKind::SleepWindow] {
            let Some(session) = self.slots.get(&kind) else {
                continue;
            };
            let inside = session.window().is_some_and(|w| w.contains(&now));
            if inside != session.active {
                debug!(kind = %kind, inside, "Window boundary crossed");
                self.set_enforcing(kind, inside, now);
            }
        }
    }

    pub fn handle_host_event(&mut self, event: HostEvent, now: DateTime<Local>) {
        match event {
            HostEvent::Region {
                session_id,
                transition,
            } => self.apply_region(session_id, transition, now),
            HostEvent::StepCountChanged { count } => {
                self.apply_step_count(count, now);
            }
            HostEvent::ChecklistChanged { items } => {
                self.apply_checklist(&items, now);
            }
        }
    }

    /// Fetch today's step count and apply it. `None` without a StepGoal session.
    pub async fn refresh_step_count(&mut self, now: DateTime<Local>) -> SessionResult<Option<u64>> {
        if !self.slots.contains_key(&SessionKind::StepGoal) {
            return Ok(None);
        }

        let count = self
            .services
            .steps
            .fetch_current_count()
            .await
            .map_err(|e| SessionError::from_host("steps", e))?;
        self.apply_step_count(count, now);
        Ok(Some(count))
    }

    /// Persist every occupied slot
    pub fn snapshot_all(&self, now: DateTime<Local>) {
        for session in self.slots.values() {
            self.persist(session, now);
        }
    }

    pub fn record_foreground(&self, now: DateTime<Local>) {
        if let Err(e) = self.persistence.record_foreground(now) {
            warn!(error = %e, "Failed to record foreground transition");
        }
    }

    /// Snapshot everything and mark the background transition
    pub fn record_background(&self, now: DateTime<Local>) {
        self.snapshot_all(now);
        if let Err(e) = self.persistence.record_background(now) {
            warn!(error = %e, "Failed to record background transition");
        }
    }

    /// Events produced since the last call
    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    async fn authorize(&self, kind: SessionKind) -> SessionResult<()> {
        self.services
            .enforcer
            .request_authorization()
            .await
            .map_err(|e| SessionError::from_host("enforcement", e))?;

        match kind {
            SessionKind::Geofenced => self
                .services
                .location
                .request_authorization()
                .await
                .map_err(|e| SessionError::from_host("location", e)),
            SessionKind::StepGoal => self
                .services
                .steps
                .request_authorization()
                .await
                .map_err(|e| SessionError::from_host("steps", e)),
            _ => Ok(()),
        }
    }

    pub(crate) fn resolve_selection(
        &self,
        kind: SessionKind,
        supplied: Option<RestrictionSet>,
    ) -> RestrictionSet {
        if let Some(set) = supplied {
            return set;
        }
        if let Some(set) = self.selections.get(&kind.selection_id()) {
            return set.clone();
        }
        if let Some(set) = self.selections.get(&SelectionId::legacy()) {
            debug!(kind = %kind, "Falling back to legacy selection");
            return set.clone();
        }
        warn!(kind = %kind, "No selection committed, session restricts nothing");
        RestrictionSet::new()
    }

    pub(crate) fn enforce(&mut self, kind: SessionKind) {
        let set = self
            .selections
            .get(&kind.selection_id())
            .cloned()
            .unwrap_or_default();
        if let Err(e) = self.merger.register(kind.selection_id(), set) {
            warn!(kind = %kind, error = %e, "Restriction not enforced");
        }
    }

    pub(crate) fn release(&mut self, kind: SessionKind) {
        if let Err(e) = self.merger.unregister(&kind.selection_id()) {
            warn!(kind = %kind, error = %e, "Restriction not lifted");
        }
    }

    pub(crate) fn persist(&self, session: &Session, now: DateTime<Local>) {
        let selection = self.selections.get(&session.kind().selection_id());
        if let Err(e) = self.persistence.save_snapshot(session, selection, now) {
            warn!(kind = %session.kind(), error = %e, "Failed to write snapshot");
        }
    }

    pub(crate) fn persist_slot(&self, kind: SessionKind, now: DateTime<Local>) {
        if let Some(session) = self.slots.get(&kind) {
            self.persist(session, now);
        }
    }

    fn set_enforcing(&mut self, kind: SessionKind, enforcing: bool, now: DateTime<Local>) {
        let Some(session) = self.slots.get_mut(&kind) else {
            return;
        };
        if session.active == enforcing {
            return;
        }
        session.active = enforcing;
        let session_id = session.id;

        if enforcing {
            self.enforce(kind);
        } else {
            self.release(kind);
        }
        self.persist_slot(kind, now);
        self.update_live(kind, now);

        info!(kind = %kind, session_id = %session_id, enforcing, "Enforcement changed");
        self.events.push(CoreEvent::EnforcementChanged {
            session_id,
            kind,
            enforcing,
        });
    }

    /// Trigger satisfied: show the completing phase, then end
    fn complete(&mut self, kind: SessionKind, now: DateTime<Local>) -> Option<CompletedSessionRecord> {
        if let Some(session) = self.slots.get(&kind) {
            self.post_live(session, LivePhase::Completing, now);
        }
        self.end(kind, EndReason::Completed, now)
    }

    fn apply_region(&mut self, session_id: SessionId, transition: RegionTransition, now: DateTime<Local>) {
        let kind = SessionKind::Geofenced;
        let Some(session) = self.slots.get_mut(&kind) else {
            debug!(session_id = %session_id, "Region event without a geofenced session");
            return;
        };
        if session.id != session_id {
            debug!(session_id = %session_id, "Stale region event");
            return;
        }
        let SessionVariant::Geofenced(fence) = &mut session.variant else {
            return;
        };

        fence.last_transition = Some(transition);
        let enforcing = fence.trigger.enforcing_after(transition, session.active);
        debug!(transition = ?transition, enforcing, "Region crossing");

        if enforcing != session.active {
            self.set_enforcing(kind, enforcing, now);
        } else {
            self.persist_slot(kind, now);
        }
    }

    pub(crate) fn apply_checklist(
        &mut self,
        statuses: &[ItemStatus],
        now: DateTime<Local>,
    ) -> Option<CompletedSessionRecord> {
        let kind = SessionKind::Checklist;
        let session = self.slots.get_mut(&kind)?;
        let SessionVariant::Checklist(list) = &mut session.variant else {
            return None;
        };

        let changed = list.apply_statuses(statuses);
        let (done, total) = list.progress();

        if list.is_satisfied() {
            info!(total, "Checklist complete");
            return self.complete(kind, now);
        }
        if changed {
            debug!(done, total, "Checklist progress");
            self.persist_slot(kind, now);
            self.update_live(kind, now);
        }
        None
    }

    fn apply_step_count(&mut self, count: u64, now: DateTime<Local>) {
        self.roll_over_step_goal(now);

        let kind = SessionKind::StepGoal;
        let today = now.date_naive();
        let Some(session) = self.slots.get_mut(&kind) else {
            return;
        };
        let SessionVariant::StepGoal(goal) = &mut session.variant else {
            return;
        };

        goal.last_count = count;
        let reached = goal.is_reached(count);

        if reached && !goal.daily_reset {
            info!(count, target = goal.target, "Step goal reached");
            self.complete(kind, now);
        } else if reached && !goal.satisfied_today(today) {
            goal.satisfied_on = Some(today);
            info!(count, target = goal.target, "Daily step goal reached, lifting until tomorrow");
            self.set_enforcing(kind, false, now);
            if let Some(session) = self.slots.get(&kind) {
                self.notify(
                    NotificationKind::GoalReached,
                    session,
                    format!("{} reached for today", session.name),
                );
            }
            self.persist_slot(kind, now);
        } else {
            self.persist_slot(kind, now);
            self.update_live(kind, now);
        }
    }

    /// Resume a daily-reset goal that was satisfied on an earlier day
    fn roll_over_step_goal(&mut self, now: DateTime<Local>) {
        let kind = SessionKind::StepGoal;
        let today = now.date_naive();
        let Some(session) = self.slots.get_mut(&kind) else {
            return;
        };
        let SessionVariant::StepGoal(goal) = &mut session.variant else {
            return;
        };
        if !goal.daily_reset || goal.satisfied_on.is_none_or(|day| day == today) {
            return;
        }

        goal.satisfied_on = None;
        goal.last_count = 0;
        info!("New day, step goal enforced again");

        self.set_enforcing(kind, true, now);
        self.persist_slot(kind, now);
    }

    pub(crate) fn update_live(&self, kind: SessionKind, now: DateTime<Local>) {
        if let Some(session) = self.slots.get(&kind) {
            let phase = if session.active {
                LivePhase::Active
            } else {
                LivePhase::Waiting
            };
            self.post_live(session, phase, now);
        }
    }

    fn post_live(&self, session: &Session, phase: LivePhase, now: DateTime<Local>) {
        let state = live_state(session, phase, now);
        if let Err(e) = self.services.status.update_live_status(&session.id, &state) {
            warn!(kind = %session.kind(), error = %e, "Failed to update live status");
        }
    }

    fn notify(&self, kind: NotificationKind, session: &Session, message: String) {
        let context = NotificationContext {
            kind: session.kind(),
            session_id: session.id,
            name: session.name.clone(),
            message,
        };
        if let Err(e) = self.services.status.post(kind, &context) {
            warn!(notification = ?kind, error = %e, "Failed to post notification");
        }
    }
}

/// Whether a freshly started session contributes its selection
fn initially_enforcing(session: &Session, now: DateTime<Local>) -> bool {
    match &session.variant {
        SessionVariant::Timed(_) | SessionVariant::Checklist(_) | SessionVariant::StepGoal(_) => true,
        SessionVariant::Scheduled(_) | SessionVariant::SleepWindow(_) => {
            session.window().is_some_and(|w| w.contains(&now))
        }
        SessionVariant::Geofenced(_) => false,
    }
}

/// Live-status projection of a session
pub fn live_state(session: &Session, phase: LivePhase, now: DateTime<Local>) -> LiveState {
    let (ends_at, progress) = match &session.variant {
        SessionVariant::Timed(timed) => (
            Some(timed.deadline(session.created_at)),
            Some(timed.percent_elapsed(session.created_at, now)),
        ),
        SessionVariant::Scheduled(_) | SessionVariant::SleepWindow(_) => (
            session
                .window()
                .and_then(|w| w.remaining(&now))
                .map(|left| now + chrono_duration(left)),
            None,
        ),
        SessionVariant::Checklist(list) => {
            let (done, total) = list.progress();
            (None, Some(done as f64 / total.max(1) as f64 * 100.0))
        }
        SessionVariant::Geofenced(_) => (None, None),
        SessionVariant::StepGoal(goal) => (
            None,
            Some((goal.last_count as f64 / goal.target.max(1) as f64 * 100.0).min(100.0)),
        ),
    };

    LiveState {
        kind: session.kind(),
        name: session.name.clone(),
        phase,
        ends_at,
        progress,
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("slots", &self.slots)
            .field("merger", &self.merger)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gatekeep_api::{
        Coordinate, MAX_TIMED_DURATION, PendingEvent, PendingEventKind, Recurrence, TriggerMode,
    };
    use gatekeep_host_api::{EventReceiver, MockHost, event_channel};
    use gatekeep_store::SqliteStore;
    use gatekeep_util::DaysOfWeek;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    // 2026-03-02 is a Monday
    fn at(day: u32, h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, day, h, m, 0).unwrap()
    }

    struct Harness {
        coordinator: SessionCoordinator,
        host: MockHost,
        rx: EventReceiver,
    }

    impl Harness {
        fn new() -> Self {
            let host = MockHost::new();
            let (tx, rx) = event_channel();
            let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
            let coordinator =
                SessionCoordinator::new(SessionsConfig::default(), host.services(), store, tx);
            Self { coordinator, host, rx }
        }

        /// Feed queued collaborator events to the coordinator
        fn pump(&mut self, now: DateTime<Local>) {
            while let Ok(event) = self.rx.try_recv() {
                self.coordinator.handle_host_event(event, now);
            }
        }
    }

    fn apps(names: &[&str]) -> RestrictionSet {
        RestrictionSet::new().with_applications(names.iter().copied())
    }

    fn timed(secs: u64, selection: &[&str]) -> StartRequest {
        StartRequest::new("Focus", SessionVariant::timed(Duration::from_secs(secs)))
            .with_selection(apps(selection))
    }

    #[tokio::test]
    async fn second_session_of_same_kind_is_rejected() {
        let mut h = Harness::new();
        let first = h.coordinator.start(timed(1800, &["games"]), at(2, 9, 0)).await.unwrap();

        let err = h
            .coordinator
            .start(timed(600, &["video"]), at(2, 9, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyActive(SessionKind::Timed)));

        let session = h.coordinator.active_session(SessionKind::Timed).unwrap();
        assert_eq!(session.id, first);
        assert_eq!(h.coordinator.selection(SessionKind::Timed), Some(&apps(&["games"])));
        assert_eq!(h.coordinator.merged_restrictions(), apps(&["games"]));
    }

    #[tokio::test]
    async fn invalid_and_unauthorized_starts_leave_no_trace() {
        let mut h = Harness::new();

        let err = h.coordinator.start(timed(0, &["games"]), at(2, 9, 0)).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)));

        h.host.enforcer.deny_authorization.store(true, Ordering::SeqCst);
        let err = h.coordinator.start(timed(60, &["games"]), at(2, 9, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::AuthorizationDenied {
                collaborator: "enforcement",
                ..
            }
        ));

        assert!(!h.coordinator.is_any_session_active());
        assert!(h.coordinator.selection(SessionKind::Timed).is_none());
        assert_eq!(h.host.enforcer.apply_count(), 0);
        assert!(h.coordinator.persistence().load_snapshot(SessionKind::Timed).unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_timer_is_rejected() {
        let mut h = Harness::new();
        let request = StartRequest::new(
            "Long",
            SessionVariant::timed(Duration::from_secs(10u64.pow(13))),
        );

        let err = h.coordinator.start(request, at(2, 9, 0)).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)));
        assert!(!h.coordinator.is_any_session_active());
        assert!(h.coordinator.persistence().load_snapshot(SessionKind::Timed).unwrap().is_none());

        let longest = StartRequest::new("Year", SessionVariant::timed(MAX_TIMED_DURATION));
        h.coordinator.start(longest, at(2, 9, 0)).await.unwrap();
        assert!(h.coordinator.active_session(SessionKind::Timed).is_some());
    }

    #[tokio::test]
    async fn location_denial_blocks_geofence_start() {
        let mut h = Harness::new();
        h.host.location.deny_authorization.store(true, Ordering::SeqCst);

        let request = StartRequest::new(
            "Park",
            SessionVariant::geofenced(
                Coordinate {
                    latitude: 51.5,
                    longitude: -0.1,
                },
                150.0,
                TriggerMode::WhileInside,
            ),
        );
        let err = h.coordinator.start(request, at(2, 9, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::AuthorizationDenied {
                collaborator: "location",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_name_defaults_to_kind() {
        let mut h = Harness::new();
        let request = StartRequest::new("  ", SessionVariant::timed(Duration::from_secs(60)));
        h.coordinator.start(request, at(2, 9, 0)).await.unwrap();
        assert_eq!(h.coordinator.active_session(SessionKind::Timed).unwrap().name, "timed");
    }

    #[tokio::test]
    async fn overlapping_sessions_enforce_the_union() {
        let mut h = Harness::new();
        let chores = StartRequest::new(
            "Chores",
            SessionVariant::checklist(["dishes".into(), "laundry".into()]),
        )
        .with_selection(apps(&["games", "social"]));

        h.coordinator.start(chores, at(2, 9, 0)).await.unwrap();
        h.coordinator.start(timed(1800, &["social", "video"]), at(2, 9, 5)).await.unwrap();
        assert_eq!(h.host.enforcer.current(), apps(&["games", "social", "video"]));

        // The timer ends; what the checklist still restricts stays restricted
        h.coordinator.tick(at(2, 9, 35));
        assert!(h.coordinator.active_session(SessionKind::Timed).is_none());
        assert_eq!(h.host.enforcer.current(), apps(&["games", "social"]));

        h.host.items.set_completed("dishes", true);
        h.host.items.set_completed("laundry", true);
        h.pump(at(2, 10, 0));
        assert!(!h.coordinator.is_any_session_active());
        assert!(h.host.enforcer.current().is_empty());
    }

    #[tokio::test]
    async fn timed_session_completes_at_deadline() {
        let mut h = Harness::new();
        h.coordinator.start(timed(1800, &["games"]), at(2, 9, 0)).await.unwrap();

        h.coordinator.tick(at(2, 9, 29));
        assert!(h.coordinator.active_session(SessionKind::Timed).is_some());

        h.coordinator.tick(at(2, 9, 30));
        assert!(h.coordinator.active_session(SessionKind::Timed).is_none());
        assert!(h.host.enforcer.current().is_empty());

        let history = h.coordinator.history(10);
        assert_eq!(history.len(), 1);
        assert!(history[0].completed);
        assert_eq!(history[0].reason, EndReason::Completed);
        assert_eq!(h.host.status.posted(NotificationKind::SessionCompleted), 1);
    }

    #[tokio::test]
    async fn end_clears_selection_and_snapshot() {
        let mut h = Harness::new();
        let id = h.coordinator.start(timed(1800, &["games"]), at(2, 9, 0)).await.unwrap();
        h.coordinator.drain_events();

        let record = h
            .coordinator
            .end(SessionKind::Timed, EndReason::Cancelled, at(2, 9, 10))
            .unwrap();
        assert_eq!(record.session_id, id);
        assert!(!record.completed);
        assert_eq!(record.duration(), Duration::from_secs(600));

        assert!(h.coordinator.selection(SessionKind::Timed).is_none());
        assert!(h.coordinator.persistence().load_snapshot(SessionKind::Timed).unwrap().is_none());
        assert!(h.host.status.live_status(&id).is_none());
        assert_eq!(
            h.coordinator.drain_events(),
            vec![CoreEvent::SessionEnded { record }]
        );

        // Ending an empty slot is a no-op
        assert!(h.coordinator.end(SessionKind::Timed, EndReason::Cancelled, at(2, 9, 11)).is_none());
        assert_eq!(h.coordinator.history(10).len(), 1);
    }

    #[tokio::test]
    async fn sleep_window_toggles_across_midnight() {
        let mut h = Harness::new();
        let request = StartRequest::new(
            "Bedtime",
            SessionVariant::sleep_window(
                "21:00".parse().unwrap(),
                "07:00".parse().unwrap(),
                DaysOfWeek::ALL_DAYS,
            ),
        )
        .with_selection(apps(&["games"]));

        h.coordinator.start(request, at(2, 20, 0)).await.unwrap();
        let session = h.coordinator.active_session(SessionKind::SleepWindow).unwrap();
        assert!(!session.active);
        assert!(h.host.enforcer.current().is_empty());

        h.coordinator.evaluate_windows(at(2, 21, 30));
        assert_eq!(h.host.enforcer.current(), apps(&["games"]));

        h.coordinator.evaluate_windows(at(3, 6, 59));
        assert_eq!(h.host.enforcer.current(), apps(&["games"]));

        h.coordinator.evaluate_windows(at(3, 7, 0));
        assert!(h.host.enforcer.current().is_empty());
        assert!(h.coordinator.active_session(SessionKind::SleepWindow).is_some());

        let toggles: Vec<bool> = h
            .coordinator
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                CoreEvent::EnforcementChanged { enforcing, .. } => Some(enforcing),
                _ => None,
            })
            .collect();
        assert_eq!(toggles, vec![true, false]);
    }

    #[tokio::test]
    async fn tick_throttles_window_checks() {
        let mut h = Harness::new();
        let request = StartRequest::new(
            "School",
            SessionVariant::scheduled(
                Recurrence::Weekdays,
                "09:00".parse().unwrap(),
                "15:00".parse().unwrap(),
            ),
        )
        .with_selection(apps(&["games"]));
        let first_check = at(2, 8, 59) + chrono::Duration::seconds(30);
        h.coordinator.start(request, at(2, 8, 59)).await.unwrap();

        h.coordinator.tick(first_check);
        // Inside the window, but the last check was under a minute ago
        h.coordinator.tick(first_check + chrono::Duration::seconds(40));
        assert!(!h.coordinator.active_session(SessionKind::Scheduled).unwrap().active);

        h.coordinator.tick(first_check + chrono::Duration::seconds(60));
        assert!(h.coordinator.active_session(SessionKind::Scheduled).unwrap().active);
    }

    #[tokio::test]
    async fn geofence_trigger_modes() {
        let mut h = Harness::new();
        let center = Coordinate {
            latitude: 51.5,
            longitude: -0.1,
        };
        let request = StartRequest::new(
            "Library",
            SessionVariant::geofenced(center, 150.0, TriggerMode::WhileInside),
        )
        .with_selection(apps(&["games"]));
        let id = h.coordinator.start(request, at(2, 9, 0)).await.unwrap();
        assert!(h.host.enforcer.current().is_empty());

        assert!(h.host.location.simulate(&id, RegionTransition::Entered));
        h.pump(at(2, 9, 5));
        assert_eq!(h.host.enforcer.current(), apps(&["games"]));

        h.host.location.simulate(&id, RegionTransition::Exited);
        h.pump(at(2, 9, 10));
        assert!(h.host.enforcer.current().is_empty());

        h.coordinator.end(SessionKind::Geofenced, EndReason::Cancelled, at(2, 9, 15));
        assert!(h.host.location.monitored(&id).is_none());

        let request = StartRequest::new(
            "School run",
            SessionVariant::geofenced(center, 150.0, TriggerMode::OnEnter),
        )
        .with_selection(apps(&["games"]));
        let id = h.coordinator.start(request, at(2, 10, 0)).await.unwrap();
        h.host.location.simulate(&id, RegionTransition::Entered);
        h.host.location.simulate(&id, RegionTransition::Exited);
        h.pump(at(2, 10, 5));
        assert_eq!(h.host.enforcer.current(), apps(&["games"]));
    }

    #[tokio::test]
    async fn geofence_radius_is_raised_to_platform_minimum() {
        let mut h = Harness::new();
        let request = StartRequest::new(
            "Corner shop",
            SessionVariant::geofenced(
                Coordinate {
                    latitude: 51.5,
                    longitude: -0.1,
                },
                20.0,
                TriggerMode::WhileInside,
            ),
        );
        let id = h.coordinator.start(request, at(2, 9, 0)).await.unwrap();

        let Some(SessionVariant::Geofenced(fence)) = h
            .coordinator
            .active_session(SessionKind::Geofenced)
            .map(|s| &s.variant)
        else {
            panic!("geofence missing");
        };
        assert_eq!(fence.radius_meters, 100.0);
        assert_eq!(h.host.location.monitored(&id).unwrap().radius_meters, 100.0);
    }

    #[tokio::test]
    async fn daily_step_goal_lifts_until_tomorrow() {
        let mut h = Harness::new();
        let request = StartRequest::new("Walk", SessionVariant::step_goal(1000, true))
            .with_selection(apps(&["games"]));
        h.coordinator.start(request, at(2, 9, 0)).await.unwrap();
        assert_eq!(h.host.enforcer.current(), apps(&["games"]));

        h.host.steps.set_count(1200);
        h.pump(at(2, 12, 0));
        let session = h.coordinator.active_session(SessionKind::StepGoal).unwrap();
        assert!(!session.active);
        assert!(h.host.enforcer.current().is_empty());
        assert_eq!(h.host.status.posted(NotificationKind::GoalReached), 1);

        // Further counts the same day change nothing
        h.host.steps.set_count(1500);
        h.pump(at(2, 13, 0));
        assert_eq!(h.host.status.posted(NotificationKind::GoalReached), 1);

        h.coordinator.tick(at(3, 8, 0));
        assert!(h.coordinator.active_session(SessionKind::StepGoal).unwrap().active);
        assert_eq!(h.host.enforcer.current(), apps(&["games"]));
    }

    #[tokio::test]
    async fn step_goal_without_reset_completes() {
        let mut h = Harness::new();
        let request = StartRequest::new("Walk", SessionVariant::step_goal(5000, false));
        h.coordinator.start(request, at(2, 9, 0)).await.unwrap();
        assert!(h.host.steps.is_observed());

        h.host.steps.set_count(4999);
        h.pump(at(2, 11, 0));
        assert!(h.coordinator.active_session(SessionKind::StepGoal).is_some());

        h.host.steps.set_count(5000);
        h.pump(at(2, 12, 0));
        assert!(h.coordinator.active_session(SessionKind::StepGoal).is_none());
        assert!(!h.host.steps.is_observed());
        assert!(h.coordinator.history(1)[0].completed);
    }

    #[tokio::test]
    async fn checklist_already_done_completes_on_start() {
        let mut h = Harness::new();
        h.host.items.set_completed("homework", true);

        let request = StartRequest::new("Homework", SessionVariant::checklist(["homework".into()]))
            .with_selection(apps(&["games"]));
        h.coordinator.start(request, at(2, 16, 0)).await.unwrap();

        assert!(h.coordinator.active_session(SessionKind::Checklist).is_none());
        assert!(h.host.enforcer.current().is_empty());
        assert_eq!(h.coordinator.history(1)[0].reason, EndReason::Completed);
    }

    #[tokio::test]
    async fn failed_monitor_install_rolls_back() {
        let mut h = Harness::new();
        h.host.items.fail_observe.store(true, Ordering::SeqCst);

        let request = StartRequest::new("Chores", SessionVariant::checklist(["dishes".into()]))
            .with_selection(apps(&["games"]));
        let err = h.coordinator.start(request, at(2, 9, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::CollaboratorUnavailable {
                collaborator: "items",
                ..
            }
        ));

        assert!(!h.coordinator.is_any_session_active());
        assert!(h.coordinator.selection(SessionKind::Checklist).is_none());
        assert!(h.host.enforcer.current().is_empty());
        assert!(h.coordinator.persistence().load_snapshot(SessionKind::Checklist).unwrap().is_none());
        assert!(h.coordinator.history(10).is_empty());
    }

    #[tokio::test]
    async fn force_end_all_drains_in_kind_order() {
        let mut h = Harness::new();
        let chores = StartRequest::new("Chores", SessionVariant::checklist(["dishes".into()]));
        let bedtime = StartRequest::new(
            "Bedtime",
            SessionVariant::sleep_window(
                "21:00".parse().unwrap(),
                "07:00".parse().unwrap(),
                DaysOfWeek::ALL_DAYS,
            ),
        );
        h.coordinator.start(bedtime, at(2, 9, 0)).await.unwrap();
        h.coordinator.start(chores, at(2, 9, 0)).await.unwrap();
        h.coordinator.start(timed(1800, &["games"]), at(2, 9, 0)).await.unwrap();

        let records = h.coordinator.force_end_all(at(2, 9, 10));
        let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![SessionKind::Timed, SessionKind::Checklist, SessionKind::SleepWindow]
        );
        assert!(records.iter().all(|r| r.reason == EndReason::ForceEnded && !r.completed));
        assert!(!h.coordinator.is_any_session_active());
        assert!(h.host.enforcer.current().is_empty());
    }

    #[tokio::test]
    async fn force_end_all_clears_store_when_enforcer_fails() {
        let mut h = Harness::new();
        let chores = StartRequest::new("Chores", SessionVariant::checklist(["dishes".into()]))
            .with_selection(apps(&["social"]));
        h.coordinator.start(timed(1800, &["games"]), at(2, 9, 0)).await.unwrap();
        let chores_id = h.coordinator.start(chores, at(2, 9, 0)).await.unwrap();

        let persistence = h.coordinator.persistence().clone();
        persistence
            .write_pending(&PendingEvent {
                kind: SessionKind::Checklist,
                session_id: chores_id,
                event: PendingEventKind::Completion,
                detected_at: at(2, 9, 5),
            })
            .unwrap();

        h.host.enforcer.fail_apply.store(true, Ordering::SeqCst);
        let records = h.coordinator.force_end_all(at(2, 9, 10));
        assert_eq!(records.len(), 2);

        assert!(!h.coordinator.is_any_session_active());
        for kind in [SessionKind::Timed, SessionKind::Checklist] {
            assert!(h.coordinator.active_session(kind).is_none());
            assert!(persistence.load_snapshot(kind).unwrap().is_none());
            assert!(persistence.load_pending(kind).unwrap().is_none());
        }
        assert_eq!(h.coordinator.history(10).len(), 2);
    }

    #[tokio::test]
    async fn committed_selection_replaces_enforced_targets() {
        let mut h = Harness::new();
        h.coordinator.start(timed(1800, &["games"]), at(2, 9, 0)).await.unwrap();

        h.coordinator
            .commit_selection(SessionKind::Timed, apps(&["video"]), at(2, 9, 1))
            .unwrap();
        assert_eq!(h.host.enforcer.current(), apps(&["video"]));

        let snapshot = h
            .coordinator
            .persistence()
            .load_snapshot(SessionKind::Timed)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.selection, Some(apps(&["video"])));
    }

    #[tokio::test]
    async fn start_without_selection_uses_committed_then_legacy() {
        let mut h = Harness::new();
        h.coordinator.set_legacy_selection(Some(apps(&["games"]))).unwrap();
        assert_eq!(h.host.enforcer.current(), apps(&["games"]));

        let request = StartRequest::new("Focus", SessionVariant::timed(Duration::from_secs(600)));
        h.coordinator.start(request, at(2, 9, 0)).await.unwrap();
        assert_eq!(h.coordinator.selection(SessionKind::Timed), Some(&apps(&["games"])));

        h.coordinator.set_legacy_selection(None).unwrap();
        assert_eq!(h.host.enforcer.current(), apps(&["games"]));

        h.coordinator.end(SessionKind::Timed, EndReason::Cancelled, at(2, 9, 1));
        assert!(h.host.enforcer.current().is_empty());
    }

    #[tokio::test]
    async fn enforcement_failure_does_not_block_start() {
        let mut h = Harness::new();
        h.host.enforcer.fail_apply.store(true, Ordering::SeqCst);

        h.coordinator.start(timed(1800, &["games"]), at(2, 9, 0)).await.unwrap();
        assert!(h.coordinator.active_session(SessionKind::Timed).is_some());

        // Retried on the next registration change
        h.host.enforcer.fail_apply.store(false, Ordering::SeqCst);
        h.coordinator.set_legacy_selection(Some(apps(&["video"]))).unwrap();
        assert_eq!(h.host.enforcer.current(), apps(&["games", "video"]));
    }

    #[test]
    fn live_state_reports_timer_progress() {
        let session = Session::new("Focus", SessionVariant::timed(Duration::from_secs(1000)), at(2, 9, 0));
        let state = live_state(&session, LivePhase::Active, at(2, 9, 0) + chrono::Duration::seconds(250));
        assert_eq!(state.ends_at, Some(at(2, 9, 0) + chrono::Duration::seconds(1000)));
        assert_eq!(state.progress, Some(25.0));
    }
}
