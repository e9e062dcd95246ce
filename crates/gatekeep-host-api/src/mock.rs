//! Mock collaborators for unit and integration tests

use async_trait::async_trait;
use chrono::{DateTime, Local};
use gatekeep_api::{
    ItemStatus, LiveState, NotificationContext, NotificationKind, RegionTransition, RestrictionSet,
    WakeupKind,
};
use gatekeep_util::{ItemId, SessionId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    BackgroundScheduler, EventSender, HostError, HostEvent, HostResult, HostServices, ItemSource,
    LocationMonitor, Region, RestrictionEnforcer, StatusSink, StepCounter,
};

/// Enforcer that records every set it is asked to apply
#[derive(Default)]
pub struct MockEnforcer {
    applied: Mutex<Vec<RestrictionSet>>,

    /// Refuse authorization requests
    pub deny_authorization: AtomicBool,

    /// Reject `replace_restriction_set`
    pub fail_apply: AtomicBool,
}

impl MockEnforcer {
    /// Every set applied so far, oldest first
    pub fn applied(&self) -> Vec<RestrictionSet> {
        self.applied.lock().unwrap().clone()
    }

    /// Set currently in force (empty if nothing was ever applied)
    pub fn current(&self) -> RestrictionSet {
        self.applied.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn apply_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }
}

#[async_trait]
impl RestrictionEnforcer for MockEnforcer {
    async fn request_authorization(&self) -> HostResult<()> {
        if self.deny_authorization.load(Ordering::SeqCst) {
            return Err(HostError::AuthorizationDenied("Mock enforcement denial".into()));
        }
        Ok(())
    }

    fn replace_restriction_set(&self, set: &RestrictionSet) -> HostResult<()> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(HostError::EnforcementRejected("Mock enforcement failure".into()));
        }
        self.applied.lock().unwrap().push(set.clone());
        Ok(())
    }
}

/// Location monitor driven by [`MockLocation::simulate`]
pub struct MockLocation {
    regions: Mutex<HashMap<SessionId, (Region, EventSender)>>,
    minimum_radius: f64,
    pub deny_authorization: AtomicBool,
}

impl MockLocation {
    pub fn new(minimum_radius: f64) -> Self {
        Self {
            regions: Mutex::new(HashMap::new()),
            minimum_radius,
            deny_authorization: AtomicBool::new(false),
        }
    }

    pub fn monitored(&self, session_id: &SessionId) -> Option<Region> {
        self.regions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|(region, _)| region.clone())
    }

    /// Report a boundary crossing; false if the region is not monitored
    pub fn simulate(&self, session_id: &SessionId, transition: RegionTransition) -> bool {
        let regions = self.regions.lock().unwrap();
        match regions.get(session_id) {
            Some((_, tx)) => tx
                .send(HostEvent::Region {
                    session_id: *session_id,
                    transition,
                })
                .is_ok(),
            None => false,
        }
    }
}

impl Default for MockLocation {
    fn default() -> Self {
        Self::new(100.0)
    }
}

#[async_trait]
impl LocationMonitor for MockLocation {
    async fn request_authorization(&self) -> HostResult<()> {
        if self.deny_authorization.load(Ordering::SeqCst) {
            return Err(HostError::AuthorizationDenied("Mock location denial".into()));
        }
        Ok(())
    }

    fn minimum_radius_meters(&self) -> f64 {
        self.minimum_radius
    }

    fn start_monitoring(&self, region: &Region, events: EventSender) -> HostResult<()> {
        self.regions
            .lock()
            .unwrap()
            .insert(region.session_id, (region.clone(), events));
        Ok(())
    }

    fn stop_monitoring(&self, session_id: &SessionId) {
        self.regions.lock().unwrap().remove(session_id);
    }
}

/// Step counter whose count is set by the test
#[derive(Default)]
pub struct MockStepCounter {
    count: AtomicU64,
    observer: Mutex<Option<EventSender>>,
    pub deny_authorization: AtomicBool,

    /// Delay each fetch (to exercise time budgets)
    pub fetch_delay: Mutex<Option<Duration>>,
}

impl MockStepCounter {
    /// Update the count and notify the observer, if any
    pub fn set_count(&self, count: u64) {
        self.count.store(count, Ordering::SeqCst);
        if let Some(tx) = self.observer.lock().unwrap().as_ref() {
            let _ = tx.send(HostEvent::StepCountChanged { count });
        }
    }

    pub fn is_observed(&self) -> bool {
        self.observer.lock().unwrap().is_some()
    }
}

#[async_trait]
impl StepCounter for MockStepCounter {
    async fn request_authorization(&self) -> HostResult<()> {
        if self.deny_authorization.load(Ordering::SeqCst) {
            return Err(HostError::AuthorizationDenied("Mock health denial".into()));
        }
        Ok(())
    }

    async fn fetch_current_count(&self) -> HostResult<u64> {
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.count.load(Ordering::SeqCst))
    }

    fn observe_changes(&self, events: EventSender) -> HostResult<()> {
        *self.observer.lock().unwrap() = Some(events);
        Ok(())
    }

    fn stop_observing(&self) {
        *self.observer.lock().unwrap() = None;
    }
}

/// Checklist backing store kept in memory
#[derive(Default)]
pub struct MockItemSource {
    statuses: Mutex<BTreeMap<ItemId, bool>>,
    observer: Mutex<Option<(Vec<ItemId>, EventSender)>>,
    pub fail_observe: AtomicBool,
}

impl MockItemSource {
    /// Mark an item and notify the observer if the item is monitored
    pub fn set_completed(&self, id: impl Into<ItemId>, completed: bool) {
        let id = id.into();
        self.statuses.lock().unwrap().insert(id.clone(), completed);

        if let Some((items, tx)) = self.observer.lock().unwrap().as_ref()
            && items.contains(&id)
        {
            let _ = tx.send(HostEvent::ChecklistChanged {
                items: vec![ItemStatus { id, completed }],
            });
        }
    }

    pub fn is_observed(&self) -> bool {
        self.observer.lock().unwrap().is_some()
    }
}

impl ItemSource for MockItemSource {
    fn observe_changes(&self, items: &[ItemId], events: EventSender) -> HostResult<Vec<ItemStatus>> {
        if self.fail_observe.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("Mock item store offline".into()));
        }
        let statuses = self.statuses.lock().unwrap();
        let current = items
            .iter()
            .map(|id| ItemStatus {
                id: id.clone(),
                completed: statuses.get(id).copied().unwrap_or(false),
            })
            .collect();
        *self.observer.lock().unwrap() = Some((items.to_vec(), events));
        Ok(current)
    }

    fn stop_observing(&self) {
        *self.observer.lock().unwrap() = None;
    }
}

/// Status sink that keeps everything it receives
#[derive(Default)]
pub struct RecordingStatusSink {
    posts: Mutex<Vec<(NotificationKind, NotificationContext)>>,
    live: Mutex<HashMap<SessionId, LiveState>>,
    pub fail: AtomicBool,
}

impl RecordingStatusSink {
    pub fn posts(&self) -> Vec<(NotificationKind, NotificationContext)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn posted(&self, kind: NotificationKind) -> usize {
        self.posts.lock().unwrap().iter().filter(|(k, _)| *k == kind).count()
    }

    pub fn live_status(&self, session_id: &SessionId) -> Option<LiveState> {
        self.live.lock().unwrap().get(session_id).cloned()
    }

    fn check(&self) -> HostResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::Internal("Mock status sink failure".into()));
        }
        Ok(())
    }
}

impl StatusSink for RecordingStatusSink {
    fn post(&self, kind: NotificationKind, context: &NotificationContext) -> HostResult<()> {
        self.check()?;
        self.posts.lock().unwrap().push((kind, context.clone()));
        Ok(())
    }

    fn update_live_status(&self, session_id: &SessionId, state: &LiveState) -> HostResult<()> {
        self.check()?;
        self.live.lock().unwrap().insert(*session_id, state.clone());
        Ok(())
    }

    fn end_live_status(&self, session_id: &SessionId) -> HostResult<()> {
        self.check()?;
        self.live.lock().unwrap().remove(session_id);
        Ok(())
    }
}

/// Scheduler that records requested wake-ups
#[derive(Default)]
pub struct MockScheduler {
    scheduled: Mutex<Vec<(WakeupKind, DateTime<Local>)>>,
}

impl MockScheduler {
    pub fn scheduled(&self) -> Vec<(WakeupKind, DateTime<Local>)> {
        self.scheduled.lock().unwrap().clone()
    }
}

impl BackgroundScheduler for MockScheduler {
    fn schedule_wakeup(&self, kind: WakeupKind, not_before: DateTime<Local>) -> HostResult<()> {
        self.scheduled.lock().unwrap().push((kind, not_before));
        Ok(())
    }
}

/// All mocks together, with typed access for assertions
#[derive(Clone, Default)]
pub struct MockHost {
    pub enforcer: Arc<MockEnforcer>,
    pub location: Arc<MockLocation>,
    pub steps: Arc<MockStepCounter>,
    pub items: Arc<MockItemSource>,
    pub status: Arc<RecordingStatusSink>,
    pub scheduler: Arc<MockScheduler>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services(&self) -> HostServices {
        HostServices {
            enforcer: self.enforcer.clone(),
            location: self.location.clone(),
            steps: self.steps.clone(),
            items: self.items.clone(),
            status: self.status.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_channel;
    use gatekeep_api::Coordinate;

    #[tokio::test]
    async fn enforcer_records_and_fails_on_demand() {
        let enforcer = MockEnforcer::default();
        let set = RestrictionSet::new().with_applications(["games"]);

        enforcer.replace_restriction_set(&set).unwrap();
        assert_eq!(enforcer.current(), set);

        enforcer.fail_apply.store(true, Ordering::SeqCst);
        assert!(enforcer.replace_restriction_set(&RestrictionSet::new()).is_err());
        assert_eq!(enforcer.apply_count(), 1);

        enforcer.deny_authorization.store(true, Ordering::SeqCst);
        assert!(matches!(
            enforcer.request_authorization().await,
            Err(HostError::AuthorizationDenied(_))
        ));
    }

    #[test]
    fn item_source_reports_monitored_items_only() {
        let source = MockItemSource::default();
        source.set_completed("dishes", true);

        let (tx, mut rx) = event_channel();
        let current = source
            .observe_changes(&["dishes".into(), "laundry".into()], tx)
            .unwrap();
        assert_eq!(current.iter().filter(|s| s.completed).count(), 1);

        source.set_completed("unrelated", true);
        assert!(rx.try_recv().is_err());

        source.set_completed("laundry", true);
        assert!(matches!(rx.try_recv(), Ok(HostEvent::ChecklistChanged { .. })));
    }

    #[test]
    fn location_simulates_crossings() {
        let location = MockLocation::default();
        let (tx, mut rx) = event_channel();
        let session_id = SessionId::new();

        assert!(!location.simulate(&session_id, RegionTransition::Entered));

        location
            .start_monitoring(
                &Region {
                    session_id,
                    center: Coordinate { latitude: 0.0, longitude: 0.0 },
                    radius_meters: 150.0,
                },
                tx,
            )
            .unwrap();
        assert!(location.simulate(&session_id, RegionTransition::Entered));
        assert!(matches!(rx.try_recv(), Ok(HostEvent::Region { .. })));
    }
}
