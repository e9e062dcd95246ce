//! Desktop collaborators
//!
//! The desktop has no platform restriction API, no geofencing and no step
//! counter. The merged restriction set is written to a JSON file for an
//! external blocker (firewall rules, a browser extension) to pick up; checklist
//! items and requested wake-ups live in the service's own store.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use gatekeep_api::{
    ItemStatus, LiveState, NotificationContext, NotificationKind, RestrictionSet, WakeupKind,
};
use gatekeep_host_api::{
    BackgroundScheduler, EventSender, HostError, HostEvent, HostResult, HostServices, ItemSource,
    LocationMonitor, Region, RestrictionEnforcer, StatusSink, StepCounter,
};
use gatekeep_store::{Store, StoreExt};
use gatekeep_util::{ItemId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

const ITEMS_KEY: &str = "desktop.items";
const WAKEUPS_KEY: &str = "desktop.wakeups";

/// Smallest radius reported for the (absent) location service
const MINIMUM_RADIUS_METERS: f64 = 100.0;

fn internal(e: impl std::fmt::Display) -> HostError {
    HostError::Internal(e.to_string())
}

/// Document written to the enforcement file
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EnforcementFile {
    pub updated_at: DateTime<Local>,
    pub restrictions: RestrictionSet,
}

/// Writes the merged restriction set to a JSON file, atomically
pub struct FileEnforcer {
    path: PathBuf,
}

impl FileEnforcer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back what is currently enforced
    pub fn read(&self) -> HostResult<Option<EnforcementFile>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(internal),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RestrictionEnforcer for FileEnforcer {
    async fn request_authorization(&self) -> HostResult<()> {
        Ok(())
    }

    fn replace_restriction_set(&self, set: &RestrictionSet) -> HostResult<()> {
        let document = EnforcementFile {
            updated_at: gatekeep_util::now(),
            restrictions: set.clone(),
        };
        let json = serde_json::to_vec_pretty(&document).map_err(internal)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), targets = set.len(), "Enforcement file written");
        Ok(())
    }
}

/// Location collaborator for hosts without location services
pub struct NoLocation;

#[async_trait]
impl LocationMonitor for NoLocation {
    async fn request_authorization(&self) -> HostResult<()> {
        Err(HostError::AuthorizationDenied(
            "location services are not available on this host".into(),
        ))
    }

    fn minimum_radius_meters(&self) -> f64 {
        MINIMUM_RADIUS_METERS
    }

    fn start_monitoring(&self, _region: &Region, _events: EventSender) -> HostResult<()> {
        Err(HostError::Unavailable("location monitoring".into()))
    }

    fn stop_monitoring(&self, _session_id: &SessionId) {}
}

/// Step collaborator for hosts without a pedometer
pub struct NoStepCounter;

#[async_trait]
impl StepCounter for NoStepCounter {
    async fn request_authorization(&self) -> HostResult<()> {
        Err(HostError::AuthorizationDenied(
            "no step counter is available on this host".into(),
        ))
    }

    async fn fetch_current_count(&self) -> HostResult<u64> {
        Err(HostError::Unavailable("step counter".into()))
    }

    fn observe_changes(&self, _events: EventSender) -> HostResult<()> {
        Err(HostError::Unavailable("step counter".into()))
    }

    fn stop_observing(&self) {}
}

struct ItemObserver {
    items: Vec<ItemId>,
    events: EventSender,
    seen: BTreeMap<ItemId, bool>,
}

/// Checklist items kept in the store, marked done from the command line.
///
/// Changes made by another process are picked up by [`StoreItemSource::poll`].
pub struct StoreItemSource {
    store: Arc<dyn Store>,
    observer: Mutex<Option<ItemObserver>>,
}

impl StoreItemSource {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            observer: Mutex::new(None),
        }
    }

    fn load(&self) -> HostResult<BTreeMap<ItemId, bool>> {
        Ok(self.store.get_json(ITEMS_KEY).map_err(internal)?.unwrap_or_default())
    }

    pub fn set_completed(&self, id: ItemId, completed: bool) -> HostResult<()> {
        let mut items = self.load()?;
        items.insert(id.clone(), completed);
        self.store.set_json(ITEMS_KEY, &items).map_err(internal)?;
        info!(item = %id, completed, "Checklist item updated");
        self.poll()
    }

    /// Report monitored items whose status changed since the last report
    pub fn poll(&self) -> HostResult<()> {
        let mut guard = self.observer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(observer) = guard.as_mut() else {
            return Ok(());
        };

        let current = self.load()?;
        let changed: Vec<ItemStatus> = observer
            .items
            .iter()
            .filter_map(|id| {
                let completed = current.get(id).copied().unwrap_or(false);
                (observer.seen.get(id) != Some(&completed)).then(|| ItemStatus {
                    id: id.clone(),
                    completed,
                })
            })
            .collect();
        if changed.is_empty() {
            return Ok(());
        }

        for status in &changed {
            observer.seen.insert(status.id.clone(), status.completed);
        }
        if observer
            .events
            .send(HostEvent::ChecklistChanged { items: changed })
            .is_err()
        {
            debug!("Checklist observer gone");
        }
        Ok(())
    }
}

impl ItemSource for StoreItemSource {
    fn observe_changes(&self, items: &[ItemId], events: EventSender) -> HostResult<Vec<ItemStatus>> {
        let current = self.load()?;
        let statuses: Vec<ItemStatus> = items
            .iter()
            .map(|id| ItemStatus {
                id: id.clone(),
                completed: current.get(id).copied().unwrap_or(false),
            })
            .collect();

        let seen = statuses.iter().map(|s| (s.id.clone(), s.completed)).collect();
        *self.observer.lock().unwrap_or_else(PoisonError::into_inner) = Some(ItemObserver {
            items: items.to_vec(),
            events,
            seen,
        });
        Ok(statuses)
    }

    fn stop_observing(&self) {
        *self.observer.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Notifications and live status go to the log
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn post(&self, kind: NotificationKind, context: &NotificationContext) -> HostResult<()> {
        info!(
            notification = ?kind,
            kind = %context.kind,
            session_id = %context.session_id,
            "{}",
            context.message
        );
        Ok(())
    }

    fn update_live_status(&self, session_id: &SessionId, state: &LiveState) -> HostResult<()> {
        debug!(
            session_id = %session_id,
            kind = %state.kind,
            phase = ?state.phase,
            ends_at = ?state.ends_at,
            progress = ?state.progress,
            "Live status"
        );
        Ok(())
    }

    fn end_live_status(&self, session_id: &SessionId) -> HostResult<()> {
        debug!(session_id = %session_id, "Live status ended");
        Ok(())
    }
}

/// Records requested wake-ups; `gatekeepd wake` runs the ones that are due
pub struct StoreScheduler {
    store: Arc<dyn Store>,
}

impl StoreScheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn requested(&self) -> HostResult<BTreeMap<WakeupKind, DateTime<Local>>> {
        let entries: Vec<(WakeupKind, DateTime<Local>)> =
            self.store.get_json(WAKEUPS_KEY).map_err(internal)?.unwrap_or_default();
        Ok(entries.into_iter().collect())
    }

    /// Wake-ups whose time has come
    pub fn due(&self, now: DateTime<Local>) -> HostResult<Vec<WakeupKind>> {
        Ok(self
            .requested()?
            .into_iter()
            .filter(|(_, at)| *at <= now)
            .map(|(kind, _)| kind)
            .collect())
    }
}

impl BackgroundScheduler for StoreScheduler {
    fn schedule_wakeup(&self, kind: WakeupKind, not_before: DateTime<Local>) -> HostResult<()> {
        let mut requested = self.requested()?;
        requested.insert(kind, not_before);
        let entries: Vec<_> = requested.into_iter().collect();
        self.store.set_json(WAKEUPS_KEY, &entries).map_err(internal)?;
        Ok(())
    }
}

/// Every desktop collaborator, with typed access for the service
#[derive(Clone)]
pub struct DesktopHost {
    pub enforcer: Arc<FileEnforcer>,
    pub items: Arc<StoreItemSource>,
    pub scheduler: Arc<StoreScheduler>,
}

impl DesktopHost {
    pub fn new(store: Arc<dyn Store>, enforcement_file: impl Into<PathBuf>) -> Self {
        Self {
            enforcer: Arc::new(FileEnforcer::new(enforcement_file)),
            items: Arc::new(StoreItemSource::new(store.clone())),
            scheduler: Arc::new(StoreScheduler::new(store)),
        }
    }

    pub fn services(&self) -> HostServices {
        HostServices {
            enforcer: self.enforcer.clone(),
            location: Arc::new(NoLocation),
            steps: Arc::new(NoStepCounter),
            items: self.items.clone(),
            status: Arc::new(LogStatusSink),
            scheduler: self.scheduler.clone(),
        }
    }

    /// Pick up item changes written by other processes
    pub fn poll(&self) {
        if let Err(e) = self.items.poll() {
            warn!(error = %e, "Failed to poll checklist items");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gatekeep_host_api::event_channel;
    use gatekeep_store::SqliteStore;

    fn store() -> Arc<dyn Store> {
        Arc::new(SqliteStore::in_memory().unwrap())
    }

    #[test]
    fn enforcer_writes_and_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = FileEnforcer::new(dir.path().join("out").join("enforced.json"));
        assert!(enforcer.read().unwrap().is_none());

        let set = RestrictionSet::new().with_domains(["example.com"]);
        enforcer.replace_restriction_set(&set).unwrap();
        assert_eq!(enforcer.read().unwrap().unwrap().restrictions, set);

        enforcer.replace_restriction_set(&RestrictionSet::new()).unwrap();
        assert!(enforcer.read().unwrap().unwrap().restrictions.is_empty());
    }

    #[tokio::test]
    async fn sensors_are_unavailable() {
        assert!(matches!(
            NoLocation.request_authorization().await,
            Err(HostError::AuthorizationDenied(_))
        ));
        assert!(matches!(
            NoStepCounter.request_authorization().await,
            Err(HostError::AuthorizationDenied(_))
        ));
    }

    #[test]
    fn item_changes_reach_the_observer_once() {
        let items = StoreItemSource::new(store());
        items.set_completed(ItemId::new("dishes"), true).unwrap();

        let (tx, mut rx) = event_channel();
        let ids = [ItemId::new("dishes"), ItemId::new("laundry")];
        let statuses = items.observe_changes(&ids, tx).unwrap();
        assert!(statuses[0].completed);
        assert!(!statuses[1].completed);

        items.set_completed(ItemId::new("laundry"), true).unwrap();
        items.poll().unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            HostEvent::ChecklistChanged {
                items: vec![ItemStatus {
                    id: ItemId::new("laundry"),
                    completed: true,
                }],
            }
        );
        assert!(rx.try_recv().is_err());

        // Items outside the checklist are not reported
        items.set_completed(ItemId::new("homework"), true).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn scheduler_keeps_latest_request_per_kind() {
        let scheduler = StoreScheduler::new(store());
        let at = |h| Local.with_ymd_and_hms(2026, 3, 2, h, 0, 0).unwrap();

        scheduler.schedule_wakeup(WakeupKind::SessionCheck, at(9)).unwrap();
        scheduler.schedule_wakeup(WakeupKind::SessionCheck, at(10)).unwrap();
        scheduler.schedule_wakeup(WakeupKind::SensorRefresh, at(12)).unwrap();

        assert_eq!(scheduler.requested().unwrap().len(), 2);
        assert_eq!(scheduler.due(at(11)).unwrap(), vec![WakeupKind::SessionCheck]);
    }
}
