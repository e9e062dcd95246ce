//! Durable key layout for sessions, selections, history and lifecycle marks

use chrono::{DateTime, Local};
use gatekeep_api::{
    CompletedSessionRecord, LifecycleMarks, PendingEvent, PersistedSessionSnapshot,
    RestrictionSet, SNAPSHOT_VERSION, Session, SessionKind,
};
use gatekeep_store::{Store, StoreError, StoreExt};
use gatekeep_util::SelectionId;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{SessionError, SessionResult};

pub const SELECTIONS_KEY: &str = "selections";
pub const HISTORY_KEY: &str = "history";
pub const LIFECYCLE_KEY: &str = "lifecycle";

pub fn snapshot_key(kind: SessionKind) -> String {
    format!("snapshot.{}", kind.as_str())
}

pub fn pending_key(kind: SessionKind) -> String {
    format!("pending.{}", kind.as_str())
}

/// Owner of every key the coordinator writes to the durable store
#[derive(Clone)]
pub struct PersistenceEngine {
    store: Arc<dyn Store>,
    history_limit: usize,
}

impl PersistenceEngine {
    pub fn new(store: Arc<dyn Store>, history_limit: usize) -> Self {
        Self {
            store,
            history_limit,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn decode<T: DeserializeOwned>(&self, key: &str) -> SessionResult<Option<T>> {
        self.store.get_json(key).map_err(|e| match e {
            StoreError::Serialization(reason) => SessionError::PersistenceDecodeFailure {
                key: key.to_string(),
                reason,
            },
            other => SessionError::Store(other),
        })
    }

    // Snapshots

    pub fn save_snapshot(
        &self,
        session: &Session,
        selection: Option<&RestrictionSet>,
        now: DateTime<Local>,
    ) -> SessionResult<()> {
        let snapshot = PersistedSessionSnapshot::new(session.clone(), selection.cloned(), now);
        self.store.set_json(&snapshot_key(session.kind()), &snapshot)?;
        debug!(kind = %session.kind(), session_id = %session.id, "Snapshot written");
        Ok(())
    }

    /// Decode the snapshot stored for `kind`.
    ///
    /// Documents that do not parse, carry a newer version, sit under the
    /// wrong kind's key or hold parameters `start` would refuse are reported
    /// as [`SessionError::PersistenceDecodeFailure`].
    pub fn load_snapshot(&self, kind: SessionKind) -> SessionResult<Option<PersistedSessionSnapshot>> {
        let key = snapshot_key(kind);
        let Some(snapshot) = self.decode::<PersistedSessionSnapshot>(&key)? else {
            return Ok(None);
        };

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SessionError::PersistenceDecodeFailure {
                key,
                reason: format!("unsupported snapshot version {}", snapshot.version),
            });
        }
        if snapshot.session.kind() != kind {
            return Err(SessionError::PersistenceDecodeFailure {
                key,
                reason: format!("snapshot holds a {} session", snapshot.session.kind()),
            });
        }
        if let Err(reason) = snapshot.session.variant.validate() {
            return Err(SessionError::PersistenceDecodeFailure { key, reason });
        }
        Ok(Some(snapshot))
    }

    pub fn delete_snapshot(&self, kind: SessionKind) -> SessionResult<()> {
        self.store.delete(&snapshot_key(kind))?;
        Ok(())
    }

    // Selections

    pub fn load_selections(&self) -> SessionResult<BTreeMap<SelectionId, RestrictionSet>> {
        Ok(self.decode(SELECTIONS_KEY)?.unwrap_or_default())
    }

    pub fn save_selections(&self, selections: &BTreeMap<SelectionId, RestrictionSet>) -> SessionResult<()> {
        self.store.set_json(SELECTIONS_KEY, selections)?;
        Ok(())
    }

    // History

    /// Most recent first, at most `limit` entries
    pub fn history(&self, limit: usize) -> SessionResult<Vec<CompletedSessionRecord>> {
        let mut records: Vec<CompletedSessionRecord> = self.decode(HISTORY_KEY)?.unwrap_or_default();
        records.truncate(limit);
        Ok(records)
    }

    pub fn append_history(&self, record: &CompletedSessionRecord) -> SessionResult<()> {
        let mut records = match self.history(self.history_limit) {
            Ok(records) => records,
            Err(SessionError::PersistenceDecodeFailure { reason, .. }) => {
                warn!(reason = %reason, "History unreadable, starting over");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        records.insert(0, record.clone());
        records.truncate(self.history_limit);
        self.store.set_json(HISTORY_KEY, &records)?;
        Ok(())
    }

    // Pending background events

    pub fn write_pending(&self, event: &PendingEvent) -> SessionResult<()> {
        self.store.set_json(&pending_key(event.kind), event)?;
        debug!(kind = %event.kind, event = ?event.event, "Pending event recorded");
        Ok(())
    }

    pub fn load_pending(&self, kind: SessionKind) -> SessionResult<Option<PendingEvent>> {
        self.decode(&pending_key(kind))
    }

    pub fn clear_pending(&self, kind: SessionKind) -> SessionResult<()> {
        self.store.delete(&pending_key(kind))?;
        Ok(())
    }

    // Lifecycle marks

    pub fn lifecycle(&self) -> SessionResult<LifecycleMarks> {
        Ok(self.decode(LIFECYCLE_KEY)?.unwrap_or_default())
    }

    pub fn record_foreground(&self, now: DateTime<Local>) -> SessionResult<()> {
        let mut marks = self.lifecycle().unwrap_or_default();
        marks.last_foreground = Some(now);
        self.store.set_json(LIFECYCLE_KEY, &marks)?;
        Ok(())
    }

    pub fn record_background(&self, now: DateTime<Local>) -> SessionResult<()> {
        let mut marks = self.lifecycle().unwrap_or_default();
        marks.last_background = Some(now);
        self.store.set_json(LIFECYCLE_KEY, &marks)?;
        Ok(())
    }
}

impl std::fmt::Debug for PersistenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceEngine")
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gatekeep_api::{EndReason, SessionVariant};
    use gatekeep_store::SqliteStore;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn engine(limit: usize) -> PersistenceEngine {
        PersistenceEngine::new(Arc::new(SqliteStore::in_memory().unwrap()), limit)
    }

    #[test]
    fn snapshot_round_trip_and_delete() {
        let persistence = engine(50);
        let session = Session::new("Focus", SessionVariant::timed(Duration::from_secs(600)), at(0));
        let selection = RestrictionSet::new().with_applications(["feed"]);

        persistence.save_snapshot(&session, Some(&selection), at(1)).unwrap();

        let loaded = persistence.load_snapshot(SessionKind::Timed).unwrap().unwrap();
        assert_eq!(loaded.session, session);
        assert_eq!(loaded.selection, Some(selection));
        assert_eq!(loaded.written_at, at(1));

        persistence.delete_snapshot(SessionKind::Timed).unwrap();
        assert!(persistence.load_snapshot(SessionKind::Timed).unwrap().is_none());
    }

    #[test]
    fn corrupt_snapshot_is_a_decode_failure() {
        let persistence = engine(50);
        persistence
            .store()
            .set(&snapshot_key(SessionKind::Checklist), b"{\"version\":1")
            .unwrap();

        let err = persistence.load_snapshot(SessionKind::Checklist).unwrap_err();
        assert!(
            matches!(err, SessionError::PersistenceDecodeFailure { ref key, .. } if key == "snapshot.checklist")
        );
    }

    #[test]
    fn snapshot_under_wrong_key_is_rejected() {
        let persistence = engine(50);
        let session = Session::new("Focus", SessionVariant::timed(Duration::from_secs(600)), at(0));
        let snapshot = PersistedSessionSnapshot::new(session, None, at(0));
        persistence
            .store()
            .set_json(&snapshot_key(SessionKind::Scheduled), &snapshot)
            .unwrap();

        assert!(persistence.load_snapshot(SessionKind::Scheduled).is_err());
    }

    #[test]
    fn history_is_bounded_most_recent_first() {
        let persistence = engine(3);
        for i in 0..5 {
            let session =
                Session::new(format!("s{i}"), SessionVariant::timed(Duration::from_secs(60)), at(i));
            let record = CompletedSessionRecord::new(&session, EndReason::Completed, at(i + 60));
            persistence.append_history(&record).unwrap();
        }

        let history = persistence.history(10).unwrap();
        let names: Vec<_> = history.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["s4", "s3", "s2"]);

        assert_eq!(persistence.history(1).unwrap().len(), 1);
    }

    #[test]
    fn lifecycle_marks_accumulate() {
        let persistence = engine(50);
        persistence.record_foreground(at(0)).unwrap();
        persistence.record_background(at(30)).unwrap();

        let marks = persistence.lifecycle().unwrap();
        assert_eq!(marks.last_foreground, Some(at(0)));
        assert_eq!(marks.last_background, Some(at(30)));
    }
}
