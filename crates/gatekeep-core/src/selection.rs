//! Durable map of selection id to restriction set

use gatekeep_api::RestrictionSet;
use gatekeep_util::SelectionId;
use std::collections::BTreeMap;
use tracing::debug;

use crate::{PersistenceEngine, SessionResult};

/// Selections attributed to session kinds and to the legacy call sites.
///
/// Persisted on every change, independently of session snapshots.
#[derive(Debug)]
pub struct SelectionStore {
    persistence: PersistenceEngine,
    entries: BTreeMap<SelectionId, RestrictionSet>,
}

impl SelectionStore {
    pub fn load(persistence: PersistenceEngine) -> SessionResult<Self> {
        let entries = persistence.load_selections()?;
        debug!(count = entries.len(), "Selections loaded");
        Ok(Self {
            persistence,
            entries,
        })
    }

    pub fn empty(persistence: PersistenceEngine) -> Self {
        Self {
            persistence,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: &SelectionId) -> Option<&RestrictionSet> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &SelectionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn put(&mut self, id: SelectionId, set: RestrictionSet) -> SessionResult<()> {
        if self.entries.get(&id) == Some(&set) {
            return Ok(());
        }
        self.entries.insert(id, set);
        self.persistence.save_selections(&self.entries)
    }

    pub fn remove(&mut self, id: &SelectionId) -> SessionResult<Option<RestrictionSet>> {
        let removed = self.entries.remove(id);
        if removed.is_some() {
            self.persistence.save_selections(&self.entries)?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
