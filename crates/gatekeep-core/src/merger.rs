//! Blocking rule merger: the single writer of the enforcement primitive

use gatekeep_api::RestrictionSet;
use gatekeep_host_api::RestrictionEnforcer;
use gatekeep_util::SelectionId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{SessionError, SessionResult};

/// Unions every registered selection and pushes the result to the enforcer.
///
/// Each registration change triggers exactly one `replace_restriction_set`.
/// A failed apply is remembered and retried on the next change.
pub struct BlockingRuleMerger {
    enforcer: Arc<dyn RestrictionEnforcer>,
    registrations: BTreeMap<SelectionId, RestrictionSet>,
    apply_pending: bool,
}

impl BlockingRuleMerger {
    pub fn new(enforcer: Arc<dyn RestrictionEnforcer>) -> Self {
        Self {
            enforcer,
            registrations: BTreeMap::new(),
            apply_pending: false,
        }
    }

    /// Register or replace the set contributed under `id`
    pub fn register(&mut self, id: SelectionId, set: RestrictionSet) -> SessionResult<()> {
        let changed = self.registrations.get(&id) != Some(&set);
        if changed {
            debug!(selection = %id, targets = set.len(), "Selection registered");
            self.registrations.insert(id, set);
        }
        if changed || self.apply_pending {
            self.apply()
        } else {
            Ok(())
        }
    }

    pub fn unregister(&mut self, id: &SelectionId) -> SessionResult<()> {
        let changed = self.registrations.remove(id).is_some();
        if changed {
            debug!(selection = %id, "Selection unregistered");
        }
        if changed || self.apply_pending {
            self.apply()
        } else {
            Ok(())
        }
    }

    /// Re-apply the current union unconditionally
    pub fn sync(&mut self) -> SessionResult<()> {
        self.apply()
    }

    pub fn merged(&self) -> RestrictionSet {
        RestrictionSet::union_of(self.registrations.values())
    }

    pub fn is_registered(&self, id: &SelectionId) -> bool {
        self.registrations.contains_key(id)
    }

    /// Whether the last apply failed
    pub fn apply_pending(&self) -> bool {
        self.apply_pending
    }

    fn apply(&mut self) -> SessionResult<()> {
        let merged = self.merged();
        match self.enforcer.replace_restriction_set(&merged) {
            Ok(()) => {
                self.apply_pending = false;
                debug!(
                    selections = self.registrations.len(),
                    targets = merged.len(),
                    "Restriction set applied"
                );
                Ok(())
            }
            Err(e) => {
                self.apply_pending = true;
                warn!(error = %e, "Failed to apply restriction set");
                Err(SessionError::EnforcementCallFailure(e.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for BlockingRuleMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingRuleMerger")
            .field("registrations", &self.registrations)
            .field("apply_pending", &self.apply_pending)
            .finish_non_exhaustive()
    }
}
