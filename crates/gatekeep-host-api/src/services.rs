//! Collaborator bundle handed to the coordinator at the composition root

use std::sync::Arc;

use crate::{BackgroundScheduler, ItemSource, LocationMonitor, RestrictionEnforcer, StatusSink, StepCounter};

/// Every platform collaborator the core talks to
#[derive(Clone)]
pub struct HostServices {
    pub enforcer: Arc<dyn RestrictionEnforcer>,
    pub location: Arc<dyn LocationMonitor>,
    pub steps: Arc<dyn StepCounter>,
    pub items: Arc<dyn ItemSource>,
    pub status: Arc<dyn StatusSink>,
    pub scheduler: Arc<dyn BackgroundScheduler>,
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}
