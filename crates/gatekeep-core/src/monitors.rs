//! Installs and tears down the per-kind collaborator observers

use gatekeep_api::{ItemStatus, Session, SessionVariant};
use gatekeep_host_api::{EventSender, HostServices, Region};
use tracing::debug;

use crate::{SessionError, SessionResult};

/// Glue between sessions and the collaborators that report on them.
///
/// Timed, Scheduled and SleepWindow sessions are driven by `tick` and have
/// nothing to install.
pub(crate) struct Monitors {
    services: HostServices,
    events: EventSender,
}

impl Monitors {
    pub(crate) fn new(services: HostServices, events: EventSender) -> Self {
        Self { services, events }
    }

    /// Radius actually monitored for a geofence
    pub(crate) fn clamp_radius(&self, radius_meters: f64) -> f64 {
        radius_meters.max(self.services.location.minimum_radius_meters())
    }

    /// Start observing for `session`. Checklist sessions get the current item
    /// statuses back; every other kind returns an empty list.
    pub(crate) fn install(&self, session: &Session) -> SessionResult<Vec<ItemStatus>> {
        let kind = session.kind();
        let statuses = match &session.variant {
            SessionVariant::Checklist(list) => self
                .services
                .items
                .observe_changes(&list.items, self.events.clone())
                .map_err(|e| SessionError::from_host("items", e))?,
            SessionVariant::Geofenced(fence) => {
                let region = Region {
                    session_id: session.id,
                    center: fence.center,
                    radius_meters: self.clamp_radius(fence.radius_meters),
                };
                self.services
                    .location
                    .start_monitoring(&region, self.events.clone())
                    .map_err(|e| SessionError::from_host("location", e))?;
                Vec::new()
            }
            SessionVariant::StepGoal(_) => {
                self.services
                    .steps
                    .observe_changes(self.events.clone())
                    .map_err(|e| SessionError::from_host("steps", e))?;
                Vec::new()
            }
            SessionVariant::Timed(_)
            | SessionVariant::Scheduled(_)
            | SessionVariant::SleepWindow(_) => Vec::new(),
        };

        debug!(kind = %kind, session_id = %session.id, "Monitor installed");
        Ok(statuses)
    }

    pub(crate) fn remove(&self, session: &Session) {
        match &session.variant {
            SessionVariant::Checklist(_) => self.services.items.stop_observing(),
            SessionVariant::Geofenced(_) => self.services.location.stop_monitoring(&session.id),
            SessionVariant::StepGoal(_) => self.services.steps.stop_observing(),
            SessionVariant::Timed(_)
            | SessionVariant::Scheduled(_)
            | SessionVariant::SleepWindow(_) => return,
        }
        debug!(kind = %session.kind(), session_id = %session.id, "Monitor removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use gatekeep_api::{Coordinate, TriggerMode};
    use gatekeep_host_api::{MockHost, MockLocation, event_channel};
    use std::sync::Arc;

    #[test]
    fn geofence_radius_is_clamped() {
        let mut host = MockHost::new();
        host.location = Arc::new(MockLocation::new(200.0));
        let (tx, _rx) = event_channel();
        let monitors = Monitors::new(host.services(), tx);

        let session = Session::new(
            "Park",
            SessionVariant::geofenced(
                Coordinate {
                    latitude: 10.0,
                    longitude: 10.0,
                },
                50.0,
                TriggerMode::WhileInside,
            ),
            Local::now(),
        );
        monitors.install(&session).unwrap();

        let region = host.location.monitored(&session.id).unwrap();
        assert_eq!(region.radius_meters, 200.0);

        monitors.remove(&session);
        assert!(host.location.monitored(&session.id).is_none());
    }

    #[test]
    fn checklist_install_returns_current_statuses() {
        let host = MockHost::new();
        host.items.set_completed("dishes", true);
        let (tx, _rx) = event_channel();
        let monitors = Monitors::new(host.services(), tx);

        let session = Session::new(
            "Chores",
            SessionVariant::checklist(["dishes".into(), "laundry".into()]),
            Local::now(),
        );
        let statuses = monitors.install(&session).unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(host.items.is_observed());

        monitors.remove(&session);
        assert!(!host.items.is_observed());
    }
}
