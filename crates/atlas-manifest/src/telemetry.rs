use atlas_transport::NetworkIdentity;
use log::info;

use crate::authority::{AuthorityTracker, TelemetryRow};

/// Publishes a snapshot of the tracker's rows. The reference implementation
/// forwards these to a dashboard/web layer out of scope here; this crate
/// only guarantees a row is produced per entry and logs it, matching the
/// ambient logging stack (SPEC_FULL.md §10.1).
pub struct TelemetryPublisher {
    self_id: NetworkIdentity,
}

impl TelemetryPublisher {
    pub fn new(self_id: NetworkIdentity) -> Self {
        Self { self_id }
    }

    pub fn publish(&self, tracker: &AuthorityTracker) -> Vec<TelemetryRow> {
        let rows = tracker.collect_telemetry_rows(self.self_id);
        info!("{} publishing telemetry for {} entities", self.self_id, rows.len());
        rows
    }
}
