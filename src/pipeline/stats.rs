//! Pipeline statistics counters.

use serde::Serialize;

use crate::types::{RoadEvent, RoadEventKind};

/// Running counters for one pipeline instance.
///
/// Read-only introspection for the external collaborator; never consulted
/// by the detection logic itself.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    /// Motion samples handed to the pipeline (including dropped ones)
    pub samples_received: u64,
    /// Motion samples that made it into the history buffers
    pub samples_processed: u64,
    /// Non-finite or out-of-order samples dropped
    pub samples_dropped: u64,
    /// Location fixes accepted by the speed estimator
    pub fixes_accepted: u64,
    /// Location fixes rejected by validation
    pub fixes_rejected: u64,
    /// Phase-1 candidates declared
    pub candidates_detected: u64,
    /// Events emitted (non-Normal classifications)
    pub events_emitted: u64,
    pub speed_breakers: u64,
    pub potholes: u64,
    pub broken_patches: u64,
    /// Candidates scored Normal (returned but not emitted)
    pub normals_scored: u64,
}

impl PipelineStats {
    /// Account one classification outcome.
    pub fn record_event(&mut self, event: &RoadEvent) {
        match event.kind {
            RoadEventKind::SpeedBreaker => {
                self.speed_breakers += 1;
                self.events_emitted += 1;
            }
            RoadEventKind::Pothole => {
                self.potholes += 1;
                self.events_emitted += 1;
            }
            RoadEventKind::BrokenPatch => {
                self.broken_patches += 1;
                self.events_emitted += 1;
            }
            RoadEventKind::Normal => self.normals_scored += 1,
        }
    }
}
