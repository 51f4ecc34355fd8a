//! Processing Pipeline Module
//!
//! ## Per-sample processing sequence
//!
//! ```text
//! PHASE 1: Conditioning (gravity removal + reorientation, every sample)
//! PHASE 2: History buffers + noise baseline (continuous)
//! PHASE 3: Pending-candidate resolution (feature extraction + classification,
//!          ONLY once the adaptive window is covered)
//! PHASE 4: Candidate detection (threshold crossing + local-peak gate,
//!          ONLY while no candidate is pending)
//! ```
//!
//! Location fixes arrive on their own lower-frequency trigger and only
//! update the shared speed/position cell read in Phase 1.

mod coordinator;
mod stats;

pub use coordinator::{RoadPipeline, EVENT_CHANNEL_CAPACITY};
pub use stats::PipelineStats;
