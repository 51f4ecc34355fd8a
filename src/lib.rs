//! RoadSense: on-device road-surface anomaly detection.
//!
//! Classifies speed breakers, potholes, and broken-patch stretches in real
//! time from a phone-class inertial stream and a location stream.
//!
//! ## Architecture
//!
//! - **Signal Conditioner**: gravity removal + axis reorientation
//! - **Speed Estimator**: fused, outlier-rejecting speed from location fixes
//! - **Adaptive Threshold Engine**: per-profile, speed- and noise-responsive
//!   detection thresholds
//! - **Candidate Detector / Feature Extractor / Classifier**: the two-phase
//!   detection sequence producing confidence-scored [`RoadEvent`]s
//!
//! The whole core is owned by one [`RoadPipeline`] instance; readings and
//! events leave through explicit channels. Timestamps are caller-supplied,
//! so any input sequence replays deterministically.

pub mod classifier;
pub mod conditioning;
pub mod config;
pub mod detector;
pub mod features;
pub mod history;
pub mod pipeline;
pub mod sensors;
pub mod speed;
pub mod thresholds;
pub mod types;

// Re-export the configuration root
pub use config::RoadConfig;

// Re-export commonly used types
pub use types::{
    ConditionedReading, EventFeatures, LocationFix, MotionSample, MountPlacement, RoadEvent,
    RoadEventKind, VehicleClass,
};

// Re-export the pipeline facade
pub use pipeline::{PipelineStats, RoadPipeline};

// Re-export threshold introspection
pub use thresholds::{profile_for, AdaptiveThresholdEngine, ThresholdProfile, ThresholdSnapshot};

// Re-export speed components
pub use speed::{FixRejection, SpeedEstimator, SpeedHistory};
