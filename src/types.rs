//! Core data model for the road-anomaly detection pipeline.
//!
//! Everything that crosses a component boundary lives here: raw sensor
//! samples, conditioned readings, extracted features, and classified events.
//! All types are plain data with serde derives so the external collaborator
//! can log, replay, or ship them without extra glue.

use serde::{Deserialize, Serialize};

// ============================================================================
// Rider / Mount Configuration
// ============================================================================

/// Vehicle class the device is travelling in.
///
/// Selects a base-sensitivity row in the threshold profile table: heavier
/// vehicles damp road impacts, two-wheelers amplify them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleClass {
    Car,
    Motorcycle,
    Bus,
}

impl std::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VehicleClass::Car => write!(f, "car"),
            VehicleClass::Motorcycle => write!(f, "motorcycle"),
            VehicleClass::Bus => write!(f, "bus"),
        }
    }
}

/// Where the phone is mounted inside the vehicle.
///
/// A rigid dashboard mount transmits impacts cleanly; a pocket adds body
/// damping and clothing noise; a seat sits in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MountPlacement {
    Dashboard,
    Pocket,
    Seat,
}

impl std::fmt::Display for MountPlacement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MountPlacement::Dashboard => write!(f, "dashboard"),
            MountPlacement::Pocket => write!(f, "pocket"),
            MountPlacement::Seat => write!(f, "seat"),
        }
    }
}

// ============================================================================
// Sensor Inputs
// ============================================================================

/// One raw inertial sample from the motion-sensor collaborator.
///
/// Timestamps are caller-supplied milliseconds; the core never reads a wall
/// clock. Immutable once created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotionSample {
    /// Sample timestamp in milliseconds (monotonic, caller-defined epoch)
    pub timestamp_ms: u64,
    /// Raw 3-axis acceleration in m/s² (gravity included)
    pub accel: [f64; 3],
    /// 3-axis angular rate in rad/s, when the gyroscope reported
    pub gyro: Option<[f64; 3]>,
    /// 3-axis magnetic field in µT, when the magnetometer reported
    pub mag: Option<[f64; 3]>,
}

impl MotionSample {
    /// Accelerometer-only sample.
    pub fn new(timestamp_ms: u64, accel: [f64; 3]) -> Self {
        Self {
            timestamp_ms,
            accel,
            gyro: None,
            mag: None,
        }
    }

    /// True when every reported axis is a finite number.
    ///
    /// Non-finite samples must be dropped before they touch filter state —
    /// a single NaN permanently corrupts the gravity estimate.
    pub fn is_finite(&self) -> bool {
        let axes_finite = |v: &[f64; 3]| v.iter().all(|x| x.is_finite());
        axes_finite(&self.accel)
            && self.gyro.as_ref().map_or(true, axes_finite)
            && self.mag.as_ref().map_or(true, axes_finite)
    }
}

/// One location fix from the location collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationFix {
    /// Fix timestamp in milliseconds (same epoch as motion samples)
    pub timestamp_ms: u64,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Reported horizontal accuracy in meters (lower is better)
    pub accuracy_m: f64,
    /// Device-reported speed over ground in m/s, when available
    pub speed_mps: Option<f64>,
}

// ============================================================================
// Conditioned Reading
// ============================================================================

/// A gravity-removed, reoriented reading derived from one [`MotionSample`].
///
/// `vertical` is the road-impact axis: the component of linear acceleration
/// along the road surface normal, invariant to how the phone is mounted or
/// tilted. This is the unit stored in history and scored by the detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConditionedReading {
    pub timestamp_ms: u64,
    /// Linear (gravity-removed) acceleration in the device frame, m/s²
    pub linear_accel: [f64; 3],
    /// Reoriented vertical component, m/s² (positive = up)
    pub vertical: f64,
    /// Angular rate in rad/s (zeros when no gyroscope reported)
    pub gyro: [f64; 3],
    /// Smoothed speed at the time of the sample, km/h
    pub speed_kmh: f64,
    /// Latest known latitude in degrees
    pub latitude: f64,
    /// Latest known longitude in degrees
    pub longitude: f64,
    /// Latest known fix accuracy in meters
    pub accuracy_m: f64,
}

// ============================================================================
// Features & Events
// ============================================================================

/// Features extracted for one detection candidate.
///
/// `Option` fields are the defined "insufficient history" sentinels —
/// a window with too few points yields `None`, never an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventFeatures {
    /// Vertical value at detection, m/s²
    pub value: f64,
    /// Most significant local extremum after the candidate, within the
    /// adaptive window
    pub future_extremum: Option<f64>,
    /// Most significant local extremum before the candidate, within the
    /// adaptive window
    pub past_extremum: Option<f64>,
    /// Milliseconds since the previous emitted event, if any
    pub elapsed_since_last_ms: Option<u64>,
    /// Speed at detection, km/h
    pub speed_kmh: f64,
    /// Sample variance over the trailing statistics slice
    pub variance: Option<f64>,
    /// Standardized third-moment skewness over the trailing slice (≥3 points)
    pub skewness: Option<f64>,
    /// Peak prominence in [0, 1]
    pub prominence: f64,
}

/// Classification outcome for a road-surface event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoadEventKind {
    /// Raised obstacle: speed breaker / bump (up-then-down signature)
    SpeedBreaker,
    /// Depression: pothole (down-then-up signature)
    Pothole,
    /// Sustained irregular stretch inferred from a cluster of alternating
    /// events
    BrokenPatch,
    /// Scored but rejected — never emitted or stored
    Normal,
}

impl std::fmt::Display for RoadEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoadEventKind::SpeedBreaker => write!(f, "SPEED_BREAKER"),
            RoadEventKind::Pothole => write!(f, "POTHOLE"),
            RoadEventKind::BrokenPatch => write!(f, "BROKEN_PATCH"),
            RoadEventKind::Normal => write!(f, "NORMAL"),
        }
    }
}

/// A classified road-surface event.
///
/// Non-`Normal` events are appended to the event history and published on
/// the event channel; `Normal` results are returned to the caller for audit
/// but never stored or broadcast.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoadEvent {
    pub kind: RoadEventKind,
    pub latitude: f64,
    pub longitude: f64,
    /// Timestamp of the triggering sample, milliseconds
    pub timestamp_ms: u64,
    /// Classifier confidence in [0, 1]
    pub confidence: f64,
    /// Vertical value that triggered detection, m/s²
    pub vertical: f64,
    /// Speed at detection, km/h
    pub speed_kmh: f64,
    /// The features that produced this classification (audit/debug)
    pub features: EventFeatures,
}

// ============================================================================
// Geodesy
// ============================================================================

/// Mean Earth radius in meters (WGS-84 spherical approximation).
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates in meters.
///
/// Haversine formula; accurate to well under a meter over the sub-kilometer
/// spans the broken-patch clustering cares about.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}
