//! Signal conditioning: gravity separation and axis reorientation.
//!
//! The accelerometer reports in the device frame, which depends entirely on
//! how the phone is mounted. Detection needs the component of linear
//! acceleration along the road surface normal, so every sample is
//! gravity-separated and rotated into the earth frame before anything
//! downstream sees it.
//!
//! Two reorientation paths:
//! - With a magnetometer sample observed: a rotation triad built from the
//!   gravity and field vectors (the standard platform rotation-matrix
//!   construction); the vertical is the earth-up row applied to the linear
//!   acceleration.
//! - Without: a two-angle pitch/roll Euler decomposition derived from the
//!   gravity estimate, with guarded `atan2` so the output stays defined when
//!   both horizontal gravity components approach zero (phone on its edge).

use crate::config::ConditioningConfig;
use crate::types::MotionSample;

/// Gravity components below this are treated as zero in the roll
/// decomposition to keep `atan2` away from the (0, 0) singularity.
const GIMBAL_EPS: f64 = 1e-6;

// ============================================================================
// Filter State
// ============================================================================

/// Mutable state of the conditioning filter.
///
/// Mutated in place on every accelerometer sample; never reset except at
/// explicit restart. The gravity magnitude is kept inside a physically
/// plausible band — an update that would leave the band is silently clamped
/// back onto it.
#[derive(Debug, Clone)]
pub struct FilterState {
    /// Exponentially-weighted gravity estimate in the device frame, m/s²
    pub gravity: [f64; 3],
    /// Rotation matrix (rows: east, north, up) once a magnetic-field sample
    /// has been observed
    pub rotation: Option<[[f64; 3]; 3]>,
    /// False until the first valid sample seeds the gravity estimate
    seeded: bool,
}

impl FilterState {
    fn new() -> Self {
        Self {
            gravity: [0.0, 0.0, 9.81],
            rotation: None,
            seeded: false,
        }
    }

    /// Magnitude of the current gravity estimate.
    pub fn gravity_magnitude(&self) -> f64 {
        let [x, y, z] = self.gravity;
        (x * x + y * y + z * z).sqrt()
    }
}

// ============================================================================
// Signal Conditioner
// ============================================================================

/// A conditioned (gravity-removed, reoriented) pair of axes values.
#[derive(Debug, Clone, Copy)]
pub struct ConditionedAxes {
    /// Linear acceleration in the device frame, m/s²
    pub linear: [f64; 3],
    /// Reoriented vertical component, m/s² (positive = up)
    pub vertical: f64,
}

/// Per-sample gravity filter and reorientation.
///
/// O(1) per sample, no allocations — this sits on the hot path at up to
/// ~150 Hz.
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    state: FilterState,
    config: ConditioningConfig,
}

impl SignalConditioner {
    pub fn new(config: ConditioningConfig) -> Self {
        Self {
            state: FilterState::new(),
            config,
        }
    }

    /// Condition one raw sample.
    ///
    /// Returns `None` for non-finite input, which is dropped before any
    /// filter state is touched.
    pub fn condition(&mut self, sample: &MotionSample) -> Option<ConditionedAxes> {
        if !sample.is_finite() {
            tracing::debug!(timestamp_ms = sample.timestamp_ms, "Non-finite sample dropped");
            return None;
        }

        self.update_gravity(sample.accel);

        let g = self.state.gravity;
        let linear = [
            sample.accel[0] - g[0],
            sample.accel[1] - g[1],
            sample.accel[2] - g[2],
        ];

        if let Some(mag) = sample.mag {
            self.update_rotation(mag);
        }

        let vertical = match self.state.rotation {
            Some(rot) => dot(rot[2], linear),
            None => self.euler_vertical(linear),
        };

        Some(ConditionedAxes { linear, vertical })
    }

    /// Read-only view of the filter state (diagnostics).
    pub fn filter_state(&self) -> &FilterState {
        &self.state
    }

    /// Discard all filter state, as at an explicit restart.
    pub fn reset(&mut self) {
        self.state = FilterState::new();
    }

    /// Exponential gravity update with a plausibility clamp.
    fn update_gravity(&mut self, accel: [f64; 3]) {
        if !self.state.seeded {
            // Seed from the first sample so the filter does not spend its
            // first seconds converging from an arbitrary prior.
            let mag = (accel[0] * accel[0] + accel[1] * accel[1] + accel[2] * accel[2]).sqrt();
            if mag >= self.config.gravity_min_mps2 && mag <= self.config.gravity_max_mps2 {
                self.state.gravity = accel;
            }
            self.state.seeded = true;
            return;
        }

        let p = self.config.gravity_persistence;
        let previous = self.state.gravity;
        for axis in 0..3 {
            self.state.gravity[axis] = p * previous[axis] + (1.0 - p) * accel[axis];
        }

        // Invariant: gravity magnitude stays physically plausible. Updates
        // that would leave the band are clamped back onto its edge.
        let mag = self.state.gravity_magnitude();
        if mag < self.config.gravity_min_mps2 || mag > self.config.gravity_max_mps2 {
            if mag > GIMBAL_EPS {
                let bound = mag.clamp(self.config.gravity_min_mps2, self.config.gravity_max_mps2);
                let scale = bound / mag;
                for axis in 0..3 {
                    self.state.gravity[axis] *= scale;
                }
            } else {
                self.state.gravity = previous;
            }
        }
    }

    /// Rebuild the rotation triad from the gravity and magnetic vectors.
    ///
    /// rows: east = field × gravity, north = gravity × east, up = gravity.
    /// A field nearly parallel to gravity gives no usable east axis; the
    /// previous rotation (or the Euler fallback) is kept in that case.
    fn update_rotation(&mut self, mag: [f64; 3]) {
        let g = self.state.gravity;

        let east = cross(mag, g);
        let east_norm = norm(east);
        if east_norm < GIMBAL_EPS {
            return;
        }
        let east = scale(east, 1.0 / east_norm);

        let g_norm = norm(g);
        if g_norm < GIMBAL_EPS {
            return;
        }
        let up = scale(g, 1.0 / g_norm);
        let north = cross(up, east);

        self.state.rotation = Some([east, north, up]);
    }

    /// Pitch/roll Euler fallback: project the linear acceleration onto the
    /// earth-up axis implied by the gravity estimate.
    fn euler_vertical(&self, linear: [f64; 3]) -> f64 {
        let [gx, gy, gz] = self.state.gravity;

        let pitch = (-gx).atan2((gy * gy + gz * gz).sqrt().max(GIMBAL_EPS));
        // Gimbal guard: with both horizontal gravity components near zero
        // the roll is undefined; zero keeps the output continuous.
        let roll = if gy.abs() < GIMBAL_EPS && gz.abs() < GIMBAL_EPS {
            0.0
        } else {
            gy.atan2(gz)
        };

        let (sp, cp) = pitch.sin_cos();
        let (sr, cr) = roll.sin_cos();

        -linear[0] * sp + linear[1] * cp * sr + linear[2] * cp * cr
    }
}

// ============================================================================
// Small vector helpers
// ============================================================================

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(v: [f64; 3]) -> f64 {
    dot(v, v).sqrt()
}

fn scale(v: [f64; 3], s: f64) -> [f64; 3] {
    [v[0] * s, v[1] * s, v[2] * s]
}
