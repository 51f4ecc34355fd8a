//! Adaptive Threshold Engine - per-class, speed- and noise-responsive thresholds.
//!
//! Base sensitivity comes from an immutable profile table keyed by
//! (vehicle class, mount placement). The effective threshold then:
//! - grows linearly with the smoothed average speed above a breakpoint `L`
//!   (impacts scale with speed, so the bar must rise to keep the false-alarm
//!   rate flat),
//! - is multiplied by an ambient-noise factor learned from low-amplitude
//!   vertical samples (never below 1×),
//! - is clamped to a bounded multiple of the base so a runaway average or
//!   noise estimate cannot silently disable detection.

use serde::Serialize;
use tracing::info;

use crate::config::ThresholdTuning;
use crate::types::{MountPlacement, VehicleClass};

// ============================================================================
// Threshold Profiles
// ============================================================================

/// Base acceleration magnitudes for one (vehicle, mount) combination.
///
/// `speed_breaker_base` gates positive vertical excursions; `pothole_base`
/// is a magnitude — the detector compares against its negation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdProfile {
    pub speed_breaker_base: f64,
    pub pothole_base: f64,
}

/// Fallback when a (vehicle, mount) pair has no table entry.
pub const DEFAULT_PROFILE: ThresholdProfile = ThresholdProfile {
    speed_breaker_base: 2.0,
    pothole_base: 2.6,
};

/// Base sensitivity table.
///
/// Heavier vehicles damp impacts (lower bases), two-wheelers amplify them
/// (higher bases); a pocket adds body damping on top of the mount.
const PROFILE_TABLE: &[(VehicleClass, MountPlacement, ThresholdProfile)] = &[
    (VehicleClass::Car, MountPlacement::Dashboard, ThresholdProfile { speed_breaker_base: 1.8, pothole_base: 2.4 }),
    (VehicleClass::Car, MountPlacement::Pocket, ThresholdProfile { speed_breaker_base: 2.2, pothole_base: 2.8 }),
    (VehicleClass::Car, MountPlacement::Seat, ThresholdProfile { speed_breaker_base: 2.0, pothole_base: 2.6 }),
    (VehicleClass::Motorcycle, MountPlacement::Dashboard, ThresholdProfile { speed_breaker_base: 2.6, pothole_base: 3.2 }),
    (VehicleClass::Motorcycle, MountPlacement::Pocket, ThresholdProfile { speed_breaker_base: 3.0, pothole_base: 3.6 }),
    (VehicleClass::Motorcycle, MountPlacement::Seat, ThresholdProfile { speed_breaker_base: 2.8, pothole_base: 3.4 }),
    (VehicleClass::Bus, MountPlacement::Dashboard, ThresholdProfile { speed_breaker_base: 1.5, pothole_base: 2.0 }),
    (VehicleClass::Bus, MountPlacement::Pocket, ThresholdProfile { speed_breaker_base: 1.9, pothole_base: 2.4 }),
    (VehicleClass::Bus, MountPlacement::Seat, ThresholdProfile { speed_breaker_base: 1.7, pothole_base: 2.2 }),
];

/// Look up the base profile for a (vehicle, mount) pair.
///
/// A missing entry falls back to [`DEFAULT_PROFILE`] rather than failing —
/// configuration misses are absorbed, not fatal.
pub fn profile_for(vehicle: VehicleClass, mount: MountPlacement) -> ThresholdProfile {
    PROFILE_TABLE
        .iter()
        .find(|(v, m, _)| *v == vehicle && *m == mount)
        .map_or(DEFAULT_PROFILE, |(_, _, p)| *p)
}

// ============================================================================
// Ambient Noise Baseline
// ============================================================================

/// Slowly-updated running estimate of low-amplitude vertical acceleration.
///
/// Only samples below the noise ceiling feed the estimate, so genuine
/// impacts never inflate it. The estimate starts at the reference level
/// (multiplier 1×) and is reset there by `clear_history`.
#[derive(Debug, Clone)]
pub struct NoiseBaseline {
    estimate: f64,
    ceiling: f64,
    reference: f64,
    persistence: f64,
}

impl NoiseBaseline {
    pub fn new(tuning: &ThresholdTuning) -> Self {
        Self {
            estimate: tuning.noise_reference_mps2,
            ceiling: tuning.noise_ceiling_mps2,
            reference: tuning.noise_reference_mps2,
            persistence: tuning.noise_persistence,
        }
    }

    /// Feed one vertical sample; impacts above the ceiling are ignored.
    pub fn observe(&mut self, vertical: f64) {
        let amplitude = vertical.abs();
        if amplitude >= self.ceiling {
            return;
        }
        self.estimate = self.persistence * self.estimate + (1.0 - self.persistence) * amplitude;
    }

    /// Threshold multiplier, never below 1×.
    pub fn multiplier(&self) -> f64 {
        (self.estimate / self.reference).max(1.0)
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    pub fn reset(&mut self) {
        self.estimate = self.reference;
    }
}

// ============================================================================
// Adaptive Threshold Engine
// ============================================================================

/// Event class an effective threshold is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdClass {
    SpeedBreaker,
    Pothole,
}

/// Snapshot of the engine for introspection / dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdSnapshot {
    pub profile: ThresholdProfile,
    pub noise_estimate: f64,
    pub noise_multiplier: f64,
    pub speed_breaker_threshold: f64,
    pub pothole_threshold: f64,
}

/// Speed- and noise-responsive threshold computation.
#[derive(Debug, Clone)]
pub struct AdaptiveThresholdEngine {
    profile: ThresholdProfile,
    tuning: ThresholdTuning,
    noise: NoiseBaseline,
}

impl AdaptiveThresholdEngine {
    pub fn new(tuning: ThresholdTuning, vehicle: VehicleClass, mount: MountPlacement) -> Self {
        let profile = profile_for(vehicle, mount);
        let noise = NoiseBaseline::new(&tuning);
        Self {
            profile,
            tuning,
            noise,
        }
    }

    /// Swap the active profile (runtime reconfiguration).
    pub fn set_profile(&mut self, vehicle: VehicleClass, mount: MountPlacement) {
        self.profile = profile_for(vehicle, mount);
        info!(
            vehicle = %vehicle,
            mount = %mount,
            breaker_base = self.profile.speed_breaker_base,
            pothole_base = self.profile.pothole_base,
            "Threshold profile selected"
        );
    }

    /// Feed one vertical sample into the ambient-noise estimate.
    pub fn observe_vertical(&mut self, vertical: f64) {
        self.noise.observe(vertical);
    }

    /// Effective threshold magnitude for a class at the given average speed.
    ///
    /// Pure in (class, profile, speed, noise estimate): no other state is
    /// read, so the same inputs always produce the same threshold.
    pub fn effective(&self, class: ThresholdClass, avg_speed_kmh: f64) -> f64 {
        let base = match class {
            ThresholdClass::SpeedBreaker => self.profile.speed_breaker_base,
            ThresholdClass::Pothole => self.profile.pothole_base,
        };

        let over = (avg_speed_kmh - self.tuning.speed_breakpoint_kmh).max(0.0);
        let speed_adjusted = base + over * self.tuning.speed_scale;
        let with_noise = speed_adjusted * self.noise.multiplier();

        with_noise.clamp(
            base * self.tuning.clamp_low_ratio,
            base * self.tuning.clamp_high_ratio,
        )
    }

    /// Positive threshold gating speed-breaker candidates.
    pub fn speed_breaker_threshold(&self, avg_speed_kmh: f64) -> f64 {
        self.effective(ThresholdClass::SpeedBreaker, avg_speed_kmh)
    }

    /// Negative threshold gating pothole candidates.
    pub fn pothole_threshold(&self, avg_speed_kmh: f64) -> f64 {
        -self.effective(ThresholdClass::Pothole, avg_speed_kmh)
    }

    /// Reset the ambient-noise estimate (part of `clear_history`).
    pub fn reset_noise(&mut self) {
        self.noise.reset();
    }

    pub fn snapshot(&self, avg_speed_kmh: f64) -> ThresholdSnapshot {
        ThresholdSnapshot {
            profile: self.profile,
            noise_estimate: self.noise.estimate(),
            noise_multiplier: self.noise.multiplier(),
            speed_breaker_threshold: self.speed_breaker_threshold(avg_speed_kmh),
            pothole_threshold: self.pothole_threshold(avg_speed_kmh),
        }
    }
}
