//! Speed estimation: fix validation, fusion, and outlier-rejected smoothing.
//!
//! Location fixes arrive at a fraction of the accelerometer rate and with
//! wildly varying quality. Every fix is validated before use; the candidate
//! speed comes from the device-reported speed over ground when present, else
//! from displacement over time against the previous valid fix, blended with
//! a short-horizon acceleration-integration estimate that gains weight as
//! GPS accuracy degrades. The smoothed average the rest of the pipeline
//! consumes is an interquartile-range-filtered mean, so a single GPS glitch
//! cannot drag the thresholds around.

use std::collections::VecDeque;

use statrs::statistics::{Data, OrderStatistics};
use thiserror::Error;
use tracing::debug;

use crate::config::SpeedConfig;
use crate::types::{haversine_distance_m, LocationFix};

/// Why a location fix was rejected.
///
/// Rejections are absorbed locally — previous speed/position state is
/// retained — and surfaced only through counters and debug logs.
#[derive(Debug, Error, PartialEq)]
pub enum FixRejection {
    #[error("accuracy {accuracy_m:.1} m above ceiling {ceiling_m:.1} m")]
    PoorAccuracy { accuracy_m: f64, ceiling_m: f64 },

    #[error("coordinates ({latitude}, {longitude}) out of range")]
    OutOfRange { latitude: f64, longitude: f64 },

    #[error("degenerate (0, 0) fix")]
    Degenerate,

    #[error("non-finite field in fix")]
    NonFinite,

    #[error("timestamp not after previous fix")]
    NonMonotonic,

    #[error("implausible jump of {distance_m:.0} m between consecutive fixes")]
    ImplausibleJump { distance_m: f64 },
}

// ============================================================================
// Speed History
// ============================================================================

/// Count-limited store of recent speed samples (km/h).
///
/// Values outside the sane range are excluded at insert; the average is
/// computed after an IQR filter (`[Q1 − 1.5·IQR, Q3 + 1.5·IQR]`) so GPS
/// glitch outliers cannot move it far.
#[derive(Debug, Clone)]
pub struct SpeedHistory {
    values: VecDeque<f64>,
    cap: usize,
    max_speed_kmh: f64,
}

impl SpeedHistory {
    pub fn new(cap: usize, max_speed_kmh: f64) -> Self {
        Self {
            values: VecDeque::with_capacity(cap),
            cap,
            max_speed_kmh,
        }
    }

    /// Insert a sample; silently excludes values outside the sane range.
    pub fn push(&mut self, speed_kmh: f64) {
        if !speed_kmh.is_finite() || speed_kmh < 0.0 || speed_kmh > self.max_speed_kmh {
            debug!(speed_kmh, "Speed sample outside sane range, excluded");
            return;
        }
        if self.values.len() >= self.cap {
            self.values.pop_front();
        }
        self.values.push_back(speed_kmh);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// IQR-filtered moving average. Zero when empty.
    ///
    /// Below four samples the quartiles are meaningless, so the plain mean
    /// applies. If the filter would exclude everything (pathological
    /// spread), the plain mean is the fallback.
    pub fn filtered_mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let raw: Vec<f64> = self.values.iter().copied().collect();
        let plain_mean = raw.iter().sum::<f64>() / raw.len() as f64;
        if raw.len() < 4 {
            return plain_mean;
        }

        let mut data = Data::new(raw.clone());
        let q1 = data.lower_quartile();
        let q3 = data.upper_quartile();
        let iqr = q3 - q1;
        let lo = q1 - 1.5 * iqr;
        let hi = q3 + 1.5 * iqr;

        let kept: Vec<f64> = raw.iter().copied().filter(|v| *v >= lo && *v <= hi).collect();
        if kept.is_empty() {
            plain_mean
        } else {
            kept.iter().sum::<f64>() / kept.len() as f64
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

// ============================================================================
// Speed Estimator
// ============================================================================

/// Fused, outlier-rejecting speed estimator.
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    config: SpeedConfig,
    history: SpeedHistory,
    last_fix: Option<LocationFix>,
    /// Short-horizon acceleration-integration estimate, km/h.
    /// Leaks toward the smoothed average so dead-reckoning drift stays
    /// bounded between fixes.
    integrated_kmh: f64,
    last_motion_ms: Option<u64>,
}

impl SpeedEstimator {
    pub fn new(config: SpeedConfig) -> Self {
        let history = SpeedHistory::new(config.history_len, config.max_speed_kmh);
        Self {
            config,
            history,
            last_fix: None,
            integrated_kmh: 0.0,
            last_motion_ms: None,
        }
    }

    /// Validate and fuse one location fix.
    ///
    /// On acceptance returns the blended speed sample pushed into the
    /// history (`None` when this is the first usable fix and the device did
    /// not report a speed — position is still adopted). On rejection the
    /// previous state is fully retained.
    pub fn ingest_fix(&mut self, fix: &LocationFix) -> Result<Option<f64>, FixRejection> {
        self.validate(fix)?;

        let candidate = self.candidate_speed_kmh(fix)?;
        self.last_fix = Some(*fix);

        let Some(candidate) = candidate else {
            return Ok(None);
        };

        // Blend toward the integration estimate as GPS quality degrades.
        let accuracy_ratio = (fix.accuracy_m / self.config.accuracy_ceiling_m).clamp(0.0, 1.0);
        let w_int = accuracy_ratio * self.config.integration_weight_max;
        let blended = ((1.0 - w_int) * candidate + w_int * self.integrated_kmh)
            .clamp(0.0, self.config.max_speed_kmh);

        self.history.push(blended);
        // Re-anchor the integrator on every accepted fix.
        self.integrated_kmh = blended;

        debug!(
            candidate,
            integration = w_int,
            blended,
            "Location fix accepted"
        );
        Ok(Some(blended))
    }

    /// Feed the horizontal linear-acceleration magnitude from one
    /// conditioned sample into the integration estimate.
    pub fn observe_motion(&mut self, horizontal_accel_mps2: f64, timestamp_ms: u64) {
        let dt_s = match self.last_motion_ms {
            Some(prev) if timestamp_ms > prev => (timestamp_ms - prev) as f64 / 1_000.0,
            _ => {
                self.last_motion_ms = Some(timestamp_ms);
                return;
            }
        };
        self.last_motion_ms = Some(timestamp_ms);

        let leak = self.config.integration_leak;
        let anchor = self.history.filtered_mean();
        self.integrated_kmh = (leak * self.integrated_kmh
            + (1.0 - leak) * anchor
            + horizontal_accel_mps2 * dt_s * 3.6)
            .clamp(0.0, self.config.max_speed_kmh);
    }

    /// The IQR-filtered moving average consumed by the threshold engine.
    pub fn smoothed_kmh(&self) -> f64 {
        self.history.filtered_mean()
    }

    /// Position and accuracy of the last accepted fix, if any.
    pub fn last_fix(&self) -> Option<&LocationFix> {
        self.last_fix.as_ref()
    }

    /// Direct access for tests and diagnostics.
    pub fn history(&self) -> &SpeedHistory {
        &self.history
    }

    fn validate(&self, fix: &LocationFix) -> Result<(), FixRejection> {
        if !fix.latitude.is_finite()
            || !fix.longitude.is_finite()
            || !fix.accuracy_m.is_finite()
            || fix.speed_mps.is_some_and(|s| !s.is_finite())
        {
            return Err(FixRejection::NonFinite);
        }
        if fix.accuracy_m > self.config.accuracy_ceiling_m {
            return Err(FixRejection::PoorAccuracy {
                accuracy_m: fix.accuracy_m,
                ceiling_m: self.config.accuracy_ceiling_m,
            });
        }
        if !(-90.0..=90.0).contains(&fix.latitude) || !(-180.0..=180.0).contains(&fix.longitude) {
            return Err(FixRejection::OutOfRange {
                latitude: fix.latitude,
                longitude: fix.longitude,
            });
        }
        if fix.latitude == 0.0 && fix.longitude == 0.0 {
            return Err(FixRejection::Degenerate);
        }
        if let Some(prev) = &self.last_fix {
            if fix.timestamp_ms <= prev.timestamp_ms {
                return Err(FixRejection::NonMonotonic);
            }
        }
        Ok(())
    }

    /// Candidate speed in priority order: reported speed over ground, else
    /// displacement over time against the previous valid fix.
    fn candidate_speed_kmh(&self, fix: &LocationFix) -> Result<Option<f64>, FixRejection> {
        if let Some(mps) = fix.speed_mps {
            if mps >= 0.0 {
                return Ok(Some(mps * 3.6));
            }
        }

        let Some(prev) = &self.last_fix else {
            return Ok(None);
        };

        let distance_m =
            haversine_distance_m(prev.latitude, prev.longitude, fix.latitude, fix.longitude);
        if distance_m > self.config.max_fix_jump_m {
            return Err(FixRejection::ImplausibleJump { distance_m });
        }

        let dt_s = (fix.timestamp_ms - prev.timestamp_ms) as f64 / 1_000.0;
        if dt_s <= 0.0 {
            return Err(FixRejection::NonMonotonic);
        }
        Ok(Some(distance_m / dt_s * 3.6))
    }
}
