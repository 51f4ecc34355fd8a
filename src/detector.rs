//! Candidate Detector - Phase 1 of the two-phase detection sequence.
//!
//! Runs once per conditioned reading and decides whether the road just hit
//! back hard enough to be worth featurizing. Three gates, in order:
//!
//! 1. Minimum spacing since the last *emitted* event (not the last
//!    candidate) — readings inside the gap are discarded outright.
//! 2. Threshold crossing with sufficient peak prominence against the short
//!    trailing window.
//! 3. True local extremum over a symmetric neighborhood: the detector scores
//!    the center sample of the raw-reading window once `k` neighbors exist
//!    on both sides, so detection lags `k` samples and the candidate's
//!    timestamp is the center sample's.
//!
//! No event is emitted here — the output is a provisional class tag handed
//! to the feature extractor.

use tracing::debug;

use crate::config::DetectorTuning;
use crate::history::BoundedTimeWindow;
use crate::types::ConditionedReading;

/// Guard against a division-by-zero prominence on a perfectly flat window.
const FLAT_EPS: f64 = 1e-9;

/// Provisional class assigned in Phase 1, refined by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionalKind {
    SpeedBreaker,
    Pothole,
}

/// A threshold-crossing local peak awaiting Phase-2 classification.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub kind: ProvisionalKind,
    /// Timestamp of the peak sample (the window center), ms
    pub timestamp_ms: u64,
    /// Vertical value at the peak, m/s²
    pub value: f64,
    /// Peak prominence in [0, 1]
    pub prominence: f64,
    /// Speed at the peak sample, km/h
    pub speed_kmh: f64,
    pub latitude: f64,
    pub longitude: f64,
}

/// Phase-1 threshold-crossing + local-peak gate.
#[derive(Debug, Clone)]
pub struct CandidateDetector {
    tuning: DetectorTuning,
}

impl CandidateDetector {
    pub fn new(tuning: DetectorTuning) -> Self {
        Self { tuning }
    }

    /// Minimum spacing enforced between emitted events, ms.
    pub fn min_event_gap_ms(&self) -> u64 {
        self.tuning.min_event_gap_ms
    }

    /// Evaluate the raw-reading window after a new reading was appended.
    ///
    /// `breaker_threshold` is positive, `pothole_threshold` negative;
    /// `last_event_ms` is the timestamp of the last emitted event.
    pub fn evaluate(
        &self,
        raw: &BoundedTimeWindow<ConditionedReading>,
        breaker_threshold: f64,
        pothole_threshold: f64,
        last_event_ms: Option<u64>,
    ) -> Option<Candidate> {
        let k = self.tuning.neighborhood_half_width;
        let needed = 2 * k + 1;
        if raw.len() < needed {
            return None;
        }

        let readings: Vec<&ConditionedReading> = raw.iter().map(|(_, r)| r).collect();
        let center_idx = readings.len() - 1 - k;
        let center = readings[center_idx];

        // Gate 1: minimum inter-event spacing. Discard the reading entirely.
        if let Some(last) = last_event_ms {
            if center.timestamp_ms.saturating_sub(last) < self.tuning.min_event_gap_ms {
                return None;
            }
        }

        // Gate 2a: threshold crossing decides the provisional class.
        let v = center.vertical;
        let kind = if v >= breaker_threshold {
            ProvisionalKind::SpeedBreaker
        } else if v <= pothole_threshold {
            ProvisionalKind::Pothole
        } else {
            return None;
        };

        // Gate 2b: prominence against the trailing window.
        let prominence = Self::prominence(&readings, v);
        if prominence < self.tuning.min_prominence {
            debug!(
                value = v,
                prominence,
                "Threshold crossing rejected: insufficient prominence"
            );
            return None;
        }

        // Gate 3: true local extremum over the symmetric neighborhood.
        // Neighbors may equal the center (plateau) but not exceed it in the
        // relevant direction.
        let is_extremum = match kind {
            ProvisionalKind::SpeedBreaker => readings
                [center_idx - k..=center_idx + k]
                .iter()
                .all(|r| r.vertical <= v),
            ProvisionalKind::Pothole => readings[center_idx - k..=center_idx + k]
                .iter()
                .all(|r| r.vertical >= v),
        };
        if !is_extremum {
            return None;
        }

        debug!(
            kind = ?kind,
            value = v,
            prominence,
            timestamp_ms = center.timestamp_ms,
            "Phase-1 candidate declared"
        );

        Some(Candidate {
            kind,
            timestamp_ms: center.timestamp_ms,
            value: v,
            prominence,
            speed_kmh: center.speed_kmh,
            latitude: center.latitude,
            longitude: center.longitude,
        })
    }

    /// Deviation of the value from the window mean, normalized by the
    /// window's maximum deviation.
    fn prominence(readings: &[&ConditionedReading], value: f64) -> f64 {
        let n = readings.len() as f64;
        let mean = readings.iter().map(|r| r.vertical).sum::<f64>() / n;
        let max_dev = readings
            .iter()
            .map(|r| (r.vertical - mean).abs())
            .fold(0.0_f64, f64::max);
        if max_dev < FLAT_EPS {
            return 0.0;
        }
        ((value - mean).abs() / max_dev).clamp(0.0, 1.0)
    }
}
