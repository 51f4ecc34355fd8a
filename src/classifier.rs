//! Classifier - Phase 2 decision procedure and confidence scoring.
//!
//! Stateless given the extracted features and the recent event history. The
//! decision runs as ordered gates; each either rejects to `Normal` or
//! contributes a confidence multiplier:
//!
//! 1. Validity — plausible speed, amplitude, and event spacing
//! 2. Base reliability — a speed-dependent curve peaking in the 5–25 km/h
//!    band where impact signatures are cleanest
//! 3. Signature analysis — class-specific counter-swing check, flipping the
//!    type when the polarity is reversed
//! 4. Statistical validation — variance band, skewness, prominence
//! 5. Temporal consistency — suspicious clustering penalty
//! 6. Broken-patch upgrade — reclassification from the trailing event
//!    cluster
//!
//! Final confidence is the product of all multipliers clamped to [0, 1].
//! Whether a scored event is worth surfacing is the caller's policy; the
//! classifier always returns a scored result.

use tracing::debug;

use crate::config::{BrokenPatchTuning, ClassifierTuning};
use crate::detector::{Candidate, ProvisionalKind};
use crate::history::EventHistory;
use crate::types::{haversine_distance_m, EventFeatures, RoadEvent, RoadEventKind};

/// Phase-2 decision procedure.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    tuning: ClassifierTuning,
    patch: BrokenPatchTuning,
    /// Minimum inter-event gap, for the temporal-consistency ratios
    min_event_gap_ms: u64,
}

impl EventClassifier {
    pub fn new(tuning: ClassifierTuning, patch: BrokenPatchTuning, min_event_gap_ms: u64) -> Self {
        Self {
            tuning,
            patch,
            min_event_gap_ms,
        }
    }

    /// Score one candidate against its features and the event history.
    pub fn classify(
        &self,
        candidate: &Candidate,
        features: &EventFeatures,
        history: &EventHistory,
    ) -> RoadEvent {
        // Gate 1: validity. Anything implausible rejects to Normal at a
        // fixed low confidence.
        if !self.is_valid(features) {
            debug!(
                speed = features.speed_kmh,
                value = features.value,
                "Validity gate rejected candidate"
            );
            return self.build(candidate, features, RoadEventKind::Normal, self.tuning.reject_confidence);
        }

        // Gate 2: base reliability from the speed curve.
        let mut confidence = self.base_reliability(features.speed_kmh);

        // Gate 3: signature analysis; may flip the provisional type.
        let (kind, signature_mult) = self.signature(candidate.kind, features);
        confidence *= signature_mult;

        // Gate 4: statistical validation.
        confidence *= self.statistical(features);

        // Gate 5: temporal consistency.
        confidence *= self.temporal(features);

        // Gate 6: broken-patch upgrade from the trailing cluster.
        let kind = if self.qualifies_as_broken_patch(candidate, history) {
            debug!(timestamp_ms = candidate.timestamp_ms, "Broken-patch upgrade applied");
            RoadEventKind::BrokenPatch
        } else {
            kind
        };

        self.build(candidate, features, kind, confidence.clamp(0.0, 1.0))
    }

    fn is_valid(&self, features: &EventFeatures) -> bool {
        let speed_ok =
            features.speed_kmh >= 0.0 && features.speed_kmh <= self.tuning.max_valid_speed_kmh;
        let amplitude_ok = features.value.abs() <= self.tuning.max_valid_amplitude_mps2;
        let spacing_ok = features
            .elapsed_since_last_ms
            .map_or(true, |ms| ms >= self.min_event_gap_ms);
        speed_ok && amplitude_ok && spacing_ok
    }

    /// Speed-dependent base confidence: near-maximal inside the optimal
    /// band, ramping up from standstill below it and decaying toward the
    /// floor above it.
    fn base_reliability(&self, speed_kmh: f64) -> f64 {
        let t = &self.tuning;
        if speed_kmh < t.optimal_speed_low_kmh {
            let frac = (speed_kmh / t.optimal_speed_low_kmh).clamp(0.0, 1.0);
            t.base_confidence_floor + frac * (t.base_confidence_optimal - t.base_confidence_floor)
        } else if speed_kmh <= t.optimal_speed_high_kmh {
            t.base_confidence_optimal
        } else if speed_kmh < t.base_confidence_decay_end_kmh {
            let span = t.base_confidence_decay_end_kmh - t.optimal_speed_high_kmh;
            let frac = (speed_kmh - t.optimal_speed_high_kmh) / span;
            t.base_confidence_optimal - frac * (t.base_confidence_optimal - t.base_confidence_floor)
        } else {
            t.base_confidence_floor
        }
    }

    /// Class-specific signature check.
    ///
    /// A speed breaker throws the device up then drops it: a positive peak
    /// with a strong negative swing nearby after it. A pothole is the mirror
    /// image. A strong counter-swing on the wrong side means the provisional
    /// polarity was reversed — the type flips and pays a penalty.
    fn signature(&self, kind: ProvisionalKind, features: &EventFeatures) -> (RoadEventKind, f64) {
        let t = &self.tuning;
        let magnitude = features.value.abs().max(f64::MIN_POSITIVE);
        let strong_negative =
            |v: Option<f64>| v.is_some_and(|x| x <= -t.signature_ratio * magnitude);
        let strong_positive =
            |v: Option<f64>| v.is_some_and(|x| x >= t.signature_ratio * magnitude);

        match kind {
            ProvisionalKind::SpeedBreaker => {
                if strong_negative(features.future_extremum) {
                    (RoadEventKind::SpeedBreaker, t.signature_boost)
                } else if strong_negative(features.past_extremum) {
                    // Down-then-up: the drop came first — this is a pothole
                    // whose recovery bump crossed the breaker threshold.
                    (RoadEventKind::Pothole, t.signature_flip_penalty)
                } else {
                    (RoadEventKind::SpeedBreaker, t.no_signature_penalty)
                }
            }
            ProvisionalKind::Pothole => {
                if strong_positive(features.future_extremum) {
                    (RoadEventKind::Pothole, t.signature_boost)
                } else if strong_positive(features.past_extremum) {
                    // Up-then-down: the rise came first — a speed breaker
                    // whose landing dip crossed the pothole threshold.
                    (RoadEventKind::SpeedBreaker, t.signature_flip_penalty)
                } else {
                    (RoadEventKind::Pothole, t.no_signature_penalty)
                }
            }
        }
    }

    /// Variance band, skewness, and prominence multipliers.
    fn statistical(&self, features: &EventFeatures) -> f64 {
        let t = &self.tuning;
        let mut mult = 1.0;

        match features.variance {
            Some(var) if var < t.variance_floor || var > t.variance_ceiling => {
                mult *= t.variance_penalty;
            }
            Some(_) => {}
            None => mult *= t.missing_stats_penalty,
        }

        if features
            .skewness
            .is_some_and(|s| s.abs() > t.skewness_limit)
        {
            mult *= t.skewness_penalty;
        }

        if features.prominence >= t.high_prominence {
            mult *= t.high_prominence_boost;
        } else if features.prominence < t.low_prominence {
            mult *= t.low_prominence_penalty;
        }

        mult
    }

    /// Penalize events that follow their predecessor unusually closely.
    fn temporal(&self, features: &EventFeatures) -> f64 {
        let t = &self.tuning;
        let Some(elapsed) = features.elapsed_since_last_ms else {
            return 1.0;
        };
        let gap = self.min_event_gap_ms as f64;
        let elapsed = elapsed as f64;
        if elapsed < gap * t.clustering_close_ratio {
            t.clustering_close_penalty
        } else if elapsed < gap * t.clustering_near_ratio {
            t.clustering_near_penalty
        } else {
            1.0
        }
    }

    /// Broken-patch upgrade: a trailing cluster of alternating
    /// breaker/pothole events that is confident, slow, and spatially tight
    /// means the road itself is broken, not a single obstacle.
    fn qualifies_as_broken_patch(&self, candidate: &Candidate, history: &EventHistory) -> bool {
        let from = candidate.timestamp_ms.saturating_sub(self.patch.window_ms);
        let cluster: Vec<&RoadEvent> = history
            .since(from)
            .filter(|e| {
                matches!(
                    e.kind,
                    RoadEventKind::SpeedBreaker | RoadEventKind::Pothole
                )
            })
            .collect();

        if cluster.len() < self.patch.min_events {
            return false;
        }

        // (i) alternating mix: with min_events ≥ 3 present, having both
        // kinds in the window guarantees at least one alternation.
        let has_breaker = cluster.iter().any(|e| e.kind == RoadEventKind::SpeedBreaker);
        let has_pothole = cluster.iter().any(|e| e.kind == RoadEventKind::Pothole);
        if !has_breaker || !has_pothole {
            return false;
        }

        let n = cluster.len() as f64;

        // (ii) confidence floor
        let avg_confidence = cluster.iter().map(|e| e.confidence).sum::<f64>() / n;
        if avg_confidence <= self.patch.confidence_floor {
            return false;
        }

        // (iii) speed ceiling
        let avg_speed = cluster.iter().map(|e| e.speed_kmh).sum::<f64>() / n;
        if avg_speed >= self.patch.speed_ceiling_kmh {
            return false;
        }

        // (iv) spatial clustering: average pairwise distance
        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..cluster.len() {
            for j in (i + 1)..cluster.len() {
                total += haversine_distance_m(
                    cluster[i].latitude,
                    cluster[i].longitude,
                    cluster[j].latitude,
                    cluster[j].longitude,
                );
                pairs += 1;
            }
        }
        if pairs == 0 {
            return false;
        }
        total / pairs as f64 <= self.patch.cluster_radius_m
    }

    fn build(
        &self,
        candidate: &Candidate,
        features: &EventFeatures,
        kind: RoadEventKind,
        confidence: f64,
    ) -> RoadEvent {
        RoadEvent {
            kind,
            latitude: candidate.latitude,
            longitude: candidate.longitude,
            timestamp_ms: candidate.timestamp_ms,
            confidence,
            vertical: candidate.value,
            speed_kmh: candidate.speed_kmh,
            features: *features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokenPatchTuning, ClassifierTuning, DetectorTuning};

    fn classifier() -> EventClassifier {
        EventClassifier::new(
            ClassifierTuning::default(),
            BrokenPatchTuning::default(),
            DetectorTuning::default().min_event_gap_ms,
        )
    }

    fn candidate(kind: ProvisionalKind, value: f64, speed: f64, ts: u64) -> Candidate {
        Candidate {
            kind,
            timestamp_ms: ts,
            value,
            prominence: 0.95,
            speed_kmh: speed,
            latitude: 12.97,
            longitude: 77.59,
        }
    }

    fn features_for(c: &Candidate) -> EventFeatures {
        EventFeatures {
            value: c.value,
            future_extremum: None,
            past_extremum: None,
            elapsed_since_last_ms: None,
            speed_kmh: c.speed_kmh,
            variance: Some(2.0),
            skewness: Some(0.2),
            prominence: c.prominence,
        }
    }

    fn stored(kind: RoadEventKind, ts: u64, speed: f64, lat: f64, lon: f64) -> RoadEvent {
        RoadEvent {
            kind,
            latitude: lat,
            longitude: lon,
            timestamp_ms: ts,
            confidence: 0.8,
            vertical: 3.0,
            speed_kmh: speed,
            features: EventFeatures {
                value: 3.0,
                future_extremum: None,
                past_extremum: None,
                elapsed_since_last_ms: None,
                speed_kmh: speed,
                variance: Some(2.0),
                skewness: Some(0.0),
                prominence: 0.9,
            },
        }
    }

    #[test]
    fn test_validity_gate_rejects_extreme_speed() {
        let c = candidate(ProvisionalKind::SpeedBreaker, 5.0, 200.0, 10_000);
        let f = features_for(&c);
        let event = classifier().classify(&c, &f, &EventHistory::new());
        assert_eq!(event.kind, RoadEventKind::Normal);
        assert!((event.confidence - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validity_gate_rejects_saturated_amplitude() {
        let c = candidate(ProvisionalKind::Pothole, -40.0, 15.0, 10_000);
        let f = features_for(&c);
        let event = classifier().classify(&c, &f, &EventHistory::new());
        assert_eq!(event.kind, RoadEventKind::Normal);
    }

    #[test]
    fn test_breaker_with_signature_scores_high() {
        let c = candidate(ProvisionalKind::SpeedBreaker, 5.0, 15.0, 10_000);
        let mut f = features_for(&c);
        f.future_extremum = Some(-4.0);
        let event = classifier().classify(&c, &f, &EventHistory::new());
        assert_eq!(event.kind, RoadEventKind::SpeedBreaker);
        assert!(event.confidence > 0.5, "confidence = {}", event.confidence);
        assert!(event.confidence <= 1.0);
    }

    #[test]
    fn test_reversed_polarity_flips_breaker_to_pothole() {
        let c = candidate(ProvisionalKind::SpeedBreaker, 5.0, 15.0, 10_000);
        let mut f = features_for(&c);
        // The strong drop came BEFORE the positive peak
        f.past_extremum = Some(-4.0);
        let event = classifier().classify(&c, &f, &EventHistory::new());
        assert_eq!(event.kind, RoadEventKind::Pothole);
    }

    #[test]
    fn test_reversed_polarity_flips_pothole_to_breaker() {
        let c = candidate(ProvisionalKind::Pothole, -5.0, 15.0, 10_000);
        let mut f = features_for(&c);
        f.past_extremum = Some(4.0);
        let event = classifier().classify(&c, &f, &EventHistory::new());
        assert_eq!(event.kind, RoadEventKind::SpeedBreaker);
    }

    #[test]
    fn test_base_reliability_curve_shape() {
        let cl = classifier();
        let still = cl.base_reliability(0.5);
        let optimal = cl.base_reliability(15.0);
        let highway = cl.base_reliability(80.0);
        assert!(optimal > still, "optimal {} vs still {}", optimal, still);
        assert!(optimal > highway, "optimal {} vs highway {}", optimal, highway);
        assert!((optimal - 0.9).abs() < f64::EPSILON);
        assert!((highway - 0.35).abs() < f64::EPSILON);
    }

    #[test]
    fn test_low_variance_penalized() {
        // No signature boost here: the pre-clamp product must stay below
        // 1.0 for the penalty to be observable.
        let c = candidate(ProvisionalKind::SpeedBreaker, 5.0, 15.0, 10_000);
        let mut f = features_for(&c);

        let clean = classifier().classify(&c, &f, &EventHistory::new());
        f.variance = Some(0.001);
        let uniform = classifier().classify(&c, &f, &EventHistory::new());
        assert!(uniform.confidence < clean.confidence);
    }

    #[test]
    fn test_clustered_event_penalized() {
        // No signature boost here either, for the same clamping reason.
        let c = candidate(ProvisionalKind::SpeedBreaker, 5.0, 15.0, 10_000);
        let mut f = features_for(&c);

        let spaced = classifier().classify(&c, &f, &EventHistory::new());
        // 3 s after the previous event: above the gap but suspiciously close
        f.elapsed_since_last_ms = Some(3_000);
        let clustered = classifier().classify(&c, &f, &EventHistory::new());
        assert!(clustered.confidence < spaced.confidence);
    }

    #[test]
    fn test_broken_patch_upgrade() {
        let mut history = EventHistory::new();
        history.push(stored(RoadEventKind::SpeedBreaker, 2_000, 15.0, 12.9700, 77.5900));
        history.push(stored(RoadEventKind::Pothole, 5_000, 16.0, 12.9702, 77.5900));
        history.push(stored(RoadEventKind::SpeedBreaker, 8_000, 14.0, 12.9704, 77.5900));

        let c = candidate(ProvisionalKind::Pothole, -5.0, 15.0, 11_000);
        let mut f = features_for(&c);
        f.future_extremum = Some(4.0);
        let event = classifier().classify(&c, &f, &history);
        assert_eq!(event.kind, RoadEventKind::BrokenPatch);
    }

    #[test]
    fn test_broken_patch_needs_mixed_kinds() {
        let mut history = EventHistory::new();
        for ts in [2_000u64, 5_000, 8_000] {
            history.push(stored(RoadEventKind::SpeedBreaker, ts, 15.0, 12.9700, 77.5900));
        }
        let c = candidate(ProvisionalKind::Pothole, -5.0, 15.0, 11_000);
        let f = features_for(&c);
        let event = classifier().classify(&c, &f, &history);
        assert_ne!(event.kind, RoadEventKind::BrokenPatch);
    }

    #[test]
    fn test_broken_patch_needs_spatial_cluster() {
        let mut history = EventHistory::new();
        // Same mix and timing, but spread kilometers apart
        history.push(stored(RoadEventKind::SpeedBreaker, 2_000, 15.0, 12.9700, 77.5900));
        history.push(stored(RoadEventKind::Pothole, 5_000, 16.0, 12.9880, 77.5900));
        history.push(stored(RoadEventKind::SpeedBreaker, 8_000, 14.0, 13.0060, 77.5900));

        let c = candidate(ProvisionalKind::Pothole, -5.0, 15.0, 11_000);
        let f = features_for(&c);
        let event = classifier().classify(&c, &f, &history);
        assert_ne!(event.kind, RoadEventKind::BrokenPatch);
    }

    #[test]
    fn test_broken_patch_needs_low_speed() {
        let mut history = EventHistory::new();
        history.push(stored(RoadEventKind::SpeedBreaker, 2_000, 40.0, 12.9700, 77.5900));
        history.push(stored(RoadEventKind::Pothole, 5_000, 42.0, 12.9702, 77.5900));
        history.push(stored(RoadEventKind::SpeedBreaker, 8_000, 41.0, 12.9704, 77.5900));

        let c = candidate(ProvisionalKind::Pothole, -5.0, 15.0, 11_000);
        let f = features_for(&c);
        let event = classifier().classify(&c, &f, &history);
        assert_ne!(event.kind, RoadEventKind::BrokenPatch);
    }

    #[test]
    fn test_broken_patch_window_excludes_stale_events() {
        let mut history = EventHistory::new();
        // Old cluster, 60+ seconds before the candidate
        history.push(stored(RoadEventKind::SpeedBreaker, 2_000, 15.0, 12.9700, 77.5900));
        history.push(stored(RoadEventKind::Pothole, 5_000, 16.0, 12.9702, 77.5900));
        history.push(stored(RoadEventKind::SpeedBreaker, 8_000, 14.0, 12.9704, 77.5900));

        let c = candidate(ProvisionalKind::Pothole, -5.0, 15.0, 70_000);
        let f = features_for(&c);
        let event = classifier().classify(&c, &f, &history);
        assert_ne!(event.kind, RoadEventKind::BrokenPatch);
    }

    #[test]
    fn test_confidence_always_bounded() {
        let cl = classifier();
        // Stack every boost: optimal speed, perfect signature, prominence
        let c = candidate(ProvisionalKind::SpeedBreaker, 5.0, 15.0, 10_000);
        let mut f = features_for(&c);
        f.future_extremum = Some(-5.0);
        f.prominence = 1.0;
        let event = cl.classify(&c, &f, &EventHistory::new());
        assert!(event.confidence <= 1.0);
        assert!(event.confidence >= 0.0);
    }
}
