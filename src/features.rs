//! Feature Extractor - Phase 2 windowed extrema and statistical features.
//!
//! For a declared candidate, extracts everything the classifier needs:
//! the nearest significant extremum before and after the peak within an
//! adaptive, speed-scaled window, plus variance and skewness over a longer
//! fixed-size trailing slice of the vertical history. Insufficient history
//! never fails — it yields `None` sentinels the classifier treats as
//! missing evidence.

use crate::config::FeatureTuning;
use crate::detector::Candidate;
use crate::history::BoundedTimeWindow;
use crate::types::EventFeatures;

/// Standard deviations this small mean the slice is flat; skewness is
/// defined as zero rather than dividing by dust.
const STD_EPS: f64 = 1e-9;

/// Phase-2 feature extraction over the vertical-acceleration history.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    tuning: FeatureTuning,
    stats_slice_len: usize,
}

impl FeatureExtractor {
    pub fn new(tuning: FeatureTuning, stats_slice_len: usize) -> Self {
        Self {
            tuning,
            stats_slice_len,
        }
    }

    /// Length of the extremum search window at a given speed, ms.
    ///
    /// Inversely proportional to speed — faster travel compresses an
    /// obstacle's signature in time — and bounded to the configured range.
    pub fn adaptive_window_ms(&self, speed_kmh: f64) -> u64 {
        let speed = speed_kmh.max(1.0);
        let raw = self.tuning.window_speed_constant / speed;
        (raw as u64).clamp(self.tuning.window_min_ms, self.tuning.window_max_ms)
    }

    /// Build the feature set for one candidate.
    pub fn extract(
        &self,
        vertical: &BoundedTimeWindow<f64>,
        candidate: &Candidate,
        last_event_ms: Option<u64>,
    ) -> EventFeatures {
        let window_ms = self.adaptive_window_ms(candidate.speed_kmh);
        let ts = candidate.timestamp_ms;

        let future: Vec<(u64, f64)> = vertical
            .range(ts + 1, ts + window_ms)
            .map(|&(t, v)| (t, v))
            .collect();
        let past: Vec<(u64, f64)> = vertical
            .range(ts.saturating_sub(window_ms), ts.saturating_sub(1))
            .map(|&(t, v)| (t, v))
            .collect();

        let future_extremum = self.significant_extremum(&future);
        let past_extremum = self.significant_extremum(&past);

        // The statistics slice trails the candidate itself — the history may
        // already extend past it by the time classification runs, and a
        // quiet post-impact stretch must not masquerade as "too uniform".
        let trailing: Vec<f64> = vertical.range(0, ts).map(|&(_, v)| v).collect();
        let skip = trailing.len().saturating_sub(self.stats_slice_len);
        let slice = &trailing[skip..];
        let variance = sample_variance(slice);
        let skewness = sample_skewness(slice);

        EventFeatures {
            value: candidate.value,
            future_extremum,
            past_extremum,
            elapsed_since_last_ms: last_event_ms.map(|t| ts.saturating_sub(t)),
            speed_kmh: candidate.speed_kmh,
            variance,
            skewness,
            prominence: candidate.prominence,
        }
    }

    /// The most significant local extremum in a slice of history.
    ///
    /// A point qualifies when all neighbors within the configured
    /// half-width on both sides are strictly less than it (local max) or
    /// strictly greater (local min); candidates are ranked by deviation
    /// from their local neighborhood mean. Insufficient data yields `None`.
    fn significant_extremum(&self, entries: &[(u64, f64)]) -> Option<f64> {
        let nb = self.tuning.extremum_neighborhood;
        if entries.len() < 2 * nb + 1 {
            return None;
        }

        let mut best: Option<(f64, f64)> = None; // (significance, value)
        for i in nb..entries.len() - nb {
            let v = entries[i].1;
            let neighbors = entries[i - nb..i]
                .iter()
                .chain(entries[i + 1..=i + nb].iter());

            let mut all_less = true;
            let mut all_greater = true;
            let mut sum = 0.0;
            let mut count = 0usize;
            for &(_, n) in neighbors {
                all_less &= n < v;
                all_greater &= n > v;
                sum += n;
                count += 1;
            }
            if !all_less && !all_greater {
                continue;
            }

            let neighborhood_mean = sum / count as f64;
            let significance = (v - neighborhood_mean).abs();
            if significance <= STD_EPS {
                continue;
            }
            match best {
                Some((s, _)) if s >= significance => {}
                _ => best = Some((significance, v)),
            }
        }

        best.map(|(_, v)| v)
    }
}

/// Sample variance (n − 1 denominator); `None` below two points.
fn sample_variance(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let m2: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some(m2 / (n - 1) as f64)
}

/// Standardized third-moment skewness with bias correction; `None` below
/// three points, zero for a flat slice.
fn sample_skewness(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let nf = n as f64;
    let mean = values.iter().sum::<f64>() / nf;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (nf - 1.0);
    let std = variance.sqrt();
    if std < STD_EPS {
        return Some(0.0);
    }
    let m3: f64 = values.iter().map(|v| ((v - mean) / std).powi(3)).sum();
    Some(nf / ((nf - 1.0) * (nf - 2.0)) * m3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ProvisionalKind;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(FeatureTuning::default(), 50)
    }

    fn candidate(ts: u64, value: f64, speed: f64) -> Candidate {
        Candidate {
            kind: if value >= 0.0 {
                ProvisionalKind::SpeedBreaker
            } else {
                ProvisionalKind::Pothole
            },
            timestamp_ms: ts,
            value,
            prominence: 1.0,
            speed_kmh: speed,
            latitude: 12.97,
            longitude: 77.59,
        }
    }

    fn history_from(start_ts: u64, step_ms: u64, values: &[f64]) -> BoundedTimeWindow<f64> {
        let mut w = BoundedTimeWindow::new(600_000);
        for (i, &v) in values.iter().enumerate() {
            w.push(start_ts + i as u64 * step_ms, v);
        }
        w
    }

    #[test]
    fn test_adaptive_window_inverse_in_speed() {
        let e = extractor();
        let slow = e.adaptive_window_ms(10.0);
        let fast = e.adaptive_window_ms(30.0);
        assert!(slow > fast, "slow = {}, fast = {}", slow, fast);
        assert_eq!(e.adaptive_window_ms(15.0), 2_000);
    }

    #[test]
    fn test_adaptive_window_bounded() {
        let e = extractor();
        // Near standstill: clamped to the max
        assert_eq!(e.adaptive_window_ms(0.0), FeatureTuning::default().window_max_ms);
        // Absurd speed: clamped to the min
        assert_eq!(e.adaptive_window_ms(500.0), FeatureTuning::default().window_min_ms);
    }

    #[test]
    fn test_future_extremum_found() {
        // Peak at t = 500, then a dip at t = 800 inside the window
        let mut values = vec![0.0; 120];
        values[50] = 5.0;
        values[80] = -4.0;
        let history = history_from(0, 10, &values);
        let c = candidate(500, 5.0, 15.0);

        let features = extractor().extract(&history, &c, None);
        assert_eq!(features.future_extremum, Some(-4.0));
    }

    #[test]
    fn test_past_extremum_found() {
        let mut values = vec![0.0; 120];
        values[20] = -3.5;
        values[50] = 5.0;
        let history = history_from(0, 10, &values);
        let c = candidate(500, 5.0, 15.0);

        let features = extractor().extract(&history, &c, None);
        assert_eq!(features.past_extremum, Some(-3.5));
    }

    #[test]
    fn test_most_significant_extremum_wins() {
        let mut values = vec![0.0; 120];
        values[70] = -1.5;
        values[90] = -4.5;
        let history = history_from(0, 10, &values);
        let c = candidate(500, 5.0, 15.0);

        let features = extractor().extract(&history, &c, None);
        assert_eq!(features.future_extremum, Some(-4.5));
    }

    #[test]
    fn test_insufficient_history_yields_none() {
        let history = history_from(0, 10, &[0.0, 1.0]);
        let c = candidate(10, 1.0, 15.0);
        let features = extractor().extract(&history, &c, None);
        assert_eq!(features.future_extremum, None);
        assert_eq!(features.past_extremum, None);
        assert_eq!(features.skewness, None);
    }

    #[test]
    fn test_flat_window_has_no_extremum() {
        let history = history_from(0, 10, &[1.0; 100]);
        let c = candidate(500, 1.0, 15.0);
        let features = extractor().extract(&history, &c, None);
        assert_eq!(features.future_extremum, None);
        assert_eq!(features.past_extremum, None);
        // Flat slice: defined zero skewness, near-zero variance
        assert_eq!(features.skewness, Some(0.0));
        assert!(features.variance.unwrap() < 1e-12);
    }

    #[test]
    fn test_variance_and_skewness_values() {
        assert!(sample_variance(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0])
            .is_some_and(|v| (v - 4.571).abs() < 0.01));
        assert!(sample_variance(&[1.0]).is_none());
        assert!(sample_skewness(&[1.0, 2.0]).is_none());

        // Right-skewed data has positive skewness
        let skew = sample_skewness(&[1.0, 1.0, 1.0, 2.0, 2.0, 10.0]).unwrap();
        assert!(skew > 1.0, "skew = {}", skew);
    }

    #[test]
    fn test_elapsed_since_last_event() {
        let history = history_from(0, 10, &[0.0; 100]);
        let c = candidate(500, 5.0, 15.0);
        let features = extractor().extract(&history, &c, Some(100));
        assert_eq!(features.elapsed_since_last_ms, Some(400));
    }
}
