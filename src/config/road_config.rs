//! Ride Configuration - All pipeline tuning constants as operator-tunable TOML values
//!
//! The original detector shipped with several mutually inconsistent constant
//! sets across iterations (sampling rate, retention windows, threshold
//! scaling). Every such tuning parameter is a field here with a documented
//! default, so a deployment picks its own set instead of inheriting one
//! hard-coded version. Each struct implements `Default`; a partial TOML file
//! works because every section carries `#[serde(default)]`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from loading a configuration file.
///
/// Only the loader surfaces these; a missing file is not an error (defaults
/// apply), a present-but-broken file is.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a ride / deployment.
///
/// Load with [`RoadConfig::load`] which searches:
/// 1. `$ROADSENSE_CONFIG` env var
/// 2. `./road_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoadConfig {
    /// Sampling-rate assumptions and history retention
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Gravity filter / reorientation tuning
    #[serde(default)]
    pub conditioning: ConditioningConfig,

    /// Location-fix validation and speed fusion
    #[serde(default)]
    pub speed: SpeedConfig,

    /// Adaptive threshold engine tuning
    #[serde(default)]
    pub thresholds: ThresholdTuning,

    /// Phase-1 candidate detection gates
    #[serde(default)]
    pub detector: DetectorTuning,

    /// Phase-2 feature extraction windows
    #[serde(default)]
    pub features: FeatureTuning,

    /// Classifier gate bounds and multipliers
    #[serde(default)]
    pub classifier: ClassifierTuning,

    /// Broken-patch upgrade criteria
    #[serde(default)]
    pub broken_patch: BrokenPatchTuning,
}

impl RoadConfig {
    /// Load configuration using the standard search order:
    /// 1. `$ROADSENSE_CONFIG` environment variable
    /// 2. `./road_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("ROADSENSE_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from ROADSENSE_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from ROADSENSE_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "ROADSENSE_CONFIG points to non-existent file, falling back");
            }
        }

        let local = Path::new("road_config.toml");
        if local.exists() {
            match Self::load_from_file(local) {
                Ok(config) => {
                    info!(path = %local.display(), "Loaded config from working directory");
                    return config;
                }
                Err(e) => {
                    warn!(path = %local.display(), error = %e, "Failed to load local config, using defaults");
                }
            }
        }

        info!("No config file found, using built-in defaults");
        Self::default()
    }

    /// Load and parse a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// Sanity-check the loaded values.
    ///
    /// Returns human-readable warnings for values outside their intended
    /// ranges. Nothing here is fatal — the pipeline clamps internally — but
    /// an operator should know when a config file asks for nonsense.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !(0.5..=1.0).contains(&self.conditioning.gravity_persistence) {
            warnings.push(format!(
                "conditioning.gravity_persistence = {} outside [0.5, 1.0]; gravity tracking will misbehave",
                self.conditioning.gravity_persistence
            ));
        }
        if self.sampling.raw_retention_ms >= self.sampling.vertical_retention_ms {
            warnings.push(format!(
                "sampling.raw_retention_ms ({}) should be shorter than vertical_retention_ms ({})",
                self.sampling.raw_retention_ms, self.sampling.vertical_retention_ms
            ));
        }
        if self.speed.accuracy_ceiling_m <= 0.0 {
            warnings.push("speed.accuracy_ceiling_m must be positive; all fixes will be rejected".to_string());
        }
        if self.thresholds.clamp_low_ratio > self.thresholds.clamp_high_ratio {
            warnings.push(format!(
                "thresholds clamp band [{}, {}] is inverted",
                self.thresholds.clamp_low_ratio, self.thresholds.clamp_high_ratio
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.min_prominence) {
            warnings.push(format!(
                "detector.min_prominence = {} outside [0, 1]",
                self.detector.min_prominence
            ));
        }
        if self.features.window_min_ms > self.features.window_max_ms {
            warnings.push(format!(
                "features window bounds [{}, {}] are inverted",
                self.features.window_min_ms, self.features.window_max_ms
            ));
        }
        if self.classifier.optimal_speed_low_kmh >= self.classifier.optimal_speed_high_kmh {
            warnings.push("classifier optimal speed band is inverted".to_string());
        }
        if self.broken_patch.min_events < 2 {
            warnings.push(format!(
                "broken_patch.min_events = {} makes the alternation test meaningless",
                self.broken_patch.min_events
            ));
        }

        warnings
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Sampling-rate assumptions and in-memory history retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Nominal accelerometer rate in Hz (informational; the pipeline is
    /// driven by caller timestamps, not by this value)
    pub nominal_rate_hz: f64,
    /// Retention of the vertical-acceleration history window, ms
    pub vertical_retention_ms: u64,
    /// Retention of the raw conditioned-reading window (local-peak tests), ms
    pub raw_retention_ms: u64,
    /// Number of trailing vertical samples used for variance/skewness
    pub stats_slice_len: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            nominal_rate_hz: 100.0,
            vertical_retention_ms: 5_000,
            raw_retention_ms: 1_500,
            stats_slice_len: 50,
        }
    }
}

/// Gravity filter and reorientation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditioningConfig {
    /// Exponential smoothing persistence for the gravity estimate
    /// (fraction of the previous estimate kept per sample)
    pub gravity_persistence: f64,
    /// Lower bound on a plausible gravity magnitude, m/s²
    pub gravity_min_mps2: f64,
    /// Upper bound on a plausible gravity magnitude, m/s²
    pub gravity_max_mps2: f64,
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            gravity_persistence: 0.9,
            gravity_min_mps2: 4.0,
            gravity_max_mps2: 16.0,
        }
    }
}

/// Location-fix validation and speed fusion tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedConfig {
    /// Fixes with reported accuracy above this are rejected, m
    pub accuracy_ceiling_m: f64,
    /// Displacement above this between consecutive fixes is an implausible
    /// jump, m
    pub max_fix_jump_m: f64,
    /// Count limit of the speed history used for the smoothed average
    pub history_len: usize,
    /// Upper bound of the plausible vehicle speed range, km/h
    pub max_speed_kmh: f64,
    /// Maximum blend weight given to the acceleration-integration estimate
    /// (reached when fix accuracy hits the ceiling)
    pub integration_weight_max: f64,
    /// Per-observation leak of the integration estimate toward the smoothed
    /// average (bounds drift)
    pub integration_leak: f64,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            accuracy_ceiling_m: 30.0,
            max_fix_jump_m: 1_000.0,
            history_len: 12,
            max_speed_kmh: 180.0,
            integration_weight_max: 0.8,
            integration_leak: 0.98,
        }
    }
}

/// Adaptive threshold engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdTuning {
    /// Speed breakpoint `L`: below this the base threshold applies unscaled,
    /// km/h
    pub speed_breakpoint_kmh: f64,
    /// Linear scaling constant `S`: threshold growth per km/h above the
    /// breakpoint, (m/s²)/(km/h)
    pub speed_scale: f64,
    /// Samples with |vertical| below this feed the ambient-noise estimate,
    /// m/s²
    pub noise_ceiling_mps2: f64,
    /// Reference noise level: estimates at or below this leave thresholds
    /// untouched, m/s²
    pub noise_reference_mps2: f64,
    /// Exponential smoothing persistence of the noise estimate
    pub noise_persistence: f64,
    /// Effective threshold is clamped to at least this multiple of the base
    pub clamp_low_ratio: f64,
    /// Effective threshold is clamped to at most this multiple of the base
    pub clamp_high_ratio: f64,
}

impl Default for ThresholdTuning {
    fn default() -> Self {
        Self {
            speed_breakpoint_kmh: 20.0,
            speed_scale: 0.035,
            noise_ceiling_mps2: 0.8,
            noise_reference_mps2: 0.35,
            noise_persistence: 0.98,
            clamp_low_ratio: 0.5,
            clamp_high_ratio: 3.0,
        }
    }
}

/// Phase-1 candidate detection gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorTuning {
    /// Minimum spacing between emitted events, ms. Readings arriving sooner
    /// after the last emitted event are discarded outright.
    pub min_event_gap_ms: u64,
    /// Minimum peak prominence in [0, 1]
    pub min_prominence: f64,
    /// Local-extremum neighborhood half-width `k`: the candidate must be the
    /// most extreme of `k` neighbors on each side
    pub neighborhood_half_width: usize,
}

impl Default for DetectorTuning {
    fn default() -> Self {
        Self {
            min_event_gap_ms: 2_500,
            min_prominence: 0.6,
            neighborhood_half_width: 3,
        }
    }
}

/// Phase-2 feature extraction windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureTuning {
    /// Adaptive window numerator: window_ms = constant / speed_kmh,
    /// bounded below/above. Faster travel compresses an obstacle's
    /// signature in time, so the search window shrinks with speed.
    pub window_speed_constant: f64,
    /// Lower bound of the adaptive window, ms
    pub window_min_ms: u64,
    /// Upper bound of the adaptive window, ms
    pub window_max_ms: u64,
    /// Neighborhood half-width for the significant-extremum scan
    pub extremum_neighborhood: usize,
}

impl Default for FeatureTuning {
    fn default() -> Self {
        Self {
            window_speed_constant: 30_000.0,
            window_min_ms: 800,
            window_max_ms: 4_000,
            extremum_neighborhood: 2,
        }
    }
}

/// Classifier gate bounds and confidence multipliers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierTuning {
    /// Validity gate: maximum plausible speed for a classification, km/h
    pub max_valid_speed_kmh: f64,
    /// Validity gate: maximum plausible vertical amplitude, m/s²
    /// (above this the sensor is saturating or the phone was dropped)
    pub max_valid_amplitude_mps2: f64,
    /// Confidence assigned to validity-gate rejections
    pub reject_confidence: f64,

    /// Base reliability curve: lower edge of the optimal speed band, km/h
    pub optimal_speed_low_kmh: f64,
    /// Base reliability curve: upper edge of the optimal speed band, km/h
    pub optimal_speed_high_kmh: f64,
    /// Base confidence inside the optimal band
    pub base_confidence_optimal: f64,
    /// Base confidence floor at standstill / very high speed
    pub base_confidence_floor: f64,
    /// Speed at which base confidence has decayed to the floor, km/h
    pub base_confidence_decay_end_kmh: f64,

    /// Signature gate: a counter-swing counts when its magnitude reaches
    /// this fraction of the candidate's value
    pub signature_ratio: f64,
    /// Multiplier when the expected counter-swing is present
    pub signature_boost: f64,
    /// Multiplier when the polarity is reversed (type is flipped)
    pub signature_flip_penalty: f64,
    /// Multiplier when no significant counter-swing exists either way
    pub no_signature_penalty: f64,

    /// Statistical gate: variance below this is suspiciously uniform
    pub variance_floor: f64,
    /// Statistical gate: variance above this is chaotic
    pub variance_ceiling: f64,
    /// Multiplier applied outside the variance band
    pub variance_penalty: f64,
    /// Multiplier when variance could not be computed
    pub missing_stats_penalty: f64,
    /// |skewness| above this is penalized
    pub skewness_limit: f64,
    /// Multiplier for extreme skewness
    pub skewness_penalty: f64,
    /// Prominence at or above this earns the boost
    pub high_prominence: f64,
    /// Multiplier for high prominence
    pub high_prominence_boost: f64,
    /// Prominence below this is penalized
    pub low_prominence: f64,
    /// Multiplier for low prominence
    pub low_prominence_penalty: f64,

    /// Temporal gate: events closer than this multiple of the minimum gap
    /// to their predecessor are suspicious clustering
    pub clustering_close_ratio: f64,
    /// Multiplier for suspiciously close events
    pub clustering_close_penalty: f64,
    /// Events closer than this multiple of the minimum gap get a mild
    /// penalty
    pub clustering_near_ratio: f64,
    /// Multiplier for near events
    pub clustering_near_penalty: f64,
}

impl Default for ClassifierTuning {
    fn default() -> Self {
        Self {
            max_valid_speed_kmh: 120.0,
            max_valid_amplitude_mps2: 25.0,
            reject_confidence: 0.1,

            optimal_speed_low_kmh: 5.0,
            optimal_speed_high_kmh: 25.0,
            base_confidence_optimal: 0.9,
            base_confidence_floor: 0.35,
            base_confidence_decay_end_kmh: 60.0,

            signature_ratio: 0.4,
            signature_boost: 1.3,
            signature_flip_penalty: 0.8,
            no_signature_penalty: 0.95,

            variance_floor: 0.05,
            variance_ceiling: 25.0,
            variance_penalty: 0.75,
            missing_stats_penalty: 0.9,
            // A lone impulse in an otherwise quiet window already skews
            // near 5; only multi-spike chaos lands beyond this.
            skewness_limit: 6.0,
            skewness_penalty: 0.8,
            high_prominence: 0.85,
            high_prominence_boost: 1.15,
            low_prominence: 0.7,
            low_prominence_penalty: 0.85,

            clustering_close_ratio: 2.0,
            clustering_close_penalty: 0.8,
            clustering_near_ratio: 4.0,
            clustering_near_penalty: 0.95,
        }
    }
}

/// Broken-patch upgrade criteria over the trailing event history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokenPatchTuning {
    /// Trailing window inspected for the cluster, ms
    pub window_ms: u64,
    /// Minimum qualifying events in the window
    pub min_events: usize,
    /// Minimum average confidence across the cluster
    pub confidence_floor: f64,
    /// Maximum average speed across the cluster, km/h
    pub speed_ceiling_kmh: f64,
    /// Maximum average pairwise distance across the cluster, m
    pub cluster_radius_m: f64,
}

impl Default for BrokenPatchTuning {
    fn default() -> Self {
        Self {
            window_ms: 20_000,
            min_events: 3,
            confidence_floor: 0.55,
            speed_ceiling_kmh: 25.0,
            cluster_radius_m: 200.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_clean() {
        let config = RoadConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_text = r#"
            [detector]
            min_event_gap_ms = 4000

            [thresholds]
            speed_breakpoint_kmh = 25.0
        "#;
        let config: RoadConfig = toml::from_str(toml_text).unwrap();

        assert_eq!(config.detector.min_event_gap_ms, 4000);
        assert!((config.thresholds.speed_breakpoint_kmh - 25.0).abs() < f64::EPSILON);
        // Untouched sections keep their defaults
        assert_eq!(config.sampling.vertical_retention_ms, 5_000);
        assert!((config.classifier.base_confidence_optimal - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[speed]\naccuracy_ceiling_m = 15.0").unwrap();

        let config = RoadConfig::load_from_file(file.path()).unwrap();
        assert!((config.speed.accuracy_ceiling_m - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_from_file_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml [[[").unwrap();

        let err = RoadConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_flags_bad_values() {
        let mut config = RoadConfig::default();
        config.conditioning.gravity_persistence = 1.5;
        config.detector.min_prominence = 2.0;
        config.features.window_min_ms = 10_000;

        let warnings = config.validate();
        assert_eq!(warnings.len(), 3, "{:?}", warnings);
    }
}
