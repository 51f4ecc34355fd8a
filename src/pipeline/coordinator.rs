//! Pipeline Coordinator - per-sample processing sequence for road-anomaly
//! detection.
//!
//! One [`RoadPipeline`] instance owns every piece of mutable detection state
//! (filter state, history buffers, noise baseline, event log, last-event
//! timer) — there is no process-wide state, so two pipelines can run side by
//! side in one process and every test gets a fresh world.
//!
//! Outputs leave through explicit channels instead of shared mutable fields:
//! a `watch` channel carries the latest conditioned reading, a `broadcast`
//! channel carries emitted events. The core itself is synchronous; the
//! channels are plain sync sends and need no runtime.

use std::sync::RwLock;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::classifier::EventClassifier;
use crate::conditioning::SignalConditioner;
use crate::config::RoadConfig;
use crate::detector::{Candidate, CandidateDetector};
use crate::features::FeatureExtractor;
use crate::history::{BoundedTimeWindow, EventHistory};
use crate::pipeline::PipelineStats;
use crate::speed::SpeedEstimator;
use crate::thresholds::{AdaptiveThresholdEngine, ThresholdSnapshot};
use crate::types::{
    ConditionedReading, LocationFix, MotionSample, MountPlacement, RoadEvent, RoadEventKind,
    VehicleClass,
};

/// Capacity of the event broadcast channel. Slow subscribers lag rather
/// than block the sample path.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Latest speed/position cell shared between the location trigger and the
/// sample path.
///
/// Written once per accepted fix, read once per sample. The lock guards a
/// copy-out of four floats — the critical section is a handful of loads.
#[derive(Debug, Clone, Copy, Default)]
struct Kinematics {
    speed_kmh: f64,
    latitude: f64,
    longitude: f64,
    accuracy_m: f64,
}

/// A Phase-1 candidate waiting for its adaptive window to fill.
#[derive(Debug, Clone, Copy)]
struct PendingCandidate {
    candidate: Candidate,
    /// Classification runs once the vertical history covers this timestamp
    deadline_ms: u64,
}

// ============================================================================
// Road Pipeline
// ============================================================================

/// The road-anomaly detection core.
pub struct RoadPipeline {
    conditioner: SignalConditioner,
    vertical_history: BoundedTimeWindow<f64>,
    raw_history: BoundedTimeWindow<ConditionedReading>,
    speed: SpeedEstimator,
    kinematics: RwLock<Kinematics>,
    thresholds: AdaptiveThresholdEngine,
    detector: CandidateDetector,
    extractor: FeatureExtractor,
    classifier: EventClassifier,
    events: EventHistory,
    pending: Option<PendingCandidate>,
    /// Timestamp of the last *emitted* event (min-gap reference)
    last_event_ms: Option<u64>,
    running: bool,
    stats: PipelineStats,
    event_tx: broadcast::Sender<RoadEvent>,
    reading_tx: watch::Sender<Option<ConditionedReading>>,
    config: RoadConfig,
}

impl RoadPipeline {
    /// Build a pipeline for the given configuration and profile selection.
    pub fn new(config: RoadConfig, vehicle: VehicleClass, mount: MountPlacement) -> Self {
        info!(
            vehicle = %vehicle,
            mount = %mount,
            "Initializing road-anomaly pipeline"
        );

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (reading_tx, _) = watch::channel(None);

        Self {
            conditioner: SignalConditioner::new(config.conditioning.clone()),
            vertical_history: BoundedTimeWindow::new(config.sampling.vertical_retention_ms),
            raw_history: BoundedTimeWindow::new(config.sampling.raw_retention_ms),
            speed: SpeedEstimator::new(config.speed.clone()),
            kinematics: RwLock::new(Kinematics::default()),
            thresholds: AdaptiveThresholdEngine::new(config.thresholds.clone(), vehicle, mount),
            detector: CandidateDetector::new(config.detector.clone()),
            extractor: FeatureExtractor::new(
                config.features.clone(),
                config.sampling.stats_slice_len,
            ),
            classifier: EventClassifier::new(
                config.classifier.clone(),
                config.broken_patch.clone(),
                config.detector.min_event_gap_ms,
            ),
            events: EventHistory::new(),
            pending: None,
            last_event_ms: None,
            running: true,
            stats: PipelineStats::default(),
            event_tx,
            reading_tx,
            config,
        }
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Process one motion sample through the full sequence.
    ///
    /// Returns the scored result when a pending candidate resolves on this
    /// sample — including `Normal` rejections, which are returned for audit
    /// but never stored or broadcast.
    pub fn ingest_motion_sample(&mut self, sample: &MotionSample) -> Option<RoadEvent> {
        if !self.running {
            return None;
        }
        self.stats.samples_received += 1;

        // PHASE 1: conditioning. Non-finite samples are dropped here.
        let Some(axes) = self.conditioner.condition(sample) else {
            self.stats.samples_dropped += 1;
            return None;
        };

        let kin = match self.kinematics.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        let reading = ConditionedReading {
            timestamp_ms: sample.timestamp_ms,
            linear_accel: axes.linear,
            vertical: axes.vertical,
            gyro: sample.gyro.unwrap_or([0.0; 3]),
            speed_kmh: kin.speed_kmh,
            latitude: kin.latitude,
            longitude: kin.longitude,
            accuracy_m: kin.accuracy_m,
        };

        // PHASE 2: history buffers + noise baseline.
        if !self
            .vertical_history
            .push(sample.timestamp_ms, axes.vertical)
        {
            self.stats.samples_dropped += 1;
            return None;
        }
        self.raw_history.push(sample.timestamp_ms, reading);
        self.stats.samples_processed += 1;
        self.reading_tx.send_replace(Some(reading));

        self.thresholds.observe_vertical(axes.vertical);

        let l = axes.linear;
        let horizontal =
            (l[0] * l[0] + l[1] * l[1] + l[2] * l[2] - axes.vertical * axes.vertical)
                .max(0.0)
                .sqrt();
        self.speed.observe_motion(horizontal, sample.timestamp_ms);

        // PHASE 3: resolve a pending candidate once its window is covered.
        // While one is pending, no new candidates are considered.
        if let Some(pending) = self.pending {
            if !self.vertical_history.covers(pending.deadline_ms) {
                return None;
            }
            self.pending = None;
            return Some(self.resolve(pending.candidate));
        }

        // PHASE 4: candidate detection.
        let avg_speed = self.speed.smoothed_kmh();
        let breaker = self.thresholds.speed_breaker_threshold(avg_speed);
        let pothole = self.thresholds.pothole_threshold(avg_speed);
        if let Some(candidate) =
            self.detector
                .evaluate(&self.raw_history, breaker, pothole, self.last_event_ms)
        {
            self.stats.candidates_detected += 1;
            let window = self.extractor.adaptive_window_ms(candidate.speed_kmh);
            self.pending = Some(PendingCandidate {
                candidate,
                deadline_ms: candidate.timestamp_ms + window,
            });
        }

        None
    }

    /// Ingest one location fix; updates internal speed/position state only.
    pub fn ingest_location(&mut self, fix: &LocationFix) {
        if !self.running {
            return;
        }
        match self.speed.ingest_fix(fix) {
            Ok(_) => {
                self.stats.fixes_accepted += 1;
                let speed_kmh = self.speed.smoothed_kmh();
                match self.kinematics.write() {
                    Ok(mut guard) => {
                        *guard = Kinematics {
                            speed_kmh,
                            latitude: fix.latitude,
                            longitude: fix.longitude,
                            accuracy_m: fix.accuracy_m,
                        };
                    }
                    Err(poisoned) => {
                        *poisoned.into_inner() = Kinematics {
                            speed_kmh,
                            latitude: fix.latitude,
                            longitude: fix.longitude,
                            accuracy_m: fix.accuracy_m,
                        };
                    }
                }
            }
            Err(reason) => {
                self.stats.fixes_rejected += 1;
                debug!(error = %reason, "Location fix rejected");
            }
        }
    }

    /// Run Phase 2 (features + classification) for a resolved candidate.
    fn resolve(&mut self, candidate: Candidate) -> RoadEvent {
        let features =
            self.extractor
                .extract(&self.vertical_history, &candidate, self.last_event_ms);
        let event = self
            .classifier
            .classify(&candidate, &features, &self.events);
        self.stats.record_event(&event);

        if event.kind != RoadEventKind::Normal {
            self.events.push(event);
            self.last_event_ms = Some(event.timestamp_ms);
            // Subscribers may come and go; an empty channel is not an error.
            let _ = self.event_tx.send(event);
            info!(
                kind = %event.kind,
                confidence = event.confidence,
                speed_kmh = event.speed_kmh,
                timestamp_ms = event.timestamp_ms,
                "Road event emitted"
            );
        }

        event
    }

    // ========================================================================
    // Control & Introspection
    // ========================================================================

    /// Select the threshold profile for a (vehicle, mount) pair. Callable
    /// before or during a run.
    pub fn configure(&mut self, vehicle: VehicleClass, mount: MountPlacement) {
        self.thresholds.set_profile(vehicle, mount);
    }

    /// Effective (speed-breaker, pothole) thresholds at the current smoothed
    /// speed. The pothole value is negative.
    pub fn current_thresholds(&self) -> (f64, f64) {
        let avg = self.speed.smoothed_kmh();
        (
            self.thresholds.speed_breaker_threshold(avg),
            self.thresholds.pothole_threshold(avg),
        )
    }

    /// Full threshold-engine snapshot for dashboards/diagnostics.
    pub fn threshold_snapshot(&self) -> ThresholdSnapshot {
        self.thresholds.snapshot(self.speed.smoothed_kmh())
    }

    /// Reset the event log, the ambient-noise baseline, the last-event
    /// timer, and any pending candidate. Filter state, sample windows, and
    /// speed state survive so a warm run continues seamlessly.
    pub fn clear_history(&mut self) {
        self.events.clear();
        self.thresholds.reset_noise();
        self.last_event_ms = None;
        self.pending = None;
        info!("Event history and noise baseline cleared");
    }

    /// Full cold reset: everything `clear_history` does plus filter state,
    /// history buffers, speed state, and counters.
    pub fn reset(&mut self) {
        self.conditioner.reset();
        self.vertical_history.clear();
        self.raw_history.clear();
        self.speed = SpeedEstimator::new(self.config.speed.clone());
        match self.kinematics.write() {
            Ok(mut guard) => *guard = Kinematics::default(),
            Err(poisoned) => *poisoned.into_inner() = Kinematics::default(),
        }
        self.stats = PipelineStats::default();
        self.clear_history();
        info!("Pipeline fully reset");
    }

    /// Halt sample intake. Accumulated history and the event log survive so
    /// a later [`start`](Self::start) resumes warm.
    pub fn stop(&mut self) {
        self.running = false;
        info!("Pipeline stopped");
    }

    /// Resume sample intake.
    pub fn start(&mut self) {
        self.running = true;
        info!("Pipeline started");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Subscribe to the emitted-event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RoadEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to the latest-conditioned-reading cell.
    pub fn subscribe_readings(&self) -> watch::Receiver<Option<ConditionedReading>> {
        self.reading_tx.subscribe()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Number of events currently retained in the history log.
    pub fn event_history_len(&self) -> usize {
        self.events.len()
    }
}
