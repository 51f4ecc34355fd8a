//! Pipeline Regression Tests
//!
//! Exercises the full pipeline end to end with deterministic, explicitly
//! timestamped rides. Covers the core behavioural guarantees: threshold
//! monotonicity, confidence bounds, minimum event spacing, the up/down
//! signature round-trip, the broken-patch upgrade and its negative control,
//! speed-outlier rejection, and clear-then-replay reproducibility.

use roadsense::sensors::{generate_synthetic_ride, RideRecord};
use roadsense::{
    LocationFix, MotionSample, MountPlacement, RoadConfig, RoadEvent, RoadEventKind, RoadPipeline,
    VehicleClass,
};

fn pipeline() -> RoadPipeline {
    RoadPipeline::new(
        RoadConfig::default(),
        VehicleClass::Car,
        MountPlacement::Dashboard,
    )
}

/// Drive one section of a ride: 100 Hz flat-road accelerometer samples with
/// `vertical_at(offset_ms)` added to the z axis, and a location fix every
/// second at `lat_at(offset_ms)` with the given reported speed.
///
/// Returns every scored result the pipeline produced during the section.
fn run_section(
    p: &mut RoadPipeline,
    start_ms: u64,
    duration_ms: u64,
    vertical_at: impl Fn(u64) -> f64,
    lat_at: impl Fn(u64) -> f64,
    speed_kmh: f64,
) -> Vec<RoadEvent> {
    let mut out = Vec::new();
    for off in (0..duration_ms).step_by(10) {
        let ts = start_ms + off;
        if off % 1_000 == 0 {
            p.ingest_location(&LocationFix {
                timestamp_ms: ts.max(1),
                latitude: lat_at(off),
                longitude: 77.5946,
                accuracy_m: 5.0,
                speed_mps: Some(speed_kmh / 3.6),
            });
        }
        let sample = MotionSample::new(ts, [0.0, 0.0, 9.81 + vertical_at(off)]);
        if let Some(event) = p.ingest_motion_sample(&sample) {
            out.push(event);
        }
    }
    out
}

/// Triangular 50 ms impulse of the given amplitude starting at `start` ms.
fn swing(amplitude: f64, start: u64, off: u64) -> f64 {
    const SHAPE: [f64; 5] = [0.25, 0.58, 1.0, 0.58, 0.25];
    if off >= start && off < start + 50 {
        amplitude * SHAPE[((off - start) / 10) as usize]
    } else {
        0.0
    }
}

const STILL: f64 = 12.9716;

// ============================================================================
// Threshold monotonicity
// ============================================================================

#[test]
fn thresholds_grow_with_average_speed() {
    let mut p = pipeline();
    let (breaker_base, pothole_base) = p.current_thresholds();
    assert!((breaker_base - 1.8).abs() < 1e-9);
    assert!((pothole_base + 2.4).abs() < 1e-9);

    // Slow city crawl: still below the breakpoint
    run_section(&mut p, 0, 5_000, |_| 0.0, |_| STILL, 15.0);
    let (breaker_slow, _) = p.current_thresholds();
    assert!((breaker_slow - breaker_base).abs() < 1e-9);

    // Fast arterial: well above the breakpoint
    run_section(&mut p, 5_000, 12_000, |_| 0.0, |_| STILL, 40.0);
    let (breaker_fast, pothole_fast) = p.current_thresholds();
    assert!(
        breaker_fast > breaker_slow,
        "fast {} should exceed slow {}",
        breaker_fast,
        breaker_slow
    );
    assert!(pothole_fast < pothole_base, "pothole threshold must deepen");
}

// ============================================================================
// Signature round-trip
// ============================================================================

#[test]
fn up_then_down_classifies_speed_breaker() {
    let mut p = pipeline();
    run_section(&mut p, 0, 5_000, |_| 0.0, |_| STILL, 15.0);

    let events = run_section(
        &mut p,
        5_000,
        5_000,
        |off| swing(6.0, 200, off) + swing(-5.0, 550, off),
        |_| STILL,
        15.0,
    );

    assert_eq!(events.len(), 1, "exactly one scored result expected");
    let event = &events[0];
    assert_eq!(event.kind, RoadEventKind::SpeedBreaker);
    assert!(
        event.confidence > 0.5,
        "confidence = {}",
        event.confidence
    );
    assert!(event.features.future_extremum.is_some_and(|v| v < -2.0));
}

#[test]
fn down_then_up_classifies_pothole() {
    let mut p = pipeline();
    run_section(&mut p, 0, 5_000, |_| 0.0, |_| STILL, 15.0);

    let events = run_section(
        &mut p,
        5_000,
        5_000,
        |off| swing(-6.0, 200, off) + swing(5.0, 550, off),
        |_| STILL,
        15.0,
    );

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.kind, RoadEventKind::Pothole);
    assert!(event.confidence > 0.5, "confidence = {}", event.confidence);
    assert!(event.features.future_extremum.is_some_and(|v| v > 2.0));
}

// ============================================================================
// Minimum spacing
// ============================================================================

#[test]
fn events_respect_minimum_spacing() {
    let mut p = pipeline();
    run_section(&mut p, 0, 5_000, |_| 0.0, |_| STILL, 15.0);

    // Three bumps: the second lands 1 s after the first (inside the pending
    // window) and must vanish; the third is 3 s later and may emit.
    let events = run_section(
        &mut p,
        5_000,
        7_000,
        |off| swing(6.0, 200, off) + swing(6.0, 1_200, off) + swing(6.0, 3_200, off),
        |_| STILL,
        15.0,
    );

    let emitted: Vec<&RoadEvent> = events
        .iter()
        .filter(|e| e.kind != RoadEventKind::Normal)
        .collect();
    assert_eq!(emitted.len(), 2, "middle bump must be suppressed");

    let gap = RoadConfig::default().detector.min_event_gap_ms;
    for pair in emitted.windows(2) {
        let spacing = pair[1].timestamp_ms - pair[0].timestamp_ms;
        assert!(
            spacing >= gap,
            "events {} ms apart, minimum is {}",
            spacing,
            gap
        );
    }
}

// ============================================================================
// Broken-patch upgrade
// ============================================================================

/// Four alternating swings 3.5 s apart over a stationary stretch.
fn alternating_ride(p: &mut RoadPipeline, lat_at: impl Fn(u64) -> f64) -> Vec<RoadEvent> {
    run_section(p, 0, 5_000, |_| 0.0, &lat_at, 15.0);
    run_section(
        p,
        5_000,
        18_000,
        |off| {
            swing(6.0, 200, off)
                + swing(-6.0, 3_700, off)
                + swing(6.0, 7_200, off)
                + swing(-6.0, 10_700, off)
        },
        |off| lat_at(5_000 + off),
        15.0,
    )
}

#[test]
fn clustered_alternating_events_upgrade_to_broken_patch() {
    let mut p = pipeline();
    let events = alternating_ride(&mut p, |_| STILL);

    let kinds: Vec<RoadEventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            RoadEventKind::SpeedBreaker,
            RoadEventKind::Pothole,
            RoadEventKind::SpeedBreaker,
            RoadEventKind::BrokenPatch,
        ],
        "4th event must upgrade once three alternating events cluster"
    );
}

#[test]
fn spread_out_events_do_not_upgrade() {
    let mut p = pipeline();
    // Same ride, but covering ground fast enough that consecutive events
    // sit kilometers apart (fixes advance ~570 m/s, each hop under the
    // jump-rejection limit).
    let events = alternating_ride(&mut p, |total_off| STILL + total_off as f64 * 5.13e-6);

    assert_eq!(events.len(), 4);
    for event in &events {
        assert_ne!(
            event.kind,
            RoadEventKind::BrokenPatch,
            "spatially spread events must not upgrade"
        );
    }
}

// ============================================================================
// Speed-outlier rejection
// ============================================================================

#[test]
fn speed_glitch_barely_moves_average() {
    let mut p = pipeline();
    run_section(&mut p, 0, 12_000, |_| 0.0, |_| STILL, 20.0);
    let steady = p.threshold_snapshot();

    // One wild 500 km/h fix
    p.ingest_location(&LocationFix {
        timestamp_ms: 12_500,
        latitude: STILL,
        longitude: 77.5946,
        accuracy_m: 5.0,
        speed_mps: Some(500.0 / 3.6),
    });
    let glitched = p.threshold_snapshot();

    assert!(
        (glitched.speed_breaker_threshold - steady.speed_breaker_threshold).abs() < 0.1,
        "glitch moved threshold from {} to {}",
        steady.speed_breaker_threshold,
        glitched.speed_breaker_threshold
    );
}

// ============================================================================
// Confidence bounds + full synthetic ride
// ============================================================================

#[test]
fn synthetic_ride_end_to_end() {
    let mut p = pipeline();
    let mut rx = p.subscribe_events();

    let mut scored = Vec::new();
    for record in generate_synthetic_ride(7) {
        match record {
            RideRecord::Motion(sample) => {
                if let Some(event) = p.ingest_motion_sample(&sample) {
                    scored.push(event);
                }
            }
            RideRecord::Location(fix) => p.ingest_location(&fix),
        }
    }

    let emitted: Vec<&RoadEvent> = scored
        .iter()
        .filter(|e| e.kind != RoadEventKind::Normal)
        .collect();
    assert!(
        emitted.len() >= 5,
        "expected the planted obstacles to emit, got {}",
        emitted.len()
    );

    // Confidence bound holds for every scored result, emitted or not
    for event in &scored {
        assert!(
            (0.0..=1.0).contains(&event.confidence),
            "confidence {} out of bounds",
            event.confidence
        );
    }

    // Minimum spacing holds across the whole ride
    let gap = RoadConfig::default().detector.min_event_gap_ms;
    for pair in emitted.windows(2) {
        assert!(pair[1].timestamp_ms - pair[0].timestamp_ms >= gap);
    }

    // The planted mix is all present
    let has = |kind: RoadEventKind| emitted.iter().any(|e| e.kind == kind);
    assert!(has(RoadEventKind::SpeedBreaker), "no speed breaker found");
    assert!(has(RoadEventKind::Pothole), "no pothole found");
    assert!(has(RoadEventKind::BrokenPatch), "no broken patch found");

    // The broadcast channel carries exactly the emitted events
    let mut channel_count = 0;
    while rx.try_recv().is_ok() {
        channel_count += 1;
    }
    assert_eq!(channel_count, emitted.len());
    assert_eq!(p.stats().events_emitted as usize, emitted.len());
}

// ============================================================================
// Clear-then-replay reproducibility
// ============================================================================

#[test]
fn clear_history_then_replay_reproduces_events() {
    let shape = |off: u64| swing(6.0, 200, off) + swing(-5.0, 550, off);

    let mut p = pipeline();
    run_section(&mut p, 0, 3_000, |_| 0.0, |_| STILL, 15.0);
    let first = run_section(&mut p, 3_000, 5_000, shape, |_| STILL, 15.0);
    assert_eq!(first.len(), 1);

    p.clear_history();

    // Identical section, shifted 5 s later on the clock
    let second = run_section(&mut p, 8_000, 5_000, shape, |_| STILL, 15.0);
    assert_eq!(second.len(), first.len());

    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.kind, b.kind);
        assert_eq!(b.timestamp_ms - a.timestamp_ms, 5_000);
        assert!(
            (a.confidence - b.confidence).abs() < 1e-6,
            "confidence drifted: {} vs {}",
            a.confidence,
            b.confidence
        );
    }
}

// ============================================================================
// Warm stop/start
// ============================================================================

#[test]
fn stop_preserves_history_for_warm_restart() {
    let mut p = pipeline();
    run_section(&mut p, 0, 5_000, |_| 0.0, |_| STILL, 15.0);
    let events = run_section(
        &mut p,
        5_000,
        5_000,
        |off| swing(6.0, 200, off),
        |_| STILL,
        15.0,
    );
    assert_eq!(events.len(), 1);
    assert_eq!(p.event_history_len(), 1);

    p.stop();
    // Intake is halted: nothing moves
    let while_stopped = run_section(
        &mut p,
        10_000,
        3_000,
        |off| swing(6.0, 200, off),
        |_| STILL,
        15.0,
    );
    assert!(while_stopped.is_empty());
    assert_eq!(p.event_history_len(), 1);

    p.start();
    let after = run_section(
        &mut p,
        13_000,
        5_000,
        |off| swing(6.0, 200, off),
        |_| STILL,
        15.0,
    );
    assert_eq!(after.len(), 1);
    assert_eq!(p.event_history_len(), 2);
}
