//! Ride data ingestion from CSV files, plus a synthetic ride generator.
//!
//! Expected CSV format (one interleaved stream, sorted by timestamp):
//!
//! ```text
//! timestamp,kind,a,b,c,d,e,f
//! 1705564800000,motion,0.02,-0.11,9.79,0.001,0.002,-0.001
//! 1705564800200,location,12.9716,77.5946,4.5,4.2
//! ```
//!
//! - `motion` rows: ax, ay, az (m/s²) and optionally gx, gy, gz (rad/s)
//! - `location` rows: latitude, longitude, accuracy (m) and optionally
//!   reported speed (m/s)
//!
//! Timestamps are epoch milliseconds or RFC 3339.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::types::{LocationFix, MotionSample};

/// One replayable record from a recorded or synthetic ride.
#[derive(Debug, Clone, Copy)]
pub enum RideRecord {
    Motion(MotionSample),
    Location(LocationFix),
}

impl RideRecord {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            RideRecord::Motion(s) => s.timestamp_ms,
            RideRecord::Location(f) => f.timestamp_ms,
        }
    }
}

/// Read a ride from a CSV file.
///
/// Malformed lines are skipped with a warning, matching the rest of the
/// core's absorb-don't-fail posture toward bad sensor data.
pub fn read_ride_csv(path: &str) -> Vec<RideRecord> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %path, error = %e, "Failed to open ride CSV");
            return Vec::new();
        }
    };

    let reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut line_num = 0;

    for line_result in reader.lines() {
        line_num += 1;

        let line = match line_result {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(line = line_num, error = %e, "Error reading CSV line");
                continue;
            }
        };

        // Skip header line
        if line_num == 1 && line.starts_with("timestamp") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse_ride_line(&line, line_num) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(line = line_num, error = %e, "Error parsing CSV line");
                continue;
            }
        }
    }

    tracing::info!(count = records.len(), path = %path, "Loaded ride records from CSV");
    records
}

/// Parse a single CSV line into a RideRecord.
fn parse_ride_line(line: &str, line_num: usize) -> Result<RideRecord, String> {
    let fields: Vec<&str> = line.split(',').collect();

    if fields.len() < 5 {
        return Err(format!(
            "Expected at least 5 fields, got {} on line {}",
            fields.len(),
            line_num
        ));
    }

    let timestamp_ms = parse_timestamp_ms(fields[0])?;
    let kind = fields[1].trim();

    match kind {
        "motion" => {
            let accel = [
                parse_f64(fields[2], "ax")?,
                parse_f64(fields[3], "ay")?,
                parse_f64(fields[4], "az")?,
            ];
            let gyro = if fields.len() >= 8 {
                Some([
                    parse_f64(fields[5], "gx")?,
                    parse_f64(fields[6], "gy")?,
                    parse_f64(fields[7], "gz")?,
                ])
            } else {
                None
            };
            Ok(RideRecord::Motion(MotionSample {
                timestamp_ms,
                accel,
                gyro,
                mag: None,
            }))
        }
        "location" => {
            let latitude = parse_f64(fields[2], "latitude")?;
            let longitude = parse_f64(fields[3], "longitude")?;
            let accuracy_m = parse_f64(fields[4], "accuracy")?;
            let speed_mps = if fields.len() >= 6 && !fields[5].trim().is_empty() {
                Some(parse_f64(fields[5], "speed")?)
            } else {
                None
            };
            Ok(RideRecord::Location(LocationFix {
                timestamp_ms,
                latitude,
                longitude,
                accuracy_m,
                speed_mps,
            }))
        }
        other => Err(format!("Unknown record kind '{}' on line {}", other, line_num)),
    }
}

/// Parse epoch milliseconds or RFC 3339 into milliseconds.
fn parse_timestamp_ms(s: &str) -> Result<u64, String> {
    let s = s.trim();

    if let Ok(ms) = s.parse::<u64>() {
        return Ok(ms);
    }

    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis().max(0) as u64)
        .map_err(|e| format!("Cannot parse timestamp '{}': {}", s, e))
}

/// Parse a string to f64 with field name for error messages.
fn parse_f64(s: &str, field: &str) -> Result<f64, String> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| format!("Cannot parse {} as f64: '{}'", field, s))
}

// ============================================================================
// Synthetic Ride Generation
// ============================================================================

/// Half-sine impulse shape over `len` samples, peak at the middle.
fn impulse(amplitude: f64, len: usize, i: usize) -> f64 {
    amplitude * (std::f64::consts::PI * (i as f64 + 0.5) / len as f64).sin()
}

/// Generate a deterministic synthetic city ride.
///
/// 100 Hz accelerometer, 1 Hz location fixes at ~15 km/h, with:
/// - a speed breaker at t = 20 s (up-swing, then landing dip)
/// - a pothole at t = 45 s (drop, then recovery bump)
/// - a broken patch from t = 70 s: alternating bumps and dips 3.5 s apart
///
/// The seed fixes the sensor-noise stream so replays are reproducible.
pub fn generate_synthetic_ride(seed: u64) -> Vec<RideRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    // Low-amplitude engine/road texture on every axis
    let noise = match Normal::new(0.0_f64, 0.12) {
        Ok(n) => n,
        Err(_) => return Vec::new(),
    };

    let duration_ms: u64 = 120_000;
    let step_ms: u64 = 10;
    let speed_mps = 15.0 / 3.6;
    // Degrees of latitude per millisecond at ~15 km/h
    let dlat_per_ms = speed_mps / 111_320.0 / 1_000.0;
    let base_lat = 12.9716;
    let base_lon = 77.5946;

    // (start_ms, amplitude, counter_amplitude): positive = breaker,
    // negative = pothole; the counter-swing follows 350 ms later.
    let mut obstacles: Vec<(u64, f64, f64)> = vec![
        (20_000, 6.0, -5.0),
        (45_000, -6.0, 5.0),
    ];
    // Broken patch: alternating lone swings without clean counter-swings
    for (i, start) in (70_000..84_000u64).step_by(3_500).enumerate() {
        let amplitude = if i % 2 == 0 { 5.5 } else { -5.5 };
        obstacles.push((start, amplitude, 0.0));
    }

    let impulse_len = 8usize; // 80 ms contact
    let counter_delay_ms = 350u64;

    let mut records = Vec::with_capacity((duration_ms / step_ms) as usize + 150);

    for ts in (0..duration_ms).step_by(step_ms as usize) {
        if ts % 1_000 == 0 {
            records.push(RideRecord::Location(LocationFix {
                timestamp_ms: ts.max(1),
                latitude: base_lat + dlat_per_ms * ts as f64,
                longitude: base_lon,
                accuracy_m: 4.0 + noise.sample(&mut rng).abs(),
                speed_mps: Some(speed_mps + noise.sample(&mut rng) * 0.2),
            }));
        }

        let mut vertical = 0.0;
        for &(start, amplitude, counter) in &obstacles {
            let in_shape = |shape_start: u64| -> Option<usize> {
                let end = shape_start + impulse_len as u64 * step_ms;
                (ts >= shape_start && ts < end)
                    .then(|| ((ts - shape_start) / step_ms) as usize)
            };
            if let Some(i) = in_shape(start) {
                vertical += impulse(amplitude, impulse_len, i);
            }
            if counter != 0.0 {
                if let Some(i) = in_shape(start + counter_delay_ms) {
                    vertical += impulse(counter, impulse_len, i);
                }
            }
        }

        records.push(RideRecord::Motion(MotionSample {
            timestamp_ms: ts,
            accel: [
                noise.sample(&mut rng),
                noise.sample(&mut rng),
                9.81 + vertical + noise.sample(&mut rng),
            ],
            gyro: Some([
                noise.sample(&mut rng) * 0.05,
                noise.sample(&mut rng) * 0.05,
                noise.sample(&mut rng) * 0.05,
            ]),
            mag: None,
        }));
    }

    tracing::debug!(count = records.len(), "Generated synthetic ride records");
    records
}
