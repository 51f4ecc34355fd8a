//! RoadSense replay harness.
//!
//! Drives a recorded or synthetic ride through the detection pipeline and
//! logs every emitted event.
//!
//! # Usage
//!
//! ```bash
//! # Replay a recorded ride CSV
//! cargo run --release -- --csv ride.csv
//!
//! # Run the built-in synthetic ride
//! cargo run --release -- --synthetic
//!
//! # Pick a threshold profile
//! cargo run --release -- --synthetic --vehicle motorcycle --mount pocket
//! ```
//!
//! # Environment Variables
//!
//! - `ROADSENSE_CONFIG`: path to a TOML config file
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use roadsense::sensors::{generate_synthetic_ride, read_ride_csv, RideRecord};
use roadsense::{MountPlacement, RoadConfig, RoadPipeline, VehicleClass};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "roadsense")]
#[command(about = "Road-surface anomaly detection replay harness")]
#[command(version)]
struct CliArgs {
    /// Replay a recorded ride CSV (interleaved motion/location rows)
    #[arg(long)]
    csv: Option<String>,

    /// Run the built-in synthetic ride instead of a recording
    #[arg(long)]
    synthetic: bool,

    /// Seed for the synthetic ride's noise stream
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Vehicle class: car, motorcycle, or bus
    #[arg(long, default_value = "car")]
    vehicle: String,

    /// Mount placement: dashboard, pocket, or seat
    #[arg(long, default_value = "dashboard")]
    mount: String,

    /// Print emitted events as JSON lines instead of log records
    #[arg(long)]
    json: bool,
}

fn parse_vehicle(s: &str) -> Result<VehicleClass> {
    match s.to_ascii_lowercase().as_str() {
        "car" => Ok(VehicleClass::Car),
        "motorcycle" | "bike" => Ok(VehicleClass::Motorcycle),
        "bus" => Ok(VehicleClass::Bus),
        other => bail!("unknown vehicle class '{other}' (expected car, motorcycle, or bus)"),
    }
}

fn parse_mount(s: &str) -> Result<MountPlacement> {
    match s.to_ascii_lowercase().as_str() {
        "dashboard" => Ok(MountPlacement::Dashboard),
        "pocket" => Ok(MountPlacement::Pocket),
        "seat" => Ok(MountPlacement::Seat),
        other => bail!("unknown mount placement '{other}' (expected dashboard, pocket, or seat)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let vehicle = parse_vehicle(&args.vehicle)?;
    let mount = parse_mount(&args.mount)?;

    let config = RoadConfig::load();
    for warning in config.validate() {
        warn!(warning = %warning, "Config validation");
    }

    let records = if let Some(path) = &args.csv {
        let records = read_ride_csv(path);
        if records.is_empty() {
            bail!("No usable records in {path}");
        }
        records
    } else if args.synthetic {
        generate_synthetic_ride(args.seed)
    } else {
        bail!("Nothing to replay: pass --csv <path> or --synthetic");
    };

    info!(
        records = records.len(),
        vehicle = %vehicle,
        mount = %mount,
        "Starting replay"
    );

    let mut pipeline = RoadPipeline::new(config, vehicle, mount);
    let mut event_rx = pipeline.subscribe_events();

    // Drain emitted events concurrently with the replay loop.
    let json_output = args.json;
    let printer = tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    if json_output {
                        match serde_json::to_string(&event) {
                            Ok(line) => println!("{line}"),
                            Err(e) => warn!(error = %e, "Failed to serialize event"),
                        }
                    } else {
                        info!(
                            kind = %event.kind,
                            lat = event.latitude,
                            lon = event.longitude,
                            confidence = event.confidence,
                            speed_kmh = event.speed_kmh,
                            "EVENT"
                        );
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let cancel = CancellationToken::new();
    let cancel_on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_on_ctrl_c.cancel();
        }
    });

    for record in &records {
        if cancel.is_cancelled() {
            warn!("Replay interrupted");
            break;
        }
        match record {
            RideRecord::Motion(sample) => {
                pipeline.ingest_motion_sample(sample);
            }
            RideRecord::Location(fix) => {
                pipeline.ingest_location(fix);
            }
        }
    }

    pipeline.stop();
    let stats = pipeline.stats();
    info!(
        samples = stats.samples_processed,
        dropped = stats.samples_dropped,
        fixes_accepted = stats.fixes_accepted,
        fixes_rejected = stats.fixes_rejected,
        candidates = stats.candidates_detected,
        events = stats.events_emitted,
        speed_breakers = stats.speed_breakers,
        potholes = stats.potholes,
        broken_patches = stats.broken_patches,
        "Replay complete"
    );

    // The event channel closes when the pipeline (its sender) drops.
    drop(pipeline);
    printer
        .await
        .context("Event printer task failed")?;

    Ok(())
}
