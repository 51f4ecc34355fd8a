//! Configuration Module
//!
//! Provides deployment configuration loaded from TOML files, replacing the
//! hand-tuned constants baked into the original detector with operator-tunable
//! values.
//!
//! ## Loading Order
//!
//! 1. `ROADSENSE_CONFIG` environment variable (path to TOML file)
//! 2. `road_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! The config is loaded once and handed to the pipeline constructor — there
//! is no process-wide config state, so two pipelines with different tuning
//! can coexist in one process (and in one test).
//!
//! ```ignore
//! let config = RoadConfig::load();
//! for w in config.validate() {
//!     tracing::warn!(warning = %w, "Config validation");
//! }
//! let pipeline = RoadPipeline::new(config, VehicleClass::Car, MountPlacement::Dashboard);
//! ```

mod road_config;

pub use road_config::*;
