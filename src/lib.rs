//! Kill and XP telemetry inferred from a screen region.
//!
//! A cheap change detector counts kill candidates many times a second; a
//! rare ground-truth read of the on-screen percentage calibrates the rate
//! and corrects the count when the two drift apart. [`TrackerController`]
//! owns one tracked target and runs everything on a schedule.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod ground_truth;
pub mod models;
pub mod sensing;
pub mod settings;
mod utils;

pub use config::{ConfigPatch, TrackerConfig};
pub use engine::{TrackerController, TrackerSnapshot};
pub use error::{ErrorCategory, TelemetryError, TelemetryResult};
