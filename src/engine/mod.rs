//! The inference engine: per-target state, the pure estimators it is built
//! from, and the controller that runs them on a schedule.

pub mod area;
pub mod calibration;
mod controller;
pub mod idle;
pub mod level_up;
pub mod reconcile;
pub mod state;
mod tasks;
pub mod tempo;

pub use calibration::{CalibrationKind, CalibrationPhase, CalibrationRun};
pub use controller::TrackerController;
pub use level_up::LevelProjection;
pub use state::{EngineState, TrackerSnapshot};
pub use tempo::{KillLog, TempoStats};
