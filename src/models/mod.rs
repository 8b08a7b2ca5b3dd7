pub mod ground_truth;
pub mod kill;
pub mod reconciliation;
pub mod session;
pub mod status;

pub use ground_truth::{Anchor, GroundTruthSample, ReadMethod, ReadPurpose};
pub use kill::{KillEvent, KillSource};
pub use reconciliation::{ReconcileVerdict, ReconciliationRecord};
pub use session::{ActiveClock, Session, SessionRecord, StopReason, TrackingMode};
pub use status::{StatusEvent, StatusKind};
