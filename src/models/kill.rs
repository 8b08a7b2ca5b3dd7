use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum KillSource {
    DiffDetected,
    AreaInferred,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KillEvent {
    pub at: Instant,
    pub xp: f64,
    pub source: KillSource,
}

impl KillEvent {
    pub fn new(at: Instant, xp: f64, source: KillSource) -> Self {
        Self {
            at,
            xp: xp.max(0.0),
            source,
        }
    }
}
