//! Expensive, authoritative reads of the on-screen XP percentage.
//!
//! The core only sees [`GroundTruthReader`]; which backend answers is a
//! wiring decision.

pub mod fallback;
pub mod ocr;
pub mod vision;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::TelemetryError;
use crate::models::{ReadMethod, ReadPurpose};
use crate::sensing::RoiImage;

pub use fallback::FallbackReader;
pub use ocr::{reconstruct_reading, OcrReader, TextRecognizer};
pub use vision::{parse_percentage_reply, VisionReader};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub percent: f64,
    pub method: ReadMethod,
}

#[async_trait]
pub trait GroundTruthReader: Send + Sync {
    async fn read(&self, image: &RoiImage) -> Result<Reading, TelemetryError>;

    /// True when the backend has failed often enough that a composite reader
    /// should consult its secondary.
    fn degraded(&self) -> bool {
        false
    }
}

#[async_trait]
impl<T: GroundTruthReader + ?Sized> GroundTruthReader for Arc<T> {
    async fn read(&self, image: &RoiImage) -> Result<Reading, TelemetryError> {
        (**self).read(image).await
    }

    fn degraded(&self) -> bool {
        (**self).degraded()
    }
}

/// Per-purpose guard: a second read for the same purpose is refused while
/// the first is outstanding.
#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashSet<ReadPurpose>>,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_begin(self: &Arc<Self>, purpose: ReadPurpose) -> Option<InFlightTicket> {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !active.insert(purpose) {
            return None;
        }
        Some(InFlightTicket {
            owner: Arc::clone(self),
            purpose,
        })
    }
}

/// Releases its purpose when dropped.
#[derive(Debug)]
pub struct InFlightTicket {
    owner: Arc<InFlight>,
    purpose: ReadPurpose,
}

impl InFlightTicket {
    pub fn purpose(&self) -> ReadPurpose {
        self.purpose
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        let mut active = match self.owner.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(&self.purpose);
    }
}
