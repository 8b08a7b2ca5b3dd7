use async_trait::async_trait;
use log::info;

use super::{GroundTruthReader, Reading};
use crate::error::TelemetryError;
use crate::sensing::RoiImage;

/// Cheap primary first; the secondary only answers once the primary reports
/// itself degraded.
pub struct FallbackReader<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> FallbackReader<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl<P: GroundTruthReader, S: GroundTruthReader> GroundTruthReader for FallbackReader<P, S> {
    async fn read(&self, image: &RoiImage) -> Result<Reading, TelemetryError> {
        match self.primary.read(image).await {
            Ok(reading) => Ok(reading),
            Err(err) if self.primary.degraded() => {
                info!("primary reader degraded ({err}), asking secondary");
                self.secondary.read(image).await
            }
            Err(err) => Err(err),
        }
    }

    fn degraded(&self) -> bool {
        self.primary.degraded() && self.secondary.degraded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReadMethod;
    use image::RgbaImage;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures_before_degraded: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl GroundTruthReader for Flaky {
        async fn read(&self, _image: &RoiImage) -> Result<Reading, TelemetryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TelemetryError::GroundTruthReadFailure("blurred".into()))
        }

        fn degraded(&self) -> bool {
            self.calls.load(Ordering::SeqCst) >= self.failures_before_degraded
        }
    }

    struct Fixed(f64);

    #[async_trait]
    impl GroundTruthReader for Fixed {
        async fn read(&self, _image: &RoiImage) -> Result<Reading, TelemetryError> {
            Ok(Reading {
                percent: self.0,
                method: ReadMethod::Vision,
            })
        }
    }

    #[tokio::test]
    async fn secondary_only_after_primary_degrades() {
        let reader = FallbackReader::new(
            Flaky {
                failures_before_degraded: 2,
                calls: AtomicU32::new(0),
            },
            Fixed(33.3),
        );
        let image = RoiImage::new(RgbaImage::new(4, 4));

        assert!(reader.read(&image).await.is_err());
        let reading = reader.read(&image).await.unwrap();
        assert_eq!(reading.percent, 33.3);
        assert_eq!(reading.method, ReadMethod::Vision);
    }
}
