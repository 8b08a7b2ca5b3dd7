//! Local OCR backend.
//!
//! The character engine itself sits behind [`TextRecognizer`]. This module
//! prepares the capture, asks the engine for text, and turns whatever digits
//! come back into an `XX.XXXX` reading.

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use image::{imageops, imageops::FilterType, GrayImage, Luma};

use super::{GroundTruthReader, Reading};
use crate::error::TelemetryError;
use crate::models::ReadMethod;
use crate::sensing::RoiImage;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const UPSCALE: u32 = 4;
const BINARIZE_THRESHOLD: u8 = 180;
const DEFAULT_FALLBACK_THRESHOLD: u32 = 3;

/// Fixed character slots of an `XX.XXXX%` reading, as fractions of width.
const CHAR_SLOTS: [(f32, f32, bool); 8] = [
    (0.0, 0.125, true),
    (0.125, 0.25, true),
    (0.25, 0.35, false),
    (0.35, 0.475, true),
    (0.475, 0.6, true),
    (0.6, 0.725, true),
    (0.725, 0.85, true),
    (0.85, 1.0, false),
];

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize a single line restricted to `0-9 . %`.
    async fn recognize_line(&self, png: &[u8]) -> Result<String>;

    /// Recognize a single character; `digit` narrows the whitelist to `0-9`.
    async fn recognize_char(&self, png: &[u8], digit: bool) -> Result<Option<char>>;
}

pub struct OcrReader<R> {
    recognizer: R,
    segmented: bool,
    fallback_threshold: u32,
    consecutive_failures: AtomicU32,
}

impl<R: TextRecognizer> OcrReader<R> {
    pub fn new(recognizer: R) -> Self {
        Self {
            recognizer,
            segmented: false,
            fallback_threshold: DEFAULT_FALLBACK_THRESHOLD,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn segmented(mut self, enabled: bool) -> Self {
        self.segmented = enabled;
        self
    }

    pub fn with_fallback_threshold(mut self, threshold: u32) -> Self {
        self.fallback_threshold = threshold.max(1);
        self
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    async fn read_segments(&self, prepared: &GrayImage) -> Result<Option<f64>> {
        let (width, height) = prepared.dimensions();
        let mut chars = Vec::with_capacity(CHAR_SLOTS.len());

        for (start, end, digit) in CHAR_SLOTS {
            let x0 = (width as f32 * start) as u32;
            let x1 = ((width as f32 * end) as u32).min(width);
            let slice = imageops::crop_imm(prepared, x0, 0, x1.saturating_sub(x0).max(1), height)
                .to_image();
            let ch = self
                .recognizer
                .recognize_char(&encode_png(&slice)?, digit)
                .await?;
            chars.push(ch.unwrap_or('?'));
        }

        let text: String = chars[0..2]
            .iter()
            .chain(std::iter::once(&'.'))
            .chain(chars[3..7].iter())
            .collect();
        log_debug!("segmented OCR result: {text}");

        Ok(text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && (0.0..=100.0).contains(v)))
    }

    async fn read_line(&self, prepared: &GrayImage) -> Result<Option<f64>> {
        let text = self.recognizer.recognize_line(&encode_png(prepared)?).await?;
        log_debug!("OCR raw text: {:?}", text.trim());
        Ok(reconstruct_reading(&text))
    }

    async fn attempt(&self, image: &RoiImage) -> Result<Option<Reading>> {
        let prepared = prepare(image);

        if self.segmented {
            if let Some(percent) = self.read_segments(&prepared).await? {
                return Ok(Some(Reading {
                    percent,
                    method: ReadMethod::OcrSegmented,
                }));
            }
        }

        Ok(self.read_line(&prepared).await?.map(|percent| Reading {
            percent,
            method: ReadMethod::Ocr,
        }))
    }
}

#[async_trait]
impl<R: TextRecognizer> GroundTruthReader for OcrReader<R> {
    async fn read(&self, image: &RoiImage) -> Result<Reading, TelemetryError> {
        match self.attempt(image).await {
            Ok(Some(reading)) => {
                self.reset_failures();
                Ok(reading)
            }
            Ok(None) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                log_warn!("OCR parse failed ({failures} consecutive)");
                Err(TelemetryError::GroundTruthReadFailure(
                    "no XP reading in OCR text".into(),
                ))
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                log_warn!("OCR engine failed ({failures} consecutive): {err:#}");
                Err(TelemetryError::GroundTruthReadFailure(format!(
                    "OCR engine failed: {err}"
                )))
            }
        }
    }

    fn degraded(&self) -> bool {
        self.consecutive_failures() >= self.fallback_threshold
    }
}

/// Grayscale, upscale, binarize.
fn prepare(image: &RoiImage) -> GrayImage {
    let gray = imageops::grayscale(&image.image);
    let (w, h) = gray.dimensions();
    let mut scaled = imageops::resize(&gray, w * UPSCALE, h * UPSCALE, FilterType::Triangle);
    for pixel in scaled.pixels_mut() {
        let Luma([v]) = *pixel;
        *pixel = Luma([if v >= BINARIZE_THRESHOLD { 255 } else { 0 }]);
    }
    scaled
}

fn encode_png(image: &GrayImage) -> Result<Vec<u8>> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image.write_to(&mut buf, image::ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Rebuild an `XX.XXXX` reading from OCR text, tolerating a decimal point
/// that was misread as one or two digits.
pub fn reconstruct_reading(text: &str) -> Option<f64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    let n = digits.len();

    let compose = |int_part: &str, dec_part: &str| -> Option<f64> {
        format!("{int_part}.{dec_part}")
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && (0.0..=100.0).contains(v))
    };

    match n {
        0..=4 => None,
        5 => compose(&digits[0..1], &digits[1..5]),
        6 => compose(&digits[0..2], &digits[2..6]),
        7 => compose(&digits[0..2], &digits[3..7]).or_else(|| compose(&digits[0..1], &digits[2..6])),
        8 => compose(&digits[0..2], &digits[4..8]).or_else(|| compose(&digits[0..1], &digits[3..7])),
        _ => compose(&digits[0..2], &digits[n - 4..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::sync::Mutex;

    #[test]
    fn reconstructs_by_digit_count() {
        assert_eq!(reconstruct_reading("5.0000%"), Some(5.0));
        assert_eq!(reconstruct_reading("65.4321%"), Some(65.4321));
        // decimal point read as a single digit
        assert_eq!(reconstruct_reading("6514321"), Some(65.4321));
        // decimal point read as "31"
        assert_eq!(reconstruct_reading("65314321"), Some(65.4321));
        assert_eq!(reconstruct_reading("1234"), None);
        assert_eq!(reconstruct_reading(""), None);
    }

    #[test]
    fn seven_digits_prefer_two_digit_integer() {
        // 99 + garbage + 9999 is in range
        assert_eq!(reconstruct_reading("9919999"), Some(99.9999));
    }

    struct ScriptedEngine {
        lines: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextRecognizer for ScriptedEngine {
        async fn recognize_line(&self, _png: &[u8]) -> Result<String> {
            Ok(self.lines.lock().unwrap().pop().unwrap_or_default())
        }

        async fn recognize_char(&self, _png: &[u8], _digit: bool) -> Result<Option<char>> {
            Ok(None)
        }
    }

    fn capture() -> RoiImage {
        RoiImage::new(RgbaImage::from_pixel(40, 8, Rgba([255, 255, 255, 255])))
    }

    #[tokio::test]
    async fn failures_accumulate_until_a_read_succeeds() {
        let engine = ScriptedEngine {
            lines: Mutex::new(vec![
                "42.1000%".into(),
                "??".into(),
                "".into(),
                "x".into(),
            ]),
        };
        let reader = OcrReader::new(engine).with_fallback_threshold(3);

        for _ in 0..3 {
            assert!(reader.read(&capture()).await.is_err());
        }
        assert!(reader.degraded());

        let reading = reader.read(&capture()).await.unwrap();
        assert_eq!(reading.percent, 42.1);
        assert_eq!(reading.method, ReadMethod::Ocr);
        assert!(!reader.degraded());
    }

    #[tokio::test]
    async fn segmented_miss_falls_back_to_line() {
        let engine = ScriptedEngine {
            lines: Mutex::new(vec!["12.5000%".into()]),
        };
        let reader = OcrReader::new(engine).segmented(true);
        let reading = reader.read(&capture()).await.unwrap();
        assert_eq!(reading.percent, 12.5);
        assert_eq!(reading.method, ReadMethod::Ocr);
    }
}
