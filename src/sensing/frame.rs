use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{ImageFormat, RgbaImage};

use crate::error::TelemetryError;

pub const REDUCED_WIDTH: u32 = 96;
pub const REDUCED_HEIGHT: u32 = 22;

/// Capture of the tracked screen region.
#[derive(Debug, Clone)]
pub struct RoiImage {
    pub image: RgbaImage,
}

impl RoiImage {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn from_png(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .context("failed to decode region capture")?;
        Ok(Self::new(img.to_rgba8()))
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buf, ImageFormat::Png)
            .context("failed to encode region capture")?;
        Ok(buf.into_inner())
    }

    pub fn reduce(&self) -> LumaFrame {
        downscale_luma(&self.image, REDUCED_WIDTH, REDUCED_HEIGHT)
    }
}

/// Fixed-size grayscale reduction the change detector compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl LumaFrame {
    pub fn same_shape(&self, other: &LumaFrame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Mean absolute luma difference normalized to [0, 1].
    pub fn normalized_diff(&self, other: &LumaFrame) -> f64 {
        if self.pixels.is_empty() || !self.same_shape(other) {
            return 0.0;
        }
        let total: u64 = self
            .pixels
            .iter()
            .zip(&other.pixels)
            .map(|(a, b)| a.abs_diff(*b) as u64)
            .sum();
        total as f64 / (self.pixels.len() as f64 * 255.0)
    }
}

/// Nearest-centre sampling to `width`x`height` with Rec.601 luma weights.
pub fn downscale_luma(src: &RgbaImage, width: u32, height: u32) -> LumaFrame {
    let (src_w, src_h) = src.dimensions();
    let mut pixels = Vec::with_capacity((width * height) as usize);

    if src_w == 0 || src_h == 0 {
        pixels.resize((width * height) as usize, 0);
        return LumaFrame {
            width,
            height,
            pixels,
        };
    }

    let sx = src_w as f64 / width as f64;
    let sy = src_h as f64 / height as f64;

    for y in 0..height {
        let iy = (((y as f64 + 0.5) * sy) as u32).min(src_h - 1);
        for x in 0..width {
            let ix = (((x as f64 + 0.5) * sx) as u32).min(src_w - 1);
            let [r, g, b, _] = src.get_pixel(ix, iy).0;
            let luma = r as f64 * 0.299 + g as f64 * 0.587 + b as f64 * 0.114;
            pixels.push(luma as u8);
        }
    }

    LumaFrame {
        width,
        height,
        pixels,
    }
}

/// On-demand capture of the tracked region.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self) -> Result<RoiImage, TelemetryError>;
}

/// Replays PNG captures from a directory in file-name order. Reports
/// `FrameUnavailable` once the directory is exhausted.
pub struct DirectoryFrameSource {
    frames: Vec<PathBuf>,
    cursor: AtomicUsize,
}

impl DirectoryFrameSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut frames = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("failed to list frames in {}", dir.display()))?
        {
            let path = entry?.path();
            let is_png = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("png"))
                .unwrap_or(false);
            if is_png {
                frames.push(path);
            }
        }
        frames.sort();
        Ok(Self {
            frames,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[async_trait]
impl FrameSource for DirectoryFrameSource {
    async fn capture(&self) -> Result<RoiImage, TelemetryError> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let Some(path) = self.frames.get(index).cloned() else {
            return Err(TelemetryError::FrameUnavailable(
                "frame directory exhausted".into(),
            ));
        };

        tokio::task::spawn_blocking(move || image::open(&path).map(|img| img.to_rgba8()))
            .await
            .map_err(|err| TelemetryError::FrameUnavailable(format!("capture worker failed: {err}")))?
            .map(RoiImage::new)
            .map_err(|err| TelemetryError::FrameUnavailable(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]))
    }

    #[test]
    fn reduction_has_fixed_shape() {
        let frame = downscale_luma(&solid(220, 40, [255, 255, 255]), 96, 22);
        assert_eq!(frame.pixels.len(), 96 * 22);
        assert!(frame.pixels.iter().all(|&p| p == 254 || p == 255));
    }

    #[test]
    fn luma_uses_rec601_weights() {
        let frame = downscale_luma(&solid(4, 4, [100, 0, 0]), 2, 2);
        assert_eq!(frame.pixels[0], 29);
        let frame = downscale_luma(&solid(4, 4, [0, 100, 0]), 2, 2);
        assert_eq!(frame.pixels[0], 58);
    }

    #[test]
    fn black_to_white_is_full_difference() {
        let black = downscale_luma(&solid(96, 22, [0, 0, 0]), 96, 22);
        let white = LumaFrame {
            width: 96,
            height: 22,
            pixels: vec![255; 96 * 22],
        };
        assert!((black.normalized_diff(&white) - 1.0).abs() < 1e-12);
        assert_eq!(black.normalized_diff(&black), 0.0);
    }

    #[test]
    fn png_round_trip_preserves_pixels() {
        let roi = RoiImage::new(solid(8, 3, [10, 20, 30]));
        let decoded = RoiImage::from_png(&roi.to_png().unwrap()).unwrap();
        assert_eq!(decoded.image, roi.image);
    }

    #[tokio::test]
    async fn directory_source_replays_in_order_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        solid(4, 4, [0, 0, 0]).save(dir.path().join("002.png")).unwrap();
        solid(4, 4, [255, 255, 255]).save(dir.path().join("001.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let source = DirectoryFrameSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let first = source.capture().await.unwrap();
        assert_eq!(first.image.get_pixel(0, 0).0[0], 255);
        let second = source.capture().await.unwrap();
        assert_eq!(second.image.get_pixel(0, 0).0[0], 0);
        assert!(matches!(
            source.capture().await,
            Err(TelemetryError::FrameUnavailable(_))
        ));
    }
}
