pub mod detector;
pub mod frame;

pub use detector::{ChangeDetector, DetectorVerdict};
pub use frame::{
    downscale_luma, DirectoryFrameSource, FrameSource, LumaFrame, RoiImage, REDUCED_HEIGHT,
    REDUCED_WIDTH,
};
