//! Capabilities the calibration pipeline consumes: decoded recordings and a
//! checkerboard corner detector.

use std::path::{Path, PathBuf};

use multicam_core::{CalibrationError, GrayImage, GrayImageView};

use crate::CornerDetection;

/// Accepted recording extensions, tried in this order.
pub const RECORDING_EXTENSIONS: [&str; 8] =
    ["avi", "mp4", "mov", "wmv", "AVI", "MP4", "MOV", "WMV"];

/// Sequential grayscale frame reader over one recording.
pub trait FrameSource: Send {
    /// Total number of frames.
    fn frame_count(&self) -> usize;
    /// Nominal frames per second.
    fn frame_rate(&self) -> f64;
    /// Index of the frame the next [`FrameSource::read`] returns.
    fn position(&self) -> usize;
    /// Move the read cursor. Seeking past the end makes `read` return `None`.
    fn seek(&mut self, frame: usize);
    /// Next frame, or `None` at the end of the recording or on decode failure.
    fn read(&mut self) -> Option<GrayImage>;
}

/// Opens recordings by path.
pub trait RecordingOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, CalibrationError>;
}

/// Checkerboard corner detector.
///
/// May return several boards; only the first is used.
pub trait CornerDetector: Send + Sync {
    fn detect(&self, image: &GrayImageView<'_>) -> CornerDetection;
}

/// Directory holding the recordings of pair `first-second`.
pub fn pair_directory(recordings: &Path, first: &str, second: &str) -> PathBuf {
    recordings.join(format!("{first}-{second}"))
}

/// Locate `<dir>/<camera>.<ext>` for the first accepted extension present.
pub fn find_recording(dir: &Path, camera: &str) -> Result<PathBuf, CalibrationError> {
    RECORDING_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{camera}.{ext}")))
        .find(|p| p.is_file())
        .ok_or_else(|| {
            CalibrationError::Configuration(format!(
                "no recording for camera {camera} in {} (tried {})",
                dir.display(),
                RECORDING_EXTENSIONS.join(", ")
            ))
        })
}
