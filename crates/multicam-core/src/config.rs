use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{CalibrationError, Pt3, EXTRINSICS_DIR, INTRINSICS_DIR};

fn default_worker_threads() -> usize {
    4
}

/// Settings of one calibration run. Immutable while the run is in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Directory holding calibration sets.
    pub calibration_set_path: PathBuf,
    /// Name of this set; outputs go to `<calibration_set_path>/<name>/`.
    pub calibration_set_name: String,
    /// Directory with one `<A>-<B>` subdirectory per camera pair.
    pub recordings_path: PathBuf,
    /// Interior corners per board row.
    pub pattern_width: usize,
    /// Interior corners per board column.
    pub pattern_height: usize,
    /// Square side length in world units (typically millimetres).
    pub pattern_side_length: f64,
    /// Upper bound on how many frames per second of recording are examined.
    pub max_sampling_frame_rate: u32,
    /// Number of correspondence frames used for calibration.
    pub frames_for_extrinsics: usize,
    /// Minimum number of valid correspondence frames; defaults to
    /// `frames_for_extrinsics`.
    #[serde(default)]
    pub min_frames_for_extrinsics: Option<usize>,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CalibrationConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        let fail = |msg: &str| Err(CalibrationError::Configuration(msg.to_string()));
        if self.pattern_width < 2 || self.pattern_height < 2 {
            return fail("checkerboard pattern needs at least 2x2 interior corners");
        }
        if !(self.pattern_side_length.is_finite() && self.pattern_side_length > 0.0) {
            return fail("pattern side length must be positive");
        }
        if self.max_sampling_frame_rate == 0 {
            return fail("max sampling frame rate must be positive");
        }
        if self.frames_for_extrinsics == 0 {
            return fail("frames for extrinsics must be positive");
        }
        if self.min_frames() == 0 {
            return fail("minimum frames for extrinsics must be positive");
        }
        if self.worker_threads == 0 {
            return fail("worker thread count must be positive");
        }
        if self.calibration_set_name.is_empty() {
            return fail("calibration set name is empty");
        }
        Ok(())
    }

    pub fn min_frames(&self) -> usize {
        self.min_frames_for_extrinsics
            .unwrap_or(self.frames_for_extrinsics)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.calibration_set_path.join(&self.calibration_set_name)
    }

    pub fn intrinsics_dir(&self) -> PathBuf {
        self.output_dir().join(INTRINSICS_DIR)
    }

    pub fn extrinsics_dir(&self) -> PathBuf {
        self.output_dir().join(EXTRINSICS_DIR)
    }

    pub fn pattern_len(&self) -> usize {
        self.pattern_width * self.pattern_height
    }

    /// Interior board corners on `Z = 0`, row-major, origin at corner 0.
    pub fn board_points(&self) -> Vec<Pt3> {
        let s = self.pattern_side_length;
        (0..self.pattern_height)
            .flat_map(|i| {
                (0..self.pattern_width).map(move |j| Pt3::new(j as f64 * s, i as f64 * s, 0.0))
            })
            .collect()
    }
}
