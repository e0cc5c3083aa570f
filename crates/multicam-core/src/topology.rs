use serde::{Deserialize, Serialize};

use crate::CalibrationError;

/// One calibration unit: an ordered pair `A-B` or triplet `A-B-C` of cameras.
///
/// In a triplet the middle camera is the pivot: legs `A-B` and `B-C` are
/// calibrated independently and chained. `primary` selects the camera the
/// written extrinsics are expressed relative to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraTopology {
    cameras: Vec<String>,
    primary: usize,
}

impl CameraTopology {
    pub fn new(cameras: Vec<String>, primary: usize) -> Result<Self, CalibrationError> {
        if !(2..=3).contains(&cameras.len()) {
            return Err(CalibrationError::Configuration(format!(
                "a calibration unit has 2 or 3 cameras, got {}",
                cameras.len()
            )));
        }
        if primary >= cameras.len() {
            return Err(CalibrationError::Configuration(format!(
                "primary index {primary} out of range for {} cameras",
                cameras.len()
            )));
        }
        for (i, a) in cameras.iter().enumerate() {
            if a.is_empty() || cameras[i + 1..].contains(a) {
                return Err(CalibrationError::Configuration(format!(
                    "camera names must be unique and non-empty: {cameras:?}"
                )));
            }
        }
        Ok(Self { cameras, primary })
    }

    /// Pair with the first camera as primary.
    pub fn pair(a: &str, b: &str) -> Result<Self, CalibrationError> {
        Self::new(vec![a.to_string(), b.to_string()], 0)
    }

    /// Triplet `a-b-c` with pivot `b` and `a` as primary.
    pub fn triplet(a: &str, b: &str, c: &str) -> Result<Self, CalibrationError> {
        Self::new(vec![a.to_string(), b.to_string(), c.to_string()], 0)
    }

    pub fn cameras(&self) -> &[String] {
        &self.cameras
    }

    pub fn primary(&self) -> usize {
        self.primary
    }

    pub fn primary_name(&self) -> &str {
        &self.cameras[self.primary]
    }

    pub fn is_triplet(&self) -> bool {
        self.cameras.len() == 3
    }

    /// Consecutive camera pairs, each recorded in its own directory.
    pub fn legs(&self) -> Vec<(&str, &str)> {
        self.cameras
            .windows(2)
            .map(|w| (w[0].as_str(), w[1].as_str()))
            .collect()
    }

    /// `A-B` or `A-B-C`.
    pub fn label(&self) -> String {
        self.cameras.join("-")
    }
}
