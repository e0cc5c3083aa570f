use std::path::PathBuf;

use thiserror::Error;

/// Failures reading or writing camera parameter files.
#[derive(Debug, Error)]
pub enum ParamIoError {
    #[error("parameter file {0} does not exist")]
    MissingFile(PathBuf),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed parameter file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("field {name} has shape {got:?}, expected {expected:?}")]
    Shape {
        name: &'static str,
        expected: (usize, usize),
        got: (usize, usize),
    },
}

/// Outcome of a failed calibration unit (pair or triplet).
///
/// A failure of one unit never affects the others.
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// Missing or malformed input: recordings, parameter files, settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "Found {found} valid checkerboard pairs for cameras {cameras}. Make sure your \
         checkerboard parameters are set correctly or specify a lower number of frames \
         to use (at least {required} required)."
    )]
    InsufficientData {
        cameras: String,
        found: usize,
        required: usize,
    },

    /// Board index grid inconsistent with the detected corner list.
    #[error("malformed detection: {0}")]
    MalformedDetection(String),

    #[error("calibration cancelled")]
    Cancelled,

    /// A fit did not converge or produced non-finite parameters.
    #[error("geometric degeneracy: {0}")]
    GeometricDegeneracy(String),
}

impl From<ParamIoError> for CalibrationError {
    fn from(e: ParamIoError) -> Self {
        CalibrationError::Configuration(e.to_string())
    }
}
