//! Checkerboard calibration of camera pairs and triplets.
//!
//! Pipeline per calibration unit:
//!
//! 1. [`scan_pair`] walks two synchronized recordings, runs the
//!    [`CornerDetector`] and keeps frames where both cameras see the whole
//!    board ([`normalize_detection`] orders and orients the corners).
//! 2. [`calibrate_pair`] subsamples the frames, resolves per-camera
//!    intrinsics ([`IntrinsicsCache`], [`estimate_intrinsics`]) and runs the
//!    staged stereo fit ([`refine_stereo`]).
//! 3. [`RigSolution`] chains the legs of a triplet and re-expresses all
//!    poses relative to the primary camera; [`PendingArtifacts`] writes the
//!    parameter files only after everything succeeded.
//!
//! [`CalibrationOrchestrator`] runs one such worker per unit on a thread
//! pool and reports [`multicam_core::CalibrationEvent`]s.

mod cancel;
mod correspondence;
mod factors;
mod intrinsics;
pub mod lm;
mod orchestrator;
mod pairwise;
mod rig;
mod source;
mod stereo;

pub use cancel::CancellationToken;
pub use correspondence::{
    board_to_corners, canonicalize_orientation, normalize_detection, BoardGrid, CornerDetection,
    NormalizeError,
};
pub use intrinsics::{estimate_intrinsics, initial_intrinsics, IntrinsicsFit};
pub use lm::{SolveError, TermCriteria};
pub use orchestrator::{CalibrationOrchestrator, UnitOutcome};
pub use pairwise::{
    calibrate_pair, sampling_stride, scan_pair, subsample_indices, IntrinsicsCache,
    PairCalibration, PairFrames,
};
pub use rig::{compose_triplet, relative_to_primary, PendingArtifacts, RigSolution};
pub use source::{
    find_recording, pair_directory, CornerDetector, FrameSource, RecordingOpener,
    RECORDING_EXTENSIONS,
};
pub use stereo::{
    refine_stereo, retain_by_error, stereo_calibrate, PairwiseParams, RefinedStereo, StageReport,
    StereoFit,
};

impl From<NormalizeError> for multicam_core::CalibrationError {
    fn from(e: NormalizeError) -> Self {
        multicam_core::CalibrationError::MalformedDetection(e.to_string())
    }
}

impl From<SolveError> for multicam_core::CalibrationError {
    fn from(e: SolveError) -> Self {
        multicam_core::CalibrationError::GeometricDegeneracy(e.to_string())
    }
}
