//! Cross-view propagation of keypoint annotations on a calibrated rig.
//!
//! A [`Dataset`] holds one [`Keypoint`] per (capture, camera, entity,
//! bodypart). The [`ReprojectionEngine`] triangulates every bodypart seen
//! in at least `min_views` annotated views with a linear multi-view DLT
//! ([`triangulate_dlt`]), reprojects it into the remaining cameras as
//! `Reprojected` keypoints and tracks per-bodypart reprojection errors and
//! per-bone length deviations ([`EntityErrors`]).
//!
//! Camera parameters come from the files written by `multicam-calib`
//! ([`CameraRig::load`]).

mod dataset;
mod engine;
mod keypoint;
mod rig;
mod triangulate;

pub use dataset::{Capture, Dataset, DatasetError, SkeletonEdge};
pub use engine::{
    EntityErrors, EntityReport, ErrorReport, ReprojectionEngine, ReprojectionEvent,
    DEFAULT_MIN_VIEWS,
};
pub use keypoint::{Keypoint, KeypointKey, KeypointState};
pub use rig::{CameraRig, RigCamera, RigError};
pub use triangulate::triangulate_dlt;
