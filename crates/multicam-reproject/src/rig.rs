//! Calibrated camera rig used for triangulation, loaded from the
//! parameter files the calibration pipeline writes.

use std::path::Path;

use multicam_core::{
    extrinsics_file_name, intrinsics_file_name, read_extrinsics, read_intrinsics,
    CameraIntrinsics, Iso3, ParamIoError, Pt2, Pt3, Real,
};
use nalgebra::Matrix3x4;
use thiserror::Error;

use crate::triangulate::triangulate_dlt;

#[derive(Debug, Error)]
pub enum RigError {
    #[error("rig needs at least two cameras, got {0}")]
    TooFewCameras(usize),
    #[error("primary camera index {index} out of range for {len} cameras")]
    Primary { index: usize, len: usize },
    #[error("expected {expected} entries, got {got}")]
    Length { expected: usize, got: usize },
    #[error("camera {0} has an invalid calibration")]
    InvalidCamera(String),
    #[error(transparent)]
    Params(#[from] ParamIoError),
}

/// One camera of the rig: intrinsics and pose relative to the primary.
#[derive(Clone, Debug)]
pub struct RigCamera {
    pub name: String,
    pub intrinsics: CameraIntrinsics,
    /// `X_cam = pose * X_primary`.
    pub pose: Iso3,
    projection: Matrix3x4<Real>,
}

impl RigCamera {
    fn new(name: String, intrinsics: CameraIntrinsics, pose: Iso3) -> Result<Self, RigError> {
        if !intrinsics.is_finite() || intrinsics.k.try_inverse().is_none() {
            return Err(RigError::InvalidCamera(name));
        }
        let projection = pose.to_homogeneous().fixed_view::<3, 4>(0, 0).into_owned();
        Ok(Self {
            name,
            intrinsics,
            pose,
            projection,
        })
    }

    /// `[R | t]`, acting on points in the primary frame and producing
    /// undistorted normalized coordinates.
    pub fn projection(&self) -> &Matrix3x4<Real> {
        &self.projection
    }

    /// Pixel position of a point in the primary frame.
    pub fn project(&self, x: &Pt3) -> Option<Pt2> {
        self.intrinsics.project(&(self.pose * x))
    }
}

/// Cameras in dataset order, all expressed relative to the primary camera.
#[derive(Clone, Debug)]
pub struct CameraRig {
    cameras: Vec<RigCamera>,
    primary: usize,
}

impl CameraRig {
    /// Build from per-camera intrinsics and poses relative to `primary`.
    pub fn new(
        names: &[String],
        intrinsics: Vec<CameraIntrinsics>,
        poses: Vec<Iso3>,
        primary: usize,
    ) -> Result<Self, RigError> {
        if names.len() < 2 {
            return Err(RigError::TooFewCameras(names.len()));
        }
        if primary >= names.len() {
            return Err(RigError::Primary {
                index: primary,
                len: names.len(),
            });
        }
        for got in [intrinsics.len(), poses.len()] {
            if got != names.len() {
                return Err(RigError::Length {
                    expected: names.len(),
                    got,
                });
            }
        }
        let cameras = names
            .iter()
            .zip(intrinsics)
            .zip(poses)
            .map(|((name, k), pose)| RigCamera::new(name.clone(), k, pose))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { cameras, primary })
    }

    /// Load `Intrinsics_<camera>.json` for every camera and
    /// `Extrinsics_<primary>_<camera>.json` for every other camera.
    pub fn load(
        intrinsics_dir: impl AsRef<Path>,
        extrinsics_dir: impl AsRef<Path>,
        names: &[String],
        primary: usize,
    ) -> Result<Self, RigError> {
        let primary_name = names.get(primary).ok_or(RigError::Primary {
            index: primary,
            len: names.len(),
        })?;
        let mut intrinsics = Vec::with_capacity(names.len());
        let mut poses = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            intrinsics.push(read_intrinsics(
                intrinsics_dir.as_ref().join(intrinsics_file_name(name)),
            )?);
            if i == primary {
                poses.push(Iso3::identity());
                continue;
            }
            let path = extrinsics_dir
                .as_ref()
                .join(extrinsics_file_name(primary_name, name));
            let pose = read_extrinsics(&path)?
                .isometry()
                .ok_or_else(|| RigError::InvalidCamera(name.clone()))?;
            poses.push(pose);
        }
        log::info!(
            "loaded rig of {} cameras, primary {primary_name}",
            names.len()
        );
        Self::new(names, intrinsics, poses, primary)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn primary(&self) -> usize {
        self.primary
    }

    pub fn cameras(&self) -> &[RigCamera] {
        &self.cameras
    }

    pub fn camera(&self, index: usize) -> Option<&RigCamera> {
        self.cameras.get(index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cameras.iter().map(|c| c.name.as_str())
    }

    /// Triangulate from `(camera, pixel)` observations.
    ///
    /// Pixels are undistorted first, so the DLT runs on `[R | t]`.
    pub fn triangulate(&self, observations: &[(usize, Pt2)]) -> Option<Pt3> {
        let mut projections = Vec::with_capacity(observations.len());
        let mut points = Vec::with_capacity(observations.len());
        for (camera, pixel) in observations {
            let cam = self.cameras.get(*camera)?;
            let n = cam.intrinsics.normalize(pixel)?;
            projections.push(cam.projection);
            points.push(Pt2::new(n.x, n.y));
        }
        triangulate_dlt(&projections, &points)
    }

    /// Pixel position of `x` in every camera; `None` behind a camera.
    pub fn project_all(&self, x: &Pt3) -> Vec<Option<Pt2>> {
        self.cameras.iter().map(|c| c.project(x)).collect()
    }
}
