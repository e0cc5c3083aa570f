//! Rigid poses, their 6-vector parameterization and epipolar matrices.

use crate::{CameraIntrinsics, Iso3, Real};
use nalgebra::{Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Relative pose of a camera with respect to the primary camera, plus the
/// epipolar matrices of that pair.
///
/// `X_cam = r * X_primary + t`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    pub r: Matrix3<Real>,
    pub t: Vector3<Real>,
    pub e: Matrix3<Real>,
    pub f: Matrix3<Real>,
}

impl Extrinsics {
    /// Identity pose with zero epipolar matrices.
    pub fn identity() -> Self {
        Self {
            r: Matrix3::identity(),
            t: Vector3::zeros(),
            e: Matrix3::zeros(),
            f: Matrix3::zeros(),
        }
    }

    /// Build from a pose and recompute `E`/`F` with the given intrinsics
    /// (`first` for the primary camera, `second` for this one).
    pub fn from_pose(
        pose: &Iso3,
        first: &CameraIntrinsics,
        second: &CameraIntrinsics,
    ) -> Option<Self> {
        let r = pose.rotation.to_rotation_matrix().into_inner();
        let t = pose.translation.vector;
        let e = essential_from_pose(&r, &t);
        let f = fundamental_from_essential(&e, &first.k, &second.k)?;
        Some(Self { r, t, e, f })
    }

    pub fn isometry(&self) -> Option<Iso3> {
        let rot = project_to_rotation(&self.r)?;
        Some(Iso3::from_parts(
            Translation3::from(self.t),
            UnitQuaternion::from_rotation_matrix(&rot),
        ))
    }

    pub fn is_finite(&self) -> bool {
        self.r.iter().all(|v| v.is_finite())
            && self.t.iter().all(|v| v.is_finite())
            && self.e.iter().all(|v| v.is_finite())
            && self.f.iter().all(|v| v.is_finite())
    }
}

/// Cross-product matrix: `skew(v) * w == v.cross(&w)`.
#[inline]
pub fn skew(v: &Vector3<Real>) -> Matrix3<Real> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// `E = [t]x R`.
pub fn essential_from_pose(r: &Matrix3<Real>, t: &Vector3<Real>) -> Matrix3<Real> {
    skew(t) * r
}

/// `F = K2^-T E K1^-1`, scaled so that `F[(2, 2)] == 1` when that entry is
/// usable, otherwise to unit Frobenius norm.
pub fn fundamental_from_essential(
    e: &Matrix3<Real>,
    k1: &Matrix3<Real>,
    k2: &Matrix3<Real>,
) -> Option<Matrix3<Real>> {
    let k1_inv = k1.try_inverse()?;
    let k2_inv = k2.try_inverse()?;
    let f = k2_inv.transpose() * e * k1_inv;
    let s = f[(2, 2)];
    if s.abs() > 1e-12 {
        return Some(f / s);
    }
    let n = f.norm();
    if n > 1e-12 {
        Some(f / n)
    } else {
        Some(f)
    }
}

/// Closest rotation to `m` in the Frobenius sense (polar decomposition).
pub fn project_to_rotation(m: &Matrix3<Real>) -> Option<Rotation3<Real>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }
    Some(Rotation3::from_matrix_unchecked(r))
}

/// `[rx, ry, rz, tx, ty, tz]` with the rotation as an axis-angle vector.
pub fn pose_to_params(pose: &Iso3) -> [Real; 6] {
    let w = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    [w.x, w.y, w.z, t.x, t.y, t.z]
}

/// Inverse of [`pose_to_params`].
pub fn pose_from_params(p: &[Real]) -> Iso3 {
    let w = Vector3::new(p[0], p[1], p[2]);
    Iso3::from_parts(
        Translation3::new(p[3], p[4], p[5]),
        UnitQuaternion::from_scaled_axis(w),
    )
}

/// Pose of a planar board (`Z = 0`) in the camera frame from a
/// board-to-image homography and the camera matrix.
pub fn planar_pose_from_homography(k: &Matrix3<Real>, h: &Matrix3<Real>) -> Option<Iso3> {
    let k_inv = k.try_inverse()?;
    let kh1 = k_inv * h.column(0);
    let kh2 = k_inv * h.column(1);
    let kh3 = k_inv * h.column(2);

    let norm1 = kh1.norm();
    let norm2 = kh2.norm();
    if norm1 <= 1e-12 || norm2 <= 1e-12 {
        return None;
    }
    let lambda = 2.0 / (norm1 + norm2);

    let mut r1 = kh1 * lambda;
    let mut r2 = kh2 * lambda;
    let mut t = kh3 * lambda;
    // board must sit in front of the camera
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return None;
    }

    let rot = project_to_rotation(&Matrix3::from_columns(&[r1, r2, r3]))?;
    Some(Iso3::from_parts(
        Translation3::from(t),
        UnitQuaternion::from_rotation_matrix(&rot),
    ))
}
