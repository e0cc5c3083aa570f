//! Reprojection residuals of the nonlinear refinements.
//!
//! Factors are generic over the scalar type so `tiny-solver` can
//! differentiate them. Poses are `[rx, ry, rz, tx, ty, tz]` with an
//! axis-angle rotation, matching [`multicam_core::pose_to_params`].

use multicam_core::{CameraIntrinsics, Pt2, Pt3};
use tiny_solver::factors::na;
use tiny_solver::factors::Factor;

/// Depth below which a point is clamped before the perspective division.
const MIN_DEPTH: f64 = 1e-9;
/// Squared rotation angle below which the first-order rotation is used.
const SMALL_ANGLE_SQ: f64 = 1e-16;

#[inline]
fn lit<T: na::RealField>(v: f64) -> T {
    na::convert(v)
}

/// Rotate `p` by the axis-angle vector `w`.
fn rotate<T: na::RealField>(w: &na::Vector3<T>, p: &na::Vector3<T>) -> na::Vector3<T> {
    let theta_sq = w.norm_squared();
    if theta_sq <= lit(SMALL_ANGLE_SQ) {
        return p + w.cross(p);
    }
    let theta = theta_sq.sqrt();
    let k = w / theta.clone();
    let (sin, cos) = (theta.clone().sin(), theta.cos());
    let along = k.dot(p) * (T::one() - cos.clone());
    p * cos + k.cross(p) * sin + k * along
}

/// Apply the pose stored in `params` to `p`.
fn transform<T: na::RealField>(params: &na::DVector<T>, p: &na::Vector3<T>) -> na::Vector3<T> {
    let w = na::Vector3::new(params[0].clone(), params[1].clone(), params[2].clone());
    let t = na::Vector3::new(params[3].clone(), params[4].clone(), params[5].clone());
    rotate(&w, p) + t
}

fn point<T: na::RealField>(p: &[f64; 3]) -> na::Vector3<T> {
    na::Vector3::new(lit(p[0]), lit(p[1]), lit(p[2]))
}

/// Pinhole with Brown-Conrady distortion in a scalar type `T`.
struct Lens<T> {
    fx: T,
    fy: T,
    skew: T,
    cx: T,
    cy: T,
    /// `[k1, k2, p1, p2, k3]`
    dist: [T; 5],
}

impl<T: na::RealField> Lens<T> {
    /// `[fx, fy, cx, cy, k1, k2]`, the refined block of the intrinsics fit.
    fn radial(params: &na::DVector<T>) -> Self {
        Self {
            fx: params[0].clone(),
            fy: params[1].clone(),
            skew: T::zero(),
            cx: params[2].clone(),
            cy: params[3].clone(),
            dist: [
                params[4].clone(),
                params[5].clone(),
                T::zero(),
                T::zero(),
                T::zero(),
            ],
        }
    }

    fn project(&self, pc: &na::Vector3<T>) -> (T, T) {
        let z = if pc.z.clone().abs() < lit(MIN_DEPTH) {
            lit(MIN_DEPTH)
        } else {
            pc.z.clone()
        };
        let x = pc.x.clone() / z.clone();
        let y = pc.y.clone() / z;
        let [k1, k2, p1, p2, k3] = self.dist.clone();
        let two: T = lit(2.0);
        let r2 = x.clone() * x.clone() + y.clone() * y.clone();
        let radial = T::one() + r2.clone() * (k1 + r2.clone() * (k2 + r2.clone() * k3));
        let xy = x.clone() * y.clone();
        let dx = two.clone() * p1.clone() * xy.clone()
            + p2.clone() * (r2.clone() + two.clone() * x.clone() * x.clone());
        let dy = p1 * (r2 + two.clone() * y.clone() * y.clone()) + two * p2 * xy;
        let xd = x * radial.clone() + dx;
        let yd = y * radial + dy;
        (
            self.fx.clone() * xd.clone() + self.skew.clone() * yd.clone() + self.cx.clone(),
            self.fy.clone() * yd + self.cy.clone(),
        )
    }
}

/// Intrinsics held constant during a refinement.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FixedLens {
    fx: f64,
    fy: f64,
    skew: f64,
    cx: f64,
    cy: f64,
    dist: [f64; 5],
}

impl FixedLens {
    pub(crate) fn new(cam: &CameraIntrinsics) -> Self {
        Self {
            fx: cam.k[(0, 0)],
            fy: cam.k[(1, 1)],
            skew: cam.k[(0, 1)],
            cx: cam.k[(0, 2)],
            cy: cam.k[(1, 2)],
            dist: cam.distortion.coefficients(),
        }
    }

    fn lens<T: na::RealField>(&self) -> Lens<T> {
        Lens {
            fx: lit(self.fx),
            fy: lit(self.fy),
            skew: lit(self.skew),
            cx: lit(self.cx),
            cy: lit(self.cy),
            dist: self.dist.map(lit::<T>),
        }
    }
}

/// One board corner seen by the camera being calibrated.
///
/// Variables: `[camera (fx, fy, cx, cy, k1, k2), board pose]`.
#[derive(Debug, Clone)]
pub(crate) struct BoardPointFactor {
    board: [f64; 3],
    observed: [f64; 2],
}

impl BoardPointFactor {
    pub(crate) fn new(board: &Pt3, observed: &Pt2) -> Self {
        Self {
            board: [board.x, board.y, board.z],
            observed: [observed.x, observed.y],
        }
    }
}

impl<T: na::RealField> Factor<T> for BoardPointFactor {
    fn residual_func(&self, params: &[na::DVector<T>]) -> na::DVector<T> {
        let lens = Lens::radial(&params[0]);
        let (u, v) = lens.project(&transform(&params[1], &point(&self.board)));
        na::DVector::from_vec(vec![u - lit(self.observed[0]), v - lit(self.observed[1])])
    }
}

/// One board corner seen by both cameras of a pair with fixed intrinsics.
///
/// Variables: `[second-from-first pose, board pose in the first camera]`.
/// Residuals: first camera `(u, v)`, then second camera `(u, v)`.
#[derive(Debug, Clone)]
pub(crate) struct StereoPointFactor {
    board: [f64; 3],
    first: [f64; 2],
    second: [f64; 2],
    cam1: FixedLens,
    cam2: FixedLens,
}

impl StereoPointFactor {
    pub(crate) fn new(
        board: &Pt3,
        first: &Pt2,
        second: &Pt2,
        cam1: FixedLens,
        cam2: FixedLens,
    ) -> Self {
        Self {
            board: [board.x, board.y, board.z],
            first: [first.x, first.y],
            second: [second.x, second.y],
            cam1,
            cam2,
        }
    }
}

impl<T: na::RealField> Factor<T> for StereoPointFactor {
    fn residual_func(&self, params: &[na::DVector<T>]) -> na::DVector<T> {
        let in_first = transform(&params[1], &point(&self.board));
        let in_second = transform(&params[0], &in_first);
        let (u1, v1) = self.cam1.lens::<T>().project(&in_first);
        let (u2, v2) = self.cam2.lens::<T>().project(&in_second);
        na::DVector::from_vec(vec![
            u1 - lit(self.first[0]),
            v1 - lit(self.first[1]),
            u2 - lit(self.second[0]),
            v2 - lit(self.second[1]),
        ])
    }
}
