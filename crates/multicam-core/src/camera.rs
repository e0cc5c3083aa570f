//! Pinhole camera with Brown-Conrady lens distortion.
//!
//! Coefficient order follows the common `[k1, k2, p1, p2, k3]` convention.

use crate::{Pt2, Pt3};
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

const UNDISTORT_MAX_ITERS: usize = 50;

/// Radial (`k1`, `k2`, `k3`) and tangential (`p1`, `p2`) distortion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// Radial-only model with `k3 = 0`.
    pub fn radial(k1: f64, k2: f64) -> Self {
        Self {
            k1,
            k2,
            ..Self::default()
        }
    }

    /// Parse `[k1, k2, p1, p2, k3, ...]`. Missing trailing terms are zero,
    /// terms beyond `k3` are ignored; fewer than four values is rejected.
    pub fn from_coefficients(coeffs: &[f64]) -> Option<Self> {
        if coeffs.len() < 4 || coeffs.iter().any(|c| !c.is_finite()) {
            return None;
        }
        Some(Self {
            k1: coeffs[0],
            k2: coeffs[1],
            p1: coeffs[2],
            p2: coeffs[3],
            k3: coeffs.get(4).copied().unwrap_or(0.0),
        })
    }

    pub fn coefficients(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Apply distortion to an undistorted normalized point.
    #[inline]
    pub fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vector2::new(x * radial + dx, y * radial + dy)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, nd: Vector2<f64>) -> Vector2<f64> {
        let mut x = nd.x;
        let mut y = nd.y;
        for _ in 0..UNDISTORT_MAX_ITERS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let nx = (nd.x - dx) / radial;
            let ny = (nd.y - dy) / radial;
            let step = (nx - x).abs() + (ny - y).abs();
            x = nx;
            y = ny;
            if step < 1e-15 {
                break;
            }
        }
        Vector2::new(x, y)
    }
}

/// Camera matrix `K` plus lens distortion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub k: Matrix3<f64>,
    pub distortion: Distortion,
}

impl CameraIntrinsics {
    pub fn new(k: Matrix3<f64>, distortion: Distortion) -> Self {
        Self { k, distortion }
    }

    /// Zero-skew camera matrix from focal lengths and principal point.
    pub fn from_params(fx: f64, fy: f64, cx: f64, cy: f64, distortion: Distortion) -> Self {
        Self::new(
            Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
            distortion,
        )
    }

    #[inline]
    pub fn fx(&self) -> f64 {
        self.k[(0, 0)]
    }

    #[inline]
    pub fn fy(&self) -> f64 {
        self.k[(1, 1)]
    }

    #[inline]
    pub fn cx(&self) -> f64 {
        self.k[(0, 2)]
    }

    #[inline]
    pub fn cy(&self) -> f64 {
        self.k[(1, 2)]
    }

    pub fn is_finite(&self) -> bool {
        self.k.iter().all(|v| v.is_finite())
            && self.distortion.coefficients().iter().all(|v| v.is_finite())
    }

    /// Pixel position of an undistorted normalized point.
    #[inline]
    pub fn project_normalized(&self, n: Vector2<f64>) -> Pt2 {
        let d = self.distortion.distort(n);
        let p = self.k * Vector3::new(d.x, d.y, 1.0);
        Pt2::new(p.x / p.z, p.y / p.z)
    }

    /// Project a point given in this camera's frame. `None` behind the camera.
    #[inline]
    pub fn project(&self, p_cam: &Pt3) -> Option<Pt2> {
        if p_cam.z <= f64::EPSILON {
            return None;
        }
        Some(self.project_normalized(Vector2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z)))
    }

    /// Undistorted normalized coordinates of a pixel.
    pub fn normalize(&self, pixel: &Pt2) -> Option<Vector2<f64>> {
        let k_inv = self.k.try_inverse()?;
        let v = k_inv * Vector3::new(pixel.x, pixel.y, 1.0);
        if v.z.abs() < f64::EPSILON {
            return None;
        }
        Some(self.distortion.undistort(Vector2::new(v.x / v.z, v.y / v.z)))
    }
}
