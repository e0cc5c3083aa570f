//! Linear multi-view triangulation.

use multicam_core::{Pt2, Pt3, Real};
use nalgebra::{DMatrix, Matrix3x4};

/// DLT triangulation from two or more views.
///
/// `projections[i]` maps homogeneous world points to homogeneous image
/// points of view `i`; `points[i]` is the observation in the same image
/// coordinates (pixels for `K [R | t]`, normalized for `[R | t]`).
/// `None` for fewer than two views, mismatched inputs or a point at
/// infinity.
pub fn triangulate_dlt(projections: &[Matrix3x4<Real>], points: &[Pt2]) -> Option<Pt3> {
    if projections.len() < 2 || projections.len() != points.len() {
        return None;
    }

    let mut a = DMatrix::<Real>::zeros(2 * projections.len(), 4);
    for (i, (p, cam)) in points.iter().zip(projections).enumerate() {
        a.row_mut(2 * i).copy_from(&(p.x * cam.row(2) - cam.row(0)));
        a.row_mut(2 * i + 1).copy_from(&(p.y * cam.row(2) - cam.row(1)));
    }

    let v_t = a.svd(false, true).v_t?;
    let x_h = v_t.row(v_t.nrows() - 1);
    let w = x_h[3];
    if !w.is_finite() || w.abs() <= Real::EPSILON {
        return None;
    }
    let x = Pt3::new(x_h[0] / w, x_h[1] / w, x_h[2] / w);
    x.coords.iter().all(|v| v.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector4;

    fn project(cam: &Matrix3x4<Real>, p: &Pt3) -> Pt2 {
        let x = cam * Vector4::new(p.x, p.y, p.z, 1.0);
        Pt2::new(x.x / x.z, x.y / x.z)
    }

    #[test]
    fn two_views_recover_point() {
        let cam1 = Matrix3x4::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0);
        let cam2 = Matrix3x4::new(1.0, 0.0, 0.0, -0.2, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0);
        let pw = Pt3::new(0.1, -0.05, 2.0);
        let est = triangulate_dlt(&[cam1, cam2], &[project(&cam1, &pw), project(&cam2, &pw)])
            .expect("point");
        assert!((est - pw).norm() < 1e-9, "error {}", (est - pw).norm());
    }

    #[test]
    fn single_view_is_rejected() {
        let cam = Matrix3x4::identity();
        assert!(triangulate_dlt(&[cam], &[Pt2::new(0.0, 0.0)]).is_none());
        assert!(triangulate_dlt(&[cam, cam], &[Pt2::new(0.0, 0.0)]).is_none());
    }
}
