//! Single-camera intrinsics from planar checkerboard views.
//!
//! Model: `fx, fy, cx, cy` with radial `k1, k2`; `k3` and the tangential
//! terms stay at zero. Initialization follows Zhang's method with the
//! principal point fixed at the image centre, then all parameters and the
//! per-view board poses are refined jointly.

use multicam_core::{
    estimate_homography, planar_pose_from_homography, pose_from_params, pose_to_params,
    CalibrationError, CameraIntrinsics, Distortion, ImageSize, Iso3, Pt2, Pt3,
};
use nalgebra::{Matrix2, Matrix3, Vector2};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::factors::BoardPointFactor;
use crate::lm::{block, LeastSquares, TermCriteria};

/// Result of [`estimate_intrinsics`].
#[derive(Clone, Debug)]
pub struct IntrinsicsFit {
    pub intrinsics: CameraIntrinsics,
    /// RMS reprojection error over all points, in pixels.
    pub rms: f64,
    /// Board pose in the camera frame, per view.
    pub poses: Vec<Iso3>,
}

/// Project a board point seen from `pose` into `cam`.
#[inline]
pub(crate) fn project_board_point(cam: &CameraIntrinsics, pose: &Iso3, p: &Pt3) -> Pt2 {
    let pc = pose * p;
    let z = if pc.z.abs() < 1e-9 { 1e-9 } else { pc.z };
    cam.project_normalized(Vector2::new(pc.x / z, pc.y / z))
}

fn camera_from_params(g: &[f64]) -> CameraIntrinsics {
    CameraIntrinsics::from_params(g[0], g[1], g[2], g[3], Distortion::radial(g[4], g[5]))
}

fn view_block(v: usize) -> String {
    format!("view{v}")
}

/// Sum of squared pixel residuals of one view.
pub(crate) fn view_sq_error(
    cam: &CameraIntrinsics,
    pose: &Iso3,
    board: &[Pt3],
    view: &[Pt2],
) -> f64 {
    board
        .iter()
        .zip(view)
        .map(|(obj, obs)| (project_board_point(cam, pose, obj) - obs).norm_squared())
        .sum()
}

fn board_plane(board: &[Pt3]) -> Vec<Pt2> {
    board.iter().map(|p| Pt2::new(p.x, p.y)).collect()
}

fn degenerate(msg: impl Into<String>) -> CalibrationError {
    CalibrationError::GeometricDegeneracy(msg.into())
}

/// Closed-form focal lengths from board homographies, principal point at
/// the image centre.
///
/// Each homography contributes the two orthogonality constraints of the
/// image of the absolute conic, linear in `(1/fx^2, 1/fy^2)`.
pub fn initial_intrinsics(
    homographies: &[Matrix3<f64>],
    size: ImageSize,
) -> Option<CameraIntrinsics> {
    let c = size.center();
    let shift_inv = Matrix3::new(1.0, 0.0, -c.x, 0.0, 1.0, -c.y, 0.0, 0.0, 1.0);

    let mut ata = Matrix2::<f64>::zeros();
    let mut atb = Vector2::<f64>::zeros();
    for h in homographies {
        let h = shift_inv * h;
        let h1 = h.column(0).into_owned();
        let h2 = h.column(1).into_owned();
        let d1 = (h1 + h2) * 0.5;
        let d2 = (h1 - h2) * 0.5;
        let (n1, n2) = (d1.norm(), d2.norm());
        let n = (h1.norm(), h2.norm());
        if n.0 < 1e-12 || n.1 < 1e-12 || n1 < 1e-12 || n2 < 1e-12 {
            continue;
        }
        let (h1, h2) = (h1 / n.0, h2 / n.1);
        let (d1, d2) = (d1 / n1, d2 / n2);
        for (u, v) in [(h1, h2), (d1, d2)] {
            let a = Vector2::new(u.x * v.x, u.y * v.y);
            let b = -u.z * v.z;
            ata += a * a.transpose();
            atb += a * b;
        }
    }

    let f = ata.try_inverse().map(|inv| inv * atb);
    let (fx, fy) = match f {
        Some(f) if f.x > 0.0 && f.y > 0.0 => ((1.0 / f.x).sqrt(), (1.0 / f.y).sqrt()),
        _ => {
            // fronto-parallel views only; fall back to a generic field of view
            let guess = size.width.max(size.height) as f64;
            log::debug!("focal initialization degenerate, using {guess:.1}px");
            (guess, guess)
        }
    };
    if !(fx.is_finite() && fy.is_finite()) {
        return None;
    }
    Some(CameraIntrinsics::from_params(fx, fy, c.x, c.y, Distortion::default()))
}

/// Fit intrinsics to `views`, each holding the image positions of every
/// `board` point in order.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(board, views), fields(views = views.len()))
)]
pub fn estimate_intrinsics(
    board: &[Pt3],
    views: &[Vec<Pt2>],
    size: ImageSize,
    criteria: TermCriteria,
) -> Result<IntrinsicsFit, CalibrationError> {
    if views.is_empty() {
        return Err(degenerate("no views for intrinsics"));
    }
    if board.len() < 4 {
        return Err(degenerate("board needs at least 4 points"));
    }
    if let Some(v) = views.iter().find(|v| v.len() != board.len()) {
        return Err(CalibrationError::MalformedDetection(format!(
            "view has {} points, board has {}",
            v.len(),
            board.len()
        )));
    }

    let plane = board_plane(board);
    let homographies = views
        .iter()
        .map(|v| estimate_homography(&plane, v).map(|h| h.h))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| degenerate("board homography estimation failed"))?;

    let init = initial_intrinsics(&homographies, size)
        .ok_or_else(|| degenerate("intrinsics initialization failed"))?;
    let poses = homographies
        .iter()
        .map(|h| planar_pose_from_homography(&init.k, h))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| degenerate("board pose initialization failed"))?;

    let mut ls = LeastSquares::new();
    ls.add_block(
        "camera",
        &[init.fx(), init.fy(), init.cx(), init.cy(), 0.0, 0.0],
    );
    for (v, (pose, view)) in poses.iter().zip(views).enumerate() {
        let name = view_block(v);
        ls.add_block(name.as_str(), &pose_to_params(pose));
        for (obj, obs) in board.iter().zip(view) {
            ls.add_residual(
                2,
                &["camera", name.as_str()],
                Box::new(BoardPointFactor::new(obj, obs)),
            );
        }
    }
    let solved = ls
        .solve(criteria)
        .map_err(|e| degenerate(format!("intrinsics refinement: {e}")))?;
    let unpack = |name: &str| {
        block(&solved, name).map_err(|e| degenerate(format!("intrinsics refinement: {e}")))
    };

    let intrinsics = camera_from_params(unpack("camera")?);
    let poses = (0..views.len())
        .map(|v| unpack(&view_block(v)).map(pose_from_params))
        .collect::<Result<Vec<_>, _>>()?;
    let sq_error: f64 = poses
        .iter()
        .zip(views)
        .map(|(pose, view)| view_sq_error(&intrinsics, pose, board, view))
        .sum();
    let rms = (sq_error / (views.len() * board.len()) as f64).sqrt();
    let invalid = intrinsics.fx() <= 0.0 || intrinsics.fy() <= 0.0;
    if !intrinsics.is_finite() || !rms.is_finite() || invalid {
        return Err(degenerate("intrinsics fit produced invalid parameters"));
    }
    log::debug!(
        "intrinsics fit: fx={:.2} fy={:.2} cx={:.2} cy={:.2} k1={:.4} k2={:.4} rms={rms:.4}",
        intrinsics.fx(),
        intrinsics.fy(),
        intrinsics.cx(),
        intrinsics.cy(),
        intrinsics.distortion.k1,
        intrinsics.distortion.k2,
    );

    Ok(IntrinsicsFit {
        intrinsics,
        rms,
        poses,
    })
}
#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};

    fn board(w: usize, h: usize, s: f64) -> Vec<Pt3> {
        (0..h)
            .flat_map(|i| (0..w).map(move |j| Pt3::new(j as f64 * s, i as f64 * s, 0.0)))
            .collect()
    }

    fn views(cam: &CameraIntrinsics, board: &[Pt3]) -> Vec<Vec<Pt2>> {
        let poses = [
            (0.25, -0.1, 0.05, -80.0, -60.0, 600.0),
            (-0.2, 0.3, -0.1, -100.0, -50.0, 700.0),
            (0.1, 0.35, 0.2, -60.0, -70.0, 650.0),
            (-0.3, -0.25, 0.0, -90.0, -40.0, 550.0),
            (0.05, -0.35, -0.15, -70.0, -55.0, 750.0),
        ];
        poses
            .iter()
            .map(|&(rx, ry, rz, tx, ty, tz)| {
                let pose = Iso3::from_parts(
                    Translation3::new(tx, ty, tz),
                    UnitQuaternion::from_euler_angles(rx, ry, rz),
                );
                board
                    .iter()
                    .map(|p| project_board_point(cam, &pose, p))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn recovers_synthetic_camera() {
        let dist = Distortion::radial(-0.15, 0.05);
        let truth = CameraIntrinsics::from_params(820.0, 810.0, 322.0, 236.0, dist);
        let board = board(9, 6, 25.0);
        let views = views(&truth, &board);
        let size = ImageSize::new(640, 480);
        let fit = estimate_intrinsics(&board, &views, size, TermCriteria::new(200, 1e-12))
            .expect("fit");
        assert!(fit.rms < 1e-3, "rms {}", fit.rms);
        assert!((fit.intrinsics.fx() - 820.0).abs() < 0.5);
        assert!((fit.intrinsics.fy() - 810.0).abs() < 0.5);
        assert!((fit.intrinsics.cx() - 322.0).abs() < 0.5);
        assert!((fit.intrinsics.cy() - 236.0).abs() < 0.5);
        assert!((fit.intrinsics.distortion.k1 + 0.15).abs() < 1e-3);
        assert_eq!(fit.intrinsics.distortion.k3, 0.0);
        assert_eq!(fit.poses.len(), views.len());
    }

    #[test]
    fn closed_form_focal_is_close_without_distortion() {
        let truth =
            CameraIntrinsics::from_params(700.0, 700.0, 319.5, 239.5, Distortion::default());
        let board = board(7, 5, 30.0);
        let views = views(&truth, &board);
        let plane = board_plane(&board);
        let hs: Vec<_> = views
            .iter()
            .map(|v| estimate_homography(&plane, v).expect("h").h)
            .collect();
        let init = initial_intrinsics(&hs, ImageSize::new(640, 480)).expect("init");
        assert!((init.fx() - 700.0).abs() < 1.0, "fx {}", init.fx());
        assert!((init.fy() - 700.0).abs() < 1.0, "fy {}", init.fy());
    }

    #[test]
    fn mismatched_view_is_malformed() {
        let board = board(4, 3, 10.0);
        let views = [vec![Pt2::new(0.0, 0.0); 5]];
        let err =
            estimate_intrinsics(&board, &views, ImageSize::new(64, 48), TermCriteria::default())
                .expect_err("bad view");
        assert!(matches!(err, CalibrationError::MalformedDetection(_)));
    }
}
