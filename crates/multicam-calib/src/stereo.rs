//! Relative pose of two cameras with fixed intrinsics, and the staged
//! outlier rejection around it.

use multicam_core::{
    estimate_homography, planar_pose_from_homography, pose_from_params, pose_to_params,
    CalibrationError, CameraIntrinsics, Extrinsics, Iso3, Pt2, Pt3,
};
use nalgebra::{Matrix3, Quaternion, Translation3, UnitQuaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::factors::{FixedLens, StereoPointFactor};
use crate::intrinsics::view_sq_error;
use crate::lm::{block, LeastSquares, TermCriteria};
use crate::CancellationToken;

/// Solver settings of the pairwise estimator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairwiseParams {
    /// One refinement stage per factor: views whose error exceeds
    /// `factor * mean` are dropped before the next fit.
    pub stage_factors: Vec<f64>,
    pub stage_criteria: TermCriteria,
    pub final_criteria: TermCriteria,
    pub intrinsics_criteria: TermCriteria,
}

impl Default for PairwiseParams {
    fn default() -> Self {
        Self {
            stage_factors: vec![1.4, 1.6],
            stage_criteria: TermCriteria::new(80, 1e-6),
            final_criteria: TermCriteria::new(120, 1e-7),
            intrinsics_criteria: TermCriteria::new(80, 1e-6),
        }
    }
}

/// One stereo fit.
#[derive(Clone, Debug)]
pub struct StereoFit {
    /// Second camera relative to the first: `X_2 = R * X_1 + T`.
    pub pose: Iso3,
    pub extrinsics: Extrinsics,
    /// RMS reprojection error over both cameras, in pixels.
    pub rms: f64,
    /// Per-view RMS error in the first and second camera.
    pub view_errors: Vec<[f64; 2]>,
}

/// Bookkeeping of one outlier-rejection stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub threshold_factor: f64,
    pub mean_error: f64,
    pub input_frames: usize,
    pub retained_frames: usize,
}

#[derive(Clone, Debug)]
pub struct RefinedStereo {
    pub fit: StereoFit,
    pub stages: Vec<StageReport>,
    /// Views used by the final fit.
    pub final_frames: usize,
}

const RELATIVE_BLOCK: &str = "relative";

fn board_block(v: usize) -> String {
    format!("board{v}")
}

fn degenerate(msg: impl Into<String>) -> CalibrationError {
    CalibrationError::GeometricDegeneracy(msg.into())
}

/// Board pose from one view, using undistorted normalized coordinates.
fn board_pose(cam: &CameraIntrinsics, plane: &[Pt2], view: &[Pt2]) -> Option<Iso3> {
    let normalized = view
        .iter()
        .map(|p| cam.normalize(p).map(|n| Pt2::new(n.x, n.y)))
        .collect::<Option<Vec<_>>>()?;
    let h = estimate_homography(plane, &normalized)?;
    planar_pose_from_homography(&Matrix3::identity(), &h.h)
}

/// Mean translation, rotation averaged in quaternion space.
fn average_poses(poses: &[Iso3]) -> Option<Iso3> {
    let first = poses.first()?;
    let mut t = Vector3::zeros();
    let mut q = Vector4::zeros();
    for p in poses {
        t += p.translation.vector;
        let c = p.rotation.coords;
        let sign = if first.rotation.coords.dot(&c) < 0.0 {
            -1.0
        } else {
            1.0
        };
        q += c * sign;
    }
    if q.norm_squared() <= 0.0 {
        return None;
    }
    let n = poses.len() as f64;
    Some(Iso3::from_parts(
        Translation3::from(t / n),
        UnitQuaternion::from_quaternion(Quaternion::from_vector(q / n)),
    ))
}

/// Fit the relative pose of two cameras observing the same board views.
///
/// `first[v]` and `second[v]` hold the image positions of every `board`
/// point in view `v`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(views = first.len()))
)]
pub fn stereo_calibrate(
    board: &[Pt3],
    first: &[Vec<Pt2>],
    second: &[Vec<Pt2>],
    cam1: &CameraIntrinsics,
    cam2: &CameraIntrinsics,
    criteria: TermCriteria,
) -> Result<StereoFit, CalibrationError> {
    if first.is_empty() || first.len() != second.len() {
        return Err(degenerate(format!(
            "stereo calibration needs matching non-empty view lists, got {} and {}",
            first.len(),
            second.len()
        )));
    }
    if first
        .iter()
        .chain(second)
        .any(|v| v.len() != board.len())
    {
        return Err(CalibrationError::MalformedDetection(
            "view point count differs from board".to_string(),
        ));
    }

    let plane: Vec<Pt2> = board.iter().map(|p| Pt2::new(p.x, p.y)).collect();
    let mut board_in_first = Vec::with_capacity(first.len());
    let mut relative = Vec::with_capacity(first.len());
    for (v1, v2) in first.iter().zip(second) {
        let (Some(p1), Some(p2)) = (
            board_pose(cam1, &plane, v1),
            board_pose(cam2, &plane, v2),
        ) else {
            return Err(degenerate("board pose initialization failed"));
        };
        relative.push(p2 * p1.inverse());
        board_in_first.push(p1);
    }
    let init =
        average_poses(&relative).ok_or_else(|| degenerate("relative pose averaging failed"))?;

    let (lens1, lens2) = (FixedLens::new(cam1), FixedLens::new(cam2));
    let mut ls = LeastSquares::new();
    ls.add_block(RELATIVE_BLOCK, &pose_to_params(&init));
    for (v, pose) in board_in_first.iter().enumerate() {
        let name = board_block(v);
        ls.add_block(name.as_str(), &pose_to_params(pose));
        for ((obj, o1), o2) in board.iter().zip(&first[v]).zip(&second[v]) {
            ls.add_residual(
                4,
                &[RELATIVE_BLOCK, name.as_str()],
                Box::new(StereoPointFactor::new(obj, o1, o2, lens1, lens2)),
            );
        }
    }
    let solved = ls
        .solve(criteria)
        .map_err(|e| degenerate(format!("stereo refinement: {e}")))?;
    let unpack = |name: &str| {
        block(&solved, name).map_err(|e| degenerate(format!("stereo refinement: {e}")))
    };

    let pose = pose_from_params(unpack(RELATIVE_BLOCK)?);
    let n = board.len() as f64;
    let mut sq_error = 0.0;
    let mut view_errors = Vec::with_capacity(first.len());
    for (v, (v1, v2)) in first.iter().zip(second).enumerate() {
        let in_first = pose_from_params(unpack(&board_block(v))?);
        let e1 = view_sq_error(cam1, &in_first, board, v1);
        let e2 = view_sq_error(cam2, &(pose * in_first), board, v2);
        sq_error += e1 + e2;
        view_errors.push([(e1 / n).sqrt(), (e2 / n).sqrt()]);
    }
    let rms = (sq_error / (2.0 * n * first.len() as f64)).sqrt();

    let extrinsics = Extrinsics::from_pose(&pose, cam1, cam2)
        .ok_or_else(|| degenerate("camera matrix not invertible"))?;
    if !extrinsics.is_finite() || !rms.is_finite() {
        return Err(degenerate("stereo fit produced non-finite parameters"));
    }

    Ok(StereoFit {
        pose,
        extrinsics,
        rms,
        view_errors,
    })
}

/// Indices of views whose worse camera error is within `factor * mean`.
pub fn retain_by_error(view_errors: &[[f64; 2]], mean: f64, factor: f64) -> Vec<usize> {
    let threshold = factor * mean;
    view_errors
        .iter()
        .enumerate()
        .filter(|(_, e)| e[0].max(e[1]) <= threshold)
        .map(|(i, _)| i)
        .collect()
}

fn select(views: &[Vec<Pt2>], keep: &[usize]) -> Vec<Vec<Pt2>> {
    keep.iter().map(|&i| views[i].clone()).collect()
}

/// Staged fit: every stage fits, drops views above its threshold, and
/// hands the survivors to the next stage; a final fit with the tight
/// criteria runs on what is left.
///
/// A stage that would drop every view keeps its input instead. The token
/// is checked before every fit.
pub fn refine_stereo(
    board: &[Pt3],
    mut first: Vec<Vec<Pt2>>,
    mut second: Vec<Vec<Pt2>>,
    cam1: &CameraIntrinsics,
    cam2: &CameraIntrinsics,
    params: &PairwiseParams,
    cancel: &CancellationToken,
) -> Result<RefinedStereo, CalibrationError> {
    let mut stages = Vec::with_capacity(params.stage_factors.len());
    for (stage, &factor) in params.stage_factors.iter().enumerate() {
        cancel.check()?;
        let fit = stereo_calibrate(board, &first, &second, cam1, cam2, params.stage_criteria)?;
        let mut keep = retain_by_error(&fit.view_errors, fit.rms, factor);
        if keep.is_empty() {
            log::warn!(
                "stage {} would drop every view, keeping {}",
                stage + 1,
                first.len()
            );
            keep = (0..first.len()).collect();
        }
        let report = StageReport {
            threshold_factor: factor,
            mean_error: fit.rms,
            input_frames: first.len(),
            retained_frames: keep.len(),
        };
        log::info!(
            "mean reprojection error after stage {}: {:.4} px, {} of {} views kept",
            stage + 1,
            report.mean_error,
            report.retained_frames,
            report.input_frames
        );
        first = select(&first, &keep);
        second = select(&second, &keep);
        stages.push(report);
    }

    cancel.check()?;
    let fit = stereo_calibrate(board, &first, &second, cam1, cam2, params.final_criteria)?;
    log::info!(
        "final reprojection error {:.4} px over {} views",
        fit.rms,
        first.len()
    );
    Ok(RefinedStereo {
        fit,
        stages,
        final_frames: first.len(),
    })
}
