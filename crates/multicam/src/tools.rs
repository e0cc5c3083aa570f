//! Offline operations on parameter files and datasets.

use std::path::{Path, PathBuf};

use multicam_calib::compose_triplet;
use multicam_core::{
    extrinsics_file_name, intrinsics_file_name, read_extrinsics, read_intrinsics,
    write_extrinsics, Extrinsics, ParamIoError,
};
use multicam_reproject::{CameraRig, Dataset, ErrorReport, ReprojectionEngine, RigError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("cannot derive camera names from {first} and {second}")]
    LegNames { first: PathBuf, second: PathBuf },
    #[error("extrinsics in {0} are not a rigid transform")]
    NotRigid(PathBuf),
    #[error("composed pose has a singular fundamental matrix")]
    Degenerate,
    #[error(transparent)]
    Params(#[from] ParamIoError),
    #[error(transparent)]
    Rig(#[from] RigError),
}

fn leg_suffix(path: &Path) -> Option<&str> {
    path.file_stem()?.to_str()?.strip_prefix("Extrinsics_")
}

/// Camera names `(a, b, c)` of two leg files `Extrinsics_<a>_<b>.json` and
/// `Extrinsics_<b>_<c>.json`. The shared camera resolves underscores in
/// names.
pub fn leg_camera_names(first: &Path, second: &Path) -> Option<(String, String, String)> {
    let first_rest = leg_suffix(first)?;
    let second_rest = leg_suffix(second)?;
    first_rest
        .match_indices('_')
        .map(|(i, _)| (&first_rest[..i], &first_rest[i + 1..]))
        .find_map(|(a, b)| {
            let c = second_rest.strip_prefix(b)?.strip_prefix('_')?;
            (!a.is_empty() && !b.is_empty() && !c.is_empty())
                .then(|| (a.to_string(), b.to_string(), c.to_string()))
        })
}

/// Compose the legs `a -> b` and `b -> c` into `Extrinsics_<a>_<c>.json`
/// in `output_dir`. `E` and `F` are recomputed from the composed pose with
/// the intrinsics of `a` and `c`.
pub fn compose_extrinsics_files(
    first: &Path,
    second: &Path,
    intrinsics_dir: &Path,
    output_dir: &Path,
) -> Result<(PathBuf, Extrinsics), ToolError> {
    let (a, b, c) = leg_camera_names(first, second).ok_or_else(|| ToolError::LegNames {
        first: first.to_path_buf(),
        second: second.to_path_buf(),
    })?;
    let first_leg = read_extrinsics(first)?
        .isometry()
        .ok_or_else(|| ToolError::NotRigid(first.to_path_buf()))?;
    let second_leg = read_extrinsics(second)?
        .isometry()
        .ok_or_else(|| ToolError::NotRigid(second.to_path_buf()))?;
    let cam_a = read_intrinsics(intrinsics_dir.join(intrinsics_file_name(&a)))?;
    let cam_c = read_intrinsics(intrinsics_dir.join(intrinsics_file_name(&c)))?;

    let pose = compose_triplet(&first_leg, &second_leg);
    let ext = Extrinsics::from_pose(&pose, &cam_a, &cam_c).ok_or(ToolError::Degenerate)?;
    let path = output_dir.join(extrinsics_file_name(&a, &c));
    write_extrinsics(&path, &ext)?;
    log::info!("composed {a}-{b} and {b}-{c} into {}", path.display());
    Ok((path, ext))
}

/// Run the reprojection engine over every capture of `dataset`.
///
/// Keypoints are updated in place; the returned reports hold the error
/// statistics of each capture in order.
pub fn reproject_dataset(
    dataset: &mut Dataset,
    rig: CameraRig,
    min_views: usize,
) -> Result<Vec<ErrorReport>, ToolError> {
    let mut engine = ReprojectionEngine::new(rig, dataset)?;
    engine.set_min_views(dataset, min_views);
    engine.set_active(dataset, true);
    let mut reports = Vec::with_capacity(dataset.num_captures());
    for capture in 0..dataset.num_captures() {
        engine.recompute_capture(dataset, capture);
        reports.push(engine.report(dataset));
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leg_names_split_on_shared_camera() {
        let names = leg_camera_names(
            Path::new("/p/Extrinsics_Camera_1_Camera_2.json"),
            Path::new("/p/Extrinsics_Camera_2_Camera_3.json"),
        );
        assert_eq!(
            names,
            Some(("Camera_1".into(), "Camera_2".into(), "Camera_3".into()))
        );
        assert_eq!(
            leg_camera_names(Path::new("Extrinsics_A_B.json"), Path::new("Extrinsics_B_C.json")),
            Some(("A".into(), "B".into(), "C".into()))
        );
    }

    #[test]
    fn unrelated_legs_have_no_names() {
        let names = |a: &str, b: &str| leg_camera_names(Path::new(a), Path::new(b));
        assert!(names("Extrinsics_A_B.json", "Extrinsics_C_D.json").is_none());
        assert!(names("A_B.json", "Extrinsics_B_C.json").is_none());
    }
}
