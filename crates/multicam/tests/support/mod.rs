#![allow(dead_code)]

use std::path::Path;

use multicam::core::{
    extrinsics_file_name, intrinsics_file_name, write_extrinsics, write_intrinsics,
    CameraIntrinsics, Distortion, Extrinsics, ImageSize, Iso3, Pt3,
};
use multicam::reproject::{Dataset, KeypointKey, SkeletonEdge};
use nalgebra::{Translation3, UnitQuaternion};

pub const CAMERAS: [&str; 3] = ["Camera_A", "Camera_B", "Camera_C"];

pub fn camera() -> CameraIntrinsics {
    CameraIntrinsics::from_params(900.0, 905.0, 640.0, 360.0, Distortion::radial(-0.06, 0.01))
}

/// Poses relative to `Camera_A`.
pub fn poses() -> [Iso3; 3] {
    [
        Iso3::identity(),
        Iso3::from_parts(
            Translation3::new(-180.0, 4.0, 25.0),
            UnitQuaternion::from_euler_angles(0.01, -0.2, 0.0),
        ),
        Iso3::from_parts(
            Translation3::new(170.0, -6.0, 30.0),
            UnitQuaternion::from_euler_angles(-0.01, 0.22, 0.02),
        ),
    ]
}

/// Writes intrinsics of all cameras and extrinsics relative to `Camera_A`.
pub fn write_rig(intrinsics: &Path, extrinsics: &Path) {
    let cam = camera();
    for name in CAMERAS {
        write_intrinsics(intrinsics.join(intrinsics_file_name(name)), &cam).expect("intrinsics");
    }
    for (name, pose) in CAMERAS.iter().zip(poses()).skip(1) {
        let ext = Extrinsics::from_pose(&pose, &cam, &cam).expect("extrinsics");
        write_extrinsics(extrinsics.join(extrinsics_file_name(CAMERAS[0], name)), &ext)
            .expect("write");
    }
}

/// One capture with `nose` annotated exactly in cameras A and B.
pub fn write_dataset(path: &Path) -> Pt3 {
    let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut ds = Dataset::new(
        names(&CAMERAS),
        names(&["fly"]),
        names(&["nose", "tail"]),
        vec![SkeletonEdge::new("nose", "tail", 3.0)],
    )
    .expect("dataset");
    ds.add_capture(42, vec![ImageSize::new(1280, 720); 3]).expect("capture");
    let x = Pt3::new(15.0, -10.0, 800.0);
    let cam = camera();
    for i in 0..2 {
        let p = cam.project(&(poses()[i] * x)).expect("visible");
        ds.annotate(KeypointKey::new(0, i, 0, 0), p);
    }
    ds.write_json(path).expect("write dataset");
    x
}
