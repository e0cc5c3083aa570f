use approx::assert_abs_diff_eq;
use multicam_core::{
    intrinsics_file_name, read_extrinsics, read_intrinsics, try_read_intrinsics,
    write_extrinsics, write_intrinsics, CameraIntrinsics, Distortion, Extrinsics, Iso3,
    ParamIoError, INTRINSICS_DIR,
};
use nalgebra::{Translation3, UnitQuaternion};

#[test]
fn intrinsics_survive_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir
        .path()
        .join(INTRINSICS_DIR)
        .join(intrinsics_file_name("Camera_1"));
    let dist = Distortion::radial(-0.12, 0.04);
    let cam = CameraIntrinsics::from_params(1210.5, 1208.25, 639.5, 511.5, dist);

    write_intrinsics(&path, &cam).expect("write");
    let back = read_intrinsics(&path).expect("read");
    assert_abs_diff_eq!(back.k, cam.k, epsilon = 1e-12);
    assert_eq!(back.distortion, cam.distortion);
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn extrinsics_survive_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("Extrinsics_A_B.json");
    let k = CameraIntrinsics::from_params(900.0, 900.0, 400.0, 300.0, Distortion::default());
    let pose = Iso3::from_parts(
        Translation3::new(-120.0, 4.0, 10.0),
        UnitQuaternion::from_euler_angles(0.01, 0.3, -0.02),
    );
    let ext = Extrinsics::from_pose(&pose, &k, &k).expect("extrinsics");

    write_extrinsics(&path, &ext).expect("write");
    let back = read_extrinsics(&path).expect("read");
    assert_abs_diff_eq!(back.r, ext.r, epsilon = 1e-12);
    assert_abs_diff_eq!(back.t, ext.t, epsilon = 1e-12);
    assert_abs_diff_eq!(back.e, ext.e, epsilon = 1e-12);
    assert_abs_diff_eq!(back.f, ext.f, epsilon = 1e-12);
}

#[test]
fn missing_and_malformed_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("Intrinsics_X.json");
    assert!(matches!(
        read_intrinsics(&missing),
        Err(ParamIoError::MissingFile(_))
    ));
    assert!(try_read_intrinsics(&missing).is_none());

    let broken = dir.path().join("Intrinsics_Y.json");
    std::fs::write(&broken, "{ not json").expect("write");
    assert!(matches!(
        read_intrinsics(&broken),
        Err(ParamIoError::Json { .. })
    ));
    assert!(try_read_intrinsics(&broken).is_none());
}
