use std::sync::mpsc;

use approx::assert_abs_diff_eq;
use multicam_core::{CameraIntrinsics, Distortion, ImageSize, Iso3, Pt2, Pt3};
use multicam_reproject::{
    CameraRig, Dataset, KeypointKey, KeypointState, ReprojectionEngine, ReprojectionEvent,
    SkeletonEdge,
};
use nalgebra::{Translation3, UnitQuaternion};

const NOSE: usize = 0;
const TAIL: usize = 1;

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn rig() -> CameraRig {
    let dist = Distortion::radial(-0.05, 0.01);
    let cam = CameraIntrinsics::from_params(800.0, 800.0, 320.0, 240.0, dist);
    let b = Iso3::from_parts(
        Translation3::new(-150.0, 0.0, 20.0),
        UnitQuaternion::from_euler_angles(0.0, -0.15, 0.0),
    );
    let c = Iso3::from_parts(
        Translation3::new(150.0, 10.0, 20.0),
        UnitQuaternion::from_euler_angles(0.02, 0.15, 0.0),
    );
    CameraRig::new(
        &names(&["A", "B", "C"]),
        vec![cam.clone(), cam.clone(), cam],
        vec![Iso3::identity(), b, c],
        0,
    )
    .expect("rig")
}

fn dataset(captures: usize) -> Dataset {
    let mut ds = Dataset::new(
        names(&["A", "B", "C"]),
        names(&["mouse"]),
        names(&["nose", "tail"]),
        vec![SkeletonEdge::new("nose", "tail", 50.0)],
    )
    .expect("dataset");
    for frame in 0..captures {
        ds.add_capture(frame * 10, vec![ImageSize::new(640, 480); 3])
            .expect("capture");
    }
    ds
}

fn key(capture: usize, camera: usize, bodypart: usize) -> KeypointKey {
    KeypointKey::new(capture, camera, 0, bodypart)
}

fn projection(rig: &CameraRig, camera: usize, x: &Pt3) -> Pt2 {
    rig.camera(camera)
        .and_then(|c| c.project(x))
        .expect("point in front of camera")
}

fn annotate_exact(
    ds: &mut Dataset,
    rig: &CameraRig,
    capture: usize,
    bodypart: usize,
    x: &Pt3,
    cams: &[usize],
) {
    for &cam in cams {
        assert!(ds.annotate(key(capture, cam, bodypart), projection(rig, cam, x)));
    }
}

fn state(ds: &Dataset, k: KeypointKey) -> KeypointState {
    ds.keypoint(k).expect("keypoint").state
}

fn active_engine(ds: &mut Dataset) -> ReprojectionEngine {
    let mut engine = ReprojectionEngine::new(rig(), ds).expect("engine");
    engine.set_active(ds, true);
    engine
}

#[test]
fn two_annotated_views_reproject_into_the_third() {
    let rig = rig();
    let mut ds = dataset(1);
    let x = Pt3::new(10.0, -5.0, 1000.0);
    annotate_exact(&mut ds, &rig, 0, NOSE, &x, &[0, 1]);

    let engine = active_engine(&mut ds);

    let kp = ds.keypoint(key(0, 2, NOSE)).expect("keypoint");
    assert_eq!(kp.state, KeypointState::Reprojected);
    let expected = projection(&rig, 2, &x);
    assert_abs_diff_eq!(kp.position.coords, expected.coords, epsilon = 1e-6);
    assert!(engine.errors()[0].reprojection[NOSE] < 1e-6);
    // annotated views keep their state and coordinates
    assert_eq!(state(&ds, key(0, 0, NOSE)), KeypointState::Annotated);
    assert_eq!(state(&ds, key(0, 1, NOSE)), KeypointState::Annotated);
    // only one bodypart had support
    assert_eq!(state(&ds, key(0, 2, TAIL)), KeypointState::NotAnnotated);
}

#[test]
fn noiseless_round_trip_reproduces_annotations() {
    let rig = rig();
    let x = Pt3::new(-40.0, 25.0, 1200.0);
    let obs: Vec<_> = (0..3).map(|cam| (cam, projection(&rig, cam, &x))).collect();
    let est = rig.triangulate(&obs).expect("triangulated");
    for (cam, p) in &obs {
        let back = projection(&rig, *cam, &est);
        assert_abs_diff_eq!(back.coords, p.coords, epsilon = 1e-6);
    }
}

#[test]
fn reprojection_error_is_averaged_over_all_cameras() {
    let rig = rig();
    let mut ds = dataset(1);
    let x = Pt3::new(10.0, -5.0, 1000.0);
    annotate_exact(&mut ds, &rig, 0, NOSE, &x, &[0, 1]);
    let shifted = projection(&rig, 0, &x) + nalgebra::Vector2::new(2.0, 0.0);
    ds.annotate(key(0, 0, NOSE), shifted);

    let engine = active_engine(&mut ds);

    let obs: Vec<_> = [0, 1]
        .iter()
        .map(|&cam| (cam, ds.keypoint(key(0, cam, NOSE)).expect("kp").position))
        .collect();
    let est = rig.triangulate(&obs).expect("triangulated");
    let expected: f64 = obs
        .iter()
        .map(|(cam, p)| (projection(&rig, *cam, &est) - p).norm() / 3.0)
        .sum();
    let got = engine.errors()[0].reprojection[NOSE];
    assert!(got > 0.1, "noisy annotation should show up, got {got}");
    assert_abs_diff_eq!(got, expected, epsilon = 1e-9);
}

#[test]
fn suppressed_keypoint_is_never_reprojected() {
    let rig = rig();
    let mut ds = dataset(1);
    let x = Pt3::new(0.0, 0.0, 900.0);
    annotate_exact(&mut ds, &rig, 0, NOSE, &x, &[0, 1]);
    ds.suppress(key(0, 2, NOSE));
    let before = ds.keypoint(key(0, 2, NOSE)).copied().expect("kp");

    let mut engine = active_engine(&mut ds);
    engine.recompute_capture(&mut ds, 0);

    assert_eq!(ds.keypoint(key(0, 2, NOSE)), Some(&before));
    assert_eq!(ds.count_state(KeypointState::Reprojected), 0);
}

#[test]
fn losing_support_demotes_reprojections() {
    let rig = rig();
    let mut ds = dataset(1);
    let x = Pt3::new(10.0, -5.0, 1000.0);
    annotate_exact(&mut ds, &rig, 0, NOSE, &x, &[0, 1]);
    let noisy = projection(&rig, 1, &x) + nalgebra::Vector2::new(0.0, 3.0);
    ds.annotate(key(0, 1, NOSE), noisy);

    let mut engine = active_engine(&mut ds);
    assert_eq!(state(&ds, key(0, 2, NOSE)), KeypointState::Reprojected);
    assert!(engine.errors()[0].reprojection[NOSE] > 0.0);

    ds.clear(key(0, 1, NOSE));
    engine.recompute_capture(&mut ds, 0);
    assert_eq!(state(&ds, key(0, 2, NOSE)), KeypointState::NotAnnotated);
    assert_eq!(engine.errors()[0].reprojection[NOSE], 0.0);
}

#[test]
fn raising_min_views_demotes_reprojections() {
    let rig = rig();
    let mut ds = dataset(1);
    let x = Pt3::new(10.0, -5.0, 1000.0);
    annotate_exact(&mut ds, &rig, 0, NOSE, &x, &[0, 1]);
    let mut engine = active_engine(&mut ds);
    assert_eq!(ds.count_state(KeypointState::Reprojected), 1);

    engine.set_min_views(&mut ds, 3);
    assert_eq!(engine.min_views(), 3);
    assert_eq!(ds.count_state(KeypointState::Reprojected), 0);
    assert_eq!(engine.errors()[0].reprojection[NOSE], 0.0);
}

#[test]
fn out_of_bounds_projection_clears_stale_reprojection() {
    let rig = rig();
    let mut ds = Dataset::new(
        names(&["A", "B", "C"]),
        names(&["mouse"]),
        names(&["nose", "tail"]),
        Vec::new(),
    )
    .expect("dataset");
    // camera C only sees a small corner of its sensor
    let full = ImageSize::new(640, 480);
    ds.add_capture(0, vec![full, full, ImageSize::new(100, 100)])
        .expect("capture");
    let x = Pt3::new(10.0, -5.0, 1000.0);
    annotate_exact(&mut ds, &rig, 0, NOSE, &x, &[0, 1]);
    if let Some(kp) = ds.keypoint_mut(key(0, 2, NOSE)) {
        kp.state = KeypointState::Reprojected;
        kp.position = Pt2::new(50.0, 50.0);
    }

    let _engine = active_engine(&mut ds);
    assert_eq!(state(&ds, key(0, 2, NOSE)), KeypointState::NotAnnotated);
}

#[test]
fn bone_length_deviation_is_measured_in_world_units() {
    let rig = rig();
    let mut ds = dataset(1);
    let nose = Pt3::new(0.0, 0.0, 1000.0);
    let tail = Pt3::new(53.0, 0.0, 1000.0);
    annotate_exact(&mut ds, &rig, 0, NOSE, &nose, &[0, 1, 2]);
    annotate_exact(&mut ds, &rig, 0, TAIL, &tail, &[0, 2]);

    let mut engine = active_engine(&mut ds);
    let errors = &engine.errors()[0];
    assert_abs_diff_eq!(errors.bone_length[0], 3.0, epsilon = 1e-6);
    assert!(errors.bone_error(0).is_some_and(|e| (e - 3.0).abs() < 1e-6));

    // tail loses its second view: no data, stored as 0
    ds.clear(key(0, 2, TAIL));
    engine.recompute_capture(&mut ds, 0);
    let errors = &engine.errors()[0];
    assert_eq!(errors.bone_length[0], 0.0);
    assert_eq!(errors.bone_error(0), None);
}

#[test]
fn recompute_all_sweeps_every_capture_and_reports_the_focus() {
    let rig = rig();
    let mut ds = dataset(3);
    let x = Pt3::new(10.0, -5.0, 1000.0);
    annotate_exact(&mut ds, &rig, 2, NOSE, &x, &[1, 2]);

    let (tx, rx) = mpsc::channel();
    let mut engine = ReprojectionEngine::new(rig, &ds).expect("engine").with_events(tx);
    engine.set_active(&mut ds, true);

    assert_eq!(state(&ds, key(2, 0, NOSE)), KeypointState::Reprojected);
    // focus stays on capture 0, which has no annotations
    assert_eq!(engine.focus(), 0);
    assert_eq!(engine.errors()[0].reprojection[NOSE], 0.0);
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![
            ReprojectionEvent::Updated { capture: 0 },
            ReprojectionEvent::Toggled { active: true }
        ]
    );

    engine.recompute_capture(&mut ds, 2);
    let report = engine.report(&ds);
    assert_eq!(report.capture, 2);
    assert_eq!(report.frame, 20);
    assert_eq!(report.entities[0].reprojection[0].0, "nose");
    assert_eq!(report.entities[0].bone_length[0], ("nose-tail".to_string(), None));
}

#[test]
fn switching_off_removes_all_derived_state() {
    let rig = rig();
    let mut ds = dataset(2);
    let x = Pt3::new(10.0, -5.0, 1000.0);
    for capture in 0..2 {
        annotate_exact(&mut ds, &rig, capture, NOSE, &x, &[0, 1]);
    }
    let shifted = projection(&rig, 0, &x) + nalgebra::Vector2::new(1.0, 1.0);
    ds.annotate(key(0, 0, NOSE), shifted);

    let mut engine = active_engine(&mut ds);
    assert_eq!(ds.count_state(KeypointState::Reprojected), 2);
    assert!(engine.errors()[0].reprojection[NOSE] > 0.0);

    engine.set_active(&mut ds, false);
    assert!(!engine.is_active());
    assert_eq!(ds.count_state(KeypointState::Reprojected), 0);
    assert_eq!(ds.count_state(KeypointState::Annotated), 4);
    assert!(engine.errors()[0].reprojection.iter().all(|&e| e == 0.0));

    // edits while off do nothing
    engine.recompute_capture(&mut ds, 1);
    assert_eq!(ds.count_state(KeypointState::Reprojected), 0);
}
