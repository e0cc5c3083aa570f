mod support;

use assert_cmd::Command;
use multicam::reproject::{Dataset, KeypointKey, KeypointState};
use predicates::str::contains;
use support::{write_dataset, write_rig};

fn multicam() -> Command {
    Command::cargo_bin("multicam").expect("binary")
}

#[test]
fn check_params_accepts_complete_rig() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_rig(dir.path(), dir.path());
    multicam()
        .args(["check-params", "--cameras", "Camera_A,Camera_B,Camera_C", "--primary", "Camera_A"])
        .arg("--intrinsics")
        .arg(dir.path())
        .arg("--extrinsics")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(contains("ok: 3 cameras, primary Camera_A"));
}

#[test]
fn check_params_names_the_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_rig(dir.path(), dir.path());
    multicam()
        .args(["check-params", "--cameras", "Camera_A,Camera_B,Camera_C", "--primary", "Camera_B"])
        .arg("--intrinsics")
        .arg(dir.path())
        .arg("--extrinsics")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(contains("Extrinsics_Camera_B_Camera_A.json"));
}

#[test]
fn reproject_writes_dataset_and_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_rig(dir.path(), dir.path());
    let input = dir.path().join("dataset.json");
    let output = dir.path().join("reprojected.json");
    let report = dir.path().join("report.json");
    write_dataset(&input);

    multicam()
        .arg("reproject")
        .arg("--dataset")
        .arg(&input)
        .arg("--intrinsics")
        .arg(dir.path())
        .arg("--extrinsics")
        .arg(dir.path())
        .args(["--primary", "Camera_A", "--min-views", "2"])
        .arg("--output")
        .arg(&output)
        .arg("--report")
        .arg(&report)
        .assert()
        .success();

    let ds = Dataset::load_json(&output).expect("output dataset");
    assert_eq!(
        ds.keypoint(KeypointKey::new(0, 2, 0, 0)).map(|k| k.state),
        Some(KeypointState::Reprojected)
    );
    let raw = std::fs::read_to_string(&report).expect("report");
    let json: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(json[0]["frame"], 42);
}
