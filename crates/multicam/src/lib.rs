//! High-level facade crate for the `multicam-*` workspace.
//!
//! This crate provides:
//! - re-exports of the underlying crates,
//! - file-level helpers used by the `multicam` command line tool
//!   ([`compose_extrinsics_files`], [`reproject_dataset`]).
//!
//! ## Quickstart
//!
//! ```no_run
//! use multicam::reproject::{CameraRig, Dataset};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut dataset = Dataset::load_json("dataset.json")?;
//! let rig = CameraRig::load("params/Intrinsics", "params/Extrinsics", dataset.camera_names(), 0)?;
//! let reports = multicam::reproject_dataset(&mut dataset, rig, 2)?;
//! dataset.write_json("dataset_reprojected.json")?;
//! println!("{} captures processed", reports.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `multicam::core`: camera model, poses, parameter files, configuration.
//! - `multicam::calib`: checkerboard calibration of pairs and triplets.
//! - `multicam::reproject`: keypoint dataset, triangulation, reprojection engine.

mod tools;

pub use multicam_calib as calib;
pub use multicam_core as core;
pub use multicam_reproject as reproject;

pub use multicam_calib::{CalibrationOrchestrator, CancellationToken};
pub use multicam_core::{CalibrationConfig, CalibrationError, CalibrationEvent, CameraTopology};
pub use multicam_reproject::{CameraRig, Dataset, ReprojectionEngine};

pub use tools::{compose_extrinsics_files, leg_camera_names, reproject_dataset, ToolError};
