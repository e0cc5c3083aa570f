//! Core types and utilities for multi-camera rig calibration.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete corner detector, video decoder or UI toolkit.
//!
//! Contents:
//! - grayscale image views and bilinear sampling,
//! - normalized DLT homography estimation,
//! - the pinhole + Brown-Conrady camera model,
//! - pose parameterization and epipolar matrices,
//! - calibration configuration and camera topologies,
//! - on-disk intrinsics/extrinsics parameter files,
//! - the shared error taxonomy and worker events.

mod camera;
mod config;
mod error;
mod event;
mod homography;
mod image;
mod logger;
mod params_io;
mod pose;
mod topology;

pub use camera::{CameraIntrinsics, Distortion};
pub use config::{CalibrationConfig, ConfigIoError};
pub use error::{CalibrationError, ParamIoError};
pub use event::CalibrationEvent;
pub use homography::{estimate_homography, Homography};
pub use image::{mean_intensity, sample_bilinear, GrayImage, GrayImageView, ImageSize};
pub use params_io::{
    extrinsics_file_name, intrinsics_file_name, read_extrinsics, read_intrinsics,
    try_read_intrinsics, write_extrinsics, write_intrinsics, ExtrinsicsRecord, IntrinsicsRecord,
    StoredMatrix, EXTRINSICS_DIR, INTRINSICS_DIR,
};
pub use pose::{
    essential_from_pose, fundamental_from_essential, planar_pose_from_homography,
    pose_from_params, pose_to_params, project_to_rotation, skew, Extrinsics,
};
pub use topology::CameraTopology;

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;

/// Scalar type used throughout the workspace.
pub type Real = f64;
/// 2D point in pixels or normalized image coordinates.
pub type Pt2 = nalgebra::Point2<Real>;
/// 3D point in a camera or board frame.
pub type Pt3 = nalgebra::Point3<Real>;
/// Rigid transform `X_dst = R * X_src + t`.
pub type Iso3 = nalgebra::Isometry3<Real>;
