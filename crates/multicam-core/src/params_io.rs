//! On-disk camera parameter files.
//!
//! Layout under a calibration set directory:
//!
//! ```text
//! Intrinsics/Intrinsics_<camera>.json      intrinsicMatrix, distortionCoefficients
//! Extrinsics/Extrinsics_<first>_<second>.json   R, T, E, F
//! ```
//!
//! Matrices are stored as `{ "rows", "cols", "data" }` with row-major data.
//! `intrinsicMatrix` and `R` are stored transposed (column-vector convention
//! of the consumers reading these files).

use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::{Matrix3, Vector3};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{CameraIntrinsics, Distortion, Extrinsics, ParamIoError};

pub const INTRINSICS_DIR: &str = "Intrinsics";
pub const EXTRINSICS_DIR: &str = "Extrinsics";

pub fn intrinsics_file_name(camera: &str) -> String {
    format!("Intrinsics_{camera}.json")
}

pub fn extrinsics_file_name(first: &str, second: &str) -> String {
    format!("Extrinsics_{first}_{second}.json")
}

/// Dense matrix in row-major order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl StoredMatrix {
    pub fn from_matrix3(m: &Matrix3<f64>) -> Self {
        let mut data = Vec::with_capacity(9);
        for r in 0..3 {
            for c in 0..3 {
                data.push(m[(r, c)]);
            }
        }
        Self {
            rows: 3,
            cols: 3,
            data,
        }
    }

    /// Single-row matrix.
    pub fn row(values: &[f64]) -> Self {
        Self {
            rows: 1,
            cols: values.len(),
            data: values.to_vec(),
        }
    }

    /// Single-column matrix.
    pub fn column(values: &[f64]) -> Self {
        Self {
            rows: values.len(),
            cols: 1,
            data: values.to_vec(),
        }
    }

    fn check_len(&self, name: &'static str) -> Result<(), ParamIoError> {
        if self.data.len() != self.rows * self.cols {
            return Err(ParamIoError::Shape {
                name,
                expected: (self.rows, self.cols),
                got: (self.data.len(), 1),
            });
        }
        Ok(())
    }

    pub fn to_matrix3(&self, name: &'static str) -> Result<Matrix3<f64>, ParamIoError> {
        self.check_len(name)?;
        if (self.rows, self.cols) != (3, 3) {
            return Err(ParamIoError::Shape {
                name,
                expected: (3, 3),
                got: (self.rows, self.cols),
            });
        }
        Ok(Matrix3::from_row_slice(&self.data))
    }

    pub fn to_vector3(&self, name: &'static str) -> Result<Vector3<f64>, ParamIoError> {
        self.check_len(name)?;
        if self.data.len() != 3 || (self.rows != 1 && self.cols != 1) {
            return Err(ParamIoError::Shape {
                name,
                expected: (3, 1),
                got: (self.rows, self.cols),
            });
        }
        Ok(Vector3::from_column_slice(&self.data))
    }

    /// Flattened values of a row or column vector.
    pub fn to_vec(&self, name: &'static str) -> Result<Vec<f64>, ParamIoError> {
        self.check_len(name)?;
        if self.rows != 1 && self.cols != 1 {
            return Err(ParamIoError::Shape {
                name,
                expected: (1, self.data.len()),
                got: (self.rows, self.cols),
            });
        }
        Ok(self.data.clone())
    }
}

/// Serialized form of [`CameraIntrinsics`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrinsicsRecord {
    pub intrinsic_matrix: StoredMatrix,
    pub distortion_coefficients: StoredMatrix,
}

impl IntrinsicsRecord {
    pub fn from_intrinsics(cam: &CameraIntrinsics) -> Self {
        Self {
            intrinsic_matrix: StoredMatrix::from_matrix3(&cam.k.transpose()),
            distortion_coefficients: StoredMatrix::row(&cam.distortion.coefficients()),
        }
    }

    pub fn to_intrinsics(&self) -> Result<CameraIntrinsics, ParamIoError> {
        let k = self.intrinsic_matrix.to_matrix3("intrinsicMatrix")?.transpose();
        let coeffs = self
            .distortion_coefficients
            .to_vec("distortionCoefficients")?;
        let distortion =
            Distortion::from_coefficients(&coeffs).ok_or(ParamIoError::Shape {
                name: "distortionCoefficients",
                expected: (1, 5),
                got: (
                    self.distortion_coefficients.rows,
                    self.distortion_coefficients.cols,
                ),
            })?;
        Ok(CameraIntrinsics::new(k, distortion))
    }
}

/// Serialized form of [`Extrinsics`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct ExtrinsicsRecord {
    pub R: StoredMatrix,
    pub T: StoredMatrix,
    pub E: StoredMatrix,
    pub F: StoredMatrix,
}

impl ExtrinsicsRecord {
    pub fn from_extrinsics(ext: &Extrinsics) -> Self {
        Self {
            R: StoredMatrix::from_matrix3(&ext.r.transpose()),
            T: StoredMatrix::column(ext.t.as_slice()),
            E: StoredMatrix::from_matrix3(&ext.e),
            F: StoredMatrix::from_matrix3(&ext.f),
        }
    }

    pub fn to_extrinsics(&self) -> Result<Extrinsics, ParamIoError> {
        Ok(Extrinsics {
            r: self.R.to_matrix3("R")?.transpose(),
            t: self.T.to_vector3("T")?,
            e: self.E.to_matrix3("E")?,
            f: self.F.to_matrix3("F")?,
        })
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ParamIoError> {
    if !path.exists() {
        return Err(ParamIoError::MissingFile(path.to_path_buf()));
    }
    let raw = fs::read_to_string(path).map_err(|source| ParamIoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ParamIoError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write pretty JSON via a sibling temporary file and a rename, so readers
/// never observe a half-written file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ParamIoError> {
    let io_err = |source| ParamIoError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|source| ParamIoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let mut tmp = PathBuf::from(path);
    tmp.set_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

pub fn read_intrinsics(path: impl AsRef<Path>) -> Result<CameraIntrinsics, ParamIoError> {
    let record: IntrinsicsRecord = load_json(path.as_ref())?;
    record.to_intrinsics()
}

/// Read intrinsics if the file exists and is well formed.
///
/// Unreadable files are treated as absent (they will be re-estimated and
/// overwritten), with a warning.
pub fn try_read_intrinsics(path: impl AsRef<Path>) -> Option<CameraIntrinsics> {
    let path = path.as_ref();
    if !path.exists() {
        return None;
    }
    match read_intrinsics(path) {
        Ok(cam) => Some(cam),
        Err(e) => {
            log::warn!("ignoring unreadable intrinsics {}: {e}", path.display());
            None
        }
    }
}

pub fn write_intrinsics(
    path: impl AsRef<Path>,
    cam: &CameraIntrinsics,
) -> Result<(), ParamIoError> {
    write_json(path.as_ref(), &IntrinsicsRecord::from_intrinsics(cam))
}

pub fn read_extrinsics(path: impl AsRef<Path>) -> Result<Extrinsics, ParamIoError> {
    let record: ExtrinsicsRecord = load_json(path.as_ref())?;
    record.to_extrinsics()
}

pub fn write_extrinsics(path: impl AsRef<Path>, ext: &Extrinsics) -> Result<(), ParamIoError> {
    write_json(path.as_ref(), &ExtrinsicsRecord::from_extrinsics(ext))
}
