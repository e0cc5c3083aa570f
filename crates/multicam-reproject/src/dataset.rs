//! Keypoint arena: every keypoint of every capture, camera, entity and
//! bodypart lives in one flat vector addressed by [`KeypointKey`].

use std::fs;
use std::path::{Path, PathBuf};

use multicam_core::{ImageSize, Pt2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Keypoint, KeypointKey, KeypointState};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset needs at least one {0}")]
    Empty(&'static str),
    #[error("duplicate {kind} name {name:?}")]
    Duplicate { kind: &'static str, name: String },
    #[error("skeleton edge {a}-{b} references an unknown bodypart")]
    UnknownBodypart { a: String, b: String },
    #[error("skeleton edge {a}-{b} has invalid length {length}")]
    InvalidLength { a: String, b: String, length: f64 },
    #[error("capture {capture}: expected {expected} {what}, got {got}")]
    Shape {
        capture: usize,
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed dataset {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Two bodyparts with the expected physical distance between them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkeletonEdge {
    #[serde(rename = "keypointA")]
    pub keypoint_a: String,
    #[serde(rename = "keypointB")]
    pub keypoint_b: String,
    pub length: f64,
}

impl SkeletonEdge {
    pub fn new(keypoint_a: impl Into<String>, keypoint_b: impl Into<String>, length: f64) -> Self {
        Self {
            keypoint_a: keypoint_a.into(),
            keypoint_b: keypoint_b.into(),
            length,
        }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.keypoint_a, self.keypoint_b)
    }
}

/// One synchronized multi-camera capture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    /// Frame index in the source recordings.
    pub frame: usize,
    /// Image size per camera.
    pub image_sizes: Vec<ImageSize>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptureFile {
    frame: usize,
    image_sizes: Vec<ImageSize>,
    /// `[camera][entity][bodypart]`, flattened.
    keypoints: Vec<Keypoint>,
}

#[derive(Serialize, Deserialize)]
struct DatasetFile {
    cameras: Vec<String>,
    entities: Vec<String>,
    bodyparts: Vec<String>,
    #[serde(default)]
    skeleton: Vec<SkeletonEdge>,
    captures: Vec<CaptureFile>,
}

/// Annotation dataset of a camera rig.
#[derive(Clone, Debug)]
pub struct Dataset {
    cameras: Vec<String>,
    entities: Vec<String>,
    bodyparts: Vec<String>,
    skeleton: Vec<SkeletonEdge>,
    edges: Vec<(usize, usize)>,
    captures: Vec<Capture>,
    keypoints: Vec<Keypoint>,
}

fn check_names(kind: &'static str, names: &[String]) -> Result<(), DatasetError> {
    if names.is_empty() {
        return Err(DatasetError::Empty(kind));
    }
    for (i, name) in names.iter().enumerate() {
        if names[..i].contains(name) {
            return Err(DatasetError::Duplicate {
                kind,
                name: name.clone(),
            });
        }
    }
    Ok(())
}

impl Dataset {
    /// Empty dataset (no captures) for the given rig and label set.
    pub fn new(
        cameras: Vec<String>,
        entities: Vec<String>,
        bodyparts: Vec<String>,
        skeleton: Vec<SkeletonEdge>,
    ) -> Result<Self, DatasetError> {
        check_names("camera", &cameras)?;
        check_names("entity", &entities)?;
        check_names("bodypart", &bodyparts)?;

        let mut edges = Vec::with_capacity(skeleton.len());
        for edge in &skeleton {
            let a = bodyparts.iter().position(|b| *b == edge.keypoint_a);
            let b = bodyparts.iter().position(|b| *b == edge.keypoint_b);
            let (Some(a), Some(b)) = (a, b) else {
                return Err(DatasetError::UnknownBodypart {
                    a: edge.keypoint_a.clone(),
                    b: edge.keypoint_b.clone(),
                });
            };
            if !edge.length.is_finite() || edge.length < 0.0 {
                return Err(DatasetError::InvalidLength {
                    a: edge.keypoint_a.clone(),
                    b: edge.keypoint_b.clone(),
                    length: edge.length,
                });
            }
            edges.push((a, b));
        }

        Ok(Self {
            cameras,
            entities,
            bodyparts,
            skeleton,
            edges,
            captures: Vec::new(),
            keypoints: Vec::new(),
        })
    }

    /// Append a capture with all keypoints `NotAnnotated`; returns its index.
    pub fn add_capture(
        &mut self,
        frame: usize,
        image_sizes: Vec<ImageSize>,
    ) -> Result<usize, DatasetError> {
        let capture = self.captures.len();
        if image_sizes.len() != self.cameras.len() {
            return Err(DatasetError::Shape {
                capture,
                what: "image sizes",
                expected: self.cameras.len(),
                got: image_sizes.len(),
            });
        }
        self.captures.push(Capture { frame, image_sizes });
        self.keypoints
            .resize(self.keypoints.len() + self.per_capture(), Keypoint::default());
        Ok(capture)
    }

    pub fn camera_names(&self) -> &[String] {
        &self.cameras
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn bodyparts(&self) -> &[String] {
        &self.bodyparts
    }

    pub fn skeleton(&self) -> &[SkeletonEdge] {
        &self.skeleton
    }

    /// Bodypart indices of every skeleton edge.
    pub fn skeleton_indices(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn captures(&self) -> &[Capture] {
        &self.captures
    }

    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn num_captures(&self) -> usize {
        self.captures.len()
    }

    pub fn entity_index(&self, name: &str) -> Option<usize> {
        self.entities.iter().position(|e| e == name)
    }

    pub fn bodypart_index(&self, name: &str) -> Option<usize> {
        self.bodyparts.iter().position(|b| b == name)
    }

    pub fn image_size(&self, capture: usize, camera: usize) -> Option<ImageSize> {
        self.captures.get(capture)?.image_sizes.get(camera).copied()
    }

    fn per_capture(&self) -> usize {
        self.cameras.len() * self.entities.len() * self.bodyparts.len()
    }

    fn index(&self, key: KeypointKey) -> Option<usize> {
        if key.capture >= self.captures.len()
            || key.camera >= self.cameras.len()
            || key.entity >= self.entities.len()
            || key.bodypart >= self.bodyparts.len()
        {
            return None;
        }
        let view = key.capture * self.cameras.len() + key.camera;
        let cell = view * self.entities.len() + key.entity;
        Some(cell * self.bodyparts.len() + key.bodypart)
    }

    pub fn keypoint(&self, key: KeypointKey) -> Option<&Keypoint> {
        self.index(key).map(|i| &self.keypoints[i])
    }

    pub fn keypoint_mut(&mut self, key: KeypointKey) -> Option<&mut Keypoint> {
        self.index(key).map(move |i| &mut self.keypoints[i])
    }

    /// Mark a keypoint as annotated at `position`. `false` for a bad key.
    pub fn annotate(&mut self, key: KeypointKey, position: Pt2) -> bool {
        self.keypoint_mut(key)
            .map(|kp| *kp = Keypoint::annotated(position))
            .is_some()
    }

    /// Reset a keypoint to `NotAnnotated`.
    pub fn clear(&mut self, key: KeypointKey) -> bool {
        self.set_state(key, KeypointState::NotAnnotated)
    }

    /// Exclude a keypoint from reprojection.
    pub fn suppress(&mut self, key: KeypointKey) -> bool {
        self.set_state(key, KeypointState::Suppressed)
    }

    fn set_state(&mut self, key: KeypointKey, state: KeypointState) -> bool {
        self.keypoint_mut(key).map(|kp| kp.state = state).is_some()
    }

    /// Every keypoint with its state, for bulk passes.
    pub(crate) fn keypoints_mut(&mut self) -> &mut [Keypoint] {
        &mut self.keypoints
    }

    /// Number of keypoints in `state` over the whole dataset.
    pub fn count_state(&self, state: KeypointState) -> usize {
        self.keypoints.iter().filter(|kp| kp.state == state).count()
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: DatasetFile = serde_json::from_str(&raw).map_err(|source| DatasetError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_file(file)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), DatasetError> {
        let path = path.as_ref();
        let json =
            serde_json::to_string_pretty(&self.to_file()).map_err(|source| DatasetError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        fs::write(path, json).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_file(file: DatasetFile) -> Result<Self, DatasetError> {
        let mut ds = Self::new(file.cameras, file.entities, file.bodyparts, file.skeleton)?;
        let per_capture = ds.per_capture();
        for (capture, c) in file.captures.into_iter().enumerate() {
            if c.keypoints.len() != per_capture {
                return Err(DatasetError::Shape {
                    capture,
                    what: "keypoints",
                    expected: per_capture,
                    got: c.keypoints.len(),
                });
            }
            ds.add_capture(c.frame, c.image_sizes)?;
            let start = capture * per_capture;
            ds.keypoints[start..start + per_capture].copy_from_slice(&c.keypoints);
        }
        Ok(ds)
    }

    fn to_file(&self) -> DatasetFile {
        let per_capture = self.per_capture();
        let captures = self
            .captures
            .iter()
            .zip(self.keypoints.chunks(per_capture.max(1)))
            .map(|(c, kps)| CaptureFile {
                frame: c.frame,
                image_sizes: c.image_sizes.clone(),
                keypoints: kps.to_vec(),
            })
            .collect();
        DatasetFile {
            cameras: self.cameras.clone(),
            entities: self.entities.clone(),
            bodyparts: self.bodyparts.clone(),
            skeleton: self.skeleton.clone(),
            captures,
        }
    }
}
