//! Propagates annotations across views: triangulate every bodypart from its
//! annotated views, reproject it into the remaining cameras and keep
//! reprojection and bone-length error statistics.

use std::sync::mpsc::Sender;

use multicam_core::{Pt2, Pt3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{CameraRig, Dataset, KeypointKey, KeypointState, RigError};

/// Minimum number of annotated views used when none is configured.
pub const DEFAULT_MIN_VIEWS: usize = 2;

/// Notifications for whoever displays the dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReprojectionEvent {
    /// Keypoints and error statistics of `capture` were recomputed.
    Updated { capture: usize },
    /// The engine was switched on or off.
    Toggled { active: bool },
}

/// Error statistics of one entity for the last recomputed capture.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityErrors {
    /// Mean reprojection error per bodypart; 0 without enough views.
    pub reprojection: Vec<f64>,
    /// `|distance - expected length|` per skeleton edge; 0 without data.
    pub bone_length: Vec<f64>,
    /// Whether both endpoints of each edge were triangulated.
    pub bone_measured: Vec<bool>,
}

impl EntityErrors {
    fn zeros(bodyparts: usize, edges: usize) -> Self {
        Self {
            reprojection: vec![0.0; bodyparts],
            bone_length: vec![0.0; edges],
            bone_measured: vec![false; edges],
        }
    }

    fn reset(&mut self) {
        self.reprojection.fill(0.0);
        self.bone_length.fill(0.0);
        self.bone_measured.fill(false);
    }

    /// Bone-length error of an edge, `None` when it could not be measured.
    pub fn bone_error(&self, edge: usize) -> Option<f64> {
        self.bone_measured
            .get(edge)
            .copied()
            .filter(|&m| m)
            .and_then(|_| self.bone_length.get(edge).copied())
    }
}

/// Serializable snapshot of the error statistics of one capture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub capture: usize,
    pub frame: usize,
    pub min_views: usize,
    pub entities: Vec<EntityReport>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityReport {
    pub entity: String,
    pub reprojection: Vec<(String, f64)>,
    pub bone_length: Vec<(String, Option<f64>)>,
}

/// Triangulation and reprojection of keypoint annotations.
///
/// The engine owns only derived state (error statistics); keypoints live
/// in the [`Dataset`] passed to every call.
#[derive(Debug)]
pub struct ReprojectionEngine {
    rig: CameraRig,
    min_views: usize,
    active: bool,
    focus: usize,
    errors: Vec<EntityErrors>,
    events: Option<Sender<ReprojectionEvent>>,
}

impl ReprojectionEngine {
    /// Inactive engine for `dataset`; the rig must list the dataset's
    /// cameras in the same order.
    pub fn new(rig: CameraRig, dataset: &Dataset) -> Result<Self, RigError> {
        if rig.len() != dataset.num_cameras() {
            return Err(RigError::Length {
                expected: dataset.num_cameras(),
                got: rig.len(),
            });
        }
        if let Some((name, _)) = rig
            .names()
            .zip(dataset.camera_names())
            .find(|(a, b)| *a != b.as_str())
        {
            return Err(RigError::InvalidCamera(name.to_string()));
        }
        let errors = vec![
            EntityErrors::zeros(dataset.bodyparts().len(), dataset.skeleton().len());
            dataset.entities().len()
        ];
        Ok(Self {
            rig,
            min_views: DEFAULT_MIN_VIEWS,
            active: false,
            focus: 0,
            errors,
            events: None,
        })
    }

    pub fn with_events(mut self, events: Sender<ReprojectionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn rig(&self) -> &CameraRig {
        &self.rig
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn min_views(&self) -> usize {
        self.min_views
    }

    /// Capture the published statistics describe.
    pub fn focus(&self) -> usize {
        self.focus
    }

    /// Error statistics per entity, in dataset entity order.
    pub fn errors(&self) -> &[EntityErrors] {
        &self.errors
    }

    pub fn entity_errors(&self, entity: usize) -> Option<&EntityErrors> {
        self.errors.get(entity)
    }

    fn notify(&self, event: ReprojectionEvent) {
        if let Some(tx) = &self.events {
            // a dropped receiver only means nobody is watching
            let _ = tx.send(event);
        }
    }

    /// Switch the engine on (recomputing everything) or off (removing every
    /// reprojected keypoint and all statistics).
    pub fn set_active(&mut self, dataset: &mut Dataset, active: bool) {
        self.active = active;
        if active {
            self.recompute_all(dataset);
        } else {
            let mut demoted = 0;
            for kp in dataset.keypoints_mut() {
                if kp.state == KeypointState::Reprojected {
                    kp.state = KeypointState::NotAnnotated;
                    demoted += 1;
                }
            }
            self.errors.iter_mut().for_each(EntityErrors::reset);
            log::info!("reprojection off, {demoted} keypoints cleared");
        }
        self.notify(ReprojectionEvent::Toggled { active });
    }

    /// Change the number of annotated views needed for triangulation and
    /// recompute every capture. Values below 2 are raised to 2.
    pub fn set_min_views(&mut self, dataset: &mut Dataset, min_views: usize) {
        self.min_views = min_views.max(2);
        self.recompute_all(dataset);
    }

    /// Recompute one capture and make it the focus. No-op while inactive
    /// or for an unknown capture.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, dataset), fields(min_views = self.min_views))
    )]
    pub fn recompute_capture(&mut self, dataset: &mut Dataset, capture: usize) {
        if !self.active {
            return;
        }
        if capture >= dataset.num_captures() {
            log::warn!(
                "capture {capture} out of range ({} captures)",
                dataset.num_captures()
            );
            return;
        }
        self.focus = capture;
        self.recompute(dataset, capture);
        self.notify(ReprojectionEvent::Updated { capture });
    }

    /// Recompute every capture, then the focused one again so the
    /// statistics describe it.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, dataset), fields(captures = dataset.num_captures()))
    )]
    pub fn recompute_all(&mut self, dataset: &mut Dataset) {
        if !self.active {
            return;
        }
        for capture in 0..dataset.num_captures() {
            self.recompute(dataset, capture);
        }
        log::debug!(
            "recomputed {} captures, {} keypoints reprojected",
            dataset.num_captures(),
            dataset.count_state(KeypointState::Reprojected)
        );
        if self.focus < dataset.num_captures() {
            self.recompute_capture(dataset, self.focus);
        }
    }

    /// Resize the statistics to the entities, bodyparts and skeleton of
    /// `dataset`. Entries of a matching shape keep their values.
    fn fit_shape(&mut self, dataset: &Dataset) {
        let bodyparts = dataset.bodyparts().len();
        let edges = dataset.skeleton().len();
        let entities = dataset.entities().len();
        if self.errors.len() != entities {
            log::debug!("error table resized to {entities} entities");
        }
        self.errors
            .resize_with(entities, || EntityErrors::zeros(bodyparts, edges));
        for errors in &mut self.errors {
            if errors.reprojection.len() != bodyparts || errors.bone_length.len() != edges {
                *errors = EntityErrors::zeros(bodyparts, edges);
            }
        }
    }

    fn recompute(&mut self, dataset: &mut Dataset, capture: usize) {
        if dataset.num_cameras() != self.rig.len() {
            log::warn!(
                "dataset has {} cameras, rig has {}; capture {capture} skipped",
                dataset.num_cameras(),
                self.rig.len()
            );
            return;
        }
        self.fit_shape(dataset);
        let bodyparts = dataset.bodyparts().len();
        let edges = dataset.skeleton_indices().to_vec();
        let lengths: Vec<f64> = dataset.skeleton().iter().map(|e| e.length).collect();
        for entity in 0..dataset.entities().len() {
            let points: Vec<Option<Pt3>> = (0..bodyparts)
                .map(|bp| self.recompute_bodypart(dataset, capture, entity, bp))
                .collect();
            let errors = &mut self.errors[entity];
            for (i, &(a, b)) in edges.iter().enumerate() {
                match (points[a], points[b]) {
                    (Some(xa), Some(xb)) => {
                        errors.bone_length[i] = ((xa - xb).norm() - lengths[i]).abs();
                        errors.bone_measured[i] = true;
                    }
                    _ => {
                        errors.bone_length[i] = 0.0;
                        errors.bone_measured[i] = false;
                    }
                }
            }
        }
    }

    /// Triangulate one bodypart, update the other views and its error
    /// entry. Returns the 3D point when there was enough support.
    fn recompute_bodypart(
        &mut self,
        dataset: &mut Dataset,
        capture: usize,
        entity: usize,
        bodypart: usize,
    ) -> Option<Pt3> {
        let cameras = dataset.num_cameras();
        let key = |camera| KeypointKey::new(capture, camera, entity, bodypart);

        let trusted: Vec<(usize, Pt2)> = (0..cameras)
            .filter_map(|cam| {
                dataset
                    .keypoint(key(cam))
                    .filter(|kp| kp.is_annotated())
                    .map(|kp| (cam, kp.position))
            })
            .collect();

        let solved = if trusted.len() >= self.min_views {
            self.rig.triangulate(&trusted).and_then(|x| {
                let projected = self.rig.project_all(&x);
                // a point behind an annotated camera is no solution
                trusted
                    .iter()
                    .all(|(cam, _)| projected[*cam].is_some())
                    .then_some((x, projected))
            })
        } else {
            None
        };

        let Some((x, projected)) = solved else {
            if trusted.len() >= self.min_views {
                log::debug!("capture {capture} entity {entity} bodypart {bodypart}: degenerate");
            }
            self.errors[entity].reprojection[bodypart] = 0.0;
            for cam in 0..cameras {
                if let Some(kp) = dataset.keypoint_mut(key(cam)) {
                    if kp.is_reprojected() {
                        kp.state = KeypointState::NotAnnotated;
                    }
                }
            }
            return None;
        };

        let mut error = 0.0;
        for (cam, proj) in projected.iter().copied().enumerate() {
            let size = dataset.image_size(capture, cam);
            let Some(kp) = dataset.keypoint_mut(key(cam)) else {
                continue;
            };
            let is_trusted = trusted.iter().any(|(c, _)| *c == cam);
            if is_trusted {
                if let Some(p) = proj {
                    error += (kp.position - p).norm() / cameras as f64;
                }
                continue;
            }
            match proj.filter(|p| size.is_some_and(|s| s.contains(p))) {
                Some(p) if !kp.is_suppressed() => {
                    kp.state = KeypointState::Reprojected;
                    kp.position = p;
                }
                Some(_) => {}
                None => {
                    if kp.is_reprojected() {
                        kp.state = KeypointState::NotAnnotated;
                    }
                }
            }
        }
        self.errors[entity].reprojection[bodypart] = error;
        Some(x)
    }

    /// Snapshot of the current statistics with dataset names attached.
    pub fn report(&self, dataset: &Dataset) -> ErrorReport {
        let entities = dataset
            .entities()
            .iter()
            .zip(&self.errors)
            .map(|(name, errors)| EntityReport {
                entity: name.clone(),
                reprojection: dataset
                    .bodyparts()
                    .iter()
                    .cloned()
                    .zip(errors.reprojection.iter().copied())
                    .collect(),
                bone_length: dataset
                    .skeleton()
                    .iter()
                    .enumerate()
                    .map(|(i, edge)| (edge.label(), errors.bone_error(i)))
                    .collect(),
            })
            .collect();
        ErrorReport {
            capture: self.focus,
            frame: dataset
                .captures()
                .get(self.focus)
                .map(|c| c.frame)
                .unwrap_or_default(),
            min_views: self.min_views,
            entities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SkeletonEdge;
    use multicam_core::{CameraIntrinsics, Distortion, ImageSize, Iso3};

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn setup() -> (ReprojectionEngine, Dataset) {
        let cam = CameraIntrinsics::from_params(500.0, 500.0, 320.0, 240.0, Distortion::default());
        let rig = CameraRig::new(
            &names(&["A", "B"]),
            vec![cam.clone(), cam],
            vec![Iso3::identity(), Iso3::translation(-100.0, 0.0, 0.0)],
            0,
        )
        .expect("rig");
        let mut ds = Dataset::new(
            names(&["A", "B"]),
            names(&["m"]),
            names(&["nose", "tail"]),
            vec![SkeletonEdge::new("nose", "tail", 10.0)],
        )
        .expect("dataset");
        ds.add_capture(0, vec![ImageSize::new(640, 480); 2]).expect("capture");
        let engine = ReprojectionEngine::new(rig, &ds).expect("engine");
        (engine, ds)
    }

    #[test]
    fn inactive_engine_leaves_dataset_alone() {
        let (mut engine, mut ds) = setup();
        ds.annotate(KeypointKey::new(0, 0, 0, 0), Pt2::new(320.0, 240.0));
        engine.recompute_capture(&mut ds, 0);
        assert_eq!(ds.count_state(KeypointState::Reprojected), 0);
    }

    #[test]
    fn min_views_never_drops_below_two() {
        let (mut engine, mut ds) = setup();
        engine.set_min_views(&mut ds, 0);
        assert_eq!(engine.min_views(), 2);
    }

    #[test]
    fn rig_camera_order_must_match_dataset() {
        let (engine, _) = setup();
        let ds = Dataset::new(names(&["B", "A"]), names(&["m"]), names(&["n"]), Vec::new())
            .expect("dataset");
        let err = ReprojectionEngine::new(engine.rig().clone(), &ds).expect_err("mismatch");
        assert!(matches!(err, RigError::InvalidCamera(ref name) if name == "A"));
    }

    #[test]
    fn larger_dataset_resizes_statistics() {
        let (mut engine, _) = setup();
        let mut big = Dataset::new(
            names(&["A", "B"]),
            names(&["m", "f", "p"]),
            names(&["nose", "ear", "neck", "tail"]),
            vec![
                SkeletonEdge::new("nose", "ear", 2.0),
                SkeletonEdge::new("ear", "neck", 3.0),
                SkeletonEdge::new("neck", "tail", 8.0),
            ],
        )
        .expect("dataset");
        big.add_capture(0, vec![ImageSize::new(640, 480); 2]).expect("capture");
        // point (0, 0, 1000) seen by both cameras, entity 2, bodypart 3
        big.annotate(KeypointKey::new(0, 0, 2, 3), Pt2::new(320.0, 240.0));
        big.annotate(KeypointKey::new(0, 1, 2, 3), Pt2::new(270.0, 240.0));

        engine.set_active(&mut big, true);

        assert_eq!(engine.errors().len(), 3);
        for errors in engine.errors() {
            assert_eq!(errors.reprojection.len(), 4);
            assert_eq!(errors.bone_length.len(), 3);
        }
        assert!(engine.errors()[2].reprojection[3] < 1e-6);
        assert_eq!(engine.report(&big).entities.len(), 3);
    }

    #[test]
    fn camera_count_mismatch_is_skipped() {
        let (mut engine, _) = setup();
        let mut wide = Dataset::new(names(&["A", "B", "C"]), names(&["m"]), names(&["n"]), vec![])
            .expect("dataset");
        wide.add_capture(0, vec![ImageSize::new(640, 480); 3]).expect("capture");
        wide.annotate(KeypointKey::new(0, 0, 0, 0), Pt2::new(320.0, 240.0));
        wide.annotate(KeypointKey::new(0, 1, 0, 0), Pt2::new(270.0, 240.0));
        engine.set_active(&mut wide, true);
        assert_eq!(wide.count_state(KeypointState::Reprojected), 0);
    }

    #[test]
    fn unmeasured_bone_reads_as_none() {
        let (engine, _) = setup();
        assert_eq!(engine.errors()[0].bone_length, vec![0.0]);
        assert_eq!(engine.errors()[0].bone_error(0), None);
        assert_eq!(engine.errors()[0].bone_error(7), None);
    }
}
