use multicam_core::Pt2;
use serde::{Deserialize, Serialize};

/// Annotation state of one keypoint in one camera view.
///
/// `Annotated`, `NotAnnotated` and `Suppressed` are set by the annotator;
/// only the reprojection engine produces `Reprojected` and it never touches
/// a `Suppressed` keypoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeypointState {
    #[default]
    NotAnnotated,
    Annotated,
    Reprojected,
    Suppressed,
}

/// Position and state of one keypoint in one camera view.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub state: KeypointState,
    pub position: Pt2,
}

impl Default for Keypoint {
    fn default() -> Self {
        Self {
            state: KeypointState::NotAnnotated,
            position: Pt2::origin(),
        }
    }
}

impl Keypoint {
    pub fn annotated(position: Pt2) -> Self {
        Self {
            state: KeypointState::Annotated,
            position,
        }
    }

    #[inline]
    pub fn is_annotated(&self) -> bool {
        self.state == KeypointState::Annotated
    }

    #[inline]
    pub fn is_reprojected(&self) -> bool {
        self.state == KeypointState::Reprojected
    }

    #[inline]
    pub fn is_suppressed(&self) -> bool {
        self.state == KeypointState::Suppressed
    }
}

/// Address of a keypoint in a [`crate::Dataset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeypointKey {
    pub capture: usize,
    pub camera: usize,
    pub entity: usize,
    pub bodypart: usize,
}

impl KeypointKey {
    pub fn new(capture: usize, camera: usize, entity: usize, bodypart: usize) -> Self {
        Self {
            capture,
            camera,
            entity,
            bodypart,
        }
    }
}
