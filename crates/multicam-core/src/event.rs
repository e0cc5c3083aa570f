use std::collections::BTreeMap;

/// Messages from calibration workers to whoever drives the run.
///
/// For a given worker, `Progress` counts never decrease and exactly one of
/// `Completed`, `Error` or `Cancelled` is sent, last.
#[derive(Clone, Debug, PartialEq)]
pub enum CalibrationEvent {
    Progress {
        worker: usize,
        frames_done: usize,
        frames_total: usize,
    },
    Completed {
        worker: usize,
        mean_reprojection_error: f64,
        /// RMS error per camera whose intrinsics this worker estimated.
        intrinsics_errors: BTreeMap<String, f64>,
    },
    Error {
        worker: usize,
        message: String,
    },
    Cancelled {
        worker: usize,
    },
}

impl CalibrationEvent {
    pub fn worker(&self) -> usize {
        match self {
            CalibrationEvent::Progress { worker, .. }
            | CalibrationEvent::Completed { worker, .. }
            | CalibrationEvent::Error { worker, .. }
            | CalibrationEvent::Cancelled { worker } => *worker,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CalibrationEvent::Progress { .. })
    }
}
