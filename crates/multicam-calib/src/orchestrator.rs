//! Runs one worker per calibration unit on a bounded thread pool.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use multicam_core::{
    CalibrationConfig, CalibrationError, CalibrationEvent, CameraTopology, Extrinsics,
};

use crate::pairwise::{calibrate_pair, scan_pair, IntrinsicsCache, PairCalibration};
use crate::rig::{PendingArtifacts, RigSolution};
use crate::source::{find_recording, pair_directory};
use crate::stereo::PairwiseParams;
use crate::{CancellationToken, CornerDetector, FrameSource, RecordingOpener};

/// What a successful unit produced.
#[derive(Clone, Debug)]
pub struct UnitOutcome {
    /// Final error of a pair, mean of both legs for a triplet.
    pub mean_reprojection_error: f64,
    pub intrinsics_errors: BTreeMap<String, f64>,
    /// Extrinsics relative to the primary camera, keyed by camera name.
    pub extrinsics: Vec<(String, Extrinsics)>,
    pub written: Vec<PathBuf>,
    pub legs: Vec<PairCalibration>,
}

/// Forwards progress of one worker, never letting the count go backwards.
struct ProgressReporter<'a> {
    worker: usize,
    events: &'a Sender<CalibrationEvent>,
    last: usize,
}

impl ProgressReporter<'_> {
    fn report(&mut self, frames_done: usize, frames_total: usize) {
        let frames_done = frames_done.max(self.last);
        self.last = frames_done;
        // receiver gone means nobody listens anymore; keep calibrating
        let _ = self.events.send(CalibrationEvent::Progress {
            worker: self.worker,
            frames_done,
            frames_total,
        });
    }
}

/// Calibrates camera pairs and triplets from checkerboard recordings.
pub struct CalibrationOrchestrator {
    config: CalibrationConfig,
    params: PairwiseParams,
    opener: Arc<dyn RecordingOpener>,
    detector: Arc<dyn CornerDetector>,
}

impl CalibrationOrchestrator {
    pub fn new(
        config: CalibrationConfig,
        opener: Arc<dyn RecordingOpener>,
        detector: Arc<dyn CornerDetector>,
    ) -> Result<Self, CalibrationError> {
        config.validate()?;
        Ok(Self {
            config,
            params: PairwiseParams::default(),
            opener,
            detector,
        })
    }

    pub fn with_params(mut self, params: PairwiseParams) -> Self {
        self.params = params;
        self
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Calibrate every unit, one worker each, and block until all are done.
    ///
    /// Worker `i` handles `units[i]`. Every worker sends non-decreasing
    /// progress events followed by exactly one terminal event. A failing
    /// unit does not affect the others. Only setup problems (output
    /// directories, thread pool) are returned as errors.
    pub fn run(
        &self,
        units: &[CameraTopology],
        events: &Sender<CalibrationEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), CalibrationError> {
        for dir in [self.config.intrinsics_dir(), self.config.extrinsics_dir()] {
            fs::create_dir_all(&dir).map_err(|e| {
                CalibrationError::Configuration(format!("cannot create {}: {e}", dir.display()))
            })?;
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_threads)
            .thread_name(|idx| format!("calib-worker-{idx}"))
            .build()
            .map_err(|e| {
                CalibrationError::Configuration(format!("failed to build thread pool: {e}"))
            })?;

        log::info!(
            "calibrating {} units on {} threads",
            units.len(),
            self.config.worker_threads
        );
        pool.scope(|s| {
            for (worker, unit) in units.iter().enumerate() {
                let events = events.clone();
                s.spawn(move |_| {
                    let terminal = self.run_worker(worker, unit, &events, cancel);
                    let _ = events.send(terminal);
                });
            }
        });
        Ok(())
    }

    fn run_worker(
        &self,
        worker: usize,
        unit: &CameraTopology,
        events: &Sender<CalibrationEvent>,
        cancel: &CancellationToken,
    ) -> CalibrationEvent {
        let mut reporter = ProgressReporter {
            worker,
            events,
            last: 0,
        };
        match self.calibrate_unit(unit, cancel, |done, total| reporter.report(done, total)) {
            Ok(outcome) => {
                log::info!(
                    "{} calibrated, mean reprojection error {:.4}",
                    unit.label(),
                    outcome.mean_reprojection_error
                );
                CalibrationEvent::Completed {
                    worker,
                    mean_reprojection_error: outcome.mean_reprojection_error,
                    intrinsics_errors: outcome.intrinsics_errors,
                }
            }
            Err(CalibrationError::Cancelled) => {
                log::info!("{} cancelled", unit.label());
                CalibrationEvent::Cancelled { worker }
            }
            Err(e) => {
                log::warn!("{} failed: {e}", unit.label());
                CalibrationEvent::Error {
                    worker,
                    message: format!("{}: {e}", unit.label()),
                }
            }
        }
    }

    fn open(
        &self,
        first: &str,
        second: &str,
        camera: &str,
    ) -> Result<Box<dyn FrameSource>, CalibrationError> {
        let dir = pair_directory(&self.config.recordings_path, first, second);
        let path = find_recording(&dir, camera)?;
        self.opener.open(&path)
    }

    /// Calibrate a single unit on the calling thread.
    ///
    /// Nothing is written unless every step succeeds. `progress` receives
    /// `(frames_done, frames_total)` summed over all legs.
    pub fn calibrate_unit(
        &self,
        unit: &CameraTopology,
        cancel: &CancellationToken,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<UnitOutcome, CalibrationError> {
        let cfg = &self.config;
        let legs = unit.legs();

        let mut sources = Vec::with_capacity(legs.len());
        for &(a, b) in &legs {
            sources.push((self.open(a, b, a)?, self.open(a, b, b)?));
        }
        let totals: Vec<usize> = sources.iter().map(|(s, _)| s.frame_count()).collect();
        let total: usize = totals.iter().sum();

        let mut cache = IntrinsicsCache::new(cfg.intrinsics_dir());
        let mut results = Vec::with_capacity(legs.len());
        let mut offset = 0;
        for ((&(a, b), (s1, s2)), leg_total) in legs.iter().zip(sources.iter_mut()).zip(&totals) {
            let frames = scan_pair(
                s1.as_mut(),
                s2.as_mut(),
                self.detector.as_ref(),
                cfg.pattern_width,
                cfg.pattern_height,
                cfg.max_sampling_frame_rate,
                cancel,
                |done, _| progress(offset + done, total),
            )?;
            offset += leg_total;
            progress(offset, total);
            cancel.check()?;
            results.push(calibrate_pair(a, b, frames, cfg, &self.params, &mut cache, cancel)?);
        }

        let intrinsics = unit
            .cameras()
            .iter()
            .map(|name| {
                cache.get(name).cloned().ok_or_else(|| {
                    CalibrationError::Configuration(format!("no intrinsics resolved for {name}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let leg_poses: Vec<_> = results.iter().map(|r| *r.pose()).collect();
        let solution = RigSolution::from_legs(unit, &leg_poses, intrinsics)?;
        let artifacts = PendingArtifacts::for_solution(
            &solution,
            cache.pending_writes(),
            cfg.extrinsics_dir(),
        )?;

        cancel.check()?;
        artifacts.commit()?;

        let mean_reprojection_error =
            results.iter().map(|r| r.fit.rms).sum::<f64>() / results.len() as f64;
        Ok(UnitOutcome {
            mean_reprojection_error,
            intrinsics_errors: cache.errors(),
            extrinsics: solution.extrinsics()?,
            written: artifacts.paths(),
            legs: results,
        })
    }
}
