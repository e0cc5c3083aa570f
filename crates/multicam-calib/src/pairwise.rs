//! One camera pair: scan the synchronized recordings for board
//! correspondences, resolve intrinsics, fit the relative pose.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use multicam_core::{
    intrinsics_file_name, try_read_intrinsics, CalibrationConfig, CalibrationError,
    CameraIntrinsics, ImageSize, Iso3, Pt2, Pt3,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::intrinsics::estimate_intrinsics;
use crate::lm::TermCriteria;
use crate::stereo::{refine_stereo, PairwiseParams, StageReport};
use crate::{normalize_detection, CancellationToken, CornerDetector, FrameSource, StereoFit};

/// Matched correspondences of two synchronized recordings.
#[derive(Clone, Debug, Default)]
pub struct PairFrames {
    pub first: Vec<Vec<Pt2>>,
    pub second: Vec<Vec<Pt2>>,
    pub sizes: [ImageSize; 2],
    /// Frame pairs examined, valid or not.
    pub frames_examined: usize,
}

impl PairFrames {
    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }
}

/// Frames skipped after each examined frame so that at most
/// `max_sampling_frame_rate` frames per second are looked at.
pub fn sampling_stride(frame_rate: f64, max_sampling_frame_rate: u32) -> usize {
    if max_sampling_frame_rate == 0 || !frame_rate.is_finite() || frame_rate <= 0.0 {
        return 0;
    }
    let fps = frame_rate as u32;
    (fps / max_sampling_frame_rate).saturating_sub(1) as usize
}

/// Up to `target` indices spread uniformly over `0..available`.
pub fn subsample_indices(available: usize, target: usize) -> Vec<usize> {
    let take = target.min(available);
    if take == 0 {
        return Vec::new();
    }
    let ratio = available as f64 / take as f64;
    (0..take)
        .map(|i| ((i as f64 * ratio) as usize).min(available - 1))
        .collect()
}

/// Walk both recordings in lockstep and keep the frames in which both
/// cameras see the complete board.
///
/// `progress(frames_done, frames_total)` is called after every examined
/// frame with a non-decreasing count. The token is polled before every read.
#[allow(clippy::too_many_arguments)]
pub fn scan_pair(
    first: &mut dyn FrameSource,
    second: &mut dyn FrameSource,
    detector: &dyn CornerDetector,
    pattern_width: usize,
    pattern_height: usize,
    max_sampling_frame_rate: u32,
    cancel: &CancellationToken,
    mut progress: impl FnMut(usize, usize),
) -> Result<PairFrames, CalibrationError> {
    let frame_count = first.frame_count();
    let skip = sampling_stride(first.frame_rate(), max_sampling_frame_rate);
    let mut out = PairFrames::default();

    loop {
        cancel.check()?;
        let (Some(img1), Some(img2)) = (first.read(), second.read()) else {
            break;
        };
        let frame_index = first.position();
        first.seek(frame_index + skip);
        second.seek(frame_index + skip);

        if out.frames_examined == 0 {
            out.sizes = [img1.size(), img2.size()];
        }

        let det1 = detector.detect(&img1.view());
        let det2 = detector.detect(&img2.view());
        let found = normalize_detection(&det1, &img1.view(), pattern_width, pattern_height)
            .and_then(|c1| {
                normalize_detection(&det2, &img2.view(), pattern_width, pattern_height)
                    .map(|c2| (c1, c2))
            });
        match found {
            Ok((c1, c2)) => {
                out.first.push(c1);
                out.second.push(c2);
            }
            Err(e) => log::debug!("frame {frame_index}: dropped ({e})"),
        }

        progress((out.frames_examined * (skip + 1)).min(frame_count), frame_count);
        out.frames_examined += 1;
        if frame_index > frame_count {
            break;
        }
    }
    Ok(out)
}

/// Intrinsics known to one worker: taken from disk when present, otherwise
/// estimated once and remembered. Estimated values are only written when
/// the worker commits its results.
#[derive(Debug)]
pub struct IntrinsicsCache {
    dir: PathBuf,
    known: HashMap<String, CameraIntrinsics>,
    estimated: BTreeMap<String, (CameraIntrinsics, f64)>,
}

impl IntrinsicsCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            known: HashMap::new(),
            estimated: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, camera: &str) -> Option<&CameraIntrinsics> {
        self.known.get(camera)
    }

    /// Intrinsics of `camera`, estimating them from `views` if neither this
    /// worker nor a parameter file already has them.
    pub fn get_or_estimate(
        &mut self,
        camera: &str,
        board: &[Pt3],
        views: &[Vec<Pt2>],
        size: ImageSize,
        criteria: TermCriteria,
    ) -> Result<CameraIntrinsics, CalibrationError> {
        if let Some(cam) = self.known.get(camera) {
            return Ok(cam.clone());
        }
        if let Some(cam) = try_read_intrinsics(self.dir.join(intrinsics_file_name(camera))) {
            log::info!("using stored intrinsics for {camera}");
            self.known.insert(camera.to_string(), cam.clone());
            return Ok(cam);
        }
        log::info!("calibrating {camera} using {} images", views.len());
        let fit = estimate_intrinsics(board, views, size, criteria)?;
        log::info!("{camera} calibrated with reprojection error {:.4}", fit.rms);
        self.known.insert(camera.to_string(), fit.intrinsics.clone());
        self.estimated
            .insert(camera.to_string(), (fit.intrinsics.clone(), fit.rms));
        Ok(fit.intrinsics)
    }

    /// RMS errors of the cameras this cache estimated.
    pub fn errors(&self) -> BTreeMap<String, f64> {
        self.estimated
            .iter()
            .map(|(name, (_, rms))| (name.clone(), *rms))
            .collect()
    }

    /// Files to write for the estimated cameras.
    pub fn pending_writes(&self) -> Vec<(PathBuf, CameraIntrinsics)> {
        self.estimated
            .iter()
            .map(|(name, (cam, _))| (self.dir.join(intrinsics_file_name(name)), cam.clone()))
            .collect()
    }
}

/// Result of one calibrated pair.
#[derive(Clone, Debug)]
pub struct PairCalibration {
    pub cameras: (String, String),
    pub fit: StereoFit,
    pub stages: Vec<StageReport>,
    pub frames_found: usize,
    pub frames_used: usize,
}

impl PairCalibration {
    /// Second camera relative to the first.
    pub fn pose(&self) -> &Iso3 {
        &self.fit.pose
    }
}

/// Calibrate one pair from scanned correspondences.
///
/// Fails with `InsufficientData` when fewer than the configured minimum of
/// frames were found; otherwise subsamples to the target count, resolves
/// both cameras' intrinsics through `cache`, and runs the staged stereo fit.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(frames, config, params, cache, cancel),
        fields(frames = frames.len())
    )
)]
pub fn calibrate_pair(
    first_camera: &str,
    second_camera: &str,
    frames: PairFrames,
    config: &CalibrationConfig,
    params: &PairwiseParams,
    cache: &mut IntrinsicsCache,
    cancel: &CancellationToken,
) -> Result<PairCalibration, CalibrationError> {
    let found = frames.len();
    let required = config.min_frames();
    if found < required {
        return Err(CalibrationError::InsufficientData {
            cameras: format!("{first_camera}-{second_camera}"),
            found,
            required,
        });
    }

    let keep = subsample_indices(found, config.frames_for_extrinsics);
    let first: Vec<_> = keep.iter().map(|&i| frames.first[i].clone()).collect();
    let second: Vec<_> = keep.iter().map(|&i| frames.second[i].clone()).collect();
    log::info!(
        "{first_camera}-{second_camera}: {found} valid board pairs, using {}",
        keep.len()
    );

    let board = config.board_points();
    cancel.check()?;
    let cam1 = cache.get_or_estimate(
        first_camera,
        &board,
        &first,
        frames.sizes[0],
        params.intrinsics_criteria,
    )?;
    cancel.check()?;
    let cam2 = cache.get_or_estimate(
        second_camera,
        &board,
        &second,
        frames.sizes[1],
        params.intrinsics_criteria,
    )?;

    let frames_used = keep.len();
    let refined = refine_stereo(&board, first, second, &cam1, &cam2, params, cancel)?;
    Ok(PairCalibration {
        cameras: (first_camera.to_string(), second_camera.to_string()),
        fit: refined.fit,
        stages: refined.stages,
        frames_found: found,
        frames_used,
    })
}
