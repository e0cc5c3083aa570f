//! Turning raw checkerboard detections into ordered image points.
//!
//! A detector reports a flat list of corner positions plus one or more board
//! grids. Each grid is a 2D array of indices into the corner list and carries
//! a one-cell border ring around the interior corners, so a `w x h` pattern
//! arrives as a `(h + 2) x (w + 2)` grid, or `(w + 2) x (h + 2)` when the
//! detector saw the board rotated by 90 degrees.

use multicam_core::{mean_intensity, GrayImageView, Pt2};
use serde::{Deserialize, Serialize};

/// Pixel radius of the neighbourhood sampled when deciding board orientation.
const ORIENTATION_SAMPLE_RADIUS: u32 = 1;

/// Index grid of one detected board. Negative entries mark missing corners.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardGrid {
    pub idx: Vec<Vec<i32>>,
}

/// Output of a corner detector for one image.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CornerDetection {
    pub corners: Vec<Pt2>,
    pub boards: Vec<BoardGrid>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("detected {found} corners, pattern needs {required}")]
    NotEnoughCorners { found: usize, required: usize },
    #[error("no board grid in detection")]
    NoBoard,
    #[error("board grid is {rows}x{cols}, does not match the pattern")]
    DimensionMismatch { rows: usize, cols: usize },
    #[error("corner index {index} outside detected corner list of {len}")]
    IndexOutOfRange { index: i32, len: usize },
}

/// Interior corners of `board` in row-major pattern order.
///
/// Fails on any dimension mismatch, ragged rows included, and on negative or
/// out-of-range indices. On success the result holds exactly
/// `pattern_width * pattern_height` points.
pub fn board_to_corners(
    board: &BoardGrid,
    corners: &[Pt2],
    pattern_width: usize,
    pattern_height: usize,
) -> Result<Vec<Pt2>, NormalizeError> {
    let idx = &board.idx;
    let rows = idx.len();
    let cols = idx.first().map_or(0, Vec::len);
    let mismatch = NormalizeError::DimensionMismatch { rows, cols };
    if rows < 2 || cols < 2 {
        return Err(mismatch);
    }

    let lookup = |i: i32| -> Result<Pt2, NormalizeError> {
        usize::try_from(i)
            .ok()
            .and_then(|u| corners.get(u).copied())
            .ok_or(NormalizeError::IndexOutOfRange {
                index: i,
                len: corners.len(),
            })
    };

    // every row, border rows included, must span the same columns
    if idx.iter().any(|row| row.len() != cols) {
        return Err(mismatch);
    }
    let (inner_rows, inner_cols) = (rows - 2, cols - 2);

    let mut out = Vec::with_capacity(pattern_width * pattern_height);
    if inner_rows == pattern_height && inner_cols == pattern_width {
        for row in &idx[1..rows - 1] {
            for &i in &row[1..cols - 1] {
                out.push(lookup(i)?);
            }
        }
    } else if inner_rows == pattern_width && inner_cols == pattern_height {
        // Board seen sideways: walk columns, bottom to top.
        for j in 1..cols - 1 {
            for i in (1..rows - 1).rev() {
                out.push(lookup(idx[i][j])?);
            }
        }
    } else {
        return Err(mismatch);
    }
    Ok(out)
}

/// Put the board origin at its darker end.
///
/// Compares the image intensity at the centre of the last grid cell with the
/// centre of the first one and reverses `points` when the last is brighter.
/// Returns whether the sequence was reversed. Applying it to an already
/// canonical sequence leaves it unchanged.
pub fn canonicalize_orientation(
    points: &mut [Pt2],
    image: &GrayImageView<'_>,
    pattern_width: usize,
    pattern_height: usize,
) -> bool {
    let w = pattern_width;
    let h = pattern_height;
    if w < 2 || h < 2 || points.len() != w * h {
        return false;
    }
    let cell_center = |ids: [usize; 4]| {
        let (sx, sy) = ids
            .iter()
            .fold((0.0, 0.0), |(sx, sy), &i| (sx + points[i].x, sy + points[i].y));
        Pt2::new(sx / 4.0, sy / 4.0)
    };
    let far = cell_center([w * h - 1, w * h - 2, w * (h - 1) - 1, w * (h - 1) - 2]);
    let near = cell_center([0, 1, w, w + 1]);

    let (Some(far_level), Some(near_level)) = (
        mean_intensity(image, far, ORIENTATION_SAMPLE_RADIUS),
        mean_intensity(image, near, ORIENTATION_SAMPLE_RADIUS),
    ) else {
        return false;
    };
    if far_level > near_level {
        points.reverse();
        true
    } else {
        false
    }
}

/// Full per-frame normalization: corner count check, first board to
/// ordered points, orientation fix.
pub fn normalize_detection(
    detection: &CornerDetection,
    image: &GrayImageView<'_>,
    pattern_width: usize,
    pattern_height: usize,
) -> Result<Vec<Pt2>, NormalizeError> {
    let required = pattern_width * pattern_height;
    if detection.corners.len() < required {
        return Err(NormalizeError::NotEnoughCorners {
            found: detection.corners.len(),
            required,
        });
    }
    let board = detection.boards.first().ok_or(NormalizeError::NoBoard)?;
    let mut points = board_to_corners(board, &detection.corners, pattern_width, pattern_height)?;
    canonicalize_orientation(&mut points, image, pattern_width, pattern_height);
    Ok(points)
}
