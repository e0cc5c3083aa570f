use crate::Pt2;
use serde::{Deserialize, Serialize};

/// Borrowed 8-bit grayscale image.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

/// Owned 8-bit grayscale frame, as delivered by a recording.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Black image of the given size.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize {
            width: self.width as u32,
            height: self.height as u32,
        }
    }
}

/// Image dimensions in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `true` when `p` lies inside `[0, width) x [0, height)`.
    #[inline]
    pub fn contains(&self, p: &Pt2) -> bool {
        p.x.is_finite()
            && p.y.is_finite()
            && p.x >= 0.0
            && p.y >= 0.0
            && p.x < self.width as f64
            && p.y < self.height as f64
    }

    /// Pixel coordinates of the image center, `((w - 1) / 2, (h - 1) / 2)`.
    pub fn center(&self) -> Pt2 {
        Pt2::new(
            (self.width as f64 - 1.0) * 0.5,
            (self.height as f64 - 1.0) * 0.5,
        )
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i64, y: i64) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i64 || y >= src.height as i64 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = get_gray(src, x0, y0) as f64;
    let p10 = get_gray(src, x0 + 1, y0) as f64;
    let p01 = get_gray(src, x0, y0 + 1) as f64;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

/// Mean intensity over the `(2r+1) x (2r+1)` pixel neighbourhood of `center`.
///
/// Samples outside the image are skipped; returns `None` when the whole
/// neighbourhood falls outside.
pub fn mean_intensity(src: &GrayImageView<'_>, center: Pt2, radius: u32) -> Option<f64> {
    if src.width == 0 || src.height == 0 || !center.x.is_finite() || !center.y.is_finite() {
        return None;
    }
    let r = radius as i64;
    let mut sum = 0.0;
    let mut n = 0usize;
    for dy in -r..=r {
        for dx in -r..=r {
            let x = center.x + dx as f64;
            let y = center.y + dy as f64;
            if x < 0.0 || y < 0.0 || x > (src.width - 1) as f64 || y > (src.height - 1) as f64 {
                continue;
            }
            sum += sample_bilinear(src, x, y);
            n += 1;
        }
    }
    (n > 0).then(|| sum / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let img = GrayImage::from_fn(2, 1, |x, _| if x == 0 { 0 } else { 200 });
        let v = sample_bilinear(&img.view(), 0.25, 0.0);
        assert!((v - 50.0).abs() < 1e-9);
    }

    #[test]
    fn mean_intensity_skips_out_of_bounds() {
        let img = GrayImage::from_fn(4, 4, |_, _| 100);
        let m = mean_intensity(&img.view(), Pt2::new(0.0, 0.0), 1).expect("inside");
        assert!((m - 100.0).abs() < 1e-9);
        assert!(mean_intensity(&img.view(), Pt2::new(-10.0, -10.0), 1).is_none());
    }

    #[test]
    fn image_size_contains_is_half_open() {
        let size = ImageSize::new(640, 480);
        assert!(size.contains(&Pt2::new(0.0, 0.0)));
        assert!(size.contains(&Pt2::new(639.5, 479.5)));
        assert!(!size.contains(&Pt2::new(640.0, 10.0)));
        assert!(!size.contains(&Pt2::new(-0.1, 10.0)));
        assert!(!size.contains(&Pt2::new(f64::NAN, 10.0)));
    }
}
