//! Content-adaptive thresholding.

use crate::GrayImageView;
use serde::{Deserialize, Serialize};

/// 256-bin intensity histogram of a whole image.
pub fn histogram(img: &GrayImageView<'_>) -> [u32; 256] {
    let mut hist = [0u32; 256];
    for row in img.rows() {
        for &v in row {
            hist[v as usize] += 1;
        }
    }
    hist
}

/// Otsu threshold from a histogram. Pixels `< threshold` are "dark".
pub fn otsu_threshold_from_histogram(hist: &[u32; 256]) -> u8 {
    let total: f64 = hist.iter().map(|&h| h as f64).sum();
    if total < 1.0 {
        return 127;
    }

    let min_v = hist.iter().position(|&h| h > 0).unwrap_or(0);
    let max_v = hist.iter().rposition(|&h| h > 0).unwrap_or(255);
    if min_v == max_v {
        return min_v as u8;
    }
    let nonzero_bins = hist.iter().filter(|&&h| h > 0).count();
    if nonzero_bins <= 2 {
        return ((min_v + max_v + 1) / 2) as u8;
    }

    let mut sum_total = 0f64;
    for (i, &h) in hist.iter().enumerate() {
        sum_total += (i as f64) * (h as f64);
    }

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127usize;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        sum_b += (t as f64) * (h as f64);
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = t;
        }
    }

    // `best_t` is the last dark level; the cut sits just above it.
    (best_t + 1).min(255) as u8
}

/// Compute Otsu threshold from a set of sample intensities.
pub fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }
    otsu_threshold_from_histogram(&hist)
}

/// Global exposure model of a scanned sheet.
///
/// `paper` and `ink` are the mean intensities above and below `threshold`;
/// fill scores are normalized between them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Photometry {
    pub threshold: u8,
    pub paper: f32,
    pub ink: f32,
}

impl Photometry {
    /// Smallest paper/ink separation considered meaningful.
    pub const MIN_CONTRAST: f32 = 8.0;

    /// Measure the image: Otsu split plus class means.
    pub fn measure(img: &GrayImageView<'_>) -> Self {
        let hist = histogram(img);
        Self::from_histogram(&hist)
    }

    pub fn from_histogram(hist: &[u32; 256]) -> Self {
        let threshold = otsu_threshold_from_histogram(hist);
        let t = threshold as usize;

        let class_mean = |range: std::ops::Range<usize>| -> Option<f32> {
            let mut n = 0f64;
            let mut s = 0f64;
            for i in range {
                n += hist[i] as f64;
                s += (i as f64) * (hist[i] as f64);
            }
            (n >= 1.0).then(|| (s / n) as f32)
        };

        // A missing class collapses onto the other one: zero contrast.
        let (ink, paper) = match (class_mean(0..t), class_mean(t..256)) {
            (Some(ink), Some(paper)) => (ink, paper),
            (Some(v), None) | (None, Some(v)) => (v, v),
            (None, None) => (0.0, 0.0),
        };
        Self {
            threshold,
            paper,
            ink,
        }
    }

    #[inline]
    pub fn contrast(&self) -> f32 {
        self.paper - self.ink
    }

    #[inline]
    pub fn is_dark(&self, v: u8) -> bool {
        v < self.threshold
    }

    /// Darkness of an intensity in `[0, 1]`: 0 at paper level, 1 at ink level.
    #[inline]
    pub fn darkness(&self, v: f32) -> f32 {
        let span = self.contrast().max(Self::MIN_CONTRAST);
        ((self.paper - v) / span).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelBuffer;
    use approx::assert_relative_eq;

    #[test]
    fn otsu_splits_bimodal_samples() {
        let mut samples = vec![30u8; 200];
        samples.extend(std::iter::repeat(35u8).take(50));
        samples.extend(std::iter::repeat(220u8).take(700));
        samples.extend(std::iter::repeat(210u8).take(100));
        let t = otsu_threshold_from_samples(&samples);
        assert!(t > 35 && t <= 210, "threshold {t}");
    }

    #[test]
    fn degenerate_histograms() {
        assert_eq!(otsu_threshold_from_samples(&[]), 127);
        assert_eq!(otsu_threshold_from_samples(&[90, 90, 90]), 90);
        assert_eq!(otsu_threshold_from_samples(&[0, 255, 0, 255]), 128);
    }

    #[test]
    fn photometry_reports_class_means() {
        let mut data = vec![240u8; 90];
        data.extend(std::iter::repeat(20u8).take(10));
        let buf = PixelBuffer::from_packed(10, 10, data).expect("valid");
        let p = Photometry::measure(&buf.view());
        assert!(p.is_dark(20));
        assert!(!p.is_dark(240));
        assert_relative_eq!(p.paper, 240.0);
        assert_relative_eq!(p.ink, 20.0);
        assert_relative_eq!(p.darkness(240.0), 0.0);
        assert_relative_eq!(p.darkness(20.0), 1.0);
        assert_relative_eq!(p.darkness(130.0), 0.5);
        assert_relative_eq!(p.darkness(0.0), 1.0);
    }

    #[test]
    fn uniform_image_has_no_contrast() {
        let buf = PixelBuffer::filled(8, 8, 250).expect("valid");
        let p = Photometry::measure(&buf.view());
        assert_relative_eq!(p.contrast(), 0.0);
        assert!(!p.is_dark(250));
    }
}
