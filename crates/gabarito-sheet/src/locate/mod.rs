//! Sheet location: corner fiducials -> sheet-to-image homography.
//!
//! The search is fully deterministic:
//! - Otsu threshold over the whole image (no fixed brightness cut),
//! - 4-connected dark components, filtered to solid, squarish blobs,
//! - the largest blobs form the fiducial class; the four extreme ones
//!   (min `x+y`, max `x-y`, max `x+y`, max `y-x`) give the corners up to a
//!   quarter turn,
//! - the quarter turn is the one relabeling under which the orientation mark
//!   reads as ink,
//! - a projective 4-point solve maps template fiducial centers onto them.
//!
//! Any quarter turn plus less than 45°, and moderate perspective, are
//! tolerated.

mod components;
mod error;

pub use error::LocateError;

use crate::sample::{sample_cell, SampleLattice};
use crate::template::{quad_is_convex, SheetTemplate};
use components::{dark_components, Component};
use gabarito_core::{homography_from_4pt, GrayImageView, Homography, Photometry};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Geometry and exposure of one located sheet.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SheetTransform {
    /// Maps sheet units to image pixels.
    pub sheet_to_image: Homography,
    /// Threshold and class levels used to score cells.
    pub photometry: Photometry,
    /// Located fiducial centers in image pixels (TL, TR, BR, BL).
    pub fiducials_img: [Point2<f32>; 4],
}

impl SheetTransform {
    /// Build from a known homography. `None` if it is not invertible.
    pub fn from_homography(sheet_to_image: Homography, photometry: Photometry) -> Option<Self> {
        sheet_to_image.inverse()?;
        Some(Self {
            sheet_to_image,
            photometry,
            fiducials_img: [Point2::origin(); 4],
        })
    }

    #[inline]
    pub fn to_image(&self, p: Point2<f32>) -> Option<Point2<f32>> {
        self.sheet_to_image.try_apply(p)
    }
}

/// Locate the sheet in `image` and solve the sheet-to-image transform.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(image, template), fields(width = image.width, height = image.height))
)]
pub fn locate(
    image: &GrayImageView<'_>,
    template: &SheetTemplate,
) -> Result<SheetTransform, LocateError> {
    let params = &template.locator;

    let photometry = Photometry::measure(image);
    debug!(
        "photometry: threshold={} paper={:.1} ink={:.1}",
        photometry.threshold, photometry.paper, photometry.ink
    );
    if photometry.contrast() < Photometry::MIN_CONTRAST {
        return Err(LocateError::LowContrast {
            contrast: photometry.contrast(),
        });
    }

    let components = dark_components(image, &photometry, params.min_fiducial_area_px);
    let candidates: Vec<Component> = components
        .into_iter()
        .filter(|c| !c.touches_border(image.width, image.height))
        .filter(|c| c.fill_ratio() >= params.min_fill_ratio && c.aspect() <= params.max_aspect)
        .collect();

    let max_area = candidates.iter().map(|c| c.area).max().unwrap_or(0);
    let cutoff = params.fiducial_area_ratio * max_area as f32;
    let fiducials: Vec<Component> = candidates
        .into_iter()
        .filter(|c| c.area as f32 >= cutoff)
        .collect();
    debug!("fiducial candidates: {}", fiducials.len());

    if fiducials.len() < 4 {
        return Err(LocateError::NotEnoughFiducials {
            found: fiducials.len(),
        });
    }

    let extremes = pick_corners(&fiducials).ok_or(LocateError::AmbiguousCorners)?;
    let corners = extremes.map(|i| fiducials[i].centroid());
    if !quad_is_convex(&corners) {
        return Err(LocateError::NotConvex);
    }

    let turns = resolve_orientation(image, template, &corners, photometry)?;
    let picked: [usize; 4] = std::array::from_fn(|i| extremes[(i + turns) % 4]);
    let quad = picked.map(|i| fiducials[i].centroid());
    debug!("fiducials (TL, TR, BR, BL): {quad:?}, quarter turns: {turns}");

    check_fiducial_sizes(template, &picked.map(|i| fiducials[i]), &quad)?;
    check_aspect(template, &quad)?;

    let sheet_to_image = homography_from_4pt(&template.fiducial_centers(), &quad)
        .ok_or(LocateError::DegenerateTransform)?;
    let det = sheet_to_image.normalized_determinant();
    if !det.is_finite() || det <= 0.0 {
        return Err(LocateError::DegenerateTransform);
    }
    let mut transform = SheetTransform::from_homography(sheet_to_image, photometry)
        .ok_or(LocateError::DegenerateTransform)?;
    transform.fiducials_img = quad;

    check_content_in_bounds(image, template, &transform)?;

    Ok(transform)
}

/// Indices of the TL, TR, BR, BL extremes; `None` if any two coincide.
fn pick_corners(fiducials: &[Component]) -> Option<[usize; 4]> {
    let keys: [fn(Point2<f32>) -> f32; 4] = [
        |p| -(p.x + p.y),
        |p| p.x - p.y,
        |p| p.x + p.y,
        |p| p.y - p.x,
    ];

    let mut picked = [0usize; 4];
    for (slot, key) in keys.iter().enumerate() {
        let mut best: Option<(usize, f32)> = None;
        for (i, c) in fiducials.iter().enumerate() {
            let k = key(c.centroid());
            if best.map_or(true, |(_, b)| k > b) {
                best = Some((i, k));
            }
        }
        picked[slot] = best?.0;
    }

    for i in 0..4 {
        for j in i + 1..4 {
            if picked[i] == picked[j] {
                return None;
            }
        }
    }
    Some(picked)
}

/// Quarter turns between the extreme picks and the sheet's TL, TR, BR, BL.
///
/// Exactly one cyclic relabeling of `corners` may put the orientation mark
/// on ink.
fn resolve_orientation(
    image: &GrayImageView<'_>,
    template: &SheetTemplate,
    corners: &[Point2<f32>; 4],
    photometry: Photometry,
) -> Result<usize, LocateError> {
    let mark = &template.orientation_mark;
    let lattice = SampleLattice::new(0.5 * mark.side, &template.sampling);
    let sheet = template.fiducial_centers();

    let mut marked = Vec::with_capacity(1);
    for turns in 0..4 {
        let quad: [Point2<f32>; 4] = std::array::from_fn(|i| corners[(i + turns) % 4]);
        let Some(transform) = homography_from_4pt(&sheet, &quad)
            .and_then(|h| SheetTransform::from_homography(h, photometry))
        else {
            continue;
        };
        let score = sample_cell(image, &transform, &lattice, mark.center);
        debug!("orientation mark after {turns} quarter turns: {score:?}");
        if score.is_marked(template.decode.marked_threshold) {
            marked.push(turns);
        }
    }

    match marked.as_slice() {
        [turns] => Ok(*turns),
        _ => Err(LocateError::OrientationNotFound {
            marked: marked.len(),
        }),
    }
}

fn perimeter_scale(template: &SheetTemplate, quad: &[Point2<f32>; 4]) -> f32 {
    let sheet = template.fiducial_centers();
    perimeter(quad) / perimeter(&sheet).max(f32::EPSILON)
}

fn perimeter(q: &[Point2<f32>; 4]) -> f32 {
    (0..4).map(|i| (q[(i + 1) % 4] - q[i]).norm()).sum()
}

fn check_fiducial_sizes(
    template: &SheetTemplate,
    picked: &[Component; 4],
    quad: &[Point2<f32>; 4],
) -> Result<(), LocateError> {
    let params = &template.locator;

    let min_area = picked.iter().map(|c| c.area).min().unwrap_or(0).max(1) as f32;
    let max_area = picked.iter().map(|c| c.area).max().unwrap_or(0) as f32;
    let spread = max_area / min_area;
    if spread > params.max_area_spread {
        return Err(LocateError::FiducialSizeMismatch { ratio: spread });
    }

    // Blob side vs. the side implied by the fiducial spacing.
    let scale = perimeter_scale(template, quad);
    for (c, f) in picked.iter().zip(template.fiducials.iter()) {
        let expected = f.side * scale;
        let ratio = (c.area as f32).sqrt() / expected.max(f32::EPSILON);
        if !(0.5..=2.0).contains(&ratio) {
            return Err(LocateError::FiducialSizeMismatch { ratio });
        }
    }
    Ok(())
}

fn quad_aspect(q: &[Point2<f32>; 4]) -> f32 {
    let horizontal = (q[1] - q[0]).norm() + (q[2] - q[3]).norm();
    let vertical = (q[3] - q[0]).norm() + (q[2] - q[1]).norm();
    horizontal / vertical.max(f32::EPSILON)
}

fn check_aspect(template: &SheetTemplate, quad: &[Point2<f32>; 4]) -> Result<(), LocateError> {
    let expected = quad_aspect(&template.fiducial_centers());
    let observed = quad_aspect(quad);
    let ratio = observed / expected;
    let tol = 1.0 + template.locator.max_aspect_deviation;
    if !(ratio.is_finite() && ratio <= tol && ratio >= 1.0 / tol) {
        return Err(LocateError::AspectMismatch { observed, expected });
    }
    Ok(())
}

fn check_content_in_bounds(
    image: &GrayImageView<'_>,
    template: &SheetTemplate,
    transform: &SheetTransform,
) -> Result<(), LocateError> {
    let extent = template
        .content_extent()
        .ok_or(LocateError::DegenerateTransform)?;
    for corner in extent.corners() {
        let p = transform
            .to_image(corner)
            .ok_or(LocateError::OutOfBounds)?;
        if !image.contains_sample(p.x, p.y) {
            debug!("content corner {corner:?} maps outside the image at {p:?}");
            return Err(LocateError::OutOfBounds);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{render_sheet, SheetMarks, SynthParams};
    use gabarito_core::PixelBuffer;

    fn render(params: &SynthParams) -> PixelBuffer {
        let template = SheetTemplate::standard();
        render_sheet(&template, &SheetMarks::default(), params).expect("render")
    }

    fn assert_near(a: Point2<f32>, b: Point2<f32>, tol: f32) {
        assert!((a - b).norm() < tol, "{a:?} vs {b:?}");
    }

    #[test]
    fn locates_axis_aligned_sheet() {
        let _ = env_logger::builder().is_test(true).try_init();
        let params = SynthParams::default();
        let img = render(&params);
        let template = SheetTemplate::standard();
        let t = locate(&img.view(), &template).expect("located");

        let truth = params.sheet_to_image(&template);
        for p in [
            Point2::new(30.0_f32, 30.0),
            Point2::new(105.0, 148.5),
            Point2::new(152.0, 182.0),
        ] {
            let q = t.to_image(p).expect("maps");
            assert_near(q, truth.apply(p), 1.0);
        }
        assert!(t.photometry.paper > 200.0);
        assert!(t.photometry.ink < 100.0);
    }

    #[test]
    fn locates_rotated_sheet() {
        let params = SynthParams {
            rotation_deg: 4.0,
            ..SynthParams::default()
        };
        let img = render(&params);
        let template = SheetTemplate::standard();
        let t = locate(&img.view(), &template).expect("located");
        let truth = params.sheet_to_image(&template);
        let p = Point2::new(140.0_f32, 150.0);
        assert_near(t.to_image(p).expect("maps"), truth.apply(p), 1.5);
    }

    #[test]
    fn quarter_turns_are_undone() {
        let template = SheetTemplate::standard();
        for rotation_deg in [90.0, 180.0, 273.0] {
            let params = SynthParams {
                rotation_deg,
                ..SynthParams::default()
            };
            let img = render(&params);
            let t = locate(&img.view(), &template).expect("located");
            let truth = params.sheet_to_image(&template);
            for p in [Point2::new(30.0_f32, 30.0), Point2::new(152.0, 182.0)] {
                assert_near(t.to_image(p).expect("maps"), truth.apply(p), 1.5);
            }
        }
    }

    #[test]
    fn missing_orientation_mark_is_not_detected() {
        let params = SynthParams {
            rotation_deg: 180.0,
            omit_orientation_mark: true,
            ..SynthParams::default()
        };
        let img = render(&params);
        let err = locate(&img.view(), &SheetTemplate::standard()).unwrap_err();
        assert_eq!(err, LocateError::OrientationNotFound { marked: 0 });
        assert!(err.is_detection_failure());
    }

    #[test]
    fn blank_page_is_not_detected() {
        let img = PixelBuffer::filled(300, 400, 250).expect("buffer");
        let err = locate(&img.view(), &SheetTemplate::standard()).unwrap_err();
        assert!(matches!(err, LocateError::LowContrast { .. }));
        assert!(err.is_detection_failure());
    }

    #[test]
    fn missing_fiducial_is_not_detected() {
        let params = SynthParams {
            omit_fiducial: Some(2),
            ..SynthParams::default()
        };
        let img = render(&params);
        let err = locate(&img.view(), &SheetTemplate::standard()).unwrap_err();
        assert_eq!(err, LocateError::NotEnoughFiducials { found: 3 });
    }

    #[test]
    fn squashed_sheet_is_distorted() {
        let params = SynthParams {
            scale_y: 0.55,
            ..SynthParams::default()
        };
        let img = render(&params);
        let err = locate(&img.view(), &SheetTemplate::standard()).unwrap_err();
        assert!(matches!(err, LocateError::AspectMismatch { .. }), "{err:?}");
        assert!(!err.is_detection_failure());
    }

    #[test]
    fn identical_input_gives_identical_transform() {
        let img = render(&SynthParams {
            rotation_deg: -3.0,
            noise: 12,
            ..SynthParams::default()
        });
        let template = SheetTemplate::standard();
        let a = locate(&img.view(), &template).expect("a");
        let b = locate(&img.view(), &template).expect("b");
        assert_eq!(a, b);
    }
}
