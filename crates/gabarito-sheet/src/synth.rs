//! Synthetic answer-sheet rendering.
//!
//! Produces grayscale images of a template with chosen bubbles filled in,
//! under a controllable rotation, anisotropic scale, keystone and noise.
//! Rendering is deterministic for a given set of parameters.

use crate::template::{FieldId, SheetTemplate};
use gabarito_core::{Homography, ImageError, PixelBuffer};
use nalgebra::{Matrix3, Point2, Vector2};

/// Printed ring thickness around each bubble, in sheet units.
const RING_HALF_WIDTH: f32 = 0.15;
/// Filled marks cover this share of the bubble radius.
const MARK_RADIUS: f32 = 0.9;

/// Scan conditions of a rendered sheet.
#[derive(Clone, Debug, PartialEq)]
pub struct SynthParams {
    /// Pixels per sheet unit before rotation.
    pub px_per_unit: f32,
    /// Paper-coloured border around the mapped sheet.
    pub margin_px: f32,
    /// Clockwise rotation of the page in the image.
    pub rotation_deg: f32,
    /// Extra vertical scale (1.0 keeps the page proportions).
    pub scale_y: f32,
    /// Keystone strength: the right edge shrinks by roughly this fraction.
    pub perspective: f32,
    pub paper: u8,
    pub ink: u8,
    /// Uniform noise amplitude in gray levels.
    pub noise: u8,
    pub seed: u64,
    /// Leave out one fiducial (TL, TR, BR, BL index).
    pub omit_fiducial: Option<usize>,
    pub omit_orientation_mark: bool,
    /// Subsamples per pixel axis.
    pub supersample: usize,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            px_per_unit: 3.0,
            margin_px: 20.0,
            rotation_deg: 0.0,
            scale_y: 1.0,
            perspective: 0.0,
            paper: 245,
            ink: 20,
            noise: 0,
            seed: 0x5eed,
            omit_fiducial: None,
            omit_orientation_mark: false,
            supersample: 3,
        }
    }
}

impl SynthParams {
    fn linear_part(&self, template: &SheetTemplate) -> Matrix3<f64> {
        let s = self.px_per_unit as f64;
        let sy = self.scale_y as f64;
        let (sin, cos) = (self.rotation_deg as f64).to_radians().sin_cos();
        let keystone = Matrix3::new(
            1.0,
            0.0,
            0.0,
            0.0,
            1.0,
            0.0,
            self.perspective as f64 / template.width.max(f32::EPSILON) as f64,
            0.0,
            1.0,
        );
        #[rustfmt::skip]
        let rs = Matrix3::new(
            cos * s, -sin * s * sy, 0.0,
            sin * s,  cos * s * sy, 0.0,
            0.0,      0.0,          1.0,
        );
        rs * keystone
    }

    fn mapped_bounds(&self, template: &SheetTemplate) -> (Point2<f32>, Point2<f32>) {
        let h = Homography::new(self.linear_part(template));
        let corners = [
            Point2::new(0.0, 0.0),
            Point2::new(template.width, 0.0),
            Point2::new(template.width, template.height),
            Point2::new(0.0, template.height),
        ]
        .map(|p| h.apply(p));
        let mut min = corners[0];
        let mut max = corners[0];
        for c in &corners[1..] {
            min = Point2::new(min.x.min(c.x), min.y.min(c.y));
            max = Point2::new(max.x.max(c.x), max.y.max(c.y));
        }
        (min, max)
    }

    /// Ground-truth sheet-to-image mapping of a rendering.
    pub fn sheet_to_image(&self, template: &SheetTemplate) -> Homography {
        let (min, _) = self.mapped_bounds(template);
        let shift = Matrix3::new(
            1.0,
            0.0,
            (self.margin_px - min.x) as f64,
            0.0,
            1.0,
            (self.margin_px - min.y) as f64,
            0.0,
            0.0,
            1.0,
        );
        Homography::new(shift * self.linear_part(template))
    }

    /// Output image size in pixels.
    pub fn image_size(&self, template: &SheetTemplate) -> (usize, usize) {
        let (min, max) = self.mapped_bounds(template);
        let w = (max.x - min.x + 2.0 * self.margin_px).ceil().max(1.0) as usize;
        let h = (max.y - min.y + 2.0 * self.margin_px).ceil().max(1.0) as usize;
        (w, h)
    }
}

/// Which bubbles are filled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SheetMarks {
    /// Marked digits per exam-id column.
    pub exam_id: Vec<Vec<usize>>,
    /// Marked digits per participant-id column.
    pub participant_id: Vec<Vec<usize>>,
    /// Marked options per question.
    pub answers: Vec<Vec<usize>>,
}

impl SheetMarks {
    /// Marks that read back as the given ids and answer string.
    ///
    /// Ids are written zero-padded to the field width. In `answers`, an
    /// alphabet symbol fills its option, the double-mark character fills the
    /// first two options and anything else leaves the row blank.
    pub fn for_values(
        template: &SheetTemplate,
        exam_id: u32,
        participant_id: u32,
        answers: &str,
    ) -> Self {
        let policy = &template.decode;
        let answers = answers
            .chars()
            .map(|c| {
                if c == policy.double_mark_char {
                    vec![0, 1]
                } else {
                    policy
                        .alphabet
                        .chars()
                        .position(|a| a == c)
                        .into_iter()
                        .collect()
                }
            })
            .collect();
        Self {
            exam_id: digit_marks(exam_id, template.exam_id.ncols()),
            participant_id: digit_marks(participant_id, template.participant_id.ncols()),
            answers,
        }
    }

    fn is_marked(&self, field: FieldId, column: usize, index: usize) -> bool {
        let marks = match field {
            FieldId::ExamId => self.exam_id.get(column),
            FieldId::ParticipantId => self.participant_id.get(column),
            FieldId::Answer(q) => self.answers.get(q),
        };
        marks.is_some_and(|m| m.contains(&index))
    }
}

fn digit_marks(value: u32, columns: usize) -> Vec<Vec<usize>> {
    let mut digits = vec![Vec::new(); columns];
    let mut rest = value;
    for slot in digits.iter_mut().rev() {
        slot.push((rest % 10) as usize);
        rest /= 10;
    }
    digits
}

#[derive(Clone, Copy, Debug)]
enum Shape {
    Square { center: Point2<f32>, half: f32 },
    Disk { center: Point2<f32>, radius: f32 },
    Ring { center: Point2<f32>, radius: f32 },
}

impl Shape {
    fn contains(&self, p: Point2<f32>) -> bool {
        match *self {
            Shape::Square { center, half } => {
                (p.x - center.x).abs() <= half && (p.y - center.y).abs() <= half
            }
            Shape::Disk { center, radius } => (p - center).norm_squared() <= radius * radius,
            Shape::Ring { center, radius } => {
                ((p - center).norm() - radius).abs() <= RING_HALF_WIDTH
            }
        }
    }

    /// Sheet-space square enclosing the shape.
    fn bounds(&self) -> (Point2<f32>, f32) {
        match *self {
            Shape::Square { center, half } => (center, half),
            Shape::Disk { center, radius } => (center, radius),
            Shape::Ring { center, radius } => (center, radius + RING_HALF_WIDTH),
        }
    }
}

fn bubble_shapes(
    shapes: &mut Vec<Shape>,
    marks: &SheetMarks,
    field: FieldId,
    columns: &[Vec<Point2<f32>>],
    radius: f32,
) {
    for (column, cells) in columns.iter().enumerate() {
        for (index, &center) in cells.iter().enumerate() {
            shapes.push(Shape::Ring { center, radius });
            if marks.is_marked(field, column, index) {
                shapes.push(Shape::Disk {
                    center,
                    radius: MARK_RADIUS * radius,
                });
            }
        }
    }
}

/// Deterministic xorshift64* stream.
struct Noise(u64);

impl Noise {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Uniform in `[-amp, amp]`.
    fn offset(&mut self, amp: u8) -> i32 {
        if amp == 0 {
            return 0;
        }
        let span = 2 * amp as u64 + 1;
        (self.next_u64() % span) as i32 - amp as i32
    }
}

/// Errors from [`render_sheet`].
#[derive(thiserror::Error, Debug)]
pub enum SynthError {
    #[error("scan parameters give a singular sheet mapping")]
    Singular,
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Render `template` with `marks` filled in.
pub fn render_sheet(
    template: &SheetTemplate,
    marks: &SheetMarks,
    params: &SynthParams,
) -> Result<PixelBuffer, SynthError> {
    let sheet_to_image = params.sheet_to_image(template);
    let image_to_sheet = sheet_to_image.inverse().ok_or(SynthError::Singular)?;
    let (width, height) = params.image_size(template);

    let mut shapes = Vec::new();
    for (i, f) in template.fiducials.iter().enumerate() {
        if params.omit_fiducial != Some(i) {
            shapes.push(Shape::Square {
                center: f.center,
                half: 0.5 * f.side,
            });
        }
    }
    if !params.omit_orientation_mark {
        shapes.push(Shape::Square {
            center: template.orientation_mark.center,
            half: 0.5 * template.orientation_mark.side,
        });
    }
    let r = template.bubble_radius;
    bubble_shapes(&mut shapes, marks, FieldId::ExamId, &template.exam_id.columns, r);
    bubble_shapes(
        &mut shapes,
        marks,
        FieldId::ParticipantId,
        &template.participant_id.columns,
        r,
    );
    for (q, row) in template.answers.iter().enumerate() {
        bubble_shapes(
            &mut shapes,
            marks,
            FieldId::Answer(q),
            std::slice::from_ref(&row.options),
            r,
        );
    }

    let mut coverage = vec![0f32; width * height];
    let k = params.supersample.max(1);
    let step = 1.0 / k as f32;
    for shape in &shapes {
        let (center, half) = shape.bounds();
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
            .map(|(dx, dy)| sheet_to_image.apply(center + Vector2::new(dx, dy) * half));
        let x0 = corners.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).floor() - 1.0;
        let y0 = corners.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).floor() - 1.0;
        let x1 = corners.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max).ceil() + 1.0;
        let y1 = corners.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max).ceil() + 1.0;
        let x0 = x0.max(0.0) as usize;
        let y0 = y0.max(0.0) as usize;
        let x1 = (x1.max(0.0) as usize).min(width.saturating_sub(1));
        let y1 = (y1.max(0.0) as usize).min(height.saturating_sub(1));

        for y in y0..=y1 {
            for x in x0..=x1 {
                let mut hits = 0usize;
                for j in 0..k {
                    for i in 0..k {
                        let px = x as f32 + (i as f32 + 0.5) * step - 0.5;
                        let py = y as f32 + (j as f32 + 0.5) * step - 0.5;
                        if shape.contains(image_to_sheet.apply(Point2::new(px, py))) {
                            hits += 1;
                        }
                    }
                }
                let c = hits as f32 / (k * k) as f32;
                let slot = &mut coverage[y * width + x];
                *slot = slot.max(c);
            }
        }
    }

    let paper = params.paper as f32;
    let ink = params.ink as f32;
    let mut noise = Noise(params.seed | 1);
    let data = coverage
        .iter()
        .map(|&c| {
            let v = paper + (ink - paper) * c;
            (v.round() as i32 + noise.offset(params.noise)).clamp(0, 255) as u8
        })
        .collect();

    Ok(PixelBuffer::from_packed(width, height, data)?)
}
