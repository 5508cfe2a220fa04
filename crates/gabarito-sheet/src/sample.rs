//! Bubble sampling: template cells -> fill scores.

use crate::locate::SheetTransform;
use crate::template::{FieldId, NumericField, SamplingParams, SheetTemplate};
use gabarito_core::{sample_bilinear_checked, GrayImageView};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// How marked one bubble looks.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellScore {
    /// Mean darkness in `[0, 1]`: 0 blank paper, 1 solid ink.
    Fill(f32),
    /// Part of the cell maps outside the image.
    Unreadable,
}

impl CellScore {
    #[inline]
    pub fn fill(self) -> Option<f32> {
        match self {
            CellScore::Fill(v) => Some(v),
            CellScore::Unreadable => None,
        }
    }

    #[inline]
    pub fn is_marked(self, threshold: f32) -> bool {
        matches!(self, CellScore::Fill(v) if v > threshold)
    }

    #[inline]
    pub fn is_unreadable(self) -> bool {
        matches!(self, CellScore::Unreadable)
    }
}

/// Scores for every field of a template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldScores {
    /// Column-major, digit order (same shape as the template field).
    pub exam_id: Vec<Vec<CellScore>>,
    pub participant_id: Vec<Vec<CellScore>>,
    /// One entry per question, options in alphabet order.
    pub answers: Vec<Vec<CellScore>>,
}

impl FieldScores {
    /// Scores of one field, flattened in decode order.
    pub fn field(&self, id: FieldId) -> Vec<CellScore> {
        match id {
            FieldId::ExamId => self.exam_id.iter().flatten().copied().collect(),
            FieldId::ParticipantId => self.participant_id.iter().flatten().copied().collect(),
            FieldId::Answer(q) => self.answers.get(q).cloned().unwrap_or_default(),
        }
    }

    /// Share of `Unreadable` cells in a field (0 for unknown fields).
    pub fn unreadable_fraction(&self, id: FieldId) -> f32 {
        let cells = self.field(id);
        if cells.is_empty() {
            return 0.0;
        }
        let bad = cells.iter().filter(|c| c.is_unreadable()).count();
        bad as f32 / cells.len() as f32
    }
}

/// Offsets of the sampling points around a cell center, in sheet units.
#[derive(Clone, Debug)]
pub struct SampleLattice {
    offsets: Vec<Vector2<f32>>,
}

impl SampleLattice {
    /// `lattice × lattice` grid clipped to a disk of `inset × radius`.
    pub fn new(radius: f32, params: &SamplingParams) -> Self {
        let n = params.lattice.max(1);
        let rho = params.inset * radius;
        let mut offsets = Vec::with_capacity(n * n);
        for j in 0..n {
            for i in 0..n {
                let u = (i as f32 + 0.5) / n as f32 * 2.0 - 1.0;
                let v = (j as f32 + 0.5) / n as f32 * 2.0 - 1.0;
                if u * u + v * v <= 1.0 {
                    offsets.push(Vector2::new(u * rho, v * rho));
                }
            }
        }
        Self { offsets }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Score one bubble centered at `center` (sheet units).
pub fn sample_cell(
    image: &GrayImageView<'_>,
    transform: &SheetTransform,
    lattice: &SampleLattice,
    center: Point2<f32>,
) -> CellScore {
    if lattice.is_empty() {
        return CellScore::Unreadable;
    }
    let mut sum = 0.0f32;
    for off in &lattice.offsets {
        let Some(q) = transform.to_image(center + off) else {
            return CellScore::Unreadable;
        };
        let Some(v) = sample_bilinear_checked(image, q.x, q.y) else {
            return CellScore::Unreadable;
        };
        sum += transform.photometry.darkness(v);
    }
    CellScore::Fill(sum / lattice.len() as f32)
}

fn sample_numeric(
    image: &GrayImageView<'_>,
    transform: &SheetTransform,
    lattice: &SampleLattice,
    field: &NumericField,
) -> Vec<Vec<CellScore>> {
    field
        .columns
        .iter()
        .map(|column| {
            column
                .iter()
                .map(|&c| sample_cell(image, transform, lattice, c))
                .collect()
        })
        .collect()
}

/// Score every cell of `template` through `transform`.
///
/// Pure: reads `image` and `template`, mutates nothing.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(image, transform, template), fields(rows = template.answers.len()))
)]
pub fn sample(
    image: &GrayImageView<'_>,
    transform: &SheetTransform,
    template: &SheetTemplate,
) -> FieldScores {
    let lattice = SampleLattice::new(template.bubble_radius, &template.sampling);

    let answers = template
        .answers
        .iter()
        .map(|row| {
            row.options
                .iter()
                .map(|&c| sample_cell(image, transform, &lattice, c))
                .collect()
        })
        .collect();

    FieldScores {
        exam_id: sample_numeric(image, transform, &lattice, &template.exam_id),
        participant_id: sample_numeric(image, transform, &lattice, &template.participant_id),
        answers,
    }
}
