//! Sheet layout description.
//!
//! Everything lives in *sheet units*: the page spans `[0, width] × [0, height]`
//! with `y` growing downwards. The built-in layout uses millimetres on an A4
//! page, but any unit works as long as it is used consistently.

use gabarito_core::homography_from_4pt;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::{fs, path::Path};

/// Version tag of [`SheetTemplate::standard`].
pub const STANDARD_TEMPLATE_VERSION: u32 = 1;

/// Digit rows per numeric column never exceed this (digits `0..=9`).
pub const MAX_DIGITS_PER_COLUMN: usize = 10;

/// Numeric fields decode into `i32`; nine decimal digits always fit.
pub const MAX_NUMERIC_COLUMNS: usize = 9;

/// Logical field of a sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    ExamId,
    ParticipantId,
    /// Zero-based question index.
    Answer(usize),
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldId::ExamId => f.write_str("id_prova"),
            FieldId::ParticipantId => f.write_str("id_participante"),
            FieldId::Answer(q) => write!(f, "question {}", q + 1),
        }
    }
}

/// Axis-aligned rectangle in sheet units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extent {
    pub min: Point2<f32>,
    pub max: Point2<f32>,
}

impl Extent {
    pub fn around(center: Point2<f32>, half: f32) -> Self {
        Self {
            min: Point2::new(center.x - half, center.y - half),
            max: Point2::new(center.x + half, center.y + half),
        }
    }

    pub fn union(&self, other: &Extent) -> Extent {
        Extent {
            min: Point2::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point2::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    /// Strict overlap; touching edges do not count.
    pub fn overlaps(&self, other: &Extent) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    pub fn within(&self, width: f32, height: f32) -> bool {
        self.min.x >= 0.0 && self.min.y >= 0.0 && self.max.x <= width && self.max.y <= height
    }

    /// TL, TR, BR, BL.
    pub fn corners(&self) -> [Point2<f32>; 4] {
        [
            self.min,
            Point2::new(self.max.x, self.min.y),
            self.max,
            Point2::new(self.min.x, self.max.y),
        ]
    }
}

fn extent_of(cells: impl IntoIterator<Item = Point2<f32>>, radius: f32) -> Option<Extent> {
    cells
        .into_iter()
        .map(|c| Extent::around(c, radius))
        .reduce(|a, b| a.union(&b))
}

/// Solid printed square: a corner fiducial or the orientation mark.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fiducial {
    pub center: Point2<f32>,
    pub side: f32,
}

impl Fiducial {
    pub fn extent(&self) -> Extent {
        Extent::around(self.center, 0.5 * self.side)
    }
}

/// Block of digit columns; each column is a one-of-N choice.
///
/// `columns[c][d]` is the center of the bubble for digit `d` in column `c`.
/// Columns are listed most significant first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericField {
    pub columns: Vec<Vec<Point2<f32>>>,
}

impl NumericField {
    /// Regular grid: columns advance along `x`, digits along `y`.
    pub fn grid(
        origin: Point2<f32>,
        columns: usize,
        digits: usize,
        col_pitch: f32,
        row_pitch: f32,
    ) -> Self {
        let columns = (0..columns)
            .map(|c| {
                (0..digits)
                    .map(|d| {
                        Point2::new(
                            origin.x + c as f32 * col_pitch,
                            origin.y + d as f32 * row_pitch,
                        )
                    })
                    .collect()
            })
            .collect();
        Self { columns }
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn cell_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Cells in column-major, digit order.
    pub fn cells(&self) -> impl Iterator<Item = Point2<f32>> + '_ {
        self.columns.iter().flatten().copied()
    }
}

/// One question: option bubbles in alphabet order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnswerRow {
    pub options: Vec<Point2<f32>>,
}

/// Regular block of answer rows: options along `x`, questions along `y`.
pub fn answer_grid(
    origin: Point2<f32>,
    rows: usize,
    options: usize,
    col_pitch: f32,
    row_pitch: f32,
) -> Vec<AnswerRow> {
    (0..rows)
        .map(|r| AnswerRow {
            options: (0..options)
                .map(|o| {
                    Point2::new(
                        origin.x + o as f32 * col_pitch,
                        origin.y + r as f32 * row_pitch,
                    )
                })
                .collect(),
        })
        .collect()
}

/// How cell scores turn into characters and digits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodePolicy {
    /// A cell counts as marked when its fill score is strictly above this.
    pub marked_threshold: f32,
    /// Symbol for each option column, in column order.
    pub alphabet: String,
    /// Emitted for a row without marks.
    pub blank_char: char,
    /// Emitted for a row with more than one mark.
    pub double_mark_char: char,
    /// Emitted for a row that could not be read completely.
    pub unreadable_char: char,
}

impl Default for DecodePolicy {
    fn default() -> Self {
        Self {
            marked_threshold: 0.5,
            alphabet: "abcde".to_string(),
            blank_char: '-',
            double_mark_char: 'X',
            unreadable_char: '?',
        }
    }
}

impl DecodePolicy {
    #[inline]
    pub fn symbol(&self, index: usize) -> Option<char> {
        self.alphabet.chars().nth(index)
    }

    /// True for the blank / double-mark / unreadable placeholders.
    #[inline]
    pub fn is_placeholder(&self, c: char) -> bool {
        c == self.blank_char || c == self.double_mark_char || c == self.unreadable_char
    }
}

/// Per-cell sampling pattern.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Sampling disk radius relative to the bubble radius. Keeps the printed
    /// outline out of the score.
    pub inset: f32,
    /// Lattice points per axis across the sampling disk.
    pub lattice: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            inset: 0.6,
            lattice: 7,
        }
    }
}

/// Fiducial search tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorParams {
    /// Dark components smaller than this (in pixels) are ignored.
    pub min_fiducial_area_px: usize,
    /// Minimum area / bounding-box area. A square rotated by 45° scores 0.5.
    pub min_fill_ratio: f32,
    /// Maximum bounding-box aspect ratio (long side / short side).
    pub max_aspect: f32,
    /// Candidates smaller than this fraction of the largest one are not fiducials.
    pub fiducial_area_ratio: f32,
    /// Largest allowed area ratio between the four picked fiducials.
    pub max_area_spread: f32,
    /// Allowed relative deviation of the located quad's aspect from the template's.
    pub max_aspect_deviation: f32,
}

impl Default for LocatorParams {
    fn default() -> Self {
        Self {
            min_fiducial_area_px: 16,
            min_fill_ratio: 0.45,
            max_aspect: 2.0,
            fiducial_area_ratio: 0.35,
            max_area_spread: 4.0,
            max_aspect_deviation: 0.35,
        }
    }
}

fn default_max_unreadable_frac() -> f32 {
    0.25
}

/// Template validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("sheet width and height must be > 0")]
    InvalidSheetSize,
    #[error("bubble radius must be > 0")]
    InvalidBubbleRadius,
    #[error("fiducial {index} is degenerate or outside the sheet")]
    InvalidFiducial { index: usize },
    #[error("fiducials must be listed TL, TR, BR, BL and form a convex quad")]
    FiducialOrder,
    #[error("orientation mark is degenerate, outside the sheet or as large as a fiducial")]
    InvalidOrientationMark,
    #[error("orientation mark turned by {quarter_turns} quarter turns lands on `{region}`")]
    AmbiguousOrientation { quarter_turns: usize, region: String },
    #[error("field `{field}` has no cells")]
    EmptyField { field: FieldId },
    #[error("field `{field}` has {columns} digit columns (allowed 1..={max})", max = MAX_NUMERIC_COLUMNS)]
    InvalidColumnCount { field: FieldId, columns: usize },
    #[error("field `{field}` column {column} has {digits} digit cells (allowed 1..={max})", max = MAX_DIGITS_PER_COLUMN)]
    InvalidDigitColumn {
        field: FieldId,
        column: usize,
        digits: usize,
    },
    #[error("field `{field}` extends outside the sheet")]
    OutsideSheet { field: FieldId },
    #[error("regions `{a}` and `{b}` overlap")]
    Overlap { a: String, b: String },
    #[error("alphabet has {alphabet} symbols but question {question} has {options} options")]
    AlphabetTooShort {
        alphabet: usize,
        question: usize,
        options: usize,
    },
    #[error("placeholder characters must be distinct and outside the alphabet")]
    AmbiguousPlaceholders,
    #[error("`{name}` must lie in (0, 1)")]
    InvalidFraction { name: &'static str },
    #[error("sampling lattice must be >= 1")]
    InvalidLattice,
}

/// Errors from loading or saving a template.
#[derive(thiserror::Error, Debug)]
pub enum TemplateIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] TemplateError),
}

/// Fixed, versioned answer-sheet layout.
///
/// Immutable once loaded; share it by reference (or `Arc`) between reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SheetTemplate {
    pub name: String,
    pub version: u32,
    pub width: f32,
    pub height: f32,
    /// Corner fiducials in TL, TR, BR, BL order.
    pub fiducials: [Fiducial; 4],
    /// Smaller square that tells which way up the sheet is. It must stay
    /// below the fiducial class and its quarter-turn images must fall on
    /// bare paper.
    pub orientation_mark: Fiducial,
    pub bubble_radius: f32,
    pub exam_id: NumericField,
    pub participant_id: NumericField,
    pub answers: Vec<AnswerRow>,
    #[serde(default)]
    pub decode: DecodePolicy,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default)]
    pub locator: LocatorParams,
    /// Fraction of unreadable cells a field may contain before the whole
    /// sheet is rejected as distorted.
    #[serde(default = "default_max_unreadable_frac")]
    pub max_unreadable_frac: f32,
}

impl SheetTemplate {
    /// Built-in A4 layout (millimetres): 3-digit exam id, 4-digit participant
    /// id, 20 questions with options `a..e` in two blocks of ten.
    pub fn standard() -> Self {
        let side = 10.0;
        let fiducials = [(12.0, 12.0), (198.0, 12.0), (198.0, 285.0), (12.0, 285.0)].map(
            |(x, y)| Fiducial {
                center: Point2::new(x, y),
                side,
            },
        );

        let orientation_mark = Fiducial {
            center: Point2::new(26.0, 12.0),
            side: 5.0,
        };

        let mut answers = answer_grid(Point2::new(30.0, 110.0), 10, 5, 8.0, 8.0);
        answers.extend(answer_grid(Point2::new(120.0, 110.0), 10, 5, 8.0, 8.0));

        Self {
            name: "gabarito-a4".to_string(),
            version: STANDARD_TEMPLATE_VERSION,
            width: 210.0,
            height: 297.0,
            fiducials,
            orientation_mark,
            bubble_radius: 2.2,
            exam_id: NumericField::grid(Point2::new(30.0, 30.0), 3, 10, 7.0, 6.0),
            participant_id: NumericField::grid(Point2::new(70.0, 30.0), 4, 10, 7.0, 6.0),
            answers,
            decode: DecodePolicy::default(),
            sampling: SamplingParams::default(),
            locator: LocatorParams::default(),
            max_unreadable_frac: default_max_unreadable_frac(),
        }
    }

    /// Parse and validate a JSON template.
    pub fn from_json(raw: &str) -> Result<Self, TemplateIoError> {
        let template: Self = serde_json::from_str(raw)?;
        template.validate()?;
        Ok(template)
    }

    /// Load and validate a JSON template from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, TemplateIoError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Write this template to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), TemplateIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    #[inline]
    pub fn answer_row_count(&self) -> usize {
        self.answers.len()
    }

    pub fn fiducial_centers(&self) -> [Point2<f32>; 4] {
        self.fiducials.map(|f| f.center)
    }

    /// Cell centers of one field, in decode order.
    pub fn field_cells(&self, id: FieldId) -> Vec<Point2<f32>> {
        match id {
            FieldId::ExamId => self.exam_id.cells().collect(),
            FieldId::ParticipantId => self.participant_id.cells().collect(),
            FieldId::Answer(q) => self
                .answers
                .get(q)
                .map(|row| row.options.clone())
                .unwrap_or_default(),
        }
    }

    /// All fields, identifiers first, then questions in order.
    pub fn field_ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        [FieldId::ExamId, FieldId::ParticipantId]
            .into_iter()
            .chain((0..self.answers.len()).map(FieldId::Answer))
    }

    /// Bounding box of a field's bubbles.
    pub fn field_extent(&self, id: FieldId) -> Option<Extent> {
        extent_of(self.field_cells(id), self.bubble_radius)
    }

    /// Bounding box of every bubble on the sheet.
    pub fn content_extent(&self) -> Option<Extent> {
        self.field_ids()
            .filter_map(|id| self.field_extent(id))
            .reduce(|a, b| a.union(&b))
    }

    /// Check the layout invariants. Loaders call this; hand-built templates
    /// should too before being shared.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
        {
            return Err(TemplateError::InvalidSheetSize);
        }
        if !self.bubble_radius.is_finite() || self.bubble_radius <= 0.0 {
            return Err(TemplateError::InvalidBubbleRadius);
        }
        self.validate_fiducials()?;
        self.validate_orientation_mark()?;
        self.validate_numeric(FieldId::ExamId, &self.exam_id)?;
        self.validate_numeric(FieldId::ParticipantId, &self.participant_id)?;
        if self.answers.is_empty() {
            return Err(TemplateError::EmptyField {
                field: FieldId::Answer(0),
            });
        }
        self.validate_policy()?;

        let mut regions: Vec<(String, Extent)> = Vec::new();
        for (i, f) in self.fiducials.iter().enumerate() {
            regions.push((format!("fiducial {i}"), f.extent()));
        }
        regions.push((
            "orientation mark".to_string(),
            self.orientation_mark.extent(),
        ));
        for id in self.field_ids() {
            let extent = self
                .field_extent(id)
                .ok_or(TemplateError::EmptyField { field: id })?;
            if !extent.within(self.width, self.height) {
                return Err(TemplateError::OutsideSheet { field: id });
            }
            regions.push((id.to_string(), extent));
        }
        for (i, (a, ea)) in regions.iter().enumerate() {
            for (b, eb) in &regions[i + 1..] {
                if ea.overlaps(eb) {
                    return Err(TemplateError::Overlap {
                        a: a.clone(),
                        b: b.clone(),
                    });
                }
            }
        }

        self.validate_orientation(&regions)?;

        if !(self.max_unreadable_frac >= 0.0 && self.max_unreadable_frac < 1.0) {
            return Err(TemplateError::InvalidFraction {
                name: "max_unreadable_frac",
            });
        }
        Ok(())
    }

    fn validate_fiducials(&self) -> Result<(), TemplateError> {
        for (index, f) in self.fiducials.iter().enumerate() {
            if !f.side.is_finite() || f.side <= 0.0 || !f.extent().within(self.width, self.height)
            {
                return Err(TemplateError::InvalidFiducial { index });
            }
        }
        if !quad_is_convex(&self.fiducial_centers()) {
            return Err(TemplateError::FiducialOrder);
        }
        Ok(())
    }

    fn validate_orientation_mark(&self) -> Result<(), TemplateError> {
        let mark = &self.orientation_mark;
        if !mark.side.is_finite()
            || mark.side <= 0.0
            || !mark.extent().within(self.width, self.height)
        {
            return Err(TemplateError::InvalidOrientationMark);
        }
        let smallest = self
            .fiducials
            .iter()
            .map(|f| f.side)
            .fold(f32::INFINITY, f32::min);
        let area_ratio = (mark.side / smallest).powi(2);
        if area_ratio >= self.locator.fiducial_area_ratio {
            return Err(TemplateError::InvalidOrientationMark);
        }
        Ok(())
    }

    /// The locator tries every cyclic relabeling of the fiducials; under the
    /// wrong ones the mark must map onto bare paper. The images are padded
    /// to twice the mark side.
    fn validate_orientation(&self, regions: &[(String, Extent)]) -> Result<(), TemplateError> {
        let centers = self.fiducial_centers();
        let mark = &self.orientation_mark;
        for quarter_turns in 1..4 {
            let turned: [Point2<f32>; 4] =
                std::array::from_fn(|i| centers[(i + quarter_turns) % 4]);
            let image = homography_from_4pt(&centers, &turned)
                .and_then(|h| h.try_apply(mark.center))
                .ok_or(TemplateError::FiducialOrder)?;
            let footprint = Extent::around(image, mark.side);
            if let Some((region, _)) = regions.iter().find(|(_, e)| e.overlaps(&footprint)) {
                return Err(TemplateError::AmbiguousOrientation {
                    quarter_turns,
                    region: region.clone(),
                });
            }
        }
        Ok(())
    }

    fn validate_numeric(&self, id: FieldId, field: &NumericField) -> Result<(), TemplateError> {
        let columns = field.ncols();
        if columns == 0 {
            return Err(TemplateError::EmptyField { field: id });
        }
        if columns > MAX_NUMERIC_COLUMNS {
            return Err(TemplateError::InvalidColumnCount { field: id, columns });
        }
        for (column, cells) in field.columns.iter().enumerate() {
            let digits = cells.len();
            if digits == 0 || digits > MAX_DIGITS_PER_COLUMN {
                return Err(TemplateError::InvalidDigitColumn {
                    field: id,
                    column,
                    digits,
                });
            }
        }
        Ok(())
    }

    fn validate_policy(&self) -> Result<(), TemplateError> {
        let policy = &self.decode;
        let alphabet = policy.alphabet.chars().count();
        for (question, row) in self.answers.iter().enumerate() {
            if row.options.is_empty() {
                return Err(TemplateError::EmptyField {
                    field: FieldId::Answer(question),
                });
            }
            if row.options.len() > alphabet {
                return Err(TemplateError::AlphabetTooShort {
                    alphabet,
                    question,
                    options: row.options.len(),
                });
            }
        }

        let placeholders = [
            policy.blank_char,
            policy.double_mark_char,
            policy.unreadable_char,
        ];
        let distinct = placeholders[0] != placeholders[1]
            && placeholders[0] != placeholders[2]
            && placeholders[1] != placeholders[2];
        if !distinct || placeholders.iter().any(|&c| policy.alphabet.contains(c)) {
            return Err(TemplateError::AmbiguousPlaceholders);
        }

        if !(policy.marked_threshold > 0.0 && policy.marked_threshold < 1.0) {
            return Err(TemplateError::InvalidFraction {
                name: "marked_threshold",
            });
        }
        if !(self.sampling.inset > 0.0 && self.sampling.inset < 1.0) {
            return Err(TemplateError::InvalidFraction {
                name: "sampling.inset",
            });
        }
        if self.sampling.lattice == 0 {
            return Err(TemplateError::InvalidLattice);
        }
        Ok(())
    }
}

/// Strictly convex quad listed clockwise in a `y`-down frame (TL, TR, BR, BL).
pub(crate) fn quad_is_convex(q: &[Point2<f32>; 4]) -> bool {
    (0..4).all(|i| {
        let a = q[i];
        let b = q[(i + 1) % 4];
        let c = q[(i + 2) % 4];
        let e1 = b - a;
        let e2 = c - b;
        e1.x * e2.y - e1.y * e2.x > 0.0
    })
}
