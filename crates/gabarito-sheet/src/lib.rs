//! Answer-sheet layout and the image-space stages of reading it.
//!
//! Stages, in pipeline order:
//! - [`locate`]: find the four corner fiducials, settle which way up the
//!   sheet is from the orientation mark and solve the sheet-to-image
//!   homography ([`SheetTransform`]),
//! - [`sample`]: reduce every template bubble to a [`CellScore`],
//! - [`decode_numeric`] / [`decode_answers`]: turn scores into ids and
//!   answer characters.
//!
//! All stages are pure functions of the image and an immutable
//! [`SheetTemplate`]. Enable the `synth` feature for [`synth::render_sheet`],
//! which draws synthetic sheets for tests and benchmarks.

pub mod decode;
pub mod locate;
pub mod sample;
#[cfg(any(test, feature = "synth"))]
pub mod synth;
pub mod template;

pub use decode::{
    decode_answers, decode_fields, decode_numeric, decode_row, AmbiguousMark, DecodedFields,
};
pub use locate::{locate, LocateError, SheetTransform};
pub use sample::{sample, sample_cell, CellScore, FieldScores, SampleLattice};
pub use template::{
    answer_grid, AnswerRow, DecodePolicy, Extent, FieldId, Fiducial, LocatorParams, NumericField,
    SamplingParams, SheetTemplate, TemplateError, TemplateIoError, STANDARD_TEMPLATE_VERSION,
};
