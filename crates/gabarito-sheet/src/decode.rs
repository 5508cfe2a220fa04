//! Field decoding: fill scores -> digits and answer characters.

use crate::sample::{CellScore, FieldScores};
use crate::template::{DecodePolicy, SheetTemplate};
use serde::{Deserialize, Serialize};

/// Why a numeric field could not be decoded.
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmbiguousMark {
    #[error("column {column} has no mark")]
    Blank { column: usize },
    #[error("column {column} has {marks} marks")]
    Multiple { column: usize, marks: usize },
    #[error("column {column} is not fully readable")]
    Unreadable { column: usize },
    #[error("{ncols} digit columns cannot form an id")]
    Shape { ncols: usize },
}

/// Decode a numeric field.
///
/// `columns` lists the digit columns most significant first; cell `d` of a
/// column stands for digit `d`. Columns may differ in length. Each column
/// must carry exactly one mark.
pub fn decode_numeric(
    columns: &[Vec<CellScore>],
    policy: &DecodePolicy,
) -> Result<i32, AmbiguousMark> {
    let ncols = columns.len();
    if ncols == 0 || columns.iter().any(Vec::is_empty) {
        return Err(AmbiguousMark::Shape { ncols });
    }

    let mut value: i64 = 0;
    for (column, cells) in columns.iter().enumerate() {
        if cells.iter().any(|c| c.is_unreadable()) {
            return Err(AmbiguousMark::Unreadable { column });
        }
        let mut marked = cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_marked(policy.marked_threshold))
            .map(|(d, _)| d);
        let digit = match (marked.next(), marked.next()) {
            (None, _) => return Err(AmbiguousMark::Blank { column }),
            (Some(d), None) => d,
            (Some(_), Some(_)) => {
                let marks = 2 + marked.count();
                return Err(AmbiguousMark::Multiple { column, marks });
            }
        };
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(digit as i64))
            .ok_or(AmbiguousMark::Shape { ncols })?;
    }
    i32::try_from(value).map_err(|_| AmbiguousMark::Shape { ncols })
}

/// Character for one answer row.
pub fn decode_row(row: &[CellScore], policy: &DecodePolicy) -> char {
    let marks: Vec<usize> = row
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_marked(policy.marked_threshold))
        .map(|(i, _)| i)
        .collect();
    let unreadable = row.iter().any(|c| c.is_unreadable());

    match marks.as_slice() {
        [_, _, ..] => policy.double_mark_char,
        _ if unreadable => policy.unreadable_char,
        [] => policy.blank_char,
        [i] => policy.symbol(*i).unwrap_or(policy.unreadable_char),
    }
}

/// One character per answer row, in row order.
pub fn decode_answers(rows: &[Vec<CellScore>], policy: &DecodePolicy) -> String {
    rows.iter().map(|row| decode_row(row, policy)).collect()
}

/// Decoded content of one sheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedFields {
    pub exam_id: Result<i32, AmbiguousMark>,
    pub participant_id: Result<i32, AmbiguousMark>,
    pub answers: String,
}

/// Decode every field of a sampled sheet.
pub fn decode_fields(scores: &FieldScores, template: &SheetTemplate) -> DecodedFields {
    let policy = &template.decode;
    DecodedFields {
        exam_id: decode_numeric(&scores.exam_id, policy),
        participant_id: decode_numeric(&scores.participant_id, policy),
        answers: decode_answers(&scores.answers, policy),
    }
}
