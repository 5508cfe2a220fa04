//! The result of reading one sheet.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel for an id that could not be decoded.
pub const UNKNOWN_ID: i32 = -1;

/// Outcome class of a read. The numeric codes are stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Success,
    /// Path missing or unreadable, or an empty buffer.
    SourceUnavailable,
    /// Unknown or disabled container format.
    UnsupportedFormat,
    /// The container could not be decoded (corrupt, truncated, too large).
    DecodeFailure,
    /// No sheet was found in the image.
    SheetNotDetected,
    /// A sheet was found but its geometry is not trustworthy.
    SheetDistorted,
    /// The reader itself failed.
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Success,
        ErrorKind::SourceUnavailable,
        ErrorKind::UnsupportedFormat,
        ErrorKind::DecodeFailure,
        ErrorKind::SheetNotDetected,
        ErrorKind::SheetDistorted,
        ErrorKind::Internal,
    ];

    pub const fn code(self) -> i32 {
        match self {
            ErrorKind::Success => 0,
            ErrorKind::SourceUnavailable => 1,
            ErrorKind::UnsupportedFormat => 2,
            ErrorKind::DecodeFailure => 3,
            ErrorKind::SheetNotDetected => 4,
            ErrorKind::SheetDistorted => 5,
            ErrorKind::Internal => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    /// Short human-readable description.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::Success => "sheet read successfully",
            ErrorKind::SourceUnavailable => "image source is missing or unreadable",
            ErrorKind::UnsupportedFormat => "image format is not supported",
            ErrorKind::DecodeFailure => "image could not be decoded",
            ErrorKind::SheetNotDetected => "no answer sheet found in the image",
            ErrorKind::SheetDistorted => "answer sheet is too distorted to read",
            ErrorKind::Internal => "internal reader failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Decoded content of one sheet, or why there is none.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reading {
    Success {
        /// Exam id, or [`UNKNOWN_ID`] when ambiguous.
        id_prova: i32,
        /// Participant id, or [`UNKNOWN_ID`] when ambiguous.
        id_participante: i32,
        /// One character per question.
        leitura: String,
    },
    Failure {
        kind: ErrorKind,
    },
}

impl Reading {
    pub fn failure(kind: ErrorKind) -> Self {
        Reading::Failure { kind }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Reading::Success { .. } => ErrorKind::Success,
            Reading::Failure { kind } => *kind,
        }
    }

    #[inline]
    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Reading::Success { .. })
    }

    pub fn id_prova(&self) -> i32 {
        match self {
            Reading::Success { id_prova, .. } => *id_prova,
            Reading::Failure { .. } => UNKNOWN_ID,
        }
    }

    pub fn id_participante(&self) -> i32 {
        match self {
            Reading::Success {
                id_participante, ..
            } => *id_participante,
            Reading::Failure { .. } => UNKNOWN_ID,
        }
    }

    pub fn leitura(&self) -> Option<&str> {
        match self {
            Reading::Success { leitura, .. } => Some(leitura),
            Reading::Failure { .. } => None,
        }
    }

    /// Flat record for binding layers.
    pub fn to_record(&self) -> ReadingRecord {
        ReadingRecord {
            erro: self.code(),
            id_prova: self.id_prova(),
            id_participante: self.id_participante(),
            leitura: self.leitura().map(str::to_owned),
        }
    }
}

/// Fixed-shape view of a [`Reading`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingRecord {
    pub erro: i32,
    pub id_prova: i32,
    pub id_participante: i32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub leitura: Option<String>,
}

impl ReadingRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&Reading> for ReadingRecord {
    fn from(reading: &Reading) -> Self {
        reading.to_record()
    }
}

impl From<Reading> for ReadingRecord {
    fn from(reading: Reading) -> Self {
        reading.to_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_invertible() {
        let codes: Vec<i32> = ErrorKind::ALL.iter().map(|k| k.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 5, 6]);
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(42), None);
    }

    #[test]
    fn failure_record_has_sentinels_and_no_answers() {
        let r = Reading::failure(ErrorKind::SheetNotDetected).to_record();
        assert_eq!(
            r,
            ReadingRecord {
                erro: 4,
                id_prova: -1,
                id_participante: -1,
                leitura: None,
            }
        );
        let json = r.to_json().expect("json");
        assert_eq!(json, r#"{"erro":4,"id_prova":-1,"id_participante":-1}"#);
    }

    #[test]
    fn success_record_carries_fields() {
        let reading = Reading::Success {
            id_prova: 372,
            id_participante: -1,
            leitura: "abX-".to_string(),
        };
        let r = ReadingRecord::from(&reading);
        assert_eq!(r.erro, 0);
        assert_eq!(r.id_prova, 372);
        assert_eq!(r.id_participante, UNKNOWN_ID);
        assert_eq!(r.leitura.as_deref(), Some("abX-"));

        let json = serde_json::to_string(&reading).expect("json");
        assert!(json.contains(r#""status":"success""#), "{json}");
    }
}
