//! Grading a reading against an answer key.

use crate::reading::{Reading, UNKNOWN_ID};
use gabarito_sheet::DecodePolicy;
use serde::{Deserialize, Serialize};

/// Older readers wrote `'0'` for an unanswered question; it never scores.
pub const LEGACY_BLANK: char = '0';

/// Result of grading one reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Questions answered as in the key.
    pub correct: usize,
    /// Questions compared (the shorter of key and reading).
    pub graded: usize,
    /// `correct × weight`, rounded to two decimals.
    pub grade: f64,
}

impl Score {
    /// Grade `reading`; failed reads and unknown exams score zero.
    pub fn for_reading(reading: &Reading, key: &str, policy: &DecodePolicy, weight: f64) -> Self {
        match reading.leitura() {
            Some(leitura) if reading.id_prova() != UNKNOWN_ID => {
                score_answers(key, leitura, policy, weight)
            }
            _ => Score::default(),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Count matching answers. Placeholders and [`LEGACY_BLANK`] never count,
/// even if the key contains the same character.
pub fn score_answers(key: &str, leitura: &str, policy: &DecodePolicy, weight: f64) -> Score {
    let mut correct = 0;
    let mut graded = 0;
    for (k, r) in key.chars().zip(leitura.chars()) {
        graded += 1;
        if r == k && r != LEGACY_BLANK && !policy.is_placeholder(r) {
            correct += 1;
        }
    }
    Score {
        correct,
        graded,
        grade: round2(correct as f64 * weight),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::ErrorKind;
    use approx::assert_relative_eq;

    #[test]
    fn counts_only_real_matches() {
        let policy = DecodePolicy::default();
        let s = score_answers("abcde-X?", "abxde-X?", &policy, 0.5);
        assert_eq!(s.correct, 4);
        assert_eq!(s.graded, 8);
        assert_relative_eq!(s.grade, 2.0);
    }

    #[test]
    fn legacy_zero_blanks_never_match() {
        let policy = DecodePolicy::default();
        let s = score_answers("a0c0", "a0c0", &policy, 1.0);
        assert_eq!((s.correct, s.graded), (2, 4));
        assert_relative_eq!(s.grade, 2.0);
    }

    #[test]
    fn compares_over_the_shorter_string() {
        let policy = DecodePolicy::default();
        let s = score_answers("abc", "abcde", &policy, 1.0 / 3.0);
        assert_eq!((s.correct, s.graded), (3, 3));
        assert_relative_eq!(s.grade, 1.0);

        let s = score_answers("abcab", "ab", &policy, 0.333);
        assert_eq!(s.graded, 2);
        assert_relative_eq!(s.grade, 0.67);
    }

    #[test]
    fn failed_or_unknown_exam_scores_zero() {
        let policy = DecodePolicy::default();
        let failed = Reading::failure(ErrorKind::SheetDistorted);
        assert_eq!(Score::for_reading(&failed, "abc", &policy, 1.0), Score::default());

        let unknown = Reading::Success {
            id_prova: UNKNOWN_ID,
            id_participante: 7,
            leitura: "abc".to_string(),
        };
        assert_eq!(Score::for_reading(&unknown, "abc", &policy, 1.0), Score::default());

        let ok = Reading::Success {
            id_prova: 12,
            id_participante: 7,
            leitura: "abd".to_string(),
        };
        let s = Score::for_reading(&ok, "abc", &policy, 2.5);
        assert_eq!(s.correct, 2);
        assert_relative_eq!(s.grade, 5.0);
    }
}
