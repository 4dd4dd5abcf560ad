// src/types.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// The two movement classes the classifiers distinguish.
///
/// Confusion matrices and per-class breakdowns always use [`Movement::ORDER`]:
/// Flexion first, Extension second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Movement {
    Flexion,
    Extension,
}

impl Movement {
    pub const FLEXION_CODE: i64 = 13;
    pub const EXTENSION_CODE: i64 = 14;
    /// Row/column order of every confusion matrix.
    pub const ORDER: [Movement; 2] = [Movement::Flexion, Movement::Extension];

    pub fn code(self) -> i64 {
        match self {
            Movement::Flexion => Self::FLEXION_CODE,
            Movement::Extension => Self::EXTENSION_CODE,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            Self::FLEXION_CODE => Some(Movement::Flexion),
            Self::EXTENSION_CODE => Some(Movement::Extension),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Movement::Flexion => "Flexion",
            Movement::Extension => "Extension",
        }
    }

    /// Position in [`Movement::ORDER`].
    pub fn index(self) -> usize {
        match self {
            Movement::Flexion => 0,
            Movement::Extension => 1,
        }
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Movement {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize_label(s)
    }
}

const FLEXION_ALIASES: &[&str] = &["flexion", "flex", "flx", "f", "13"];
const EXTENSION_ALIASES: &[&str] = &["extension", "extens", "ext", "e", "14"];

/// Map a free-form class label onto a [`Movement`].
///
/// Matching is case-insensitive, ignores surrounding whitespace and accents
/// ("Flexión" == "flexion"), and accepts the aliases in the fixed tables above,
/// including the numeric movement codes.
pub fn normalize_label(raw: &str) -> Result<Movement, PipelineError> {
    let folded = fold_label(raw);
    if FLEXION_ALIASES.contains(&folded.as_str()) {
        Ok(Movement::Flexion)
    } else if EXTENSION_ALIASES.contains(&folded.as_str()) {
        Ok(Movement::Extension)
    } else {
        Err(PipelineError::UnrecognizedClassLabel {
            label: raw.to_string(),
        })
    }
}

fn fold_label(raw: &str) -> String {
    raw.trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            other => other,
        })
        .collect()
}

/// Canonical subject identifier used for grouping and held-out splits.
///
/// Textual identifiers collapse onto the first run of decimal digits they
/// contain ("S07" and "7" are the same subject). Identifiers without digits
/// are kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubjectKey {
    Id(u64),
    Name(String),
}

impl SubjectKey {
    pub fn normalize(raw: &str) -> Self {
        let digits: String = raw
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            return SubjectKey::Name(raw.to_string());
        }
        match digits.parse::<u64>() {
            Ok(id) => SubjectKey::Id(id),
            // Too long for u64: the run itself, without leading zeros, is the key.
            Err(_) => SubjectKey::Name(digits.trim_start_matches('0').to_string()),
        }
    }
}

impl From<u64> for SubjectKey {
    fn from(value: u64) -> Self {
        SubjectKey::Id(value)
    }
}

impl From<&str> for SubjectKey {
    fn from(value: &str) -> Self {
        SubjectKey::normalize(value)
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKey::Id(id) => write!(f, "{id}"),
            SubjectKey::Name(name) => f.write_str(name),
        }
    }
}

/// Raw (subject, movement code) pair identifying one trial before normalization.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrialKey {
    pub subject: String,
    pub movement_code: i64,
}

impl TrialKey {
    pub fn new(subject: impl Into<String>, movement_code: i64) -> Self {
        Self {
            subject: subject.into(),
            movement_code,
        }
    }
}

impl fmt::Display for TrialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subject {} / movement {}", self.subject, self.movement_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flexion_variants_normalize_to_code_13() {
        for raw in ["FLX", "flexion", "Flexión", " Flex ", "f", "13", "FLEXION"] {
            assert_eq!(normalize_label(raw).unwrap().code(), 13, "{raw}");
        }
    }

    #[test]
    fn extension_variants_normalize_to_code_14() {
        for raw in ["EXT", "extension", "Extensión", "Extens", "e", "14"] {
            assert_eq!(normalize_label(raw).unwrap().code(), 14, "{raw}");
        }
    }

    #[test]
    fn unknown_label_is_rejected_with_its_value() {
        let err = normalize_label("unknown").unwrap_err();
        match err {
            PipelineError::UnrecognizedClassLabel { label } => assert_eq!(label, "unknown"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(normalize_label("").is_err());
        assert!(normalize_label("flexextension").is_err());
    }

    #[test]
    fn subject_keys_collapse_on_embedded_digits() {
        assert_eq!(SubjectKey::normalize("Sujeto 7"), SubjectKey::Id(7));
        assert_eq!(SubjectKey::normalize("7"), SubjectKey::Id(7));
        assert_eq!(SubjectKey::normalize("s07-b12"), SubjectKey::Id(7));
        assert_eq!(
            SubjectKey::normalize("control"),
            SubjectKey::Name("control".into())
        );
        assert_eq!(SubjectKey::from(7), SubjectKey::normalize("S7"));
    }

    #[test]
    fn oversized_digit_runs_still_collapse() {
        let long = SubjectKey::normalize("S99999999999999999999");
        assert_eq!(long, SubjectKey::Name("99999999999999999999".into()));
        assert_eq!(long, SubjectKey::normalize("99999999999999999999"));
        assert_eq!(long, SubjectKey::normalize("subject 0099999999999999999999"));
        assert_ne!(long, SubjectKey::normalize("S99999999999999999998"));
    }

    #[test]
    fn movement_codes_round_trip() {
        for movement in Movement::ORDER {
            assert_eq!(Movement::from_code(movement.code()), Some(movement));
        }
        assert_eq!(Movement::from_code(12), None);
    }
}
