use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MIN_POSTCODE_LEN: usize = 5;
const MAX_POSTCODE_LEN: usize = 7;
const INWARD_LEN: usize = 3;

/// Normalized UK postcode in `OUTWARD INWARD` form, e.g. `SW1A 1AA`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Postcode(String);

impl Postcode {
    /// Parse and normalize a postcode; whitespace and case are ignored.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let compact: String = input
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_uppercase())
            .collect();
        if compact.is_empty() {
            return Err(ValidationError::EmptyPostcode);
        }

        let len = compact.chars().count();
        if !(MIN_POSTCODE_LEN..=MAX_POSTCODE_LEN).contains(&len) {
            return Err(ValidationError::PostcodeLength {
                len,
                min: MIN_POSTCODE_LEN,
                max: MAX_POSTCODE_LEN,
            });
        }

        for (index, ch) in compact.chars().enumerate() {
            if !ch.is_ascii_alphanumeric() {
                return Err(ValidationError::PostcodeInvalidChar { ch, index });
            }
        }

        let (outward, inward) = compact.split_at(len - INWARD_LEN);
        let outward_valid = outward.starts_with(|ch: char| ch.is_ascii_alphabetic())
            && outward.chars().any(|ch| ch.is_ascii_digit());
        if !outward_valid {
            return Err(ValidationError::PostcodeInvalidOutward {
                value: outward.to_owned(),
            });
        }

        let mut inward_chars = inward.chars();
        let inward_valid = inward_chars.next().is_some_and(|ch| ch.is_ascii_digit())
            && inward_chars.all(|ch| ch.is_ascii_alphabetic());
        if !inward_valid {
            return Err(ValidationError::PostcodeInvalidInward {
                value: inward.to_owned(),
            });
        }

        Ok(Self(format!("{outward} {inward}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn outward(&self) -> &str {
        self.0.split(' ').next().unwrap_or_default()
    }

    /// Postcode without the separating space, as used in some URL paths.
    pub fn compact(&self) -> String {
        self.0.replace(' ', "")
    }
}

impl Display for Postcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Postcode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Postcode {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Postcode> for String {
    fn from(value: Postcode) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_spacing_and_case() {
        let postcode = Postcode::parse("  sw1a1aa ").expect("valid postcode");
        assert_eq!(postcode.as_str(), "SW1A 1AA");
        assert_eq!(postcode.outward(), "SW1A");
        assert_eq!(postcode.compact(), "SW1A1AA");

        let short = Postcode::parse("e1 6an").expect("valid postcode");
        assert_eq!(short.as_str(), "E1 6AN");
    }

    #[test]
    fn rejects_malformed_postcodes() {
        assert_eq!(Postcode::parse("   "), Err(ValidationError::EmptyPostcode));
        assert!(matches!(
            Postcode::parse("SW1"),
            Err(ValidationError::PostcodeLength { len: 3, .. })
        ));
        assert!(matches!(
            Postcode::parse("SW1-1AA"),
            Err(ValidationError::PostcodeInvalidChar { ch: '-', index: 3 })
        ));
        assert!(matches!(
            Postcode::parse("1W1A 1AA"),
            Err(ValidationError::PostcodeInvalidOutward { .. })
        ));
        assert!(matches!(
            Postcode::parse("HG3 EN1"),
            Err(ValidationError::PostcodeInvalidInward { .. })
        ));
    }

    #[test]
    fn deserializes_through_validation() {
        let parsed: Postcode = serde_json::from_str("\"hg31en\"").expect("valid postcode");
        assert_eq!(parsed.as_str(), "HG3 1EN");
        assert!(serde_json::from_str::<Postcode>("\"nope\"").is_err());
    }
}
