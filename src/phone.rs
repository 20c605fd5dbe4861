//! MSISDN normalization for gateway-supplied phone numbers.
//!
//! The gateway forwards whatever the subscriber's network reports: sometimes
//! `+2547…`, sometimes `2547…`, sometimes the national `07…` form. Sessions are
//! keyed on the international form, so everything is normalized to `+<digits>`
//! before a session is created.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::PhoneError;

static DIALABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9]+$").expect("static regex"));

/// Shortest and longest E.164 numbers, excluding the `+`.
const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

/// Normalizes raw phone numbers into `+<country code><subscriber number>`.
#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    country_code: String,
}

impl PhoneNormalizer {
    /// Create a normalizer that expands national (`0…`) numbers with the
    /// given country calling code, e.g. `"254"`.
    pub fn new(country_code: impl Into<String>) -> Self {
        let country_code: String = country_code.into();
        Self {
            country_code: country_code.trim_start_matches('+').to_string(),
        }
    }

    /// The default country calling code, without the `+`.
    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    /// Normalize a raw phone number.
    pub fn normalize(&self, raw: &str) -> Result<String, PhoneError> {
        let compact: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
            .collect();

        if compact.is_empty() {
            return Err(PhoneError::Empty);
        }
        if !DIALABLE.is_match(&compact) {
            return Err(PhoneError::InvalidCharacters(raw.to_string()));
        }

        let digits = if let Some(rest) = compact.strip_prefix('+') {
            rest.to_string()
        } else if let Some(rest) = compact.strip_prefix("00") {
            rest.to_string()
        } else if let Some(rest) = compact.strip_prefix('0') {
            format!("{}{}", self.country_code, rest)
        } else if compact.starts_with(&self.country_code) {
            compact
        } else {
            return Err(PhoneError::UnknownPrefix(raw.to_string()));
        };

        if digits.starts_with('0') {
            return Err(PhoneError::UnknownPrefix(raw.to_string()));
        }
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
            return Err(PhoneError::InvalidLength(raw.to_string()));
        }

        Ok(format!("+{digits}"))
    }
}

impl Default for PhoneNormalizer {
    fn default() -> Self {
        Self::new("254")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn international_form_is_kept() {
        let n = PhoneNormalizer::default();
        assert_eq!(n.normalize("+254712345678").unwrap(), "+254712345678");
    }

    #[test]
    fn country_code_without_plus() {
        let n = PhoneNormalizer::default();
        assert_eq!(n.normalize("254712345678").unwrap(), "+254712345678");
    }

    #[test]
    fn national_form_is_expanded() {
        let n = PhoneNormalizer::default();
        assert_eq!(n.normalize("0712345678").unwrap(), "+254712345678");
        assert_eq!(n.normalize("0712 345 678").unwrap(), "+254712345678");
    }

    #[test]
    fn double_zero_international_prefix() {
        let n = PhoneNormalizer::default();
        assert_eq!(n.normalize("00254712345678").unwrap(), "+254712345678");
    }

    #[test]
    fn other_country_code() {
        let n = PhoneNormalizer::new("+256");
        assert_eq!(n.country_code(), "256");
        assert_eq!(n.normalize("0772123456").unwrap(), "+256772123456");
    }

    #[test]
    fn rejects_garbage() {
        let n = PhoneNormalizer::default();
        assert_eq!(n.normalize(""), Err(PhoneError::Empty));
        assert_eq!(n.normalize("   "), Err(PhoneError::Empty));
        assert!(matches!(
            n.normalize("07abc45678"),
            Err(PhoneError::InvalidCharacters(_))
        ));
        assert!(matches!(
            n.normalize("+25471234567890123"),
            Err(PhoneError::InvalidLength(_))
        ));
        assert!(matches!(n.normalize("0712"), Err(PhoneError::InvalidLength(_))));
        assert!(matches!(
            n.normalize("712345678"),
            Err(PhoneError::UnknownPrefix(_))
        ));
    }
}
