//! Input grammar for each registration answer.
//!
//! All checks are pure; a failed check is an ordinary outcome that the router
//! turns into a re-prompt.

use chrono::NaiveDate;

/// Length of a `DDMMYYYY` date of birth.
pub const DATE_LENGTH: usize = 8;

/// Length of an account PIN.
pub const PIN_LENGTH: usize = 4;

/// A name is a non-empty run of ASCII letters.
pub fn is_valid_name(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_alphabetic())
}

/// Parse a `DDMMYYYY` date of birth, rejecting impossible calendar dates.
pub fn parse_date_of_birth(token: &str) -> Option<NaiveDate> {
    if token.len() != DATE_LENGTH || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let day: u32 = token[0..2].parse().ok()?;
    let month: u32 = token[2..4].parse().ok()?;
    let year: i32 = token[4..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// A PIN is exactly four ASCII digits.
pub fn is_valid_pin(token: &str) -> bool {
    token.len() == PIN_LENGTH && token.chars().all(|c| c.is_ascii_digit())
}
