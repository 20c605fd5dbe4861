//! Registration / PIN-management levels: where a session is in the dialog.

use serde::{Deserialize, Serialize};

/// The persisted position of a session in the USSD dialog.
///
/// Levels are totally ordered and a session's level never decreases:
/// Welcome → FirstName → LastName → DateOfBirth → Pin → ConfirmPin →
/// PostRegistration → CurrentPin → NewPin → ConfirmNewPin → Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Welcome,
    FirstName,
    LastName,
    DateOfBirth,
    Pin,
    ConfirmPin,
    PostRegistration,
    CurrentPin,
    NewPin,
    ConfirmNewPin,
    /// The dialog ended with an `END` response; no further input is accepted.
    Closed,
}

impl Level {
    pub const ALL: [Level; 11] = [
        Level::Welcome,
        Level::FirstName,
        Level::LastName,
        Level::DateOfBirth,
        Level::Pin,
        Level::ConfirmPin,
        Level::PostRegistration,
        Level::CurrentPin,
        Level::NewPin,
        Level::ConfirmNewPin,
        Level::Closed,
    ];

    /// Numeric code stored in the session table.
    pub fn code(self) -> i64 {
        match self {
            Self::Welcome => 0,
            Self::FirstName => 1,
            Self::LastName => 2,
            Self::DateOfBirth => 3,
            Self::Pin => 4,
            Self::ConfirmPin => 5,
            Self::PostRegistration => 6,
            Self::CurrentPin => 7,
            Self::NewPin => 8,
            Self::ConfirmNewPin => 9,
            Self::Closed => 10,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.code() == code)
    }

    /// Whether the dialog is over for this session.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether a transition from `self` to `target` is allowed.
    ///
    /// Staying put is always allowed (a rejected answer); otherwise only the
    /// edges of the dialog graph are.
    pub fn can_transition_to(self, target: Level) -> bool {
        use Level::*;
        self == target
            || matches!(
                (self, target),
                (Welcome, FirstName)
                    | (FirstName, LastName)
                    | (LastName, DateOfBirth)
                    | (DateOfBirth, Pin)
                    | (Pin, ConfirmPin)
                    | (ConfirmPin, PostRegistration)
                    | (ConfirmPin, Closed)
                    | (PostRegistration, CurrentPin)
                    | (PostRegistration, Closed)
                    | (CurrentPin, NewPin)
                    | (NewPin, ConfirmNewPin)
                    | (ConfirmNewPin, Closed)
            )
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::Welcome
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Welcome => "welcome",
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::DateOfBirth => "date_of_birth",
            Self::Pin => "pin",
            Self::ConfirmPin => "confirm_pin",
            Self::PostRegistration => "post_registration",
            Self::CurrentPin => "current_pin",
            Self::NewPin => "new_pin",
            Self::ConfirmNewPin => "confirm_new_pin",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for level in Level::ALL {
            assert_eq!(Level::from_code(level.code()), Some(level));
        }
        assert_eq!(Level::from_code(-1), None);
        assert_eq!(Level::from_code(11), None);
    }

    #[test]
    fn codes_follow_dialog_order() {
        let codes: Vec<i64> = Level::ALL.iter().map(|l| l.code()).collect();
        assert_eq!(codes, (0..=10).collect::<Vec<_>>());
        for pair in Level::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn every_edge_moves_forward() {
        for from in Level::ALL {
            for to in Level::ALL {
                if from.can_transition_to(to) {
                    assert!(to >= from, "{from} -> {to} goes backwards");
                }
            }
        }
    }

    #[test]
    fn invalid_transitions() {
        use Level::*;
        assert!(!Welcome.can_transition_to(LastName));
        assert!(!ConfirmPin.can_transition_to(Pin));
        assert!(!Closed.can_transition_to(Welcome));
        assert!(!PostRegistration.can_transition_to(NewPin));
    }

    #[test]
    fn only_closed_is_terminal() {
        for level in Level::ALL {
            assert_eq!(level.is_terminal(), level == Level::Closed);
        }
    }

    #[test]
    fn display_matches_serde() {
        for level in Level::ALL {
            let json = serde_json::to_string(&level).unwrap();
            assert_eq!(format!("\"{level}\""), json);
        }
    }
}
