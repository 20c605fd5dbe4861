//! Menu renderer: the literal text the gateway shows the subscriber.
//!
//! The gateway decides whether to keep the dialog open by the `CON` / `END`
//! prefix, and subscribers have seen this exact copy, so every string here is
//! fixed.

use serde::Serialize;

use super::level::Level;

/// Prefix for responses that keep the dialog open.
pub const CONTINUE_PREFIX: &str = "CON ";
/// Prefix for responses that end the dialog.
pub const END_PREFIX: &str = "END ";

/// Every screen the dialog can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Welcome,
    WelcomeInvalidChoice,
    FirstName,
    InvalidName,
    LastName,
    DateOfBirth,
    InvalidDateOfBirth,
    Pin,
    InvalidPin,
    ConfirmPin,
    ConfirmPinMismatch,
    PostRegistration,
    PostRegistrationInvalidChoice,
    OptedOut,
    CurrentPin,
    CurrentPinMismatch,
    NewPin,
    ConfirmNewPin,
    ConfirmNewPinMismatch,
    PinChanged,
    SessionClosed,
}

impl Screen {
    /// The exact response body sent back to the gateway.
    pub fn text(self) -> &'static str {
        match self {
            Self::Welcome => "CON Welcome to Be.Well \n1. Register",
            Self::WelcomeInvalidChoice => "CON Invalid choice.Please try again. \n1. Register",
            Self::FirstName => "CON Please enter your first name (e.g John)",
            Self::InvalidName => "CON Invalid name. Please enter a valid name (e.g John)",
            Self::LastName => "CON Please enter your last name (eg Doe)",
            Self::DateOfBirth => {
                "CON Please enter your date of birth in DDMMYYYY format e.g 14031996 for 14th March 1992"
            }
            Self::InvalidDateOfBirth => {
                "CON The date of birth you entered is not valid, please try again in DDMMYYYY format e.g 14031996"
            }
            Self::Pin => "CON Please enter a 4 digit PIN to secure your account",
            Self::InvalidPin => "CON Invalid PIN. Please enter a 4 digit PIN to secure your account",
            Self::ConfirmPin => "CON Please enter a 4 digit PIN again to confirm",
            Self::ConfirmPinMismatch => {
                "END PIN mismatch. The PINs you entered do not match. Please dial again to register"
            }
            Self::PostRegistration => {
                "CON Thanks for signing up for Be.Well \n1. Opt out from marketing messages \n2. Change PIN"
            }
            Self::PostRegistrationInvalidChoice => {
                "CON Invalid choice. Please try again.\n1. Opt out from marketing messages \n2. Change PIN"
            }
            Self::OptedOut => "END We have successfully opted you out of marketing messages",
            Self::CurrentPin => "CON Enter your old PIN to continue",
            Self::CurrentPinMismatch => {
                "CON PIN mismatch. Please enter a PIN that matches your current PIN"
            }
            Self::NewPin => "CON Enter a new four digit PIN",
            Self::ConfirmNewPin => "CON Please enter the 4 digit PIN again to confirm",
            Self::ConfirmNewPinMismatch => {
                "CON PIN mismatch. Please enter a PIN that matches the first PIN"
            }
            Self::PinChanged => "END Your PIN was changed successfully",
            Self::SessionClosed => "END This session has ended. Please dial again to continue.",
        }
    }

    /// Whether this screen ends the dialog.
    pub fn ends_dialog(self) -> bool {
        self.text().starts_with(END_PREFIX)
    }

    /// The prompt shown on first arrival at `level`, before any answer.
    pub fn prompt_for(level: Level) -> Screen {
        match level {
            Level::Welcome => Self::Welcome,
            Level::FirstName => Self::FirstName,
            Level::LastName => Self::LastName,
            Level::DateOfBirth => Self::DateOfBirth,
            Level::Pin => Self::Pin,
            Level::ConfirmPin => Self::ConfirmPin,
            Level::PostRegistration => Self::PostRegistration,
            Level::CurrentPin => Self::CurrentPin,
            Level::NewPin => Self::NewPin,
            Level::ConfirmNewPin => Self::ConfirmNewPin,
            Level::Closed => Self::SessionClosed,
        }
    }
}

impl std::fmt::Display for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}
