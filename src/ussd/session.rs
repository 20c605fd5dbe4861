//! Session data model: what is persisted between gateway round trips.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::level::Level;
use crate::error::UssdError;

/// One inbound gateway round trip.
///
/// Field names follow the gateway's form encoding.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayRequest {
    #[serde(rename = "sessionId", default)]
    pub session_id: String,
    #[serde(rename = "phoneNumber", default)]
    pub phone_number: String,
    /// Everything typed since the session started, `*`-separated.
    #[serde(default)]
    pub text: String,
}

impl GatewayRequest {
    pub fn new(
        session_id: impl Into<String>,
        phone_number: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            phone_number: phone_number.into(),
            text: text.into(),
        }
    }

    /// Reject requests that cannot be keyed to a session.
    pub fn validate(&self) -> Result<(), UssdError> {
        if self.session_id.trim().is_empty() {
            return Err(UssdError::InvalidRequest("sessionId is required".into()));
        }
        if self.phone_number.trim().is_empty() {
            return Err(UssdError::InvalidRequest("phoneNumber is required".into()));
        }
        Ok(())
    }
}

/// Server-side state of one USSD dialog.
#[derive(Debug, Clone, Serialize)]
pub struct UssdSession {
    pub session_id: String,
    /// Normalized `+<digits>` form.
    pub phone_number: String,
    pub level: Level,
    /// How many tokens of the accumulated text have been processed.
    pub consumed: usize,
    /// Argon2 PHC string of the PIN awaiting confirmation. After a successful
    /// confirmation it holds the account's current PIN.
    #[serde(skip_serializing)]
    pub staged_pin: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A registration answer collected along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionDetail {
    FirstName(String),
    LastName(String),
    DateOfBirth(NaiveDate),
}

/// Something that happened in a session, kept as an audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    ChoseRegister,
    EnteredFirstName,
    EnteredLastName,
    EnteredDateOfBirth,
    EnteredPin,
    AccountCreated,
    PinConfirmationFailed,
    OptedOut,
    ChoseChangePin,
    EnteredCurrentPin,
    EnteredNewPin,
    PinChanged,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::ChoseRegister => "chose_register",
            Self::EnteredFirstName => "entered_first_name",
            Self::EnteredLastName => "entered_last_name",
            Self::EnteredDateOfBirth => "entered_date_of_birth",
            Self::EnteredPin => "entered_pin",
            Self::AccountCreated => "account_created",
            Self::PinConfirmationFailed => "pin_confirmation_failed",
            Self::OptedOut => "opted_out",
            Self::ChoseChangePin => "chose_change_pin",
            Self::EnteredCurrentPin => "entered_current_pin",
            Self::EnteredNewPin => "entered_new_pin",
            Self::PinChanged => "pin_changed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown USSD event: {s}"))
    }
}

/// A persisted audit record.
#[derive(Debug, Clone, Serialize)]
pub struct UssdEvent {
    pub session_id: String,
    pub phone_number: String,
    pub level: Level,
    pub kind: EventKind,
    pub created_at: DateTime<Utc>,
}

impl UssdEvent {
    pub fn new(session: &UssdSession, level: Level, kind: EventKind) -> Self {
        Self {
            session_id: session.session_id.clone(),
            phone_number: session.phone_number.clone(),
            level,
            kind,
            created_at: Utc::now(),
        }
    }
}
