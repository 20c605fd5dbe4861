//! Error types for the USSD onboarding service.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Phone number error: {0}")]
    Phone(#[from] PhoneError),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("USSD error: {0}")]
    Ussd(#[from] UssdError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Write conflict on {entity} {id}: {reason}")]
    Conflict {
        entity: String,
        id: String,
        reason: String,
    },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Phone number normalization errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,

    #[error("phone number {0:?} contains invalid characters")]
    InvalidCharacters(String),

    #[error("phone number {0:?} has an invalid length")]
    InvalidLength(String),

    #[error("phone number {0:?} has no recognizable country prefix")]
    UnknownPrefix(String),
}

/// Errors from the account/PIN provisioning collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("an account already exists for {phone}")]
    AlreadyRegistered { phone: String },

    #[error("no account exists for {phone}")]
    AccountNotFound { phone: String },

    #[error("PIN hashing failed: {0}")]
    Hashing(String),

    #[error("Provisioning request failed: {0}")]
    Request(String),

    #[error("Provisioning service rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Fatal per-request errors surfaced to the gateway caller.
///
/// Validation failures never appear here; they are rendered as menus.
#[derive(Debug, thiserror::Error)]
pub enum UssdError {
    #[error("Invalid gateway request: {0}")]
    InvalidRequest(String),

    #[error("Phone normalization failed: {0}")]
    Phone(#[from] PhoneError),

    #[error("Session store failure: {0}")]
    Database(#[from] DatabaseError),

    #[error("Provisioning failure: {0}")]
    Provisioning(#[from] ProvisioningError),
}

impl UssdError {
    /// Whether the failure was caused by the caller's input rather than
    /// by an infrastructure dependency.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::Phone(_))
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors() {
        assert!(UssdError::InvalidRequest("no session".into()).is_client_error());
        assert!(UssdError::Phone(PhoneError::Empty).is_client_error());
        assert!(!UssdError::Database(DatabaseError::Query("boom".into())).is_client_error());
        assert!(
            !UssdError::Provisioning(ProvisioningError::Request("timeout".into()))
                .is_client_error()
        );
    }

    #[test]
    fn top_level_wraps_with_from() {
        let err: Error = ConfigError::MissingEnvVar("USSD_PORT".into()).into();
        assert!(err.to_string().contains("USSD_PORT"));

        let err: Error = UssdError::from(PhoneError::Empty).into();
        assert_eq!(
            err.to_string(),
            "USSD error: Phone normalization failed: phone number is empty"
        );
    }
}
