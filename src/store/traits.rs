//! Storage traits: the async interfaces the session engine and the local
//! provisioning bridge depend on.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::ussd::level::Level;
use crate::ussd::session::{SessionDetail, UssdEvent, UssdSession};

/// Durable per-session dialog state, keyed by the gateway's session id.
///
/// Writes for one session id must be read-after-write consistent. Level
/// updates are guarded so that a late retransmission can never move a
/// session backwards.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session, `None` if the id has never been seen.
    async fn get_session(&self, session_id: &str) -> Result<Option<UssdSession>, DatabaseError>;

    /// Create a session at the welcome level. If a concurrent request already
    /// created it, the existing session is returned unchanged. The flag is
    /// `true` only for the call that inserted the row.
    async fn create_session(
        &self,
        session_id: &str,
        phone_number: &str,
    ) -> Result<(UssdSession, bool), DatabaseError>;

    /// Move a session to `level`, recording that `consumed` tokens have been
    /// processed.
    ///
    /// Applies only when the stored level is `<= level` and the stored
    /// consumed count is `< consumed`; otherwise fails with
    /// [`DatabaseError::Conflict`].
    async fn advance_level(
        &self,
        session_id: &str,
        level: Level,
        consumed: usize,
    ) -> Result<UssdSession, DatabaseError>;

    /// Claim the transition out of (`level`, `consumed`) before running its
    /// provisioning side effect.
    ///
    /// Returns `false` when the session has moved on or another request holds
    /// a live claim on the same transition. A successful `advance_level`
    /// drops the claim.
    async fn claim_transition(
        &self,
        session_id: &str,
        level: Level,
        consumed: usize,
    ) -> Result<bool, DatabaseError>;

    /// Drop a claim whose side effect failed, so a retry can take it again.
    async fn release_claim(&self, session_id: &str) -> Result<(), DatabaseError>;

    /// Stage a hashed PIN pending confirmation, replacing any previous one.
    async fn stage_pin(&self, session_id: &str, pin_hash: &str)
    -> Result<UssdSession, DatabaseError>;

    /// Drop the staged PIN.
    async fn clear_staged_pin(&self, session_id: &str) -> Result<UssdSession, DatabaseError>;

    /// Store a collected registration answer.
    async fn record_detail(
        &self,
        session_id: &str,
        detail: &SessionDetail,
    ) -> Result<UssdSession, DatabaseError>;

    /// Append to the session's audit trail.
    async fn record_event(&self, event: &UssdEvent) -> Result<(), DatabaseError>;

    /// Audit trail for a session, oldest first.
    async fn list_events(&self, session_id: &str) -> Result<Vec<UssdEvent>, DatabaseError>;
}

/// A subscriber account created through the USSD channel.
#[derive(Debug, Clone, Serialize)]
pub struct StoredAccount {
    pub id: Uuid,
    pub phone_number: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    #[serde(skip_serializing)]
    pub pin_hash: String,
    pub opted_out: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account persistence used by the local provisioning bridge.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. A second account for the same phone number is a
    /// [`DatabaseError::Constraint`].
    async fn insert_account(&self, account: &StoredAccount) -> Result<(), DatabaseError>;

    async fn get_account_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<StoredAccount>, DatabaseError>;

    /// Replace the PIN hash. Returns `false` if no account matched.
    async fn update_account_pin(
        &self,
        phone_number: &str,
        pin_hash: &str,
    ) -> Result<bool, DatabaseError>;

    /// Set the marketing opt-out flag. Returns `false` if no account matched.
    async fn set_opted_out(&self, phone_number: &str, opted_out: bool)
    -> Result<bool, DatabaseError>;
}
