//! libSQL backend: async `SessionStore` and `AccountStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{AccountStore, SessionStore, StoredAccount};
use crate::ussd::level::Level;
use crate::ussd::session::{SessionDetail, UssdEvent, UssdSession};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Fetch a session that must exist.
    async fn require_session(&self, session_id: &str) -> Result<UssdSession, DatabaseError> {
        self.get_session(session_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "ussd_session".into(),
                id: session_id.to_string(),
            })
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

/// A transition claim older than this belongs to a request that died
/// mid-provisioning and may be taken over.
const CLAIM_TTL_SECS: i64 = 120;

/// Fixed-width UTC timestamp, so claim ages compare correctly as text.
fn claim_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

const SESSION_COLUMNS: &str = "session_id, phone_number, level, consumed, staged_pin, first_name, last_name, date_of_birth, created_at, updated_at";

const EVENT_COLUMNS: &str = "session_id, phone_number, level, event, created_at";

const ACCOUNT_COLUMNS: &str = "id, phone_number, first_name, last_name, date_of_birth, pin_hash, opted_out, created_at, updated_at";

/// Map a libsql Row to a UssdSession.
fn row_to_session(row: &libsql::Row) -> Result<UssdSession, DatabaseError> {
    let level_code: i64 = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("session level: {e}")))?;
    let level = Level::from_code(level_code).ok_or_else(|| {
        DatabaseError::Serialization(format!("unknown session level {level_code}"))
    })?;
    let consumed: i64 = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("session consumed: {e}")))?;
    let created_str: String = row
        .get(8)
        .map_err(|e| DatabaseError::Query(format!("session created_at: {e}")))?;
    let updated_str: String = row
        .get(9)
        .map_err(|e| DatabaseError::Query(format!("session updated_at: {e}")))?;

    Ok(UssdSession {
        session_id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("session id: {e}")))?,
        phone_number: row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("session phone: {e}")))?,
        level,
        consumed: consumed.max(0) as usize,
        staged_pin: row.get::<String>(4).ok(),
        first_name: row.get::<String>(5).ok(),
        last_name: row.get::<String>(6).ok(),
        date_of_birth: row.get::<String>(7).ok().as_deref().and_then(parse_date),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_event(row: &libsql::Row) -> Result<UssdEvent, DatabaseError> {
    let level_code: i64 = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("event level: {e}")))?;
    let kind_str: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("event kind: {e}")))?;
    let created_str: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("event created_at: {e}")))?;

    Ok(UssdEvent {
        session_id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("event session: {e}")))?,
        phone_number: row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("event phone: {e}")))?,
        level: Level::from_code(level_code).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown event level {level_code}"))
        })?,
        kind: kind_str.parse().map_err(DatabaseError::Serialization)?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_account(row: &libsql::Row) -> Result<StoredAccount, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("account id: {e}")))?;
    let dob_str: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("account date_of_birth: {e}")))?;
    let opted_out: i64 = row
        .get(6)
        .map_err(|e| DatabaseError::Query(format!("account opted_out: {e}")))?;
    let created_str: String = row
        .get(7)
        .map_err(|e| DatabaseError::Query(format!("account created_at: {e}")))?;
    let updated_str: String = row
        .get(8)
        .map_err(|e| DatabaseError::Query(format!("account updated_at: {e}")))?;

    Ok(StoredAccount {
        id: id_str
            .parse()
            .map_err(|e| DatabaseError::Serialization(format!("account id {id_str}: {e}")))?,
        phone_number: row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("account phone: {e}")))?,
        first_name: row
            .get(2)
            .map_err(|e| DatabaseError::Query(format!("account first_name: {e}")))?,
        last_name: row
            .get(3)
            .map_err(|e| DatabaseError::Query(format!("account last_name: {e}")))?,
        date_of_birth: parse_date(&dob_str).ok_or_else(|| {
            DatabaseError::Serialization(format!("account date_of_birth {dob_str}"))
        })?,
        pin_hash: row
            .get(5)
            .map_err(|e| DatabaseError::Query(format!("account pin_hash: {e}")))?,
        opted_out: opted_out != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Sessions ────────────────────────────────────────────────────────

#[async_trait]
impl SessionStore for LibSqlBackend {
    async fn get_session(&self, session_id: &str) -> Result<Option<UssdSession>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM ussd_sessions WHERE session_id = ?1"),
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_session: {e}"))),
        }
    }

    async fn create_session(
        &self,
        session_id: &str,
        phone_number: &str,
    ) -> Result<(UssdSession, bool), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO ussd_sessions (session_id, phone_number, level, consumed, created_at, updated_at) VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                params![session_id, phone_number, Level::Welcome.code(), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_session: {e}")))?;

        if inserted > 0 {
            debug!(session_id, "USSD session created");
        }
        Ok((self.require_session(session_id).await?, inserted > 0))
    }

    async fn advance_level(
        &self,
        session_id: &str,
        level: Level,
        consumed: usize,
    ) -> Result<UssdSession, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let consumed = consumed as i64;
        let affected = self
            .conn()
            .execute(
                "UPDATE ussd_sessions SET level = ?2, consumed = ?3, claimed_at = NULL, updated_at = ?4 WHERE session_id = ?1 AND level <= ?2 AND consumed < ?3",
                params![session_id, level.code(), consumed, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("advance_level: {e}")))?;

        let session = self.require_session(session_id).await?;
        if affected == 0 {
            return Err(DatabaseError::Conflict {
                entity: "ussd_session".into(),
                id: session_id.to_string(),
                reason: format!(
                    "stored level {} / consumed {} is ahead of {} / {}",
                    session.level, session.consumed, level, consumed
                ),
            });
        }
        debug!(session_id, %level, consumed, "USSD session advanced");
        Ok(session)
    }

    async fn claim_transition(
        &self,
        session_id: &str,
        level: Level,
        consumed: usize,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let stale_before = now - chrono::Duration::seconds(CLAIM_TTL_SECS);
        let affected = self
            .conn()
            .execute(
                "UPDATE ussd_sessions SET claimed_at = ?4 WHERE session_id = ?1 AND level = ?2 AND consumed = ?3 AND (claimed_at IS NULL OR claimed_at < ?5)",
                params![
                    session_id,
                    level.code(),
                    consumed as i64,
                    claim_timestamp(now),
                    claim_timestamp(stale_before)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_transition: {e}")))?;

        if affected > 0 {
            debug!(session_id, %level, consumed, "USSD transition claimed");
        }
        Ok(affected > 0)
    }

    async fn release_claim(&self, session_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE ussd_sessions SET claimed_at = NULL WHERE session_id = ?1",
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release_claim: {e}")))?;
        Ok(())
    }

    async fn stage_pin(
        &self,
        session_id: &str,
        pin_hash: &str,
    ) -> Result<UssdSession, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE ussd_sessions SET staged_pin = ?2, updated_at = ?3 WHERE session_id = ?1",
                params![session_id, pin_hash, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("stage_pin: {e}")))?;
        self.require_session(session_id).await
    }

    async fn clear_staged_pin(&self, session_id: &str) -> Result<UssdSession, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE ussd_sessions SET staged_pin = NULL, updated_at = ?2 WHERE session_id = ?1",
                params![session_id, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_staged_pin: {e}")))?;
        self.require_session(session_id).await
    }

    async fn record_detail(
        &self,
        session_id: &str,
        detail: &SessionDetail,
    ) -> Result<UssdSession, DatabaseError> {
        let (column, value) = match detail {
            SessionDetail::FirstName(name) => ("first_name", name.clone()),
            SessionDetail::LastName(name) => ("last_name", name.clone()),
            SessionDetail::DateOfBirth(date) => {
                ("date_of_birth", date.format(DATE_FORMAT).to_string())
            }
        };
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                &format!(
                    "UPDATE ussd_sessions SET {column} = ?2, updated_at = ?3 WHERE session_id = ?1"
                ),
                params![session_id, value, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_detail: {e}")))?;
        self.require_session(session_id).await
    }

    // ── Events ──────────────────────────────────────────────────────

    async fn record_event(&self, event: &UssdEvent) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO ussd_events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                params![
                    event.session_id.as_str(),
                    event.phone_number.as_str(),
                    event.level.code(),
                    event.kind.as_str(),
                    event.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_event: {e}")))?;
        Ok(())
    }

    async fn list_events(&self, session_id: &str) -> Result<Vec<UssdEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM ussd_events WHERE session_id = ?1 ORDER BY id ASC"
                ),
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_events: {e}")))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_events: {e}")))?
        {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }
}

// ── Accounts ────────────────────────────────────────────────────────

#[async_trait]
impl AccountStore for LibSqlBackend {
    async fn insert_account(&self, account: &StoredAccount) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    account.id.to_string(),
                    account.phone_number.as_str(),
                    account.first_name.as_str(),
                    account.last_name.as_str(),
                    account.date_of_birth.format(DATE_FORMAT).to_string(),
                    account.pin_hash.as_str(),
                    account.opted_out as i64,
                    account.created_at.to_rfc3339(),
                    account.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::Constraint(format!(
                        "account for {} already exists",
                        account.phone_number
                    ))
                } else {
                    DatabaseError::Query(format!("insert_account: {e}"))
                }
            })?;

        debug!(account_id = %account.id, "Account inserted into DB");
        Ok(())
    }

    async fn get_account_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<StoredAccount>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE phone_number = ?1"),
                params![phone_number],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_account_by_phone: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_account(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_account_by_phone: {e}"))),
        }
    }

    async fn update_account_pin(
        &self,
        phone_number: &str,
        pin_hash: &str,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE accounts SET pin_hash = ?2, updated_at = ?3 WHERE phone_number = ?1",
                params![phone_number, pin_hash, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_account_pin: {e}")))?;
        Ok(affected > 0)
    }

    async fn set_opted_out(
        &self,
        phone_number: &str,
        opted_out: bool,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE accounts SET opted_out = ?2, updated_at = ?3 WHERE phone_number = ?1",
                params![phone_number, opted_out as i64, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_opted_out: {e}")))?;
        Ok(affected > 0)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
