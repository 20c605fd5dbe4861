//! Persistence layer: libSQL-backed storage for USSD sessions and accounts.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{AccountStore, SessionStore, StoredAccount};
