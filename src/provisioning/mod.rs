//! Provisioning bridge: where completed registrations and PIN changes land.
//!
//! The session engine calls the bridge exactly once per successful terminal
//! transition. Two implementations exist: [`LocalProvisioning`] writes to the
//! service's own `accounts` table, [`HttpProvisioning`] forwards to a remote
//! profile service.

pub mod http;
pub mod local;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ProvisioningError;

pub use http::HttpProvisioning;
pub use local::LocalProvisioning;

/// Everything collected during registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAccount {
    pub phone_number: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    /// Raw 4-digit PIN. Only the bridge ever sees it unhashed.
    pub pin: String,
}

/// Reference to the account created by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub account_id: String,
}

/// Account and PIN side effects consumed by the session engine.
#[async_trait]
pub trait ProvisioningBridge: Send + Sync {
    /// Create the subscriber's account with its initial PIN.
    async fn create_account_and_pin(
        &self,
        account: NewAccount,
    ) -> Result<AccountRef, ProvisioningError>;

    /// Replace the subscriber's PIN.
    async fn update_pin(&self, phone_number: &str, new_pin: &str) -> Result<(), ProvisioningError>;

    /// Opt the subscriber out of marketing messages.
    async fn opt_out(&self, phone_number: &str) -> Result<(), ProvisioningError>;
}

/// Argon2id hashing for PINs at rest.
#[derive(Clone)]
pub struct PinHasher {
    argon2: Argon2<'static>,
}

impl PinHasher {
    /// Hasher with the argon2 crate's recommended Argon2id parameters.
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }

    /// Hasher with explicit cost parameters (memory in KiB, iterations,
    /// parallelism).
    pub fn with_params(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, ProvisioningError> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| ProvisioningError::Hashing(format!("invalid Argon2 params: {e}")))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash a PIN into a PHC string with a fresh random salt.
    ///
    /// Argon2 is memory- and CPU-hard, so the work runs on the blocking pool.
    pub async fn hash(&self, pin: &str) -> Result<String, ProvisioningError> {
        let argon2 = self.argon2.clone();
        let pin = pin.to_owned();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(pin.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| ProvisioningError::Hashing(e.to_string()))
        })
        .await
        .map_err(|e| ProvisioningError::Hashing(format!("hashing task failed: {e}")))?
    }

    /// Check a PIN against a stored PHC string.
    ///
    /// A missing or unparseable hash is a mismatch.
    pub async fn verify(&self, pin: &str, phc: Option<&str>) -> Result<bool, ProvisioningError> {
        let Some(phc) = phc else {
            return Ok(false);
        };
        let argon2 = self.argon2.clone();
        let (pin, phc) = (pin.to_owned(), phc.to_owned());
        tokio::task::spawn_blocking(move || match PasswordHash::new(&phc) {
            Ok(parsed) => argon2.verify_password(pin.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        })
        .await
        .map_err(|e| ProvisioningError::Hashing(format!("verify task failed: {e}")))
    }
}

impl Default for PinHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PinHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinHasher").finish_non_exhaustive()
    }
}
