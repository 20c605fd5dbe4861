//! Local provisioning: accounts live in this service's own database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{AccountRef, NewAccount, PinHasher, ProvisioningBridge};
use crate::error::{DatabaseError, ProvisioningError};
use crate::store::traits::{AccountStore, StoredAccount};

/// Provisioning bridge backed by an [`AccountStore`].
pub struct LocalProvisioning {
    accounts: Arc<dyn AccountStore>,
    hasher: PinHasher,
}

impl LocalProvisioning {
    pub fn new(accounts: Arc<dyn AccountStore>, hasher: PinHasher) -> Self {
        Self { accounts, hasher }
    }
}

#[async_trait]
impl ProvisioningBridge for LocalProvisioning {
    async fn create_account_and_pin(
        &self,
        account: NewAccount,
    ) -> Result<AccountRef, ProvisioningError> {
        if self
            .accounts
            .get_account_by_phone(&account.phone_number)
            .await?
            .is_some()
        {
            return Err(ProvisioningError::AlreadyRegistered {
                phone: account.phone_number,
            });
        }

        let now = Utc::now();
        let stored = StoredAccount {
            id: Uuid::new_v4(),
            phone_number: account.phone_number.clone(),
            first_name: account.first_name,
            last_name: account.last_name,
            date_of_birth: account.date_of_birth,
            pin_hash: self.hasher.hash(&account.pin).await?,
            opted_out: false,
            created_at: now,
            updated_at: now,
        };

        match self.accounts.insert_account(&stored).await {
            Ok(()) => {}
            // Lost a race with a concurrent registration for the same phone
            Err(DatabaseError::Constraint(_)) => {
                return Err(ProvisioningError::AlreadyRegistered {
                    phone: account.phone_number,
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(account_id = %stored.id, "Account created");
        Ok(AccountRef {
            account_id: stored.id.to_string(),
        })
    }

    async fn update_pin(&self, phone_number: &str, new_pin: &str) -> Result<(), ProvisioningError> {
        let pin_hash = self.hasher.hash(new_pin).await?;
        if !self
            .accounts
            .update_account_pin(phone_number, &pin_hash)
            .await?
        {
            return Err(ProvisioningError::AccountNotFound {
                phone: phone_number.to_string(),
            });
        }
        info!("Account PIN updated");
        Ok(())
    }

    async fn opt_out(&self, phone_number: &str) -> Result<(), ProvisioningError> {
        if !self.accounts.set_opted_out(phone_number, true).await? {
            return Err(ProvisioningError::AccountNotFound {
                phone: phone_number.to_string(),
            });
        }
        info!("Account opted out of marketing messages");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use chrono::NaiveDate;

    const PHONE: &str = "+254712345678";

    async fn setup() -> (Arc<LibSqlBackend>, LocalProvisioning) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let bridge = LocalProvisioning::new(db.clone(), PinHasher::with_params(8, 1, 1).unwrap());
        (db, bridge)
    }

    fn new_account() -> NewAccount {
        NewAccount {
            phone_number: PHONE.into(),
            first_name: "John".into(),
            last_name: "Doe".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            pin: "1234".into(),
        }
    }

    #[tokio::test]
    async fn creates_account_with_hashed_pin() {
        let (db, bridge) = setup().await;
        let account_ref = bridge.create_account_and_pin(new_account()).await.unwrap();

        let stored = db.get_account_by_phone(PHONE).await.unwrap().unwrap();
        assert_eq!(stored.id.to_string(), account_ref.account_id);
        assert_eq!(stored.first_name, "John");
        assert_ne!(stored.pin_hash, "1234");
        assert!(
            PinHasher::new()
                .verify("1234", Some(&stored.pin_hash))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn second_registration_rejected() {
        let (_db, bridge) = setup().await;
        bridge.create_account_and_pin(new_account()).await.unwrap();
        let err = bridge
            .create_account_and_pin(new_account())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::AlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn update_pin_rehashes() {
        let (db, bridge) = setup().await;
        bridge.create_account_and_pin(new_account()).await.unwrap();
        bridge.update_pin(PHONE, "5678").await.unwrap();

        let stored = db.get_account_by_phone(PHONE).await.unwrap().unwrap();
        let hasher = PinHasher::new();
        assert!(hasher.verify("5678", Some(&stored.pin_hash)).await.unwrap());
        assert!(!hasher.verify("1234", Some(&stored.pin_hash)).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_phone_is_not_found() {
        let (_db, bridge) = setup().await;
        assert!(matches!(
            bridge.update_pin(PHONE, "5678").await.unwrap_err(),
            ProvisioningError::AccountNotFound { .. }
        ));
        assert!(matches!(
            bridge.opt_out(PHONE).await.unwrap_err(),
            ProvisioningError::AccountNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn opt_out_sets_flag() {
        let (db, bridge) = setup().await;
        bridge.create_account_and_pin(new_account()).await.unwrap();
        bridge.opt_out(PHONE).await.unwrap();
        assert!(db.get_account_by_phone(PHONE).await.unwrap().unwrap().opted_out);
    }
}
