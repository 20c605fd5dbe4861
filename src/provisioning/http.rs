//! HTTP provisioning: forwards account and PIN changes to a remote profile
//! service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, warn};

use super::{AccountRef, NewAccount, ProvisioningBridge};
use crate::error::ProvisioningError;

#[derive(Serialize)]
struct PinUpdate<'a> {
    phone_number: &'a str,
    pin: &'a str,
}

#[derive(Serialize)]
struct OptOut<'a> {
    phone_number: &'a str,
}

/// Provisioning bridge that talks to the profile service over HTTP.
pub struct HttpProvisioning {
    base_url: String,
    token: Option<SecretString>,
    client: reqwest::Client,
}

impl HttpProvisioning {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ProvisioningError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProvisioningError::Request(format!("failed to build client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/ussd/{path}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Send a request, turning transport failures and non-2xx statuses into
    /// errors. `on_status` maps statuses with a domain meaning first.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        on_status: impl Fn(StatusCode) -> Option<ProvisioningError>,
    ) -> Result<reqwest::Response, ProvisioningError> {
        let resp = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ProvisioningError::Request(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if let Some(err) = on_status(status) {
            return Err(err);
        }
        let body = resp.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Profile service rejected request");
        Err(ProvisioningError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ProvisioningBridge for HttpProvisioning {
    async fn create_account_and_pin(
        &self,
        account: NewAccount,
    ) -> Result<AccountRef, ProvisioningError> {
        let phone = account.phone_number.clone();
        let resp = self
            .send(
                self.client.post(self.url("accounts")).json(&account),
                |status| {
                    (status == StatusCode::CONFLICT).then(|| ProvisioningError::AlreadyRegistered {
                        phone: phone.clone(),
                    })
                },
            )
            .await?;

        let account_ref: AccountRef = resp
            .json()
            .await
            .map_err(|e| ProvisioningError::Request(format!("invalid account response: {e}")))?;
        debug!(account_id = %account_ref.account_id, "Remote account created");
        Ok(account_ref)
    }

    async fn update_pin(&self, phone_number: &str, new_pin: &str) -> Result<(), ProvisioningError> {
        let body = PinUpdate {
            phone_number,
            pin: new_pin,
        };
        self.send(self.client.put(self.url("pin")).json(&body), |status| {
            (status == StatusCode::NOT_FOUND).then(|| ProvisioningError::AccountNotFound {
                phone: phone_number.to_string(),
            })
        })
        .await?;
        Ok(())
    }

    async fn opt_out(&self, phone_number: &str) -> Result<(), ProvisioningError> {
        let body = OptOut { phone_number };
        self.send(self.client.post(self.url("opt-out")).json(&body), |status| {
            (status == StatusCode::NOT_FOUND).then(|| ProvisioningError::AccountNotFound {
                phone: phone_number.to_string(),
            })
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_ignore_trailing_slash() {
        let bridge =
            HttpProvisioning::new("http://profiles.local/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(bridge.url("accounts"), "http://profiles.local/ussd/accounts");
        assert_eq!(bridge.url("opt-out"), "http://profiles.local/ussd/opt-out");
    }

    #[tokio::test]
    async fn unreachable_service_is_request_error() {
        let bridge =
            HttpProvisioning::new("http://127.0.0.1:1", None, Duration::from_secs(1)).unwrap();
        let err = bridge.opt_out("+254712345678").await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Request(_)));
    }
}
