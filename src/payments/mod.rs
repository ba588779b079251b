//! Hosted-checkout payment provider client.
//!
//! The provider issues a capture context tying a checkout session to a later
//! transient token; the backend redeems the token to create the charge. All
//! calls carry a finite deadline; an auth failure refreshes credentials and
//! retries once.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::PaymentConfig;
use crate::utils::error::AppError;

pub const STATUS_AUTHORIZED: &str = "AUTHORIZED";

/// Order details the provider reports for a validated transient token.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenDetails {
    pub reconciliation_id: String,
    pub amount: Decimal,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentOutcome {
    pub status: String,
    pub reconciliation_id: String,
}

impl PaymentOutcome {
    pub fn is_authorized(&self) -> bool {
        self.status == STATUS_AUTHORIZED
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Issue a fresh capture context for a checkout session. Contexts are
    /// single-use; every initiate call gets a new one.
    async fn capture_context(&self, amount: Decimal) -> Result<String, AppError>;

    /// Validate a transient token's signature and expiry and fetch the order
    /// details it is bound to.
    async fn validate_token(&self, transient_token: &str) -> Result<TokenDetails, AppError>;

    /// Redeem the token into a charge.
    async fn submit_payment(
        &self,
        transient_token: &str,
        amount: Decimal,
    ) -> Result<PaymentOutcome, AppError>;
}

pub struct HostedCheckoutClient {
    http: reqwest::Client,
    config: PaymentConfig,
}

#[derive(Serialize)]
struct CaptureContextRequest<'a> {
    merchant_id: &'a str,
    total_amount: Decimal,
    currency: &'a str,
}

#[derive(Deserialize)]
struct CaptureContextResponse {
    capture_context: String,
}

#[derive(Serialize)]
struct PaymentRequest<'a> {
    merchant_id: &'a str,
    transient_token: &'a str,
    total_amount: Decimal,
}

impl HostedCheckoutClient {
    pub fn new(config: PaymentConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// POST with one retry on an auth failure (credentials may have rolled).
    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, AppError> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let response = self
                .http
                .post(&url)
                .basic_auth(&self.config.api_key, Some(&self.config.shared_secret))
                .json(body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() || e.is_connect() {
                        AppError::ProviderUnavailable(e.to_string())
                    } else {
                        AppError::ProviderRejected(e.to_string())
                    }
                })?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && attempts == 1 {
                tracing::warn!("Payment provider auth failure, retrying once");
                continue;
            }
            if status.is_server_error() {
                return Err(AppError::ProviderUnavailable(format!(
                    "provider returned {status}"
                )));
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(AppError::ProviderRejected(format!("{status}: {text}")));
            }
            return response
                .json::<R>()
                .await
                .map_err(|e| AppError::ProviderRejected(format!("malformed response: {e}")));
        }
    }
}

#[async_trait]
impl PaymentProvider for HostedCheckoutClient {
    async fn capture_context(&self, amount: Decimal) -> Result<String, AppError> {
        let request = CaptureContextRequest {
            merchant_id: &self.config.merchant_id,
            total_amount: amount,
            currency: "USD",
        };
        let response: CaptureContextResponse =
            self.post_json("/microform/v2/sessions", &request).await?;
        Ok(response.capture_context)
    }

    async fn validate_token(&self, transient_token: &str) -> Result<TokenDetails, AppError> {
        self.post_json(
            "/up/v1/payment-details",
            &serde_json::json!({ "transient_token": transient_token }),
        )
        .await
    }

    async fn submit_payment(
        &self,
        transient_token: &str,
        amount: Decimal,
    ) -> Result<PaymentOutcome, AppError> {
        let request = PaymentRequest {
            merchant_id: &self.config.merchant_id,
            transient_token,
            total_amount: amount,
        };
        self.post_json("/pts/v2/payments", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockProvider;
    use super::*;
    use rust_decimal_macros::dec;

    fn details() -> TokenDetails {
        TokenDetails {
            reconciliation_id: "rec-42".into(),
            amount: dec!(25.00),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.edu".into(),
            phone: None,
        }
    }

    #[tokio::test]
    async fn authorizing_mock_reports_the_scripted_reconciliation_id() {
        let provider = MockProvider::authorizing(details());
        let outcome = provider.submit_payment("tok", dec!(25.00)).await.unwrap();
        assert!(outcome.is_authorized());
        assert_eq!(outcome.reconciliation_id, "rec-42");
        assert_eq!(*provider.payments_submitted.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn outage_surfaces_as_provider_unavailable() {
        let provider = MockProvider::authorizing(details());
        *provider.fail_unavailable.lock().unwrap() = true;
        let err = provider.capture_context(dec!(10.00)).await.unwrap_err();
        assert!(matches!(err, AppError::ProviderUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn declined_status_is_not_authorized() {
        let provider = MockProvider::authorizing(details());
        *provider.outcome_status.lock().unwrap() = "DECLINED".to_string();
        let outcome = provider.submit_payment("tok", dec!(25.00)).await.unwrap();
        assert!(!outcome.is_authorized());
    }
}

#[cfg(test)]
pub mod mock {
    //! In-memory provider used by service tests; records calls and serves
    //! scripted outcomes.

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockProvider {
        pub details: Mutex<Option<TokenDetails>>,
        pub outcome_status: Mutex<String>,
        pub contexts_issued: Mutex<u32>,
        pub payments_submitted: Mutex<u32>,
        pub fail_unavailable: Mutex<bool>,
    }

    impl MockProvider {
        pub fn authorizing(details: TokenDetails) -> Self {
            let provider = Self::default();
            *provider.details.lock().unwrap() = Some(details);
            *provider.outcome_status.lock().unwrap() = STATUS_AUTHORIZED.to_string();
            provider
        }
    }

    #[async_trait]
    impl PaymentProvider for MockProvider {
        async fn capture_context(&self, _amount: Decimal) -> Result<String, AppError> {
            if *self.fail_unavailable.lock().unwrap() {
                return Err(AppError::ProviderUnavailable("mock outage".into()));
            }
            let mut issued = self.contexts_issued.lock().unwrap();
            *issued += 1;
            Ok(format!("capture-context-{}", *issued))
        }

        async fn validate_token(&self, transient_token: &str) -> Result<TokenDetails, AppError> {
            if *self.fail_unavailable.lock().unwrap() {
                return Err(AppError::ProviderUnavailable("mock outage".into()));
            }
            self.details
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| AppError::ProviderRejected(format!("bad token {transient_token}")))
        }

        async fn submit_payment(
            &self,
            _transient_token: &str,
            _amount: Decimal,
        ) -> Result<PaymentOutcome, AppError> {
            if *self.fail_unavailable.lock().unwrap() {
                return Err(AppError::ProviderUnavailable("mock outage".into()));
            }
            *self.payments_submitted.lock().unwrap() += 1;
            let details = self
                .details
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| AppError::ProviderRejected("no scripted details".into()))?;
            Ok(PaymentOutcome {
                status: self.outcome_status.lock().unwrap().clone(),
                reconciliation_id: details.reconciliation_id,
            })
        }
    }
}
