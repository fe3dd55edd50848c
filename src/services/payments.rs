use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::config::PaymentConfig;
use crate::errors::{PaymentError, ServiceError};

/// A capture request sent to the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeRequest {
    /// Amount in minor units
    pub amount: i64,
    pub currency: String,
    pub description: String,
    /// The paying user
    pub customer: Uuid,
}

/// The provider's answer to a charge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChargeReceipt {
    pub success: bool,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// External payment collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, PaymentError>;

    async fn refund(&self, reference: &str, amount: i64) -> Result<(), PaymentError>;
}

#[derive(Debug, Serialize)]
struct RefundRequest<'a> {
    reference: &'a str,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the payment provider's REST API, behind a circuit breaker.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: PaymentConfig,
    breaker: CircuitBreaker,
}

impl HttpPaymentGateway {
    pub fn new(config: PaymentConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("payment client: {e}")))?;
        let breaker = CircuitBreaker::new(config.failure_threshold, config.reset_timeout, 1);

        Ok(Self {
            client,
            config,
            breaker,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(self.url(path));
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, PaymentError>
    where
        F: std::future::Future<Output = Result<T, PaymentError>>,
    {
        // A decline is the provider working as intended.
        match self
            .breaker
            .call_with(fut, |e| !matches!(e, PaymentError::Declined(_)))
            .await
        {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::CircuitOpen) => Err(PaymentError::GatewayUnavailable(
                "circuit open after repeated failures".into(),
            )),
            Err(CircuitBreakerError::Inner(e)) => Err(e),
        }
    }

    async fn send_charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, PaymentError> {
        let response = self
            .request("charges")
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<ChargeReceipt>()
                .await
                .map_err(|e| PaymentError::GatewayUnavailable(format!("malformed reply: {e}")));
        }
        Err(status_error(status, response).await)
    }

    async fn send_refund(&self, reference: &str, amount: i64) -> Result<(), PaymentError> {
        let response = self
            .request("refunds")
            .json(&RefundRequest { reference, amount })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(status_error(status, response).await)
    }
}

fn transport_error(err: reqwest::Error) -> PaymentError {
    if err.is_timeout() {
        PaymentError::Timeout
    } else {
        PaymentError::GatewayUnavailable(err.to_string())
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> PaymentError {
    let message = response
        .json::<ProviderError>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| status.to_string());

    if status == StatusCode::PAYMENT_REQUIRED {
        PaymentError::Declined(message)
    } else {
        warn!(%status, "payment provider rejected the request: {}", message);
        PaymentError::GatewayUnavailable(message)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(amount = request.amount, customer = %request.customer))]
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, PaymentError> {
        self.guarded(self.send_charge(&request)).await
    }

    #[instrument(skip(self))]
    async fn refund(&self, reference: &str, amount: i64) -> Result<(), PaymentError> {
        self.guarded(self.send_refund(reference, amount)).await
    }
}
