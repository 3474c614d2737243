use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::errors::ServiceError;

/// Payment status as reported by the gateway.
///
/// Unrecognized values map to `Unknown` so a new gateway status can never
/// panic the reconciliation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Approved,
    Rejected,
    Cancelled,
    Refunded,
    InProcess,
    Pending,
    Authorized,
    #[serde(other)]
    Unknown,
}

/// Preapproval (recurring billing) status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPreapprovalStatus {
    Authorized,
    Paused,
    Cancelled,
    Pending,
    #[serde(other)]
    Unknown,
}

/// Request to create a hosted-checkout preference.
#[derive(Debug, Clone, Serialize)]
pub struct PreferenceRequest {
    /// Order number; the gateway echoes it back as `external_reference` in
    /// payment notifications.
    pub external_reference: String,
    pub title: String,
    pub total: Decimal,
    pub payer_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_url: Option<String>,
}

/// Handle returned by preference creation; stored on the order and used to
/// redirect the shopper.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PreferenceHandle {
    pub preference_id: String,
    pub redirect_url: String,
}

/// Full payment detail fetched from the gateway.
///
/// Reconciliation always acts on this fetched record, never on the webhook
/// body's own status field.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentDetail {
    pub id: String,
    pub status: GatewayPaymentStatus,
    pub external_reference: Option<String>,
    pub transaction_amount: Option<Decimal>,
}

/// Full preapproval detail fetched from the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct PreapprovalDetail {
    pub id: String,
    pub status: GatewayPreapprovalStatus,
    pub external_reference: Option<String>,
}

/// Seam to the external payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a hosted-checkout preference for an order.
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PreferenceHandle, ServiceError>;

    /// Fetches the authoritative detail of a payment event.
    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetail, ServiceError>;

    /// Fetches the authoritative detail of a preapproval event.
    async fn get_preapproval(&self, preapproval_id: &str)
        -> Result<PreapprovalDetail, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct PreferenceResponseBody {
    id: String,
    init_point: String,
}

/// HTTP implementation of [`PaymentGateway`] backed by reqwest.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build gateway client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    fn gateway_err(context: &str, err: reqwest::Error) -> ServiceError {
        ServiceError::ExternalServiceError(format!("{}: {}", context, err))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(external_reference = %request.external_reference))]
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PreferenceHandle, ServiceError> {
        let url = format!("{}/checkout/preferences", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::gateway_err("preference creation failed", e))?
            .error_for_status()
            .map_err(|e| Self::gateway_err("preference creation rejected", e))?;

        let body: PreferenceResponseBody = response
            .json()
            .await
            .map_err(|e| Self::gateway_err("invalid preference response", e))?;

        debug!(preference_id = %body.id, "gateway preference created");

        Ok(PreferenceHandle {
            preference_id: body.id,
            redirect_url: body.init_point,
        })
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetail, ServiceError> {
        let url = format!("{}/v1/payments/{}", self.base_url, payment_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| Self::gateway_err("payment fetch failed", e))?
            .error_for_status()
            .map_err(|e| Self::gateway_err("payment fetch rejected", e))?;

        response
            .json()
            .await
            .map_err(|e| Self::gateway_err("invalid payment detail", e))
    }

    #[instrument(skip(self))]
    async fn get_preapproval(
        &self,
        preapproval_id: &str,
    ) -> Result<PreapprovalDetail, ServiceError> {
        let url = format!("{}/preapproval/{}", self.base_url, preapproval_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| Self::gateway_err("preapproval fetch failed", e))?
            .error_for_status()
            .map_err(|e| Self::gateway_err("preapproval fetch rejected", e))?;

        response
            .json()
            .await
            .map_err(|e| Self::gateway_err("invalid preapproval detail", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_payment_statuses_deserialize_without_error() {
        let detail: PaymentDetail = serde_json::from_str(
            r#"{"id":"123","status":"some_future_status","external_reference":"ORD-1"}"#,
        )
        .unwrap();
        assert_eq!(detail.status, GatewayPaymentStatus::Unknown);
    }

    #[test]
    fn known_statuses_deserialize() {
        let detail: PaymentDetail = serde_json::from_str(
            r#"{"id":"123","status":"approved","external_reference":"ORD-1","transaction_amount":"330.00"}"#,
        )
        .unwrap();
        assert_eq!(detail.status, GatewayPaymentStatus::Approved);
        assert_eq!(detail.external_reference.as_deref(), Some("ORD-1"));
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let gw = HttpPaymentGateway::new(
            "https://api.gateway.example/",
            "token",
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(gw.base_url, "https://api.gateway.example");
    }
}
