use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, warn};
use utoipa::ToSchema;

/// Payment intent as exposed to API clients
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntent {
    pub id: String,
    /// Secret the browser hands to the gateway's JS SDK to confirm payment
    pub client_secret: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentIntentStatus,
}

impl PaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == PaymentIntentStatus::Succeeded
    }
}

/// Gateway-side lifecycle of a payment intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

/// Parameters for creating a payment intent
#[derive(Debug, Clone)]
pub struct CreateIntentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub user_id: String,
    pub cart_line_count: usize,
}

/// Client for the card payment gateway.
///
/// The gateway is the system of record for payment state; this trait only
/// creates intents and reads them back. Charging happens in the browser
/// against the client secret, and outcomes land on the webhook endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ServiceError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError>;
}

/// Intent object as the gateway serializes it. Amounts come back under
/// `amount`; the public DTO renames that to `amount_cents`.
#[derive(Debug, Deserialize)]
struct GatewayIntentPayload {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    amount: i64,
    currency: String,
    status: PaymentIntentStatus,
}

impl From<GatewayIntentPayload> for PaymentIntent {
    fn from(payload: GatewayIntentPayload) -> Self {
        Self {
            id: payload.id,
            client_secret: payload.client_secret,
            amount_cents: payload.amount,
            currency: payload.currency,
            status: payload.status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: GatewayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Stripe-wire-compatible HTTP implementation of [`PaymentGateway`]
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("Failed to build gateway HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn decode_intent(
        &self,
        response: reqwest::Response,
    ) -> Result<PaymentIntent, ServiceError> {
        let status = response.status();

        if !status.is_success() {
            let detail = response
                .json::<GatewayErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| "no error detail".to_string());

            warn!(%status, %detail, "payment gateway rejected the request");
            return Err(ServiceError::ExternalServiceError(format!(
                "Payment gateway returned {}: {}",
                status, detail
            )));
        }

        let payload = response.json::<GatewayIntentPayload>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!(
                "Payment gateway returned an unreadable intent: {}",
                e
            ))
        })?;

        Ok(payload.into())
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    /// Create an intent for the given amount.
    ///
    /// Failures are surfaced to the caller without retrying; the client
    /// re-submits checkout, which creates a fresh intent.
    #[instrument(skip(self, request), fields(amount_cents = request.amount_cents, currency = %request.currency))]
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let params = [
            ("amount", request.amount_cents.to_string()),
            ("currency", request.currency.clone()),
            ("metadata[user_id]", request.user_id.clone()),
            (
                "metadata[cart_line_count]",
                request.cart_line_count.to_string(),
            ),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.api_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("Payment gateway unreachable: {}", e))
            })?;

        self.decode_intent(response).await
    }

    #[instrument(skip(self))]
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError> {
        let response = self
            .client
            .get(format!("{}/v1/payment_intents/{}", self.base_url, intent_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("Payment gateway unreachable: {}", e))
            })?;

        self.decode_intent(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(server: &MockServer) -> HttpPaymentGateway {
        HttpPaymentGateway::new(
            server.uri(),
            "sk_test_123".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    // ==================== Create Intent Tests ====================

    #[tokio::test]
    async fn create_intent_posts_form_encoded_params() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(body_string_contains("amount=5150"))
            .and(body_string_contains("currency=usd"))
            .and(body_string_contains("metadata%5Buser_id%5D=user-1"))
            .and(body_string_contains("metadata%5Bcart_line_count%5D=2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pi_123",
                "client_secret": "pi_123_secret_abc",
                "amount": 5150,
                "currency": "usd",
                "status": "requires_payment_method"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server);
        let intent = gateway
            .create_intent(CreateIntentRequest {
                amount_cents: 5150,
                currency: "usd".to_string(),
                user_id: "user-1".to_string(),
                cart_line_count: 2,
            })
            .await
            .unwrap();

        assert_eq!(intent.id, "pi_123");
        assert_eq!(intent.amount_cents, 5150);
        assert_eq!(intent.status, PaymentIntentStatus::RequiresPaymentMethod);
        assert_eq!(intent.client_secret.as_deref(), Some("pi_123_secret_abc"));
    }

    #[tokio::test]
    async fn create_intent_maps_gateway_rejections() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "Amount must be at least 50 cents" }
            })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server);
        let err = gateway
            .create_intent(CreateIntentRequest {
                amount_cents: 1,
                currency: "usd".to_string(),
                user_id: "user-1".to_string(),
                cart_line_count: 1,
            })
            .await
            .unwrap_err();

        match err {
            ServiceError::ExternalServiceError(msg) => {
                assert!(msg.contains("Amount must be at least 50 cents"));
            }
            other => panic!("expected ExternalServiceError, got {:?}", other),
        }
    }

    // ==================== Retrieve Intent Tests ====================

    #[tokio::test]
    async fn retrieve_intent_reads_back_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_123"))
            .and(header("authorization", "Bearer sk_test_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pi_123",
                "amount": 5150,
                "currency": "usd",
                "status": "succeeded"
            })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server);
        let intent = gateway.retrieve_intent("pi_123").await.unwrap();

        assert!(intent.is_succeeded());
        assert!(intent.client_secret.is_none());
    }

    #[tokio::test]
    async fn unknown_statuses_do_not_fail_decoding() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_999"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pi_999",
                "amount": 100,
                "currency": "usd",
                "status": "some_future_status"
            })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server);
        let intent = gateway.retrieve_intent("pi_999").await.unwrap();

        assert_eq!(intent.status, PaymentIntentStatus::Unknown);
        assert!(!intent.is_succeeded());
    }
}
