use crate::auth::AuthenticatedUser;
use crate::errors::{ApiError, ServiceError};
use crate::events::Event;
use crate::handlers::common::{caller_family_id, map_service_error, validate_input};
use crate::services::fulfillment::PaymentProof;
use crate::services::payment_gateway::CreateIntentRequest;
use crate::AppState;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/payment-intent", post(create_payment_intent))
        .route("/fulfill", post(fulfill_order))
}

/// Validate cart pricing and create a payment intent.
///
/// The submitted total is advisory: the server re-prices every line from the
/// catalog and rejects the request before any state changes if the two
/// disagree beyond tolerance. Free carts skip the gateway entirely; the
/// client follows up with a fulfill call carrying no intent id.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/payment-intent",
    request_body = PaymentIntentRequest,
    responses(
        (status = 200, description = "Pricing validated; intent created unless the cart is free", body = PaymentIntentResponse),
        (status = 400, description = "Total mismatch or cart not checkoutable", body = crate::errors::ErrorResponse),
        (status = 403, description = "Cart belongs to a different family", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart or catalog item not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway failure", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<PaymentIntentRequest>,
) -> Result<(StatusCode, Json<PaymentIntentResponse>), ApiError> {
    validate_input(&payload)?;

    let family_id = caller_family_id(&state.db, &user).await?;

    let cart_with_items = state
        .services
        .cart
        .get_cart(payload.cart_id)
        .await
        .map_err(map_service_error)?;

    if cart_with_items.cart.family_id != family_id {
        return Err(ApiError::ServiceError(ServiceError::Forbidden(
            "Cart belongs to a different family".to_string(),
        )));
    }

    if cart_with_items.items.is_empty() {
        return Err(ApiError::ServiceError(ServiceError::InvalidOperation(
            format!("Cart {} is empty", payload.cart_id),
        )));
    }

    // Rejects tampered totals before the cart or the gateway is touched.
    let priced = state
        .services
        .pricing
        .validate(&cart_with_items.items, payload.total)
        .await
        .map_err(map_service_error)?;

    state
        .services
        .cart
        .begin_checkout(payload.cart_id)
        .await
        .map_err(map_service_error)?;

    if priced.is_free() {
        return Ok((
            StatusCode::OK,
            Json(PaymentIntentResponse {
                payment_required: false,
                payment_intent_id: None,
                client_secret: None,
                amount_cents: 0,
                currency: state.config.default_currency.clone(),
                subtotal: priced.subtotal,
                processing_fee: priced.processing_fee,
                total: priced.total,
            }),
        ));
    }

    let currency = payload
        .currency
        .unwrap_or_else(|| state.config.default_currency.clone());

    let intent = match state
        .services
        .gateway
        .create_intent(CreateIntentRequest {
            amount_cents: priced.amount_cents,
            currency: currency.clone(),
            user_id: user.user_id.clone(),
            cart_line_count: cart_with_items.items.len(),
        })
        .await
    {
        Ok(intent) => intent,
        Err(err) => {
            // The cart goes back to editable so the family can retry.
            if let Err(revert_err) = state.services.cart.revert_checkout(payload.cart_id).await {
                warn!(
                    cart_id = %payload.cart_id,
                    error = %revert_err,
                    "Failed to revert cart after gateway error"
                );
            }
            return Err(map_service_error(err));
        }
    };

    state
        .event_sender
        .send_or_log(Event::CheckoutStarted {
            cart_id: payload.cart_id,
            payment_intent_id: intent.id.clone(),
        })
        .await;
    counter!("reczone_checkout.intents_created", 1);

    Ok((
        StatusCode::OK,
        Json(PaymentIntentResponse {
            payment_required: true,
            payment_intent_id: Some(intent.id),
            client_secret: intent.client_secret,
            amount_cents: intent.amount_cents,
            currency: intent.currency,
            subtotal: priced.subtotal,
            processing_fee: priced.processing_fee,
            total: priced.total,
        }),
    ))
}

/// Verify payment and fulfill the order.
///
/// Idempotent on the payment intent id: replaying a fulfilled checkout
/// returns the existing order with a 200 instead of writing a second one.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/fulfill",
    request_body = FulfillRequest,
    responses(
        (status = 201, description = "Order fulfilled", body = FulfillResponse),
        (status = 200, description = "Already fulfilled for this payment intent", body = FulfillResponse),
        (status = 403, description = "Cart belongs to a different family", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart or catalog item not found", body = crate::errors::ErrorResponse),
        (status = 412, description = "Payment has not succeeded", body = crate::errors::ErrorResponse),
        (status = 422, description = "An activity is at capacity", body = crate::errors::ErrorResponse),
        (status = 503, description = "Fulfillment timed out", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn fulfill_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<FulfillRequest>,
) -> Result<(StatusCode, Json<FulfillResponse>), ApiError> {
    validate_input(&payload)?;

    let proof = match payload.payment_intent_id {
        Some(payment_intent_id) => PaymentProof::Verified { payment_intent_id },
        None => PaymentProof::Waived,
    };

    let outcome = state
        .services
        .fulfillment
        .fulfill(&user.user_id, payload.cart_id, proof)
        .await
        .map_err(map_service_error)?;

    let (status, message) = if outcome.already_fulfilled {
        (
            StatusCode::OK,
            "Order was already fulfilled for this payment".to_string(),
        )
    } else {
        (StatusCode::CREATED, "Order fulfilled".to_string())
    };

    Ok((
        status,
        Json(FulfillResponse {
            success: true,
            order_id: outcome.order.id,
            message,
            already_fulfilled: outcome.already_fulfilled,
            enrollment_ids: outcome.enrollments.iter().map(|e| e.id).collect(),
            membership_expiry: outcome.membership_expiry,
        }),
    ))
}

// Request/response DTOs

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "cart_id": "550e8400-e29b-41d4-a716-446655440000",
    "total": "51.50",
    "currency": "usd"
}))]
pub struct PaymentIntentRequest {
    pub cart_id: Uuid,
    /// Total the client displayed, checked against the server-priced total
    #[schema(example = "51.50")]
    pub total: Decimal,
    /// ISO 4217 code; defaults to the configured currency
    #[validate(length(min = 3, max = 3))]
    pub currency: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntentResponse {
    /// False when the cart totals zero and no gateway object was created
    pub payment_required: bool,
    pub payment_intent_id: Option<String>,
    /// Handed to the gateway's browser SDK to confirm the card
    pub client_secret: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub subtotal: Decimal,
    pub processing_fee: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "cart_id": "550e8400-e29b-41d4-a716-446655440000",
    "payment_intent_id": "pi_3MtwBwLkdIwHu7ix28a3tqPa"
}))]
pub struct FulfillRequest {
    pub cart_id: Uuid,
    /// Intent from the payment-intent step; omit for free checkouts
    #[validate(length(min = 1, max = 255))]
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FulfillResponse {
    pub success: bool,
    pub order_id: Uuid,
    pub message: String,
    /// True when this payment intent had already produced an order
    pub already_fulfilled: bool,
    pub enrollment_ids: Vec<Uuid>,
    /// Set when the checkout activated or extended a membership
    pub membership_expiry: Option<DateTime<Utc>>,
}
