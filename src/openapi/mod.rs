use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "RecZone API",
        version = "0.3.0",
        description = r#"
# RecZone Checkout & Fulfillment API

The checkout backend for the RecZone family activities platform: carts,
server-side price validation, payment intents, and transactional order
fulfillment (enrollments, capacity accounting, membership activation).

## Flow

1. Build a cart (`/carts` endpoints). Lines are keyed by catalog item plus
   the registered members, so double-clicks never duplicate a line.
2. `POST /checkout/payment-intent` re-prices the cart from the catalog,
   compares the submitted total, and creates a gateway payment intent.
   The browser confirms the card directly with the gateway using the
   returned client secret.
3. `POST /checkout/fulfill` re-verifies the payment server-side and commits
   the order, enrollments, capacity increments, and membership activation
   in one transaction. The call is idempotent on the payment intent id.

## Authentication

All endpoints except the gateway webhook require a Bearer JWT:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Errors share one response shape with appropriate HTTP status codes:

```json
{
  "error": "Precondition Failed",
  "message": "Payment has not succeeded",
  "request_id": "req-abc123xyz",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

## Pagination

List endpoints accept `page` (default 1) and `per_page` (default 20,
max 100).
        "#,
        contact(
            name = "RecZone Engineering",
            email = "eng@reczone.app",
            url = "https://reczone.app"
        ),
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "https://api.reczone.app", description = "Production server"),
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Carts", description = "Family cart management"),
        (name = "Checkout", description = "Price validation, payment intents, fulfillment"),
        (name = "Orders", description = "Read-only order history"),
        (name = "Payments", description = "Gateway webhook"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Carts
        crate::handlers::carts::create_cart,
        crate::handlers::carts::list_carts,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item_quantity,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,

        // Checkout
        crate::handlers::checkout::create_payment_intent,
        crate::handlers::checkout::fulfill_order,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,

        // Webhooks
        crate::handlers::payment_webhooks::receive_webhook,
    ),
    components(
        schemas(
            // Cart types
            crate::entities::cart::Model,
            crate::entities::cart::CartStatus,
            crate::entities::cart_item::Model,
            crate::entities::catalog_item::ItemType,
            crate::services::carts::CartWithItems,
            crate::handlers::carts::AddItemRequest,
            crate::handlers::carts::UpdateQuantityRequest,

            // Checkout types
            crate::handlers::checkout::PaymentIntentRequest,
            crate::handlers::checkout::PaymentIntentResponse,
            crate::handlers::checkout::FulfillRequest,
            crate::handlers::checkout::FulfillResponse,

            // Order types
            crate::entities::order::Model,
            crate::entities::order::OrderPaymentStatus,
            crate::entities::order_item::Model,
            crate::entities::enrollment::Model,
            crate::entities::enrollment::EnrollmentStatus,
            crate::handlers::orders::OrderDetailResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    let config = utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true);
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_document_covers_the_mounted_routes() {
        let json = serde_json::to_string_pretty(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("RecZone API"));
        assert!(json.contains("/api/v1/carts"));
        assert!(json.contains("/api/v1/checkout/payment-intent"));
        assert!(json.contains("/api/v1/payments/webhook"));
        assert!(json.contains("bearer_auth"));
    }
}
