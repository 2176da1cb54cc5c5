use crate::auth::AuthenticatedUser;
use crate::entities::{cart::Model as CartModel, catalog_item::ItemType};
use crate::errors::{ApiError, ServiceError};
use crate::handlers::common::{
    caller_family_id, created_response, map_service_error, no_content_response, success_response,
    validate_input, PaginatedResponse, PaginationParams,
};
use crate::services::carts::AddCartItemInput;
use crate::AppState;
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_cart).get(list_carts))
        .route("/:id", get(get_cart))
        .route("/:id/items", post(add_item).delete(clear_cart))
        .route("/:id/items/:item_id", put(update_item_quantity).delete(remove_item))
}

/// Loads the cart and rejects callers from a different family.
async fn authorize_cart(
    state: &AppState,
    user: &AuthenticatedUser,
    cart_id: Uuid,
) -> Result<CartModel, ApiError> {
    let family_id = caller_family_id(&state.db, user).await?;

    let cart = state
        .services
        .cart
        .fetch_cart(cart_id)
        .await
        .map_err(map_service_error)?;

    if cart.family_id != family_id {
        return Err(ApiError::ServiceError(ServiceError::Forbidden(
            "Cart belongs to a different family".to_string(),
        )));
    }

    Ok(cart)
}

/// Create a new cart for the caller's family
#[utoipa::path(
    post,
    path = "/api/v1/carts",
    responses(
        (status = 201, description = "Cart created", body = crate::entities::cart::Model),
        (status = 403, description = "Caller has no family", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn create_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let family_id = caller_family_id(&state.db, &user).await?;

    let cart = state
        .services
        .cart
        .create_cart(family_id)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(cart))
}

/// List the caller's family carts, newest first
#[utoipa::path(
    get,
    path = "/api/v1/carts",
    params(PaginationParams),
    responses(
        (status = 200, description = "Carts for the caller's family"),
        (status = 403, description = "Caller has no family", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn list_carts(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let family_id = caller_family_id(&state.db, &user).await?;
    let per_page = params.capped_per_page();

    let (carts, total) = state
        .services
        .cart
        .list_carts_for_family(family_id, params.page, per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        carts,
        params.page,
        per_page,
        total,
    )))
}

/// Get a cart with its lines
#[utoipa::path(
    get,
    path = "/api/v1/carts/{id}",
    params(("id" = Uuid, Path, description = "Cart id")),
    responses(
        (status = 200, description = "Cart with items", body = crate::services::carts::CartWithItems),
        (status = 403, description = "Cart belongs to a different family", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    authorize_cart(&state, &user, id).await?;

    let cart_with_items = state
        .services
        .cart
        .get_cart(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart_with_items))
}

/// Add a line to a cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/{id}/items",
    params(("id" = Uuid, Path, description = "Cart id")),
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Cart after the add", body = crate::services::carts::CartWithItems),
        (status = 400, description = "Invalid line or cart not editable", body = crate::errors::ErrorResponse),
        (status = 403, description = "Cart belongs to a different family", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    authorize_cart(&state, &user, id).await?;

    let input = AddCartItemInput {
        item_id: payload.item_id,
        item_type: payload.item_type,
        title: payload.title,
        unit_price: payload.unit_price,
        member_ids: payload.member_ids,
        metadata: payload.metadata,
    };

    state
        .services
        .cart
        .add_item(id, input)
        .await
        .map_err(map_service_error)?;

    let cart_with_items = state
        .services
        .cart
        .get_cart(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart_with_items))
}

/// Set a line's quantity. Zero or less removes the line.
#[utoipa::path(
    put,
    path = "/api/v1/carts/{id}/items/{item_id}",
    params(
        ("id" = Uuid, Path, description = "Cart id"),
        ("item_id" = Uuid, Path, description = "Cart line id")
    ),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Cart after the update", body = crate::services::carts::CartWithItems),
        (status = 400, description = "Cart not editable", body = crate::errors::ErrorResponse),
        (status = 403, description = "Cart belongs to a different family", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart or line not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn update_item_quantity(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((id, line_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    authorize_cart(&state, &user, id).await?;

    state
        .services
        .cart
        .set_quantity(id, line_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    let cart_with_items = state
        .services
        .cart
        .get_cart(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart_with_items))
}

/// Remove a line from a cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts/{id}/items/{item_id}",
    params(
        ("id" = Uuid, Path, description = "Cart id"),
        ("item_id" = Uuid, Path, description = "Cart line id")
    ),
    responses(
        (status = 204, description = "Line removed"),
        (status = 400, description = "Cart not editable", body = crate::errors::ErrorResponse),
        (status = 403, description = "Cart belongs to a different family", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart or line not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((id, line_id)): Path<(Uuid, Uuid)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    authorize_cart(&state, &user, id).await?;

    state
        .services
        .cart
        .remove_item(id, line_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Clear every line from a cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts/{id}/items",
    params(("id" = Uuid, Path, description = "Cart id")),
    responses(
        (status = 200, description = "Emptied cart", body = crate::entities::cart::Model),
        (status = 400, description = "Cart not editable", body = crate::errors::ErrorResponse),
        (status = 403, description = "Cart belongs to a different family", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    authorize_cart(&state, &user, id).await?;

    let cart = state
        .services
        .cart
        .clear_cart(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "item_id": "550e8400-e29b-41d4-a716-446655440000",
    "item_type": "class",
    "title": "Beginner Gymnastics",
    "unit_price": "50.00",
    "member_ids": ["9c5bde1e-6f7a-4fd2-8f2e-1a2b3c4d5e6f"]
}))]
pub struct AddItemRequest {
    /// Catalog item (or membership tier) being added
    pub item_id: Uuid,
    pub item_type: ItemType,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    /// Client-presented unit price; authoritative only for membership lines
    #[schema(example = "50.00")]
    pub unit_price: Decimal,
    /// Family members this line registers
    pub member_ids: Vec<Uuid>,
    /// Free-form line metadata, e.g. membership `duration_months`
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateQuantityRequest {
    /// New quantity; zero or less removes the line
    #[schema(example = 2)]
    pub quantity: i32,
}
