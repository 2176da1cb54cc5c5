use crate::auth::AuthenticatedUser;
use crate::entities::{enrollment, order, order_item};
use crate::errors::{ApiError, ServiceError};
use crate::handlers::common::{
    caller_family_id, success_response, PaginatedResponse, PaginationParams,
};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Router,
};
use sea_orm::{ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Creates the router for order endpoints. Orders are written only by
/// fulfillment; this surface is read-only.
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
}

/// List the caller's family orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders for the caller's family"),
        (status = 403, description = "Caller has no family", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let family_id = caller_family_id(&state.db, &user).await?;
    let per_page = params.capped_per_page();

    let paginator = order::Entity::find()
        .filter(order::Column::FamilyId.eq(family_id))
        .order_by_desc(order::Column::CreatedAt)
        .paginate(state.db.as_ref(), per_page);

    let total = paginator
        .num_items()
        .await
        .map_err(|e| ApiError::ServiceError(ServiceError::DatabaseError(e)))?;
    let orders = paginator
        .fetch_page(params.page.saturating_sub(1))
        .await
        .map_err(|e| ApiError::ServiceError(ServiceError::DatabaseError(e)))?;

    Ok(success_response(PaginatedResponse::new(
        orders,
        params.page,
        per_page,
        total,
    )))
}

/// Get one order with its line snapshots and enrollments
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order detail", body = OrderDetailResponse),
        (status = 403, description = "Caller has no family", body = crate::errors::ErrorResponse),
        (status = 404, description = "No such order in the caller's family", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let family_id = caller_family_id(&state.db, &user).await?;

    // Scoping by family in the query makes other families' orders
    // indistinguishable from missing ones.
    let order = order::Entity::find()
        .filter(order::Column::Id.eq(id))
        .filter(order::Column::FamilyId.eq(family_id))
        .one(state.db.as_ref())
        .await
        .map_err(|e| ApiError::ServiceError(ServiceError::DatabaseError(e)))?
        .ok_or_else(|| {
            ApiError::ServiceError(ServiceError::NotFound(format!("Order {} not found", id)))
        })?;

    let items = order
        .find_related(order_item::Entity)
        .all(state.db.as_ref())
        .await
        .map_err(|e| ApiError::ServiceError(ServiceError::DatabaseError(e)))?;

    let enrollments = order
        .find_related(enrollment::Entity)
        .all(state.db.as_ref())
        .await
        .map_err(|e| ApiError::ServiceError(ServiceError::DatabaseError(e)))?;

    Ok(success_response(OrderDetailResponse {
        order,
        items,
        enrollments,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderDetailResponse {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub enrollments: Vec<enrollment::Model>,
}
