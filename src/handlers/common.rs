use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::entities::family_member;
use crate::errors::{ApiError, ServiceError};

const DEFAULT_PAGE: u64 = 1;
const DEFAULT_PER_PAGE: u64 = 20;
const MAX_PER_PAGE: u64 = 100;

/// Runs the derive-based validation rules on a request payload and turns
/// the failures into a 400.
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}

/// Resolve the family the authenticated user belongs to.
///
/// Every cart, checkout, and order route is scoped to the caller's family,
/// so a token whose subject has no family-member record cannot reach any of
/// them. The lookup runs before the handler touches anything else.
pub async fn caller_family_id(
    db: &DatabaseConnection,
    user: &AuthUser,
) -> Result<Uuid, ApiError> {
    let member = family_member::Entity::find()
        .filter(family_member::Column::UserId.eq(user.user_id.as_str()))
        .one(db)
        .await
        .map_err(|e| ApiError::ServiceError(ServiceError::DatabaseError(e)))?;

    member.map(|m| m.family_id).ok_or_else(|| {
        ApiError::ServiceError(ServiceError::Forbidden(
            "User is not a member of any family".to_string(),
        ))
    })
}

// Response constructors shared by the resource handlers. Payloads go out
// bare; only /health and /api/v1/status use an envelope.

pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

pub fn no_content_response() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// Query-string pagination for the list endpoints.
#[derive(Debug, Deserialize, Serialize, IntoParams)]
pub struct PaginationParams {
    #[serde(default = "PaginationParams::first_page")]
    pub page: u64,
    #[serde(default = "PaginationParams::default_per_page")]
    pub per_page: u64,
}

impl PaginationParams {
    fn first_page() -> u64 {
        DEFAULT_PAGE
    }

    fn default_per_page() -> u64 {
        DEFAULT_PER_PAGE
    }

    /// Page size clamped to [1, 100] so a single request cannot drain the pool
    pub fn capped_per_page(&self) -> u64 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// Paging block serialized alongside every list payload.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub page: u64,
    pub per_page: u64,
    /// Rows across all pages, not just this one.
    pub total: u64,
    /// Rounded up from `total`; zero when there are no rows.
    pub total_pages: u64,
}

impl PaginationMeta {
    pub fn new(page: u64, per_page: u64, total: u64) -> Self {
        Self {
            page,
            per_page,
            total,
            total_pages: if total == 0 { 0 } else { total.div_ceil(per_page) },
        }
    }
}

/// List payload plus its paging metadata.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    /// Present even when `data` is empty.
    pub pagination: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, page: u64, per_page: u64, total: u64) -> Self {
        let pagination = PaginationMeta::new(page, per_page, total);
        Self { data, pagination }
    }
}
