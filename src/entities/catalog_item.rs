use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Catalog entity for bookable activities. Classes, sports and sessions of
/// events share one table; `item_type` discriminates. Memberships are not
/// catalog rows, they are priced from the client line and activate the
/// family account at fulfillment.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "catalog_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub item_type: ItemType,
    pub title: String,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price: Decimal,
    pub capacity: i32,
    pub enrolled: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Seats still open on this activity.
    pub fn remaining_capacity(&self) -> i32 {
        (self.capacity - self.enrolled).max(0)
    }
}

/// Line item taxonomy shared by carts, orders and enrollments.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    #[sea_orm(string_value = "class")]
    Class,
    #[sea_orm(string_value = "sport")]
    Sport,
    #[sea_orm(string_value = "event")]
    Event,
    #[sea_orm(string_value = "membership")]
    Membership,
}

impl ItemType {
    /// Singleton types hold at most one unit per line; re-adding the same
    /// line is a no-op. Memberships accumulate quantity instead.
    pub fn is_singleton(self) -> bool {
        !matches!(self, ItemType::Membership)
    }

    pub fn is_membership(self) -> bool {
        matches!(self, ItemType::Membership)
    }

    /// Types that are priced from the catalog rather than the client line.
    pub fn is_catalog_priced(self) -> bool {
        !self.is_membership()
    }
}
