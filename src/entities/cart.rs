use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Family cart entity
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[schema(as = Cart)]
#[sea_orm(table_name = "carts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub family_id: Uuid,
    pub status: CartStatus,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub subtotal: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Cart lifecycle. `Failed` is retryable: a failed checkout may be
/// re-attempted, everything else follows the arrows one way.
///
/// `Empty -> Populated -> CheckingOut -> Fulfilled | Failed`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    #[sea_orm(string_value = "empty")]
    Empty,
    #[sea_orm(string_value = "populated")]
    Populated,
    #[sea_orm(string_value = "checking_out")]
    CheckingOut,
    #[sea_orm(string_value = "fulfilled")]
    Fulfilled,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl CartStatus {
    pub fn can_transition_to(self, next: CartStatus) -> bool {
        use CartStatus::*;
        matches!(
            (self, next),
            (Empty, Populated)
                | (Populated, Empty)
                | (Populated, CheckingOut)
                | (CheckingOut, Populated)
                | (CheckingOut, Fulfilled)
                | (CheckingOut, Failed)
                | (Failed, CheckingOut)
                | (Failed, Populated)
                | (Failed, Empty)
        )
    }

    /// Carts accept line mutations only before checkout begins.
    pub fn is_mutable(self) -> bool {
        matches!(self, CartStatus::Empty | CartStatus::Populated | CartStatus::Failed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CartStatus::Fulfilled)
    }
}
