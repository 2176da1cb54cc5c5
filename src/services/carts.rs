use crate::{
    entities::{cart, cart_item, Cart, CartItem, CartModel, CartStatus, ItemType},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Cart service for family activity registration carts.
///
/// A cart collects the classes, sports, events, and memberships a family
/// intends to register for. Every mutation is persisted immediately, so a
/// cart rehydrated from storage is indistinguishable from one kept in
/// memory. The service owns the cart lifecycle:
///
/// `Empty -> Populated -> CheckingOut -> Fulfilled | Failed`
///
/// Checkout failures land in `Failed`, from which the cart can be edited or
/// re-submitted. `Fulfilled` is terminal.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// Canonical identity of a cart line.
///
/// A line is the combination of a catalog item and the exact set of family
/// members attached to it. Member order never matters: the ids are sorted
/// before hashing into the key, so `[a, b]` and `[b, a]` address the same
/// line.
pub fn line_key(item_id: Uuid, member_ids: &[Uuid]) -> String {
    let mut members: Vec<Uuid> = member_ids.to_vec();
    members.sort();
    members.dedup();

    let mut key = item_id.to_string();
    for member in &members {
        key.push(':');
        key.push_str(&member.to_string());
    }
    key
}

/// Sorted, deduplicated member ids as stored on a cart line
pub fn normalized_member_ids(member_ids: &[Uuid]) -> Vec<Uuid> {
    let mut members: Vec<Uuid> = member_ids.to_vec();
    members.sort();
    members.dedup();
    members
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a new empty cart for a family.
    ///
    /// Publishes a `CartCreated` event upon success.
    #[instrument(skip(self))]
    pub async fn create_cart(&self, family_id: Uuid) -> Result<CartModel, ServiceError> {
        let cart_id = Uuid::new_v4();
        let now = Utc::now();

        let cart = cart::ActiveModel {
            id: Set(cart_id),
            family_id: Set(family_id),
            status: Set(CartStatus::Empty),
            subtotal: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let cart = cart.insert(&*self.db).await?;
        info!("Created cart {} for family {}", cart_id, family_id);

        self.event_sender
            .send_or_log(Event::CartCreated(cart_id))
            .await;

        Ok(cart)
    }

    /// Adds a line to the cart, or folds it into an existing line.
    ///
    /// Lines are keyed by item id plus the sorted member set. Re-adding an
    /// existing line is type-dependent:
    /// - class/sport/event lines are single-registration: the add is a
    ///   no-op and the cart is returned unchanged
    /// - membership lines increment their quantity
    ///
    /// An empty cart moves to `Populated` on its first line.
    #[instrument(skip(self, input))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        input: AddCartItemInput,
    ) -> Result<CartModel, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let cart = Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        if !cart.status.is_mutable() {
            return Err(ServiceError::InvalidOperation(format!(
                "Cart in status {:?} cannot be edited",
                cart.status
            )));
        }

        let members = normalized_member_ids(&input.member_ids);
        let key = line_key(input.item_id, &members);

        let existing_line = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::LineKey.eq(key.clone()))
            .one(&txn)
            .await?;

        if let Some(line) = existing_line {
            if input.item_type.is_singleton() {
                // Same item for the same members registers once; nothing to do.
                txn.commit().await?;
                return Ok(cart);
            }

            let quantity = line.quantity + 1;
            let mut line: cart_item::ActiveModel = line.into();
            line.quantity = Set(quantity);
            line.updated_at = Set(Utc::now());
            line.update(&txn).await?;
        } else {
            let line = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart_id),
                item_id: Set(input.item_id),
                item_type: Set(input.item_type),
                line_key: Set(key),
                title: Set(input.title.clone()),
                unit_price: Set(input.unit_price),
                quantity: Set(1),
                member_ids: Set(serde_json::to_value(&members)
                    .map_err(|e| ServiceError::SerializationError(e.to_string()))?),
                metadata: Set(input.metadata.clone()),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            };

            line.insert(&txn).await?;
        }

        let updated_cart = self.refresh_cart_state(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id,
                item_id: input.item_id,
            })
            .await;

        info!("Added item {} to cart {}", input.item_id, cart_id);
        Ok(updated_cart)
    }

    /// Sets the quantity of an existing cart line.
    ///
    /// A quantity of zero or less removes the line. Classes, sports, and
    /// events are single-registration and reject any quantity above one.
    #[instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        cart_id: Uuid,
        line_id: Uuid,
        quantity: i32,
    ) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        if !cart.status.is_mutable() {
            return Err(ServiceError::InvalidOperation(format!(
                "Cart in status {:?} cannot be edited",
                cart.status
            )));
        }

        let line = CartItem::find_by_id(line_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", line_id)))?;

        if line.cart_id != cart_id {
            return Err(ServiceError::InvalidOperation(
                "Item does not belong to this cart".to_string(),
            ));
        }

        let item_id = line.item_id;

        if quantity <= 0 {
            line.delete(&txn).await?;

            let updated_cart = self.refresh_cart_state(&txn, cart_id).await?;
            txn.commit().await?;

            self.event_sender
                .send_or_log(Event::CartItemRemoved { cart_id, item_id })
                .await;

            return Ok(updated_cart);
        }

        if line.item_type.is_singleton() && quantity > 1 {
            return Err(ServiceError::InvalidInput(format!(
                "{:?} registrations are limited to one per member set",
                line.item_type
            )));
        }

        let mut line: cart_item::ActiveModel = line.into();
        line.quantity = Set(quantity);
        line.updated_at = Set(Utc::now());
        line.update(&txn).await?;

        let updated_cart = self.refresh_cart_state(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated { cart_id, item_id })
            .await;

        Ok(updated_cart)
    }

    /// Removes a cart line outright
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        cart_id: Uuid,
        line_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        self.set_quantity(cart_id, line_id, 0).await
    }

    /// Deletes every line and returns the cart to `Empty`
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, cart_id: Uuid) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        if !cart.status.is_mutable() {
            return Err(ServiceError::InvalidOperation(format!(
                "Cart in status {:?} cannot be edited",
                cart.status
            )));
        }

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;

        let updated_cart = self.refresh_cart_state(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(cart_id))
            .await;

        info!("Cleared cart {}", cart_id);
        Ok(updated_cart)
    }

    /// Retrieves a cart with all its lines.
    ///
    /// Reads never write back: the stored state is returned as-is.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, cart_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let cart = self.fetch_cart(cart_id).await?;
        let items = cart.find_related(CartItem).all(&*self.db).await?;
        Ok(CartWithItems { cart, items })
    }

    /// Retrieves a cart without loading its lines
    pub async fn fetch_cart(&self, cart_id: Uuid) -> Result<CartModel, ServiceError> {
        Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))
    }

    /// Lists carts belonging to a family, newest first
    pub async fn list_carts_for_family(
        &self,
        family_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<CartModel>, u64), ServiceError> {
        let paginator = Cart::find()
            .filter(cart::Column::FamilyId.eq(family_id))
            .order_by_desc(cart::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let carts = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((carts, total))
    }

    /// Moves a cart into `CheckingOut`.
    ///
    /// Only populated (or previously failed) carts may start checkout; an
    /// empty cart has nothing to pay for.
    #[instrument(skip(self))]
    pub async fn begin_checkout(&self, cart_id: Uuid) -> Result<CartModel, ServiceError> {
        self.transition(cart_id, CartStatus::CheckingOut).await
    }

    /// Returns a cart from `CheckingOut` to `Populated`.
    ///
    /// Used when payment-intent creation fails after checkout has started,
    /// so the family can edit the cart and try again.
    #[instrument(skip(self))]
    pub async fn revert_checkout(&self, cart_id: Uuid) -> Result<CartModel, ServiceError> {
        self.transition(cart_id, CartStatus::Populated).await
    }

    /// Marks a checkout as fulfilled. Terminal.
    #[instrument(skip(self))]
    pub async fn mark_fulfilled(&self, cart_id: Uuid) -> Result<CartModel, ServiceError> {
        self.transition(cart_id, CartStatus::Fulfilled).await
    }

    /// Marks a checkout as failed. The cart stays editable and retryable.
    #[instrument(skip(self))]
    pub async fn mark_failed(&self, cart_id: Uuid) -> Result<CartModel, ServiceError> {
        self.transition(cart_id, CartStatus::Failed).await
    }

    async fn transition(
        &self,
        cart_id: Uuid,
        target: CartStatus,
    ) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        if cart.status == target {
            txn.commit().await?;
            return Ok(cart);
        }

        if !cart.status.can_transition_to(target) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cart cannot move from {:?} to {:?}",
                cart.status, target
            )));
        }

        let previous = cart.status;
        let mut active: cart::ActiveModel = cart.into();
        active.status = Set(target);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(
            "Cart {} moved from {:?} to {:?}",
            cart_id, previous, target
        );
        Ok(updated)
    }

    /// Recompute the subtotal and derive the status from the remaining lines.
    ///
    /// Runs inside every mutating transaction, so the stored cart always
    /// reflects its lines. Carts mid-checkout keep their status; everything
    /// else collapses to `Empty`/`Populated` based on whether lines remain.
    async fn refresh_cart_state(
        &self,
        txn: &impl ConnectionTrait,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(txn)
            .await?;

        let subtotal: Decimal = items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();

        let cart = Cart::find_by_id(cart_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let status = match cart.status {
            CartStatus::CheckingOut => CartStatus::CheckingOut,
            _ if items.is_empty() => CartStatus::Empty,
            _ => CartStatus::Populated,
        };

        let mut cart: cart::ActiveModel = cart.into();
        cart.subtotal = Set(subtotal);
        cart.status = Set(status);
        cart.updated_at = Set(Utc::now());

        Ok(cart.update(txn).await?)
    }
}

/// Input for adding a line to a cart
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddCartItemInput {
    pub item_id: Uuid,
    pub item_type: ItemType,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub unit_price: Decimal,
    pub member_ids: Vec<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

/// Cart with lines
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<cart_item::Model>,
}

impl CartWithItems {
    pub fn line_count(&self) -> usize {
        self.items.len()
    }
}
