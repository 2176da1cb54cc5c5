use crate::{
    entities::{
        cart, catalog_item, enrollment, family, family_member, order, order_item, Cart, CartItem,
        CartStatus, CatalogItem, EnrollmentStatus, Family, FamilyMember, ItemType,
        MembershipStatus, Order, OrderPaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        payment_gateway::PaymentGateway,
        pricing::{PriceValidator, PricedCart},
    },
};
use chrono::{DateTime, Months, Utc};
use metrics::{counter, histogram};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    ModelTrait, QueryFilter, Set, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Evidence that a checkout has been paid for.
///
/// `Verified` carries a gateway intent id the client reports as paid; the
/// coordinator re-reads the intent and trusts only the gateway's answer.
/// `Waived` covers free checkouts, and is accepted only when the re-priced
/// total is zero.
#[derive(Debug, Clone)]
pub enum PaymentProof {
    Verified { payment_intent_id: String },
    Waived,
}

/// Everything written (or found already written) for one fulfillment
#[derive(Debug)]
pub struct FulfillmentOutcome {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub enrollments: Vec<enrollment::Model>,
    pub membership_expiry: Option<DateTime<Utc>>,
    pub already_fulfilled: bool,
}

/// Turns a paid checkout into an order, enrollments, and membership updates.
///
/// All writes happen in one transaction keyed by the payment intent id:
/// `orders.payment_intent_id` is unique, so a retried fulfillment finds the
/// existing order and returns it instead of writing twice. Capacity is
/// enforced with a guarded increment inside the same transaction; a full
/// activity rolls everything back.
#[derive(Clone)]
pub struct OrderFulfillmentCoordinator {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    pricing: PriceValidator,
    intent_locks: Arc<AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    timeout: Duration,
    default_currency: String,
}

impl OrderFulfillmentCoordinator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        pricing: PriceValidator,
        timeout: Duration,
        default_currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            pricing,
            intent_locks: Arc::new(AsyncMutex::new(HashMap::new())),
            timeout,
            default_currency,
        }
    }

    /// Fulfill a checked-out cart.
    ///
    /// Payment is verified first, then ownership, and only then does any
    /// write happen. The whole call runs under the configured deadline; a
    /// deadline hit rolls the transaction back and surfaces as service
    /// unavailability so the client can retry.
    #[instrument(skip(self), fields(cart_id = %cart_id))]
    pub async fn fulfill(
        &self,
        caller_user_id: &str,
        cart_id: Uuid,
        proof: PaymentProof,
    ) -> Result<FulfillmentOutcome, ServiceError> {
        let started = Instant::now();

        let result = tokio::time::timeout(
            self.timeout,
            self.fulfill_inner(caller_user_id, cart_id, proof),
        )
        .await;

        histogram!("reczone_checkout.fulfillment_duration", started.elapsed());

        match result {
            Ok(Ok(outcome)) => {
                counter!("reczone_checkout.fulfilled", 1);
                Ok(outcome)
            }
            Ok(Err(e)) => {
                counter!("reczone_checkout.failed", 1);
                Err(e)
            }
            Err(_) => {
                counter!("reczone_checkout.timed_out", 1);
                error!(%cart_id, timeout = ?self.timeout, "fulfillment deadline hit");
                self.mark_cart_failed(cart_id).await;
                Err(ServiceError::ServiceUnavailable(format!(
                    "Fulfillment did not finish within {:?}; the attempt was rolled back",
                    self.timeout
                )))
            }
        }
    }

    async fn fulfill_inner(
        &self,
        caller_user_id: &str,
        cart_id: Uuid,
        proof: PaymentProof,
    ) -> Result<FulfillmentOutcome, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let items = cart.find_related(CartItem).all(&*self.db).await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "Cart has no lines to fulfill".to_string(),
            ));
        }

        let priced = self.pricing.price_cart(&items).await?;

        let (payment_intent_id, currency, payment_status) =
            self.resolve_payment(&proof, &priced).await?;

        // Ownership comes after payment verification but before any write.
        let member = FamilyMember::find()
            .filter(family_member::Column::UserId.eq(caller_user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::Forbidden("No family member record for this user".to_string())
            })?;

        if member.family_id != cart.family_id {
            return Err(ServiceError::Forbidden(
                "Cart belongs to another family".to_string(),
            ));
        }

        // Serialize fulfillments of the same intent; the unique order column
        // is the hard guarantee, the lock keeps retries on the clean path.
        let lock = self.intent_lock(&payment_intent_id).await;
        let guard = lock.lock().await;

        let result = self
            .fulfill_txn(
                &cart,
                &priced,
                &payment_intent_id,
                &currency,
                payment_status,
                caller_user_id,
            )
            .await;

        drop(guard);
        self.release_intent_lock(&payment_intent_id, lock).await;

        match result {
            Ok(outcome) => {
                if outcome.already_fulfilled {
                    info!(
                        order_id = %outcome.order.id,
                        %payment_intent_id,
                        "fulfillment replayed; returning existing order"
                    );
                    return Ok(outcome);
                }

                self.event_sender
                    .send_or_log(Event::OrderCreated(outcome.order.id))
                    .await;
                self.event_sender
                    .send_or_log(Event::CheckoutCompleted {
                        payment_intent_id: payment_intent_id.clone(),
                        order_id: outcome.order.id,
                    })
                    .await;
                for enrollment in &outcome.enrollments {
                    self.event_sender
                        .send_or_log(Event::EnrollmentCreated {
                            enrollment_id: enrollment.id,
                            item_id: enrollment.item_id,
                        })
                        .await;
                }
                if let Some(expiry) = outcome.membership_expiry {
                    self.event_sender
                        .send_or_log(Event::MembershipActivated {
                            family_id: cart.family_id,
                            expiry,
                        })
                        .await;
                }

                info!(
                    order_id = %outcome.order.id,
                    family_id = %cart.family_id,
                    %payment_intent_id,
                    lines = outcome.items.len(),
                    "checkout fulfilled"
                );
                Ok(outcome)
            }
            Err(e) => {
                if matches!(e, ServiceError::InvalidOperation(_)) {
                    return Err(e);
                }

                error!(
                    %payment_intent_id,
                    family_id = %cart.family_id,
                    cart_lines = ?items,
                    error = %e,
                    "fulfillment failed; transaction rolled back"
                );
                self.mark_cart_failed(cart_id).await;
                self.event_sender
                    .send_or_log(Event::CheckoutFailed {
                        payment_intent_id: payment_intent_id.clone(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// Verify the proof of payment against the gateway (or the zero total)
    async fn resolve_payment(
        &self,
        proof: &PaymentProof,
        priced: &PricedCart,
    ) -> Result<(String, String, OrderPaymentStatus), ServiceError> {
        match proof {
            PaymentProof::Verified { payment_intent_id } => {
                let intent = self.gateway.retrieve_intent(payment_intent_id).await?;

                if !intent.is_succeeded() {
                    return Err(ServiceError::PreconditionFailed(format!(
                        "Payment intent {} has status {:?}; fulfillment requires a succeeded payment",
                        payment_intent_id, intent.status
                    )));
                }

                Ok((
                    payment_intent_id.clone(),
                    intent.currency,
                    OrderPaymentStatus::Succeeded,
                ))
            }
            PaymentProof::Waived => {
                if !priced.is_free() {
                    return Err(ServiceError::PreconditionFailed(format!(
                        "Cart total is {}; payment cannot be waived",
                        priced.total
                    )));
                }

                Ok((
                    waived_intent_id(),
                    self.default_currency.clone(),
                    OrderPaymentStatus::Waived,
                ))
            }
        }
    }

    async fn fulfill_txn(
        &self,
        cart: &cart::Model,
        priced: &PricedCart,
        payment_intent_id: &str,
        currency: &str,
        payment_status: OrderPaymentStatus,
        caller_user_id: &str,
    ) -> Result<FulfillmentOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        // Replay of an already-fulfilled intent: hand back what was written.
        if let Some(existing) = Order::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&txn)
            .await?
        {
            let items = existing.find_related(order_item::Entity).all(&txn).await?;
            let enrollments = existing.find_related(enrollment::Entity).all(&txn).await?;
            txn.commit().await?;

            return Ok(FulfillmentOutcome {
                order: existing,
                items,
                enrollments,
                membership_expiry: None,
                already_fulfilled: true,
            });
        }

        let current = Cart::find_by_id(cart.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart.id)))?;

        if current.status != CartStatus::CheckingOut {
            return Err(ServiceError::InvalidOperation(format!(
                "Cart in status {:?} is not awaiting fulfillment",
                current.status
            )));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let order_row = order::ActiveModel {
            id: Set(order_id),
            family_id: Set(cart.family_id),
            subtotal: Set(priced.subtotal),
            processing_fee: Set(priced.processing_fee),
            total: Set(priced.total),
            currency: Set(currency.to_string()),
            payment_intent_id: Set(payment_intent_id.to_string()),
            payment_status: Set(payment_status),
            placed_by: Set(caller_user_id.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut order_items = Vec::with_capacity(priced.lines.len());
        let mut enrollments = Vec::new();
        let mut membership_expiry = None;

        for line in &priced.lines {
            let item_row = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                item_id: Set(line.item_id),
                item_type: Set(line.item_type.clone()),
                title: Set(line.title.clone()),
                unit_price: Set(line.unit_price),
                quantity: Set(line.quantity),
                line_total: Set(line.line_total),
                member_ids: Set(line.member_ids.clone()),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            order_items.push(item_row);

            match line.item_type {
                ItemType::Membership => {
                    let expiry = self
                        .activate_membership(&txn, cart.family_id, line.metadata.as_ref(), now)
                        .await?;
                    membership_expiry = Some(expiry);
                }
                _ => {
                    self.reserve_capacity(&txn, line.item_id, line.quantity).await?;

                    let enrollment_row = enrollment::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        family_id: Set(cart.family_id),
                        item_id: Set(line.item_id),
                        item_type: Set(line.item_type.clone()),
                        order_id: Set(order_id),
                        member_ids: Set(line.member_ids.clone()),
                        status: Set(EnrollmentStatus::Active),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(&txn)
                    .await?;
                    enrollments.push(enrollment_row);
                }
            }
        }

        let mut cart_row: cart::ActiveModel = current.into();
        cart_row.status = Set(CartStatus::Fulfilled);
        cart_row.updated_at = Set(now);
        cart_row.update(&txn).await?;

        txn.commit().await?;

        Ok(FulfillmentOutcome {
            order: order_row,
            items: order_items,
            enrollments,
            membership_expiry,
            already_fulfilled: false,
        })
    }

    /// Guarded seat reservation: `enrolled` only moves when the result still
    /// fits under `capacity`. Zero rows touched means the activity is full
    /// (or gone), and the caller's transaction must abort.
    async fn reserve_capacity(
        &self,
        txn: &DatabaseTransaction,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let updated = CatalogItem::update_many()
            .col_expr(
                catalog_item::Column::Enrolled,
                Expr::col(catalog_item::Column::Enrolled).add(quantity),
            )
            .filter(catalog_item::Column::Id.eq(item_id))
            .filter(
                Expr::col(catalog_item::Column::Capacity)
                    .gte(Expr::col(catalog_item::Column::Enrolled).add(quantity)),
            )
            .exec(txn)
            .await?;

        if updated.rows_affected == 0 {
            let title = CatalogItem::find_by_id(item_id)
                .one(txn)
                .await?
                .map(|item| item.title)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Catalog item {} not found", item_id))
                })?;

            return Err(ServiceError::InsufficientCapacity(format!(
                "'{}' has no remaining capacity",
                title
            )));
        }

        Ok(())
    }

    /// Membership activation resets the clock: expiry is measured from now,
    /// not extended from the previous expiry.
    async fn activate_membership(
        &self,
        txn: &DatabaseTransaction,
        family_id: Uuid,
        metadata: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ServiceError> {
        let months = membership_months(metadata);
        let expiry = now + Months::new(months);

        let family_row = Family::find_by_id(family_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Family {} not found", family_id)))?;

        let mut active: family::ActiveModel = family_row.into();
        active.membership_status = Set(MembershipStatus::Active);
        active.membership_expiry = Set(Some(expiry));
        active.updated_at = Set(now);
        active.update(txn).await?;

        Ok(expiry)
    }

    async fn mark_cart_failed(&self, cart_id: Uuid) {
        let result = async {
            let cart = Cart::find_by_id(cart_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

            if cart.status != CartStatus::CheckingOut {
                return Ok::<_, ServiceError>(());
            }

            let mut active: cart::ActiveModel = cart.into();
            active.status = Set(CartStatus::Failed);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            error!(%cart_id, error = %e, "could not mark cart as failed");
        }
    }

    async fn intent_lock(&self, payment_intent_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.intent_locks.lock().await;
        if let Some(lock) = locks.get(payment_intent_id) {
            lock.clone()
        } else {
            let new_lock = Arc::new(AsyncMutex::new(()));
            locks.insert(payment_intent_id.to_string(), new_lock.clone());
            new_lock
        }
    }

    async fn release_intent_lock(&self, payment_intent_id: &str, lock: Arc<AsyncMutex<()>>) {
        if Arc::strong_count(&lock) == 2 {
            let mut locks = self.intent_locks.lock().await;
            if let Some(existing) = locks.get(payment_intent_id) {
                if Arc::ptr_eq(existing, &lock) {
                    locks.remove(payment_intent_id);
                }
            }
        }
    }
}

/// Synthetic intent id recorded for free checkouts, unique per fulfillment
fn waived_intent_id() -> String {
    format!("waived-{}", Uuid::new_v4())
}

/// Months of membership granted by a line, from its `duration_months`
/// metadata. Falls back to a year when absent or malformed.
fn membership_months(metadata: Option<&serde_json::Value>) -> u32 {
    metadata
        .and_then(|m| m.get("duration_months"))
        .and_then(|v| v.as_u64())
        .map(|months| months as u32)
        .unwrap_or(12)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payment_gateway::{
        MockPaymentGateway, PaymentIntent, PaymentIntentStatus,
    };
    use crate::services::pricing::PricedLine;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::Database;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn coordinator_with(gateway: MockPaymentGateway) -> OrderFulfillmentCoordinator {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let (tx, _rx) = mpsc::channel(16);

        OrderFulfillmentCoordinator::new(
            db.clone(),
            Arc::new(EventSender::new(tx)),
            Arc::new(gateway),
            PriceValidator::new(db),
            Duration::from_secs(10),
            "usd".to_string(),
        )
    }

    fn priced_cart(total_cents: i64) -> PricedCart {
        let total = rust_decimal::Decimal::new(total_cents, 2);
        PricedCart {
            lines: vec![PricedLine {
                item_id: Uuid::new_v4(),
                item_type: ItemType::Class,
                title: "Beginner Swim".to_string(),
                unit_price: total,
                quantity: 1,
                line_total: total,
                member_ids: json!([]),
                metadata: None,
            }],
            subtotal: total,
            processing_fee: dec!(0.00),
            total,
            amount_cents: total_cents,
        }
    }

    fn succeeded_intent(id: &str) -> PaymentIntent {
        PaymentIntent {
            id: id.to_string(),
            client_secret: None,
            amount_cents: 5150,
            currency: "usd".to_string(),
            status: PaymentIntentStatus::Succeeded,
        }
    }

    // ==================== Payment Resolution Tests ====================

    #[tokio::test]
    async fn verified_proof_requires_succeeded_status() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_retrieve_intent().returning(|id| {
            let mut intent = succeeded_intent(id);
            intent.status = PaymentIntentStatus::RequiresPaymentMethod;
            Ok(intent)
        });

        let coordinator = coordinator_with(gateway).await;
        let err = coordinator
            .resolve_payment(
                &PaymentProof::Verified {
                    payment_intent_id: "pi_1".to_string(),
                },
                &priced_cart(5150),
            )
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::PreconditionFailed(_));
    }

    #[tokio::test]
    async fn verified_proof_passes_for_succeeded_intent() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_retrieve_intent()
            .returning(|id| Ok(succeeded_intent(id)));

        let coordinator = coordinator_with(gateway).await;
        let (intent_id, currency, status) = coordinator
            .resolve_payment(
                &PaymentProof::Verified {
                    payment_intent_id: "pi_1".to_string(),
                },
                &priced_cart(5150),
            )
            .await
            .unwrap();

        assert_eq!(intent_id, "pi_1");
        assert_eq!(currency, "usd");
        assert_eq!(status, OrderPaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn waived_proof_rejects_nonzero_totals() {
        let coordinator = coordinator_with(MockPaymentGateway::new()).await;

        let err = coordinator
            .resolve_payment(&PaymentProof::Waived, &priced_cart(5150))
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::PreconditionFailed(_));
    }

    #[tokio::test]
    async fn waived_proof_mints_a_synthetic_intent_id() {
        let coordinator = coordinator_with(MockPaymentGateway::new()).await;

        let (intent_id, currency, status) = coordinator
            .resolve_payment(&PaymentProof::Waived, &priced_cart(0))
            .await
            .unwrap();

        assert!(intent_id.starts_with("waived-"));
        assert_eq!(currency, "usd");
        assert_eq!(status, OrderPaymentStatus::Waived);
    }

    // ==================== Helper Tests ====================

    #[test]
    fn waived_intent_ids_are_unique() {
        assert_ne!(waived_intent_id(), waived_intent_id());
    }

    #[test]
    fn membership_months_defaults_to_a_year() {
        assert_eq!(membership_months(None), 12);
        assert_eq!(membership_months(Some(&json!({}))), 12);
        assert_eq!(
            membership_months(Some(&json!({"duration_months": "six"}))),
            12
        );
    }

    #[test]
    fn membership_months_reads_metadata() {
        assert_eq!(membership_months(Some(&json!({"duration_months": 6}))), 6);
        assert_eq!(membership_months(Some(&json!({"duration_months": 24}))), 24);
    }
}
