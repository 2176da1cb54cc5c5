use crate::{
    entities::{cart_item, CatalogItem, ItemType},
    errors::ServiceError,
};
use futures::future::try_join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Multiplier applied to the catalog subtotal to cover card processing.
/// A 3% fee, folded into the charged total rather than itemized.
pub const PROCESSING_FEE_MULTIPLIER: Decimal = dec!(1.03);

/// Absolute difference allowed between the submitted total and the
/// recomputed one. Covers client-side rounding drift, nothing more.
pub const TOTAL_TOLERANCE: Decimal = dec!(0.01);

/// Catalog-backed price validation for checkout.
///
/// Clients display prices they fetched earlier, so the totals they submit
/// are treated as claims to verify, not amounts to charge. Every line is
/// re-priced from the catalog before a payment intent is created; the
/// charged amount is always the server-side figure.
#[derive(Clone)]
pub struct PriceValidator {
    db: Arc<DatabaseConnection>,
}

/// One cart line at its authoritative price
#[derive(Debug, Clone, Serialize)]
pub struct PricedLine {
    pub item_id: Uuid,
    pub item_type: ItemType,
    pub title: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
    pub member_ids: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
}

/// Server-side pricing for a whole cart, expressed both in decimal dollars
/// and in the integer cents a gateway charge is denominated in
#[derive(Debug, Clone, Serialize)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub processing_fee: Decimal,
    pub total: Decimal,
    pub amount_cents: i64,
}

impl PricedCart {
    pub fn is_free(&self) -> bool {
        self.amount_cents == 0
    }
}

impl PriceValidator {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Re-price a cart from the catalog.
    ///
    /// Class, sport, and event lines take their price and title from the
    /// catalog row; a missing row fails the whole pricing pass. Membership
    /// lines have no catalog row and keep their stored price times quantity.
    #[instrument(skip_all, fields(lines = items.len()))]
    pub async fn price_cart(
        &self,
        items: &[cart_item::Model],
    ) -> Result<PricedCart, ServiceError> {
        let catalog_ids: Vec<_> = items
            .iter()
            .filter(|line| line.item_type.is_catalog_priced())
            .map(|line| line.item_id)
            .collect();

        let lookups = catalog_ids
            .iter()
            .map(|id| CatalogItem::find_by_id(*id).one(&*self.db));
        let fetched = try_join_all(lookups).await?;
        let mut catalog_rows = catalog_ids.iter().zip(fetched);

        let mut lines = Vec::with_capacity(items.len());
        let mut subtotal = Decimal::ZERO;

        for line in items {
            let quantity = line.quantity.max(1);

            let (title, unit_price) = match line.item_type {
                ItemType::Membership => (line.title.clone(), line.unit_price),
                _ => {
                    let (id, row) = catalog_rows.next().ok_or_else(|| {
                        ServiceError::InternalError(
                            "catalog lookup misaligned with cart lines".to_string(),
                        )
                    })?;
                    let item = row.ok_or_else(|| {
                        ServiceError::NotFound(format!("Catalog item {} not found", id))
                    })?;

                    if !item.active {
                        return Err(ServiceError::InvalidOperation(format!(
                            "'{}' is no longer available",
                            item.title
                        )));
                    }

                    (item.title, item.price)
                }
            };

            let line_total = unit_price * Decimal::from(quantity);
            subtotal += line_total;

            lines.push(PricedLine {
                item_id: line.item_id,
                item_type: line.item_type.clone(),
                title,
                unit_price,
                quantity,
                line_total,
                member_ids: line.member_ids.clone(),
                metadata: line.metadata.clone(),
            });
        }

        let total = expected_total(subtotal);

        Ok(PricedCart {
            lines,
            subtotal,
            processing_fee: total - subtotal,
            total,
            amount_cents: total_in_cents(total)?,
        })
    }

    /// Re-price a cart and check the total the client submitted.
    ///
    /// A submitted total further than [`TOTAL_TOLERANCE`] from the recomputed
    /// one is rejected before anything else happens.
    #[instrument(skip(self, items))]
    pub async fn validate(
        &self,
        items: &[cart_item::Model],
        submitted_total: Decimal,
    ) -> Result<PricedCart, ServiceError> {
        let priced = self.price_cart(items).await?;

        if !within_tolerance(submitted_total, priced.total) {
            warn!(
                %submitted_total,
                expected_total = %priced.total,
                "submitted cart total does not match the catalog"
            );
            return Err(ServiceError::InvalidInput(format!(
                "Submitted total {} does not match the expected total {}",
                submitted_total, priced.total
            )));
        }

        Ok(priced)
    }
}

/// Subtotal with the processing fee applied, rounded to whole cents
pub fn expected_total(subtotal: Decimal) -> Decimal {
    (subtotal * PROCESSING_FEE_MULTIPLIER)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Whether a submitted total is close enough to the recomputed one
pub fn within_tolerance(submitted: Decimal, expected: Decimal) -> bool {
    (submitted - expected).abs() <= TOTAL_TOLERANCE
}

/// Dollar total as the integer cents a gateway charge is denominated in
pub fn total_in_cents(total: Decimal) -> Result<i64, ServiceError> {
    (total * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::InvalidInput(format!("Total {} is out of range", total)))
}
