pub mod carts;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod payment_webhooks;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::{CartService, OrderFulfillmentCoordinator, PaymentGateway, PriceValidator};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;

// Handler modules import this as crate::handlers::AppState.
pub use crate::AppState;

/// The service objects handlers call into, shared via [`AppState`].
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub pricing: Arc<PriceValidator>,
    pub fulfillment: Arc<OrderFulfillmentCoordinator>,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl AppServices {
    /// Wires every service against one connection pool and event bus.
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let cart = Arc::new(CartService::new(db.clone(), event_sender.clone()));
        let pricing = Arc::new(PriceValidator::new(db.clone()));
        let fulfillment = Arc::new(OrderFulfillmentCoordinator::new(
            db,
            event_sender,
            gateway.clone(),
            pricing.as_ref().clone(),
            Duration::from_secs(config.fulfillment_timeout_secs),
            config.default_currency.clone(),
        ));

        Self {
            cart,
            pricing,
            fulfillment,
            gateway,
        }
    }
}
