// Cart and catalog
pub mod carts;
pub mod pricing;

// Payments and fulfillment
pub mod fulfillment;
pub mod payment_gateway;

pub use carts::CartService;
pub use fulfillment::OrderFulfillmentCoordinator;
pub use payment_gateway::{HttpPaymentGateway, PaymentGateway};
pub use pricing::PriceValidator;
