/// Persistence entities
pub mod cart;
pub mod cart_item;
pub mod catalog_item;
pub mod enrollment;
pub mod family;
pub mod family_member;
pub mod order;
pub mod order_item;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel, CartStatus};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use catalog_item::{Entity as CatalogItem, ItemType, Model as CatalogItemModel};
pub use enrollment::{Entity as Enrollment, EnrollmentStatus, Model as EnrollmentModel};
pub use family::{Entity as Family, MembershipStatus, Model as FamilyModel};
pub use family_member::{Entity as FamilyMember, Model as FamilyMemberModel};
pub use order::{Entity as Order, Model as OrderModel, OrderPaymentStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
