pub use sea_orm_migration::prelude::*;

mod m20250210_000001_create_families_tables;
mod m20250210_000002_create_catalog_items_table;
mod m20250218_000003_create_carts_tables;
mod m20250302_000004_create_orders_tables;
mod m20250302_000005_create_enrollments_table;
mod m20250420_000006_add_checkout_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250210_000001_create_families_tables::Migration),
            Box::new(m20250210_000002_create_catalog_items_table::Migration),
            Box::new(m20250218_000003_create_carts_tables::Migration),
            Box::new(m20250302_000004_create_orders_tables::Migration),
            Box::new(m20250302_000005_create_enrollments_table::Migration),
            Box::new(m20250420_000006_add_checkout_indexes::Migration),
        ]
    }
}
