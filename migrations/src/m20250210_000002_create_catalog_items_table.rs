use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One table for classes, sports and events; item_type discriminates.
        manager
            .create_table(
                Table::create()
                    .table(CatalogItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CatalogItems::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CatalogItems::ItemType).string().not_null())
                    .col(ColumnDef::new(CatalogItems::Title).string().not_null())
                    .col(ColumnDef::new(CatalogItems::Description).text().null())
                    .col(ColumnDef::new(CatalogItems::Price).decimal().not_null())
                    .col(
                        ColumnDef::new(CatalogItems::Capacity)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CatalogItems::Enrolled)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CatalogItems::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(CatalogItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CatalogItems::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_catalog_items_type_active")
                    .table(CatalogItems::Table)
                    .col(CatalogItems::ItemType)
                    .col(CatalogItems::Active)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CatalogItems::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum CatalogItems {
    Table,
    Id,
    ItemType,
    Title,
    Description,
    Price,
    Capacity,
    Enrolled,
    Active,
    CreatedAt,
    UpdatedAt,
}
