use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Family-scoped order history, newest first.
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_family_created")
                    .table(Orders::Table)
                    .col(Orders::FamilyId)
                    .col((Orders::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_carts_family_id")
                    .table(Carts::Table)
                    .col(Carts::FamilyId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_enrollments_family_id")
                    .table(Enrollments::Table)
                    .col(Enrollments::FamilyId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_enrollments_item_id")
                    .table(Enrollments::Table)
                    .col(Enrollments::ItemId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_orders_family_created")
                    .table(Orders::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_carts_family_id")
                    .table(Carts::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_enrollments_family_id")
                    .table(Enrollments::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_enrollments_item_id")
                    .table(Enrollments::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    FamilyId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Carts {
    Table,
    FamilyId,
}

#[derive(DeriveIden)]
enum Enrollments {
    Table,
    FamilyId,
    ItemId,
}
