use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Enrollments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Enrollments::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Enrollments::FamilyId).uuid().not_null())
                    .col(ColumnDef::new(Enrollments::ItemId).uuid().not_null())
                    .col(ColumnDef::new(Enrollments::ItemType).string().not_null())
                    .col(ColumnDef::new(Enrollments::OrderId).uuid().not_null())
                    .col(ColumnDef::new(Enrollments::MemberIds).json().not_null())
                    .col(
                        ColumnDef::new(Enrollments::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Enrollments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Enrollments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_enrollments_order_id")
                            .from(Enrollments::Table, Enrollments::OrderId)
                            .to(
                                super::m20250302_000004_create_orders_tables::Orders::Table,
                                super::m20250302_000004_create_orders_tables::Orders::Id,
                            )
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Enrollments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Enrollments {
    Table,
    Id,
    FamilyId,
    ItemId,
    ItemType,
    OrderId,
    MemberIds,
    Status,
    CreatedAt,
    UpdatedAt,
}
