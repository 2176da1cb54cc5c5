use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Families::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Families::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Families::Name).string().not_null())
                    .col(
                        ColumnDef::new(Families::MembershipStatus)
                            .string()
                            .not_null()
                            .default("none"),
                    )
                    .col(
                        ColumnDef::new(Families::MembershipExpiry)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Families::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Families::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FamilyMembers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FamilyMembers::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FamilyMembers::FamilyId).uuid().not_null())
                    .col(ColumnDef::new(FamilyMembers::UserId).string().null())
                    .col(ColumnDef::new(FamilyMembers::FirstName).string().not_null())
                    .col(ColumnDef::new(FamilyMembers::LastName).string().not_null())
                    .col(
                        ColumnDef::new(FamilyMembers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FamilyMembers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_family_members_family_id")
                            .from(FamilyMembers::Table, FamilyMembers::FamilyId)
                            .to(Families::Table, Families::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Auth uids map to at most one member row.
        manager
            .create_index(
                Index::create()
                    .name("idx_family_members_user_id")
                    .table(FamilyMembers::Table)
                    .col(FamilyMembers::UserId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FamilyMembers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Families::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Families {
    Table,
    Id,
    Name,
    MembershipStatus,
    MembershipExpiry,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum FamilyMembers {
    Table,
    Id,
    FamilyId,
    UserId,
    FirstName,
    LastName,
    CreatedAt,
    UpdatedAt,
}
