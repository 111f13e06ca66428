use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DataGroup::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DataGroup::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DataGroup::UserId).integer().not_null())
                    .col(ColumnDef::new(DataGroup::Name).string_len(128).not_null())
                    .col(
                        ColumnDef::new(DataGroup::CanDelete)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_data_group_user")
                            .from(DataGroup::Table, DataGroup::UserId)
                            .to(AppUser::Table, AppUser::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_data_group_user_name")
                    .table(DataGroup::Table)
                    .col(DataGroup::UserId)
                    .col(DataGroup::Name)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DataGroup::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum DataGroup {
    Table,
    Id,
    UserId,
    Name,
    CanDelete,
}

#[derive(Iden)]
enum AppUser {
    Table,
    Id,
}
