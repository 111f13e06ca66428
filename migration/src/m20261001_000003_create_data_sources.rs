use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DataSource::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DataSource::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DataSource::UserId).integer().not_null())
                    .col(ColumnDef::new(DataSource::DatagroupId).integer().not_null())
                    .col(ColumnDef::new(DataSource::Name).string_len(128).not_null())
                    .col(
                        ColumnDef::new(DataSource::DsType)
                            .string_len(16)
                            .not_null()
                            .check(Expr::col(DataSource::DsType).is_in(["LFS", "S3"])),
                    )
                    .col(ColumnDef::new(DataSource::Pattern).string().null())
                    .col(ColumnDef::new(DataSource::Prefix).string().null())
                    // ciphertext, base64(nonce || ct)
                    .col(ColumnDef::new(DataSource::KeyName).text().null())
                    .col(ColumnDef::new(DataSource::KeySecret).text().null())
                    .col(ColumnDef::new(DataSource::Bgcolor).string_len(10).null())
                    .col(ColumnDef::new(DataSource::Fgcolor).string_len(10).null())
                    .col(
                        ColumnDef::new(DataSource::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DataSource::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_data_source_user")
                            .from(DataSource::Table, DataSource::UserId)
                            .to(AppUser::Table, AppUser::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    // no cascade: group deletion removes its sources explicitly
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_data_source_group")
                            .from(DataSource::Table, DataSource::DatagroupId)
                            .to(DataGroup::Table, DataGroup::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_data_source_group_name")
                    .table(DataSource::Table)
                    .col(DataSource::DatagroupId)
                    .col(DataSource::Name)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DataSource::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum DataSource {
    Table,
    Id,
    UserId,
    DatagroupId,
    Name,
    DsType,
    Pattern,
    Prefix,
    KeyName,
    KeySecret,
    Bgcolor,
    Fgcolor,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum DataGroup {
    Table,
    Id,
}

#[derive(Iden)]
enum AppUser {
    Table,
    Id,
}
