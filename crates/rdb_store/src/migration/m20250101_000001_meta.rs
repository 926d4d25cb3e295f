use sea_orm_migration::prelude::*;

use crate::db::RdbMeta;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RdbMeta::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RdbMeta::Key)
                            .string_len(255)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RdbMeta::Type).string_len(16).not_null())
                    .col(ColumnDef::new(RdbMeta::Value).text().not_null())
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RdbMeta::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}
