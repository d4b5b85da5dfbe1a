//! Migration logic for generating the default accounts table. Only
//! applied when the gateway manages its own sqlite store; operators
//! pointing the SQL bindings at an existing schema disable migrations.
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Accounts::AccountId)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Accounts::Account)
                            .string_len(60)
                            .unique_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Accounts::Password).string_len(32).null())
                    .col(
                        ColumnDef::new(Accounts::AuthOk)
                            .boolean()
                            .default(true)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Accounts::Age).integer().default(19).not_null())
                    .col(
                        ColumnDef::new(Accounts::LastLoginServerIdx)
                            .integer()
                            .default(1)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Accounts::EventCode)
                            .integer()
                            .default(0)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Accounts::Pcbang).integer().default(0).not_null())
                    .col(
                        ColumnDef::new(Accounts::ServerIdxOffset)
                            .integer()
                            .default(0)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Accounts::Block)
                            .boolean()
                            .default(false)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Accounts::SecurityNo).string_len(32).null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Accounts {
    Table,
    AccountId,
    Account,
    Password,
    AuthOk,
    Age,
    LastLoginServerIdx,
    EventCode,
    Pcbang,
    ServerIdxOffset,
    Block,
    SecurityNo,
}
