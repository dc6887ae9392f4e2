use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AdminUser::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AdminUser::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AdminUser::Username)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(AdminUser::PasswordHash).string().not_null())
                    .col(
                        ColumnDef::new(AdminUser::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(AdminUser::Admin)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AdminAuthSession::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AdminAuthSession::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AdminAuthSession::SessionId).text().not_null())
                    .col(ColumnDef::new(AdminAuthSession::UserId).integer().not_null())
                    .col(
                        ColumnDef::new(AdminAuthSession::Expiration)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_admin_auth_session_session_id")
                    .table(AdminAuthSession::Table)
                    .col(AdminAuthSession::SessionId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_admin_auth_session_expiration")
                    .table(AdminAuthSession::Table)
                    .col(AdminAuthSession::Expiration)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AdminAuthSession::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AdminUser::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AdminUser {
    Table,
    Id,
    Username,
    PasswordHash,
    Enabled,
    Admin,
}

#[derive(DeriveIden)]
enum AdminAuthSession {
    Table,
    Id,
    SessionId,
    UserId,
    Expiration,
}
