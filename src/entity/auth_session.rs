//! Session entity model for Sea-ORM database interaction.
//!
//! Maps the `admin_auth_session` table that correlates a client-held token
//! with an authenticated user.

use sea_orm::entity::prelude::*;

/// Sea-ORM entity model representing one login session.
///
/// # Database Schema
///
/// | Column      | Type                    | Description                         |
/// |-------------|-------------------------|-------------------------------------|
/// | id          | INTEGER (Primary Key)   | Row id                              |
/// | session_id  | TEXT (indexed)          | Opaque client token                 |
/// | user_id     | INTEGER                 | Authenticated user                  |
/// | expiration  | TIMESTAMPTZ             | Session expiration timestamp        |
///
/// A token may appear in several rows over time. Only the newest row whose
/// expiration lies in the future is honored by the store.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "admin_auth_session")]
pub struct Model {
    /// Surrogate primary key.
    #[sea_orm(primary_key)]
    pub id: i32,

    /// The opaque token held by the client.
    #[sea_orm(column_type = "Text", indexed)]
    pub session_id: String,

    /// The user this session authenticates.
    pub user_id: i32,

    /// The moment after which the session must no longer resolve.
    pub expiration: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
