//! User entity model for Sea-ORM database interaction.

use sea_orm::entity::prelude::*;

/// Sea-ORM entity model representing a principal that may log in.
///
/// # Database Schema
///
/// | Column        | Type                  | Description                        |
/// |---------------|-----------------------|------------------------------------|
/// | id            | INTEGER (Primary Key) | User id, never negative            |
/// | username      | TEXT (unique)         | Login name                         |
/// | password_hash | TEXT                  | bcrypt hash of the password        |
/// | enabled       | BOOLEAN               | Disabled accounts cannot log in    |
/// | admin         | BOOLEAN               | Administrative privilege           |
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "admin_user")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub username: String,

    /// Always a bcrypt hash once persisted through this crate.
    pub password_hash: String,

    pub enabled: bool,

    pub admin: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Checks `secret` against the stored hash.
    ///
    /// A stored value that is not a valid bcrypt hash never verifies.
    pub fn verify(&self, secret: &str) -> bool {
        bcrypt::verify(secret, &self.password_hash).unwrap_or(false)
    }
}

/// Returns true when `value` already looks like a bcrypt hash.
pub fn is_password_hash(value: &str) -> bool {
    value.len() == 60
        && ["$2a$", "$2b$", "$2x$", "$2y$"]
            .iter()
            .any(|prefix| value.starts_with(prefix))
}

/// Hashes `value` unless it is already a bcrypt hash.
///
/// Saving a user row through the admin pages passes the password column
/// through here, so an unchanged hash is not hashed a second time.
pub fn hash_password(value: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    if is_password_hash(value) {
        return Ok(value.to_string());
    }
    bcrypt::hash(value, cost)
}
