//! Database entity models for seaorm-admin.
//!
//! These Sea-ORM entities back the login subsystem: the `user` table holds
//! principals and their bcrypt password hashes, and the `auth_session` table
//! maps opaque client tokens to those principals.

/// Principal entity with credential and admin flag.
pub mod user;

/// Token-to-user session entity.
///
/// Rows are written on login, removed on logout and ignored once their
/// expiration has passed.
pub mod auth_session;
