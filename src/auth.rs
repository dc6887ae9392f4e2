//! Login state, the trusted login entry point and the built-in password
//! login flow.
//!
//! Every request derives an [`AuthState`] once from the client-held token and
//! passes it explicitly to whatever it protects. A state is either anonymous
//! (`authenticated_user_id == -1`) or authenticated with a non-negative user
//! id.

use std::sync::OnceLock;

use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, Set, TransactionTrait,
};
use time::Duration;
use tokio::sync::Mutex;

use crate::config::AdminConfig;
use crate::crud::ModelAdmin;
use crate::entity::user::{self, Entity as UserEntity};
use crate::error::{AdminError, LoginError};
use crate::session_store::AuthSessionStore;

/// User id of an unauthenticated state. Never persisted.
pub const ANONYMOUS_USER_ID: i32 = -1;

/// Serializes the "no users yet" check with the creation of the first admin.
static BOOTSTRAP_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Per-request login state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    /// Token held by the client, if it presented one.
    pub current_token: Option<String>,
    /// The authenticated user, or [`ANONYMOUS_USER_ID`].
    pub authenticated_user_id: i32,
    /// The user row, when it still exists.
    pub user: Option<user::Model>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl AuthState {
    pub fn anonymous() -> Self {
        Self {
            current_token: None,
            authenticated_user_id: ANONYMOUS_USER_ID,
            user: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated_user_id > ANONYMOUS_USER_ID
    }

    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|user| user.admin)
    }
}

/// Wraps `protected` so that it only runs for authenticated states.
///
/// Anonymous states are handed to `fallback` instead, which typically
/// renders a login form. The wrapped operation receives the state it was
/// called with, so it can read `authenticated_user_id` or log out.
///
/// ```
/// use seaorm_admin::auth::{login_required, AuthState};
///
/// let page = login_required(
///     |state: AuthState, _: ()| format!("hello user {}", state.authenticated_user_id),
///     |_, _| "please log in".to_string(),
/// );
/// assert_eq!(page(AuthState::anonymous(), ()), "please log in");
/// ```
pub fn login_required<I, O, P, F>(protected: P, fallback: F) -> impl Fn(AuthState, I) -> O
where
    P: Fn(AuthState, I) -> O,
    F: Fn(AuthState, I) -> O,
{
    move |state, input| {
        if state.is_authenticated() {
            protected(state, input)
        } else {
            fallback(state, input)
        }
    }
}

/// Issues and revokes logins on top of an [`AuthSessionStore`].
#[derive(Debug, Clone)]
pub struct AuthController {
    conn: DatabaseConnection,
    store: AuthSessionStore,
    session_ttl: Duration,
    password_cost: u32,
}

impl AuthController {
    pub fn new(conn: DatabaseConnection, config: &AdminConfig) -> Self {
        Self {
            store: AuthSessionStore::new(conn.clone()),
            conn,
            session_ttl: config.session_ttl(),
            password_cost: config.password_cost(),
        }
    }

    pub fn store(&self) -> &AuthSessionStore {
        &self.store
    }

    /// Derives the login state for a client presenting `token`.
    ///
    /// Unknown, invalidated and expired tokens yield an anonymous state that
    /// still carries the token, so a later logout can clean it up.
    pub async fn resolve_state(&self, token: Option<String>) -> Result<AuthState, AdminError> {
        let Some(token) = token.filter(|token| !token.is_empty()) else {
            return Ok(AuthState::anonymous());
        };

        let resolved = self.store.resolve(&token).await?;
        let mut state = AuthState {
            current_token: Some(token),
            ..AuthState::anonymous()
        };
        if let Some(user_id) = resolved.filter(|user_id| *user_id >= 0) {
            state.authenticated_user_id = user_id;
            state.user = UserEntity::find_by_id(user_id).one(&self.conn).await?;
        }
        Ok(state)
    }

    /// True while no user exists, i.e. the next password login creates the
    /// first admin.
    pub async fn needs_bootstrap(&self) -> Result<bool, AdminError> {
        Ok(UserEntity::find().count(&self.conn).await? == 0)
    }

    /// Associates a fresh session with `user_id`.
    ///
    /// This is the trusted entry point: callers must have authenticated the
    /// principal by their own means first. Negative ids are ignored without
    /// touching the state. Any session the client already held is revoked.
    pub async fn login(&self, state: &mut AuthState, user_id: i32) -> Result<(), AdminError> {
        if user_id < 0 {
            tracing::debug!(user_id, "ignoring login for negative user id");
            return Ok(());
        }
        if let Some(previous) = state.current_token.take() {
            self.store.invalidate(&previous).await?;
        }

        let token = self.store.create_session(user_id, self.session_ttl).await?;
        state.user = UserEntity::find_by_id(user_id).one(&self.conn).await?;
        state.current_token = Some(token);
        state.authenticated_user_id = user_id;

        tracing::info!(user_id, "user logged in");
        Ok(())
    }

    /// Revokes the state's session and makes it anonymous.
    pub async fn logout(&self, state: &mut AuthState) -> Result<(), AdminError> {
        if let Some(token) = state.current_token.take() {
            self.store.invalidate(&token).await?;
        }
        if state.is_authenticated() {
            tracing::info!(user_id = state.authenticated_user_id, "user logged out");
        }
        *state = AuthState::anonymous();
        Ok(())
    }

    /// The built-in username/password login flow.
    ///
    /// While no user exists at all, the submitted credentials are stored as
    /// a new enabled admin and logged in. Afterwards the password is checked
    /// against the named user; a correct password on a disabled account
    /// yields [`LoginError::Disabled`].
    pub async fn password_login(
        &self,
        state: &mut AuthState,
        username: &str,
        password: &str,
    ) -> Result<(), LoginError> {
        if username.is_empty() {
            return Err(LoginError::InvalidCredentials);
        }

        let existing = UserEntity::find()
            .filter(user::Column::Username.eq(username))
            .one(&self.conn)
            .await?;
        let user = match existing {
            Some(user) => user,
            None if self.needs_bootstrap().await? => self
                .create_first_admin(username, password)
                .await?
                .ok_or(LoginError::InvalidCredentials)?,
            None => {
                tracing::info!(username, "rejected login for unknown user");
                return Err(LoginError::InvalidCredentials);
            }
        };

        if !user.verify(password) {
            tracing::info!(username, "rejected login");
            return Err(LoginError::InvalidCredentials);
        }
        if !user.enabled {
            return Err(LoginError::Disabled);
        }

        self.login(state, user.id).await?;
        Ok(())
    }

    /// Creates the bootstrap admin if, and only if, no user exists yet.
    ///
    /// The count is repeated inside the inserting transaction while holding
    /// the process-wide bootstrap lock.
    async fn create_first_admin(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<user::Model>, LoginError> {
        let _guard = BOOTSTRAP_LOCK.get_or_init(|| Mutex::new(())).lock().await;

        let txn = self.conn.begin().await?;
        if UserEntity::find().count(&txn).await? > 0 {
            return Ok(None);
        }

        let user = user::ActiveModel {
            username: Set(username.to_string()),
            password_hash: Set(user::hash_password(password, self.password_cost)?),
            enabled: Set(true),
            admin: Set(true),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        tracing::warn!(username, "created first admin user");
        Ok(Some(user))
    }

    /// Registration for editing users through the admin pages.
    ///
    /// Saving hashes any password column that is not already a bcrypt hash.
    pub fn user_admin(&self) -> ModelAdmin<UserEntity> {
        let cost = self.password_cost;
        ModelAdmin::new("User").on_save(move |user: &mut user::ActiveModel| {
            if let ActiveValue::Set(raw) = &user.password_hash {
                let hashed = user::hash_password(raw, cost)?;
                user.password_hash = Set(hashed);
            }
            Ok(())
        })
    }
}
