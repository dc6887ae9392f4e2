//! Admin configuration.

use time::Duration;

/// Default route prefix of the admin pages.
pub const DEFAULT_PREFIX: &str = "/crud";
/// Rows per table page unless the request asks for another size.
pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// Tunables of the login and CRUD subsystems.
///
/// ```
/// use seaorm_admin::AdminConfig;
///
/// let config = AdminConfig::default()
///     .with_prefix("/admin")
///     .with_page_size(25)
///     .with_session_ttl(time::Duration::hours(12));
/// assert_eq!(config.prefix(), "/admin");
/// ```
#[derive(Debug, Clone)]
pub struct AdminConfig {
    prefix: String,
    page_size: u64,
    session_ttl: Duration,
    password_cost: u32,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            session_ttl: Duration::days(7),
            password_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl AdminConfig {
    /// Sets the route prefix. A trailing slash is dropped and a leading one
    /// added, so `"admin/"` becomes `"/admin"`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_matches('/');
        self.prefix = format!("/{trimmed}");
        self
    }

    /// Sets the default number of rows per table page (at least 1).
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sets how long a login stays valid.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Sets the bcrypt cost used when hashing passwords.
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn password_cost(&self) -> u32 {
        self.password_cost
    }
}
