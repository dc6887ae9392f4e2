//! Generated create/read/update/delete operations over registered models.
//!
//! A [`ModelAdmin`] is built once per Sea-ORM entity at application setup:
//! it fixes the field descriptor table and the optional lifecycle hooks. The
//! [`CrudController`] owns every registration behind the object-safe
//! [`AdminResource`] trait and checks the access predicate before
//! dispatching.
//!
//! # Hook ordering
//!
//! Each hook runs at most once per operation. Load hooks run right after the
//! row is read, save and delete hooks run strictly before the write. A hook
//! returning an error aborts the operation and nothing is persisted.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Alias, Expr, Func, LikeExpr, SimpleExpr};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, DbBackend, DbErr, EntityName, EntityTrait, IdenStatic, IntoActiveModel,
    Iterable, ModelTrait, PrimaryKeyToColumn, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait, Value,
};

use crate::auth::AuthState;
use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::{AdminError, FieldError};
use crate::field::{serialize_value, DateTimeFlavor, FieldDescriptor, FieldKind};

/// Transforms a row right after it is loaded.
pub type LoadHook<E> = Arc<
    dyn Fn(<E as EntityTrait>::Model) -> Result<<E as EntityTrait>::Model, AdminError>
        + Send
        + Sync,
>;
/// Builds the query predicate for a filter string.
pub type FilterHook = Arc<dyn Fn(&str) -> Condition + Send + Sync>;
/// Inspects or adjusts a row before it is inserted or updated.
pub type SaveHook<E> = Arc<
    dyn Fn(&mut <E as EntityTrait>::ActiveModel) -> Result<(), AdminError> + Send + Sync,
>;
/// Inspects a row before it is deleted.
pub type DeleteHook<E> =
    Arc<dyn Fn(&<E as EntityTrait>::Model) -> Result<(), AdminError> + Send + Sync>;
/// Decides whether a request may use the admin pages at all.
pub type AccessPredicate = Arc<dyn Fn(&AuthState) -> bool + Send + Sync>;

/// Predicate admitting everyone. The default.
pub fn permit_all() -> AccessPredicate {
    Arc::new(|_| true)
}

/// Predicate admitting only users with the admin flag.
pub fn admin_only() -> AccessPredicate {
    Arc::new(|state: &AuthState| state.is_admin())
}

/// Paging and filtering of a table listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: Option<String>,
    pub offset: u64,
    pub page_size: u64,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filter: None,
            offset: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ListQuery {
    pub fn filtered(filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..Self::default()
        }
    }

    fn active_filter(&self) -> Option<&str> {
        self.filter.as_deref().filter(|filter| !filter.is_empty())
    }
}

/// One page of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage {
    pub rows: Vec<RowView>,
    /// True when at least one more row follows this page.
    pub has_next: bool,
}

/// A loaded row, reduced to its included fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RowView {
    pub id: i64,
    pub values: Vec<(String, Value)>,
}

impl RowView {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Text rendering of a field, "" when absent or NULL.
    pub fn text(&self, field: &str) -> String {
        self.get(field).map(serialize_value).unwrap_or_default()
    }
}

/// Submitted form values keyed by field name.
pub type FormValues = HashMap<String, String>;

/// Type-erased CRUD operations of one registered model.
#[async_trait]
pub trait AdminResource: Send + Sync {
    /// Name used in routes and page titles.
    fn name(&self) -> &str;

    /// Included fields, in display order.
    fn descriptors(&self) -> &[FieldDescriptor];

    async fn list(&self, db: &DatabaseConnection, query: &ListQuery)
        -> Result<ListPage, AdminError>;

    async fn get(&self, db: &DatabaseConnection, id: i64) -> Result<RowView, AdminError>;

    async fn create(&self, db: &DatabaseConnection, form: &FormValues)
        -> Result<i64, AdminError>;

    async fn update(
        &self,
        db: &DatabaseConnection,
        id: i64,
        form: &FormValues,
    ) -> Result<(), AdminError>;

    async fn delete(&self, db: &DatabaseConnection, id: i64) -> Result<(), AdminError>;
}

/// Registration of one Sea-ORM entity with the admin.
///
/// ```ignore
/// let heroes = ModelAdmin::<hero::Entity>::for_entity()
///     .fields(["id", "name", "age"])
///     .on_save(|hero| {
///         tracing::info!(?hero, "saving hero");
///         Ok(())
///     });
/// ```
pub struct ModelAdmin<E: EntityTrait> {
    name: String,
    columns: Vec<E::Column>,
    descriptors: Vec<FieldDescriptor>,
    primary_key: Option<E::Column>,
    load_edit: Option<LoadHook<E>>,
    load_row: Option<LoadHook<E>>,
    filter: Option<FilterHook>,
    save: Option<SaveHook<E>>,
    delete: Option<DeleteHook<E>>,
}

impl<E: EntityTrait> fmt::Debug for ModelAdmin<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelAdmin")
            .field("name", &self.name)
            .field("fields", &self.descriptors)
            .finish_non_exhaustive()
    }
}

impl<E: EntityTrait> ModelAdmin<E> {
    /// Registers `E` under `name` with every column included.
    pub fn new(name: impl Into<String>) -> Self {
        let primary_key = E::PrimaryKey::iter().next().map(|pk| pk.into_column());
        let columns: Vec<E::Column> = E::Column::iter().collect();
        let descriptors = columns
            .iter()
            .map(|column| {
                let mut descriptor = FieldDescriptor::describe(*column);
                if let FieldKind::DateTime(_) = descriptor.kind {
                    descriptor.kind = match datetime_flavor::<E>(*column) {
                        Some(flavor) => FieldKind::DateTime(flavor),
                        None => {
                            tracing::warn!(
                                field = column.as_str(),
                                "datetime column is not backed by chrono, rendering as read-only text"
                            );
                            FieldKind::Other("datetime".to_string())
                        }
                    };
                }
                let is_key = primary_key.is_some_and(|pk| pk.as_str() == column.as_str());
                descriptor.read_only(is_key)
            })
            .collect();

        Self {
            name: name.into(),
            columns,
            descriptors,
            primary_key,
            load_edit: None,
            load_row: None,
            filter: None,
            save: None,
            delete: None,
        }
    }

    /// Registers `E` under its table name.
    pub fn for_entity() -> Self {
        Self::new(E::default().table_name())
    }

    /// Restricts the included fields to `names`, in that order.
    ///
    /// Names that are not columns of `E` are skipped with a warning.
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut columns = Vec::new();
        let mut descriptors = Vec::new();
        for name in names {
            let name = name.as_ref();
            let Some(index) = self.descriptors.iter().position(|d| d.name == name) else {
                tracing::warn!(model = %self.name, field = name, "unknown field in allow-list");
                continue;
            };
            columns.push(self.columns[index]);
            descriptors.push(self.descriptors[index].clone());
        }
        for field in self.required_outside(&descriptors) {
            tracing::warn!(
                model = %self.name,
                field,
                "required column left out of the allow-list, creating rows will fail"
            );
        }
        self.columns = columns;
        self.descriptors = descriptors;
        self
    }

    /// Non-null, editable columns without a default that `kept` leaves out.
    fn required_outside(&self, kept: &[FieldDescriptor]) -> Vec<&str> {
        self.columns
            .iter()
            .zip(&self.descriptors)
            .filter(|(column, descriptor)| {
                let def = column.def();
                !descriptor.read_only
                    && !def.is_null()
                    && def.get_column_default().is_none()
                    && !kept.iter().any(|d| d.name == descriptor.name)
            })
            .map(|(_, descriptor)| descriptor.name.as_str())
            .collect()
    }

    /// Overrides the derived kind of one field.
    pub fn field_kind(mut self, name: &str, kind: FieldKind) -> Self {
        match self.descriptors.iter_mut().find(|d| d.name == name) {
            Some(descriptor) => descriptor.kind = kind,
            None => tracing::warn!(model = %self.name, field = name, "cannot override unknown field"),
        }
        self
    }

    /// Declares a text column as an enumeration of `members`.
    pub fn enumeration<I, S>(self, name: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = members.into_iter().map(Into::into).collect();
        self.field_kind(name, FieldKind::Enumeration { members })
    }

    /// Hook run on the row loaded for the edit form.
    pub fn on_load_edit<F>(mut self, hook: F) -> Self
    where
        F: Fn(E::Model) -> Result<E::Model, AdminError> + Send + Sync + 'static,
    {
        self.load_edit = Some(Arc::new(hook));
        self
    }

    /// Hook run on every row loaded for a table page.
    pub fn on_load_row<F>(mut self, hook: F) -> Self
    where
        F: Fn(E::Model) -> Result<E::Model, AdminError> + Send + Sync + 'static,
    {
        self.load_row = Some(Arc::new(hook));
        self
    }

    /// Replaces the default substring filter with a custom predicate.
    pub fn filter_with<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) -> Condition + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(hook));
        self
    }

    /// Hook run before a created or updated row is written.
    pub fn on_save<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut E::ActiveModel) -> Result<(), AdminError> + Send + Sync + 'static,
    {
        self.save = Some(Arc::new(hook));
        self
    }

    /// Hook run before a row is deleted.
    pub fn on_delete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&E::Model) -> Result<(), AdminError> + Send + Sync + 'static,
    {
        self.delete = Some(Arc::new(hook));
        self
    }

    pub(crate) fn run_save_hook(&self, model: &mut E::ActiveModel) -> Result<(), AdminError> {
        match &self.save {
            Some(hook) => hook(model),
            None => Ok(()),
        }
    }

    fn primary_key(&self) -> Result<E::Column, AdminError> {
        self.primary_key.ok_or_else(|| {
            AdminError::Storage(DbErr::Custom(format!("model {} has no primary key", self.name)))
        })
    }

    /// Default predicate: the text of any included field, as the table shows
    /// it, contains `filter`. Matching ignores case; `%` and `_` match
    /// literally.
    fn filter_condition(&self, filter: &str, backend: DbBackend) -> Condition {
        if let Some(hook) = &self.filter {
            return hook(filter);
        }
        let pattern = format!("%{}%", escape_like(&filter.to_lowercase()));
        self.columns
            .iter()
            .zip(&self.descriptors)
            .fold(Condition::any(), |condition, (column, descriptor)| {
                let text = self.column_text(*column, &descriptor.kind, backend);
                condition.add(
                    Expr::expr(Func::lower(text))
                        .like(LikeExpr::new(pattern.clone()).escape('\\')),
                )
            })
    }

    /// SQL rendering of a column matching [`serialize_value`].
    ///
    /// Zoned datetimes are rendered in UTC.
    fn column_text(&self, column: E::Column, kind: &FieldKind, backend: DbBackend) -> SimpleExpr {
        let col = || Expr::col((E::default(), column));
        match kind {
            FieldKind::Boolean => Expr::case(col().eq(true), "true")
                .case(col().eq(false), "false")
                .into(),
            FieldKind::DateTime(flavor) => {
                let zoned = !matches!(flavor, DateTimeFlavor::Naive);
                let template = match (backend, zoned) {
                    (DbBackend::Sqlite, false) => "strftime('%Y-%m-%dT%H:%M:%S', ?)",
                    (DbBackend::Sqlite, true) => "strftime('%Y-%m-%dT%H:%M:%SZ', ?)",
                    (DbBackend::Postgres, false) => r#"to_char($1, 'YYYY-MM-DD"T"HH24:MI:SS')"#,
                    (DbBackend::Postgres, true) => {
                        r#"to_char($1 AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS"Z"')"#
                    }
                    (DbBackend::MySql, false) => "DATE_FORMAT(?, '%Y-%m-%dT%H:%i:%s')",
                    (DbBackend::MySql, true) => "DATE_FORMAT(?, '%Y-%m-%dT%H:%i:%sZ')",
                };
                Expr::cust_with_expr(template, col())
            }
            _ => {
                let text = match backend {
                    DbBackend::MySql => "CHAR",
                    DbBackend::Postgres | DbBackend::Sqlite => "TEXT",
                };
                col().cast_as(Alias::new(text))
            }
        }
    }

    async fn find<C>(&self, db: &C, id: i64) -> Result<Option<E::Model>, AdminError>
    where
        C: sea_orm::ConnectionTrait,
    {
        let pk = self.primary_key()?;
        Ok(E::find().filter(pk.eq(id)).one(db).await?)
    }

    fn row_view(&self, model: &E::Model) -> Result<RowView, AdminError> {
        let pk = self.primary_key()?;
        let key = model.get(pk);
        let id = value_as_i64(&key).ok_or_else(|| {
            AdminError::Storage(DbErr::Custom(format!("unsupported primary key value {key:?}")))
        })?;
        let values = self
            .columns
            .iter()
            .zip(&self.descriptors)
            .map(|(column, descriptor)| (descriptor.name.clone(), model.get(*column)))
            .collect();
        Ok(RowView { id, values })
    }

    /// Parses every submitted field into `active`, collecting all failures.
    ///
    /// Absent fields are left untouched. Read-only and unsupported fields are
    /// never written.
    fn apply_form(&self, active: &mut E::ActiveModel, form: &FormValues) -> Result<(), AdminError> {
        let mut errors = Vec::new();
        for (column, descriptor) in self.columns.iter().zip(&self.descriptors) {
            let Some(raw) = form.get(&descriptor.name) else {
                continue;
            };
            if descriptor.read_only {
                continue;
            }
            if !descriptor.kind.is_supported() {
                tracing::warn!(
                    model = %self.name,
                    field = %descriptor.name,
                    "ignoring submitted value for unsupported field"
                );
                continue;
            }
            let value = match descriptor.deserialize(raw) {
                Ok(value) => value,
                Err(message) => {
                    errors.push(FieldError::new(&descriptor.name, message));
                    continue;
                }
            };
            if let Err(err) = active.try_set(*column, value) {
                tracing::warn!(
                    model = %self.name,
                    field = %descriptor.name,
                    error = %err,
                    "value does not fit the column type"
                );
                errors.push(FieldError::new(
                    &descriptor.name,
                    format!("value does not fit a {} column", descriptor.kind.type_name()),
                ));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AdminError::Validation(errors))
        }
    }
}

#[async_trait]
impl<E> AdminResource for ModelAdmin<E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Sync,
    E::ActiveModel: ActiveModelBehavior + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptors(&self) -> &[FieldDescriptor] {
        &self.descriptors
    }

    async fn list(
        &self,
        db: &DatabaseConnection,
        query: &ListQuery,
    ) -> Result<ListPage, AdminError> {
        let page_size = query.page_size.max(1);
        let mut select = E::find();
        if let Some(filter) = query.active_filter() {
            select = select.filter(self.filter_condition(filter, db.get_database_backend()));
        }
        select = select.order_by_asc(self.primary_key()?);

        tracing::debug!(
            model = %self.name,
            offset = query.offset,
            page_size,
            filter = ?query.active_filter(),
            "loading table page"
        );
        let mut models = select
            .offset(query.offset)
            .limit(page_size + 1)
            .all(db)
            .await?;

        let has_next = models.len() as u64 > page_size;
        models.truncate(page_size as usize);

        let rows = models
            .into_iter()
            .map(|model| {
                let model = match &self.load_row {
                    Some(hook) => hook(model)?,
                    None => model,
                };
                self.row_view(&model)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ListPage { rows, has_next })
    }

    async fn get(&self, db: &DatabaseConnection, id: i64) -> Result<RowView, AdminError> {
        let Some(model) = self.find(db, id).await? else {
            tracing::info!(model = %self.name, id, "row not found");
            return Err(AdminError::NotFound);
        };
        let model = match &self.load_edit {
            Some(hook) => hook(model)?,
            None => model,
        };
        tracing::debug!(model = %self.name, id, "loaded row for edit");
        self.row_view(&model)
    }

    async fn create(&self, db: &DatabaseConnection, form: &FormValues) -> Result<i64, AdminError> {
        let mut active = <E::ActiveModel as ActiveModelBehavior>::new();
        self.apply_form(&mut active, form)?;
        self.run_save_hook(&mut active)?;

        let txn = db.begin().await?;
        let model = active.insert(&txn).await?;
        txn.commit().await?;

        let row = self.row_view(&model)?;
        tracing::info!(model = %self.name, id = row.id, "created row");
        Ok(row.id)
    }

    async fn update(
        &self,
        db: &DatabaseConnection,
        id: i64,
        form: &FormValues,
    ) -> Result<(), AdminError> {
        let txn = db.begin().await?;
        let Some(model) = self.find(&txn, id).await? else {
            return Err(AdminError::NotFound);
        };
        let mut active = model.into_active_model();
        self.apply_form(&mut active, form)?;
        self.run_save_hook(&mut active)?;

        if active.is_changed() {
            active.update(&txn).await?;
        }
        txn.commit().await?;

        tracing::info!(model = %self.name, id, "updated row");
        Ok(())
    }

    async fn delete(&self, db: &DatabaseConnection, id: i64) -> Result<(), AdminError> {
        let pk = self.primary_key()?;
        let txn = db.begin().await?;
        let Some(model) = self.find(&txn, id).await? else {
            return Err(AdminError::NotFound);
        };
        if let Some(hook) = &self.delete {
            hook(&model)?;
        }

        E::delete_many().filter(pk.eq(id)).exec(&txn).await?;
        txn.commit().await?;

        tracing::info!(model = %self.name, id, "deleted row");
        Ok(())
    }
}

/// Dispatches CRUD operations to registered models after the access check.
///
/// Registrations are fixed once the controller is built; clones share them.
#[derive(Clone)]
pub struct CrudController {
    conn: DatabaseConnection,
    resources: Arc<Vec<Arc<dyn AdminResource>>>,
    can_access: AccessPredicate,
}

impl fmt::Debug for CrudController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.resources.iter().map(|r| r.name()).collect();
        f.debug_struct("CrudController")
            .field("resources", &names)
            .finish_non_exhaustive()
    }
}

impl CrudController {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self {
            conn,
            resources: Arc::new(Vec::new()),
            can_access: permit_all(),
        }
    }

    /// Builds a controller from finished registrations.
    pub fn with_resources(
        conn: DatabaseConnection,
        resources: Vec<Arc<dyn AdminResource>>,
        can_access: AccessPredicate,
    ) -> Self {
        Self {
            conn,
            resources: Arc::new(resources),
            can_access,
        }
    }

    /// Adds a model. A later registration with the same name replaces the
    /// earlier one.
    pub fn register<R: AdminResource + 'static>(mut self, resource: R) -> Self {
        let resources = Arc::make_mut(&mut self.resources);
        resources.retain(|existing| existing.name() != resource.name());
        resources.push(Arc::new(resource));
        self
    }

    pub fn with_access<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&AuthState) -> bool + Send + Sync + 'static,
    {
        self.can_access = Arc::new(predicate);
        self
    }

    pub fn resources(&self) -> impl Iterator<Item = &dyn AdminResource> {
        self.resources.iter().map(|resource| resource.as_ref())
    }

    pub fn resource(&self, name: &str) -> Result<&dyn AdminResource, AdminError> {
        self.resources()
            .find(|resource| resource.name() == name)
            .ok_or(AdminError::NotFound)
    }

    pub fn can_access(&self, state: &AuthState) -> bool {
        (self.can_access)(state)
    }

    fn authorize(&self, state: &AuthState) -> Result<(), AdminError> {
        if self.can_access(state) {
            Ok(())
        } else {
            tracing::debug!(
                user_id = state.authenticated_user_id,
                "access predicate denied request"
            );
            Err(AdminError::Forbidden)
        }
    }

    pub async fn list(
        &self,
        state: &AuthState,
        model: &str,
        query: &ListQuery,
    ) -> Result<ListPage, AdminError> {
        self.authorize(state)?;
        self.resource(model)?.list(&self.conn, query).await
    }

    pub async fn get_for_edit(
        &self,
        state: &AuthState,
        model: &str,
        id: i64,
    ) -> Result<RowView, AdminError> {
        self.authorize(state)?;
        self.resource(model)?.get(&self.conn, id).await
    }

    pub async fn create(
        &self,
        state: &AuthState,
        model: &str,
        form: &FormValues,
    ) -> Result<i64, AdminError> {
        self.authorize(state)?;
        self.resource(model)?.create(&self.conn, form).await
    }

    pub async fn update(
        &self,
        state: &AuthState,
        model: &str,
        id: i64,
        form: &FormValues,
    ) -> Result<(), AdminError> {
        self.authorize(state)?;
        self.resource(model)?.update(&self.conn, id, form).await
    }

    pub async fn delete(&self, state: &AuthState, model: &str, id: i64) -> Result<(), AdminError> {
        self.authorize(state)?;
        self.resource(model)?.delete(&self.conn, id).await
    }
}

/// Which chrono type the active model accepts for `column`, if any.
fn datetime_flavor<E: EntityTrait>(column: E::Column) -> Option<DateTimeFlavor> {
    let epoch = DateTime::<Utc>::UNIX_EPOCH;
    [
        (DateTimeFlavor::Naive, Value::from(epoch.naive_utc())),
        (DateTimeFlavor::Utc, Value::from(epoch)),
        (DateTimeFlavor::FixedOffset, Value::from(epoch.fixed_offset())),
    ]
    .into_iter()
    .find_map(|(flavor, sample)| {
        let mut scratch = <E::ActiveModel as ActiveModelBehavior>::new();
        scratch.try_set(column, sample).ok().map(|()| flavor)
    })
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::TinyInt(Some(n)) => Some(i64::from(*n)),
        Value::SmallInt(Some(n)) => Some(i64::from(*n)),
        Value::Int(Some(n)) => Some(i64::from(*n)),
        Value::BigInt(Some(n)) => Some(*n),
        Value::TinyUnsigned(Some(n)) => Some(i64::from(*n)),
        Value::SmallUnsigned(Some(n)) => Some(i64::from(*n)),
        Value::Unsigned(Some(n)) => Some(i64::from(*n)),
        Value::BigUnsigned(Some(n)) => i64::try_from(*n).ok(),
        Value::String(Some(s)) => i64::from_str(s).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sea_orm::{ActiveValue, PaginatorTrait, Set};
    use uuid::Uuid;

    use crate::test_support::{event, hero, setup_db, stuff};

    fn form(pairs: &[(&str, &str)]) -> FormValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn stuff_admin() -> ModelAdmin<stuff::Entity> {
        ModelAdmin::new("Stuff")
            .fields(["id", "f1", "f2", "f3", "f4", "f5", "f6", "f7"])
            .enumeration("f4", ["o1", "o2", "o3"])
    }

    fn signed_in(admin: bool) -> AuthState {
        AuthState {
            current_token: Some("t".to_string()),
            authenticated_user_id: 1,
            user: Some(crate::entity::user::Model {
                id: 1,
                username: "u".to_string(),
                password_hash: String::new(),
                enabled: true,
                admin,
            }),
        }
    }

    async fn seed_heroes(db: &DatabaseConnection, names: &[(&str, &str)]) {
        for (name, secret) in names {
            hero::ActiveModel {
                name: Set(name.to_string()),
                secret_name: Set(secret.to_string()),
                ..Default::default()
            }
            .insert(db)
            .await
            .unwrap();
        }
    }

    #[test]
    fn test_registration_fields() {
        let admin = stuff_admin();
        let names: Vec<&str> = admin.descriptors().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["id", "f1", "f2", "f3", "f4", "f5", "f6", "f7"]);
        assert!(admin.descriptors()[0].read_only);
        assert!(matches!(admin.descriptors()[4].kind, FieldKind::Enumeration { .. }));
        assert!(admin.descriptors()[4].nullable);

        let all = ModelAdmin::<stuff::Entity>::for_entity();
        assert_eq!(all.name(), "stuff");
        assert_eq!(all.descriptors().len(), 9);
    }

    #[tokio::test]
    async fn test_allow_list_without_required_column() {
        let db = setup_db().await;
        let narrow = ModelAdmin::<hero::Entity>::new("Hero").fields(["id", "name", "age"]);
        let full = ModelAdmin::<hero::Entity>::new("Hero");
        assert_eq!(full.required_outside(narrow.descriptors()), ["secret_name"]);
        assert!(full.required_outside(full.descriptors()).is_empty());

        let err = narrow
            .create(&db, &form(&[("name", "Dive"), ("secret_name", "Pedro")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Storage(_)));

        let admin = ModelAdmin::<hero::Entity>::new("Hero").fields(["id", "name", "secret_name"]);
        assert!(admin
            .create(&db, &form(&[("name", "Dive"), ("secret_name", "Pedro")]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let db = setup_db().await;
        let admin = stuff_admin();
        let id_text = Uuid::new_v4().to_string();
        let submitted = form(&[
            ("f1", "hello"),
            ("f2", "42"),
            ("f3", "on"),
            ("f4", "o2"),
            ("f5", &id_text),
            ("f6", "2023-04-05T06:07:08"),
            ("f7", "1.5"),
            ("hidden", "ignored"),
        ]);
        let id = admin.create(&db, &submitted).await.unwrap();
        let row = admin.get(&db, id).await.unwrap();

        for field in admin.descriptors().iter().filter(|f| !f.read_only) {
            let expected = field.deserialize(&submitted[&field.name]).unwrap();
            assert_eq!(row.get(&field.name), Some(&expected), "field {}", field.name);
        }
        assert_eq!(row.text("id"), id.to_string());

        let stored = stuff::Entity::find_by_id(id as i32).one(&db).await.unwrap().unwrap();
        assert_eq!(stored.hidden, None);
    }

    #[tokio::test]
    async fn test_load_edit_hook_transforms_row() {
        let db = setup_db().await;
        let admin = ModelAdmin::<hero::Entity>::new("Hero").on_load_edit(|mut hero| {
            hero.secret_name = hero.secret_name.to_uppercase();
            Ok(hero)
        });
        let id = admin
            .create(&db, &form(&[("name", "Dive"), ("secret_name", "Pedro")]))
            .await
            .unwrap();
        assert_eq!(admin.get(&db, id).await.unwrap().text("secret_name"), "PEDRO");
    }

    #[tokio::test]
    async fn test_invalid_enumeration_writes_nothing() {
        let db = setup_db().await;
        let admin = stuff_admin();
        let err = admin
            .create(&db, &form(&[("f1", "x"), ("f2", "1"), ("f3", ""), ("f4", "o9")]))
            .await
            .unwrap_err();
        match err {
            AdminError::Validation(errors) => {
                assert_eq!(errors, vec![FieldError::new("f4", "unknown member 'o9'")])
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(stuff::Entity::find().count(&db).await.unwrap(), 0);

        let id = admin
            .create(&db, &form(&[("f1", "x"), ("f2", "1"), ("f3", ""), ("f4", "o1")]))
            .await
            .unwrap();
        let err = admin
            .update(&db, id, &form(&[("f1", "changed"), ("f4", "o9")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Validation(_)));
        let row = admin.get(&db, id).await.unwrap();
        assert_eq!(row.text("f1"), "x");
        assert_eq!(row.text("f4"), "o1");
    }

    #[tokio::test]
    async fn test_validation_reports_every_field() {
        let db = setup_db().await;
        let err = stuff_admin()
            .create(&db, &form(&[("f2", "many"), ("f5", "nope"), ("f6", "soon")]))
            .await
            .unwrap_err();
        match err {
            AdminError::Validation(errors) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, ["f2", "f5", "f6"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update() {
        let db = setup_db().await;
        let admin = ModelAdmin::<hero::Entity>::new("Hero");
        let id = admin
            .create(&db, &form(&[("name", "Dive"), ("secret_name", "Pedro"), ("age", "")]))
            .await
            .unwrap();
        admin
            .update(&db, id, &form(&[("age", "32"), ("id", "999")]))
            .await
            .unwrap();

        let row = admin.get(&db, id).await.unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.get("age"), Some(&Value::Int(Some(32))));
        assert_eq!(row.text("name"), "Dive");

        assert!(matches!(
            admin.update(&db, id + 100, &form(&[("age", "1")])).await,
            Err(AdminError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_save_hook_runs_before_write_and_can_abort() {
        let db = setup_db().await;
        let admin = ModelAdmin::<hero::Entity>::new("Hero").on_save(|model: &mut hero::ActiveModel| {
            let trimmed = match &model.name {
                ActiveValue::Set(name) if name.trim().is_empty() => {
                    return Err(AdminError::hook("name required"))
                }
                ActiveValue::Set(name) => name.trim().to_string(),
                _ => return Ok(()),
            };
            model.name = Set(trimmed);
            Ok(())
        });

        let id = admin
            .create(&db, &form(&[("name", "  Rusty  "), ("secret_name", "Tommy")]))
            .await
            .unwrap();
        assert_eq!(admin.get(&db, id).await.unwrap().text("name"), "Rusty");

        let err = admin
            .create(&db, &form(&[("name", ""), ("secret_name", "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Hook(_)));
        assert_eq!(hero::Entity::find().count(&db).await.unwrap(), 1);

        let err = admin.update(&db, id, &form(&[("name", "")])).await.unwrap_err();
        assert!(matches!(err, AdminError::Hook(_)));
        assert_eq!(admin.get(&db, id).await.unwrap().text("name"), "Rusty");
    }

    #[tokio::test]
    async fn test_delete_missing_row_skips_hook() {
        let db = setup_db().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let admin = ModelAdmin::<hero::Entity>::new("Hero").on_delete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(matches!(admin.delete(&db, 12).await, Err(AdminError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        seed_heroes(&db, &[("Dive", "Pedro")]).await;
        let id = admin.list(&db, &ListQuery::default()).await.unwrap().rows[0].id;
        admin.delete(&db, id).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(admin.get(&db, id).await, Err(AdminError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_hook_error_keeps_row() {
        let db = setup_db().await;
        seed_heroes(&db, &[("Dive", "Pedro")]).await;
        let admin = ModelAdmin::<hero::Entity>::new("Hero")
            .on_delete(|_| Err(AdminError::hook("heroes are forever")));
        let id = admin.list(&db, &ListQuery::default()).await.unwrap().rows[0].id;

        assert!(matches!(admin.delete(&db, id).await, Err(AdminError::Hook(_))));
        assert!(admin.get(&db, id).await.is_ok());
    }

    #[tokio::test]
    async fn test_default_filter_is_case_insensitive_substring() {
        let db = setup_db().await;
        seed_heroes(
            &db,
            &[
                ("Deadpond", "Dive Wilson"),
                ("Spider-Boy", "Pedro Parqueador"),
                ("Rusty-Man", "Tommy Sharp"),
                ("100%", "literal"),
            ],
        )
        .await;
        let admin = ModelAdmin::<hero::Entity>::new("Hero").fields(["id", "name"]);

        let page = admin.list(&db, &ListQuery::filtered("DEAD")).await.unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].text("name"), "Deadpond");

        // secret_name is not an included field
        let page = admin.list(&db, &ListQuery::filtered("pedro")).await.unwrap();
        assert!(page.rows.is_empty());

        let page = admin.list(&db, &ListQuery::filtered("-")).await.unwrap();
        let names: Vec<String> = page.rows.iter().map(|r| r.text("name")).collect();
        assert_eq!(names, ["Spider-Boy", "Rusty-Man"]);

        let page = admin.list(&db, &ListQuery::filtered("%")).await.unwrap();
        assert_eq!(page.rows.len(), 1);

        let page = admin.list(&db, &ListQuery::filtered("")).await.unwrap();
        assert_eq!(page.rows.len(), 4);
    }

    #[tokio::test]
    async fn test_default_filter_matches_displayed_text() {
        let db = setup_db().await;
        let admin = stuff_admin();
        admin
            .create(
                &db,
                &form(&[("f1", "alpha"), ("f2", "1"), ("f3", "true"), ("f6", "2023-04-05T06:07:08")]),
            )
            .await
            .unwrap();
        admin
            .create(&db, &form(&[("f1", "beta"), ("f2", "2"), ("f3", "")]))
            .await
            .unwrap();

        let page = admin.list(&db, &ListQuery::filtered("true")).await.unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].text("f3"), "true");

        let page = admin.list(&db, &ListQuery::filtered("false")).await.unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].text("f1"), "beta");

        let page = admin.list(&db, &ListQuery::filtered("T06:07")).await.unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].text("f6"), "2023-04-05T06:07:08");

        let events = ModelAdmin::<event::Entity>::new("Event");
        events
            .create(&db, &form(&[("at", "2023-04-05T06:07:08+02:00")]))
            .await
            .unwrap();
        let page = events.list(&db, &ListQuery::filtered("04:07:08Z")).await.unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].text("at"), "2023-04-05T04:07:08Z");
    }

    #[tokio::test]
    async fn test_row_hook_error_aborts_list() {
        let db = setup_db().await;
        seed_heroes(&db, &[("Deadpond", "Dive"), ("Rusty-Man", "Tommy")]).await;
        let admin = ModelAdmin::<hero::Entity>::new("Hero").on_load_row(|hero| {
            if hero.name == "Rusty-Man" {
                Err(AdminError::hook("cannot show Rusty-Man"))
            } else {
                Ok(hero)
            }
        });

        let result = admin.list(&db, &ListQuery::default()).await;
        assert!(matches!(result, Err(AdminError::Hook(_))));
    }

    #[tokio::test]
    async fn test_utc_datetime_column() {
        let db = setup_db().await;
        let admin = ModelAdmin::<event::Entity>::new("Event");
        assert_eq!(
            admin.descriptors()[1].kind,
            FieldKind::DateTime(DateTimeFlavor::Utc)
        );
        // time-crate columns cannot be parsed into, so they stay read-only
        assert!(!admin.descriptors()[2].kind.is_supported());

        let id = admin
            .create(&db, &form(&[("at", "2023-04-05T06:07:08Z"), ("logged", "whenever")]))
            .await
            .unwrap();
        let stored = event::Entity::find_by_id(id as i32).one(&db).await.unwrap().unwrap();
        assert_eq!(stored.at.to_rfc3339(), "2023-04-05T06:07:08+00:00");
        assert_eq!(stored.logged, None);
        assert_eq!(admin.get(&db, id).await.unwrap().text("at"), "2023-04-05T06:07:08Z");
    }

    #[tokio::test]
    async fn test_mismatched_kind_is_a_validation_error() {
        let db = setup_db().await;
        let admin = ModelAdmin::<event::Entity>::new("Event")
            .field_kind("at", FieldKind::DateTime(DateTimeFlavor::FixedOffset));

        let err = admin
            .create(&db, &form(&[("at", "2023-04-05T06:07:08Z")]))
            .await
            .unwrap_err();
        match err {
            AdminError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "at");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(event::Entity::find().count(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_random_and_now_sentinels() {
        let db = setup_db().await;
        let admin = stuff_admin();
        let id = admin
            .create(
                &db,
                &form(&[("f1", "x"), ("f2", "1"), ("f3", ""), ("f5", "random"), ("f6", "now")]),
            )
            .await
            .unwrap();
        let created = stuff::Entity::find_by_id(id as i32).one(&db).await.unwrap().unwrap();
        let first_uuid = created.f5.expect("uuid generated");
        let stamped = created.f6.expect("timestamp set");
        let drift = chrono::Utc::now().naive_utc() - stamped;
        assert!(drift.num_seconds().abs() < 60, "drift {drift}");

        admin.update(&db, id, &form(&[("f5", "random")])).await.unwrap();
        let updated = stuff::Entity::find_by_id(id as i32).one(&db).await.unwrap().unwrap();
        assert_ne!(updated.f5, Some(first_uuid));
        assert!(updated.f5.is_some());
    }

    #[tokio::test]
    async fn test_custom_filter_and_row_hook() {
        let db = setup_db().await;
        seed_heroes(&db, &[("Deadpond", "Dive"), ("Rusty-Man", "Tommy")]).await;
        let admin = ModelAdmin::<hero::Entity>::new("Hero")
            .filter_with(|value| Condition::all().add(hero::Column::SecretName.eq(value)))
            .on_load_row(|mut hero| {
                hero.secret_name = "***".to_string();
                Ok(hero)
            });

        let page = admin.list(&db, &ListQuery::filtered("Tommy")).await.unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].text("name"), "Rusty-Man");
        assert_eq!(page.rows[0].text("secret_name"), "***");
    }

    #[tokio::test]
    async fn test_pagination() {
        let db = setup_db().await;
        let heroes: Vec<(String, String)> =
            (0..5).map(|i| (format!("hero{i}"), "s".to_string())).collect();
        let refs: Vec<(&str, &str)> = heroes.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        seed_heroes(&db, &refs).await;
        let admin = ModelAdmin::<hero::Entity>::new("Hero");

        let query = ListQuery { filter: None, offset: 0, page_size: 2 };
        let first = admin.list(&db, &query).await.unwrap();
        assert!(first.has_next);
        assert_eq!(first.rows[0].text("name"), "hero0");

        let query = ListQuery { filter: None, offset: 4, page_size: 2 };
        let last = admin.list(&db, &query).await.unwrap();
        assert!(!last.has_next);
        assert_eq!(last.rows.len(), 1);
        assert_eq!(last.rows[0].text("name"), "hero4");
    }

    #[tokio::test]
    async fn test_controller_denial_has_no_side_effects() {
        let db = setup_db().await;
        seed_heroes(&db, &[("Dive", "Pedro")]).await;
        let crud = CrudController::new(db.clone())
            .register(ModelAdmin::<hero::Entity>::new("Hero"))
            .with_access(|state| state.is_admin());

        let user = signed_in(false);
        let query = ListQuery::default();
        assert!(matches!(crud.list(&user, "Hero", &query).await, Err(AdminError::Forbidden)));
        assert!(matches!(crud.get_for_edit(&user, "Hero", 1).await, Err(AdminError::Forbidden)));
        assert!(matches!(
            crud.create(&user, "Hero", &form(&[("name", "x"), ("secret_name", "y")])).await,
            Err(AdminError::Forbidden)
        ));
        assert!(matches!(
            crud.update(&user, "Hero", 1, &form(&[("name", "z")])).await,
            Err(AdminError::Forbidden)
        ));
        assert!(matches!(crud.delete(&user, "Hero", 1).await, Err(AdminError::Forbidden)));
        // unknown models are hidden behind the same answer
        assert!(matches!(crud.list(&user, "Nope", &query).await, Err(AdminError::Forbidden)));

        let heroes = hero::Entity::find().all(&db).await.unwrap();
        assert_eq!(heroes.len(), 1);
        assert_eq!(heroes[0].name, "Dive");

        let admin = signed_in(true);
        assert_eq!(crud.list(&admin, "Hero", &query).await.unwrap().rows.len(), 1);
        assert!(matches!(crud.list(&admin, "Nope", &query).await, Err(AdminError::NotFound)));
    }

    #[tokio::test]
    async fn test_default_access_permits_all() {
        let db = setup_db().await;
        let crud = CrudController::new(db).register(stuff_admin());
        let id = crud
            .create(
                &AuthState::anonymous(),
                "Stuff",
                &form(&[("f1", "a"), ("f2", "7"), ("f3", "true")]),
            )
            .await
            .unwrap();
        let row = crud.get_for_edit(&AuthState::anonymous(), "Stuff", id).await.unwrap();
        assert_eq!(row.get("f3"), Some(&Value::Bool(Some(true))));
        assert_eq!(crud.resources().count(), 1);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like(r"50%_a\b"), r"50\%\_a\\b");
    }
}
