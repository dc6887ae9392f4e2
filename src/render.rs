//! Page components: login form, model index, data table and edit form.
//!
//! Every page goes through a [`Renderer`]. The built-in [`TeraRenderer`]
//! compiles its templates once and escapes every interpolated value; hosts
//! replace single components by overriding templates or by supplying their
//! own `Renderer`.

use serde::Serialize;
use tera::{Context, Tera};

use crate::crud::RowView;
use crate::error::AdminError;
use crate::field::{FieldDescriptor, Widget};

const TEMPLATES: [(&str, &str); 6] = [
    ("base.html", include_str!("templates/base.html")),
    ("login.html", include_str!("templates/login.html")),
    ("index.html", include_str!("templates/index.html")),
    ("table.html", include_str!("templates/table.html")),
    ("form.html", include_str!("templates/form.html")),
    ("field.html", include_str!("templates/field.html")),
];

/// Context shared by every full page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageContext {
    pub prefix: String,
    /// Name of the signed-in user, if any.
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoginView {
    #[serde(flatten)]
    pub page: PageContext,
    pub action: String,
    /// Where to go after a successful login.
    pub next: String,
    /// Username echoed back after a failed attempt.
    pub login_name: String,
    pub error: Option<String>,
    /// No user exists yet; the next login creates the administrator.
    pub bootstrap: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexView {
    #[serde(flatten)]
    pub page: PageContext,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableRow {
    pub id: i64,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableView {
    #[serde(flatten)]
    pub page: PageContext,
    pub model: String,
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
    pub filter: String,
    pub page_size: u64,
    pub previous_offset: Option<u64>,
    pub next_offset: Option<u64>,
}

impl TableView {
    /// Text cells of `rows`, one per descriptor.
    pub fn rows_from(fields: &[FieldDescriptor], rows: &[RowView]) -> Vec<TableRow> {
        rows.iter()
            .map(|row| TableRow {
                id: row.id,
                cells: fields.iter().map(|field| row.text(&field.name)).collect(),
            })
            .collect()
    }
}

/// One widget of the edit form.
#[derive(Debug, Clone, Serialize)]
pub struct FieldView {
    pub name: String,
    pub widget: &'static str,
    pub type_name: String,
    pub value: String,
    pub nullable: bool,
    pub options: Vec<String>,
    pub error: Option<String>,
}

impl FieldView {
    pub fn new(descriptor: &FieldDescriptor, value: String, error: Option<String>) -> Self {
        let widget = descriptor.widget();
        let options = match &widget {
            Widget::Select { options } => options.clone(),
            _ => Vec::new(),
        };
        Self {
            name: descriptor.name.clone(),
            widget: widget.as_str(),
            type_name: descriptor.kind.type_name().to_string(),
            value,
            nullable: descriptor.nullable,
            options,
            error,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FormView {
    #[serde(flatten)]
    pub page: PageContext,
    pub model: String,
    /// `None` while creating.
    pub id: Option<i64>,
    pub action: String,
    /// Rendered field widgets, in field order.
    pub fields: Vec<String>,
    /// Failure not tied to a single field, e.g. a rejected save hook.
    pub message: Option<String>,
}

/// Produces the HTML of each admin component.
pub trait Renderer: Send + Sync {
    fn login(&self, view: &LoginView) -> Result<String, AdminError>;

    fn index(&self, view: &IndexView) -> Result<String, AdminError>;

    fn table(&self, view: &TableView) -> Result<String, AdminError>;

    /// Wraps fields already rendered by [`Renderer::field`].
    fn form(&self, view: &FormView) -> Result<String, AdminError>;

    fn field(&self, view: &FieldView) -> Result<String, AdminError>;
}

/// Built-in renderer backed by Tera templates.
#[derive(Debug, Clone)]
pub struct TeraRenderer {
    tera: Tera,
}

impl TeraRenderer {
    pub fn new() -> Result<Self, AdminError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.to_vec())?;
        Ok(Self { tera })
    }

    /// Replaces one built-in template, e.g. `"login.html"`.
    ///
    /// Page templates may `{% extends "base.html" %}`.
    pub fn with_template(mut self, name: &str, source: &str) -> Result<Self, AdminError> {
        self.tera.add_raw_template(name, source)?;
        Ok(self)
    }

    fn render<T: Serialize>(&self, template: &str, view: &T) -> Result<String, AdminError> {
        let context = Context::from_serialize(view)?;
        Ok(self.tera.render(template, &context)?)
    }
}

impl Renderer for TeraRenderer {
    fn login(&self, view: &LoginView) -> Result<String, AdminError> {
        self.render("login.html", view)
    }

    fn index(&self, view: &IndexView) -> Result<String, AdminError> {
        self.render("index.html", view)
    }

    fn table(&self, view: &TableView) -> Result<String, AdminError> {
        self.render("table.html", view)
    }

    fn form(&self, view: &FormView) -> Result<String, AdminError> {
        self.render("form.html", view)
    }

    fn field(&self, view: &FieldView) -> Result<String, AdminError> {
        self.render("field.html", view)
    }
}
