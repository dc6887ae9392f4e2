//! Field descriptors: how one model column is rendered, parsed and shown.
//!
//! A [`FieldDescriptor`] is derived once per column when a model is
//! registered. Its [`FieldKind`] picks the form widget and the
//! (de)serialization rule; the produced [`Value`] variant always matches the
//! Rust type Sea-ORM expects for the column.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use sea_orm::sea_query::ColumnType;
use sea_orm::{ColumnTrait, Value};
use uuid::Uuid;

/// Concrete numeric width of a number column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    TinyUnsigned,
    SmallUnsigned,
    Unsigned,
    BigUnsigned,
    Float,
    Double,
}

/// Which chrono type backs a datetime column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeFlavor {
    /// `NaiveDateTime` (`DATETIME`/`TIMESTAMP` columns).
    Naive,
    /// `DateTime<Utc>`.
    Utc,
    /// `DateTime<FixedOffset>` (`TIMESTAMPTZ` columns by default).
    FixedOffset,
}

/// Declared semantic type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number(NumberKind),
    Boolean,
    /// Stored as the member name.
    Enumeration { members: Vec<String> },
    DateTime(DateTimeFlavor),
    Uuid,
    /// Anything else; carries the column type name for display.
    Other(String),
}

impl FieldKind {
    /// Maps a Sea-ORM column type onto a field kind.
    ///
    /// `TIMESTAMPTZ` maps to [`DateTimeFlavor::FixedOffset`]. The column type
    /// alone cannot tell `DateTime<Utc>` apart; model registration settles the
    /// flavor against the entity's active model.
    pub fn from_column_type(column_type: &ColumnType) -> Self {
        match column_type {
            ColumnType::Char(_) | ColumnType::String(_) | ColumnType::Text => FieldKind::Text,
            ColumnType::TinyInteger => FieldKind::Number(NumberKind::TinyInt),
            ColumnType::SmallInteger => FieldKind::Number(NumberKind::SmallInt),
            ColumnType::Integer => FieldKind::Number(NumberKind::Int),
            ColumnType::BigInteger => FieldKind::Number(NumberKind::BigInt),
            ColumnType::TinyUnsigned => FieldKind::Number(NumberKind::TinyUnsigned),
            ColumnType::SmallUnsigned => FieldKind::Number(NumberKind::SmallUnsigned),
            ColumnType::Unsigned => FieldKind::Number(NumberKind::Unsigned),
            ColumnType::BigUnsigned => FieldKind::Number(NumberKind::BigUnsigned),
            ColumnType::Float => FieldKind::Number(NumberKind::Float),
            ColumnType::Double => FieldKind::Number(NumberKind::Double),
            ColumnType::Boolean => FieldKind::Boolean,
            ColumnType::DateTime | ColumnType::Timestamp => {
                FieldKind::DateTime(DateTimeFlavor::Naive)
            }
            ColumnType::TimestampWithTimeZone => FieldKind::DateTime(DateTimeFlavor::FixedOffset),
            ColumnType::Uuid => FieldKind::Uuid,
            ColumnType::Enum { variants, .. } => FieldKind::Enumeration {
                members: variants.iter().map(|v| v.to_string()).collect(),
            },
            other => FieldKind::Other(format!("{other:?}")),
        }
    }

    /// Short type label shown next to the field name.
    pub fn type_name(&self) -> &str {
        match self {
            FieldKind::Text => "str",
            FieldKind::Number(NumberKind::Float | NumberKind::Double) => "float",
            FieldKind::Number(_) => "int",
            FieldKind::Boolean => "bool",
            FieldKind::Enumeration { .. } => "enum",
            FieldKind::DateTime(_) => "datetime",
            FieldKind::Uuid => "uuid",
            FieldKind::Other(name) => name,
        }
    }

    /// Whether values of this kind can be written back to the column.
    pub fn is_supported(&self) -> bool {
        !matches!(self, FieldKind::Other(_))
    }
}

/// The input control a field is edited with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Widget {
    TextInput,
    NumberInput,
    Checkbox,
    Select { options: Vec<String> },
    /// `datetime-local` input with a "Now" button submitting `now`.
    DateTimeInput,
    /// Text input with a "generate" button submitting `random`.
    UuidInput,
    /// Primary keys are shown but never edited.
    ReadOnly,
    Unsupported,
}

impl Widget {
    /// Template-facing name of the widget.
    pub fn as_str(&self) -> &'static str {
        match self {
            Widget::TextInput => "text",
            Widget::NumberInput => "number",
            Widget::Checkbox => "checkbox",
            Widget::Select { .. } => "select",
            Widget::DateTimeInput => "datetime",
            Widget::UuidInput => "uuid",
            Widget::ReadOnly => "readonly",
            Widget::Unsupported => "unsupported",
        }
    }
}

/// Sentinel submitted by the UUID widget's generate button.
pub const RANDOM_UUID: &str = "random";
/// Sentinel submitted by the datetime widget's "Now" button.
pub const NOW: &str = "now";

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Metadata describing how to render and parse one model attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub read_only: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            read_only: false,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Builds the descriptor of a Sea-ORM column from its definition.
    pub fn describe<C: ColumnTrait>(column: C) -> Self {
        let def = column.def();
        let kind = FieldKind::from_column_type(def.get_column_type());
        if !kind.is_supported() {
            tracing::warn!(
                field = column.as_str(),
                kind = kind.type_name(),
                "unsupported field type, rendering as read-only text"
            );
        }
        Self::new(column.as_str(), kind).nullable(def.is_null())
    }

    pub fn widget(&self) -> Widget {
        if self.read_only {
            return Widget::ReadOnly;
        }
        match &self.kind {
            FieldKind::Text => Widget::TextInput,
            FieldKind::Number(_) => Widget::NumberInput,
            FieldKind::Boolean => Widget::Checkbox,
            FieldKind::Enumeration { members } => Widget::Select {
                options: members.clone(),
            },
            FieldKind::DateTime(_) => Widget::DateTimeInput,
            FieldKind::Uuid => Widget::UuidInput,
            FieldKind::Other(_) => Widget::Unsupported,
        }
    }

    /// Typed NULL for this field's column.
    pub fn null_value(&self) -> Value {
        match &self.kind {
            FieldKind::Text | FieldKind::Enumeration { .. } | FieldKind::Other(_) => {
                Value::String(None)
            }
            FieldKind::Number(number) => match number {
                NumberKind::TinyInt => Value::TinyInt(None),
                NumberKind::SmallInt => Value::SmallInt(None),
                NumberKind::Int => Value::Int(None),
                NumberKind::BigInt => Value::BigInt(None),
                NumberKind::TinyUnsigned => Value::TinyUnsigned(None),
                NumberKind::SmallUnsigned => Value::SmallUnsigned(None),
                NumberKind::Unsigned => Value::Unsigned(None),
                NumberKind::BigUnsigned => Value::BigUnsigned(None),
                NumberKind::Float => Value::Float(None),
                NumberKind::Double => Value::Double(None),
            },
            FieldKind::Boolean => Value::Bool(None),
            FieldKind::DateTime(DateTimeFlavor::Naive) => Value::ChronoDateTime(None),
            FieldKind::DateTime(DateTimeFlavor::Utc) => Value::ChronoDateTimeUtc(None),
            FieldKind::DateTime(DateTimeFlavor::FixedOffset) => {
                Value::ChronoDateTimeWithTimeZone(None)
            }
            FieldKind::Uuid => Value::Uuid(None),
        }
    }

    /// Renders a stored value as form/table text. NULL renders as "".
    pub fn serialize(&self, value: &Value) -> String {
        serialize_value(value)
    }

    /// Parses submitted text into a value for this field's column.
    ///
    /// The error is a message meant to be shown next to the field.
    pub fn deserialize(&self, raw: &str) -> Result<Value, String> {
        let trimmed = raw.trim();
        let blank_allowed = matches!(
            self.kind,
            FieldKind::Text | FieldKind::Other(_) | FieldKind::Boolean
        );
        if trimmed.is_empty() && !blank_allowed {
            return if self.nullable {
                Ok(self.null_value())
            } else {
                Err("a value is required".to_string())
            };
        }

        match &self.kind {
            FieldKind::Text | FieldKind::Other(_) => Ok(Value::from(raw.to_string())),
            FieldKind::Number(number) => parse_number(*number, trimmed),
            FieldKind::Boolean => parse_bool(trimmed).map(Value::from),
            FieldKind::Enumeration { members } => {
                if members.iter().any(|member| member == trimmed) {
                    Ok(Value::from(trimmed.to_string()))
                } else {
                    Err(format!("unknown member '{trimmed}'"))
                }
            }
            FieldKind::DateTime(flavor) => parse_datetime(*flavor, trimmed),
            FieldKind::Uuid => parse_uuid(trimmed).map(Value::from),
        }
    }
}

/// Text rendering of a Sea-ORM value; datetimes drop sub-second precision.
pub fn serialize_value(value: &Value) -> String {
    match value {
        Value::Bool(Some(b)) => b.to_string(),
        Value::TinyInt(Some(n)) => n.to_string(),
        Value::SmallInt(Some(n)) => n.to_string(),
        Value::Int(Some(n)) => n.to_string(),
        Value::BigInt(Some(n)) => n.to_string(),
        Value::TinyUnsigned(Some(n)) => n.to_string(),
        Value::SmallUnsigned(Some(n)) => n.to_string(),
        Value::Unsigned(Some(n)) => n.to_string(),
        Value::BigUnsigned(Some(n)) => n.to_string(),
        Value::Float(Some(n)) => n.to_string(),
        Value::Double(Some(n)) => n.to_string(),
        Value::String(Some(s)) => s.to_string(),
        Value::Char(Some(c)) => c.to_string(),
        Value::ChronoDateTime(Some(dt)) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        Value::ChronoDateTimeUtc(Some(dt)) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
        Value::ChronoDateTimeWithTimeZone(Some(dt)) => {
            dt.to_rfc3339_opts(SecondsFormat::Secs, true)
        }
        Value::Uuid(Some(id)) => id.to_string(),
        other if is_null(other) => String::new(),
        other => format!("{other:?}"),
    }
}

fn is_null(value: &Value) -> bool {
    matches!(
        value,
        Value::Bool(None)
            | Value::TinyInt(None)
            | Value::SmallInt(None)
            | Value::Int(None)
            | Value::BigInt(None)
            | Value::TinyUnsigned(None)
            | Value::SmallUnsigned(None)
            | Value::Unsigned(None)
            | Value::BigUnsigned(None)
            | Value::Float(None)
            | Value::Double(None)
            | Value::String(None)
            | Value::Char(None)
            | Value::Bytes(None)
            | Value::ChronoDateTime(None)
            | Value::ChronoDateTimeUtc(None)
            | Value::ChronoDateTimeWithTimeZone(None)
            | Value::Uuid(None)
    )
}

fn parse_number(kind: NumberKind, raw: &str) -> Result<Value, String> {
    fn parse<T>(raw: &str) -> Result<Value, String>
    where
        T: std::str::FromStr + Into<Value>,
        T::Err: std::fmt::Display,
    {
        raw.parse::<T>().map(Into::into).map_err(|e| e.to_string())
    }

    match kind {
        NumberKind::TinyInt => parse::<i8>(raw),
        NumberKind::SmallInt => parse::<i16>(raw),
        NumberKind::Int => parse::<i32>(raw),
        NumberKind::BigInt => parse::<i64>(raw),
        NumberKind::TinyUnsigned => parse::<u8>(raw),
        NumberKind::SmallUnsigned => parse::<u16>(raw),
        NumberKind::Unsigned => parse::<u32>(raw),
        NumberKind::BigUnsigned => parse::<u64>(raw),
        NumberKind::Float => parse::<f32>(raw),
        NumberKind::Double => parse::<f64>(raw),
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Ok(true),
        "" | "false" | "off" | "0" | "no" => Ok(false),
        _ => Err(format!("expected a boolean, got '{raw}'")),
    }
}

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

fn parse_datetime(flavor: DateTimeFlavor, raw: &str) -> Result<Value, String> {
    let parsed: DateTime<FixedOffset> = if raw.eq_ignore_ascii_case(NOW) {
        Utc::now().trunc_subsecs(0).fixed_offset()
    } else if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
        zoned
    } else if let Some(naive) = parse_naive(raw) {
        naive.and_utc().fixed_offset()
    } else {
        return Err(format!("'{raw}' is not an ISO-8601 date and time"));
    };

    Ok(match flavor {
        DateTimeFlavor::Naive => Value::from(parsed.naive_utc()),
        DateTimeFlavor::Utc => Value::from(parsed.with_timezone(&Utc)),
        DateTimeFlavor::FixedOffset => Value::from(parsed),
    })
}

fn parse_uuid(raw: &str) -> Result<Uuid, String> {
    if raw.eq_ignore_ascii_case(RANDOM_UUID) {
        return Ok(Uuid::new_v4());
    }
    if let Ok(n) = raw.parse::<u128>() {
        return Ok(Uuid::from_u128(n));
    }
    Uuid::parse_str(raw).map_err(|e| e.to_string())
}
