use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::row::{Row, RowId};

/// Lightweight address of a row: table name plus identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowPointer {
    pub table: String,
    pub id: RowId,
}

impl RowPointer {
    pub fn new(table: impl Into<String>, id: RowId) -> Self {
        Self {
            table: table.into(),
            id,
        }
    }
}

impl fmt::Display for RowPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.table, self.id)
    }
}

/// Reference from a field to another row.
///
/// Rows created earlier in the same statement tree are embedded directly.
/// Anything older is carried as a pointer and only loaded when one of its
/// fields is read. Serialization always reduces a reference to its pointer,
/// so persisted rows never nest other rows.
#[derive(Debug, Clone)]
pub enum RowRef {
    Unresolved(RowPointer),
    Resolved(Arc<Row>),
}

impl RowRef {
    pub fn pointer(&self) -> RowPointer {
        match self {
            RowRef::Unresolved(pointer) => pointer.clone(),
            RowRef::Resolved(row) => row.pointer(),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            RowRef::Unresolved(pointer) => &pointer.table,
            RowRef::Resolved(row) => row.table(),
        }
    }

    pub fn id(&self) -> RowId {
        match self {
            RowRef::Unresolved(pointer) => pointer.id,
            RowRef::Resolved(row) => row.id(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, RowRef::Resolved(_))
    }

    /// Return the referenced row, loading it through `load` on first access.
    ///
    /// A successful load moves the reference to the resolved state so later
    /// reads skip the loader.
    pub fn resolve_with<E, F>(&mut self, load: F) -> std::result::Result<Arc<Row>, E>
    where
        F: FnOnce(&RowPointer) -> std::result::Result<Arc<Row>, E>,
    {
        match self {
            RowRef::Resolved(row) => Ok(Arc::clone(row)),
            RowRef::Unresolved(pointer) => {
                let row = load(pointer)?;
                *self = RowRef::Resolved(Arc::clone(&row));
                Ok(row)
            }
        }
    }
}

impl PartialEq for RowRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id() && self.table() == other.table()
    }
}

impl Serialize for RowRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.pointer().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RowRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        RowPointer::deserialize(deserializer).map(RowRef::Unresolved)
    }
}

/// Value stored in a row field or bound to a variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Reference(RowRef),
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Text(_) => "text",
            FieldValue::Date(_) => "date",
            FieldValue::Reference(_) => "reference",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn reference(row: Arc<Row>) -> Self {
        FieldValue::Reference(RowRef::Resolved(row))
    }

    pub fn pointer(table: impl Into<String>, id: RowId) -> Self {
        FieldValue::Reference(RowRef::Unresolved(RowPointer::new(table, id)))
    }

    pub fn as_reference(&self) -> Option<&RowRef> {
        match self {
            FieldValue::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            FieldValue::Int(value) => Ok(*value),
            FieldValue::Float(value) if value.fract() == 0.0 => Ok(*value as i64),
            FieldValue::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| Error::InvalidValue(format!("`{text}` is not an integer"))),
            FieldValue::Reference(reference) => i64::try_from(reference.id())
                .map_err(|_| Error::InvalidValue(format!("identifier {} overflows", reference.id()))),
            other => Err(Error::TypeMismatch {
                expected: "int",
                found: other.kind(),
            }),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            FieldValue::Int(value) => Ok(*value as f64),
            FieldValue::Float(value) => Ok(*value),
            FieldValue::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| Error::InvalidValue(format!("`{text}` is not a number"))),
            other => Err(Error::TypeMismatch {
                expected: "number",
                found: other.kind(),
            }),
        }
    }

    /// Interpret the value as a non-negative repetition count.
    pub fn as_count(&self) -> Result<u64> {
        let count = match self {
            FieldValue::Float(value) => value.trunc() as i64,
            other => match other.as_i64() {
                Ok(value) => value,
                Err(_) => other.as_f64()?.trunc() as i64,
            },
        };
        u64::try_from(count)
            .map_err(|_| Error::InvalidValue(format!("count must not be negative, got {count}")))
    }

    /// Parse a user-supplied option value, recognising integers and floats.
    pub fn parse_option(raw: &str) -> Self {
        if let Ok(value) = raw.parse::<i64>() {
            return FieldValue::Int(value);
        }
        if let Ok(value) = raw.parse::<f64>() {
            if value.is_finite() {
                return FieldValue::Float(value);
            }
        }
        FieldValue::Text(raw.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
            FieldValue::Text(value) => f.write_str(value),
            FieldValue::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            FieldValue::Reference(reference) => write!(f, "{}", reference.id()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}
