use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::{FieldValue, RowPointer, RowRef};

/// Per-table row identifier. Identifiers start at 1.
pub type RowId = u64;

/// A generated row: table, identifier, position among its siblings and the
/// ordered field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    table: String,
    id: RowId,
    #[serde(default)]
    child_index: u64,
    #[serde(default)]
    values: IndexMap<String, FieldValue>,
}

impl Row {
    pub fn new(table: impl Into<String>, id: RowId, child_index: u64) -> Self {
        Self {
            table: table.into(),
            id,
            child_index,
            values: IndexMap::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn child_index(&self) -> u64 {
        self.child_index
    }

    pub fn pointer(&self) -> RowPointer {
        RowPointer::new(self.table.clone(), self.id)
    }

    /// Set a field, keeping the position of an existing field with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.values.insert(name.into(), value)
    }

    /// Stored value of a field, excluding the identifier.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Field lookup that also answers `id`.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        match self.values.get(name) {
            Some(value) => Some(value.clone()),
            None if name == "id" => Some(FieldValue::Int(id_as_i64(self.id))),
            None => None,
        }
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fields holding references to other rows.
    pub fn references(&self) -> impl Iterator<Item = (&str, &RowRef)> {
        self.values.iter().filter_map(|(name, value)| {
            value.as_reference().map(|reference| (name.as_str(), reference))
        })
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(id={}", self.table, self.id)?;
        for (name, value) in &self.values {
            if name == "id" {
                continue;
            }
            match value {
                FieldValue::Reference(reference) => {
                    write!(f, ", {name}={}({})", reference.table(), reference.id())?
                }
                other => write!(f, ", {name}={other}")?,
            }
        }
        f.write_str(")")
    }
}

fn id_as_i64(id: RowId) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}
