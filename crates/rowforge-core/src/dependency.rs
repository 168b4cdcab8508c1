use serde::{Deserialize, Serialize};

/// A field in one table that referenced a row of another table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency {
    pub table_name_from: String,
    pub table_name_to: String,
    pub field_name: String,
}

impl Dependency {
    pub fn new(
        table_name_from: impl Into<String>,
        table_name_to: impl Into<String>,
        field_name: impl Into<String>,
    ) -> Self {
        Self {
            table_name_from: table_name_from.into(),
            table_name_to: table_name_to.into(),
            field_name: field_name.into(),
        }
    }

    pub fn is_self_reference(&self) -> bool {
        self.table_name_from == self.table_name_to
    }
}
