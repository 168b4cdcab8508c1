use schemars::schema::RootSchema;
use schemars::schema_for;

use crate::model::Recipe;

/// Emit the JSON Schema for compiled recipe documents.
pub fn recipe_json_schema() -> RootSchema {
    schema_for!(Recipe)
}
