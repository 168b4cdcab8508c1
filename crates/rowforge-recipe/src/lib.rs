//! Compiled recipe contracts and validation.
//!
//! A recipe is an ordered list of statements: object templates that produce
//! rows and variable definitions. This crate owns the serde model, the JSON
//! Schema for recipe documents and the structural checks run before a recipe
//! is handed to the runtime.

pub mod errors;
pub mod model;
pub mod schema;
pub mod validate;

pub use errors::{IssueSeverity, RecipeError, ValidationIssue, ValidationReport};
pub use model::{
    FieldDefinition, FieldExpr, ObjectTemplate, OptionDeclaration, Recipe,
    SCOPE_CURRENT_ITERATION, SCOPE_PRIOR_AND_CURRENT_ITERATIONS, Statement, StoppingCriteria,
    VariableDefinition,
};
pub use schema::recipe_json_schema;
pub use validate::{ValidatedRecipe, load_recipe, validate_recipe, validate_recipe_json};
