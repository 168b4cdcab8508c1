use std::collections::{BTreeMap, HashSet};

use jsonschema::JSONSchema;
use serde_json::Value;

use crate::errors::{RecipeError, ValidationIssue, ValidationReport};
use crate::model::{
    FieldExpr, ObjectTemplate, Recipe, SCOPE_CURRENT_ITERATION,
    SCOPE_PRIOR_AND_CURRENT_ITERATIONS, Statement, StoppingCriteria,
};
use crate::schema::recipe_json_schema;

/// Validated recipe with accumulated warnings.
#[derive(Debug, Clone)]
pub struct ValidatedRecipe {
    pub recipe: Recipe,
    pub warnings: Vec<ValidationIssue>,
}

/// Validate a recipe JSON document against the recipe JSON Schema.
pub fn validate_recipe_json(
    recipe_json: &Value,
    recipe_schema: &Value,
) -> Result<ValidationReport, RecipeError> {
    let compiled =
        JSONSchema::compile(recipe_schema).map_err(|err| RecipeError::Schema(err.to_string()))?;

    let mut report = ValidationReport::default();

    if let Err(errors) = compiled.validate(recipe_json) {
        for error in errors {
            let path = normalized_json_pointer(&error.instance_path.to_string());
            report.push(ValidationIssue::error(
                "schema_violation",
                path,
                error.to_string(),
                None,
            ));
        }
    }

    Ok(report)
}

/// Check the parsed recipe for problems the JSON Schema cannot express.
pub fn validate_recipe(recipe: &Recipe, stopping: Option<&StoppingCriteria>) -> ValidationReport {
    let mut report = ValidationReport::default();
    let names = recipe.name_slots();

    if recipe.statements.is_empty() {
        report.push(ValidationIssue::warning(
            "recipe_empty",
            "/statements",
            "recipe has no statements and will produce no rows",
            None,
        ));
    }

    validate_options(recipe, &mut report);
    validate_nicknames(recipe, &mut report);

    let mut checker = Checker {
        names: &names,
        report: &mut report,
    };
    checker.statements(&recipe.statements, "/statements", false);

    if let Some(stopping) = stopping {
        validate_stopping(recipe, stopping, &mut report);
    }

    report
}

/// Validate a recipe document end-to-end, returning structured issues on failure.
pub fn load_recipe(
    recipe_json: &Value,
    stopping: Option<&StoppingCriteria>,
) -> Result<ValidatedRecipe, ValidationReport> {
    let structural = serde_json::to_value(recipe_json_schema())
        .map_err(RecipeError::from)
        .and_then(|schema| validate_recipe_json(recipe_json, &schema));
    let structural = match structural {
        Ok(report) => report,
        Err(err) => {
            let mut report = ValidationReport::default();
            report.push(ValidationIssue::error(
                "schema_validation_error",
                "/",
                err.to_string(),
                None,
            ));
            return Err(report);
        }
    };

    if !structural.is_ok() {
        return Err(structural);
    }

    let recipe: Recipe = match serde_json::from_value(recipe_json.clone()) {
        Ok(recipe) => recipe,
        Err(err) => {
            let mut report = ValidationReport::default();
            report.push(ValidationIssue::error(
                "invalid_recipe_json",
                "/",
                err.to_string(),
                None,
            ));
            return Err(report);
        }
    };

    let report = validate_recipe(&recipe, stopping);
    if !report.is_ok() {
        return Err(report);
    }

    Ok(ValidatedRecipe {
        recipe,
        warnings: report.warnings,
    })
}

fn validate_options(recipe: &Recipe, report: &mut ValidationReport) {
    let mut seen = HashSet::new();
    for (idx, declaration) in recipe.options.iter().enumerate() {
        if !seen.insert(declaration.option.as_str()) {
            report.push(ValidationIssue::error(
                "duplicate_option",
                format!("/options/{idx}/option"),
                format!("option '{}' is declared more than once", declaration.option),
                Some("remove the duplicate declaration"),
            ));
        }
    }
}

fn validate_nicknames(recipe: &Recipe, report: &mut ValidationReport) {
    let templates = recipe.templates();
    let tables = recipe.tables();
    let mut bound: BTreeMap<&str, &str> = BTreeMap::new();

    for template in &templates {
        let Some(nickname) = template.nickname.as_deref() else {
            continue;
        };
        match bound.get(nickname) {
            Some(table) if *table != template.table => {
                report.push(ValidationIssue::error(
                    "nickname_conflict",
                    "/statements",
                    format!(
                        "nickname '{nickname}' is used for both '{table}' and '{}'",
                        template.table
                    ),
                    Some("give each table its own nickname"),
                ));
            }
            Some(_) => {}
            None => {
                bound.insert(nickname, template.table.as_str());
            }
        }

        if nickname != template.table && tables.contains(nickname) {
            report.push(ValidationIssue::warning(
                "nickname_shadows_table",
                "/statements",
                format!("nickname '{nickname}' is also the name of a table"),
                Some("references to this name resolve to the nicknamed row"),
            ));
        }
    }
}

fn validate_stopping(recipe: &Recipe, stopping: &StoppingCriteria, report: &mut ValidationReport) {
    if !recipe.tables().contains(stopping.table.as_str()) {
        report.push(ValidationIssue::error(
            "no_template_for_table",
            "/statements",
            format!("No template creating {}", stopping.table),
            Some("target a table that some object statement produces"),
        ));
    }
    if stopping.count == 0 {
        report.push(ValidationIssue::warning(
            "target_count_zero",
            "/statements",
            format!("target count for '{}' is zero", stopping.table),
            Some("the run stops after a single iteration"),
        ));
    }
}

struct Checker<'a> {
    names: &'a BTreeMap<String, String>,
    report: &'a mut ValidationReport,
}

impl Checker<'_> {
    fn statements(&mut self, statements: &[Statement], base_path: &str, nested: bool) {
        for (idx, statement) in statements.iter().enumerate() {
            let path = format!("{base_path}/{idx}");
            match statement {
                Statement::Object(template) => self.template(template, &path, nested),
                Statement::Var(definition) => {
                    if definition.var.trim().is_empty() {
                        self.report.push(ValidationIssue::error(
                            "var_name_empty",
                            format!("{path}/var"),
                            "variable name must not be empty",
                            None,
                        ));
                    }
                    self.expr(&definition.value, &format!("{path}/value"));
                }
            }
        }
    }

    fn template(&mut self, template: &ObjectTemplate, path: &str, nested: bool) {
        if template.table.trim().is_empty() {
            self.report.push(ValidationIssue::error(
                "table_name_empty",
                format!("{path}/table"),
                "object statements need a table name",
                None,
            ));
        }

        if template.just_once && nested {
            self.report.push(ValidationIssue::error(
                "just_once_nested",
                format!("{path}/just_once"),
                format!(
                    "just_once on '{}' is only allowed on top-level statements",
                    template.table
                ),
                Some("move the statement to the top level of the recipe"),
            ));
        }

        if let Some(count) = &template.count {
            let count_path = format!("{path}/count");
            match count {
                FieldExpr::Literal { value } => {
                    let valid = match value {
                        Value::Number(number) => {
                            number.as_u64().is_some() || number.as_f64().is_some_and(|n| n >= 0.0)
                        }
                        Value::String(text) => text.trim().parse::<u64>().is_ok(),
                        _ => false,
                    };
                    if !valid {
                        self.report.push(ValidationIssue::error(
                            "invalid_count",
                            count_path,
                            format!("count {value} is not a non-negative number"),
                            None,
                        ));
                    }
                }
                other => self.expr(other, &count_path),
            }
        }

        let mut seen = HashSet::new();
        for (idx, field) in template.fields.iter().enumerate() {
            let field_path = format!("{path}/fields/{idx}");
            if !seen.insert(field.name.as_str()) {
                self.report.push(ValidationIssue::warning(
                    "duplicate_field",
                    format!("{field_path}/name"),
                    format!(
                        "field '{}' is defined more than once on '{}'",
                        field.name, template.table
                    ),
                    Some("the last definition wins"),
                ));
            }
            self.expr(&field.value, &format!("{field_path}/value"));
        }

        self.statements(&template.friends, &format!("{path}/friends"), true);
    }

    fn expr(&mut self, expr: &FieldExpr, path: &str) {
        match expr {
            FieldExpr::Literal { value } => {
                if value.is_array() || value.is_object() {
                    self.report.push(ValidationIssue::error(
                        "unsupported_literal",
                        format!("{path}/value"),
                        "literals must be scalars",
                        None,
                    ));
                }
            }
            FieldExpr::Var { .. } => {}
            FieldExpr::Attr { base, .. } => self.expr(base, &format!("{path}/base")),
            FieldExpr::Reference { to } => self.known_name(to, path),
            FieldExpr::RandomReference { to, scope, unique } => {
                self.known_name(to, path);
                if let Some(scope) = scope {
                    if scope != SCOPE_CURRENT_ITERATION && scope != SCOPE_PRIOR_AND_CURRENT_ITERATIONS
                    {
                        self.report.push(ValidationIssue::error(
                            "invalid_scope",
                            format!("{path}/scope"),
                            format!(
                                "Scope must be \"{SCOPE_CURRENT_ITERATION}\" or \"{SCOPE_PRIOR_AND_CURRENT_ITERATIONS}\" not {scope:?}"
                            ),
                            None,
                        ));
                    }
                }
                let is_nickname = self.names.get(to).is_some_and(|table| table != to);
                if *unique && is_nickname {
                    self.report.push(ValidationIssue::error(
                        "unique_nickname",
                        format!("{path}/unique"),
                        format!("unique random references cannot target nickname '{to}'"),
                        Some("reference the table name instead"),
                    ));
                }
            }
            FieldExpr::Object(template) => self.template(template, path, true),
            FieldExpr::Call { args, .. } => {
                for (idx, arg) in args.iter().enumerate() {
                    self.expr(arg, &format!("{path}/args/{idx}"));
                }
            }
            FieldExpr::Concat { parts } => {
                for (idx, part) in parts.iter().enumerate() {
                    self.expr(part, &format!("{path}/parts/{idx}"));
                }
            }
        }
    }

    fn known_name(&mut self, name: &str, path: &str) {
        if !self.names.contains_key(name) {
            self.report.push(ValidationIssue::error(
                "unknown_reference",
                format!("{path}/to"),
                format!("There is no table or nickname `{name}` in the recipe"),
                None,
            ));
        }
    }
}

fn normalized_json_pointer(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}
