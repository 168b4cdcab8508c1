use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use tracing::debug;

use rowforge_core::{Dependency, FieldValue, Row, RowId, RowPointer, RowRef};
use rowforge_recipe::{FieldExpr, ObjectTemplate, Recipe, Statement, StoppingCriteria};

use crate::context::RuntimeContext;
use crate::errors::{Result, RuntimeError};
use crate::finished::FinishedChecker;
use crate::globals::Globals;
use crate::history::{ReferenceScope, RowHistory};
use crate::output::OutputStream;
use crate::providers::{ProviderContext, ProviderRegistry};
use crate::transients::Transients;

/// Settings for one interpreter run.
pub struct InterpreterOptions<'r> {
    pub stopping_criteria: Option<StoppingCriteria>,
    /// Whether the globals come from an earlier run of the chain.
    pub continuing: bool,
    /// Resolved recipe options.
    pub options: HashMap<String, FieldValue>,
    pub providers: &'r ProviderRegistry,
    pub seed: u64,
}

/// What a finished run leaves behind.
#[derive(Debug)]
pub struct InterpreterOutcome {
    pub globals: Globals,
    pub iterations: u64,
    pub rows_written: BTreeMap<String, u64>,
}

/// Executes a recipe pass after pass until the stopping criterion is met.
pub struct Interpreter<'r, 'o> {
    recipe: &'r Recipe,
    output: &'o mut dyn OutputStream,
    providers: &'r ProviderRegistry,
    options: HashMap<String, FieldValue>,
    globals: Globals,
    transients: Transients,
    history: RowHistory,
    finished: FinishedChecker,
    rng: ChaCha8Rng,
    continuing: bool,
    iterations: u64,
    rows_written: BTreeMap<String, u64>,
}

impl<'r, 'o> Interpreter<'r, 'o> {
    pub fn new(
        recipe: &'r Recipe,
        globals: Globals,
        output: &'o mut dyn OutputStream,
        options: InterpreterOptions<'r>,
    ) -> Result<Self> {
        let mut history = RowHistory::new()?;
        if options.continuing {
            for (nickname, row) in globals.persistent_rows() {
                history.save(row.table(), nickname, row)?;
            }
        }

        let start_ids = if options.continuing {
            globals.id_manager().start_ids()
        } else {
            BTreeMap::new()
        };
        let finished =
            FinishedChecker::new(options.stopping_criteria, start_ids, globals.id_manager());
        let transients = Transients::new(&globals, history.counters().clone());

        Ok(Self {
            recipe,
            output,
            providers: options.providers,
            options: options.options,
            globals,
            transients,
            history,
            finished,
            rng: ChaCha8Rng::seed_from_u64(options.seed),
            continuing: options.continuing,
            iterations: 0,
            rows_written: BTreeMap::new(),
        })
    }

    /// Run passes until finished, returning the run-chain state.
    pub fn run(mut self) -> Result<InterpreterOutcome> {
        let recipe = self.recipe;
        let mut continuing = self.continuing;
        loop {
            self.iterations += 1;
            let mut root = RuntimeContext::root();
            for statement in &recipe.statements {
                self.execute_statement(statement, &mut root, continuing)?;
            }
            self.transients.check_slots_filled()?;

            let finished = self.finished.check(self.globals.id_manager())?;
            debug!(
                iteration = self.iterations,
                finished,
                target = self.finished.target(),
                "iteration completed"
            );
            if finished {
                break;
            }
            self.transients = Transients::new(&self.globals, self.history.counters().clone());
            continuing = true;
        }

        Ok(InterpreterOutcome {
            globals: self.globals,
            iterations: self.iterations,
            rows_written: self.rows_written,
        })
    }

    pub fn execute_statement(
        &mut self,
        statement: &Statement,
        ctx: &mut RuntimeContext<'_>,
        continuing: bool,
    ) -> Result<()> {
        match statement {
            Statement::Object(template) => {
                if template.just_once && continuing {
                    return Ok(());
                }
                self.generate_rows(template, ctx)?;
                Ok(())
            }
            Statement::Var(definition) => {
                let value = self.evaluate(&definition.value, ctx)?;
                ctx.define(definition.var.clone(), value);
                Ok(())
            }
        }
    }

    /// Produce `count` rows of a template; returns the last one.
    pub fn generate_rows(
        &mut self,
        template: &ObjectTemplate,
        parent: &RuntimeContext<'_>,
    ) -> Result<Option<Arc<Row>>> {
        let count = match &template.count {
            Some(expr) => self
                .evaluate(expr, parent)
                .and_then(|value| value.as_count().map_err(RuntimeError::from))
                .map_err(|err| err.in_field(&template.table, "count", template.line))?,
            None => 1,
        };

        let mut last = None;
        for index in 0..count {
            last = Some(self.generate_row(template, parent, index)?);
        }
        Ok(last)
    }

    fn generate_row(
        &mut self,
        template: &ObjectTemplate,
        parent: &RuntimeContext<'_>,
        index: u64,
    ) -> Result<Arc<Row>> {
        let id = self.issue_id(template)?;
        let mut frame = parent.child(Some(template));
        let child_index = i64::try_from(index)
            .map_err(|_| RuntimeError::InvalidValue(format!("child index {index} is too large")))?;
        frame.define("child_index", FieldValue::Int(child_index));
        frame.begin_row(Row::new(template.table.clone(), id, index));

        for field in &template.fields {
            let value = self
                .evaluate(&field.value, &frame)
                .map_err(|err| err.in_field(&template.table, &field.name, template.line))?;
            if let Some(reference) = value.as_reference() {
                self.globals.register_dependency(Dependency::new(
                    template.table.clone(),
                    reference.table(),
                    field.name.clone(),
                ));
            }
            frame.set_field(&field.name, value)?;
        }

        let row = frame.finish_row()?;
        let nickname = template.nickname.as_deref();
        if template.just_once {
            self.globals.register_persistent(Arc::clone(&row), nickname);
        } else {
            self.transients.register(Arc::clone(&row), nickname);
        }
        self.history.save(&template.table, nickname, &row)?;

        if !template.is_hidden() {
            self.output.write_row(&row)?;
            *self.rows_written.entry(template.table.clone()).or_default() += 1;
        }

        for friend in &template.friends {
            self.execute_statement(friend, &mut frame, true)?;
        }
        Ok(row)
    }

    /// Identifier for a new row: a forward reference already handed out for
    /// its nickname or table wins over a fresh identifier.
    fn issue_id(&mut self, template: &ObjectTemplate) -> Result<RowId> {
        let slots = self.transients.slots_mut();
        if let Some(nickname) = &template.nickname {
            if let Some(id) = slots.consume_if_allocated(nickname)? {
                return Ok(id);
            }
        }
        if let Some(id) = slots.consume_if_allocated(&template.table)? {
            return Ok(id);
        }
        Ok(self.globals.id_manager_mut().generate_id(&template.table))
    }

    pub fn evaluate(&mut self, expr: &FieldExpr, ctx: &RuntimeContext<'_>) -> Result<FieldValue> {
        match expr {
            FieldExpr::Literal { value } => literal_value(value),
            FieldExpr::Var { name } => self.lookup(name, ctx),
            FieldExpr::Attr { base, field } => {
                let base = self.evaluate(base, ctx)?;
                let FieldValue::Reference(mut reference) = base else {
                    return Err(RuntimeError::InvalidValue(format!(
                        "cannot read `{field}` of a {} value",
                        base.kind()
                    )));
                };
                let row = reference.resolve_with(|pointer| self.load_pointer(pointer, ctx))?;
                row.field(field)
                    .ok_or_else(|| RuntimeError::UnknownName(format!("{}.{field}", row.table())))
            }
            FieldExpr::Reference { to } => self
                .object_reference(to, ctx)?
                .ok_or_else(|| RuntimeError::MissingName(to.clone())),
            FieldExpr::RandomReference { to, scope, unique } => {
                let scope = ReferenceScope::parse(scope.as_deref())?;
                let reference = self.history.random_reference(
                    to,
                    scope,
                    *unique,
                    self.transients.watermark(),
                    &mut self.rng,
                )?;
                Ok(FieldValue::Reference(reference))
            }
            FieldExpr::Object(template) => Ok(self
                .generate_rows(template, ctx)?
                .map_or(FieldValue::Null, FieldValue::reference)),
            FieldExpr::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.evaluate(arg, ctx))
                    .collect::<Result<Vec<_>>>()?;
                let provider_ctx = ProviderContext {
                    today: self.globals.today(),
                    table: ctx.template().map_or("", |template| template.table.as_str()),
                };
                self.providers
                    .call(function, &provider_ctx, &args, &mut self.rng)
            }
            FieldExpr::Concat { parts } => {
                let mut text = String::new();
                for part in parts {
                    text.push_str(&self.evaluate(part, ctx)?.to_string());
                }
                Ok(FieldValue::Text(text))
            }
        }
    }

    fn lookup(&mut self, name: &str, ctx: &RuntimeContext<'_>) -> Result<FieldValue> {
        if let Some(value) = ctx.lookup_var(name) {
            return Ok(value.clone());
        }
        if let Some(value) = ctx.current_row_field(name) {
            return Ok(value);
        }
        if let Some(value) = self.object_reference(name, ctx)? {
            return Ok(value);
        }
        if let Some(value) = self.options.get(name) {
            return Ok(value.clone());
        }
        if name == "today" {
            return Ok(FieldValue::Date(self.globals.today()));
        }
        Err(RuntimeError::UnknownName(name.to_string()))
    }

    /// Row bound to a nickname or table name. Falls back to allocating a
    /// forward reference; `None` when the name is not referable here.
    fn object_reference(
        &mut self,
        name: &str,
        ctx: &RuntimeContext<'_>,
    ) -> Result<Option<FieldValue>> {
        if let Some(pointer) = ctx.row_in_progress(name) {
            return Ok(Some(FieldValue::Reference(RowRef::Unresolved(pointer))));
        }
        if let Some(row) = self.transients.bound_row(name) {
            return Ok(Some(FieldValue::reference(Arc::clone(row))));
        }
        if let Some(row) = self.globals.persistent_row(name) {
            return Ok(Some(FieldValue::reference(Arc::clone(row))));
        }
        let pointer = self
            .transients
            .slots_mut()
            .forward_reference(name, self.globals.id_manager_mut())?;
        Ok(pointer.map(|pointer| FieldValue::Reference(RowRef::Unresolved(pointer))))
    }

    fn load_pointer(&self, pointer: &RowPointer, ctx: &RuntimeContext<'_>) -> Result<Arc<Row>> {
        if let Some(row) = ctx.snapshot_in_progress(pointer) {
            return Ok(row);
        }
        if let Some(row) = self
            .transients
            .find_bound_row(pointer)
            .or_else(|| self.globals.find_bound_row(pointer))
        {
            return Ok(row);
        }
        self.history
            .try_load(&pointer.table, pointer.id)?
            .ok_or_else(|| RuntimeError::NotYetGenerated {
                table: pointer.table.clone(),
                id: pointer.id,
            })
    }
}

/// Convert a recipe literal to a field value. Only scalars are allowed.
pub(crate) fn literal_value(value: &Value) -> Result<FieldValue> {
    match value {
        Value::Null => Ok(FieldValue::Null),
        Value::Bool(value) => Ok(FieldValue::Bool(*value)),
        Value::Number(number) => number
            .as_i64()
            .map(FieldValue::Int)
            .or_else(|| number.as_f64().map(FieldValue::Float))
            .ok_or_else(|| RuntimeError::InvalidValue(format!("unsupported number {number}"))),
        Value::String(text) => Ok(FieldValue::Text(text.clone())),
        Value::Array(_) | Value::Object(_) => Err(RuntimeError::InvalidValue(format!(
            "literal must be a scalar, got {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::output::MemoryOutputStream;

    use super::*;

    fn run(recipe: &Recipe, criteria: Option<StoppingCriteria>) -> Result<(InterpreterOutcome, MemoryOutputStream)> {
        let providers = ProviderRegistry::new();
        let globals = Globals::new(
            recipe.name_slots(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        let mut output = MemoryOutputStream::new();
        let outcome = Interpreter::new(
            recipe,
            globals,
            &mut output,
            InterpreterOptions {
                stopping_criteria: criteria,
                continuing: false,
                options: HashMap::new(),
                providers: &providers,
                seed: 7,
            },
        )?
        .run()?;
        Ok((outcome, output))
    }

    #[test]
    fn forward_reference_adopts_the_allocated_identifier() {
        let recipe = Recipe::new(vec![
            ObjectTemplate::new("Foo")
                .field("bar_reference", FieldExpr::reference("Bar"))
                .into(),
            ObjectTemplate::new("Bar").into(),
        ]);

        let (outcome, output) = run(&recipe, None).unwrap();
        let foo = &output.rows()[0];
        let bar = &output.rows()[1];
        assert_eq!(
            foo.value("bar_reference").and_then(FieldValue::as_reference).map(RowRef::pointer),
            Some(bar.pointer())
        );
        assert_eq!(outcome.globals.id_manager().peek("Bar"), 1);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn child_index_and_own_fields_are_visible() {
        let recipe = Recipe::new(vec![
            ObjectTemplate::new("Item")
                .count(3)
                .field("position", FieldExpr::var("child_index"))
                .field(
                    "label",
                    FieldExpr::concat(vec![
                        FieldExpr::literal("item-"),
                        FieldExpr::var("id"),
                        FieldExpr::literal("/"),
                        FieldExpr::var("position"),
                    ]),
                )
                .into(),
        ]);

        let (_, output) = run(&recipe, None).unwrap();
        let labels: Vec<String> = output
            .rows()
            .iter()
            .filter_map(|row| row.field("label").map(|value| value.to_string()))
            .collect();
        assert_eq!(labels, vec!["item-1/0", "item-2/1", "item-3/2"]);
    }

    #[test]
    fn friends_see_the_finished_parent_row() {
        let recipe = Recipe::new(vec![
            ObjectTemplate::new("Parent")
                .field("name", FieldExpr::literal("Ada"))
                .friend(
                    ObjectTemplate::new("Child")
                        .field("parent", FieldExpr::reference("Parent"))
                        .field(
                            "parent_name",
                            FieldExpr::attr(FieldExpr::var("Parent"), "name"),
                        ),
                )
                .into(),
        ]);

        let (outcome, output) = run(&recipe, None).unwrap();
        let child = &output.rows()[1];
        assert_eq!(child.field("parent_name"), Some(FieldValue::from("Ada")));
        assert!(outcome
            .globals
            .intertable_dependencies()
            .contains(&Dependency::new("Child", "Parent", "parent")));
    }

    #[test]
    fn nested_objects_can_point_back_at_the_row_being_built() {
        let recipe = Recipe::new(vec![
            ObjectTemplate::new("Parent")
                .field(
                    "child",
                    FieldExpr::object(
                        ObjectTemplate::new("Child").field("parent", FieldExpr::reference("Parent")),
                    ),
                )
                .into(),
        ]);

        let (_, output) = run(&recipe, None).unwrap();
        let child = output.table("Child").next().unwrap();
        let parent = output.table("Parent").next().unwrap();
        assert_eq!(
            child.value("parent").and_then(FieldValue::as_reference).map(RowRef::pointer),
            Some(parent.pointer())
        );
        assert_eq!(
            parent.value("child").and_then(FieldValue::as_reference).map(RowRef::pointer),
            Some(child.pointer())
        );
    }

    #[test]
    fn reading_a_forward_reference_fails() {
        let recipe = Recipe::new(vec![
            ObjectTemplate::new("Foo")
                .field("bar_name", FieldExpr::attr(FieldExpr::reference("Bar"), "name"))
                .into(),
            ObjectTemplate::new("Bar").into(),
        ]);

        let err = run(&recipe, None).expect_err("expected failure");
        assert!(matches!(
            err.root_cause(),
            RuntimeError::NotYetGenerated { table, id: 1 } if table == "Bar"
        ));
        assert!(err.to_string().starts_with("Foo.bar_name"));
    }

    #[test]
    fn hidden_tables_are_not_emitted() {
        let recipe = Recipe::new(vec![
            ObjectTemplate::new("__Scratch")
                .field("n", FieldExpr::literal(4))
                .into(),
            ObjectTemplate::new("Visible")
                .field("n", FieldExpr::attr(FieldExpr::var("__Scratch"), "n"))
                .into(),
        ]);

        let (outcome, output) = run(&recipe, None).unwrap();
        assert_eq!(output.rows().len(), 1);
        assert_eq!(output.rows()[0].field("n"), Some(FieldValue::Int(4)));
        assert_eq!(outcome.rows_written.get("__Scratch"), None);
    }

    #[test]
    fn literals_must_be_scalars() {
        assert_eq!(literal_value(&Value::from(2.5)).unwrap(), FieldValue::Float(2.5));
        assert!(literal_value(&serde_json::json!([1, 2])).is_err());
    }
}
