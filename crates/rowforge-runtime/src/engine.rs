use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use rowforge_core::FieldValue;
use rowforge_recipe::Recipe;

use crate::continuation::ContinuationSnapshot;
use crate::errors::{Result, RuntimeError};
use crate::globals::Globals;
use crate::interpreter::{Interpreter, InterpreterOptions, InterpreterOutcome, literal_value};
use crate::model::{ExecutionSummary, GenerateOptions, GenerationReport, TableReport};
use crate::output::OutputStream;
use crate::providers::ProviderRegistry;

/// Entry point for running a recipe, optionally continuing an earlier run.
pub struct GenerationEngine {
    options: GenerateOptions,
    providers: ProviderRegistry,
}

impl GenerationEngine {
    pub fn new(options: GenerateOptions) -> Self {
        Self {
            options,
            providers: ProviderRegistry::new(),
        }
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    /// Providers callable from recipe `call` expressions.
    pub fn providers_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.providers
    }

    pub fn run(
        &self,
        recipe: &Recipe,
        output: &mut dyn OutputStream,
        continuation: Option<ContinuationSnapshot>,
    ) -> Result<ExecutionSummary> {
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let seed = self.options.seed.unwrap_or_else(rand::random);
        let continued = continuation.is_some();

        info!(
            run_id = %run_id,
            seed,
            continued,
            statements = recipe.statements.len(),
            target = ?self.options.stopping_criteria,
            "generation started"
        );

        let outcome = self.execute(recipe, output, continuation, seed);
        let closed = output.close().map_err(RuntimeError::from);
        let outcome = outcome.and_then(|outcome| closed.map(|()| outcome));

        match outcome {
            Ok(outcome) => {
                let report = build_report(
                    recipe,
                    run_id,
                    seed,
                    continued,
                    &outcome,
                    start.elapsed().as_millis() as u64,
                );
                info!(
                    run_id = %report.run_id,
                    iterations = report.iterations,
                    tables = report.tables.len(),
                    rows_written = report.tables.iter().map(|table| table.rows_written).sum::<u64>(),
                    duration_ms = report.duration_ms,
                    "generation completed"
                );
                Ok(ExecutionSummary {
                    report,
                    globals: outcome.globals,
                })
            }
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "generation failed");
                Err(err)
            }
        }
    }

    fn execute(
        &self,
        recipe: &Recipe,
        output: &mut dyn OutputStream,
        continuation: Option<ContinuationSnapshot>,
        seed: u64,
    ) -> Result<InterpreterOutcome> {
        let options = merge_options(recipe, &self.options.user_options)?;
        let name_slots = recipe.name_slots();
        let continuing = continuation.is_some();
        let globals = match continuation {
            Some(snapshot) => Globals::from_snapshot(snapshot, &name_slots)?,
            None => Globals::new(
                name_slots,
                self.options
                    .today
                    .unwrap_or_else(|| Utc::now().date_naive()),
            ),
        };

        Interpreter::new(
            recipe,
            globals,
            output,
            InterpreterOptions {
                stopping_criteria: self.options.stopping_criteria.clone(),
                continuing,
                options,
                providers: &self.providers,
                seed,
            },
        )?
        .run()
    }
}

/// Declared option defaults overlaid with the caller's values.
fn merge_options(
    recipe: &Recipe,
    user_options: &BTreeMap<String, String>,
) -> Result<HashMap<String, FieldValue>> {
    let mut merged = HashMap::new();
    for declaration in &recipe.options {
        let value = match (user_options.get(&declaration.option), &declaration.default) {
            (Some(raw), _) => FieldValue::parse_option(raw),
            (None, Some(default)) => literal_value(default)?,
            (None, None) => return Err(RuntimeError::MissingOption(declaration.option.clone())),
        };
        merged.insert(declaration.option.clone(), value);
    }

    for (name, raw) in user_options {
        if !merged.contains_key(name) {
            warn!(option = %name, "option is not declared by the recipe");
            merged.insert(name.clone(), FieldValue::parse_option(raw));
        }
    }
    Ok(merged)
}

fn build_report(
    recipe: &Recipe,
    run_id: String,
    seed: u64,
    continued: bool,
    outcome: &InterpreterOutcome,
    duration_ms: u64,
) -> GenerationReport {
    let ids = outcome.globals.id_manager();
    let tables = recipe
        .tables()
        .into_iter()
        .map(|table| TableReport {
            table: table.to_string(),
            rows_written: outcome.rows_written.get(table).copied().unwrap_or(0),
            last_id: ids.peek(table),
        })
        .collect();

    GenerationReport {
        run_id,
        seed,
        today: outcome.globals.today(),
        iterations: outcome.iterations,
        continued,
        tables,
        intertable_dependencies: outcome.globals.intertable_dependencies().iter().cloned().collect(),
        duration_ms,
    }
}
