use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use rowforge_core::{Dependency, LoadOrderReport, RowId, build_load_order_report};
use rowforge_recipe::StoppingCriteria;

use crate::continuation::ContinuationSnapshot;
use crate::globals::Globals;

/// Options for the generation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Keep iterating until this many rows of a table exist in the run chain.
    /// Without it the recipe runs exactly once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopping_criteria: Option<StoppingCriteria>,
    /// Seed for every random choice; a random seed is drawn when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Anchor date for `today` and date providers. Defaults to the current
    /// UTC date, or the date stored in a continuation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub today: Option<NaiveDate>,
    /// Raw values for the recipe's declared options.
    #[serde(default)]
    pub user_options: BTreeMap<String, String>,
}

impl GenerateOptions {
    pub fn with_target(mut self, table: impl Into<String>, count: u64) -> Self {
        self.stopping_criteria = Some(StoppingCriteria::new(table, count));
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_options.insert(name.into(), value.into());
        self
    }
}

/// Rows emitted for one table during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    pub rows_written: u64,
    /// Last identifier issued in the run chain, hidden rows included.
    pub last_id: RowId,
}

/// Report for a generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub run_id: String,
    pub seed: u64,
    pub today: NaiveDate,
    pub iterations: u64,
    pub continued: bool,
    pub tables: Vec<TableReport>,
    pub intertable_dependencies: Vec<Dependency>,
    pub duration_ms: u64,
}

/// Outcome of a successful run: the report and the run-chain state.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub report: GenerationReport,
    pub globals: Globals,
}

impl ExecutionSummary {
    /// State to hand to the next run of the chain.
    pub fn continuation(&self) -> ContinuationSnapshot {
        self.globals.snapshot()
    }

    /// Referenced tables before the tables referencing them.
    pub fn load_order(&self) -> LoadOrderReport {
        let tables: Vec<&str> = self
            .report
            .tables
            .iter()
            .map(|table| table.table.as_str())
            .collect();
        build_load_order_report(self.globals.intertable_dependencies(), tables)
    }
}
