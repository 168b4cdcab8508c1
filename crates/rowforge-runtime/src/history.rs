use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use rand::Rng;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;

use rowforge_core::{Row, RowId, RowPointer, RowRef};
use rowforge_recipe::{SCOPE_CURRENT_ITERATION, SCOPE_PRIOR_AND_CURRENT_ITERATIONS};

use crate::errors::{Result, RuntimeError};
use crate::unique::UniqueRange;

/// Which earlier rows a random reference may pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReferenceScope {
    #[default]
    CurrentIteration,
    PriorAndCurrentIterations,
}

impl ReferenceScope {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        raw.map_or(Ok(ReferenceScope::CurrentIteration), str::parse)
    }
}

impl FromStr for ReferenceScope {
    type Err = RuntimeError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            SCOPE_CURRENT_ITERATION => Ok(ReferenceScope::CurrentIteration),
            SCOPE_PRIOR_AND_CURRENT_ITERATIONS => Ok(ReferenceScope::PriorAndCurrentIterations),
            other => Err(RuntimeError::UnknownScope(other.to_string())),
        }
    }
}

/// Highest identifier and per-nickname sequence saved for each table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryCounters {
    tables: HashMap<String, TableCounters>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TableCounters {
    max_id: RowId,
    aliases: HashMap<String, u64>,
}

impl HistoryCounters {
    pub fn max_id(&self, table: &str) -> RowId {
        self.tables.get(table).map_or(0, |counters| counters.max_id)
    }

    pub fn alias_seq(&self, table: &str, alias: &str) -> u64 {
        self.tables
            .get(table)
            .and_then(|counters| counters.aliases.get(alias))
            .copied()
            .unwrap_or(0)
    }
}

/// Ephemeral store of every row produced in this process.
///
/// Rows live in an in-memory SQLite database, one SQL table per data table,
/// keyed by identifier with a unique `(alias, alias_seq)` index. Rows are
/// stored as JSON with references reduced to pointers.
pub struct RowHistory {
    conn: Connection,
    sql_tables: HashMap<String, String>,
    alias_tables: HashMap<String, String>,
    counters: HistoryCounters,
    unique: HashMap<(String, ReferenceScope), UniqueRange>,
    warned_prior_scope: bool,
}

impl RowHistory {
    pub fn new() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            sql_tables: HashMap::new(),
            alias_tables: HashMap::new(),
            counters: HistoryCounters::default(),
            unique: HashMap::new(),
            warned_prior_scope: false,
        })
    }

    pub fn counters(&self) -> &HistoryCounters {
        &self.counters
    }

    /// Table a nickname was saved under, if any row used it.
    pub fn nickname_table(&self, alias: &str) -> Option<&str> {
        self.alias_tables.get(alias).map(String::as_str)
    }

    pub fn save(&mut self, table: &str, alias: Option<&str>, row: &Row) -> Result<()> {
        let sql_table = self.ensure_table(table)?;
        let counters = self.counters.tables.entry(table.to_string()).or_default();

        let alias_seq = match alias {
            Some(alias) => {
                let seq = counters.aliases.entry(alias.to_string()).or_insert(0);
                *seq += 1;
                self.alias_tables
                    .insert(alias.to_string(), table.to_string());
                Some(sql_id(*seq)?)
            }
            None => None,
        };
        counters.max_id = counters.max_id.max(row.id());

        let data = serde_json::to_string(row)?;
        let mut statement = self.conn.prepare_cached(&format!(
            "INSERT INTO {sql_table} (id, alias, alias_seq, data) VALUES (?1, ?2, ?3, ?4)"
        ))?;
        statement.execute(params![sql_id(row.id())?, alias, alias_seq, data])?;
        Ok(())
    }

    /// Pick a random earlier row of `name` (a nickname or a table).
    ///
    /// Table picks return an unresolved pointer without loading the row.
    /// Nickname picks go through the per-nickname sequence and return the
    /// loaded row.
    pub fn random_reference<R: Rng + ?Sized>(
        &mut self,
        name: &str,
        scope: ReferenceScope,
        unique: bool,
        baseline: &HistoryCounters,
        rng: &mut R,
    ) -> Result<RowRef> {
        if scope == ReferenceScope::PriorAndCurrentIterations && !self.warned_prior_scope {
            self.warned_prior_scope = true;
            warn!(
                scope = SCOPE_PRIOR_AND_CURRENT_ITERATIONS,
                "random references across iterations are experimental"
            );
        }

        if let Some(table) = self.alias_tables.get(name).cloned() {
            if unique {
                return Err(RuntimeError::UniqueAlias(name.to_string()));
            }
            let high = self.counters.alias_seq(&table, name);
            let low = lower_bound(scope, baseline.alias_seq(&table, name), high);
            let seq = rng.random_range(low..=high);
            return self.load_by_alias(&table, name, seq).map(RowRef::Resolved);
        }

        let high = self.counters.max_id(name);
        if high == 0 {
            return Err(RuntimeError::MissingName(name.to_string()));
        }
        let low = lower_bound(scope, baseline.max_id(name), high);

        let id = if unique {
            let key = (name.to_string(), scope);
            let mut picker = self.unique.remove(&key).unwrap_or_default();
            let picked = self.draw_unique(&mut picker, name, low, high, rng);
            self.unique.insert(key, picker);
            picked?
        } else {
            let saved = self.count_saved(name, low, high)?;
            if saved == 0 {
                return Err(RuntimeError::ConsistencyViolation(format!(
                    "no saved {name} row between {low} and {high}"
                )));
            }
            let offset = rng.random_range(0..saved);
            self.nth_saved_id(name, low, high, offset)?.ok_or_else(|| {
                RuntimeError::ConsistencyViolation(format!(
                    "{name} history lost a row between {low} and {high}"
                ))
            })?
        };

        Ok(RowRef::Unresolved(RowPointer::new(name, id)))
    }

    fn draw_unique<R: Rng + ?Sized>(
        &self,
        picker: &mut UniqueRange,
        table: &str,
        low: RowId,
        high: RowId,
        rng: &mut R,
    ) -> Result<RowId> {
        loop {
            let candidate = picker
                .next(low, high, rng)
                .ok_or_else(|| RuntimeError::UniqueExhausted(table.to_string()))?;
            if self.contains(table, candidate)? {
                return Ok(candidate);
            }
        }
    }

    /// Load a row by identifier; absence means the history is corrupt.
    pub fn load(&self, table: &str, id: RowId) -> Result<Arc<Row>> {
        self.try_load(table, id)?.ok_or_else(|| {
            RuntimeError::ConsistencyViolation(format!("{table}({id}) is missing from row history"))
        })
    }

    pub fn try_load(&self, table: &str, id: RowId) -> Result<Option<Arc<Row>>> {
        let Some(sql_table) = self.sql_tables.get(table) else {
            return Ok(None);
        };
        let mut statement = self
            .conn
            .prepare_cached(&format!("SELECT data FROM {sql_table} WHERE id = ?1"))?;
        let data: Option<String> = statement
            .query_row(params![sql_id(id)?], |row| row.get(0))
            .optional()?;
        data.map(|data| decode_row(&data)).transpose()
    }

    pub fn load_by_alias(&self, table: &str, alias: &str, seq: u64) -> Result<Arc<Row>> {
        let missing = || {
            RuntimeError::ConsistencyViolation(format!(
                "row {seq} of nickname {alias} is missing from {table} history"
            ))
        };
        let sql_table = self.sql_tables.get(table).ok_or_else(missing)?;
        let mut statement = self.conn.prepare_cached(&format!(
            "SELECT data FROM {sql_table} WHERE alias = ?1 AND alias_seq = ?2"
        ))?;
        let data: Option<String> = statement
            .query_row(params![alias, sql_id(seq)?], |row| row.get(0))
            .optional()?;
        decode_row(&data.ok_or_else(missing)?)
    }

    pub fn contains(&self, table: &str, id: RowId) -> Result<bool> {
        let Some(sql_table) = self.sql_tables.get(table) else {
            return Ok(false);
        };
        let mut statement = self
            .conn
            .prepare_cached(&format!("SELECT 1 FROM {sql_table} WHERE id = ?1"))?;
        Ok(statement
            .query_row(params![sql_id(id)?], |_| Ok(()))
            .optional()?
            .is_some())
    }

    /// Number of saved rows with identifiers in `low..=high`.
    fn count_saved(&self, table: &str, low: RowId, high: RowId) -> Result<u64> {
        let Some(sql_table) = self.sql_tables.get(table) else {
            return Ok(0);
        };
        let mut statement = self.conn.prepare_cached(&format!(
            "SELECT COUNT(*) FROM {sql_table} WHERE id BETWEEN ?1 AND ?2"
        ))?;
        let count: i64 =
            statement.query_row(params![sql_id(low)?, sql_id(high)?], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// The `offset`-th saved identifier in `low..=high`, in identifier order.
    fn nth_saved_id(
        &self,
        table: &str,
        low: RowId,
        high: RowId,
        offset: u64,
    ) -> Result<Option<RowId>> {
        let Some(sql_table) = self.sql_tables.get(table) else {
            return Ok(None);
        };
        let mut statement = self.conn.prepare_cached(&format!(
            "SELECT id FROM {sql_table} WHERE id BETWEEN ?1 AND ?2 ORDER BY id LIMIT 1 OFFSET ?3"
        ))?;
        let id: Option<i64> = statement
            .query_row(
                params![sql_id(low)?, sql_id(high)?, sql_id(offset)?],
                |row| row.get(0),
            )
            .optional()?;
        id.map(|id| {
            RowId::try_from(id).map_err(|_| {
                RuntimeError::ConsistencyViolation(format!("negative identifier {id} in {table}"))
            })
        })
        .transpose()
    }

    fn ensure_table(&mut self, table: &str) -> Result<String> {
        if let Some(sql_table) = self.sql_tables.get(table) {
            return Ok(sql_table.clone());
        }
        let sql_table = format!("history_{}", self.sql_tables.len());
        self.conn.execute_batch(&format!(
            "CREATE TABLE {sql_table} (
                id INTEGER PRIMARY KEY,
                alias TEXT,
                alias_seq INTEGER,
                data TEXT NOT NULL
            );
            CREATE UNIQUE INDEX {sql_table}_alias ON {sql_table} (alias, alias_seq);"
        ))?;
        self.sql_tables.insert(table.to_string(), sql_table.clone());
        Ok(sql_table)
    }
}

fn lower_bound(scope: ReferenceScope, watermark: u64, high: u64) -> u64 {
    let low = match scope {
        ReferenceScope::CurrentIteration => watermark + 1,
        ReferenceScope::PriorAndCurrentIterations => 1,
    };
    // nothing new this iteration: fall back to the whole table
    if low > high { 1 } else { low }
}

fn decode_row(data: &str) -> Result<Arc<Row>> {
    Ok(Arc::new(serde_json::from_str(data)?))
}

fn sql_id(id: u64) -> Result<i64> {
    i64::try_from(id)
        .map_err(|_| RuntimeError::InvalidValue(format!("identifier {id} does not fit in SQLite")))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rowforge_core::FieldValue;

    use super::*;

    fn row(table: &str, id: RowId) -> Row {
        let mut row = Row::new(table, id, 0);
        row.insert("label", FieldValue::Text(format!("{table}-{id}")));
        row
    }

    #[test]
    fn saved_rows_load_back_with_pointers() {
        let mut history = RowHistory::new().unwrap();
        let parent = Arc::new(row("Parent", 1));
        let mut child = row("Child", 1);
        child.insert("parent", FieldValue::reference(parent));
        history.save("Child", None, &child).unwrap();

        let loaded = history.load("Child", 1).unwrap();
        assert_eq!(loaded.field("label"), Some(FieldValue::from("Child-1")));
        let reference = loaded.value("parent").and_then(FieldValue::as_reference).unwrap();
        assert!(!reference.is_resolved());
        assert_eq!(reference.pointer(), RowPointer::new("Parent", 1));

        assert!(history.try_load("Child", 2).unwrap().is_none());
        assert!(matches!(
            history.load("Child", 2),
            Err(RuntimeError::ConsistencyViolation(_))
        ));
    }

    #[test]
    fn current_iteration_picks_stay_above_watermark() {
        let mut history = RowHistory::new().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for id in 1..=9 {
            history.save("Parent", None, &row("Parent", id)).unwrap();
        }
        let baseline = history.counters().clone();
        for id in 10..=12 {
            history.save("Parent", None, &row("Parent", id)).unwrap();
        }

        for _ in 0..50 {
            let picked = history
                .random_reference(
                    "Parent",
                    ReferenceScope::CurrentIteration,
                    false,
                    &baseline,
                    &mut rng,
                )
                .unwrap();
            assert!((10..=12).contains(&picked.id()), "picked {}", picked.id());
        }
    }

    #[test]
    fn gaps_in_saved_identifiers_do_not_bias_picks() {
        let mut history = RowHistory::new().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        history.save("Parent", None, &row("Parent", 1)).unwrap();
        for id in 5..=7 {
            history.save("Parent", None, &row("Parent", id)).unwrap();
        }
        let baseline = HistoryCounters::default();

        let mut counts: HashMap<RowId, u32> = HashMap::new();
        for _ in 0..4000 {
            let picked = history
                .random_reference(
                    "Parent",
                    ReferenceScope::PriorAndCurrentIterations,
                    false,
                    &baseline,
                    &mut rng,
                )
                .unwrap();
            *counts.entry(picked.id()).or_default() += 1;
        }
        let mut ids: Vec<RowId> = counts.keys().copied().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 5, 6, 7]);
        for (id, count) in &counts {
            assert!((800..=1200).contains(count), "Parent {id} picked {count} times");
        }
    }

    #[test]
    fn empty_iteration_widens_to_whole_table() {
        let mut history = RowHistory::new().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        history.save("Parent", None, &row("Parent", 1)).unwrap();
        let baseline = history.counters().clone();

        let picked = history
            .random_reference("Parent", ReferenceScope::CurrentIteration, false, &baseline, &mut rng)
            .unwrap();
        assert_eq!(picked.id(), 1);
    }

    #[test]
    fn nickname_picks_follow_the_nickname_sequence() {
        let mut history = RowHistory::new().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for id in 1..=6 {
            let alias = (id % 3 == 0).then_some("Special");
            history.save("Thing", alias, &row("Thing", id)).unwrap();
        }
        let baseline = HistoryCounters::default();

        for _ in 0..20 {
            let picked = history
                .random_reference("Special", ReferenceScope::CurrentIteration, false, &baseline, &mut rng)
                .unwrap();
            assert!(picked.is_resolved());
            assert!(picked.id() == 3 || picked.id() == 6);
        }
        assert_eq!(history.nickname_table("Special"), Some("Thing"));
    }

    #[test]
    fn unique_picks_exhaust_the_table() {
        let mut history = RowHistory::new().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for id in 1..=3 {
            history.save("Seat", None, &row("Seat", id)).unwrap();
        }
        let baseline = HistoryCounters::default();

        let mut picked: Vec<RowId> = (0..3)
            .map(|_| {
                history
                    .random_reference("Seat", ReferenceScope::CurrentIteration, true, &baseline, &mut rng)
                    .unwrap()
                    .id()
            })
            .collect();
        picked.sort_unstable();
        assert_eq!(picked, vec![1, 2, 3]);

        assert!(matches!(
            history.random_reference("Seat", ReferenceScope::CurrentIteration, true, &baseline, &mut rng),
            Err(RuntimeError::UniqueExhausted(_))
        ));
    }

    #[test]
    fn unknown_names_and_scopes_fail() {
        let mut history = RowHistory::new().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let err = history
            .random_reference("Nope", ReferenceScope::CurrentIteration, false, &HistoryCounters::default(), &mut rng)
            .expect_err("expected missing name");
        assert_eq!(
            err.to_string(),
            "There is no table or nickname `Nope` at this point in the recipe."
        );

        let err = ReferenceScope::parse(Some("xyzzy")).expect_err("expected bad scope");
        assert!(err.to_string().starts_with("Scope must be"));
        assert_eq!(
            ReferenceScope::parse(None).unwrap(),
            ReferenceScope::CurrentIteration
        );
    }
}
