use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;

use rowforge_core::{Dependency, Row, RowPointer};

use crate::continuation::ContinuationSnapshot;
use crate::errors::Result;
use crate::ids::IdManager;

/// Run-chain state: survives iterations and is what a continuation carries.
#[derive(Debug, Clone)]
pub struct Globals {
    id_manager: IdManager,
    persistent_nicknames: BTreeMap<String, Arc<Row>>,
    persistent_objects_by_table: BTreeMap<String, Arc<Row>>,
    nicknames_and_tables: BTreeMap<String, String>,
    intertable_dependencies: BTreeSet<Dependency>,
    today: NaiveDate,
}

impl Globals {
    pub fn new(nicknames_and_tables: BTreeMap<String, String>, today: NaiveDate) -> Self {
        Self {
            id_manager: IdManager::new(),
            persistent_nicknames: BTreeMap::new(),
            persistent_objects_by_table: BTreeMap::new(),
            nicknames_and_tables,
            intertable_dependencies: BTreeSet::new(),
            today,
        }
    }

    /// Rebuild state from a continuation. Names declared by the current
    /// recipe but unknown to the snapshot are added to the slot map.
    pub fn from_snapshot(
        snapshot: ContinuationSnapshot,
        name_slots: &BTreeMap<String, String>,
    ) -> Result<Self> {
        snapshot.validate()?;
        let ContinuationSnapshot {
            id_manager,
            mut nicknames_and_tables,
            today,
            intertable_dependencies,
            persistent_nicknames,
            persistent_objects_by_table,
        } = snapshot;

        for (name, table) in name_slots {
            nicknames_and_tables
                .entry(name.clone())
                .or_insert_with(|| table.clone());
        }

        Ok(Self {
            id_manager: IdManager::from_last_used(id_manager),
            persistent_nicknames: into_shared(persistent_nicknames),
            persistent_objects_by_table: into_shared(persistent_objects_by_table),
            nicknames_and_tables,
            intertable_dependencies: intertable_dependencies.into_iter().collect(),
            today,
        })
    }

    /// Serializable view of the state, rows reduced to pointer form.
    pub fn snapshot(&self) -> ContinuationSnapshot {
        ContinuationSnapshot {
            id_manager: self.id_manager.last_used_ids().clone(),
            nicknames_and_tables: self.nicknames_and_tables.clone(),
            today: self.today,
            intertable_dependencies: self.intertable_dependencies.iter().cloned().collect(),
            persistent_nicknames: from_shared(&self.persistent_nicknames),
            persistent_objects_by_table: from_shared(&self.persistent_objects_by_table),
        }
    }

    pub fn id_manager(&self) -> &IdManager {
        &self.id_manager
    }

    pub fn id_manager_mut(&mut self) -> &mut IdManager {
        &mut self.id_manager
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn nicknames_and_tables(&self) -> &BTreeMap<String, String> {
        &self.nicknames_and_tables
    }

    pub fn intertable_dependencies(&self) -> &BTreeSet<Dependency> {
        &self.intertable_dependencies
    }

    pub fn register_dependency(&mut self, dependency: Dependency) {
        self.intertable_dependencies.insert(dependency);
    }

    /// Bind a long-lived row under its table and, if any, its nickname.
    pub fn register_persistent(&mut self, row: Arc<Row>, nickname: Option<&str>) {
        if let Some(nickname) = nickname {
            self.persistent_nicknames
                .insert(nickname.to_string(), Arc::clone(&row));
        }
        self.persistent_objects_by_table
            .insert(row.table().to_string(), row);
    }

    /// Long-lived row bound to a nickname or table name.
    pub fn persistent_row(&self, name: &str) -> Option<&Arc<Row>> {
        self.persistent_nicknames
            .get(name)
            .or_else(|| self.persistent_objects_by_table.get(name))
    }

    pub fn has_persistent_nickname(&self, name: &str) -> bool {
        self.persistent_nicknames.contains_key(name)
    }

    /// Long-lived rows with their nicknames, for reseeding row history.
    pub fn persistent_rows(&self) -> impl Iterator<Item = (Option<&str>, &Arc<Row>)> {
        let nicknamed = self
            .persistent_nicknames
            .iter()
            .map(|(nickname, row)| (Some(nickname.as_str()), row));
        let by_table = self
            .persistent_objects_by_table
            .values()
            .filter(|row| {
                !self
                    .persistent_nicknames
                    .values()
                    .any(|nicknamed| nicknamed.pointer() == row.pointer())
            })
            .map(|row| (None, row));
        nicknamed.chain(by_table)
    }

    pub fn find_bound_row(&self, pointer: &RowPointer) -> Option<Arc<Row>> {
        self.persistent_nicknames
            .values()
            .chain(self.persistent_objects_by_table.values())
            .find(|row| row.id() == pointer.id && row.table() == pointer.table)
            .cloned()
    }
}

fn into_shared(rows: BTreeMap<String, Row>) -> BTreeMap<String, Arc<Row>> {
    rows.into_iter()
        .map(|(name, row)| (name, Arc::new(row)))
        .collect()
}

fn from_shared(rows: &BTreeMap<String, Arc<Row>>) -> BTreeMap<String, Row> {
    rows.iter()
        .map(|(name, row)| (name.clone(), Row::clone(row)))
        .collect()
}

#[cfg(test)]
mod tests {
    use rowforge_core::FieldValue;

    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn snapshot_round_trip_keeps_counters_and_bindings() {
        let names = BTreeMap::from([("Acme".to_string(), "Account".to_string())]);
        let mut globals = Globals::new(names.clone(), today());
        let id = globals.id_manager_mut().generate_id("Account");
        let mut row = Row::new("Account", id, 0);
        row.insert("name", FieldValue::from("Acme Corp"));
        globals.register_persistent(Arc::new(row), Some("Acme"));
        globals.register_dependency(Dependency::new("Contact", "Account", "account"));
        globals.register_dependency(Dependency::new("Contact", "Account", "account"));

        let restored = Globals::from_snapshot(globals.snapshot(), &names).unwrap();
        assert_eq!(restored.id_manager().peek("Account"), 1);
        assert_eq!(restored.intertable_dependencies().len(), 1);
        assert_eq!(
            restored.persistent_row("Acme").and_then(|row| row.field("name")),
            Some(FieldValue::from("Acme Corp"))
        );
        assert!(restored.persistent_row("Account").is_some());
        assert_eq!(restored.persistent_rows().count(), 1);
    }

    #[test]
    fn restored_slot_map_includes_new_recipe_names() {
        let globals = Globals::new(BTreeMap::new(), today());
        let names = BTreeMap::from([("Lead".to_string(), "Lead".to_string())]);

        let restored = Globals::from_snapshot(globals.snapshot(), &names).unwrap();
        assert_eq!(
            restored.nicknames_and_tables().get("Lead").map(String::as_str),
            Some("Lead")
        );
    }
}
