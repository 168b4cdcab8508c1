use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use rowforge_core::RowId;

/// Per-table identifier counters.
///
/// Identifiers are issued as `last + 1` and never reused within a run
/// chain. The counters serialize to a plain `table -> last issued` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdManager {
    last_used_ids: BTreeMap<String, RowId>,
}

impl IdManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrate counters from a snapshot, verbatim.
    pub fn from_last_used(last_used_ids: BTreeMap<String, RowId>) -> Self {
        Self { last_used_ids }
    }

    /// Issue the next identifier for `table`.
    pub fn generate_id(&mut self, table: &str) -> RowId {
        if let Some(counter) = self.last_used_ids.get_mut(table) {
            *counter += 1;
            return *counter;
        }
        self.last_used_ids.insert(table.to_string(), 1);
        1
    }

    /// Last identifier issued for `table`, 0 if none.
    pub fn peek(&self, table: &str) -> RowId {
        self.last_used_ids.get(table).copied().unwrap_or(0)
    }

    pub fn last_used_ids(&self) -> &BTreeMap<String, RowId> {
        &self.last_used_ids
    }

    /// First identifier each table will issue next.
    pub fn start_ids(&self) -> BTreeMap<String, RowId> {
        self.last_used_ids
            .iter()
            .map(|(table, last)| (table.clone(), last + 1))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_sequential_per_table() {
        let mut ids = IdManager::new();
        assert_eq!(ids.generate_id("Account"), 1);
        assert_eq!(ids.generate_id("Account"), 2);
        assert_eq!(ids.generate_id("Contact"), 1);
        assert_eq!(ids.peek("Account"), 2);
        assert_eq!(ids.peek("Lead"), 0);
    }

    #[test]
    fn snapshot_continues_without_gaps() {
        let mut ids = IdManager::new();
        for _ in 0..5 {
            ids.generate_id("Account");
        }

        let yaml = serde_yaml_ng::to_string(&ids).expect("serialize");
        let mut restored: IdManager = serde_yaml_ng::from_str(&yaml).expect("deserialize");
        assert_eq!(restored, ids);
        assert_eq!(restored.start_ids().get("Account"), Some(&6));
        assert_eq!(restored.generate_id("Account"), 6);
    }
}
