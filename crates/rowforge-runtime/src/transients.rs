use std::collections::HashMap;
use std::sync::Arc;

use rowforge_core::{Row, RowPointer};

use crate::errors::Result;
use crate::globals::Globals;
use crate::history::HistoryCounters;
use crate::slots::SlotRegistry;

/// Iteration-local state, discarded at the end of every pass.
#[derive(Debug, Clone, Default)]
pub struct Transients {
    slots: SlotRegistry,
    nicknamed_objects: HashMap<String, Arc<Row>>,
    last_seen_by_table: HashMap<String, Arc<Row>>,
    watermark: HistoryCounters,
}

impl Transients {
    /// Fresh slots for every name in `globals`, plus the history counters
    /// as they stood when the iteration began.
    pub fn new(globals: &Globals, watermark: HistoryCounters) -> Self {
        let slots = SlotRegistry::new(globals.nicknames_and_tables(), |name| {
            globals.has_persistent_nickname(name)
        });
        Self {
            slots,
            nicknamed_objects: HashMap::new(),
            last_seen_by_table: HashMap::new(),
            watermark,
        }
    }

    pub fn slots(&self) -> &SlotRegistry {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut SlotRegistry {
        &mut self.slots
    }

    pub fn watermark(&self) -> &HistoryCounters {
        &self.watermark
    }

    pub fn register(&mut self, row: Arc<Row>, nickname: Option<&str>) {
        if let Some(nickname) = nickname {
            self.nicknamed_objects
                .insert(nickname.to_string(), Arc::clone(&row));
        }
        self.last_seen_by_table.insert(row.table().to_string(), row);
    }

    /// Row bound in this iteration to a nickname or table name.
    pub fn bound_row(&self, name: &str) -> Option<&Arc<Row>> {
        self.nicknamed_objects
            .get(name)
            .or_else(|| self.last_seen_by_table.get(name))
    }

    pub fn find_bound_row(&self, pointer: &RowPointer) -> Option<Arc<Row>> {
        self.last_seen_by_table
            .get(&pointer.table)
            .filter(|row| row.id() == pointer.id)
            .or_else(|| {
                self.nicknamed_objects
                    .values()
                    .find(|row| row.id() == pointer.id && row.table() == pointer.table)
            })
            .cloned()
    }

    pub fn check_slots_filled(&self) -> Result<()> {
        self.slots.check_filled()
    }
}
