use std::collections::BTreeMap;

use rowforge_core::{RowId, RowPointer};

use crate::errors::{Result, RuntimeError};
use crate::ids::IdManager;

/// Lifecycle of a forward-reference slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unused,
    Allocated(RowId),
    Consumed,
}

impl SlotState {
    fn label(self) -> &'static str {
        match self {
            SlotState::Unused => "unused",
            SlotState::Allocated(_) => "allocated",
            SlotState::Consumed => "consumed",
        }
    }
}

/// Placeholder for the next row of a nickname or table.
///
/// Reading the identifier before the row exists allocates it; the row that
/// later claims the slot adopts that identifier instead of a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicknameSlot {
    name: String,
    table: String,
    state: SlotState,
}

impl NicknameSlot {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            state: SlotState::Unused,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Identifier the slot stands for, allocating it on first read.
    pub fn id(&mut self, ids: &mut IdManager) -> Result<RowId> {
        match self.state {
            SlotState::Unused => {
                let id = ids.generate_id(&self.table);
                self.state = SlotState::Allocated(id);
                Ok(id)
            }
            SlotState::Allocated(id) => Ok(id),
            SlotState::Consumed => Err(self.contract_violation("read")),
        }
    }

    /// Hand the allocated identifier to the row being created.
    pub fn consume(&mut self) -> Result<RowId> {
        match self.state {
            SlotState::Allocated(id) => {
                self.state = SlotState::Consumed;
                Ok(id)
            }
            other => Err(RuntimeError::SlotContract {
                name: self.name.clone(),
                action: "consumed",
                state: other.label(),
            }),
        }
    }

    fn contract_violation(&self, action: &'static str) -> RuntimeError {
        RuntimeError::SlotContract {
            name: self.name.clone(),
            action,
            state: self.state.label(),
        }
    }
}

/// Slots for every referable name, recreated at the start of each iteration.
#[derive(Debug, Clone, Default)]
pub struct SlotRegistry {
    slots: BTreeMap<String, NicknameSlot>,
}

impl SlotRegistry {
    /// Build fresh slots for `name_slots` (name -> table). Names for which
    /// `already_bound` answers true start consumed.
    pub fn new(name_slots: &BTreeMap<String, String>, already_bound: impl Fn(&str) -> bool) -> Self {
        let slots = name_slots
            .iter()
            .map(|(name, table)| {
                let mut slot = NicknameSlot::new(name.clone(), table.clone());
                if already_bound(name) {
                    slot.state = SlotState::Consumed;
                }
                (name.clone(), slot)
            })
            .collect();
        Self { slots }
    }

    pub fn get(&self, name: &str) -> Option<&NicknameSlot> {
        self.slots.get(name)
    }

    /// Pointer for a forward reference to `name`. `None` when the name has
    /// no slot or its slot was already claimed.
    pub fn forward_reference(
        &mut self,
        name: &str,
        ids: &mut IdManager,
    ) -> Result<Option<RowPointer>> {
        let Some(slot) = self.slots.get_mut(name) else {
            return Ok(None);
        };
        if slot.state == SlotState::Consumed {
            return Ok(None);
        }
        let id = slot.id(ids)?;
        Ok(Some(RowPointer::new(slot.table.clone(), id)))
    }

    /// Claim the identifier of an allocated slot, if any.
    pub fn consume_if_allocated(&mut self, name: &str) -> Result<Option<RowId>> {
        match self.slots.get_mut(name) {
            Some(slot) if matches!(slot.state, SlotState::Allocated(_)) => slot.consume().map(Some),
            _ => Ok(None),
        }
    }

    /// Fail when any slot was allocated but never claimed by a row.
    pub fn check_filled(&self) -> Result<()> {
        let names: Vec<String> = self
            .slots
            .values()
            .filter(|slot| matches!(slot.state, SlotState::Allocated(_)))
            .map(|slot| slot.name.clone())
            .collect();
        if names.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::UnresolvedReference { names })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(name, table)| (name.to_string(), table.to_string()))
            .collect()
    }

    #[test]
    fn repeated_reads_return_the_same_identifier() {
        let mut ids = IdManager::new();
        let mut slot = NicknameSlot::new("Bar", "Bar");

        let first = slot.id(&mut ids).unwrap();
        let second = slot.id(&mut ids).unwrap();
        assert_eq!(first, second);
        assert_eq!(ids.peek("Bar"), 1);

        assert_eq!(slot.consume().unwrap(), first);
        assert_eq!(slot.state(), SlotState::Consumed);
    }

    #[test]
    fn consuming_an_unused_slot_is_a_contract_violation() {
        let mut slot = NicknameSlot::new("Bar", "Bar");
        let err = slot.consume().expect_err("expected violation");
        assert!(matches!(
            err,
            RuntimeError::SlotContract { state: "unused", .. }
        ));
    }

    #[test]
    fn unclaimed_allocations_are_reported_by_name() {
        let mut ids = IdManager::new();
        let mut registry = SlotRegistry::new(
            &names(&[("Bar", "Bar"), ("Baz", "Baz"), ("Foo", "Foo")]),
            |_| false,
        );

        registry.forward_reference("Foo", &mut ids).unwrap();
        registry.forward_reference("Baz", &mut ids).unwrap();
        registry.forward_reference("Bar", &mut ids).unwrap();
        assert_eq!(registry.consume_if_allocated("Bar").unwrap(), Some(1));

        let err = registry.check_filled().expect_err("expected failure");
        assert_eq!(err.to_string(), "Reference(s) not fulfilled: Baz,Foo");
    }

    #[test]
    fn bound_names_start_consumed() {
        let mut ids = IdManager::new();
        let mut registry =
            SlotRegistry::new(&names(&[("Acme", "Account")]), |name| name == "Acme");

        assert_eq!(registry.forward_reference("Acme", &mut ids).unwrap(), None);
        assert_eq!(registry.consume_if_allocated("Acme").unwrap(), None);
        assert!(registry.check_filled().is_ok());
        assert_eq!(ids.peek("Account"), 0);
    }
}
