use std::collections::BTreeMap;

use rowforge_core::RowId;
use rowforge_recipe::StoppingCriteria;

use crate::errors::{Result, RuntimeError};
use crate::ids::IdManager;

/// Decides after each pass whether the run has produced enough rows.
#[derive(Debug, Clone)]
pub struct FinishedChecker {
    criteria: Option<StoppingCriteria>,
    start_ids: BTreeMap<String, RowId>,
    previous: RowId,
}

impl FinishedChecker {
    /// `start_ids` holds the first identifier of this run per table; tables
    /// missing from it start at 1.
    pub fn new(
        criteria: Option<StoppingCriteria>,
        start_ids: BTreeMap<String, RowId>,
        ids: &IdManager,
    ) -> Self {
        let previous = criteria
            .as_ref()
            .map_or(0, |criteria| ids.peek(&criteria.table));
        Self {
            criteria,
            start_ids,
            previous,
        }
    }

    /// Last identifier the stopping table must reach.
    pub fn target(&self) -> Option<RowId> {
        self.criteria.as_ref().map(|criteria| {
            let start = self.start_ids.get(&criteria.table).copied().unwrap_or(1);
            start.saturating_add(criteria.count).saturating_sub(1)
        })
    }

    pub fn check(&mut self, ids: &IdManager) -> Result<bool> {
        let (Some(criteria), Some(target)) = (self.criteria.as_ref(), self.target()) else {
            return Ok(true);
        };

        let current = ids.peek(&criteria.table);
        if current == self.previous {
            return Err(RuntimeError::NoProgress {
                table: criteria.table.clone(),
                previous: self.previous,
                current,
                target,
            });
        }
        self.previous = current;
        Ok(current >= target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_criteria_finishes_after_one_pass() {
        let mut checker = FinishedChecker::new(None, BTreeMap::new(), &IdManager::new());
        assert!(checker.check(&IdManager::new()).unwrap());
    }

    #[test]
    fn stops_once_target_is_reached() {
        let mut ids = IdManager::new();
        let mut checker = FinishedChecker::new(
            Some(StoppingCriteria::new("Account", 3)),
            BTreeMap::new(),
            &ids,
        );

        ids.generate_id("Account");
        assert!(!checker.check(&ids).unwrap());
        ids.generate_id("Account");
        ids.generate_id("Account");
        assert!(checker.check(&ids).unwrap());
    }

    #[test]
    fn continuation_targets_are_relative_to_start() {
        let mut ids = IdManager::from_last_used(BTreeMap::from([("Account".to_string(), 5)]));
        let mut checker = FinishedChecker::new(
            Some(StoppingCriteria::new("Account", 5)),
            ids.start_ids(),
            &ids,
        );
        assert_eq!(checker.target(), Some(10));

        for _ in 0..5 {
            ids.generate_id("Account");
        }
        assert!(checker.check(&ids).unwrap());
    }

    #[test]
    fn huge_targets_saturate_instead_of_overflowing() {
        let ids = IdManager::from_last_used(BTreeMap::from([("Account".to_string(), 3)]));
        let checker = FinishedChecker::new(
            Some(StoppingCriteria::new("Account", u64::MAX)),
            ids.start_ids(),
            &ids,
        );
        assert_eq!(checker.target(), Some(u64::MAX - 1));
    }

    #[test]
    fn stalled_table_is_reported() {
        let ids = IdManager::new();
        let mut checker =
            FinishedChecker::new(Some(StoppingCriteria::new("Orphan", 5)), BTreeMap::new(), &ids);

        let err = checker.check(&ids).expect_err("expected no progress");
        assert_eq!(
            err.to_string(),
            "Orphan max ID was 0 before evaluating recipe and is 0 after. At this rate we will never hit our target of 5!"
        );
    }
}
