use rand::Rng;
use rand::seq::SliceRandom;

use rowforge_core::RowId;

/// Draws identifiers from `low..=high` without replacement.
///
/// When only the upper bound grows, the values already shuffled are handed
/// out before the new ones. Moving the lower bound starts over.
#[derive(Debug, Clone, Default)]
pub struct UniqueRange {
    bounds: Option<(RowId, RowId)>,
    pending: Vec<RowId>,
}

impl UniqueRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next<R: Rng + ?Sized>(&mut self, low: RowId, high: RowId, rng: &mut R) -> Option<RowId> {
        let drawn_up_to = match self.bounds {
            Some((current_low, current_high)) if current_low == low && current_high <= high => {
                current_high
            }
            _ => {
                self.pending.clear();
                low.saturating_sub(1)
            }
        };

        if high > drawn_up_to {
            let mut batch: Vec<RowId> = (drawn_up_to + 1..=high).collect();
            batch.shuffle(rng);
            // pending is consumed from the back, so older values go last
            batch.append(&mut self.pending);
            self.pending = batch;
        }
        self.bounds = Some((low, high.max(drawn_up_to)));

        self.pending.pop()
    }
}
