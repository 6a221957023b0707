//! Status - プールの集計

use serde::{Deserialize, Serialize};

use crate::domain::{StoreError, TaskRecord, TaskState};
use crate::ports::TaskStore;

/// Task counts by derived state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCounts {
    pub unlocked: usize,
    pub locked: usize,
    pub completed: usize,
    pub total: usize,
}

impl PoolCounts {
    fn add(&mut self, record: &TaskRecord) {
        match record.state() {
            TaskState::Unlocked => self.unlocked += 1,
            TaskState::Locked => self.locked += 1,
            TaskState::Completed => self.completed += 1,
        }
        self.total += 1;
    }
}

/// Count every readable record in one scan.
pub async fn pool_status(store: &dyn TaskStore) -> Result<PoolCounts, StoreError> {
    let all = |_: &TaskRecord| true;
    let records = store.scan(&all).await?;

    let mut counts = PoolCounts::default();
    for record in &records {
        counts.add(record);
    }
    Ok(counts)
}
