//! Per-schedule mutual exclusion.
//!
//! Every read-modify-write of a schedule's rotation index or of its tasks
//! runs under that schedule's lock. Different schedules never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::ScheduleId;

#[derive(Debug, Default)]
pub struct ScheduleLocks {
    locks: Mutex<HashMap<ScheduleId, Arc<Mutex<()>>>>,
}

impl ScheduleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and returns the lock for `schedule`. Released on drop.
    pub async fn lock(&self, schedule: ScheduleId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(schedule).or_default().clone()
        };
        lock.lock_owned().await
    }
}
