use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

/// Counts newly ingested segments per event and signals every `every`-th
/// one, at which point a batch extraction should be queued.
pub struct ExtractionScheduler {
    every: u32,
    pending: Mutex<HashMap<i32, u32>>,
}

impl ExtractionScheduler {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn every(&self) -> u32 {
        self.every
    }

    /// Returns `true` when this segment completes a batch for `event_id`.
    pub fn record_segment(&self, event_id: i32) -> bool {
        let mut pending = self.lock();
        let count = pending.entry(event_id).or_insert(0);
        *count += 1;
        if *count >= self.every {
            *count = 0;
            true
        } else {
            false
        }
    }

    pub fn pending(&self, event_id: i32) -> u32 {
        self.lock().get(&event_id).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i32, u32>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
