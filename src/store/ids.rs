/// Identifier generation for runs and tasks
///
/// Run IDs come from a logical clock seeded by wall-clock microseconds. Task IDs are
/// a per-(flow, run) sequence whose starting point is recovered from disk the first
/// time a run is seen by this process.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Strictly increasing clock: `max(now, last + 1)` on every tick
///
/// Survives wall-clock stalls, backwards steps and several ticks within one clock
/// unit. One instance issues run IDs (microseconds), another issues metadata
/// registration timestamps (milliseconds).
#[derive(Debug)]
pub struct LogicalClock {
    last: Mutex<u64>,
    source: fn() -> u64,
}

impl LogicalClock {
    /// Clock over wall-clock microseconds, used for run IDs
    pub fn micros() -> Self {
        Self::with_source(wall_micros)
    }

    /// Clock over wall-clock milliseconds
    pub fn millis() -> Self {
        Self::with_source(wall_millis)
    }

    pub fn with_source(source: fn() -> u64) -> Self {
        Self {
            last: Mutex::new(0),
            source,
        }
    }

    /// Issue the next value; never equal to or below any value issued before
    pub fn tick(&self) -> u64 {
        let mut last = self.last.lock();
        let next = (self.source)().max(*last + 1);
        *last = next;
        next
    }
}

/// Task ID counters keyed by (flow, run)
///
/// One mutex covers the whole map: the disk seed scan and every increment for a
/// key happen inside the same critical section.
#[derive(Debug, Default)]
pub struct TaskIdAllocator {
    counters: Mutex<HashMap<(String, String), u64>>,
}

impl TaskIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next task ID for `(flow, run)`
    ///
    /// `seed` runs at most once per key for the lifetime of the allocator and must
    /// return the highest task ID already present on disk (0 when none).
    pub fn next_id<F>(&self, flow: &str, run: &str, seed: F) -> u64
    where
        F: FnOnce() -> u64,
    {
        let mut counters = self.counters.lock();
        let counter = counters
            .entry((flow.to_string(), run.to_string()))
            .or_insert_with(|| {
                let start = seed();
                tracing::debug!("Seeded task counter for {}/{} at {}", flow, run, start);
                start
            });
        *counter += 1;
        *counter
    }
}

fn wall_micros() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0)
}

fn wall_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
