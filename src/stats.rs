use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative counters over every build call made through one engine
#[derive(Default, Debug)]
pub struct EngineStats {
    builds: AtomicU64,
    rows_processed: AtomicU64,
    rows_discarded: AtomicU64,
    null_ids_skipped: AtomicU64,
    entities_created: AtomicU64,
    links_added: AtomicU64,
}

/// Counts gathered by a single build call, folded into [`EngineStats`] once
/// the call succeeds
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildCounts {
    pub rows_processed: u64,
    pub rows_discarded: u64,
    pub null_ids_skipped: u64,
    pub entities_created: u64,
    pub links_added: u64,
}

/// Plain copy of [`EngineStats`] at one point in time
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub builds: u64,
    pub rows_processed: u64,
    pub rows_discarded: u64,
    pub null_ids_skipped: u64,
    pub entities_created: u64,
    pub links_added: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, counts: &BuildCounts) {
        self.builds.fetch_add(1, Ordering::Relaxed);
        self.rows_processed
            .fetch_add(counts.rows_processed, Ordering::Relaxed);
        self.rows_discarded
            .fetch_add(counts.rows_discarded, Ordering::Relaxed);
        self.null_ids_skipped
            .fetch_add(counts.null_ids_skipped, Ordering::Relaxed);
        self.entities_created
            .fetch_add(counts.entities_created, Ordering::Relaxed);
        self.links_added
            .fetch_add(counts.links_added, Ordering::Relaxed);
    }

    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed.load(Ordering::Relaxed)
    }

    pub fn rows_discarded(&self) -> u64 {
        self.rows_discarded.load(Ordering::Relaxed)
    }

    pub fn null_ids_skipped(&self) -> u64 {
        self.null_ids_skipped.load(Ordering::Relaxed)
    }

    pub fn entities_created(&self) -> u64 {
        self.entities_created.load(Ordering::Relaxed)
    }

    pub fn links_added(&self) -> u64 {
        self.links_added.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            builds: self.builds(),
            rows_processed: self.rows_processed(),
            rows_discarded: self.rows_discarded(),
            null_ids_skipped: self.null_ids_skipped(),
            entities_created: self.entities_created(),
            links_added: self.links_added(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_zero() {
        let stats = EngineStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_accumulates_across_builds() {
        let stats = EngineStats::new();
        let counts = BuildCounts {
            rows_processed: 4,
            rows_discarded: 1,
            null_ids_skipped: 2,
            entities_created: 6,
            links_added: 5,
        };
        stats.record(&counts);
        stats.record(&counts);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.builds, 2);
        assert_eq!(snapshot.rows_processed, 8);
        assert_eq!(snapshot.rows_discarded, 2);
        assert_eq!(snapshot.null_ids_skipped, 4);
        assert_eq!(snapshot.entities_created, 12);
        assert_eq!(snapshot.links_added, 10);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let stats = EngineStats::new();
        let counts = BuildCounts {
            rows_processed: 1,
            ..BuildCounts::default()
        };
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        stats.record(&counts);
                    }
                });
            }
        });
        assert_eq!(stats.builds(), 800);
        assert_eq!(stats.rows_processed(), 800);
    }
}
