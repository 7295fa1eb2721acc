use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct StoreCounters {
    lookups: AtomicU64,
    loads: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    flushes: AtomicU64,
    tx_begin: AtomicU64,
    tx_commit: AtomicU64,
    tx_rollback: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCountersSnapshot {
    pub lookup_count: u64,
    pub load_count: u64,
    pub insert_count: u64,
    pub update_count: u64,
    pub flush_count: u64,
    pub tx_begin_count: u64,
    pub tx_commit_count: u64,
    pub tx_rollback_count: u64,
}

impl StoreCounters {
    pub fn snapshot(&self) -> StoreCountersSnapshot {
        StoreCountersSnapshot {
            lookup_count: self.lookups.load(Ordering::Relaxed),
            load_count: self.loads.load(Ordering::Relaxed),
            insert_count: self.inserts.load(Ordering::Relaxed),
            update_count: self.updates.load(Ordering::Relaxed),
            flush_count: self.flushes.load(Ordering::Relaxed),
            tx_begin_count: self.tx_begin.load(Ordering::Relaxed),
            tx_commit_count: self.tx_commit.load(Ordering::Relaxed),
            tx_rollback_count: self.tx_rollback.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.lookups.store(0, Ordering::Relaxed);
        self.loads.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.updates.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
        self.tx_begin.store(0, Ordering::Relaxed);
        self.tx_commit.store(0, Ordering::Relaxed);
        self.tx_rollback.store(0, Ordering::Relaxed);
    }

    pub fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_begin(&self) {
        self.tx_begin.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.tx_commit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.tx_rollback.fetch_add(1, Ordering::Relaxed);
    }
}
