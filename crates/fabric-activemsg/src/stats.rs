use std::sync::atomic::{AtomicU64, Ordering};

/// Running duration statistics for one message handler.
///
/// Each field is updated atomically, but the five fields are not updated as a
/// unit: a snapshot taken while other threads are recording may mix values
/// from different calls. The numbers are diagnostics and nothing depends on
/// them being exact.
#[derive(Debug)]
pub struct HandlerStats {
    count: AtomicU64,
    sum: AtomicU64,
    sum2: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

/// A point-in-time copy of [`HandlerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub count: u64,
    pub sum: u64,
    pub sum2: u64,
    pub min: u64,
    pub max: u64,
}

impl StatsSnapshot {
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum as f64 / self.count as f64
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let avg = self.average();
        let var = self.sum2 as f64 / self.count as f64 - avg * avg;
        // rounding can push a zero variance slightly negative
        var.max(0.0).sqrt()
    }
}

impl HandlerStats {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            sum2: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    /// Record one call that ran from `start` to `end` (nanoseconds on any
    /// monotonic clock). An `end` before `start` counts as zero.
    pub fn record(&self, start: i64, end: i64) {
        let val = end.saturating_sub(start).max(0) as u64;
        self.min.fetch_min(val, Ordering::Relaxed);
        self.max.fetch_max(val, Ordering::Relaxed);
        saturating_add(&self.sum, val);
        saturating_add(&self.sum2, val.saturating_mul(val));
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return StatsSnapshot::default();
        }
        StatsSnapshot {
            count,
            sum: self.sum.load(Ordering::Relaxed),
            sum2: self.sum2.load(Ordering::Relaxed),
            min: self.min.load(Ordering::Relaxed),
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

impl Default for HandlerStats {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_add(cell: &AtomicU64, val: u64) {
    let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
        Some(cur.saturating_add(val))
    });
}
