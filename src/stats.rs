use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::call::CallStatus;

/// Power-of-two latency buckets, 1 µs up to ~8 s.
pub const HISTOGRAM_BUCKETS: usize = 24;

fn bucket_for(micros: u64) -> usize {
    (micros.max(1).ilog2() as usize).min(HISTOGRAM_BUCKETS - 1)
}

/// Lower bound in microseconds of a histogram bucket.
pub fn bucket_floor_micros(bucket: usize) -> u64 {
    1u64 << bucket.min(HISTOGRAM_BUCKETS - 1)
}

#[derive(Default)]
struct Counters {
    invocations: AtomicU64,
    errors: AtomicU64,
    aborts: AtomicU64,
    timeouts: AtomicU64,
    total_elapsed_micros: AtomicU64,
    histogram: [AtomicU64; HISTOGRAM_BUCKETS],
}

impl Counters {
    fn snapshot(&self) -> ProcedureStatistics {
        let mut histogram = [0u64; HISTOGRAM_BUCKETS];
        for (out, bucket) in histogram.iter_mut().zip(&self.histogram) {
            *out = bucket.load(Ordering::Relaxed);
        }
        ProcedureStatistics {
            invocations: self.invocations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            total_elapsed_micros: self.total_elapsed_micros.load(Ordering::Relaxed),
            histogram,
        }
    }
}

/// Counters for one procedure on one connection, or an aggregate thereof.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcedureStatistics {
    pub invocations: u64,
    pub errors: u64,
    pub aborts: u64,
    pub timeouts: u64,
    pub total_elapsed_micros: u64,
    pub histogram: [u64; HISTOGRAM_BUCKETS],
}

impl ProcedureStatistics {
    pub fn completions(&self) -> u64 {
        self.histogram.iter().sum()
    }

    pub fn mean_elapsed_micros(&self) -> Option<u64> {
        let completions = self.completions();
        (completions > 0).then(|| self.total_elapsed_micros / completions)
    }

    pub fn merge(&mut self, other: &ProcedureStatistics) {
        self.invocations += other.invocations;
        self.errors += other.errors;
        self.aborts += other.aborts;
        self.timeouts += other.timeouts;
        self.total_elapsed_micros += other.total_elapsed_micros;
        for (bucket, add) in self.histogram.iter_mut().zip(&other.histogram) {
            *bucket += add;
        }
    }

    fn minus(&self, base: &ProcedureStatistics) -> ProcedureStatistics {
        let mut histogram = [0u64; HISTOGRAM_BUCKETS];
        for ((out, lhs), rhs) in histogram.iter_mut().zip(&self.histogram).zip(&base.histogram) {
            *out = lhs.saturating_sub(*rhs);
        }
        ProcedureStatistics {
            invocations: self.invocations.saturating_sub(base.invocations),
            errors: self.errors.saturating_sub(base.errors),
            aborts: self.aborts.saturating_sub(base.aborts),
            timeouts: self.timeouts.saturating_sub(base.timeouts),
            total_elapsed_micros: self
                .total_elapsed_micros
                .saturating_sub(base.total_elapsed_micros),
            histogram,
        }
    }
}

/// A point-in-time view of per-procedure counters.
#[derive(Debug, Clone, Default)]
pub struct StatisticsSnapshot {
    pub procedures: HashMap<String, ProcedureStatistics>,
}

impl StatisticsSnapshot {
    pub fn get(&self, procedure: &str) -> Option<&ProcedureStatistics> {
        self.procedures.get(procedure)
    }

    pub fn merge(&mut self, other: &StatisticsSnapshot) {
        for (procedure, stats) in &other.procedures {
            self.procedures
                .entry(procedure.clone())
                .or_default()
                .merge(stats);
        }
    }

    /// Sum over every procedure.
    pub fn total(&self) -> ProcedureStatistics {
        let mut total = ProcedureStatistics::default();
        for stats in self.procedures.values() {
            total.merge(stats);
        }
        total
    }
}

/// Live statistics of one connection. Only allocated when statistics are
/// enabled; a disabled connection carries no stats handle at all, so the
/// hot paths stay counter-free.
pub(crate) struct ConnectionStats {
    procedures: Mutex<HashMap<String, Arc<Counters>>>,
    // all-time values at the moment of the last reset
    baseline: Mutex<HashMap<String, ProcedureStatistics>>,
}

impl ConnectionStats {
    pub fn new() -> Self {
        ConnectionStats {
            procedures: Mutex::new(HashMap::new()),
            baseline: Mutex::new(HashMap::new()),
        }
    }

    fn counters(&self, procedure: &str) -> Arc<Counters> {
        let mut procedures = match self.procedures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        procedures
            .entry(procedure.to_string())
            .or_default()
            .clone()
    }

    pub fn record_submit(&self, procedure: &str) {
        self.counters(procedure)
            .invocations
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self, procedure: &str, elapsed: Duration, status: CallStatus) {
        let counters = self.counters(procedure);
        match status {
            CallStatus::Failed => counters.errors.fetch_add(1, Ordering::Relaxed),
            CallStatus::TimedOut => counters.timeouts.fetch_add(1, Ordering::Relaxed),
            CallStatus::Aborted => counters.aborts.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        counters
            .total_elapsed_micros
            .fetch_add(micros, Ordering::Relaxed);
        counters.histogram[bucket_for(micros)].fetch_add(1, Ordering::Relaxed);
    }

    /// All-time counters.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let procedures = match self.procedures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        StatisticsSnapshot {
            procedures: procedures
                .iter()
                .map(|(name, counters)| (name.clone(), counters.snapshot()))
                .collect(),
        }
    }

    /// Counters accumulated since the last reset.
    pub fn snapshot_since_reset(&self) -> StatisticsSnapshot {
        let snapshot = self.snapshot();
        let baseline = match self.baseline.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        StatisticsSnapshot {
            procedures: snapshot
                .procedures
                .into_iter()
                .map(|(name, stats)| {
                    let since = match baseline.get(&name) {
                        Some(base) => stats.minus(base),
                        None => stats,
                    };
                    (name, since)
                })
                .collect(),
        }
    }

    /// Returns the since-reset view and makes the current all-time values
    /// the new baseline. Calls still in flight keep contributing to the
    /// all-time counters only.
    pub fn snapshot_and_reset(&self) -> StatisticsSnapshot {
        let snapshot = self.snapshot();
        let mut baseline = match self.baseline.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let since = StatisticsSnapshot {
            procedures: snapshot
                .procedures
                .iter()
                .map(|(name, stats)| {
                    let since = match baseline.get(name) {
                        Some(base) => stats.minus(base),
                        None => stats.clone(),
                    };
                    (name.clone(), since)
                })
                .collect(),
        };
        *baseline = snapshot.procedures;
        since
    }
}
