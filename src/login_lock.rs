use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Counts failed logins per subject and locks subjects out after too many failures.
///
/// Counters live in a concurrent map and are only ever touched through atomic operations,
/// so no lock is held across a request.
#[derive(Debug)]
pub struct LoginLock {
    failures: DashMap<String, AtomicU32>,
    threshold: u32,
}

impl LoginLock {
    /// Create a lock that refuses subjects with more than `threshold` failed attempts.
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: DashMap::new(),
            threshold,
        }
    }

    /// Returns true if `subject` has more than the allowed number of failed attempts.
    pub fn is_locked(&self, subject: &str) -> bool {
        self.failures(subject) > self.threshold
    }

    /// The number of failed attempts recorded for `subject`.
    pub fn failures(&self, subject: &str) -> u32 {
        self.failures
            .get(subject)
            .map(|counter| counter.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Records a failed attempt, returning the new count.
    pub fn record_failure(&self, subject: &str) -> u32 {
        if let Some(counter) = self.failures.get(subject) {
            return counter.fetch_add(1, Ordering::AcqRel) + 1;
        }
        self.failures
            .entry(subject.to_owned())
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::AcqRel)
            + 1
    }

    /// Forgets all failed attempts of `subject`.
    pub fn reset(&self, subject: &str) {
        self.failures.remove(subject);
    }
}
