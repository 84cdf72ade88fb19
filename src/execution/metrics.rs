use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Real-time counters and gauges for a [`super::Pool`].
///
/// The control task updates these as jobs move through the pool; callers can snapshot them
/// at any time without talking to the control task.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_timed_out: AtomicU64,
    jobs_retried: AtomicU64,
    messages_discarded: AtomicU64,
    units_spawned: AtomicU64,
    unit_faults: AtomicU64,

    total_units: AtomicUsize,
    active_jobs: AtomicUsize,
    queued_jobs: AtomicUsize,
    max_active_jobs: AtomicUsize,

    disposed: AtomicBool,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_submitted(&self) {
        let _ = self.jobs_submitted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_completed(&self) {
        let _ = self.jobs_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_failed(&self) {
        let _ = self.jobs_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_timed_out(&self) {
        let _ = self.jobs_timed_out.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_retried(&self) {
        let _ = self.jobs_retried.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_message_discarded(&self) {
        let _ = self.messages_discarded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_unit_spawned(&self) {
        let _ = self.units_spawned.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_unit_fault(&self) {
        let _ = self.unit_faults.fetch_add(1, Ordering::SeqCst);
    }

    /// Publish the control task's current occupancy.
    pub fn set_gauges(&self, total_units: usize, active_jobs: usize, queued_jobs: usize) {
        self.total_units.store(total_units, Ordering::SeqCst);
        self.active_jobs.store(active_jobs, Ordering::SeqCst);
        self.queued_jobs.store(queued_jobs, Ordering::SeqCst);
        update_max_usize(&self.max_active_jobs, active_jobs);
    }

    pub fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn total_units(&self) -> usize {
        self.total_units.load(Ordering::SeqCst)
    }

    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    pub fn queued_jobs(&self) -> usize {
        self.queued_jobs.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::SeqCst),
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::SeqCst),
            jobs_retried: self.jobs_retried.load(Ordering::SeqCst),
            messages_discarded: self.messages_discarded.load(Ordering::SeqCst),
            units_spawned: self.units_spawned.load(Ordering::SeqCst),
            unit_faults: self.unit_faults.load(Ordering::SeqCst),
            max_active_jobs: self.max_active_jobs.load(Ordering::SeqCst),
        }
    }
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    loop {
        let cur = dst.load(Ordering::SeqCst);
        if now <= cur {
            break;
        }
        if dst
            .compare_exchange(cur, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            break;
        }
    }
}

/// Immutable snapshot of [`PoolMetrics`] counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_timed_out: u64,
    pub jobs_retried: u64,
    /// Unit messages dropped because their job had been abandoned.
    pub messages_discarded: u64,
    pub units_spawned: u64,
    pub unit_faults: u64,
    pub max_active_jobs: usize,
}

impl fmt::Display for PoolMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "jobs={}/{} failed={} timed_out={} retried={} discarded={} units_spawned={} unit_faults={} max_active_jobs={}",
            self.jobs_completed,
            self.jobs_submitted,
            self.jobs_failed,
            self.jobs_timed_out,
            self.jobs_retried,
            self.messages_discarded,
            self.units_spawned,
            self.unit_faults,
            self.max_active_jobs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::PoolMetrics;

    #[test]
    fn gauges_track_the_high_water_mark() {
        let m = PoolMetrics::new();
        m.set_gauges(2, 2, 1);
        m.set_gauges(2, 1, 0);
        assert_eq!(m.active_jobs(), 1);
        assert_eq!(m.queued_jobs(), 0);
        assert_eq!(m.snapshot().max_active_jobs, 2);
    }

    #[test]
    fn snapshot_displays_counters() {
        let m = PoolMetrics::new();
        m.on_submitted();
        m.on_submitted();
        m.on_completed();
        m.on_failed();
        let text = m.snapshot().to_string();
        assert!(text.starts_with("jobs=1/2 failed=1"));
    }
}
