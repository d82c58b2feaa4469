use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
    time::Duration,
};
use tokio::time::Instant;

/// Counts failures over a trailing window.
#[derive(Debug)]
pub(crate) struct FailureCounter {
    window: Duration,
    failures: Mutex<VecDeque<Instant>>,
}

impl FailureCounter {
    pub(crate) const fn new(window: Duration) -> Self {
        Self { window, failures: Mutex::new(VecDeque::new()) }
    }

    pub(crate) fn record(&self) {
        let now = Instant::now();
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        Self::expire(&mut failures, now, self.window);
        failures.push_back(now);
    }

    pub(crate) fn count(&self) -> usize {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        Self::expire(&mut failures, Instant::now(), self.window);
        failures.len()
    }

    fn expire(failures: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while failures.front().is_some_and(|at| now.duration_since(*at) > window) {
            failures.pop_front();
        }
    }
}
