//! Process-wide minimum spacing between primary completion calls

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Admits at most one primary completion call per `min_interval`, across all
/// sessions. Rejected callers get the remaining wait instead of blocking.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_admitted: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_admitted: Mutex::new(None) }
    }

    /// Reports the remaining wait without admitting anything.
    pub fn check(&self) -> Result<(), Duration> {
        self.remaining_at(&self.lock(), Instant::now())
    }

    /// Admits the call and stamps the admission time, or returns how long the
    /// caller still has to wait.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut last = self.lock();
        self.remaining_at(&last, now)?;
        *last = Some(now);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_admitted.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remaining_at(&self, last: &Option<Instant>, now: Instant) -> Result<(), Duration> {
        if let Some(previous) = *last {
            let elapsed = now.saturating_duration_since(previous);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!("Rate limited, {:.1}s remaining", wait.as_secs_f32());
                return Err(wait);
            }
        }
        Ok(())
    }
}
