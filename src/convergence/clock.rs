//! Time source for polling loops.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Reads and sleeps on a clock.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Sleeps for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when slept on. Sleeping returns immediately.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<Instant>,
    sleeps: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ManualClock {
    /// Creates a manual clock starting at the current instant.
    pub fn new() -> Self {
        Self {
            now: std::sync::Mutex::new(Instant::now()),
            sleeps: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += duration;
    }

    /// Returns how many times `sleep` has been called.
    pub fn sleeps(&self) -> usize {
        self.sleeps.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().expect("clock lock poisoned")
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
