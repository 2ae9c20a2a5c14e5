//! Fixed-interval pacing shared by all workers.

use crate::cancellation::CancellationToken;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Hands out start slots at least `interval` apart.
///
/// The first slot is immediate. Workers sharing a pacer are spaced as a
/// group, so adding workers never raises the record rate above one per
/// interval.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    /// Creates a pacer.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// The configured spacing.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits for the next slot.
    ///
    /// Returns `false` if `cancel` fired before or during the wait.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        let delay = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = (*next).filter(|t| *t > now).unwrap_or(now);
            *next = Some(slot + self.interval);
            slot.saturating_duration_since(now)
        };
        if cancel.is_cancelled() {
            return false;
        }
        cancel.sleep(delay).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_slot_is_immediate() {
        let pacer = Pacer::new(Duration::from_secs(60));
        let start = Instant::now();
        assert!(pacer.wait(&CancellationToken::new()).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_slots_are_spaced() {
        let pacer = Pacer::new(Duration::from_millis(40));
        let token = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..3 {
            assert!(pacer.wait(&token).await);
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_spacing() {
        let pacer = Arc::new(Pacer::new(Duration::from_millis(40)));
        let token = Arc::new(CancellationToken::new());
        let start = Instant::now();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let pacer = pacer.clone();
                let token = token.clone();
                tokio::spawn(async move { pacer.wait(&token).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let pacer = Pacer::new(Duration::from_secs(60));
        let token = CancellationToken::new();
        assert!(pacer.wait(&token).await);

        token.cancel("stop");
        let start = Instant::now();
        assert!(!pacer.wait(&token).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
