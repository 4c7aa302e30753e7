//! Token-bucket admission gate for upstream API calls
//!
//! Capacity is one token, refilled at a fixed rate. Each caller reserves the
//! next free slot under a lock and then sleeps until it, so concurrent
//! callers are admitted strictly one interval apart.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, bail};
use log::debug;
use tokio::time::Instant;

use crate::sync::{Interrupted, SyncContext};

/// Rate limiter shared by every outbound call to the telemetry provider
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    /// Earliest instant the next reservation may be admitted
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Default upstream request rate
    pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 4.0;

    /// Create a limiter admitting `requests_per_second` calls per second
    pub fn new(requests_per_second: f64) -> Result<Self> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            bail!("rate limit must be a positive number, got {requests_per_second}");
        }

        Ok(Self {
            interval: Duration::from_secs_f64(1.0 / requests_per_second),
            next_slot: Mutex::new(None),
        })
    }

    /// Time between two admitted calls
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for permission to issue one upstream call
    ///
    /// Returns immediately if a token is available. Otherwise suspends for
    /// the exact delay until one is, unless `ctx` is cancelled or expires
    /// first, in which case the reservation is handed back and the call
    /// must not be issued.
    pub async fn acquire(&self, ctx: &SyncContext) -> Result<(), Interrupted> {
        ctx.check()?;

        let (slot, delay) = self.reserve();
        if delay.is_zero() {
            return Ok(());
        }

        debug!("Rate limiter: waiting {}ms before request", delay.as_millis());

        if let Err(interrupted) = ctx.run(tokio::time::sleep_until(slot)).await {
            self.release(slot);
            return Err(interrupted);
        }
        Ok(())
    }

    /// Claim the next free slot, returning it and the delay until it
    fn reserve(&self) -> (Instant, Duration) {
        // The guarded value is a plain instant, valid even after a panic
        let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let slot = match *next {
            Some(next_slot) if next_slot > now => next_slot,
            _ => now,
        };
        *next = Some(slot + self.interval);
        (slot, slot - now)
    }

    /// Give back an unused reservation if nobody has queued behind it
    fn release(&self, slot: Instant) {
        let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        if *next == Some(slot + self.interval) {
            *next = Some(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rejects_invalid_rates() {
        assert!(RateLimiter::new(0.0).is_err());
        assert!(RateLimiter::new(-1.0).is_err());
        assert!(RateLimiter::new(f64::NAN).is_err());
        assert!(RateLimiter::new(f64::INFINITY).is_err());
        assert_eq!(
            RateLimiter::new(4.0).unwrap().interval(),
            Duration::from_millis(250)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_is_immediate() {
        let limiter = RateLimiter::new(1.0).unwrap();
        let ctx = SyncContext::new();

        let start = Instant::now();
        limiter.acquire(&ctx).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_calls_are_spaced() {
        let limiter = RateLimiter::new(4.0).unwrap();
        let ctx = SyncContext::new();

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire(&ctx).await.unwrap();
        }

        // K calls at R/s take at least (K-1)/R seconds
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_serialized() {
        let limiter = Arc::new(RateLimiter::new(10.0).unwrap());
        let ctx = SyncContext::new();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(&ctx).await.unwrap();
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();

        for pair in admitted.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_returns_promptly() {
        let limiter = RateLimiter::new(0.1).unwrap();
        let ctx = SyncContext::new();

        limiter.acquire(&ctx).await.unwrap();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = limiter.acquire(&ctx).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_reservation_is_returned() {
        let limiter = RateLimiter::new(1.0).unwrap();
        let ctx = SyncContext::new();
        let start = Instant::now();
        limiter.acquire(&ctx).await.unwrap();

        let doomed = SyncContext::new();
        let canceller = doomed.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        assert_eq!(limiter.acquire(&doomed).await, Err(Interrupted::Cancelled));

        // The aborted caller must not push later callers further out
        limiter.acquire(&ctx).await.unwrap();
        assert!(start.elapsed() <= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_wait() {
        let limiter = RateLimiter::new(0.5).unwrap();
        let ctx = SyncContext::with_timeout(Duration::from_millis(500));

        limiter.acquire(&ctx).await.unwrap();
        let result = limiter.acquire(&ctx).await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
    }
}
