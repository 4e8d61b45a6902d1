//! Session timers.
//!
//! - [`SilenceTimer`]: idle deadline pushed forward by every receive.
//! - [`with_timeout`]: bound on a connect or handshake step.

// ============================================================================
// Imports
// ============================================================================

use std::future::{Future, pending};
use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout};

use crate::error::{Error, Result};

// ============================================================================
// SilenceTimer
// ============================================================================

/// Idle deadline for one session.
///
/// A timer without a duration never fires.
#[derive(Debug, Clone, Copy)]
pub struct SilenceTimer {
    duration: Option<Duration>,
    deadline: Option<Instant>,
}

impl SilenceTimer {
    /// Creates a timer armed `duration` from now.
    #[must_use]
    pub fn new(duration: Option<Duration>) -> Self {
        Self {
            duration,
            deadline: duration.map(|d| Instant::now() + d),
        }
    }

    /// Pushes the deadline `duration` past now.
    #[inline]
    pub fn reset(&mut self) {
        if let Some(duration) = self.duration {
            self.deadline = Some(Instant::now() + duration);
        }
    }

    /// Returns the current deadline.
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the configured duration in milliseconds (0 if disabled).
    #[inline]
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.duration.map_or(0, millis)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[inline]
#[must_use]
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Sleeps until `deadline`, or forever if there is none.
///
/// Takes the deadline by value so the future borrows nothing.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

// ============================================================================
// Step Timeouts
// ============================================================================

/// Runs a fallible step with a time bound.
///
/// # Errors
///
/// Returns [`Error::Timeout`] naming `operation` if the bound elapses, or the
/// step's own error.
pub async fn with_timeout<T, F>(duration: Duration, operation: &str, step: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, step).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, millis(duration))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_silence_timer_fires() {
        let timer = SilenceTimer::new(Some(Duration::from_millis(100)));
        let started = Instant::now();
        sleep_until_opt(timer.deadline()).await;
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_extends_deadline() {
        let mut timer = SilenceTimer::new(Some(Duration::from_millis(100)));
        let first = timer.deadline().expect("armed");

        tokio::time::advance(Duration::from_millis(60)).await;
        timer.reset();

        let second = timer.deadline().expect("armed");
        assert!(second >= first + Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_timer_never_fires() {
        let timer = SilenceTimer::new(None);
        assert_eq!(timer.duration_ms(), 0);
        let result = timeout(Duration::from_secs(3600), sleep_until_opt(timer.deadline())).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_elapses() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), "handshake", async {
            pending::<()>().await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Timeout after 10ms: handshake");
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result() {
        let value = with_timeout(Duration::from_secs(1), "noop", async { Ok(5) })
            .await
            .expect("completes");
        assert_eq!(value, 5);
    }
}
