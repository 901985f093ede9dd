//! Bounded polling for timing-dependent checks.
//!
//! UI assertions poll a condition until it holds or a category-specific
//! timeout elapses. Exceeding the timeout is the assertion failing.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::probe::ProbeError;

/// Categories of waits with their timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCategory {
    /// One-time prompts that may or may not appear (3s).
    OptionalPrompt,

    /// An element on an already loaded page (5s).
    ElementVisible,

    /// Content that appears after a navigation or login (10s).
    PageContent,
}

impl WaitCategory {
    /// Get the maximum timeout for this category.
    pub fn timeout(&self) -> Duration {
        match self {
            WaitCategory::OptionalPrompt => Duration::from_secs(3),
            WaitCategory::ElementVisible => Duration::from_secs(5),
            WaitCategory::PageContent => Duration::from_secs(10),
        }
    }

    /// Get the initial retry delay for exponential backoff.
    fn initial_delay(&self) -> Duration {
        Duration::from_millis(100)
    }

    /// Cap on the delay between polls.
    fn max_delay(&self) -> Duration {
        Duration::from_millis(1000)
    }
}

/// Poll `condition` until it returns true or the category timeout elapses.
///
/// Uses exponential backoff with the following strategy:
/// - Initial delay: 100ms
/// - Exponential multiplier: 2x, capped at 1s
/// - Maximum attempts: Until timeout is reached
///
/// Returns whether the condition was met.
pub async fn wait_until<F, Fut>(category: WaitCategory, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let timeout = category.timeout();
    let mut delay = category.initial_delay();
    let start = Instant::now();

    loop {
        if condition().await {
            return true;
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return false;
        }

        // Never sleep past the deadline
        let remaining = timeout.saturating_sub(elapsed);
        sleep(delay.min(remaining)).await;

        delay = (delay * 2).min(category.max_delay());
    }
}

/// Like [`wait_until`], but a missed deadline is a [`ProbeError::Timeout`].
pub async fn assert_eventually<F, Fut>(
    category: WaitCategory,
    what: &str,
    condition: F,
) -> Result<(), ProbeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if wait_until(category, condition).await {
        Ok(())
    } else {
        Err(ProbeError::Timeout {
            what: what.to_string(),
            timeout: category.timeout(),
        })
    }
}
