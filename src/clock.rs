//! Time capability shared by the retry loop, the history archive and the
//! file loop.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::time::Duration;

/// Source of wall-clock time and cooperative sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Returns the current local time.
    fn now(&self) -> NaiveDateTime;

    /// Suspends the current task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the system time and the Tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
pub(crate) use recording::RecordingClock;
