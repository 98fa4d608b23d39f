// src/rabbitmq/backoff.rs
use std::time::Duration;

/// Delay after a failed connect/bind attempt.
pub const SETUP_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delay after an established session is lost.
pub const SESSION_LOST_DELAY: Duration = Duration::from_secs(5);

/// Suspends the calling task without blocking the worker thread.
pub async fn sleep(delay: Duration) {
    tokio::time::sleep(delay).await;
}
