//! Shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::WordCounter;

/// How long shutdown waits for in-flight operations
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl WordCounter {
    /// Gracefully shut down the counter
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new operations
    /// 2. Releases any consumer waiting in [`next_event`](Self::next_event)
    /// 3. Cancels both stages and waits (up to 30 seconds) for their tasks
    ///    and worker threads to finish
    ///
    /// Calling it more than once is harmless.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        self.closed.cancel();

        // Parse first: a load finishing now can no longer start one
        self.parse.shutdown(SHUTDOWN_TIMEOUT).await;
        self.load.shutdown(SHUTDOWN_TIMEOUT).await;

        tracing::info!("Shutdown complete");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        !self.accepting_new.load(Ordering::SeqCst)
    }
}

impl Drop for WordCounter {
    fn drop(&mut self) {
        // Without an explicit shutdown, at least stop the workers
        self.load.cancel();
        self.parse.cancel();
    }
}
