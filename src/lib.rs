//! # wordtally
//!
//! Parallel word-frequency counting for large single-byte text files.
//!
//! ## Design Philosophy
//!
//! wordtally is designed to be:
//! - **Parallel** - Files are read in chunks and words counted across worker threads
//! - **Revocable** - Every operation can be canceled or superseded, and nothing
//!   it reports afterwards reaches the consumer
//! - **Library-first** - No UI, purely a Rust crate for embedding
//! - **Event-driven** - One consumer loop receives typed events
//!
//! ## Quick Start
//!
//! ```no_run
//! use wordtally::{Config, Event, WordCounter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let counter = WordCounter::new(Config::default())?;
//!     counter.start_load("book.txt")?;
//!
//!     while let Some(event) = counter.next_event().await {
//!         match event {
//!             Event::Progress { stage, percent, .. } => println!("{stage}: {percent}%"),
//!             Event::Parsed { result: Some(result), .. } => {
//!                 for (word, count) in result.pairs().take(10) {
//!                     println!("{count:>8} {word}");
//!                 }
//!                 break;
//!             }
//!             Event::Failed { error, .. } => return Err(error.into()),
//!             _ => {}
//!         }
//!     }
//!
//!     counter.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Single-stage task coordination with generation revocation
pub mod coordinator;
/// Parallel word counting, sorting and fingerprinting
pub mod counter;
/// Error types
pub mod error;
/// Chunked parallel file reading
pub mod reader;
/// The load-then-count session (decomposed into focused submodules)
pub mod session;
/// Progress rate limiting
pub mod throttle;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, CounterConfig, ProgressConfig, ReaderConfig};
pub use coordinator::{Outcome, TaskCoordinator, TaskScope};
pub use counter::{CountOptions, WordCountEngine};
pub use error::{Error, Result};
pub use reader::ChunkedFileReader;
pub use session::WordCounter;
pub use throttle::{ProgressFn, ProgressThrottle};
pub use types::{
    Chunk, Event, Generation, LoadResult, LoadStatus, SortKey, SortOrder, Stage, TaskState,
    WordCount, WordCountResult,
};

/// Shut the counter down when the process is asked to terminate.
///
/// Waits for a termination signal, logs which stages it interrupts and then calls
/// the counter's `shutdown()` method,
/// which also ends the consumer's `next_event()` loop.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use wordtally::{Config, WordCounter, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let counter = Arc::new(WordCounter::new(Config::default())?);
///
///     let watcher = Arc::clone(&counter);
///     tokio::spawn(async move { run_with_shutdown(&watcher).await });
///
///     counter.start_load("book.txt")?;
///     while let Some(event) = counter.next_event().await {
///         println!("{event:?}");
///     }
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(counter: &WordCounter) {
    let signal = wait_for_signal().await;
    let interrupted: Vec<Stage> = [Stage::Load, Stage::Parse]
        .into_iter()
        .filter(|&stage| !counter.state(stage).is_resting())
        .collect();
    tracing::info!(signal, ?interrupted, "shutting down word counter");
    counter.shutdown().await;
}

/// Name of the first termination signal received
#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        },
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            "SIGTERM"
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            "SIGINT"
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "could not register any signal handler, using ctrl_c fallback");
            wait_for_ctrl_c().await
        }
    }
}

/// Name of the first termination signal received
#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    wait_for_ctrl_c().await
}

/// Waits for Ctrl+C; never returns if it cannot be listened for
async fn wait_for_ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C, signal shutdown disabled");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
