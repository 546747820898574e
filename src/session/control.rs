//! Operation control: start, cancel, re-sort.

use crate::coordinator::Outcome;
use crate::counter;
use crate::error::{Error, Result};
use crate::types::{Generation, SortKey, SortOrder, Stage, WordCountResult};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use super::WordCounter;

impl WordCounter {
    fn ensure_accepting(&self) -> Result<()> {
        if self.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    /// Start loading a file
    ///
    /// Supersedes any running load and cancels any parse, since that parse
    /// belongs to content this load replaces. Progress arrives as
    /// `Event::Progress` and the outcome as `Event::Loaded` (or
    /// `Event::Failed` on an unexpected fault).
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown).
    pub fn start_load(&self, path: impl AsRef<Path>) -> Result<Generation> {
        self.ensure_accepting()?;
        self.parse.cancel();

        let reader = self.reader.clone();
        let path = path.as_ref().to_path_buf();
        tracing::debug!(path = %path.display(), "load requested");

        Ok(self.load.start(move |scope| async move {
            let result = reader
                .load(&path, scope.cancel_token(), scope.progress())
                .await?;
            Ok::<_, Error>(Outcome::Loaded(result))
        }))
    }

    /// Start counting the words of `text`
    ///
    /// Supersedes any running parse. The result is sorted with the
    /// configured key and direction and arrives as `Event::Parsed`. Its tally
    /// becomes the one [`resort`](Self::resort) reads when that event is
    /// accepted, never earlier.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown).
    pub fn start_parse(&self, text: impl Into<Arc<str>>) -> Result<Generation> {
        self.ensure_accepting()?;

        let text: Arc<str> = text.into();
        let pending = Arc::clone(&self.pending_tally);
        let parallelism = self.config.counter.workers();
        let (key, order) = (self.config.counter.sort_key, self.config.counter.sort_order);

        Ok(self.parse.start(move |scope| async move {
            let generation = scope.generation();
            let token = scope.cancel_token().clone();
            let progress = scope.progress();

            let (tally, result) = tokio::task::spawn_blocking(move || {
                counter::count_words(&text, parallelism, &token, &progress).map(|tally| {
                    let tally = tally.map(Arc::new);
                    let result = tally
                        .as_deref()
                        .map(|tally| counter::sorted_result(tally, key, order));
                    (tally, result)
                })
            })
            .await
            .map_err(|e| match e.try_into_panic() {
                Ok(payload) => Error::from_panic(Stage::Parse, payload),
                Err(_) => Error::Cancelled,
            })??;

            // Retained only once the consumer accepts this generation's result
            pending.stage(generation, tally);
            Ok::<_, Error>(Outcome::Parsed(result))
        }))
    }

    /// Cancel a stage
    ///
    /// Canceling the load also cancels the parse that depends on it.
    /// Canceling the parse leaves the load alone. Events either stage already
    /// queued are dropped.
    pub fn cancel(&self, stage: Stage) {
        match stage {
            Stage::Load => {
                self.load.cancel();
                self.parse.cancel();
            }
            Stage::Parse => {
                self.parse.cancel();
            }
        }
    }

    /// Re-sort the last counted tally without re-scanning
    ///
    /// Returns `None` if nothing has been counted yet.
    pub fn resort(&self, key: SortKey, order: SortOrder) -> Option<WordCountResult> {
        self.engine.resort(key, order)
    }

    /// Re-sort by `key` in the direction remembered for it, then flip that direction
    ///
    /// Both keys start ascending, so the first toggle of the count column
    /// reverses the default count-descending result. The flags reset after
    /// each completed parse. Returns `None` (without flipping) if nothing has
    /// been counted yet.
    pub fn toggle_sort(&self, key: SortKey) -> Option<WordCountResult> {
        let mut toggles = self
            .sort_toggles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let order = if toggles.descending(key) {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        };

        let result = self.engine.resort(key, order)?;
        toggles.flip(key);
        Some(result)
    }
}
