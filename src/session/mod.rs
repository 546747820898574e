//! The word counter session split into focused submodules.
//!
//! The `WordCounter` struct and its methods are organized by concern:
//! - [`control`] - Starting, canceling and re-sorting
//! - [`events`] - The consumer-side event receive and automatic parse
//! - [`lifecycle`] - Shutdown

mod control;
mod events;
mod lifecycle;


use crate::config::Config;
use crate::coordinator::TaskCoordinator;
use crate::counter::{Tally, WordCountEngine};
use crate::error::{Error, Result};
use crate::reader::ChunkedFileReader;
use crate::types::{Event, Generation, SortKey, Stage, TaskState};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Direction flags behind [`WordCounter::toggle_sort`], one per key
///
/// `true` means the next toggle of that key sorts descending.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SortToggles {
    count_descending: bool,
    word_descending: bool,
}

impl SortToggles {
    pub(crate) fn descending(&self, key: SortKey) -> bool {
        match key {
            SortKey::Count => self.count_descending,
            SortKey::Word => self.word_descending,
        }
    }

    pub(crate) fn flip(&mut self, key: SortKey) {
        match key {
            SortKey::Count => self.count_descending = !self.count_descending,
            SortKey::Word => self.word_descending = !self.word_descending,
        }
    }
}

/// Tally of a finished parse, held back until its `Parsed` event is accepted
///
/// Only the newest generation is kept. A parse that is canceled or
/// superseded after counting never reaches the engine.
#[derive(Debug, Default)]
pub(crate) struct PendingTally(std::sync::Mutex<Option<(Generation, Option<Arc<Tally>>)>>);

impl PendingTally {
    pub(crate) fn stage(&self, generation: Generation, tally: Option<Arc<Tally>>) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_none_or(|(pending, _)| *pending <= generation) {
            *slot = Some((generation, tally));
        }
    }

    /// The tally staged under `generation`, if it is still the newest
    pub(crate) fn take(&self, generation: Generation) -> Option<Option<Arc<Tally>>> {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some((pending, tally)) if pending == generation => Some(tally),
            other => {
                *slot = other;
                None
            }
        }
    }
}

/// Load-then-count pipeline with one coordinator per stage
///
/// Operations run on the tokio runtime the counter was created in. Their
/// events arrive through [`next_event`](Self::next_event), which must be
/// driven by a single consumer loop.
pub struct WordCounter {
    /// Validated configuration
    pub(crate) config: Config,
    /// Chunked file reader used by every load
    pub(crate) reader: ChunkedFileReader,
    /// Keeps the tally of the last delivered parse for re-sorting
    pub(crate) engine: WordCountEngine,
    /// Tally of the newest finished parse, awaiting delivery
    pub(crate) pending_tally: Arc<PendingTally>,
    /// Coordinator for the load stage
    pub(crate) load: TaskCoordinator,
    /// Coordinator for the parse stage
    pub(crate) parse: TaskCoordinator,
    /// Receiving end of the channel both coordinators publish to
    pub(crate) event_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>,
    /// Per-key direction flags for toggled sorting
    pub(crate) sort_toggles: std::sync::Mutex<SortToggles>,
    /// Flag to indicate whether new operations are accepted (false during shutdown)
    pub(crate) accepting_new: AtomicBool,
    /// Signaled by shutdown to release a waiting consumer
    pub(crate) closed: CancellationToken,
}

impl WordCounter {
    /// Create a counter with the given configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or if called
    /// outside a tokio runtime.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use wordtally::*;
    /// # async fn example() -> Result<()> {
    /// let counter = WordCounter::new(Config::default())?;
    /// counter.start_load("book.txt")?;
    /// while let Some(event) = counter.next_event().await {
    ///     if let Event::Parsed { result: Some(result), .. } = event {
    ///         println!("{} distinct words", result.len());
    ///         break;
    ///     }
    /// }
    /// counter.shutdown().await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| Error::Config {
            message: format!("WordCounter must be created inside a tokio runtime: {e}"),
            key: None,
        })?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let rate = config.progress.max_updates_per_sec;

        tracing::debug!(
            chunk_size = config.reader.chunk_size_bytes,
            reader_workers = config.reader.workers(),
            counter_workers = config.counter.workers(),
            auto_parse = config.auto_parse,
            "word counter created"
        );

        Ok(Self {
            reader: ChunkedFileReader::from_config(&config.reader),
            engine: WordCountEngine::new(),
            pending_tally: Arc::new(PendingTally::default()),
            load: TaskCoordinator::new(Stage::Load, event_tx.clone(), rate, runtime.clone()),
            parse: TaskCoordinator::new(Stage::Parse, event_tx, rate, runtime),
            event_rx: tokio::sync::Mutex::new(event_rx),
            sort_toggles: std::sync::Mutex::new(SortToggles::default()),
            accepting_new: AtomicBool::new(true),
            closed: CancellationToken::new(),
            config,
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current state of a stage
    pub fn state(&self, stage: Stage) -> TaskState {
        self.coordinator(stage).state()
    }

    pub(crate) fn coordinator(&self, stage: Stage) -> &TaskCoordinator {
        match stage {
            Stage::Load => &self.load,
            Stage::Parse => &self.parse,
        }
    }
}

impl std::fmt::Debug for WordCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordCounter")
            .field("load", &self.load)
            .field("parse", &self.parse)
            .field("auto_parse", &self.config.auto_parse)
            .finish()
    }
}
