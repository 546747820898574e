//! Single-stage task coordination
//!
//! A [`TaskCoordinator`] runs at most one live operation for its stage.
//! Starting a new operation cancels the previous one and hands out a fresh
//! [`Generation`]; everything the operation reports is tagged with it. The
//! consumer side calls [`TaskCoordinator::accept`] on each received event,
//! which drops events from generations that are no longer live. A superseded
//! or canceled operation may keep running briefly, but nothing it produces
//! reaches the consumer.

use crate::error::Error;
use crate::throttle::{ProgressFn, ProgressThrottle};
use crate::types::{Event, Generation, LoadResult, Stage, TaskState, WordCountResult};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Successful result of a stage operation
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Load finished (any [`LoadStatus`](crate::types::LoadStatus))
    Loaded(LoadResult),
    /// Parse finished; `None` for text without words
    Parsed(Option<WordCountResult>),
}

impl Outcome {
    fn into_event(self, generation: Generation) -> Event {
        match self {
            Outcome::Loaded(result) => Event::Loaded { generation, result },
            Outcome::Parsed(result) => Event::Parsed { generation, result },
        }
    }
}

/// Handles given to one operation run
///
/// Carries the cancellation token to poll and a throttled progress sink
/// already tagged with the run's stage and generation.
#[derive(Clone)]
pub struct TaskScope {
    stage: Stage,
    generation: Generation,
    token: CancellationToken,
    progress: ProgressFn,
}

impl TaskScope {
    /// Stage the run belongs to
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Generation of the run
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Token signaled when the run is canceled or superseded
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Throttled progress sink for this run's workers
    pub fn progress(&self) -> ProgressFn {
        Arc::clone(&self.progress)
    }
}

impl std::fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScope")
            .field("stage", &self.stage)
            .field("generation", &self.generation)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// The operation currently owning the stage
struct RunningTask {
    generation: Generation,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Mutable coordinator state, guarded by one lock
#[derive(Default)]
struct Slot {
    /// Last generation handed out
    last_generation: Generation,
    /// Generation whose events are delivered; NONE when nothing is live
    live: Generation,
    state: TaskState,
    /// Set once the live generation's 100% progress was accepted
    progress_closed: bool,
    current: Option<RunningTask>,
    /// Tasks that were canceled, superseded or finished but not yet joined
    retired: Vec<JoinHandle<()>>,
}

impl Slot {
    fn retire_current(&mut self) -> Option<Generation> {
        let task = self.current.take()?;
        task.token.cancel();
        self.retired.retain(|h| !h.is_finished());
        self.retired.push(task.handle);
        Some(task.generation)
    }
}

/// Runs and revokes the operations of one stage
pub struct TaskCoordinator {
    stage: Stage,
    slot: Mutex<Slot>,
    event_tx: mpsc::UnboundedSender<Event>,
    max_updates_per_sec: f64,
    runtime: tokio::runtime::Handle,
}

impl TaskCoordinator {
    /// Create an idle coordinator publishing to `event_tx`
    ///
    /// Operations are spawned on `runtime`; progress of each run is limited
    /// to `max_updates_per_sec`.
    pub fn new(
        stage: Stage,
        event_tx: mpsc::UnboundedSender<Event>,
        max_updates_per_sec: f64,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            stage,
            slot: Mutex::new(Slot::default()),
            event_tx,
            max_updates_per_sec,
            runtime,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stage this coordinator guards
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    /// Generation whose events are currently delivered, if any
    pub fn live_generation(&self) -> Option<Generation> {
        let live = self.lock().live;
        (live != Generation::NONE).then_some(live)
    }

    /// Start `operation`, superseding whatever is running
    ///
    /// The operation receives a [`TaskScope`] and runs on the runtime. Its
    /// return value becomes the terminal event: `Ok` maps to
    /// `Loaded`/`Parsed`, any error or panic to `Failed`, and
    /// [`Error::Cancelled`] to nothing at all.
    pub fn start<F, Fut>(&self, operation: F) -> Generation
    where
        F: FnOnce(TaskScope) -> Fut,
        Fut: Future<Output = crate::Result<Outcome>> + Send + 'static,
    {
        let stage = self.stage;
        let mut slot = self.lock();

        if let Some(previous) = slot.retire_current() {
            if !slot.state.is_resting() {
                tracing::debug!(%stage, generation = previous.get(), "superseding running operation");
            }
        }

        let generation = Generation(slot.last_generation.get() + 1);
        slot.last_generation = generation;

        let token = CancellationToken::new();
        let progress_tx = self.event_tx.clone();
        let progress = ProgressThrottle::new(self.max_updates_per_sec).wrap(Arc::new(
            move |percent| {
                // Send fails only once the receiver is gone
                let _ = progress_tx.send(Event::Progress {
                    stage,
                    generation,
                    percent,
                });
            },
        ));

        let future = operation(TaskScope {
            stage,
            generation,
            token: token.clone(),
            progress,
        });

        let event_tx = self.event_tx.clone();
        let handle = self.runtime.spawn(async move {
            let event = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(outcome)) => outcome.into_event(generation),
                Ok(Err(Error::Cancelled)) => {
                    tracing::debug!(%stage, generation = generation.get(), "operation stopped on cancellation");
                    return;
                }
                Ok(Err(e)) => {
                    tracing::warn!(%stage, generation = generation.get(), error = %e, "operation failed");
                    Event::Failed {
                        stage,
                        generation,
                        error: e.to_string(),
                    }
                }
                Err(payload) => {
                    let e = Error::from_panic(stage, payload);
                    tracing::error!(%stage, generation = generation.get(), error = %e, "operation panicked");
                    Event::Failed {
                        stage,
                        generation,
                        error: e.to_string(),
                    }
                }
            };
            let _ = event_tx.send(event);
        });

        slot.live = generation;
        slot.state = TaskState::Running;
        slot.progress_closed = false;
        slot.current = Some(RunningTask {
            generation,
            token,
            handle,
        });

        tracing::info!(%stage, generation = generation.get(), "operation started");
        generation
    }

    /// Cancel the live operation and revoke its generation
    ///
    /// Events it already queued are dropped at delivery. Returns `true` if an
    /// operation was running.
    pub fn cancel(&self) -> bool {
        let mut slot = self.lock();
        slot.live = Generation::NONE;
        let previous = slot.retire_current();

        if slot.state.is_resting() {
            return false;
        }
        slot.state = TaskState::Canceled;
        tracing::info!(
            stage = %self.stage,
            generation = previous.map(|g| g.get()),
            "operation canceled"
        );
        true
    }

    /// Decide whether a received event may reach the consumer
    ///
    /// Stale events (any generation other than the live one) are rejected.
    /// An accepted terminal event settles the stage into `Completed` or
    /// `Failed` and closes the generation.
    pub fn accept(&self, event: &Event) -> bool {
        let mut slot = self.lock();
        if slot.live == Generation::NONE || event.generation() != slot.live {
            tracing::trace!(
                stage = %self.stage,
                generation = event.generation().get(),
                live = slot.live.get(),
                "dropping stale event"
            );
            return false;
        }

        // Workers race their sends; a report admitted before 100% may land after it
        if let Event::Progress { percent, .. } = event {
            if slot.progress_closed {
                return false;
            }
            slot.progress_closed = *percent >= 100;
        }

        if event.is_terminal() {
            slot.live = Generation::NONE;
            slot.state = match event {
                Event::Failed { .. } => TaskState::Failed,
                _ => TaskState::Completed,
            };
            if let Some(task) = slot.current.take() {
                slot.retired.retain(|h| !h.is_finished());
                slot.retired.push(task.handle);
            }
        }
        true
    }

    /// Cancel the live operation and wait for every spawned run to finish
    ///
    /// Gives up waiting after `timeout`; runs still going then are left to
    /// observe their tokens on their own.
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel();
        let handles = std::mem::take(&mut self.lock().retired);
        if handles.is_empty() {
            return;
        }

        let count = handles.len();
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => tracing::debug!(stage = %self.stage, tasks = count, "stage tasks joined"),
            Err(_) => tracing::warn!(
                stage = %self.stage,
                tasks = count,
                "timeout waiting for stage tasks, proceeding with shutdown"
            ),
        }
    }
}

impl std::fmt::Debug for TaskCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.lock();
        f.debug_struct("TaskCoordinator")
            .field("stage", &self.stage)
            .field("state", &slot.state)
            .field("live", &slot.live)
            .finish()
    }
}
