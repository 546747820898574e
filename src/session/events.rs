//! Consumer-side event delivery.

use crate::types::Event;
use std::sync::{Arc, PoisonError};

use super::{SortToggles, WordCounter};

impl WordCounter {
    /// Wait for the next live event
    ///
    /// Events from superseded or canceled generations are dropped here, and
    /// stage states advance when a terminal event is accepted. With
    /// `auto_parse` enabled, accepting a successful `Loaded` starts the parse
    /// of its content before the event is returned.
    ///
    /// Returns `None` once [`shutdown`](Self::shutdown) has been called.
    pub async fn next_event(&self) -> Option<Event> {
        let mut rx = self.event_rx.lock().await;
        loop {
            let event = tokio::select! {
                biased;
                () = self.closed.cancelled() => return None,
                event = rx.recv() => event?,
            };
            if self.deliver(&event) {
                return Some(event);
            }
        }
    }

    /// Take the next live event if one is already queued
    ///
    /// Non-blocking counterpart of [`next_event`](Self::next_event) for
    /// consumers that poll from their own loop.
    pub fn try_next_event(&self) -> Option<Event> {
        if self.closed.is_cancelled() {
            return None;
        }
        let mut rx = self.event_rx.try_lock().ok()?;
        loop {
            let event = rx.try_recv().ok()?;
            if self.deliver(&event) {
                return Some(event);
            }
        }
    }

    /// Generation check plus the side effects of an accepted event
    fn deliver(&self, event: &Event) -> bool {
        if !self.coordinator(event.stage()).accept(event) {
            return false;
        }

        match event {
            Event::Loaded { result, generation } if self.config.auto_parse => {
                if let (true, Some(content)) = (result.is_success(), &result.content) {
                    match self.start_parse(Arc::clone(content)) {
                        Ok(parse) => tracing::debug!(
                            load_generation = generation.get(),
                            parse_generation = parse.get(),
                            "automatic parse started"
                        ),
                        Err(e) => tracing::warn!(error = %e, "automatic parse not started"),
                    }
                }
            }
            Event::Parsed { generation, .. } => {
                if let Some(tally) = self.pending_tally.take(*generation) {
                    self.engine.replace_tally(tally);
                }
                *self
                    .sort_toggles
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = SortToggles::default();
            }
            _ => {}
        }
        true
    }
}
