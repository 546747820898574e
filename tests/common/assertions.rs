//! Custom test assertions for integration tests

use std::time::Duration;
use wordtally::{Event, LoadResult, Stage, WordCountResult, WordCounter};

/// Result of waiting for a stage to finish
#[derive(Debug)]
pub enum WaitResult {
    /// Load finished with this result
    Loaded(LoadResult),
    /// Parse finished with this result
    Parsed(Option<WordCountResult>),
    /// Stage failed with error
    Failed(String),
    /// Timeout waiting for the terminal event
    Timeout,
    /// Event stream ended (counter shut down)
    ChannelClosed,
}

/// Drive the consumer loop until a terminal event of `stage` arrives
///
/// Events of the other stage are consumed along the way.
pub async fn wait_for_terminal(
    counter: &WordCounter,
    stage: Stage,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match counter.next_event().await {
                Some(Event::Loaded { result, .. }) if stage == Stage::Load => {
                    return WaitResult::Loaded(result);
                }
                Some(Event::Parsed { result, .. }) if stage == Stage::Parse => {
                    return WaitResult::Parsed(result);
                }
                Some(Event::Failed {
                    stage: failed, error, ..
                }) if failed == stage => {
                    return WaitResult::Failed(error);
                }
                Some(_) => continue,
                None => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    match result {
        Ok(wait_result) => wait_result,
        Err(_) => WaitResult::Timeout,
    }
}

/// Collect all events until timeout or predicate is satisfied
pub async fn collect_events_until<F>(
    counter: &WordCounter,
    timeout: Duration,
    stop_predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        while let Some(event) = counter.next_event().await {
            let should_stop = stop_predicate(&event);
            collected.push(event);
            if should_stop {
                break;
            }
        }
    })
    .await;

    collected
}

/// Assert that the parse stage finished with a result and return it
pub async fn assert_parsed(counter: &WordCounter, timeout: Duration) -> Option<WordCountResult> {
    match wait_for_terminal(counter, Stage::Parse, timeout).await {
        WaitResult::Parsed(result) => result,
        WaitResult::Failed(error) => panic!("Parse failed with error: {}", error),
        WaitResult::Timeout => panic!("Timeout waiting for parse to complete"),
        other => panic!("Unexpected wait result: {:?}", other),
    }
}

/// Assert that the load stage finished and return its result
pub async fn assert_loaded(counter: &WordCounter, timeout: Duration) -> LoadResult {
    match wait_for_terminal(counter, Stage::Load, timeout).await {
        WaitResult::Loaded(result) => result,
        WaitResult::Failed(error) => panic!("Load failed with error: {}", error),
        WaitResult::Timeout => panic!("Timeout waiting for load to complete"),
        other => panic!("Unexpected wait result: {:?}", other),
    }
}

/// Progress percentages of `stage`, in delivery order
pub fn progress_of(events: &[Event], stage: Stage) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Progress {
                stage: s, percent, ..
            } if *s == stage => Some(*percent),
            _ => None,
        })
        .collect()
}
