//! Parallel word counting
//!
//! Text is split on U+0020 only, the token list is sliced into contiguous
//! ranges and each range is counted on its own scoped thread into a private
//! map. Finished workers merge into one mutex-protected tally. The engine
//! keeps the last full tally so callers can re-sort without re-scanning.

use crate::error::{Error, Result};
use crate::throttle::ProgressFn;
use crate::types::{SortKey, SortOrder, Stage, WordCount, WordCountResult};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Word to occurrence count
pub type Tally = HashMap<String, u64>;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Split `text` on the ASCII space character, skipping empty tokens
///
/// Tabs, newlines and other whitespace stay inside tokens.
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(' ').filter(|token| !token.is_empty())
}

/// Slice `items` into `parts` contiguous ranges covering it exactly
///
/// `parts` is clamped to `[1, items.len()]`. Every slice has
/// `items.len() / parts` elements except the last, which absorbs the
/// remainder. An empty input yields no slices.
pub fn partition<T>(items: &[T], parts: usize) -> Vec<&[T]> {
    if items.is_empty() {
        return Vec::new();
    }
    let parts = parts.clamp(1, items.len());
    let base = items.len() / parts;

    let mut slices = Vec::with_capacity(parts);
    let mut rest = items;
    for _ in 1..parts {
        let (head, tail) = rest.split_at(base);
        slices.push(head);
        rest = tail;
    }
    slices.push(rest);
    slices
}

/// 32-bit FNV-1a over sorted rows
///
/// Each row folds in its word followed by the decimal form of its count, one
/// character (code point) at a time.
pub fn fingerprint(entries: &[WordCount]) -> u32 {
    let mut digits = String::new();
    let mut hash = FNV_OFFSET_BASIS;
    let mut fold = |c: char| {
        hash ^= c as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    };

    for entry in entries {
        entry.word.chars().for_each(&mut fold);
        digits.clear();
        // Writing to a String cannot fail
        let _ = write!(digits, "{}", entry.count);
        digits.chars().for_each(&mut fold);
    }
    hash
}

/// Rows of `tally` in the requested order
///
/// Count order breaks ties by word ascending in both directions, so the
/// output is fully determined by the tally.
pub fn sort_tally(tally: &Tally, key: SortKey, order: SortOrder) -> Vec<WordCount> {
    let mut entries: Vec<WordCount> = tally
        .iter()
        .map(|(word, &count)| WordCount::new(word.as_str(), count))
        .collect();

    match (key, order) {
        (SortKey::Count, SortOrder::Ascending) => entries
            .sort_unstable_by(|a, b| a.count.cmp(&b.count).then_with(|| a.word.cmp(&b.word))),
        (SortKey::Count, SortOrder::Descending) => entries
            .sort_unstable_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word))),
        (SortKey::Word, SortOrder::Ascending) => entries.sort_unstable_by(|a, b| a.word.cmp(&b.word)),
        (SortKey::Word, SortOrder::Descending) => entries.sort_unstable_by(|a, b| b.word.cmp(&a.word)),
    }
    entries
}

/// Sorted and fingerprinted view of `tally`
pub fn sorted_result(tally: &Tally, key: SortKey, order: SortOrder) -> WordCountResult {
    let entries = sort_tally(tally, key, order);
    let fingerprint = fingerprint(&entries);
    WordCountResult {
        entries,
        fingerprint,
    }
}

/// Options for one count
#[derive(Clone, Copy, Debug)]
pub struct CountOptions {
    /// Upper bound on counting workers
    pub parallelism: usize,
    /// Sort key of the returned result
    pub sort_key: SortKey,
    /// Sort direction of the returned result
    pub sort_order: SortOrder,
}

impl Default for CountOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            sort_key: SortKey::Count,
            sort_order: SortOrder::Descending,
        }
    }
}

/// Per-count bookkeeping shared by the scoped workers
struct CountState<'a> {
    shared: Mutex<HashMap<&'a str, u64>>,
    remaining: AtomicUsize,
    processed: AtomicUsize,
    total_tokens: usize,
    abort: CancellationToken,
    progress: &'a ProgressFn,
}

impl<'a> CountState<'a> {
    fn run_worker(&self, worker_id: usize, slice: &[&'a str]) -> Result<()> {
        let _guard = AbortOnPanic(self.abort.clone());

        if self.abort.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut local: HashMap<&'a str, u64> = HashMap::new();
        for &word in slice {
            *local.entry(word).or_insert(0) += 1;
        }

        if self.abort.is_cancelled() {
            tracing::debug!(worker_id, "count worker discarding slice on cancellation");
            return Err(Error::Cancelled);
        }

        {
            let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            for (word, count) in local {
                *shared.entry(word).or_insert(0) += count;
            }
        }

        let done = self.processed.fetch_add(slice.len(), Ordering::AcqRel) + slice.len();
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            (self.progress)(100);
        } else {
            (self.progress)((done * 100 / self.total_tokens).min(99) as u8);
        }
        Ok(())
    }
}

/// Cancels the token if the owning worker unwinds
struct AbortOnPanic(CancellationToken);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.cancel();
        }
    }
}

/// Count words of `text` across up to `parallelism` scoped threads
///
/// Blocks until every worker has joined. Returns `Ok(None)` when the text
/// has no tokens; no progress is reported then. Nothing is retained, so the
/// caller decides whether the tally replaces a previous one.
///
/// # Errors
///
/// [`Error::Cancelled`] if `cancel` fired before the count finished.
/// [`Error::WorkerPanicked`] if a worker panicked; its siblings are stopped
/// and joined first.
pub fn count_words(
    text: &str,
    parallelism: usize,
    cancel: &CancellationToken,
    on_progress: &ProgressFn,
) -> Result<Option<Tally>> {
    let tokens: Vec<&str> = tokenize(text).collect();
    if tokens.is_empty() {
        tracing::debug!("no tokens to count");
        return Ok(None);
    }

    let slices = partition(&tokens, parallelism);
    tracing::debug!(tokens = tokens.len(), workers = slices.len(), "starting parallel count");

    let state = CountState {
        shared: Mutex::new(HashMap::new()),
        remaining: AtomicUsize::new(slices.len()),
        processed: AtomicUsize::new(0),
        total_tokens: tokens.len(),
        abort: cancel.child_token(),
        progress: on_progress,
    };

    let outcomes: Vec<std::thread::Result<Result<()>>> = std::thread::scope(|s| {
        let handles: Vec<_> = slices
            .iter()
            .enumerate()
            .map(|(worker_id, slice)| {
                let state = &state;
                s.spawn(move || state.run_worker(worker_id, slice))
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    });

    let mut first_error: Option<Error> = None;
    for outcome in outcomes {
        let error = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(payload) => Error::from_panic(Stage::Parse, payload),
        };
        // A panic outranks the cancellation it caused in siblings
        if first_error.is_none() || matches!(error, Error::WorkerPanicked { .. }) {
            first_error = Some(error);
        }
    }
    if let Some(error) = first_error {
        if !error.is_cancelled() {
            tracing::warn!(error = %error, "parallel count failed");
        }
        return Err(error);
    }
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let tally: Tally = state
        .shared
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .into_iter()
        .map(|(word, count)| (word.to_owned(), count))
        .collect();

    tracing::info!(tokens = tokens.len(), distinct = tally.len(), "count finished");
    Ok(Some(tally))
}

/// Word counting engine that remembers its last full tally
#[derive(Debug, Default)]
pub struct WordCountEngine {
    last_tally: Mutex<Option<Arc<Tally>>>,
}

impl WordCountEngine {
    /// Create an engine with no retained tally
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count words of `text` across up to `options.parallelism` threads
    ///
    /// Blocks the calling thread until every worker has joined, then retains
    /// the tally for [`resort`](Self::resort). Returns `Ok(None)` when the
    /// text has no tokens; no progress is reported then.
    ///
    /// # Errors
    ///
    /// See [`count_words`]. On error the retained tally is left as it was.
    pub fn count(
        &self,
        text: &str,
        options: CountOptions,
        cancel: &CancellationToken,
        on_progress: &ProgressFn,
    ) -> Result<Option<WordCountResult>> {
        let tally = count_words(text, options.parallelism, cancel, on_progress)?.map(Arc::new);
        let result = tally
            .as_deref()
            .map(|tally| sorted_result(tally, options.sort_key, options.sort_order));
        self.replace_tally(tally);
        Ok(result)
    }

    /// Count words of `text` on the calling thread
    ///
    /// Same tokenization, sorting and retention as [`count`](Self::count);
    /// progress is reported whenever the whole percentage changes.
    pub fn count_sequential(
        &self,
        text: &str,
        key: SortKey,
        order: SortOrder,
        on_progress: &ProgressFn,
    ) -> Option<WordCountResult> {
        let tokens: Vec<&str> = tokenize(text).collect();
        if tokens.is_empty() {
            self.replace_tally(None);
            return None;
        }

        let mut tally = Tally::new();
        let mut last_percent = None;
        for (i, word) in tokens.iter().enumerate() {
            *tally.entry((*word).to_owned()).or_insert(0) += 1;
            let percent = ((i + 1) * 100 / tokens.len()) as u8;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                on_progress(percent);
            }
        }

        let result = sorted_result(&tally, key, order);
        self.replace_tally(Some(Arc::new(tally)));
        Some(result)
    }

    /// Re-sort the retained tally without re-scanning any text
    ///
    /// Returns `None` when no count has produced a tally yet.
    pub fn resort(&self, key: SortKey, order: SortOrder) -> Option<WordCountResult> {
        let tally = self.last_tally()?;
        Some(sorted_result(&tally, key, order))
    }

    /// The tally of the last completed count, if any
    pub fn last_tally(&self) -> Option<Arc<Tally>> {
        self.last_tally
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the retained tally; `None` clears it
    pub fn replace_tally(&self, tally: Option<Arc<Tally>>) {
        *self.last_tally.lock().unwrap_or_else(PoisonError::into_inner) = tally;
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> ProgressFn {
        Arc::new(|_| {})
    }

    fn recorder() -> (ProgressFn, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressFn = Arc::new(move |p| sink.lock().unwrap().push(p));
        (progress, seen)
    }

    fn options(parallelism: usize) -> CountOptions {
        CountOptions {
            parallelism,
            ..CountOptions::default()
        }
    }

    fn pairs(result: &WordCountResult) -> Vec<(&str, u64)> {
        result.pairs().collect()
    }

    const PROSE: &str = "the quick brown fox jumps over the lazy dog  the dog \
                         sleeps\tand the fox\nruns away from the  quick dog";

    // --- tokenize / partition ---

    #[test]
    fn only_spaces_delimit_tokens() {
        let tokens: Vec<&str> = tokenize("  a\tb  c\nd ").collect();
        assert_eq!(tokens, vec!["a\tb", "c\nd"]);
    }

    #[test]
    fn partition_covers_input_and_last_slice_absorbs_remainder() {
        let items: Vec<u32> = (0..10).collect();

        let slices = partition(&items, 3);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0], &[0, 1, 2]);
        assert_eq!(slices[1], &[3, 4, 5]);
        assert_eq!(slices[2], &[6, 7, 8, 9]);

        assert_eq!(partition(&items, 50).len(), 10, "clamped to item count");
        assert_eq!(partition(&items, 0).len(), 1, "clamped to one");
        assert!(partition::<u32>(&[], 4).is_empty());
    }

    // --- counting ---

    #[test]
    fn counts_and_sorts_the_basic_example() {
        let engine = WordCountEngine::new();

        let desc = engine
            .count("a a b", options(2), &CancellationToken::new(), &noop())
            .unwrap()
            .unwrap();
        assert_eq!(pairs(&desc), vec![("a", 2), ("b", 1)]);

        let asc = engine.resort(SortKey::Count, SortOrder::Ascending).unwrap();
        assert_eq!(pairs(&asc), vec![("b", 1), ("a", 2)]);
    }

    #[test]
    fn parallel_tally_equals_sequential_for_every_parallelism() {
        let reference_engine = WordCountEngine::new();
        let reference = reference_engine
            .count_sequential(PROSE, SortKey::Count, SortOrder::Descending, &noop())
            .unwrap();
        let token_count = tokenize(PROSE).count();

        for parallelism in 1..=token_count {
            let engine = WordCountEngine::new();
            let result = engine
                .count(PROSE, options(parallelism), &CancellationToken::new(), &noop())
                .unwrap()
                .unwrap();
            assert_eq!(result, reference, "parallelism={parallelism}");
            assert_eq!(engine.last_tally(), reference_engine.last_tally());
        }
    }

    #[test]
    fn empty_or_blank_text_has_no_result_and_no_progress() {
        let engine = WordCountEngine::new();
        let (progress, seen) = recorder();

        for text in ["", "    "] {
            let result = engine
                .count(text, options(4), &CancellationToken::new(), &progress)
                .unwrap();
            assert_eq!(result, None);
        }
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(engine.resort(SortKey::Word, SortOrder::Ascending), None);
    }

    #[test]
    fn progress_ends_with_a_single_100() {
        let engine = WordCountEngine::new();
        let (progress, seen) = recorder();

        engine
            .count(PROSE, options(4), &CancellationToken::new(), &progress)
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4, "one report per worker");
        assert_eq!(seen.iter().filter(|&&p| p == 100).count(), 1);
    }

    // --- sorting ---

    #[test]
    fn count_ties_break_by_word_in_both_directions() {
        let engine = WordCountEngine::new();
        engine
            .count("c b a c b a d", options(3), &CancellationToken::new(), &noop())
            .unwrap();

        let desc = engine.resort(SortKey::Count, SortOrder::Descending).unwrap();
        assert_eq!(pairs(&desc), vec![("a", 2), ("b", 2), ("c", 2), ("d", 1)]);

        let asc = engine.resort(SortKey::Count, SortOrder::Ascending).unwrap();
        assert_eq!(pairs(&asc), vec![("d", 1), ("a", 2), ("b", 2), ("c", 2)]);
    }

    #[test]
    fn word_sort_is_ordinal() {
        let engine = WordCountEngine::new();
        engine
            .count("beta Alpha alpha \u{e9}t\u{e9}", options(2), &CancellationToken::new(), &noop())
            .unwrap();

        let asc = engine.resort(SortKey::Word, SortOrder::Ascending).unwrap();
        let words: Vec<&str> = asc.entries.iter().map(|e| e.word.as_str()).collect();
        assert_eq!(words, vec!["Alpha", "alpha", "beta", "\u{e9}t\u{e9}"]);

        let desc = engine.resort(SortKey::Word, SortOrder::Descending).unwrap();
        let reversed: Vec<&str> = desc.entries.iter().rev().map(|e| e.word.as_str()).collect();
        assert_eq!(reversed, words);
    }

    #[test]
    fn resorting_is_idempotent_and_double_toggle_restores_order() {
        let engine = WordCountEngine::new();
        let original = engine
            .count(PROSE, options(3), &CancellationToken::new(), &noop())
            .unwrap()
            .unwrap();

        let again = engine.resort(SortKey::Count, SortOrder::Descending).unwrap();
        assert_eq!(again, original);

        let flipped = engine.resort(SortKey::Count, SortOrder::Descending.reversed()).unwrap();
        assert_ne!(flipped.entries, original.entries);
        let restored = engine
            .resort(SortKey::Count, SortOrder::Descending.reversed().reversed())
            .unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn resort_without_tally_is_none() {
        let engine = WordCountEngine::new();
        assert_eq!(engine.resort(SortKey::Count, SortOrder::Descending), None);
    }

    // --- fingerprint ---

    #[test]
    fn fingerprint_matches_hand_computed_fnv1a() {
        // "a" then "2"
        let mut expected = FNV_OFFSET_BASIS;
        for c in ['a', '2'] {
            expected ^= c as u32;
            expected = expected.wrapping_mul(FNV_PRIME);
        }
        assert_eq!(fingerprint(&[WordCount::new("a", 2)]), expected);
        assert_eq!(fingerprint(&[]), FNV_OFFSET_BASIS);
    }

    #[test]
    fn fingerprint_tracks_visible_changes() {
        let base = vec![WordCount::new("a", 2), WordCount::new("b", 1)];
        let one_more = vec![WordCount::new("a", 3), WordCount::new("b", 1)];
        let renamed = vec![WordCount::new("a", 2), WordCount::new("c", 1)];

        assert_eq!(fingerprint(&base), fingerprint(&base.clone()));
        assert_ne!(fingerprint(&base), fingerprint(&one_more));
        assert_ne!(fingerprint(&base), fingerprint(&renamed));
    }

    #[test]
    fn identical_text_gives_identical_fingerprints() {
        let first = WordCountEngine::new()
            .count(PROSE, options(2), &CancellationToken::new(), &noop())
            .unwrap()
            .unwrap();
        let second = WordCountEngine::new()
            .count(PROSE, options(5), &CancellationToken::new(), &noop())
            .unwrap()
            .unwrap();
        let extra_word = WordCountEngine::new()
            .count(&format!("{PROSE} dog"), options(2), &CancellationToken::new(), &noop())
            .unwrap()
            .unwrap();

        assert_eq!(first.fingerprint, second.fingerprint);
        assert_ne!(first.fingerprint, extra_word.fingerprint);
    }

    // --- cancellation ---

    #[test]
    fn cancelled_count_keeps_the_previous_tally() {
        let engine = WordCountEngine::new();
        let first = engine
            .count("a a b", options(2), &CancellationToken::new(), &noop())
            .unwrap()
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = engine.count(PROSE, options(2), &token, &noop()).unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(engine.resort(SortKey::Count, SortOrder::Descending), Some(first));
    }

    #[test]
    fn cancellation_from_progress_stops_the_count() {
        let engine = WordCountEngine::new();
        let token = CancellationToken::new();
        let trigger = token.clone();
        let progress: ProgressFn = Arc::new(move |_| trigger.cancel());

        let err = engine.count(PROSE, options(4), &token, &progress).unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(engine.last_tally(), None);
    }

    // --- worker faults ---

    #[test]
    fn panicking_worker_fails_the_count_after_joining_siblings() {
        let engine = WordCountEngine::new();
        let kept = engine
            .count("keep me keep", options(2), &CancellationToken::new(), &noop())
            .unwrap()
            .unwrap();

        let reports = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&reports);
        let progress: ProgressFn = Arc::new(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            panic!("sink exploded");
        });
        let token = CancellationToken::new();

        let err = engine.count(PROSE, options(4), &token, &progress).unwrap_err();

        match err {
            Error::WorkerPanicked { stage, message } => {
                assert_eq!(stage, Stage::Parse);
                assert_eq!(message, "sink exploded");
            }
            other => panic!("expected WorkerPanicked, got {other:?}"),
        }
        assert!(reports.load(Ordering::SeqCst) >= 1);
        assert!(!token.is_cancelled(), "only the internal abort token trips");
        assert_eq!(engine.resort(SortKey::Count, SortOrder::Descending), Some(kept));
    }

    #[test]
    fn count_words_retains_nothing() {
        let tally = count_words("a a b", 2, &CancellationToken::new(), &noop())
            .unwrap()
            .unwrap();
        assert_eq!(tally.get("a"), Some(&2));
        assert_eq!(tally.get("b"), Some(&1));
        assert_eq!(count_words("   ", 2, &CancellationToken::new(), &noop()).unwrap(), None);
    }
}
