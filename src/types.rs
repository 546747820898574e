//! Core types for wordtally

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pipeline stage guarded by its own coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Chunked file read
    Load,
    /// Word counting
    Parse,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Load => f.write_str("load"),
            Stage::Parse => f.write_str("parse"),
        }
    }
}

/// Per-stage operation generation
///
/// Every `start` on a stage allocates the next generation. Events carry the
/// generation they were produced under and are dropped at delivery once it
/// is no longer the stage's live generation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// Sentinel for "no live operation"; never handed out by a coordinator
    pub const NONE: Generation = Generation(0);

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Generation {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coordinator state for one stage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Nothing has run yet
    #[default]
    Idle,
    /// An operation is in flight
    Running,
    /// The last operation's result was delivered
    Completed,
    /// The last operation was cancelled or superseded
    Canceled,
    /// The last operation failed
    Failed,
}

impl TaskState {
    /// Whether a new operation may start without superseding anything
    pub fn is_resting(&self) -> bool {
        !matches!(self, TaskState::Running)
    }
}

/// Outcome of a load request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    /// File read completely
    Success,
    /// Path does not exist or is not a regular file
    NotFound,
    /// File exists but could not be opened for reading
    PermissionDenied,
    /// Cancellation was observed before the read finished
    Canceled,
}

/// Result of a load; `content` is present iff `status` is [`LoadStatus::Success`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    /// Load outcome
    pub status: LoadStatus,
    /// Decoded file content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Arc<str>>,
}

impl LoadResult {
    /// Successful load carrying the decoded text
    pub fn success(content: impl Into<Arc<str>>) -> Self {
        Self {
            status: LoadStatus::Success,
            content: Some(content.into()),
        }
    }

    /// Unsuccessful load; never carries content
    pub fn failed(status: LoadStatus) -> Self {
        debug_assert!(status != LoadStatus::Success);
        Self {
            status,
            content: None,
        }
    }

    /// Whether the load succeeded
    pub fn is_success(&self) -> bool {
        self.status == LoadStatus::Success
    }
}

/// A contiguous byte range of the source file read by one worker claim
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the reassembly order
    pub index: usize,
    /// Byte offset of the first byte
    pub offset: u64,
    /// Number of bytes in the chunk
    pub len: usize,
}

impl Chunk {
    /// Number of chunks needed to cover `total_bytes`
    pub fn count(total_bytes: u64, chunk_size: usize) -> usize {
        total_bytes.div_ceil(chunk_size as u64) as usize
    }

    /// The chunk starting at `offset`, or `None` past the end of the file
    ///
    /// The last chunk is shortened to the remainder.
    pub fn at(offset: u64, chunk_size: usize, total_bytes: u64) -> Option<Self> {
        if offset >= total_bytes {
            return None;
        }
        let len = (total_bytes - offset).min(chunk_size as u64) as usize;
        Some(Self {
            index: (offset / chunk_size as u64) as usize,
            offset,
            len,
        })
    }
}

/// Sort key for a word-count result
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Numeric order of counts
    #[default]
    Count,
    /// Ordinal order of words
    Word,
}

/// Sort direction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Smallest first
    Ascending,
    /// Largest first
    #[default]
    Descending,
}

impl SortOrder {
    /// The other direction
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            SortOrder::Ascending => SortOrder::Descending,
            SortOrder::Descending => SortOrder::Ascending,
        }
    }
}

/// One row of a word-count result
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WordCount {
    /// The word
    pub word: String,
    /// Number of occurrences
    pub count: u64,
}

impl WordCount {
    /// Create a row
    pub fn new(word: impl Into<String>, count: u64) -> Self {
        Self {
            word: word.into(),
            count,
        }
    }
}

/// Sorted word counts plus their change-detection fingerprint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCountResult {
    /// Rows in sort order
    pub entries: Vec<WordCount>,
    /// 32-bit FNV-1a over the rows, see [`crate::counter::fingerprint`]
    pub fingerprint: u32,
}

impl WordCountResult {
    /// Number of distinct words
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no rows
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows as `(word, count)` pairs
    pub fn pairs(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|e| (e.word.as_str(), e.count))
    }
}

/// Event delivered to the consumer loop
///
/// Every variant carries the generation it was produced under so stale
/// deliveries can be dropped. Terminal variants end an operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Throttled progress update
    Progress {
        /// Stage reporting progress
        stage: Stage,
        /// Operation generation
        generation: Generation,
        /// Percentage complete (0 to 100)
        percent: u8,
    },

    /// Load finished (terminal)
    Loaded {
        /// Operation generation
        generation: Generation,
        /// Load outcome and content
        result: LoadResult,
    },

    /// Parse finished (terminal); `None` when the text had no words
    Parsed {
        /// Operation generation
        generation: Generation,
        /// Sorted counts and fingerprint
        result: Option<WordCountResult>,
    },

    /// Operation failed with an unexpected fault (terminal)
    Failed {
        /// Stage that failed
        stage: Stage,
        /// Operation generation
        generation: Generation,
        /// Error message
        error: String,
    },
}

impl Event {
    /// Stage that produced the event
    pub fn stage(&self) -> Stage {
        match self {
            Event::Progress { stage, .. } | Event::Failed { stage, .. } => *stage,
            Event::Loaded { .. } => Stage::Load,
            Event::Parsed { .. } => Stage::Parse,
        }
    }

    /// Generation the event was produced under
    pub fn generation(&self) -> Generation {
        match self {
            Event::Progress { generation, .. }
            | Event::Loaded { generation, .. }
            | Event::Parsed { generation, .. }
            | Event::Failed { generation, .. } => *generation,
        }
    }

    /// Whether the event ends its operation
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Event::Progress { .. })
    }
}
