//! Configuration types for wordtally

use crate::error::{Error, Result};
use crate::types::{SortKey, SortOrder};
use serde::{Deserialize, Serialize};

/// Chunked file reader settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Bytes per chunk claim (default: 8192)
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,

    /// Number of reader workers (None = available parallelism)
    ///
    /// Clamped to the chunk count of each file, so small files never spawn
    /// idle workers.
    #[serde(default)]
    pub parallelism: Option<usize>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            parallelism: None,
        }
    }
}

impl ReaderConfig {
    /// Worker count after resolving `None` to the machine's parallelism
    pub fn workers(&self) -> usize {
        self.parallelism.unwrap_or_else(available_parallelism)
    }
}

/// Word counting settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Number of counting workers (None = available parallelism)
    ///
    /// Clamped to the token count of each text.
    #[serde(default)]
    pub parallelism: Option<usize>,

    /// Sort key applied to the result of a full parse (default: count)
    #[serde(default)]
    pub sort_key: SortKey,

    /// Sort direction applied to the result of a full parse (default: descending)
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            parallelism: None,
            sort_key: SortKey::Count,
            sort_order: SortOrder::Descending,
        }
    }
}

impl CounterConfig {
    /// Worker count after resolving `None` to the machine's parallelism
    pub fn workers(&self) -> usize {
        self.parallelism.unwrap_or_else(available_parallelism)
    }
}

/// Progress notification settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Ceiling on progress events per second per operation (default: 5.0)
    ///
    /// The final 100% event is delivered regardless.
    #[serde(default = "default_max_updates_per_sec")]
    pub max_updates_per_sec: f64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            max_updates_per_sec: default_max_updates_per_sec(),
        }
    }
}

/// Main configuration for [`WordCounter`](crate::WordCounter)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Chunked reader settings
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Word counter settings
    #[serde(default)]
    pub counter: CounterConfig,

    /// Progress throttling
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Start a parse automatically when a load succeeds (default: true)
    #[serde(default = "default_true")]
    pub auto_parse: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            counter: CounterConfig::default(),
            progress: ProgressConfig::default(),
            auto_parse: true,
        }
    }
}

impl Config {
    /// Reject settings no operation could run with
    pub fn validate(&self) -> Result<()> {
        if self.reader.chunk_size_bytes == 0 {
            return Err(Error::config(
                "reader.chunk_size_bytes",
                "chunk size must be greater than zero",
            ));
        }
        if self.reader.parallelism == Some(0) {
            return Err(Error::config(
                "reader.parallelism",
                "parallelism must be at least 1",
            ));
        }
        if self.counter.parallelism == Some(0) {
            return Err(Error::config(
                "counter.parallelism",
                "parallelism must be at least 1",
            ));
        }
        let rate = self.progress.max_updates_per_sec;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::config(
                "progress.max_updates_per_sec",
                format!("rate must be a positive number, got {rate}"),
            ));
        }
        Ok(())
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_chunk_size() -> usize {
    8192
}

fn default_max_updates_per_sec() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}
