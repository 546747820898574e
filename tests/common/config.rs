//! Test configuration helpers for creating counters

use wordtally::{Config, WordCounter};

/// Configuration with small chunks and a high progress ceiling
///
/// Small chunks make even short fixtures span many worker claims.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.reader.chunk_size_bytes = 64;
    config.reader.parallelism = Some(4);
    config.counter.parallelism = Some(4);
    config.progress.max_updates_per_sec = 1000.0;
    config
}

/// Create a counter from [`test_config`], optionally without the automatic parse
pub fn create_test_counter(auto_parse: bool) -> WordCounter {
    let mut config = test_config();
    config.auto_parse = auto_parse;
    WordCounter::new(config).expect("test config must be valid")
}
