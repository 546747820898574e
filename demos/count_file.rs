//! Count the words of a file
//!
//! This example demonstrates the core functionality of wordtally:
//! - Creating a counter instance
//! - Loading a file and letting the parse start automatically
//! - Monitoring progress from the consumer loop
//! - Re-sorting the result without re-scanning
//!
//! ```bash
//! RUST_LOG=wordtally=debug cargo run --example count_file -- book.txt 20
//! ```

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wordtally::{Config, Event, LoadStatus, SortKey, SortOrder, WordCounter, run_with_shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: count_file <path> [top]");
        std::process::exit(2);
    };
    let top: usize = args.next().and_then(|n| n.parse().ok()).unwrap_or(10);

    let counter = Arc::new(WordCounter::new(Config::default())?);

    // Ctrl+C shuts the counter down, which ends the loop below
    let watcher = Arc::clone(&counter);
    tokio::spawn(async move { run_with_shutdown(&watcher).await });

    counter.start_load(&path)?;

    while let Some(event) = counter.next_event().await {
        match event {
            Event::Progress { stage, percent, .. } => {
                println!("⏳ {stage}: {percent}%");
            }
            Event::Loaded { result, .. } => match result.status {
                LoadStatus::Success => {
                    let bytes = result.content.as_deref().map_or(0, str::len);
                    println!("✓ Loaded {path} ({bytes} bytes of text), counting");
                }
                LoadStatus::NotFound => {
                    eprintln!("✗ {path}: file not found");
                    break;
                }
                LoadStatus::PermissionDenied => {
                    eprintln!("✗ {path}: permission denied");
                    break;
                }
                LoadStatus::Canceled => break,
            },
            Event::Parsed { result: None, .. } => {
                println!("No words in {path}");
                break;
            }
            Event::Parsed {
                result: Some(result),
                ..
            } => {
                println!(
                    "✓ {} distinct words (fingerprint {:08x})",
                    result.len(),
                    result.fingerprint
                );
                for (word, count) in result.pairs().take(top) {
                    println!("{count:>10}  {word}");
                }

                if let Some(rarest) = counter.resort(SortKey::Count, SortOrder::Ascending) {
                    let words: Vec<&str> = rarest.pairs().take(top).map(|(w, _)| w).collect();
                    println!("Rarest: {}", words.join(", "));
                }
                break;
            }
            Event::Failed { stage, error, .. } => {
                eprintln!("✗ {stage} failed: {error}");
                break;
            }
        }
    }

    counter.shutdown().await;
    Ok(())
}
