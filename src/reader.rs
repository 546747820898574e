//! Chunked parallel file reader
//!
//! A file is cut into fixed-size byte ranges ([`Chunk`]s). Reader workers on
//! the blocking pool claim chunks from a shared atomic cursor, read them with
//! positional reads on their own file handle, decode them and drop the text
//! into a pre-sized slot array at the chunk's index. Concatenating the slots
//! in index order reproduces the file regardless of completion order.
//!
//! Text is decoded as ISO-8859-1: every byte is one character, so byte
//! offsets and character offsets coincide and chunk boundaries never split a
//! character.

use crate::config::ReaderConfig;
use crate::error::{Error, Result};
use crate::throttle::ProgressFn;
use crate::types::{Chunk, LoadResult, LoadStatus, Stage};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Buffer size for the sequential reader
const SEQUENTIAL_BUFFER: usize = 1024;

/// Cross-platform positional file read.
///
/// Fills `buf` from `file` starting at byte `offset`, equivalent to Unix `pread`
/// in a loop. Fails with `UnexpectedEof` if the file is shorter than expected.
#[cfg(unix)]
fn read_exact_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

/// Cross-platform positional file read.
///
/// Fills `buf` from `file` starting at byte `offset`, equivalent to Unix `pread`
/// in a loop. Fails with `UnexpectedEof` if the file is shorter than expected.
#[cfg(windows)]
fn read_exact_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.seek_read(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer",
            ));
        }
        filled += n;
    }
    Ok(())
}

/// Cross-platform positional file read.
#[cfg(not(any(unix, windows)))]
fn read_exact_at(_file: &std::fs::File, _buf: &mut [u8], _offset: u64) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "positional reads not supported on this platform",
    ))
}

/// Decode single-byte text: byte `b` becomes code point `U+00b`
pub(crate) fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Cancels the token if the owning worker unwinds, so siblings stop claiming
struct AbortOnPanic(CancellationToken);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.cancel();
        }
    }
}

/// State shared by the workers of one chunked load
struct ReadState {
    path: PathBuf,
    chunk_size: usize,
    total_bytes: u64,
    /// Next unclaimed byte offset
    cursor: AtomicU64,
    /// Bytes stored so far, for progress
    bytes_read: AtomicU64,
    /// One set-once slot per chunk index
    slots: Vec<OnceLock<String>>,
    /// Caller's token, observed between claims
    cancel: CancellationToken,
    /// Child token also tripped by a failing sibling
    abort: CancellationToken,
    progress: ProgressFn,
}

impl ReadState {
    /// Worker body: claim, read, decode, store, report, repeat
    fn run_worker(&self, worker_id: usize) -> Result<usize> {
        let _guard = AbortOnPanic(self.abort.clone());
        let file = std::fs::File::open(&self.path)?;
        let mut buffer = vec![0_u8; self.chunk_size];
        let mut claimed = 0;

        loop {
            let offset = self
                .cursor
                .fetch_add(self.chunk_size as u64, Ordering::Relaxed);
            let Some(chunk) = Chunk::at(offset, self.chunk_size, self.total_bytes) else {
                break;
            };

            if self.abort.is_cancelled() {
                tracing::debug!(worker_id, chunk = chunk.index, "reader worker stopping on cancellation");
                break;
            }

            let bytes = &mut buffer[..chunk.len];
            if let Err(e) = read_exact_at(&file, bytes, chunk.offset) {
                self.abort.cancel();
                return Err(e.into());
            }

            if self.slots[chunk.index].set(decode_latin1(bytes)).is_err() {
                tracing::error!(worker_id, chunk = chunk.index, "chunk slot written twice");
            }
            claimed += 1;

            let done = self.bytes_read.fetch_add(chunk.len as u64, Ordering::AcqRel)
                + chunk.len as u64;
            (self.progress)((done * 100 / self.total_bytes) as u8);
        }

        Ok(claimed)
    }

    /// Concatenate the slots in index order
    fn assemble(&self) -> Result<String> {
        let mut content = String::with_capacity(self.total_bytes as usize);
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(text) = slot.get() else {
                return Err(Error::Io(std::io::Error::other(format!(
                    "chunk {index} was never read"
                ))));
            };
            content.push_str(text);
        }
        Ok(content)
    }
}

/// Parallel chunked reader for single-byte text files
#[derive(Clone, Debug)]
pub struct ChunkedFileReader {
    chunk_size: usize,
    parallelism: usize,
}

impl ChunkedFileReader {
    /// Create a reader with the given chunk size and worker count (both at least 1)
    #[must_use]
    pub fn new(chunk_size: usize, parallelism: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            parallelism: parallelism.max(1),
        }
    }

    /// Create a reader from configuration
    #[must_use]
    pub fn from_config(config: &ReaderConfig) -> Self {
        Self::new(config.chunk_size_bytes, config.workers())
    }

    /// Bytes per chunk claim
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Upper bound on reader workers
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Load a file with parallel chunked reads
    ///
    /// Existence and read permission are checked once up front; failing
    /// either returns the matching [`LoadStatus`] without spawning workers.
    /// If `cancel` fires before the load finishes the result is
    /// [`LoadStatus::Canceled`] and partial content is discarded.
    ///
    /// # Errors
    ///
    /// I/O failures after the preconditions passed (e.g. the file shrank
    /// mid-read) and worker panics. All workers are joined before returning.
    pub async fn load(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        on_progress: ProgressFn,
    ) -> Result<LoadResult> {
        let total_bytes = match check_preconditions(path).await? {
            Ok(len) => len,
            Err(status) => return Ok(LoadResult::failed(status)),
        };

        if total_bytes == 0 {
            tracing::debug!(path = %path.display(), "empty file, nothing to read");
            return Ok(LoadResult::success(""));
        }

        let chunk_count = Chunk::count(total_bytes, self.chunk_size);
        let workers = self.parallelism.min(chunk_count);

        tracing::debug!(
            path = %path.display(),
            bytes = total_bytes,
            chunks = chunk_count,
            workers,
            "starting chunked load"
        );

        let state = Arc::new(ReadState {
            path: path.to_path_buf(),
            chunk_size: self.chunk_size,
            total_bytes,
            cursor: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            slots: (0..chunk_count).map(|_| OnceLock::new()).collect(),
            cancel: cancel.clone(),
            abort: cancel.child_token(),
            progress: on_progress,
        });

        let handles = (0..workers).map(|worker_id| {
            let state = Arc::clone(&state);
            tokio::task::spawn_blocking(move || state.run_worker(worker_id))
        });
        let outcomes = futures::future::join_all(handles).await;

        let mut first_error: Option<Error> = None;
        for outcome in outcomes {
            let error = match outcome {
                Ok(Ok(_claimed)) => continue,
                Ok(Err(e)) => e,
                Err(join_error) => match join_error.try_into_panic() {
                    Ok(payload) => Error::from_panic(Stage::Load, payload),
                    Err(_) => Error::Cancelled,
                },
            };
            // A panic outranks the I/O error or cancellation it caused in siblings
            if first_error.is_none() || matches!(error, Error::WorkerPanicked { .. }) {
                first_error = Some(error);
            }
        }

        if let Some(error) = first_error {
            tracing::warn!(path = %path.display(), error = %error, "chunked load failed");
            return Err(error);
        }

        if state.cancel.is_cancelled() {
            tracing::debug!(path = %path.display(), "chunked load canceled");
            return Ok(LoadResult::failed(LoadStatus::Canceled));
        }

        let content = state.assemble()?;
        tracing::info!(path = %path.display(), bytes = total_bytes, chunks = chunk_count, "file loaded");
        Ok(LoadResult::success(content))
    }

    /// Load a file on a single blocking thread with a plain buffered read
    ///
    /// Same preconditions, decoding and cancellation semantics as
    /// [`load`](Self::load); progress is reported after every buffer.
    pub async fn load_sequential(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        on_progress: ProgressFn,
    ) -> Result<LoadResult> {
        let total_bytes = match check_preconditions(path).await? {
            Ok(len) => len,
            Err(status) => return Ok(LoadResult::failed(status)),
        };

        let path_owned = path.to_path_buf();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || -> Result<LoadResult> {
            let mut file = std::fs::File::open(&path_owned)?;
            let mut buffer = [0_u8; SEQUENTIAL_BUFFER];
            let mut content = String::with_capacity(total_bytes as usize);
            let mut bytes_read = 0_u64;

            loop {
                let n = file.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                content.push_str(&decode_latin1(&buffer[..n]));
                bytes_read += n as u64;
                if total_bytes > 0 {
                    on_progress((bytes_read.min(total_bytes) * 100 / total_bytes) as u8);
                }
                if cancel.is_cancelled() {
                    return Ok(LoadResult::failed(LoadStatus::Canceled));
                }
            }

            Ok(LoadResult::success(content))
        })
        .await
        .map_err(|e| match e.try_into_panic() {
            Ok(payload) => Error::from_panic(Stage::Load, payload),
            Err(_) => Error::Cancelled,
        })?
    }
}

/// Existence, then read permission; `Ok(Err(status))` short-circuits the load
async fn check_preconditions(path: &Path) -> Result<std::result::Result<u64, LoadStatus>> {
    use std::io::ErrorKind;

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "file not found");
            return Ok(Err(LoadStatus::NotFound));
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Ok(Err(LoadStatus::PermissionDenied));
        }
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_file() {
        tracing::debug!(path = %path.display(), "path is not a regular file");
        return Ok(Err(LoadStatus::NotFound));
    }

    match tokio::fs::File::open(path).await {
        Ok(_) => Ok(Ok(metadata.len())),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            tracing::debug!(path = %path.display(), "read permission denied");
            Ok(Err(LoadStatus::PermissionDenied))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Err(LoadStatus::NotFound)),
        Err(e) => Err(e.into()),
    }
}
