//! Text fixtures and file generators

use std::io::Write;
use tempfile::NamedTempFile;

/// Short text with known counts: the=4, fox=2, dog=2, everything else 1
pub const SMALL_TEXT: &str = "the quick brown fox jumps over the lazy dog the fox and the dog";

/// Write `bytes` to a fresh temporary file
pub fn write_temp_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(bytes).expect("write temp file");
    file.flush().expect("flush temp file");
    file
}

/// Deterministic text of roughly `len` bytes
///
/// Mixes repeated words, runs of spaces, tabs, newlines and Latin-1 bytes so
/// chunk boundaries land in every kind of position.
pub fn generate_text(len: usize) -> Vec<u8> {
    const PIECES: &[&[u8]] = &[
        b"alpha ",
        b"beta  ",
        b"gamma\n",
        b"alpha\tbeta ",
        b"caf\xe9 ",
        b"delta ",
        b"   ",
        b"epsilon ",
        b"alpha ",
    ];

    let mut bytes = Vec::with_capacity(len + 16);
    let mut i = 0;
    while bytes.len() < len {
        bytes.extend_from_slice(PIECES[i % PIECES.len()]);
        // Vary the cycle so the pattern is not periodic in the chunk size
        i += 1 + (bytes.len() % 3);
    }
    bytes.truncate(len);
    bytes
}

/// Decode bytes the way the reader does (one character per byte)
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
