use thiserror::Error;

/// Errors surfaced by the piece bookkeeping core.
///
/// An empty candidate set is not an error; selection returns `None` in that
/// case. These variants all indicate caller bugs.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// A download description with a zero piece length.
    #[error("piece length must be non-zero")]
    ZeroPieceLength,

    /// A piece index at or beyond the number of pieces.
    #[error("piece index {index} out of range ({num_pieces} pieces)")]
    IndexOutOfRange { index: u32, num_pieces: u32 },

    /// A byte range extending past the total download length.
    #[error("byte range {offset}+{length} exceeds total length {total}")]
    RangeOutOfBounds { offset: u64, length: u64, total: u64 },

    /// A raw bitfield whose byte length does not match this download.
    #[error("bitfield length mismatch: expected {expected} bytes, got {actual}")]
    BitfieldLengthMismatch { expected: usize, actual: usize },
}
