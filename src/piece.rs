//! A partially downloaded piece and its block bookkeeping.

use std::cmp::Ordering;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::bitfield::Bitfield;

/// Size of a single transfer block (16 KiB), the unit of one network request.
pub const BLOCK_LENGTH: u32 = 16_384;

/// Identifier of the digest that verifies a completed piece.
///
/// Verification itself happens outside the piece core; this only records
/// which algorithm applies.
#[cfg(feature = "digest")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

#[cfg(feature = "digest")]
impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha-1",
            Self::Sha256 => "sha-256",
        }
    }
}

/// A piece being assembled from fixed-size blocks.
///
/// Identity and ordering are defined by the index alone. The block bitmap is
/// interior-mutable so every holder of a shared handle observes the same
/// progress.
#[derive(Debug)]
pub struct Piece {
    index: u32,
    length: u32,
    blocks: RwLock<Bitfield>,
    #[cfg(feature = "digest")]
    hash_algo: Option<HashAlgorithm>,
}

impl Piece {
    /// Creates a piece of `length` bytes with no blocks completed.
    pub fn new(index: u32, length: u32) -> Self {
        let block_count = length.div_ceil(BLOCK_LENGTH) as usize;
        Self {
            index,
            length,
            blocks: RwLock::new(Bitfield::new(block_count)),
            #[cfg(feature = "digest")]
            hash_algo: None,
        }
    }

    /// Restores a piece from a previously exported block bitmap.
    pub fn with_blocks(index: u32, length: u32, blocks: &[u8]) -> Self {
        let block_count = length.div_ceil(BLOCK_LENGTH) as usize;
        Self {
            index,
            length,
            blocks: RwLock::new(Bitfield::from_bytes(blocks, block_count)),
            #[cfg(feature = "digest")]
            hash_algo: None,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Byte length of this piece; the final piece of a download may be
    /// shorter than the nominal piece length.
    pub fn length(&self) -> u32 {
        self.length
    }

    #[cfg(feature = "digest")]
    pub fn set_hash_algo(&mut self, algo: Option<HashAlgorithm>) {
        self.hash_algo = algo;
    }

    #[cfg(feature = "digest")]
    pub fn hash_algo(&self) -> Option<HashAlgorithm> {
        self.hash_algo
    }

    /// Number of blocks in this piece.
    pub fn count_block(&self) -> u32 {
        self.length.div_ceil(BLOCK_LENGTH)
    }

    /// Byte length of the block at `block_index`; only the final block may
    /// be short. Out-of-range indices yield 0.
    pub fn block_length(&self, block_index: u32) -> u32 {
        let offset = u64::from(block_index) * u64::from(BLOCK_LENGTH);
        let remaining = u64::from(self.length).saturating_sub(offset);
        remaining.min(u64::from(BLOCK_LENGTH)) as u32
    }

    /// Records the block at `block_index` as downloaded.
    pub fn complete_block(&self, block_index: u32) {
        self.blocks.write().set(block_index as usize);
    }

    pub fn is_block_complete(&self, block_index: u32) -> bool {
        self.blocks.read().is_set(block_index as usize)
    }

    pub fn count_complete_block(&self) -> u32 {
        self.blocks.read().count_ones() as u32
    }

    /// Marks every block as downloaded.
    pub fn set_all_blocks(&self) {
        self.blocks.write().set_all();
    }

    /// True once every block is downloaded.
    pub fn is_complete(&self) -> bool {
        self.blocks.read().is_all_set()
    }

    /// Bytes downloaded so far; the final block may be short.
    pub fn completed_length(&self) -> u32 {
        let blocks = self.blocks.read();
        let complete = blocks.count_ones() as u32;
        if complete == 0 {
            return 0;
        }
        let last = blocks.len() - 1;
        if blocks.is_set(last) {
            (complete - 1) * BLOCK_LENGTH + self.block_length(last as u32)
        } else {
            complete * BLOCK_LENGTH
        }
    }

    /// Exports the block bitmap, e.g. for session resume.
    pub fn block_bitfield(&self) -> Bytes {
        self.blocks.read().to_bytes()
    }
}

impl PartialEq for Piece {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Piece {}

impl PartialOrd for Piece {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Piece {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}
