//! What is being downloaded: lengths, files, and per-download options.

use std::ops::Range;
use std::path::PathBuf;
use std::time::Instant;

use parking_lot::Mutex;

use crate::constants::DEFAULT_MAX_OPEN_FILES;
#[cfg(feature = "digest")]
use crate::piece::HashAlgorithm;

/// A file inside the download target.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub length: u64,
    /// Byte offset of this file within the whole download.
    pub offset: u64,
    /// Whether the user asked for this file (selective downloading).
    pub requested: bool,
}

impl FileEntry {
    pub fn new(path: PathBuf, length: u64, offset: u64) -> Self {
        Self {
            path,
            length,
            offset,
            requested: true,
        }
    }

    pub fn byte_range(&self) -> Range<u64> {
        self.offset..self.offset + self.length
    }
}

/// Disk preallocation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationMode {
    /// Let the filesystem grow files on write.
    #[default]
    None,
    /// Write files out to full length up front.
    Prealloc,
    /// Reserve extents with posix_fallocate.
    Falloc,
}

/// Options consumed when the backing storage is initialized.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Open the underlying writer with O_DIRECT.
    pub direct_io: bool,
    /// Disk preallocation strategy for new files.
    pub file_allocation: AllocationMode,
    /// Cap on simultaneously open descriptors in multi-file mode.
    pub max_open_files: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            direct_io: false,
            file_allocation: AllocationMode::default(),
            max_open_files: DEFAULT_MAX_OPEN_FILES,
        }
    }
}

/// Immutable description of the download target.
#[derive(Debug)]
pub struct DownloadContext {
    piece_length: u32,
    total_length: u64,
    file_entries: Vec<FileEntry>,
    #[cfg(feature = "digest")]
    piece_hash_algo: Option<HashAlgorithm>,
    download_stop_time: Mutex<Option<Instant>>,
}

impl DownloadContext {
    pub fn new(piece_length: u32, total_length: u64, file_entries: Vec<FileEntry>) -> Self {
        Self {
            piece_length,
            total_length,
            file_entries,
            #[cfg(feature = "digest")]
            piece_hash_algo: None,
            download_stop_time: Mutex::new(None),
        }
    }

    /// A context for a single-file download spanning the whole length.
    pub fn single_file(piece_length: u32, total_length: u64, path: PathBuf) -> Self {
        Self::new(
            piece_length,
            total_length,
            vec![FileEntry::new(path, total_length, 0)],
        )
    }

    #[cfg(feature = "digest")]
    pub fn with_piece_hash_algo(mut self, algo: HashAlgorithm) -> Self {
        self.piece_hash_algo = Some(algo);
        self
    }

    #[cfg(feature = "digest")]
    pub fn piece_hash_algo(&self) -> Option<HashAlgorithm> {
        self.piece_hash_algo
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn num_pieces(&self) -> u32 {
        if self.piece_length == 0 {
            return 0;
        }
        self.total_length.div_ceil(u64::from(self.piece_length)) as u32
    }

    pub fn file_entries(&self) -> &[FileEntry] {
        &self.file_entries
    }

    /// Stamps the moment the download stopped making progress requests.
    pub fn reset_download_stop_time(&self) {
        *self.download_stop_time.lock() = Some(Instant::now());
    }

    pub fn download_stop_time(&self) -> Option<Instant> {
        *self.download_stop_time.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_pieces_rounds_up() {
        let ctx = DownloadContext::single_file(1024, 2500, "a.bin".into());
        assert_eq!(ctx.num_pieces(), 3);
    }

    #[test]
    fn file_entry_byte_range() {
        let entry = FileEntry::new("b.bin".into(), 100, 50);
        assert_eq!(entry.byte_range(), 50..150);
        assert!(entry.requested);
    }

    #[test]
    fn stop_time_is_recorded_once_reset() {
        let ctx = DownloadContext::single_file(1024, 2048, "c.bin".into());
        assert!(ctx.download_stop_time().is_none());
        ctx.reset_download_stop_time();
        assert!(ctx.download_stop_time().is_some());
    }
}
