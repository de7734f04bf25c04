use std::fmt;
use std::path::{Path, PathBuf};

use crate::context::FileEntry;

/// Writable destination for one file's bytes.
///
/// The piece core only configures writers; opening descriptors and moving
/// bytes is the download engine's business.
pub trait DiskWriter: fmt::Debug {
    /// Path this writer targets.
    fn path(&self) -> &Path;

    /// Requests O_DIRECT once the descriptor is opened.
    fn allow_direct_io(&mut self);
}

/// Creates writers for destination paths.
pub trait DiskWriterFactory: fmt::Debug {
    fn new_disk_writer(&self, path: &Path) -> Box<dyn DiskWriter>;
}

/// Factory producing plain buffered writers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDiskWriterFactory;

impl DiskWriterFactory for DefaultDiskWriterFactory {
    fn new_disk_writer(&self, path: &Path) -> Box<dyn DiskWriter> {
        Box::new(DefaultDiskWriter {
            path: path.to_path_buf(),
            direct_io: false,
        })
    }
}

/// Writer configuration held until the engine opens the file.
#[derive(Debug)]
pub struct DefaultDiskWriter {
    path: PathBuf,
    direct_io: bool,
}

impl DefaultDiskWriter {
    pub fn direct_io(&self) -> bool {
        self.direct_io
    }
}

impl DiskWriter for DefaultDiskWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn allow_direct_io(&mut self) {
        self.direct_io = true;
    }
}

/// Handle to the configured on-disk layout.
///
/// Single-file downloads write straight through one writer; multi-file
/// downloads span pieces across entries and bound their open descriptors.
#[derive(Debug)]
pub enum DiskAdaptor {
    Direct(DirectDiskAdaptor),
    Multi(MultiDiskAdaptor),
}

impl DiskAdaptor {
    pub fn file_entries(&self) -> &[FileEntry] {
        match self {
            Self::Direct(d) => d.file_entries(),
            Self::Multi(m) => m.file_entries(),
        }
    }

    /// Asks the engine to reserve extents with posix_fallocate.
    pub fn enable_fallocate(&mut self) {
        match self {
            Self::Direct(d) => d.fallocate = true,
            Self::Multi(m) => m.fallocate = true,
        }
    }

    pub fn fallocate_enabled(&self) -> bool {
        match self {
            Self::Direct(d) => d.fallocate,
            Self::Multi(m) => m.fallocate,
        }
    }
}

/// Single-file layout writing through one disk writer.
#[derive(Debug)]
pub struct DirectDiskAdaptor {
    total_length: u64,
    file_entries: Vec<FileEntry>,
    writer: Box<dyn DiskWriter>,
    fallocate: bool,
}

impl DirectDiskAdaptor {
    pub fn new(total_length: u64, file_entries: Vec<FileEntry>, writer: Box<dyn DiskWriter>) -> Self {
        Self {
            total_length,
            file_entries,
            writer,
            fallocate: false,
        }
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn file_entries(&self) -> &[FileEntry] {
        &self.file_entries
    }

    pub fn writer(&self) -> &dyn DiskWriter {
        self.writer.as_ref()
    }
}

/// Multi-file layout with a bounded descriptor pool.
#[derive(Debug)]
pub struct MultiDiskAdaptor {
    file_entries: Vec<FileEntry>,
    piece_length: u32,
    max_open_files: usize,
    direct_io: bool,
    fallocate: bool,
}

impl MultiDiskAdaptor {
    pub fn new(file_entries: Vec<FileEntry>, piece_length: u32, max_open_files: usize) -> Self {
        Self {
            file_entries,
            piece_length,
            max_open_files,
            direct_io: false,
            fallocate: false,
        }
    }

    pub fn file_entries(&self) -> &[FileEntry] {
        &self.file_entries
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    /// Cap on simultaneously open descriptors; the engine closes the least
    /// recently used file past this bound.
    pub fn max_open_files(&self) -> usize {
        self.max_open_files
    }

    pub fn allow_direct_io(&mut self) {
        self.direct_io = true;
    }

    pub fn direct_io(&self) -> bool {
        self.direct_io
    }
}
