//! piecestore - piece bookkeeping for multi-source downloads
//!
//! This library tracks which fixed-size pieces of a download target have
//! been obtained, which are in flight, and which peer-advertised piece is
//! the best one to request next. It serves BitTorrent-style swarms as well
//! as segmented HTTP/FTP downloads.
//!
//! # Modules
//!
//! - [`bitfield`] - Raw bitmaps and the have/in-use/filter planes
//! - [`stats`] - Per-piece availability counters
//! - [`selector`] - Piece selection policies (rarest-first by default)
//! - [`piece`] - A partially downloaded piece and its blocks
//! - [`storage`] - The orchestrator, disk adaptor handle, and HAVE buffer
//! - [`context`] - Download description and storage options
//! - [`peer`] - The peer surface selection consumes (`bittorrent` feature)
//!
//! Peer I/O, hash verification, and actual disk writes are deliberately
//! outside this crate; it is the bookkeeping core those layers drive.

pub mod bitfield;
pub mod constants;
pub mod context;
pub mod error;
#[cfg(feature = "bittorrent")]
pub mod peer;
pub mod piece;
pub mod selector;
pub mod stats;
pub mod storage;

pub use bitfield::{Bitfield, BitfieldMan};
pub use context::{AllocationMode, DownloadContext, FileEntry, StorageOptions};
pub use error::StoreError;
#[cfg(feature = "bittorrent")]
pub use peer::Peer;
#[cfg(feature = "digest")]
pub use piece::HashAlgorithm;
pub use piece::{Piece, BLOCK_LENGTH};
pub use selector::{PieceSelector, RarestPieceSelector};
pub use stats::PieceStatMan;
pub use storage::{
    Clock, DefaultDiskWriterFactory, DiskAdaptor, DiskWriter, DiskWriterFactory, HaveEntry,
    PieceStorage, SteadyClock,
};
