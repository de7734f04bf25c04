//! Piece bookkeeping for one download.
//!
//! [`PieceStorage`] orchestrates everything a downloader needs to decide
//! what to fetch next: the three-plane bitfield, the in-flight piece
//! collection, rarest-first selection over availability stats, and the
//! buffer of recent completions that peers drain into HAVE messages.
//!
//! # Overview
//!
//! A peer hands over its advertised bitfield; the storage intersects it
//! with what is still missing (and, outside end-game, not already being
//! fetched), asks the selector for the rarest candidate, and checks the
//! piece out. Blocks arrive and are recorded on the shared [`crate::Piece`]
//! handle; once externally verified, `complete_piece` flips the have bit
//! and queues a HAVE advertisement. Cancelling a checkout with no progress
//! reclaims the entry so the in-flight set stays bounded.
//!
//! The whole module is single-threaded by contract: every method runs on
//! the download's event loop and nothing suspends.

mod adaptor;
mod clock;
mod have;
mod store;

pub use adaptor::{
    DefaultDiskWriter, DefaultDiskWriterFactory, DirectDiskAdaptor, DiskAdaptor, DiskWriter,
    DiskWriterFactory, MultiDiskAdaptor,
};
pub use clock::{Clock, SteadyClock};
pub use have::HaveEntry;
pub use store::PieceStorage;
