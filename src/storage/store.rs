use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::bitfield::{Bitfield, BitfieldMan};
use crate::constants::DEFAULT_END_GAME_PIECE_NUM;
use crate::context::{AllocationMode, DownloadContext, StorageOptions};
use crate::error::StoreError;
#[cfg(feature = "bittorrent")]
use crate::peer::Peer;
use crate::piece::{Piece, BLOCK_LENGTH};
use crate::selector::{PieceSelector, RarestPieceSelector};
use crate::stats::PieceStatMan;

use super::adaptor::{
    DefaultDiskWriterFactory, DirectDiskAdaptor, DiskAdaptor, DiskWriterFactory, MultiDiskAdaptor,
};
use super::clock::{Clock, SteadyClock};
use super::have::{HaveBuffer, HaveEntry};

/// Piece bookkeeping for one download.
///
/// Owns the three-plane bitfield, the in-flight piece collection, the
/// availability stats feeding rarest-first selection, and the buffer of
/// recent completions peers drain to send HAVE messages. All methods run on
/// the download's event loop; nothing here blocks or suspends.
pub struct PieceStorage {
    ctx: Arc<DownloadContext>,
    options: StorageOptions,
    bitfield: BitfieldMan,
    // Sorted by piece index, no duplicates.
    used_pieces: Vec<Arc<Piece>>,
    stats: PieceStatMan,
    selector: Box<dyn PieceSelector>,
    end_game_piece_num: u32,
    haves: HaveBuffer,
    disk: Option<DiskAdaptor>,
    writer_factory: Box<dyn DiskWriterFactory>,
    clock: Box<dyn Clock>,
}

impl PieceStorage {
    /// Fails if the context carries a zero piece length.
    pub fn new(ctx: Arc<DownloadContext>, options: StorageOptions) -> Result<Self, StoreError> {
        let bitfield = BitfieldMan::new(ctx.piece_length(), ctx.total_length())?;
        let stats = PieceStatMan::new(bitfield.num_pieces());
        Ok(Self {
            ctx,
            options,
            bitfield,
            used_pieces: Vec::new(),
            stats,
            selector: Box::new(RarestPieceSelector::new()),
            end_game_piece_num: DEFAULT_END_GAME_PIECE_NUM,
            haves: HaveBuffer::default(),
            disk: None,
            writer_factory: Box::new(DefaultDiskWriterFactory),
            clock: Box::new(SteadyClock),
        })
    }

    /// Swaps the selection policy.
    pub fn set_piece_selector(&mut self, selector: Box<dyn PieceSelector>) {
        self.selector = selector;
    }

    pub fn set_disk_writer_factory(&mut self, factory: Box<dyn DiskWriterFactory>) {
        self.writer_factory = factory;
    }

    pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = clock;
    }

    pub fn set_end_game_piece_num(&mut self, num: u32) {
        self.end_game_piece_num = num;
    }

    /// True once few enough pieces remain that the in-use exclusion is
    /// dropped and the tail is requested from several peers at once.
    pub fn is_end_game(&self) -> bool {
        self.bitfield.count_missing_pieces() <= self.end_game_piece_num
    }

    pub fn bitfield(&self) -> &BitfieldMan {
        &self.bitfield
    }

    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.is_bit_set(index)
    }

    pub fn is_piece_used(&self, index: u32) -> bool {
        self.bitfield.is_use_bit_set(index)
    }

    pub fn piece_length(&self, index: u32) -> u32 {
        self.bitfield.piece_length_at(index)
    }

    /// True if the peer holds any piece we still miss.
    pub fn has_missing_piece(&self, peer_bitfield: &Bitfield) -> bool {
        self.bitfield.has_missing_piece(peer_bitfield)
    }

    /// True if any piece is neither held nor checked out.
    pub fn has_missing_unused_piece(&self) -> bool {
        self.bitfield.first_missing_unused_index().is_some()
    }

    /// Selects a piece the peer can serve, checks it out, and returns it.
    ///
    /// Outside end-game, pieces already checked out are skipped; in
    /// end-game they are fair game again.
    pub fn get_missing_piece(&mut self, peer_bitfield: &Bitfield) -> Option<Arc<Piece>> {
        let index = self.missing_piece_index(peer_bitfield)?;
        Some(self.check_out(index))
    }

    /// Like [`Self::get_missing_piece`] with some indices removed from the
    /// candidate set first.
    pub fn get_missing_piece_excluding(
        &mut self,
        peer_bitfield: &Bitfield,
        excluded: &[u32],
    ) -> Option<Arc<Piece>> {
        let mut candidates = peer_bitfield.clone();
        for &index in excluded {
            candidates.clear(index as usize);
        }
        let index = self.missing_piece_index(&candidates)?;
        Some(self.check_out(index))
    }

    /// Checks out the piece at `index` if it is neither held nor in use.
    pub fn get_missing_piece_at(&mut self, index: u32) -> Result<Option<Arc<Piece>>, StoreError> {
        self.check_index(index)?;
        if self.has_piece(index) || self.is_piece_used(index) {
            return Ok(None);
        }
        Ok(Some(self.check_out(index)))
    }

    /// Selects a missing piece spread away from already held or busy
    /// regions instead of by rarity.
    pub fn get_sparse_missing_unused_piece(
        &mut self,
        ignore_bitfield: &Bitfield,
    ) -> Option<Arc<Piece>> {
        let index = self.bitfield.sparse_missing_unused_index(ignore_bitfield)?;
        Some(self.check_out(index))
    }

    /// Checks out `index` unconditionally, recovering any in-flight state.
    pub fn check_out_piece(&mut self, index: u32) -> Result<Arc<Piece>, StoreError> {
        self.check_index(index)?;
        Ok(self.check_out(index))
    }

    /// Looks up a piece without registering it: the in-flight entry when one
    /// exists, otherwise a detached piece (fully complete if already held).
    pub fn get_piece(&self, index: u32) -> Result<Arc<Piece>, StoreError> {
        self.check_index(index)?;
        if let Some(piece) = self.find_used_piece(index) {
            return Ok(piece);
        }
        let piece = Piece::new(index, self.bitfield.piece_length_at(index));
        if self.has_piece(index) {
            piece.set_all_blocks();
        }
        Ok(Arc::new(piece))
    }

    /// Records a fully downloaded, externally verified piece: it leaves the
    /// in-flight set, the have bit flips on, and we start counting as a
    /// source for it.
    pub fn complete_piece(&mut self, piece: &Arc<Piece>) {
        let index = piece.index();
        self.remove_used_piece(index);
        if self.all_download_finished() {
            return;
        }
        self.bitfield.set_bit(index);
        self.bitfield.unset_use_bit(index);
        self.stats.increment(index);
        if self.download_finished() {
            self.ctx.reset_download_stop_time();
            if self.is_selective_download() {
                info!("requested files downloaded");
            } else {
                info!("download completed");
            }
        }
    }

    /// Releases a checkout. Pieces with no progress are dropped from the
    /// in-flight set; partial progress is kept for the next checkout.
    pub fn cancel_piece(&mut self, piece: &Arc<Piece>) {
        let index = piece.index();
        self.bitfield.unset_use_bit(index);
        if !self.is_end_game() && piece.completed_length() == 0 {
            self.remove_used_piece(index);
        }
    }

    pub fn total_length(&self) -> u64 {
        self.bitfield.total_length()
    }

    pub fn filtered_total_length(&self) -> u64 {
        self.bitfield.filtered_total_length()
    }

    /// Bytes held plus bytes of partial in-flight progress, clamped to the
    /// total.
    pub fn completed_length(&self) -> u64 {
        let completed = self.bitfield.completed_length() + self.in_flight_completed_length();
        completed.min(self.total_length())
    }

    pub fn filtered_completed_length(&self) -> u64 {
        self.bitfield.filtered_completed_length() + self.in_flight_completed_length()
    }

    /// True once every requested piece is held.
    pub fn download_finished(&self) -> bool {
        self.bitfield.filtered_all_set()
    }

    /// True once every piece of the whole target is held.
    pub fn all_download_finished(&self) -> bool {
        self.bitfield.all_set()
    }

    pub fn is_selective_download(&self) -> bool {
        self.bitfield.is_filter_enabled()
    }

    /// Restricts completion to the requested files. A download with every
    /// file requested needs no filter and gets none.
    pub fn setup_file_filter(&mut self) -> Result<(), StoreError> {
        let ctx = self.ctx.clone();
        if ctx.file_entries().iter().all(|entry| entry.requested) {
            return Ok(());
        }
        for entry in ctx.file_entries() {
            if entry.requested {
                self.bitfield.add_filter(entry.offset, entry.length)?;
            }
        }
        self.bitfield.enable_filter();
        Ok(())
    }

    pub fn clear_file_filter(&mut self) {
        self.bitfield.clear_filter();
    }

    pub fn mark_all_pieces_done(&mut self) {
        self.bitfield.set_all();
    }

    /// Initializes the have plane from a byte length: whole pieces are
    /// held; a residual partial piece becomes in-flight progress. Length 0
    /// resets everything, including the in-flight set.
    pub fn mark_pieces_done(&mut self, length: u64) -> Result<(), StoreError> {
        if length > self.total_length() {
            return Err(StoreError::RangeOutOfBounds {
                offset: 0,
                length,
                total: self.total_length(),
            });
        }
        if length == self.total_length() {
            self.bitfield.set_all();
        } else if length == 0 {
            self.bitfield.clear_all();
            self.used_pieces.clear();
        } else {
            let piece_length = u64::from(self.bitfield.piece_length());
            let whole = (length / piece_length) as u32;
            if whole > 0 {
                self.bitfield.set_bit_range(0..whole);
            }
            let leading_blocks = ((length % piece_length) / u64::from(BLOCK_LENGTH)) as u32;
            if leading_blocks > 0 {
                let piece = self.new_piece(whole);
                for block in 0..leading_blocks {
                    piece.complete_block(block);
                }
                self.add_used_piece(Arc::new(piece));
            }
        }
        Ok(())
    }

    pub fn mark_piece_missing(&mut self, index: u32) -> Result<(), StoreError> {
        self.check_index(index)?;
        self.bitfield.unset_bit(index);
        Ok(())
    }

    /// Raw bytes of the have plane, for out-of-band persistence.
    pub fn bitfield_bytes(&self) -> &[u8] {
        self.bitfield.bitfield_bytes()
    }

    /// Restores the have plane and counts ourselves as a source for the
    /// held pieces.
    pub fn set_bitfield(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.bitfield.set_bitfield(bytes)?;
        let have = self.bitfield.bitfield().clone();
        self.stats.add(&have);
        Ok(())
    }

    /// Re-registers in-flight pieces from a previous session in this
    /// process; the merge keeps the set sorted and duplicate-free.
    pub fn add_in_flight_pieces(&mut self, pieces: Vec<Arc<Piece>>) {
        self.used_pieces.extend(pieces);
        self.used_pieces.sort_by_key(|p| p.index());
        self.used_pieces.dedup_by_key(|p| p.index());
    }

    pub fn in_flight_pieces(&self) -> Vec<Arc<Piece>> {
        self.used_pieces.clone()
    }

    pub fn count_in_flight_pieces(&self) -> usize {
        self.used_pieces.len()
    }

    /// Registers a local completion for peers to advertise.
    pub fn advertise_piece(&mut self, cuid: u64, index: u32) {
        let now = self.clock.now();
        self.haves.push(cuid, index, now);
    }

    /// Indexes advertised by other requesters since `last_check`, newest
    /// first.
    pub fn advertised_piece_indexes(&self, my_cuid: u64, last_check: Instant) -> Vec<u32> {
        self.haves.indexes_since(my_cuid, last_check)
    }

    /// The advertisement buffer, newest first.
    pub fn advertised_pieces(&self) -> impl Iterator<Item = &HaveEntry> {
        self.haves.iter()
    }

    /// Trims advertisements at least `elapsed` old.
    pub fn remove_advertised_piece(&mut self, elapsed: Duration) {
        let now = self.clock.now();
        let removed = self.haves.remove_older_than(elapsed, now);
        if removed > 0 {
            debug!(
                "trimmed {} have entries, {} remain",
                removed,
                self.haves.len()
            );
        }
    }

    /// Builds the disk adaptor for this download: a direct single-file
    /// adaptor when the target is one file, a multi-file adaptor otherwise.
    pub fn init_storage(&mut self) {
        let ctx = self.ctx.clone();
        let mut adaptor = if ctx.file_entries().len() == 1 {
            debug!("instantiating direct disk adaptor");
            let entry = &ctx.file_entries()[0];
            let mut writer = self.writer_factory.new_disk_writer(&entry.path);
            if self.options.direct_io {
                writer.allow_direct_io();
            }
            DiskAdaptor::Direct(DirectDiskAdaptor::new(
                ctx.total_length(),
                ctx.file_entries().to_vec(),
                writer,
            ))
        } else {
            debug!("instantiating multi disk adaptor");
            let mut multi = MultiDiskAdaptor::new(
                ctx.file_entries().to_vec(),
                ctx.piece_length(),
                self.options.max_open_files,
            );
            if self.options.direct_io {
                multi.allow_direct_io();
            }
            DiskAdaptor::Multi(multi)
        };
        if self.options.file_allocation == AllocationMode::Falloc {
            adaptor.enable_fallocate();
        }
        self.disk = Some(adaptor);
    }

    pub fn disk_adaptor(&self) -> Option<&DiskAdaptor> {
        self.disk.as_ref()
    }

    pub fn add_piece_stats(&mut self, bitfield: &Bitfield) {
        self.stats.add(bitfield);
    }

    pub fn subtract_piece_stats(&mut self, bitfield: &Bitfield) {
        self.stats.subtract(bitfield);
    }

    pub fn update_piece_stats(&mut self, new: &Bitfield, old: &Bitfield) {
        self.stats.update(new, old);
    }

    pub fn piece_stats(&self) -> &PieceStatMan {
        &self.stats
    }

    fn missing_piece_index(&mut self, peer_bitfield: &Bitfield) -> Option<u32> {
        let candidates = if self.is_end_game() {
            self.bitfield.missing_indexes(peer_bitfield)
        } else {
            self.bitfield.missing_unused_indexes(peer_bitfield)
        }?;
        self.selector.select(&candidates, &self.stats)
    }

    fn check_out(&mut self, index: u32) -> Arc<Piece> {
        self.bitfield.set_use_bit(index);
        if let Some(piece) = self.find_used_piece(index) {
            return piece;
        }
        let piece = Arc::new(self.new_piece(index));
        self.add_used_piece(piece.clone());
        piece
    }

    fn new_piece(&self, index: u32) -> Piece {
        #[cfg_attr(not(feature = "digest"), allow(unused_mut))]
        let mut piece = Piece::new(index, self.bitfield.piece_length_at(index));
        #[cfg(feature = "digest")]
        piece.set_hash_algo(self.ctx.piece_hash_algo());
        piece
    }

    fn find_used_piece(&self, index: u32) -> Option<Arc<Piece>> {
        self.used_pieces
            .binary_search_by_key(&index, |p| p.index())
            .ok()
            .map(|pos| self.used_pieces[pos].clone())
    }

    fn add_used_piece(&mut self, piece: Arc<Piece>) {
        if let Err(pos) = self
            .used_pieces
            .binary_search_by_key(&piece.index(), |p| p.index())
        {
            self.used_pieces.insert(pos, piece);
            debug!("{} pieces in flight", self.used_pieces.len());
        }
    }

    fn remove_used_piece(&mut self, index: u32) {
        if let Ok(pos) = self
            .used_pieces
            .binary_search_by_key(&index, |p| p.index())
        {
            self.used_pieces.remove(pos);
        }
    }

    fn in_flight_completed_length(&self) -> u64 {
        self.used_pieces
            .iter()
            .map(|p| u64::from(p.completed_length()))
            .sum()
    }

    fn check_index(&self, index: u32) -> Result<(), StoreError> {
        let num_pieces = self.bitfield.num_pieces();
        if index >= num_pieces {
            return Err(StoreError::IndexOutOfRange { index, num_pieces });
        }
        Ok(())
    }
}

#[cfg(feature = "bittorrent")]
impl PieceStorage {
    /// True if `peer` advertises any piece we still miss.
    pub fn has_missing_piece_from(&self, peer: &Peer) -> bool {
        self.has_missing_piece(peer.bitfield())
    }

    /// Selects and checks out a piece from `peer`'s advertised set.
    pub fn get_missing_piece_from(&mut self, peer: &Peer) -> Option<Arc<Piece>> {
        self.get_missing_piece(peer.bitfield())
    }

    /// Like [`Self::get_missing_piece_from`] minus `excluded`.
    pub fn get_missing_piece_from_excluding(
        &mut self,
        peer: &Peer,
        excluded: &[u32],
    ) -> Option<Arc<Piece>> {
        self.get_missing_piece_excluding(peer.bitfield(), excluded)
    }

    /// Selects from the peer's allowed-fast set, the pieces it serves even
    /// while choking us. Absent unless the peer negotiated the fast
    /// extension and granted a non-empty set.
    pub fn get_missing_fast_piece(&mut self, peer: &Peer) -> Option<Arc<Piece>> {
        self.get_missing_fast_piece_excluding(peer, &[])
    }

    /// Like [`Self::get_missing_fast_piece`] minus `excluded`.
    pub fn get_missing_fast_piece_excluding(
        &mut self,
        peer: &Peer,
        excluded: &[u32],
    ) -> Option<Arc<Piece>> {
        if !peer.is_fast_extension_enabled() || peer.allowed_fast().is_empty() {
            return None;
        }
        let mut candidates = Bitfield::new(self.bitfield.num_pieces() as usize);
        for &index in peer.allowed_fast() {
            if !self.bitfield.is_bit_set(index) && peer.has_piece(index) {
                candidates.set(index as usize);
            }
        }
        for &index in excluded {
            candidates.clear(index as usize);
        }
        let index = self.missing_piece_index(&candidates)?;
        Some(self.check_out(index))
    }
}
