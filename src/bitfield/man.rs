use super::Bitfield;
use crate::error::StoreError;

/// Piece-granular bookkeeping over three parallel planes.
///
/// `have` records pieces fully downloaded, `in_use` records pieces checked
/// out to a downloader, and the optional `filter` restricts the universe to
/// the pieces that actually count toward completion (selective downloading).
/// All selection primitives honor the filter when it is enabled.
#[derive(Debug, Clone)]
pub struct BitfieldMan {
    piece_length: u32,
    total_length: u64,
    num_pieces: u32,
    have: Bitfield,
    in_use: Bitfield,
    filter: Option<Bitfield>,
    filter_enabled: bool,
}

impl BitfieldMan {
    /// Creates bookkeeping for a download of `total_length` bytes split into
    /// `piece_length`-byte pieces; the final piece may be short. A zero
    /// piece length is rejected.
    pub fn new(piece_length: u32, total_length: u64) -> Result<Self, StoreError> {
        if piece_length == 0 {
            return Err(StoreError::ZeroPieceLength);
        }
        let num_pieces = total_length.div_ceil(u64::from(piece_length)) as u32;
        Ok(Self {
            piece_length,
            total_length,
            num_pieces,
            have: Bitfield::new(num_pieces as usize),
            in_use: Bitfield::new(num_pieces as usize),
            filter: None,
            filter_enabled: false,
        })
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn num_pieces(&self) -> u32 {
        self.num_pieces
    }

    /// Byte length of the raw bitfield representation.
    pub fn byte_length(&self) -> usize {
        (self.num_pieces as usize).div_ceil(8)
    }

    /// Length in bytes of the piece at `index`; only the final piece may be
    /// shorter than the nominal piece length. Out-of-range indices yield 0.
    pub fn piece_length_at(&self, index: u32) -> u32 {
        if index >= self.num_pieces {
            return 0;
        }
        if index + 1 == self.num_pieces {
            (self.total_length - u64::from(index) * u64::from(self.piece_length)) as u32
        } else {
            self.piece_length
        }
    }

    pub fn set_bit(&mut self, index: u32) {
        self.have.set(index as usize);
    }

    pub fn unset_bit(&mut self, index: u32) {
        self.have.clear(index as usize);
    }

    pub fn is_bit_set(&self, index: u32) -> bool {
        self.have.is_set(index as usize)
    }

    pub fn set_use_bit(&mut self, index: u32) {
        self.in_use.set(index as usize);
    }

    pub fn unset_use_bit(&mut self, index: u32) {
        self.in_use.clear(index as usize);
    }

    pub fn is_use_bit_set(&self, index: u32) -> bool {
        self.in_use.is_set(index as usize)
    }

    /// Marks every piece as held.
    pub fn set_all(&mut self) {
        self.have.set_all();
    }

    /// Marks every piece as missing.
    pub fn clear_all(&mut self) {
        self.have.clear_all();
    }

    /// Marks the pieces in `range` as held, clamped to the piece count.
    pub fn set_bit_range(&mut self, range: std::ops::Range<u32>) {
        self.have
            .set_range(range.start as usize..range.end as usize);
    }

    /// Adds every piece intersecting the byte range `[offset, offset+length)`
    /// to the filter plane. The filter takes effect once enabled.
    pub fn add_filter(&mut self, offset: u64, length: u64) -> Result<(), StoreError> {
        if offset + length > self.total_length {
            return Err(StoreError::RangeOutOfBounds {
                offset,
                length,
                total: self.total_length,
            });
        }
        let filter = self
            .filter
            .get_or_insert_with(|| Bitfield::new(self.num_pieces as usize));
        if length > 0 {
            let piece_length = u64::from(self.piece_length);
            let first = (offset / piece_length) as usize;
            let last = ((offset + length - 1) / piece_length) as usize;
            filter.set_range(first..last + 1);
        }
        Ok(())
    }

    pub fn enable_filter(&mut self) {
        self.filter_enabled = true;
    }

    /// Drops the filter plane entirely.
    pub fn clear_filter(&mut self) {
        self.filter = None;
        self.filter_enabled = false;
    }

    pub fn is_filter_enabled(&self) -> bool {
        self.filter_enabled
    }

    fn active_filter(&self) -> Option<&Bitfield> {
        if self.filter_enabled {
            self.filter.as_ref()
        } else {
            None
        }
    }

    /// Number of pieces still missing, within the filter when enabled.
    pub fn count_missing_pieces(&self) -> u32 {
        match self.active_filter() {
            Some(filter) => {
                let mut missing = filter.clone();
                missing.subtract(&self.have);
                missing.count_ones() as u32
            }
            None => self.num_pieces - self.have.count_ones() as u32,
        }
    }

    /// True if the peer holds any piece we miss, within the filter.
    pub fn has_missing_piece(&self, peer_bitfield: &Bitfield) -> bool {
        let have = self.have.as_bytes();
        let peer = peer_bitfield.as_bytes();
        match self.active_filter() {
            Some(filter) => have
                .iter()
                .zip(peer)
                .zip(filter.as_bytes())
                .any(|((&h, &p), &f)| !h & p & f != 0),
            None => have.iter().zip(peer).any(|(&h, &p)| !h & p != 0),
        }
    }

    /// Lowest index that is neither held nor in use, within the filter.
    pub fn first_missing_unused_index(&self) -> Option<u32> {
        let filter = self.active_filter();
        (0..self.num_pieces).find(|&i| {
            !self.have.is_set(i as usize)
                && !self.in_use.is_set(i as usize)
                && filter.map_or(true, |f| f.is_set(i as usize))
        })
    }

    /// Pieces the peer has and we miss, within the filter. `None` when the
    /// result is all-zero.
    pub fn missing_indexes(&self, peer_bitfield: &Bitfield) -> Option<Bitfield> {
        let mut out = self.have.clone();
        out.invert();
        out.intersect(peer_bitfield);
        if let Some(filter) = self.active_filter() {
            out.intersect(filter);
        }
        if out.is_zero() {
            None
        } else {
            Some(out)
        }
    }

    /// Pieces the peer has that we miss and nobody is fetching, within the
    /// filter. `None` when the result is all-zero.
    pub fn missing_unused_indexes(&self, peer_bitfield: &Bitfield) -> Option<Bitfield> {
        let mut out = self.missing_indexes(peer_bitfield)?;
        out.subtract(&self.in_use);
        if out.is_zero() {
            None
        } else {
            Some(out)
        }
    }

    /// Picks the missing, unused, unignored piece farthest from any held or
    /// busy region, spreading acquisition across the whole target.
    ///
    /// Held regions are `have ∪ in_use ∪ ignore` plus everything outside the
    /// filter when one is enabled. Distance ties break to the lowest index;
    /// when nothing is held yet the lowest candidate wins.
    pub fn sparse_missing_unused_index(&self, ignore_bitfield: &Bitfield) -> Option<u32> {
        let mut held = self.have.clone();
        held.union_with(&self.in_use);
        held.union_with(ignore_bitfield);
        if let Some(filter) = self.active_filter() {
            let mut outside = filter.clone();
            outside.invert();
            held.union_with(&outside);
        }

        let n = self.num_pieces as usize;
        if n == 0 {
            return None;
        }

        // Distance to the nearest held bit on each side, in two passes.
        let mut dist = vec![usize::MAX; n];
        let mut last_held: Option<usize> = None;
        for i in 0..n {
            if held.is_set(i) {
                last_held = Some(i);
            } else if let Some(h) = last_held {
                dist[i] = i - h;
            }
        }
        last_held = None;
        for i in (0..n).rev() {
            if held.is_set(i) {
                last_held = Some(i);
            } else if let Some(h) = last_held {
                dist[i] = dist[i].min(h - i);
            }
        }

        let mut best: Option<(usize, usize)> = None;
        for i in 0..n {
            if held.is_set(i) {
                continue;
            }
            match best {
                Some((best_dist, _)) if dist[i] <= best_dist => {}
                _ => best = Some((dist[i], i)),
            }
        }
        best.map(|(_, index)| index as u32)
    }

    /// True if every piece of the whole download is held.
    pub fn all_set(&self) -> bool {
        self.have.is_all_set()
    }

    /// True if every piece within the filter is held. Falls back to
    /// [`Self::all_set`] when no filter is enabled.
    pub fn filtered_all_set(&self) -> bool {
        match self.active_filter() {
            Some(filter) => {
                let mut missing = filter.clone();
                missing.subtract(&self.have);
                missing.is_zero()
            }
            None => self.all_set(),
        }
    }

    /// Total byte length of the held pieces.
    pub fn completed_length(&self) -> u64 {
        self.region_length(&self.have)
    }

    /// Byte length of held pieces inside the filter.
    pub fn filtered_completed_length(&self) -> u64 {
        match self.active_filter() {
            Some(filter) => {
                let mut held = self.have.clone();
                held.intersect(filter);
                self.region_length(&held)
            }
            None => self.completed_length(),
        }
    }

    /// Byte length of all pieces inside the filter.
    pub fn filtered_total_length(&self) -> u64 {
        match self.active_filter() {
            Some(filter) => self.region_length(filter),
            None => self.total_length,
        }
    }

    // Sum of piece lengths over the set bits of `region`; only the final
    // piece can differ from the nominal length.
    fn region_length(&self, region: &Bitfield) -> u64 {
        let count = region.count_ones() as u64;
        if count == 0 || self.num_pieces == 0 {
            return 0;
        }
        let last = self.num_pieces - 1;
        if region.is_set(last as usize) {
            (count - 1) * u64::from(self.piece_length) + u64::from(self.piece_length_at(last))
        } else {
            count * u64::from(self.piece_length)
        }
    }

    /// The `have` plane.
    pub fn bitfield(&self) -> &Bitfield {
        &self.have
    }

    /// Raw bytes of the `have` plane.
    pub fn bitfield_bytes(&self) -> &[u8] {
        self.have.as_bytes()
    }

    /// Replaces the `have` plane from raw bytes of exactly
    /// [`Self::byte_length`] bytes.
    pub fn set_bitfield(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        if bytes.len() != self.byte_length() {
            return Err(StoreError::BitfieldLengthMismatch {
                expected: self.byte_length(),
                actual: bytes.len(),
            });
        }
        self.have = Bitfield::from_bytes(bytes, self.num_pieces as usize);
        Ok(())
    }
}
