//! Per-piece availability counters.
//!
//! Each counter tracks how many connected peers currently advertise a piece,
//! plus one for ourselves once we complete it. Rarest-first selection reads
//! these to prefer pieces close to vanishing from the swarm.

use crate::bitfield::Bitfield;

/// Availability counters, one per piece.
#[derive(Debug, Clone)]
pub struct PieceStatMan {
    counts: Vec<u32>,
}

impl PieceStatMan {
    pub fn new(num_pieces: u32) -> Self {
        Self {
            counts: vec![0; num_pieces as usize],
        }
    }

    /// Counts a newly advertised bitfield: one per set bit.
    pub fn add(&mut self, bitfield: &Bitfield) {
        for index in bitfield.ones() {
            if let Some(count) = self.counts.get_mut(index) {
                *count += 1;
            }
        }
    }

    /// Removes a previously counted bitfield, e.g. on peer disconnect.
    /// Counters never go below zero.
    pub fn subtract(&mut self, bitfield: &Bitfield) {
        for index in bitfield.ones() {
            if let Some(count) = self.counts.get_mut(index) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Replaces a peer's contribution when its advertised set changes:
    /// bits only in `new` are added, bits only in `old` are subtracted.
    pub fn update(&mut self, new: &Bitfield, old: &Bitfield) {
        for (index, count) in self.counts.iter_mut().enumerate() {
            match (new.is_set(index), old.is_set(index)) {
                (true, false) => *count += 1,
                (false, true) => *count = count.saturating_sub(1),
                _ => {}
            }
        }
    }

    /// Counts a single piece, e.g. when we complete it ourselves.
    pub fn increment(&mut self, index: u32) {
        if let Some(count) = self.counts.get_mut(index as usize) {
            *count += 1;
        }
    }

    /// Availability of a piece; out-of-range indices read as 0.
    pub fn count(&self, index: u32) -> u32 {
        self.counts.get(index as usize).copied().unwrap_or(0)
    }

    pub fn num_pieces(&self) -> u32 {
        self.counts.len() as u32
    }
}
