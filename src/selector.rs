//! Piece selection policies.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::bitfield::Bitfield;
use crate::stats::PieceStatMan;

/// Chooses one piece index out of a candidate bitmap.
pub trait PieceSelector {
    /// Picks an index whose bit is set in `candidates`, or `None` if the
    /// bitmap is empty.
    fn select(&mut self, candidates: &Bitfield, stats: &PieceStatMan) -> Option<u32>;
}

/// Rarest-first selection with uniformly random tie-breaking.
///
/// Pieces advertised by the fewest peers are preferred so that rare pieces
/// replicate before their sources leave the swarm. Ties break at random to
/// keep a crowd of peers from converging on the same piece. Candidates no
/// peer advertises yet count as rarest of all.
pub struct RarestPieceSelector {
    rng: SmallRng,
    // Scratch for collecting minimum-count candidates, reused across calls.
    ties: Vec<u32>,
}

impl RarestPieceSelector {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_os_rng(),
            ties: Vec::new(),
        }
    }

    /// A selector with a fixed seed, for tests and simulations.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            ties: Vec::new(),
        }
    }
}

impl Default for RarestPieceSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl PieceSelector for RarestPieceSelector {
    fn select(&mut self, candidates: &Bitfield, stats: &PieceStatMan) -> Option<u32> {
        self.ties.clear();
        let mut min_count = u32::MAX;
        for index in candidates.ones() {
            let count = stats.count(index as u32);
            if count < min_count {
                min_count = count;
                self.ties.clear();
                self.ties.push(index as u32);
            } else if count == min_count {
                self.ties.push(index as u32);
            }
        }
        match self.ties.len() {
            0 => None,
            1 => Some(self.ties[0]),
            n => Some(self.ties[self.rng.random_range(0..n)]),
        }
    }
}
