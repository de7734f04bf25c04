//! The peer surface piece selection consumes.
//!
//! Only the pieces of peer state that drive selection live here: the
//! advertised bitfield and the fast-extension allowed set (BEP-6). Wire
//! protocol and connection management belong to the layer above.

use std::collections::HashSet;
use std::iter;
use std::net::IpAddr;

use sha1::{Digest, Sha1};

use crate::bitfield::Bitfield;

/// Number of allowed-fast pieces granted per peer (BEP-6 convention).
pub const ALLOWED_FAST_SET_SIZE: usize = 10;

/// A remote peer as seen by piece selection.
#[derive(Debug, Clone)]
pub struct Peer {
    bitfield: Bitfield,
    fast_extension_enabled: bool,
    allowed_fast: HashSet<u32>,
}

impl Peer {
    pub fn new(num_pieces: u32) -> Self {
        Self {
            bitfield: Bitfield::new(num_pieces as usize),
            fast_extension_enabled: false,
            allowed_fast: HashSet::new(),
        }
    }

    /// The peer's advertised piece bitmap.
    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    /// Replaces the advertised bitmap, e.g. from a BITFIELD message. The
    /// caller is responsible for updating availability stats.
    pub fn set_bitfield(&mut self, bitfield: Bitfield) {
        self.bitfield = bitfield;
    }

    /// Records a single HAVE advertisement.
    pub fn set_piece(&mut self, index: u32) {
        self.bitfield.set(index as usize);
    }

    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.is_set(index as usize)
    }

    pub fn enable_fast_extension(&mut self) {
        self.fast_extension_enabled = true;
    }

    pub fn is_fast_extension_enabled(&self) -> bool {
        self.fast_extension_enabled
    }

    /// Records a piece the peer will serve even while choking us.
    pub fn add_allowed_fast(&mut self, index: u32) {
        self.allowed_fast.insert(index);
    }

    /// Pieces the peer allows us to request while choked.
    pub fn allowed_fast(&self) -> &HashSet<u32> {
        &self.allowed_fast
    }

    /// Derives and installs the canonical allowed-fast set for this peer
    /// from the torrent's info hash and the peer's address.
    pub fn compute_allowed_fast(&mut self, info_hash: &[u8; 20], peer_ip: IpAddr) {
        let num_pieces = self.bitfield.len() as u32;
        for index in generate_allowed_fast_set(info_hash, peer_ip, num_pieces, ALLOWED_FAST_SET_SIZE)
        {
            self.allowed_fast.insert(index);
        }
    }
}

/// Generates the BEP-6 allowed-fast set for a peer.
///
/// The derivation is deterministic in the info hash and the peer's address
/// (IPv4 masked to /24) so both sides compute the same set.
pub fn generate_allowed_fast_set(
    info_hash: &[u8; 20],
    peer_ip: IpAddr,
    num_pieces: u32,
    set_size: usize,
) -> Vec<u32> {
    // The derivation can only yield num_pieces distinct indices.
    let target = set_size.min(num_pieces as usize);
    if target == 0 {
        return Vec::new();
    }

    // Endless candidate stream: each round re-hashes the previous digest
    // and yields five big-endian words reduced modulo the piece count.
    let digests = iter::successors(
        Some(Sha1::digest(fast_set_seed(info_hash, peer_ip))),
        |previous| Some(Sha1::digest(previous)),
    );
    let candidates = digests.flat_map(|digest| {
        let mut words = [0u32; 5];
        for (word, bytes) in words.iter_mut().zip(digest.chunks_exact(4)) {
            *word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % num_pieces;
        }
        words
    });

    let mut allowed = Vec::with_capacity(target);
    for index in candidates {
        if !allowed.contains(&index) {
            allowed.push(index);
            if allowed.len() == target {
                break;
            }
        }
    }
    allowed
}

// Seed for the allowed-fast derivation: masked address then info hash.
// The fourth byte of an IPv4 address stays zero, which is the /24 mask.
fn fast_set_seed(info_hash: &[u8; 20], peer_ip: IpAddr) -> [u8; 24] {
    let mut seed = [0u8; 24];
    match peer_ip {
        IpAddr::V4(ip) => seed[..3].copy_from_slice(&ip.octets()[..3]),
        IpAddr::V6(ip) => seed[..4].copy_from_slice(&ip.octets()[..4]),
    }
    seed[4..].copy_from_slice(info_hash);
    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn allowed_fast_set_is_deterministic_and_bounded() {
        let info_hash = [0xAB; 20];
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let a = generate_allowed_fast_set(&info_hash, ip, 1000, 10);
        let b = generate_allowed_fast_set(&info_hash, ip, 1000, 10);
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        assert!(a.iter().all(|&i| i < 1000));
    }

    #[test]
    fn allowed_fast_set_masks_the_host_octet() {
        let info_hash = [7; 20];
        let a = generate_allowed_fast_set(
            &info_hash,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            500,
            10,
        );
        let b = generate_allowed_fast_set(
            &info_hash,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 99)),
            500,
            10,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn allowed_fast_set_caps_at_piece_count() {
        let info_hash = [1; 20];
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        let set = generate_allowed_fast_set(&info_hash, ip, 4, 10);
        assert_eq!(set.len(), 4);
        assert_eq!(generate_allowed_fast_set(&info_hash, ip, 0, 10), vec![]);
    }

    #[test]
    fn peer_tracks_advertisements() {
        let mut peer = Peer::new(8);
        assert!(!peer.has_piece(3));
        peer.set_piece(3);
        assert!(peer.has_piece(3));
        peer.set_bitfield(Bitfield::full(8));
        assert!(peer.has_piece(7));
    }

    #[test]
    fn computed_allowed_fast_lands_in_the_peer_set() {
        let mut peer = Peer::new(100);
        peer.enable_fast_extension();
        peer.compute_allowed_fast(&[3; 20], IpAddr::V4(Ipv4Addr::new(172, 16, 0, 2)));
        assert_eq!(peer.allowed_fast().len(), 10);
        assert!(peer.allowed_fast().iter().all(|&i| i < 100));
    }
}
