use super::*;
use crate::error::StoreError;

const KIB: u64 = 1024;

fn from_indexes(bit_count: usize, indexes: &[usize]) -> Bitfield {
    let mut bf = Bitfield::new(bit_count);
    for &i in indexes {
        bf.set(i);
    }
    bf
}

#[test]
fn set_clear_and_count() {
    let mut bf = Bitfield::new(10);
    assert!(bf.is_zero());
    bf.set(0);
    bf.set(9);
    assert!(bf.is_set(0));
    assert!(bf.is_set(9));
    assert!(!bf.is_set(5));
    assert_eq!(bf.count_ones(), 2);
    bf.clear(0);
    assert_eq!(bf.count_ones(), 1);
}

#[test]
fn out_of_range_bits_are_ignored() {
    let mut bf = Bitfield::new(10);
    bf.set(10);
    bf.set(1000);
    assert!(bf.is_zero());
    assert!(!bf.is_set(1000));
}

#[test]
fn from_bytes_clears_spare_bits() {
    // 10 bits in 2 bytes leaves 6 spare bits in the second byte.
    let bf = Bitfield::from_bytes(&[0xFF, 0xFF], 10);
    assert_eq!(bf.count_ones(), 10);
    assert_eq!(bf.as_bytes(), &[0xFF, 0xC0]);
}

#[test]
fn from_bytes_pads_short_input() {
    let bf = Bitfield::from_bytes(&[0x80], 16);
    assert!(bf.is_set(0));
    assert_eq!(bf.count_ones(), 1);
    assert_eq!(bf.as_bytes().len(), 2);
}

#[test]
fn full_is_all_set() {
    let bf = Bitfield::full(12);
    assert!(bf.is_all_set());
    assert_eq!(bf.count_ones(), 12);
}

#[test]
fn bytes_round_trip() {
    let bf = from_indexes(20, &[0, 7, 13, 19]);
    let copy = Bitfield::from_bytes(&bf.to_bytes(), 20);
    assert_eq!(copy, bf);
}

#[test]
fn algebra() {
    let mut a = from_indexes(8, &[0, 1, 2, 3]);
    let b = from_indexes(8, &[2, 3, 4, 5]);

    let mut i = a.clone();
    i.intersect(&b);
    assert_eq!(i.ones().collect::<Vec<_>>(), vec![2, 3]);

    let mut s = a.clone();
    s.subtract(&b);
    assert_eq!(s.ones().collect::<Vec<_>>(), vec![0, 1]);

    a.union_with(&b);
    assert_eq!(a.count_ones(), 6);
}

#[test]
fn invert_respects_spare_bits() {
    let mut bf = from_indexes(10, &[0, 1]);
    bf.invert();
    assert_eq!(bf.count_ones(), 8);
    assert!(!bf.is_set(0));
    assert!(bf.is_set(9));
    // Spare bits must stay clear or counts would drift.
    assert_eq!(bf.as_bytes()[1] & 0x3F, 0);
}

#[test]
fn first_set_and_ranges() {
    let mut bf = Bitfield::new(20);
    assert_eq!(bf.first_set(), None);
    bf.set_range(9..14);
    assert_eq!(bf.first_set(), Some(9));
    assert_eq!(bf.count_ones(), 5);
    bf.set_range(18..25);
    assert_eq!(bf.count_ones(), 7);
}

#[test]
fn man_rejects_zero_piece_length() {
    assert_eq!(
        BitfieldMan::new(0, 10 * KIB).unwrap_err(),
        StoreError::ZeroPieceLength
    );
}

#[test]
fn man_derives_piece_count_and_lengths() {
    // 10 KiB in 4 KiB pieces: three pieces, the last 2 KiB.
    let man = BitfieldMan::new(4 * KIB as u32, 10 * KIB).unwrap();
    assert_eq!(man.num_pieces(), 3);
    assert_eq!(man.piece_length_at(0), 4 * KIB as u32);
    assert_eq!(man.piece_length_at(2), 2 * KIB as u32);
    assert_eq!(man.piece_length_at(3), 0);
}

#[test]
fn man_completed_length_counts_short_final_piece() {
    let mut man = BitfieldMan::new(4 * KIB as u32, 10 * KIB).unwrap();
    assert_eq!(man.completed_length(), 0);
    man.set_bit(0);
    assert_eq!(man.completed_length(), 4 * KIB);
    man.set_bit(2);
    assert_eq!(man.completed_length(), 6 * KIB);
    man.set_bit(1);
    assert_eq!(man.completed_length(), 10 * KIB);
    assert!(man.all_set());
}

#[test]
fn man_missing_indexes() {
    let mut man = BitfieldMan::new(KIB as u32, 8 * KIB).unwrap();
    man.set_bit(0);
    man.set_bit(1);
    let peer = Bitfield::full(8);
    let missing = man.missing_indexes(&peer).unwrap();
    assert_eq!(missing.ones().collect::<Vec<_>>(), vec![2, 3, 4, 5, 6, 7]);

    // A peer with nothing useful produces no candidate set.
    let useless = from_indexes(8, &[0, 1]);
    assert!(man.missing_indexes(&useless).is_none());
}

#[test]
fn man_missing_unused_excludes_checked_out_pieces() {
    let mut man = BitfieldMan::new(KIB as u32, 8 * KIB).unwrap();
    man.set_bit(0);
    man.set_use_bit(1);
    man.set_use_bit(2);
    let peer = Bitfield::full(8);

    let unused = man.missing_unused_indexes(&peer).unwrap();
    assert_eq!(unused.ones().collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);

    // The plain missing set still includes the checked-out pieces.
    let missing = man.missing_indexes(&peer).unwrap();
    assert!(missing.is_set(1));
    assert!(missing.is_set(2));
}

#[test]
fn man_first_missing_unused() {
    let mut man = BitfieldMan::new(KIB as u32, 4 * KIB).unwrap();
    assert_eq!(man.first_missing_unused_index(), Some(0));
    man.set_bit(0);
    man.set_use_bit(1);
    assert_eq!(man.first_missing_unused_index(), Some(2));
    man.set_bit_range(0..4);
    assert_eq!(man.first_missing_unused_index(), None);
}

#[test]
fn man_has_missing_piece() {
    let mut man = BitfieldMan::new(KIB as u32, 4 * KIB).unwrap();
    man.set_bit(0);
    assert!(man.has_missing_piece(&Bitfield::full(4)));
    assert!(!man.has_missing_piece(&from_indexes(4, &[0])));
    assert!(!man.has_missing_piece(&Bitfield::new(4)));
}

#[test]
fn filter_restricts_universe() {
    // Eight 1 KiB pieces; only the first half is requested.
    let mut man = BitfieldMan::new(KIB as u32, 8 * KIB).unwrap();
    man.add_filter(0, 4 * KIB).unwrap();
    man.enable_filter();
    assert!(man.is_filter_enabled());
    assert_eq!(man.filtered_total_length(), 4 * KIB);
    assert_eq!(man.count_missing_pieces(), 4);

    let peer = Bitfield::full(8);
    let missing = man.missing_indexes(&peer).unwrap();
    assert_eq!(missing.ones().collect::<Vec<_>>(), vec![0, 1, 2, 3]);

    man.set_bit_range(0..4);
    assert!(man.filtered_all_set());
    assert!(!man.all_set());
    assert_eq!(man.filtered_completed_length(), 4 * KIB);
    assert_eq!(man.count_missing_pieces(), 0);
    assert!(man.missing_indexes(&peer).is_none());

    man.clear_filter();
    assert_eq!(man.count_missing_pieces(), 4);
    assert_eq!(man.filtered_total_length(), 8 * KIB);
}

#[test]
fn filter_covers_partially_overlapped_pieces() {
    // A range ending mid-piece still pulls that whole piece in.
    let mut man = BitfieldMan::new(KIB as u32, 8 * KIB).unwrap();
    man.add_filter(512, KIB).unwrap();
    man.enable_filter();
    assert_eq!(man.count_missing_pieces(), 2);
}

#[test]
fn add_filter_rejects_range_past_total() {
    let mut man = BitfieldMan::new(KIB as u32, 8 * KIB).unwrap();
    assert_eq!(
        man.add_filter(4 * KIB, 5 * KIB),
        Err(StoreError::RangeOutOfBounds {
            offset: 4 * KIB,
            length: 5 * KIB,
            total: 8 * KIB,
        })
    );
}

#[test]
fn set_bitfield_round_trips() {
    let mut man = BitfieldMan::new(KIB as u32, 10 * KIB).unwrap();
    man.set_bit(0);
    man.set_bit(7);
    man.set_bit(9);
    let bytes = man.bitfield_bytes().to_vec();
    man.set_bitfield(&bytes).unwrap();
    assert_eq!(man.bitfield_bytes(), &bytes[..]);
    assert_eq!(man.completed_length(), 3 * KIB);
}

#[test]
fn set_bitfield_rejects_wrong_length() {
    let mut man = BitfieldMan::new(KIB as u32, 10 * KIB).unwrap();
    assert_eq!(
        man.set_bitfield(&[0xFF]),
        Err(StoreError::BitfieldLengthMismatch {
            expected: 2,
            actual: 1,
        })
    );
}

#[test]
fn sparse_picks_point_farthest_from_held_regions() {
    // have = 1000_0001: the gap midpoint ties between 3 and 4, and the
    // lower index wins.
    let mut man = BitfieldMan::new(KIB as u32, 8 * KIB).unwrap();
    man.set_bit(0);
    man.set_bit(7);
    let ignore = Bitfield::new(8);
    assert_eq!(man.sparse_missing_unused_index(&ignore), Some(3));
}

#[test]
fn sparse_counts_in_use_and_ignored_as_held() {
    let mut man = BitfieldMan::new(KIB as u32, 8 * KIB).unwrap();
    man.set_bit(0);
    man.set_bit(7);
    man.set_use_bit(3);
    let ignore = Bitfield::new(8);
    // Candidates 1,2,4,5,6; index 5 sits farthest from {0,3,7}.
    assert_eq!(man.sparse_missing_unused_index(&ignore), Some(5));

    let ignore = from_indexes(8, &[5]);
    // With 5 ignored every remaining candidate is adjacent to a held bit.
    assert_eq!(man.sparse_missing_unused_index(&ignore), Some(1));
}

#[test]
fn sparse_with_nothing_held_returns_lowest_index() {
    let man = BitfieldMan::new(KIB as u32, 8 * KIB).unwrap();
    assert_eq!(man.sparse_missing_unused_index(&Bitfield::new(8)), Some(0));
}

#[test]
fn sparse_returns_none_when_everything_is_held() {
    let mut man = BitfieldMan::new(KIB as u32, 4 * KIB).unwrap();
    man.set_all();
    assert_eq!(man.sparse_missing_unused_index(&Bitfield::new(4)), None);
}
