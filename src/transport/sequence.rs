//! Wraparound-aware sequence arithmetic.
//!
//! Sequence numbers are 64-bit and treated as a circle: `a` is ahead of `b`
//! when the forward distance from `b` to `a` is less than half the space.
//! Every ordering decision on reliable sequences goes through this module.

use std::cmp::Ordering;

/// Half the sequence space.
pub const HALF_SEQUENCE_SPACE: u64 = 1 << 63;

/// Check if `a` is ahead of `b`.
pub fn is_greater(a: u64, b: u64) -> bool {
    a != b && a.wrapping_sub(b) < HALF_SEQUENCE_SPACE
}

/// Compare two sequences under wraparound.
///
/// Consistent for any pair within half the space of each other. Two sequences
/// exactly half the space apart compare `Less` both ways.
pub fn compare(a: u64, b: u64) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if is_greater(a, b) {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}

/// Forward distance from `from` to `to`.
pub fn distance(from: u64, to: u64) -> u64 {
    to.wrapping_sub(from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ordering() {
        assert!(is_greater(2, 1));
        assert!(!is_greater(1, 2));
        assert!(!is_greater(5, 5));
        assert_eq!(compare(7, 7), Ordering::Equal);
    }

    #[test]
    fn test_wraparound() {
        assert!(is_greater(0, u64::MAX));
        assert!(is_greater(5, u64::MAX - 5));
        assert!(!is_greater(u64::MAX, 0));
        assert_eq!(compare(1, u64::MAX - 1), Ordering::Greater);
        assert_eq!(distance(u64::MAX - 1, 1), 3);
    }

    #[test]
    fn test_half_space_boundary() {
        let a = 10u64;
        assert!(is_greater(a + HALF_SEQUENCE_SPACE - 1, a));
        assert!(!is_greater(a + HALF_SEQUENCE_SPACE, a));
        assert!(!is_greater(a, a + HALF_SEQUENCE_SPACE));
    }

    #[test]
    fn test_antisymmetric_within_window() {
        let samples = [0u64, 1, 1000, u64::MAX, u64::MAX - 1000, HALF_SEQUENCE_SPACE - 1];
        for &base in &samples {
            for offset in [1u64, 2, 17, 1 << 20, HALF_SEQUENCE_SPACE - 1] {
                let ahead = base.wrapping_add(offset);
                assert!(is_greater(ahead, base));
                assert!(!is_greater(base, ahead));
                assert_eq!(compare(ahead, base), Ordering::Greater);
                assert_eq!(compare(base, ahead), Ordering::Less);
            }
        }
    }

    #[test]
    fn test_transitive_within_window() {
        let start = u64::MAX - 3;
        let seqs: Vec<u64> = (0..8).map(|i| start.wrapping_add(i)).collect();
        for i in 0..seqs.len() {
            for j in (i + 1)..seqs.len() {
                for k in (j + 1)..seqs.len() {
                    assert!(is_greater(seqs[j], seqs[i]));
                    assert!(is_greater(seqs[k], seqs[j]));
                    assert!(is_greater(seqs[k], seqs[i]));
                }
            }
        }
    }

    #[test]
    fn test_sort_across_wrap() {
        let mut seqs = vec![1u64, u64::MAX, 0, u64::MAX - 1, 2];
        seqs.sort_by(|a, b| compare(*a, *b));
        assert_eq!(seqs, vec![u64::MAX - 1, u64::MAX, 0, 1, 2]);
    }
}
