//! Wrapping comparisons for 16-bit sequence numbers.

const HALF_RANGE: u16 = 32768;

/// True if `s1` is newer than `s2`, accounting for wrap-around.
#[inline]
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= HALF_RANGE)) || ((s1 < s2) && (s2 - s1 > HALF_RANGE))
}

/// Signed distance from `s2` to `s1`, in `[-32768, 32768]`.
#[inline]
pub fn sequence_difference(s1: u16, s2: u16) -> i32 {
    let diff = i32::from(s1) - i32::from(s2);
    if diff > i32::from(HALF_RANGE) {
        diff - 65536
    } else if diff < -i32::from(HALF_RANGE) {
        diff + 65536
    } else {
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greater_than_wraps() {
        assert!(sequence_greater_than(1, 0));
        assert!(!sequence_greater_than(0, 1));
        assert!(sequence_greater_than(0, 65535));
        assert!(sequence_greater_than(100, 65500));
        assert!(!sequence_greater_than(5, 5));
        assert!(!sequence_greater_than(65535, 0));
    }

    #[test]
    fn test_difference() {
        assert_eq!(sequence_difference(10, 5), 5);
        assert_eq!(sequence_difference(5, 10), -5);
        assert_eq!(sequence_difference(2, 65534), 4);
        assert_eq!(sequence_difference(65534, 2), -4);
        assert_eq!(sequence_difference(32768, 0), 32768);
        assert_eq!(sequence_difference(0, 32769), 32767);
    }
}
