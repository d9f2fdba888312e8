//! Length-prefix detection.
//!
//! Framing protocols often write the object's byte length right before the
//! object. The length is encoded as little-endian base-256 digits, each digit
//! stored as a signed byte, and compared right-aligned against the bytes that
//! precede the object.

/// Signed little-endian base-256 digits of `length`.
///
/// A length of zero has no digits.
pub fn length_pattern(length: usize) -> Vec<i8> {
    let mut digits = Vec::new();
    let mut rest = length;
    while rest > 0 {
        digits.push((rest % 256) as u8 as i8);
        rest /= 256;
    }
    digits
}

/// Whether `prefix` ends with the encoded `length`.
///
/// An empty pattern never matches. The prefix must be strictly longer than
/// the pattern: a prefix made of the length digits alone is not framing.
pub fn prefix_encodes_length(prefix: &[u8], length: usize) -> bool {
    let pattern = length_pattern(length);
    if pattern.is_empty() || prefix.len() <= pattern.len() {
        return false;
    }
    prefix
        .iter()
        .rev()
        .zip(pattern.iter().rev())
        .all(|(&byte, &digit)| byte as i8 == digit)
}

#[cfg(test)]
mod tests {
    use super::{length_pattern, prefix_encodes_length};

    #[test]
    fn three_hundred_is_44_1() {
        assert_eq!(length_pattern(300), vec![44, 1]);
        assert!(prefix_encodes_length(&[0xCA, 0xFE, 44, 1], 300));
    }

    #[test]
    fn high_digits_are_negative() {
        assert_eq!(length_pattern(128), vec![-128]);
        assert_eq!(length_pattern(255), vec![-1]);
        assert!(prefix_encodes_length(&[0xCA, 0x80], 128));
    }

    #[test]
    fn zero_length_never_matches() {
        assert!(length_pattern(0).is_empty());
        assert!(!prefix_encodes_length(&[], 0));
        assert!(!prefix_encodes_length(&[0, 0], 0));
    }

    #[test]
    fn prefix_must_be_longer_than_pattern() {
        assert!(!prefix_encodes_length(&[1], 300));
        assert!(!prefix_encodes_length(&[44, 1], 300));
        assert!(prefix_encodes_length(&[0, 44, 1], 300));
        assert!(!prefix_encodes_length(&[9], 9));
    }

    #[test]
    fn unrelated_prefix_does_not_match() {
        assert!(!prefix_encodes_length(&[0x13, 0x37, 0x42], 300));
        assert!(!prefix_encodes_length(&[1, 44], 300));
    }
}
