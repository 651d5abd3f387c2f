//! Small byte helpers shared by the telegram parsers.
//!
//! # Example
//!
//! ```
//! use s7_archiver::utils::{format_hex, padded_len, word_at};
//!
//! let frame = [0x03, 0x00, 0x00, 0x1F];
//! assert_eq!(word_at(&frame, 2), 0x001F);
//! assert_eq!(padded_len(3), 4);
//! assert_eq!(format_hex(&frame), "03 00 00 1F");
//! ```

/// Reads a big-endian word at `offset`.
///
/// Callers check the frame length first; a word past the end reads as 0.
#[inline]
pub fn word_at(data: &[u8], offset: usize) -> u16 {
    match data.get(offset..offset + 2) {
        Some(&[hi, lo]) => u16::from_be_bytes([hi, lo]),
        _ => 0,
    }
}

/// Rounds a data item length up to the even length the controller pads to.
///
/// # Example
///
/// ```
/// use s7_archiver::utils::padded_len;
///
/// assert_eq!(padded_len(0), 0);
/// assert_eq!(padded_len(1), 2);
/// assert_eq!(padded_len(4), 4);
/// ```
#[inline]
pub fn padded_len(len: usize) -> usize {
    len + (len & 1)
}

/// Formats bytes as space-separated uppercase hex, for trace output.
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_at() {
        let data = [0x12, 0x34, 0x56];
        assert_eq!(word_at(&data, 0), 0x1234);
        assert_eq!(word_at(&data, 1), 0x3456);
        assert_eq!(word_at(&data, 2), 0);
        assert_eq!(word_at(&data, 10), 0);
    }

    #[test]
    fn test_padded_len() {
        for (len, padded) in [(0, 0), (1, 2), (2, 2), (5, 6), (480, 480)] {
            assert_eq!(padded_len(len), padded);
        }
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[]), "");
        assert_eq!(format_hex(&[0x0A, 0xFF]), "0A FF");
    }
}
