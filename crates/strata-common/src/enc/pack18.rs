//! 18-bit word to byte packers (PDP-7).
//!
//! ASCII mode stores two 7-bit characters per word in the 9/9 split.
//! IMAGE mode spreads the word over three bytes of 6 bits each, biased by
//! 0x80 so an image file never looks like text.

use crate::FileMode;

/// Convert 18-bit words to bytes.
pub fn words18_to_bytes(words: &[u32], mode: FileMode) -> Vec<u8> {
    let mut data = Vec::new();
    match mode {
        FileMode::Ascii => {
            for &word in words {
                data.push(((word >> 9) & 0o177) as u8);
                data.push((word & 0o177) as u8);
            }
        }
        FileMode::Image => {
            for &word in words {
                data.push((((word >> 12) & 0o77) + 0x80) as u8);
                data.push((((word >> 6) & 0o77) + 0x80) as u8);
                data.push(((word & 0o77) + 0x80) as u8);
            }
        }
    }
    data
}

/// Convert bytes back to 18-bit words.
pub fn bytes_to_words18(data: &[u8], mode: FileMode) -> Vec<u32> {
    let mut words = Vec::new();
    match mode {
        FileMode::Ascii => {
            for chunk in data.chunks(2) {
                let hi = chunk[0] as u32;
                let lo = chunk.get(1).copied().unwrap_or(0) as u32;
                words.push((hi << 9) | lo);
            }
        }
        FileMode::Image => {
            for chunk in data.chunks(3) {
                let b0 = chunk[0].wrapping_sub(0x80) as u32 & 0o77;
                let b1 = chunk.get(1).copied().unwrap_or(0x80).wrapping_sub(0x80) as u32 & 0o77;
                let b2 = chunk.get(2).copied().unwrap_or(0x80).wrapping_sub(0x80) as u32 & 0o77;
                words.push((b0 << 12) | (b1 << 6) | b2);
            }
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_roundtrip() {
        let words: Vec<u32> = (0..256u32).map(|i| (i * 2741) & 0o777777).collect();
        let bytes = words18_to_bytes(&words, FileMode::Image);
        assert_eq!(bytes_to_words18(&bytes, FileMode::Image), words);
    }

    #[test]
    fn test_ascii_packs_two_chars() {
        let words = bytes_to_words18(b"AB", FileMode::Ascii);
        assert_eq!(words, vec![((b'A' as u32) << 9) | b'B' as u32]);
        assert_eq!(words18_to_bytes(&words, FileMode::Ascii), b"AB");
    }
}
