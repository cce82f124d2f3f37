//! 12-bit word to byte packers (PDP-8).
//!
//! IMAGE mode stores three bytes in each word pair: two low bytes and a
//! composite of the two high nibbles. ASCII mode masks each byte to 7 bits
//! in the same frame (OS/8) or applies the monitor's escape translation
//! (DMS). IMAGE round-trips exactly; the ASCII forms are views.

/// Pack 12-bit words to bytes, three per word pair (IMAGE mode).
pub fn words_to_bytes_image(words: &[u16]) -> Vec<u8> {
    words_to_bytes_masked(words, 0xFF)
}

/// OS/8 ASCII mode: the IMAGE frame with every byte masked to 7 bits.
pub fn words_to_bytes_ascii(words: &[u16]) -> Vec<u8> {
    words_to_bytes_masked(words, 0x7F)
}

fn words_to_bytes_masked(words: &[u16], mask: u8) -> Vec<u8> {
    let mut data = Vec::with_capacity(words.len() / 2 * 3);
    let mut i = 0;
    while i + 1 < words.len() {
        let chr1 = words[i];
        let chr2 = words[i + 1];
        let chr3 = ((chr2 >> 8) & 0o17) | ((chr1 >> 4) & 0o360);
        data.push((chr1 & 0xFF) as u8 & mask);
        data.push((chr2 & 0xFF) as u8 & mask);
        data.push((chr3 & 0xFF) as u8 & mask);
        i += 2;
    }
    data
}

/// Unpack bytes to 12-bit words, two per three bytes (IMAGE mode).
pub fn bytes_to_words_image(data: &[u8]) -> Vec<u16> {
    bytes_to_words_masked(data, 0xFF)
}

/// OS/8 ASCII mode inverse.
pub fn bytes_to_words_ascii(data: &[u8]) -> Vec<u16> {
    bytes_to_words_masked(data, 0x7F)
}

fn bytes_to_words_masked(data: &[u8], mask: u8) -> Vec<u16> {
    let mut words = Vec::with_capacity((data.len() + 2) / 3 * 2);
    for chunk in data.chunks(3) {
        let chr1 = (chunk[0] & mask) as u16;
        let chr2 = (chunk.get(1).copied().unwrap_or(0) & mask) as u16;
        let chr3 = (chunk.get(2).copied().unwrap_or(0) & mask) as u16;
        words.push(chr1 | ((chr3 & 0o360) << 4));
        words.push(chr2 | ((chr3 & 0o17) << 8));
    }
    words
}

/// DMS ASCII mode: 6-bit character pairs with `0o77` as the escape code.
///
/// Control characters are folded into the upper column; tab, line feed and
/// form feed travel escaped; an escaped form feed ends the file. Lossy for
/// anything outside the monitor's set.
pub fn dms_words_to_bytes_ascii(words: &[u16]) -> Vec<u8> {
    let mut result = Vec::new();
    let mut esc = false;
    'outer: for &word in words {
        if word == 0 {
            continue;
        }
        let h = word & 0o77;
        let l = (word >> 6) & 0o77;
        for ch in [l, h] {
            if esc {
                match ch {
                    0o77 => result.push(0o77),
                    0x09 => result.push(0x09),
                    0x0A => result.push(0x0A),
                    0x0C => break 'outer, // end of file
                    0x0D => {}
                    _ => {}
                }
                esc = false;
            } else if ch == 0o77 {
                esc = true;
            } else {
                let mut ch = ch as u8;
                if ch < 32 {
                    ch += 64;
                }
                result.push(ch);
            }
        }
    }
    result
}

/// DMS ASCII mode inverse: LF becomes escaped CR + escaped LF, CR drops.
pub fn dms_bytes_to_words_ascii(data: &[u8]) -> Vec<u16> {
    let mut buffer: Vec<u16> = Vec::new();
    for &byte in data {
        let byte = (byte & 0o177) as u16;
        match byte {
            0x0A => {
                buffer.extend_from_slice(&[0o77, 0x0D, 0o77, 0x0A]);
            }
            0x0D => {}
            0o77 | 0x09 | 0x0C => {
                buffer.push(0o77);
                buffer.push(byte);
            }
            _ => {
                buffer.push(if byte > 64 { byte - 64 } else { byte });
            }
        }
    }
    let mut words = Vec::with_capacity(buffer.len() / 2 + 1);
    for chunk in buffer.chunks(2) {
        let l = chunk[0];
        let h = chunk.get(1).copied().unwrap_or(0);
        words.push(((l & 0o77) << 6) | (h & 0o77));
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_image_roundtrip() {
        let data: Vec<u8> = (0..=255u8).collect();
        let words = bytes_to_words_image(&data);
        let back = words_to_bytes_image(&words);
        assert_eq!(&back[..data.len()], &data[..]);
    }

    #[test]
    fn test_image_word_roundtrip() {
        let words: Vec<u16> = (0..256u16).map(|i| (i * 15) & 0o7777).collect();
        let bytes = words_to_bytes_image(&words);
        assert_eq!(bytes_to_words_image(&bytes), words);
    }

    #[test]
    fn test_ascii_masks_to_7bit() {
        let words = vec![0o7777, 0o7777];
        let bytes = words_to_bytes_ascii(&words);
        assert!(bytes.iter().all(|&b| b < 0x80));
    }

    #[test]
    fn test_dms_ascii_text_roundtrip() {
        let text = b"HELLO WORLD\n12345\n";
        let words = dms_bytes_to_words_ascii(text);
        let back = dms_words_to_bytes_ascii(&words);
        assert_eq!(back, text);
    }
}
