use std::io::{Result, Write};

const BYTES_PER_LINE: usize = 16;

/// Two little-endian bytes as a 16-bit word.
pub fn bytes_to_word(buffer: &[u8], position: usize) -> u16 {
    (buffer[position + 1] as u16) << 8 | buffer[position] as u16
}

/// A 16-bit word as two little-endian bytes.
pub fn word_to_bytes(val: u16) -> [u8; 2] {
    val.to_le_bytes()
}

/// Swap the high and low 16-bit halves of a 32-bit value.
pub fn swap_words(val: u32) -> u32 {
    (val >> 16) | ((val & 0xFFFF) << 16)
}

/// Hexadecimal dump in the classic offset / hex / ASCII layout.
pub fn hex_dump(out: &mut dyn Write, data: &[u8]) -> Result<()> {
    for (i, line) in data.chunks(BYTES_PER_LINE).enumerate() {
        let hex: Vec<String> = line.iter().map(|x| format!("{:02x}", x)).collect();
        let ascii: String = line
            .iter()
            .map(|&x| {
                if (32..=126).contains(&x) {
                    x as char
                } else {
                    '.'
                }
            })
            .collect();
        writeln!(
            out,
            "{:08x}   {:<width$}  {}",
            i * BYTES_PER_LINE,
            hex.join(" "),
            ascii,
            width = 3 * BYTES_PER_LINE
        )?;
    }
    Ok(())
}

/// Octal dump of 12-bit words, eight per line.
pub fn oct_dump(out: &mut dyn Write, words: &[u16]) -> Result<()> {
    const WORDS_PER_LINE: usize = 8;
    for (i, line) in words.chunks(WORDS_PER_LINE).enumerate() {
        let oct: Vec<String> = line.iter().map(|x| format!("{:04o}", x)).collect();
        let bytes = crate::enc::pack12::words_to_bytes_image(line);
        let ascii: String = bytes
            .iter()
            .map(|&x| {
                if (32..=126).contains(&x) {
                    x as char
                } else {
                    '.'
                }
            })
            .collect();
        writeln!(
            out,
            "{:08o}   {:<width$}  {}",
            i * WORDS_PER_LINE,
            oct.join(" "),
            ascii,
            width = 5 * WORDS_PER_LINE
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_helpers() {
        assert_eq!(bytes_to_word(&[0x34, 0x12], 0), 0x1234);
        assert_eq!(word_to_bytes(0x1234), [0x34, 0x12]);
        assert_eq!(swap_words(0x1234_5678), 0x5678_1234);
    }

    #[test]
    fn test_hex_dump_format() {
        let mut out = Vec::new();
        hex_dump(&mut out, b"AB").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("00000000   41 42"));
        assert!(text.trim_end().ends_with("AB"));
    }
}
