//! 6-bit character codes packed two per 12-bit word.
//!
//! Two dialects: the DMS form offsets each 6-bit value by 0o40 into the
//! printable range, the OS/8 form stores the low 6 bits of the character
//! with `@` as the pad.

/// Convert a six-bit-ASCII 12-bit word to two chars (DMS dialect).
pub fn sixbit_word12_to_asc(val: u16) -> String {
    let h = val & 0o77;
    let l = (val >> 6) & 0o77;
    let mut s = String::with_capacity(2);
    s.push((l as u8 + 0o40) as char);
    s.push((h as u8 + 0o40) as char);
    s
}

/// Convert up to two chars back to a six-bit-ASCII 12-bit word (DMS dialect).
pub fn asc_to_sixbit_word12(val: &str) -> u16 {
    let mut chars = val.chars();
    let l = chars
        .next()
        .map(|c| (c.to_ascii_uppercase() as u16).wrapping_sub(0o40) & 0o77)
        .unwrap_or(0);
    let h = chars
        .next()
        .map(|c| (c.to_ascii_uppercase() as u16).wrapping_sub(0o40) & 0o77)
        .unwrap_or(0);
    (l << 6) | h
}

/// Convert an OS/8 filename word to 0-2 chars of ASCII.
///
/// Values at or below 0o40 map into the `@`-based control column and the
/// `@` pad is stripped.
pub fn os8_word_to_asc(val: u16) -> String {
    [(val >> 6) & 0o77, val & 0o77]
        .iter()
        .map(|&c| {
            if c > 0o40 {
                c as u8 as char
            } else {
                (c as u8 + 0o100) as char
            }
        })
        .filter(|&c| c != '@')
        .collect()
}

/// Convert 0-2 chars of ASCII to an OS/8 filename word.
pub fn asc_to_os8_word(val: &str) -> u16 {
    let padded: Vec<u8> = format!("{:@>2}", val.to_uppercase()).into_bytes();
    let c1 = if padded[0] < 0o100 {
        padded[0] + 0o100
    } else {
        padded[0]
    };
    let c2 = if padded[1] < 0o100 {
        padded[1] + 0o100
    } else {
        padded[1]
    };
    ((c1 as u16 & 0o77) << 6) | (c2 as u16 & 0o77)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dms_roundtrip_every_word() {
        for w in 0..0o10000u16 {
            assert_eq!(asc_to_sixbit_word12(&sixbit_word12_to_asc(w)), w);
        }
    }

    #[test]
    fn test_dms_text() {
        assert_eq!(sixbit_word12_to_asc(asc_to_sixbit_word12("AB")), "AB");
        assert_eq!(sixbit_word12_to_asc(asc_to_sixbit_word12("A")), "A ");
    }

    #[test]
    fn test_os8_roundtrip() {
        for s in ["AB", "A1", "XY", "Z"] {
            assert_eq!(os8_word_to_asc(asc_to_os8_word(s)), s);
        }
    }
}
