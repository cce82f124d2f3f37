//! FIODEC: the PDP-7 6-bit character code, three characters per 18-bit
//! word, with case shift and line/page control in band.
//!
//! An end-of-line code is followed by two 6-bit fields carrying the line
//! number, end-of-page by the page number. Encoding inserts an end-of-page
//! every sixty lines, the way the DECSys editor paginated listings.

pub const FIODEC_END_OF_LINE: u32 = 0o14;
pub const FIODEC_END_OF_PAGE: u32 = 0o15;
pub const FIODEC_END_OF_FILE: u32 = 0o16;
pub const FIODEC_MASTER_SPACE: u32 = 0o17;
pub const FIODEC_SHIFT_ON: u32 = 0o74;
pub const FIODEC_SHIFT_OFF: u32 = 0o72;
pub const FIODEC_LINES_PER_PAGE: u32 = 60;

/// Unshifted and shifted (+0o100) code points.
fn fiodec_to_ascii(code: u32) -> Option<char> {
    Some(match code {
        0o00 => ' ',
        0o01 => '1',
        0o02 => '2',
        0o03 => '3',
        0o04 => '4',
        0o05 => '5',
        0o06 => '6',
        0o07 => '7',
        0o10 => '8',
        0o11 => '9',
        0o13 => '\x0C',
        0o20 => '0',
        0o21 => '/',
        0o22 => 'S',
        0o23 => 'T',
        0o24 => 'U',
        0o25 => 'V',
        0o26 => 'W',
        0o27 => 'X',
        0o30 => 'Y',
        0o31 => 'Z',
        0o33 => ',',
        0o34 => ':',
        0o36 => '\t',
        0o40 => '@',
        0o41 => 'J',
        0o42 => 'K',
        0o43 => 'L',
        0o44 => 'M',
        0o45 => 'N',
        0o46 => 'O',
        0o47 => 'P',
        0o50 => 'Q',
        0o51 => 'R',
        0o54 => '-',
        0o55 => ')',
        0o56 => '\\',
        0o57 => '(',
        0o61 => 'A',
        0o62 => 'B',
        0o63 => 'C',
        0o64 => 'D',
        0o65 => 'E',
        0o66 => 'F',
        0o67 => 'G',
        0o70 => 'H',
        0o71 => 'I',
        0o73 => '.',
        // Shifted column
        0o100 => ' ',
        0o101 => '"',
        0o102 => '\'',
        0o103 => '~',
        0o104 => '#',
        0o105 => '!',
        0o106 => '&',
        0o107 => '<',
        0o110 => '>',
        0o111 => '^',
        0o120 => '`',
        0o121 => '?',
        0o133 => '=',
        0o134 => ';',
        0o140 => '_',
        0o154 => '+',
        0o155 => ']',
        0o156 => '|',
        0o157 => '[',
        0o173 => '*',
        _ => return None,
    })
}

/// The shifted space (0o100) never encodes; the plain one wins.
fn ascii_to_fiodec(ch: char) -> Option<u32> {
    for code in 0..0o174u32 {
        if code == 0o100 {
            continue;
        }
        if fiodec_to_ascii(code) == Some(ch) {
            return Some(code);
        }
    }
    None
}

/// Decode FIODEC words to text.
pub fn fiodec_to_str(words: &[u32]) -> String {
    let mut data = String::new();
    let mut shift = 0u32;
    'outer: for &word in words {
        let chars = [(word >> 12) & 0o77, (word >> 6) & 0o77, word & 0o77];
        for (i, &ch) in chars.iter().enumerate() {
            if i == 0 {
                match ch {
                    FIODEC_END_OF_LINE => {
                        // Next two fields are the line number
                        data.push('\n');
                        break;
                    }
                    FIODEC_END_OF_PAGE => {
                        data.push('\x0C');
                        break;
                    }
                    FIODEC_END_OF_FILE => break 'outer,
                    FIODEC_MASTER_SPACE => break,
                    _ => {}
                }
            }
            if ch == FIODEC_MASTER_SPACE {
                // filler
            } else if ch == FIODEC_SHIFT_ON {
                shift = 0o100;
            } else if ch == FIODEC_SHIFT_OFF {
                shift = 0;
            } else if let Some(c) = fiodec_to_ascii(ch + shift) {
                data.push(c);
            }
        }
    }
    data
}

struct Encoder {
    data: Vec<u32>,
    current: Vec<u32>,
}

impl Encoder {
    fn push(&mut self, code: u32) {
        self.current.push(code & 0o77);
        if self.current.len() == 3 {
            self.data
                .push(self.current[0] << 12 | self.current[1] << 6 | self.current[2]);
            self.current.clear();
        }
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            while self.current.len() < 3 {
                self.current.push(FIODEC_MASTER_SPACE);
            }
            self.data
                .push(self.current[0] << 12 | self.current[1] << 6 | self.current[2]);
            self.current.clear();
        }
    }

    fn push_control(&mut self, code: u32, arg: u32) {
        self.flush();
        self.push(code);
        self.push(arg >> 6);
        self.push(arg & 0o77);
    }
}

/// Encode text as FIODEC words, paginating every sixty lines and
/// terminating with end-of-file. `\x1A` in the input ends the text.
pub fn str_to_fiodec(val: &str) -> Vec<u32> {
    let mut enc = Encoder {
        data: Vec::new(),
        current: Vec::new(),
    };
    let mut shift = false;
    let mut line_number = 1u32;
    let mut page_number = 1u32;

    for ch in val.chars() {
        match ch {
            '\n' => {
                enc.push_control(FIODEC_END_OF_LINE, line_number);
                line_number += 1;
                if line_number > FIODEC_LINES_PER_PAGE {
                    enc.push_control(FIODEC_END_OF_PAGE, page_number);
                    line_number = 1;
                    page_number += 1;
                }
            }
            '\x0C' => {
                enc.push_control(FIODEC_END_OF_PAGE, page_number);
                line_number = 1;
                page_number += 1;
            }
            '\x1A' => break,
            _ => {
                if let Some(v) = ascii_to_fiodec(ch.to_ascii_uppercase()) {
                    if v & 0o100 != 0 {
                        if !shift {
                            shift = true;
                            enc.push(FIODEC_SHIFT_ON);
                        }
                        enc.push(v & 0o77);
                    } else {
                        if shift {
                            shift = false;
                            enc.push(FIODEC_SHIFT_OFF);
                        }
                        enc.push(v);
                    }
                }
            }
        }
    }

    if line_number > 1 {
        enc.push_control(FIODEC_END_OF_PAGE, page_number);
    }
    enc.push_control(FIODEC_END_OF_FILE, 0);
    enc.push(0);
    enc.push(0);
    enc.push(0);
    enc.flush();
    enc.data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_survives_roundtrip() {
        let text = "HELLO, WORLD.\nSECOND LINE\n";
        let words = str_to_fiodec(text);
        // The encoder closes the page, so decoding appends a form feed.
        assert_eq!(fiodec_to_str(&words), format!("{}\x0C", text));
    }

    #[test]
    fn test_word_identity_through_decode() {
        let words = str_to_fiodec("A = B + C\nX(1) = \"Y\"\n");
        assert_eq!(str_to_fiodec(&fiodec_to_str(&words)), words);
    }

    #[test]
    fn test_lowercase_folds_upper() {
        assert_eq!(fiodec_to_str(&str_to_fiodec("abc\n")), "ABC\n");
    }

    #[test]
    fn test_pagination_every_sixty_lines() {
        let text: String = (0..61).map(|_| "X\n").collect();
        let words = str_to_fiodec(&text);
        let decoded = fiodec_to_str(&words);
        // A form feed lands after line sixty.
        assert_eq!(decoded.matches('\x0C').count(), 2);
    }
}
