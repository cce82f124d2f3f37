//! Strata common
//!
//! Character encodings, date packers and small helpers shared by the
//! filesystem drivers. Everything in here is a pure function over words and
//! bytes; nothing touches an image.

pub mod dates;
pub mod enc;
pub mod pattern;
pub mod words;

pub use pattern::{filename_match, splitdrive};
pub use words::{bytes_to_word, hex_dump, oct_dump, swap_words, word_to_bytes};

/// Whole-file transfer mode.
///
/// `Image` moves the raw stored form; `Ascii` applies the format's text
/// translation. Which one is the default depends on the driver and, for
/// some formats, on the file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileMode {
    Ascii,
    #[default]
    Image,
}
