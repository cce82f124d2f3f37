//! Strata IO
//!
//! Byte, block, word and tape access layers over disk and tape image files.
//! Filesystem drivers are built on top of these types and never touch the
//! host file directly.

pub use file::ByteFile;
pub use block::BlockDevice;
pub use tape::TapeStream;
pub use word::WordBlockDevice;

pub mod block;
pub mod file;
pub mod rx;
pub mod tape;
pub mod word;

/// Default logical block size in bytes.
pub const BLOCK_SIZE: usize = 512;

pub use std::io::{Error, ErrorKind, Read, Result, Seek, SeekFrom, Write};

/// Error for writes on a read-only image.
pub(crate) fn read_only_error() -> Error {
    Error::new(ErrorKind::PermissionDenied, "image is read-only")
}
