//! Strata
//!
//! A uniform layer over a dozen vintage minicomputer on-disk formats:
//! mount an image by filesystem tag, then list, read, write and examine
//! it through the common [`Filesystem`] trait.

pub use registry::{fs_types, initialize, mount};
pub use volumes::Volumes;

pub use strata_core::{
    DirOptions, EntryStatus, ExamineOptions, FileEntry, FileMode, Filesystem, FsError, Result, Uic,
};
pub use strata_io::{BLOCK_SIZE, ByteFile};

mod registry;
mod volumes;
