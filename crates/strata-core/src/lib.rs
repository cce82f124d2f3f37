//! Strata core
//!
//! The common filesystem contract every format driver implements, the
//! canonical directory-entry snapshot, and the error type shared across
//! the workspace.

pub use entry::{EntryStatus, FileEntry};
pub use error::{FsError, Result};
pub use fs::{DirOptions, ExamineOptions, Filesystem};
pub use uic::Uic;

pub use strata_common::FileMode;

mod entry;
mod error;
mod fs;
mod uic;
