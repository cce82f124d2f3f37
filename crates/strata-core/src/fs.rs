use std::io::Write;

use chrono::NaiveDate;
use strata_common::{FileMode, hex_dump};

use crate::{FileEntry, FsError, Result};

/// Options for the `DIR` listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirOptions {
    /// Names only.
    pub brief: bool,
    /// Extended per-entry detail.
    pub full: bool,
    /// List directories/UICs instead of files.
    pub uic: bool,
}

/// Options for `EXAMINE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExamineOptions {
    pub full: bool,
    /// Show the free map.
    pub bitmap: bool,
    pub free: bool,
}

/// The common contract of every format driver.
///
/// A driver is constructed over an image (`mount` and `initialize` are
/// inherent constructors on the driver types; the registry in the meta
/// crate wraps them into factories) and owns its image handle until
/// `close`. Any operation that mutates persistent state leaves the
/// in-memory and on-disk views consistent on return; there is no
/// transaction layer.
pub trait Filesystem {
    /// Short filesystem tag, e.g. `rt11`.
    fn fs_name(&self) -> &'static str;
    /// One-line human description.
    fn fs_description(&self) -> &'static str;

    /// Filesystem size in bytes.
    fn size(&mut self) -> Result<u64>;

    /// All entries of the current directory context, including empty and
    /// tentative slots where the format has them.
    fn entries(&mut self) -> Result<Vec<FileEntry>>;

    /// Glob-filter over the canonical filename form.
    ///
    /// Without `include_all`, only permanent (visible) entries are
    /// returned. Without `wildcard`, the pattern is matched literally.
    fn filter_entries(
        &mut self,
        pattern: Option<&str>,
        include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<FileEntry>>;

    /// Resolve one path to its entry.
    fn entry(&mut self, path: &str) -> Result<FileEntry>;

    /// Whole-file read. `None` picks the driver's default mode for the
    /// file (some formats choose by extension).
    fn read_bytes(&mut self, path: &str, mode: Option<FileMode>) -> Result<Vec<u8>>;

    /// Whole-file write; creates or overwrites.
    fn write_bytes(
        &mut self,
        path: &str,
        data: &[u8],
        creation_date: Option<NaiveDate>,
        file_type: Option<&str>,
        mode: Option<FileMode>,
    ) -> Result<()>;

    /// Allocate an empty file of the given block count, deleting any
    /// preexisting file with the same path first.
    fn create_file(
        &mut self,
        path: &str,
        blocks: u64,
        creation_date: Option<NaiveDate>,
        file_type: Option<&str>,
    ) -> Result<FileEntry>;

    fn create_directory(&mut self, path: &str) -> Result<()> {
        let _ = path;
        Err(FsError::InvalidArg(
            "directories are not supported on this filesystem".to_string(),
        ))
    }

    /// Remove an entry and return its blocks to the free map.
    fn delete(&mut self, path: &str) -> Result<()>;

    /// Change directory, for formats with a directory/UIC/partition
    /// namespace. Returns false when the path is not a directory.
    fn chdir(&mut self, path: &str) -> bool {
        let _ = path;
        false
    }

    fn pwd(&self) -> String {
        String::new()
    }

    fn is_dir(&mut self, path: &str) -> bool {
        let _ = path;
        false
    }

    fn exists(&mut self, path: &str) -> bool {
        self.entry(path).is_ok()
    }

    /// Format-native directory listing.
    fn dir(
        &mut self,
        volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()>;

    /// Diagnostic dump of filesystem metadata, or of one file's internals
    /// when `arg` is given.
    fn examine(
        &mut self,
        arg: Option<&str>,
        options: &ExamineOptions,
        out: &mut dyn Write,
    ) -> Result<()>;

    /// Raw block read, for block-addressable media.
    fn read_block(&mut self, block_number: u64, count: usize) -> Result<Vec<u8>> {
        let _ = (block_number, count);
        Err(FsError::InvalidArg(
            "filesystem is not block addressable".to_string(),
        ))
    }

    /// Hex dump of a file (by blocks) or of a raw block range.
    fn dump(
        &mut self,
        path: Option<&str>,
        start: Option<u64>,
        end: Option<u64>,
        out: &mut dyn Write,
    ) -> Result<()> {
        if let Some(path) = path {
            let entry = self.entry(path)?;
            let data = self.read_bytes(path, Some(FileMode::Image))?;
            let block_size = entry.block_size.max(1);
            let start = start.unwrap_or(0);
            let end = end.unwrap_or_else(|| entry.blocks.saturating_sub(1));
            for block_number in start..=end {
                let from = (block_number as usize) * block_size;
                if from >= data.len() {
                    break;
                }
                let to = (from + block_size).min(data.len());
                writeln!(out, "\nBLOCK NUMBER   {:08}", block_number).map_err(FsError::Io)?;
                hex_dump(out, &data[from..to]).map_err(FsError::Io)?;
            }
        } else {
            let start = start.unwrap_or(0);
            let end = match end {
                Some(end) => end,
                None if start == 0 => self.size()? / strata_io::BLOCK_SIZE as u64,
                None => start,
            };
            for block_number in start..=end {
                let data = self.read_block(block_number, 1)?;
                writeln!(out, "\nBLOCK NUMBER   {:08}", block_number).map_err(FsError::Io)?;
                hex_dump(out, &data).map_err(FsError::Io)?;
            }
        }
        Ok(())
    }

    /// File-type tags this filesystem understands.
    fn file_types(&self) -> Vec<String> {
        Vec::new()
    }

    fn flush(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}
