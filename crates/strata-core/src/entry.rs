use chrono::NaiveDate;

/// Lifecycle state of a directory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryStatus {
    /// Free-space marker.
    Empty,
    /// Reserved but not committed.
    Tentative,
    /// Visible file.
    #[default]
    Permanent,
}

/// Canonical snapshot of a directory entry.
///
/// Drivers keep their own on-disk entry structures (segment and slot
/// indexes into the directory they were read from) and surface these
/// value snapshots through the [`crate::Filesystem`] trait; mutation goes
/// back through the filesystem by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Name in the format's canonical form, with directory prefix where
    /// the format has one (`[g,u]NAME.EXT`, `/usr/file`, `[2]NAME`).
    pub fullname: String,
    /// Final path component.
    pub basename: String,
    /// Length in blocks.
    pub blocks: u64,
    /// Length in bytes.
    pub size: u64,
    /// Block size of the file's data blocks.
    pub block_size: usize,
    pub creation_date: Option<NaiveDate>,
    /// Format file-type tag, where the format has one.
    pub file_type: Option<String>,
    pub read_only: bool,
    pub protected: bool,
    /// True for directories in hierarchical formats.
    pub is_directory: bool,
    pub status: EntryStatus,
}

impl FileEntry {
    pub fn new(fullname: impl Into<String>) -> Self {
        let fullname = fullname.into();
        Self {
            basename: fullname.clone(),
            fullname,
            blocks: 0,
            size: 0,
            block_size: strata_io::BLOCK_SIZE,
            creation_date: None,
            file_type: None,
            read_only: false,
            protected: false,
            is_directory: false,
            status: EntryStatus::default(),
        }
    }

    pub fn with_blocks(mut self, blocks: u64, block_size: usize) -> Self {
        self.blocks = blocks;
        self.size = blocks * block_size as u64;
        self.block_size = block_size;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_date(mut self, date: Option<NaiveDate>) -> Self {
        self.creation_date = date;
        self
    }

    pub fn with_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }
}
