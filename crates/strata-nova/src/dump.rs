//! Data General DOS/RDOS DUMP archive driver (read-only).
//!
//! A dump is a stream of typed blocks: a Name block opens a file,
//! directory or partition; Data blocks carry a byte count, a checksum
//! and the payload; Time and Link blocks decorate the open entry; an End
//! block closes the current directory (or the archive). Partitions reset
//! the directory stack.

use std::io::Write;

use chrono::NaiveDate;
use strata_common::{FileMode, filename_match};
use strata_core::{
    DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result,
};
use strata_io::ByteFile;
use strata_io::{Read, Seek, SeekFrom};

use crate::{RdosAttributes, format_attr, rdos_to_date};

pub const NAME_BLOCK_ID: u8 = 0o377;
pub const DATA_BLOCK_ID: u8 = 0o376;
pub const ERROR_BLOCK_ID: u8 = 0o375;
pub const END_BLOCK_ID: u8 = 0o374;
pub const TIME_BLOCK_ID: u8 = 0o373;
pub const LINK_DATA_BLOCK_ID: u8 = 0o372;
pub const LINK_ACCESS_ATTRIBUTES_BLOCK_ID: u8 = 0o371;
pub const END_OF_SEGMENT_BLOCK_ID: u8 = 0o370;

/// A file, directory, partition or link in the dump.
#[derive(Debug, Clone)]
pub struct DumpEntry {
    pub filename: String,
    pub extension: String,
    pub attributes: RdosAttributes,
    pub link_access_attributes: RdosAttributes,
    /// Parent directory path, `None` at the archive root.
    pub parent: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Largest data-block payload, used as the block size.
    pub block_size: usize,
    /// File positions of the data-block payloads.
    pub addresses: Vec<(u64, usize)>,
    /// Days since 1967-12-31.
    pub last_access_date: u16,
    pub last_modification_date: u16,
    /// Hour in the high byte, minute in the low byte.
    pub last_modification_time: u16,
    /// Link target.
    pub target: String,
}

impl DumpEntry {
    fn new(filename: &str, attributes: RdosAttributes, parent: Option<String>) -> Self {
        let (filename, extension) = match filename.split_once('.') {
            Some((name, ext)) => (name.to_string(), ext.to_string()),
            None => (filename.to_string(), String::new()),
        };
        Self {
            filename,
            extension,
            attributes,
            link_access_attributes: RdosAttributes::empty(),
            parent,
            size: 0,
            block_size: 0,
            addresses: Vec::new(),
            last_access_date: 0,
            last_modification_date: 0,
            last_modification_time: 0,
            target: String::new(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(RdosAttributes::DIR)
    }

    pub fn is_partition(&self) -> bool {
        self.attributes.contains(RdosAttributes::PAR)
    }

    pub fn is_link(&self) -> bool {
        self.attributes.contains(RdosAttributes::LNK)
    }

    pub fn is_contiguous(&self) -> bool {
        self.attributes.contains(RdosAttributes::CON)
    }

    pub fn is_random(&self) -> bool {
        self.attributes.contains(RdosAttributes::RAN)
    }

    pub fn basename(&self) -> String {
        format!("{}.{}", self.filename, self.extension)
    }

    pub fn fullname(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}/{}", parent, self.basename()),
            None => self.basename(),
        }
    }

    /// Length in blocks.
    pub fn length(&self) -> u64 {
        if self.block_size == 0 {
            0
        } else {
            self.size.div_ceil(self.block_size as u64)
        }
    }

    pub fn creation_date(&self) -> Option<NaiveDate> {
        rdos_to_date(self.last_modification_date)
    }

    pub fn last_access(&self) -> Option<NaiveDate> {
        rdos_to_date(self.last_access_date)
    }

    fn to_file_entry(&self) -> FileEntry {
        let mut entry = FileEntry::new(self.fullname())
            .with_size(self.size)
            .with_date(self.creation_date());
        entry.basename = self.basename();
        entry.blocks = self.length();
        entry.block_size = self.block_size.max(1);
        entry.is_directory = self.is_directory() || self.is_partition();
        entry.read_only = true;
        entry.protected = self.attributes.contains(RdosAttributes::WP);
        entry.file_type = Some(
            if self.is_directory() {
                "DIR"
            } else if self.is_partition() {
                "PAR"
            } else if self.is_link() {
                "LNK"
            } else if self.is_contiguous() {
                "CON"
            } else if self.is_random() {
                "RAN"
            } else {
                "SEQ"
            }
            .to_string(),
        );
        entry
    }
}

/// DG DOS/RDOS DUMP archive over an image file.
pub struct DgdosDumpFs {
    file: ByteFile,
    pub pwd: String,
}

impl DgdosDumpFs {
    pub fn mount(file: ByteFile) -> Result<Self> {
        Self::mount_strict(file, true)
    }

    pub fn mount_strict(mut file: ByteFile, strict: bool) -> Result<Self> {
        if strict {
            file.seek(SeekFrom::Start(0)).map_err(FsError::from)?;
            let mut id = [0u8; 1];
            file.read_exact(&mut id).map_err(FsError::from)?;
            if id[0] != NAME_BLOCK_ID {
                return Err(FsError::corrupt("invalid dump file"));
            }
        }
        Ok(Self {
            file,
            pwd: "/".to_string(),
        })
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buffer = [0u8; 1];
        self.file.read_exact(&mut buffer).map_err(FsError::from)?;
        Ok(buffer[0])
    }

    /// Dump words are big-endian.
    fn read_word(&mut self) -> Result<u16> {
        let mut buffer = [0u8; 2];
        self.file.read_exact(&mut buffer).map_err(FsError::from)?;
        Ok(u16::from_be_bytes(buffer))
    }

    fn read_to_null(&mut self) -> Result<String> {
        let mut buffer = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.file.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == 0 => break,
                Ok(_) => buffer.push(byte[0]),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    /// Parse the whole archive into entries, tracking the directory
    /// nesting: directories push onto the parent stack, partitions reset
    /// it, End blocks pop it.
    fn read_all_entries(&mut self) -> Result<Vec<DumpEntry>> {
        self.file.seek(SeekFrom::Start(0)).map_err(FsError::from)?;
        let mut entries: Vec<DumpEntry> = Vec::new();
        let mut parents: Vec<String> = Vec::new();
        let mut current: Option<DumpEntry> = None;
        loop {
            let block_id = match self.read_byte() {
                Ok(id) => id,
                Err(_) => break, // end of the archive
            };
            match block_id {
                NAME_BLOCK_ID => {
                    let attributes = RdosAttributes::from_bits_retain(self.read_word()?);
                    if attributes.contains(RdosAttributes::CON) {
                        let _contiguous_blocks = self.read_word()?;
                    }
                    let name = self.read_to_null()?;
                    if let Some(entry) = current.take() {
                        if entry.is_partition() {
                            parents = vec![entry.fullname()];
                        } else if entry.is_directory() {
                            parents.push(entry.fullname());
                        }
                        entries.push(entry);
                    }
                    current = Some(DumpEntry::new(
                        &name,
                        attributes,
                        parents.last().cloned(),
                    ));
                }
                DATA_BLOCK_ID => {
                    let byte_count = self.read_word()? as usize;
                    let _checksum = self.read_word()?;
                    let data_position = self.file.tell().map_err(FsError::from)?;
                    self.file
                        .seek(SeekFrom::Current(byte_count as i64))
                        .map_err(FsError::from)?;
                    if let Some(entry) = current.as_mut() {
                        entry.size += byte_count as u64;
                        entry.block_size = entry.block_size.max(byte_count);
                        entry.addresses.push((data_position, byte_count));
                    }
                }
                TIME_BLOCK_ID => {
                    let last_access_date = self.read_word()?;
                    let last_modification_date = self.read_word()?;
                    let last_modification_time = self.read_word()?;
                    if let Some(entry) = current.as_mut() {
                        entry.last_access_date = last_access_date;
                        entry.last_modification_date = last_modification_date;
                        entry.last_modification_time = last_modification_time;
                    }
                }
                LINK_DATA_BLOCK_ID => {
                    let dirname = self.read_to_null()?;
                    let resfilename = self.read_to_null()?;
                    if let Some(entry) = current.as_mut() {
                        entry.target = if dirname.is_empty() {
                            resfilename
                        } else {
                            format!("{}:{}", dirname, resfilename)
                        };
                    }
                }
                LINK_ACCESS_ATTRIBUTES_BLOCK_ID => {
                    let attributes = RdosAttributes::from_bits_retain(self.read_word()?);
                    if let Some(entry) = current.as_mut() {
                        entry.link_access_attributes = attributes;
                    }
                }
                ERROR_BLOCK_ID => {}
                END_OF_SEGMENT_BLOCK_ID => {
                    let _t = self.read_word()?;
                    let _segment_number = self.read_byte()?;
                    let _filename = self.read_to_null()?;
                }
                END_BLOCK_ID => {
                    if parents.pop().is_none() {
                        break;
                    }
                }
                other => {
                    return Err(FsError::corrupt(format!(
                        "{} is not a valid block type",
                        other
                    )));
                }
            }
        }
        if let Some(entry) = current.take() {
            entries.push(entry);
        }
        log::debug!("parsed {} dump entries", entries.len());
        Ok(entries)
    }

    /// Entries of one directory level.
    fn read_dir_entries(&mut self, parent: Option<&str>) -> Result<Vec<DumpEntry>> {
        Ok(self
            .read_all_entries()?
            .into_iter()
            .filter(|e| e.parent.as_deref() == parent)
            .collect())
    }

    fn locate(&mut self, path: &str) -> Result<DumpEntry> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.is_empty() {
            return Err(FsError::NotFound(path.to_string()));
        }
        let mut parent: Option<DumpEntry> = None;
        for part in &parts {
            if let Some(entry) = &parent {
                if !entry.is_directory() && !entry.is_partition() {
                    return Err(FsError::NotFound(path.to_string()));
                }
            }
            let parent_name = parent.as_ref().map(|e| e.fullname());
            let wanted = part.trim_end_matches('.').to_uppercase();
            let found = self
                .read_dir_entries(parent_name.as_deref())?
                .into_iter()
                .find(|e| {
                    e.basename().trim_end_matches('.').to_uppercase() == wanted
                })
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;
            parent = Some(found);
        }
        Ok(parent.expect("at least one component"))
    }

    fn read_entry_bytes(&mut self, entry: &DumpEntry) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(entry.size as usize);
        for &(position, count) in &entry.addresses {
            self.file
                .seek(SeekFrom::Start(position))
                .map_err(FsError::from)?;
            let mut buffer = vec![0u8; count];
            self.file.read_exact(&mut buffer).map_err(FsError::from)?;
            data.extend(buffer);
        }
        Ok(data)
    }
}

impl Filesystem for DgdosDumpFs {
    fn fs_name(&self) -> &'static str {
        "dump"
    }

    fn fs_description(&self) -> &'static str {
        "Data General DOS/RDOS DUMP"
    }

    fn size(&mut self) -> Result<u64> {
        self.file.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        Ok(self
            .read_dir_entries(None)?
            .iter()
            .map(DumpEntry::to_file_entry)
            .collect())
    }

    fn filter_entries(
        &mut self,
        pattern: Option<&str>,
        _include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<FileEntry>> {
        let pattern = pattern.map(|p| p.to_uppercase());
        let (parent, name_pattern) = match pattern.as_deref() {
            None => (None, None),
            Some(pattern) => match pattern.rsplit_once('/') {
                Some((dir, name)) => {
                    let dir = dir.trim_matches('/');
                    let parent = if dir.is_empty() {
                        None
                    } else {
                        Some(self.locate(dir)?.fullname())
                    };
                    (parent, Some(name.to_string()))
                }
                None => (None, Some(pattern.to_string())),
            },
        };
        Ok(self
            .read_dir_entries(parent.as_deref())?
            .iter()
            .filter(|e| {
                filename_match(
                    &e.basename().to_uppercase(),
                    name_pattern.as_deref(),
                    wildcard,
                )
            })
            .map(DumpEntry::to_file_entry)
            .collect())
    }

    fn entry(&mut self, path: &str) -> Result<FileEntry> {
        self.locate(path).map(|e| e.to_file_entry())
    }

    fn read_bytes(&mut self, path: &str, mode: Option<FileMode>) -> Result<Vec<u8>> {
        let entry = self.locate(path)?;
        let data = self.read_entry_bytes(&entry)?;
        Ok(match mode {
            Some(FileMode::Ascii) => data
                .into_iter()
                .map(|x| if x == 0x0D { 0x0A } else { x })
                .collect(),
            _ => data,
        })
    }

    fn write_bytes(
        &mut self,
        _path: &str,
        _data: &[u8],
        _creation_date: Option<NaiveDate>,
        _file_type: Option<&str>,
        _mode: Option<FileMode>,
    ) -> Result<()> {
        Err(FsError::ReadOnlyFs)
    }

    fn create_file(
        &mut self,
        _path: &str,
        _blocks: u64,
        _creation_date: Option<NaiveDate>,
        _file_type: Option<&str>,
    ) -> Result<FileEntry> {
        Err(FsError::ReadOnlyFs)
    }

    fn delete(&mut self, _path: &str) -> Result<()> {
        Err(FsError::ReadOnlyFs)
    }

    fn is_dir(&mut self, path: &str) -> bool {
        self.locate(path)
            .map(|e| e.is_directory() || e.is_partition())
            .unwrap_or(false)
    }

    fn dir(
        &mut self,
        _volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        let entries = self.filter_entries(pattern, true, true)?;
        for file_entry in &entries {
            if options.brief {
                writeln!(out, "{}", file_entry.basename).map_err(FsError::Io)?;
                continue;
            }
            let entry = self.locate(&file_entry.fullname)?;
            if entry.is_link() {
                writeln!(
                    out,
                    "{:<13}             {}",
                    entry.basename(),
                    entry.target
                )
                .map_err(FsError::Io)?;
            } else {
                let mut attr = format_attr(entry.attributes);
                let uftlkl = format_attr(entry.link_access_attributes);
                if !uftlkl.is_empty() {
                    attr = format!("{}/{}", attr, uftlkl);
                }
                let creation_date = entry
                    .creation_date()
                    .map(|d| {
                        format!(
                            "{} {:02}:{:02}",
                            d.format("%m/%d/%y"),
                            entry.last_modification_time >> 8,
                            entry.last_modification_time & 0xFF
                        )
                    })
                    .unwrap_or_default();
                let access_date = entry
                    .last_access()
                    .map(|d| d.format("%m/%d/%y").to_string())
                    .unwrap_or_default();
                writeln!(
                    out,
                    "{:<13}{:>10}  {:<7} {:<14} {:<8}",
                    entry.basename(),
                    entry.size,
                    attr,
                    creation_date,
                    access_date
                )
                .map_err(FsError::Io)?;
            }
        }
        writeln!(out).map_err(FsError::Io)?;
        Ok(())
    }

    fn examine(
        &mut self,
        arg: Option<&str>,
        _options: &ExamineOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        if let Some(arg) = arg {
            let entry = self.locate(arg)?;
            let file_type = if entry.is_directory() {
                "Directory"
            } else if entry.is_partition() {
                "Partition"
            } else if entry.is_link() {
                "Link"
            } else if entry.is_random() {
                "Random file"
            } else if entry.is_contiguous() {
                "Contiguous file"
            } else {
                "Sequential file"
            };
            writeln!(out, "Filename:           {}", entry.fullname()).map_err(FsError::Io)?;
            writeln!(out, "File Type:          {}", file_type).map_err(FsError::Io)?;
            writeln!(
                out,
                "Creation Date:      {:?}",
                entry.creation_date()
            )
            .map_err(FsError::Io)?;
            if entry.is_link() {
                writeln!(out, "Target:             {}", entry.target).map_err(FsError::Io)?;
            } else {
                writeln!(out, "File Size:          {}", entry.size).map_err(FsError::Io)?;
                writeln!(
                    out,
                    "Write Protected:    {}",
                    entry.attributes.contains(RdosAttributes::WP)
                )
                .map_err(FsError::Io)?;
                writeln!(
                    out,
                    "Permanent:          {}",
                    entry.attributes.contains(RdosAttributes::PER)
                )
                .map_err(FsError::Io)?;
            }
            return Ok(());
        }
        for entry in self.read_all_entries()? {
            let attr = format_attr(entry.attributes);
            if entry.is_link() {
                writeln!(
                    out,
                    "{:>10}.{:<2} {:<12}  -> {}",
                    entry.filename, entry.extension, attr, entry.target
                )
                .map_err(FsError::Io)?;
            } else {
                let creation_date = entry
                    .creation_date()
                    .map(|d| d.format("%m/%d/%y").to_string())
                    .unwrap_or_default();
                writeln!(
                    out,
                    "{:<30} {:<12} {:>10}  {:<8}",
                    entry.fullname(),
                    attr,
                    entry.size,
                    creation_date
                )
                .map_err(FsError::Io)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(FsError::from)
    }

    fn close(&mut self) -> Result<()> {
        self.file.close().map_err(FsError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct DumpBuilder {
        data: Vec<u8>,
    }

    impl DumpBuilder {
        fn new() -> Self {
            Self { data: Vec::new() }
        }

        fn name(&mut self, attributes: RdosAttributes, name: &str) -> &mut Self {
            self.data.push(NAME_BLOCK_ID);
            self.data.extend(attributes.bits().to_be_bytes());
            if attributes.contains(RdosAttributes::CON) {
                self.data.extend(0u16.to_be_bytes());
            }
            self.data.extend(name.as_bytes());
            self.data.push(0);
            self
        }

        fn time(&mut self, access: u16, modification: u16) -> &mut Self {
            self.data.push(TIME_BLOCK_ID);
            self.data.extend(access.to_be_bytes());
            self.data.extend(modification.to_be_bytes());
            self.data.extend(0u16.to_be_bytes());
            self
        }

        fn payload(&mut self, payload: &[u8]) -> &mut Self {
            self.data.push(DATA_BLOCK_ID);
            self.data.extend((payload.len() as u16).to_be_bytes());
            let checksum: u16 = payload.iter().map(|&b| b as u16).sum();
            self.data.extend(checksum.to_be_bytes());
            self.data.extend(payload);
            self
        }

        fn end(&mut self) -> &mut Self {
            self.data.push(END_BLOCK_ID);
            self
        }

        fn build(&self) -> ByteFile {
            ByteFile::from_vec(self.data.clone())
        }
    }

    fn build_dump() -> ByteFile {
        let mut b = DumpBuilder::new();
        b.name(RdosAttributes::empty(), "HELLO.SR")
            .time(100, 200)
            .payload(b"FIRST BLOCK ")
            .payload(b"SECOND BLOCK")
            .name(RdosAttributes::DIR, "SUB.DR")
            .time(100, 200)
            .name(RdosAttributes::empty(), "INNER.TX")
            .payload(b"NESTED DATA")
            .end()
            .name(RdosAttributes::empty(), "LAST.BN")
            .payload(&[1, 2, 3])
            .end();
        b.build()
    }

    #[test]
    fn test_mount_rejects_non_dump() {
        let file = ByteFile::from_vec(vec![0u8; 100]);
        assert!(DgdosDumpFs::mount(file).is_err());
    }

    #[test]
    fn test_root_listing() {
        let mut fs = DgdosDumpFs::mount(build_dump()).unwrap();
        let entries = fs.entries().unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.basename.as_str()).collect();
        assert_eq!(names, vec!["HELLO.SR", "SUB.DR", "LAST.BN"]);
        assert!(entries[1].is_directory);
    }

    #[test]
    fn test_data_blocks_concatenate() {
        let mut fs = DgdosDumpFs::mount(build_dump()).unwrap();
        let data = fs.read_bytes("HELLO.SR", None).unwrap();
        assert_eq!(data, b"FIRST BLOCK SECOND BLOCK");
        let entry = fs.entry("HELLO.SR").unwrap();
        assert_eq!(entry.size, 24);
    }

    #[test]
    fn test_nested_directory() {
        let mut fs = DgdosDumpFs::mount(build_dump()).unwrap();
        let data = fs.read_bytes("SUB.DR/INNER.TX", None).unwrap();
        assert_eq!(data, b"NESTED DATA");
        assert!(fs.is_dir("SUB.DR"));
        let inner = fs.filter_entries(Some("SUB.DR/*"), false, true).unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].basename, "INNER.TX");
    }

    #[test]
    fn test_dates_from_time_block() {
        let mut fs = DgdosDumpFs::mount(build_dump()).unwrap();
        let entry = fs.entry("HELLO.SR").unwrap();
        assert_eq!(entry.creation_date, rdos_to_date(200));
    }

    #[test]
    fn test_writes_rejected() {
        let mut fs = DgdosDumpFs::mount(build_dump()).unwrap();
        assert!(matches!(
            fs.write_bytes("X.SR", b"x", None, None, None),
            Err(FsError::ReadOnlyFs)
        ));
    }
}
