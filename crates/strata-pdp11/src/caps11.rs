//! CAPS-11 cassette driver.
//!
//! Every file is a 32-byte header record, 128-byte data records and a tape
//! mark. A zeroed header (the sentinel file) marks the end of the tape.
//! Creating a file rewrites the sentinel position and lays a fresh
//! sentinel after the new data.

use std::io::{ErrorKind, Write};

use bytemuck::{Pod, Zeroable};
use chrono::{Local, NaiveDate};
use strata_common::dates::{caps11_to_date, date_to_caps11};
use strata_common::{FileMode, filename_match};
use strata_core::{
    DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result,
};
use strata_io::{BLOCK_SIZE, ByteFile, TapeStream};

use crate::rt11::rt11_canonical_filename;

const HEADER_RECORD_SIZE: usize = 32;
const RECORD_SIZE: usize = 128;

/// On-disk shape of a file header record. The version byte is the
/// CAPS-8 extension of the otherwise identical CAPS-11 layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawCaps11Header {
    /// Filename, space padded ASCII.
    pub filename: [u8; 6],
    /// Extension, space padded ASCII.
    pub extension: [u8; 3],
    pub record_type: u8,
    /// Record length, big-endian; always 128 for data files.
    pub record_length: [u8; 2],
    /// Sequence number for multi volume files.
    pub sequence: u8,
    /// Auxiliary header bytes preceding the data.
    pub continued: u8,
    /// Creation date as `ddmmyy`.
    pub date: [u8; 6],
    pub version: u8,
    pub unused: [u8; 11],
}

pub const FILE_TYPE_ASCII: u8 = 0o1;
pub const FILE_TYPE_BIN: u8 = 0o2;
pub const FILE_TYPE_BOOT: u8 = 0o13;
pub const FILE_TYPE_BAD: u8 = 0o14;

/// Record type tags from the CAPS-11 users guide.
const STANDARD_FILE_TYPES: &[(u8, &str)] = &[
    (FILE_TYPE_ASCII, "ASCII"),
    (FILE_TYPE_BIN, "BIN"),
    (0o3, "CORE1"),
    (0o4, "CORE2"),
    (0o5, "CORE3"),
    (0o6, "CORE4"),
    (0o7, "CORE5"),
    (0o10, "CORE6"),
    (0o11, "CORE7"),
    (0o12, "CORE8"),
    (FILE_TYPE_BOOT, "BOOT"),
    (FILE_TYPE_BAD, "BAD"),
];

fn file_type_name(record_type: u8) -> Option<&'static str> {
    STANDARD_FILE_TYPES
        .iter()
        .find(|(t, _)| *t == record_type)
        .map(|&(_, name)| name)
}

fn file_type_code(name: &str) -> Option<u8> {
    STANDARD_FILE_TYPES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|&(t, _)| t)
}

/// A CAPS-11 file header, plus the tape position it was read from.
#[derive(Debug, Clone)]
pub struct Caps11Entry {
    pub filename: String,
    pub extension: String,
    pub record_type: u8,
    /// Always 128 for data files.
    pub record_length: u16,
    pub sequence: u8,
    /// Auxiliary header bytes preceding the data.
    pub continued: u8,
    pub raw_creation_date: [u8; 6],
    /// CAPS-8 extension; zero on CAPS-11 tapes.
    pub version: u8,
    pub file_number: usize,
    /// Data size in bytes.
    pub size: u64,
    pub tape_pos: u64,
}

impl Caps11Entry {
    fn read(buffer: &[u8], file_number: usize, tape_pos: u64, size: u64) -> Self {
        let raw: &RawCaps11Header =
            bytemuck::from_bytes(&buffer[..HEADER_RECORD_SIZE]);
        let mut filename = String::from_utf8_lossy(&raw.filename)
            .trim_end_matches(' ')
            .to_string();
        let mut extension = String::from_utf8_lossy(&raw.extension)
            .trim_end_matches(' ')
            .to_string();
        if filename.is_empty() || filename.starts_with('\0') {
            // Sentinel file
            filename = String::new();
            extension = String::new();
        }
        Self {
            filename,
            extension,
            record_type: raw.record_type,
            record_length: u16::from_be_bytes(raw.record_length),
            sequence: raw.sequence,
            continued: raw.continued,
            raw_creation_date: raw.date,
            version: raw.version,
            file_number,
            size: size.saturating_sub(raw.continued as u64),
            tape_pos,
        }
    }

    fn to_header(&self) -> [u8; HEADER_RECORD_SIZE] {
        let mut raw = RawCaps11Header::zeroed();
        if !self.filename.is_empty() {
            let filename = format!("{:<6}", self.filename);
            let extension = format!("{:<3}", self.extension);
            raw.filename.copy_from_slice(&filename.as_bytes()[..6]);
            raw.extension.copy_from_slice(&extension.as_bytes()[..3]);
        }
        raw.record_type = self.record_type;
        raw.record_length = self.record_length.to_be_bytes();
        raw.sequence = self.sequence;
        raw.continued = self.continued;
        raw.date = self.raw_creation_date;
        raw.version = self.version;
        bytemuck::cast(raw)
    }

    pub fn is_sentinel(&self) -> bool {
        self.filename.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.record_type == FILE_TYPE_BAD || self.is_sentinel()
    }

    /// Length in 512-byte blocks.
    pub fn length(&self) -> u64 {
        self.size.div_ceil(BLOCK_SIZE as u64)
    }

    pub fn basename(&self) -> String {
        format!("{}.{}", self.filename, self.extension)
    }

    pub fn creation_date(&self) -> Option<NaiveDate> {
        caps11_to_date(&self.raw_creation_date)
    }

    fn to_file_entry(&self) -> FileEntry {
        let mut entry = FileEntry::new(self.basename())
            .with_blocks(self.length(), BLOCK_SIZE)
            .with_size(self.size)
            .with_date(self.creation_date());
        if let Some(name) = file_type_name(self.record_type) {
            entry.file_type = Some(name.to_string());
        }
        entry
    }
}

/// CAPS-11 cassette filesystem over a SIMH tape stream.
pub struct Caps11Fs {
    tape: TapeStream,
    /// True when a CAPS-8 version byte was seen on mount.
    pub caps8: bool,
}

impl Caps11Fs {
    pub fn mount(file: ByteFile) -> Result<Self> {
        Self::mount_strict(file, true)
    }

    pub fn mount_strict(file: ByteFile, strict: bool) -> Result<Self> {
        let mut fs = Self {
            tape: TapeStream::new(file),
            caps8: false,
        };
        if strict {
            for entry in fs.read_file_headers(false)? {
                if !entry.is_sentinel() && entry.version != 0 {
                    fs.caps8 = true;
                }
                if entry.record_length != 0 && entry.record_length != RECORD_SIZE as u16 {
                    return Err(FsError::corrupt(format!(
                        "invalid record length ({}) for {}",
                        entry.record_length,
                        entry.basename()
                    )));
                }
            }
        }
        Ok(fs)
    }

    /// Scan the tape for file headers.
    fn read_file_headers(&mut self, include_eot: bool) -> Result<Vec<Caps11Entry>> {
        let mut entries = Vec::new();
        self.tape.rewind()?;
        let mut file_number = 0;
        loop {
            let tape_pos = self.tape.pos()?;
            match self.tape.read_header() {
                Ok((header, size)) => {
                    if header.len() >= HEADER_RECORD_SIZE {
                        file_number += 1;
                        let entry = Caps11Entry::read(&header, file_number, tape_pos, size);
                        if include_eot || !entry.is_sentinel() {
                            entries.push(entry);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(entries)
    }

    fn internal_filter(
        &mut self,
        pattern: Option<&str>,
        include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<Caps11Entry>> {
        let pattern = pattern.map(|p| rt11_canonical_filename(p, wildcard));
        Ok(self
            .read_file_headers(false)?
            .into_iter()
            .filter(|e| filename_match(&e.basename(), pattern.as_deref(), wildcard))
            .filter(|e| include_all || !e.is_empty())
            .collect())
    }

    fn locate(&mut self, path: &str) -> Result<Caps11Entry> {
        let fullname = rt11_canonical_filename(path, false);
        self.internal_filter(Some(&fullname), false, false)?
            .into_iter()
            .next()
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn read_entry_bytes(&mut self, entry: &Caps11Entry) -> Result<Vec<u8>> {
        self.tape.seek(entry.tape_pos)?;
        let data = self.tape.read_file()?;
        let skip = (HEADER_RECORD_SIZE + entry.continued as usize).min(data.len());
        Ok(data[skip..].to_vec())
    }

    fn delete_entry(&mut self, entry: &Caps11Entry) -> Result<()> {
        let mut blank = entry.clone();
        blank.filename = "*EMPTY".to_string();
        blank.extension = String::new();
        blank.record_type = FILE_TYPE_BAD;
        blank.record_length = 0;
        blank.sequence = 0;
        blank.continued = 0;
        blank.raw_creation_date = [0u8; 6];
        self.tape.seek(entry.tape_pos)?;
        self.tape.write_forward(&blank.to_header())?;
        Ok(())
    }

    /// Write the sentinel file at the current tape position and truncate.
    fn write_sentinel_file(&mut self) -> Result<()> {
        self.tape.write_forward(&[0u8; HEADER_RECORD_SIZE])?;
        self.tape.truncate_here()?;
        Ok(())
    }

    fn create_with_content(
        &mut self,
        path: &str,
        records: u64,
        creation_date: Option<NaiveDate>,
        file_type: Option<&str>,
        content: Option<&[u8]>,
    ) -> Result<Caps11Entry> {
        if self.tape.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let fullname = rt11_canonical_filename(path, false);
        if let Ok(old) = self.locate(&fullname) {
            self.delete_entry(&old)?;
        }
        // Position before the trailing run of sentinel and bad files.
        let mut tape_pos = 0;
        for entry in self.read_file_headers(true)?.iter().rev() {
            if !entry.is_sentinel() && entry.record_type != FILE_TYPE_BAD {
                break;
            }
            tape_pos = entry.tape_pos;
        }
        self.tape.seek(tape_pos)?;
        self.tape.truncate_here()?;

        let (filename, extension) = fullname
            .split_once('.')
            .map(|(n, e)| (n.to_string(), e.to_string()))
            .ok_or_else(|| FsError::InvalidArg(format!("invalid filename: {}", path)))?;
        let record_type = file_type
            .and_then(file_type_code)
            .unwrap_or(FILE_TYPE_BIN);
        let entry = Caps11Entry {
            filename,
            extension,
            record_type,
            record_length: RECORD_SIZE as u16,
            sequence: 0,
            continued: 0,
            raw_creation_date: date_to_caps11(creation_date),
            version: 0,
            file_number: 0,
            size: records * RECORD_SIZE as u64,
            tape_pos,
        };
        self.tape.write_forward(&entry.to_header())?;
        for i in 0..records as usize {
            let mut record = [0u8; RECORD_SIZE];
            if let Some(content) = content {
                let from = i * RECORD_SIZE;
                if from < content.len() {
                    let to = ((i + 1) * RECORD_SIZE).min(content.len());
                    record[..to - from].copy_from_slice(&content[from..to]);
                }
            }
            self.tape.write_forward(&record)?;
        }
        self.tape.write_mark()?;
        self.write_sentinel_file()?;
        Ok(entry)
    }

    /// Write an empty cassette: a mark and the sentinel file.
    pub fn initialize(&mut self) -> Result<()> {
        self.tape.rewind()?;
        self.tape.write_mark()?;
        self.write_sentinel_file()
    }
}

impl Filesystem for Caps11Fs {
    fn fs_name(&self) -> &'static str {
        "caps11"
    }

    fn fs_description(&self) -> &'static str {
        "PDP-11 CAPS-11"
    }

    fn size(&mut self) -> Result<u64> {
        self.tape.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        Ok(self
            .read_file_headers(false)?
            .iter()
            .filter(|e| !e.is_empty())
            .map(Caps11Entry::to_file_entry)
            .collect())
    }

    fn filter_entries(
        &mut self,
        pattern: Option<&str>,
        include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<FileEntry>> {
        Ok(self
            .internal_filter(pattern, include_all, wildcard)?
            .iter()
            .map(Caps11Entry::to_file_entry)
            .collect())
    }

    fn entry(&mut self, path: &str) -> Result<FileEntry> {
        self.locate(path).map(|e| e.to_file_entry())
    }

    fn read_bytes(&mut self, path: &str, _mode: Option<FileMode>) -> Result<Vec<u8>> {
        let entry = self.locate(path)?;
        self.read_entry_bytes(&entry)
    }

    fn write_bytes(
        &mut self,
        path: &str,
        data: &[u8],
        creation_date: Option<NaiveDate>,
        file_type: Option<&str>,
        _mode: Option<FileMode>,
    ) -> Result<()> {
        let records = (data.len() as u64).div_ceil(RECORD_SIZE as u64);
        self.create_with_content(path, records, creation_date, file_type, Some(data))?;
        Ok(())
    }

    fn create_file(
        &mut self,
        path: &str,
        blocks: u64,
        creation_date: Option<NaiveDate>,
        file_type: Option<&str>,
    ) -> Result<FileEntry> {
        // The block count is in 512-byte blocks; records are 128 bytes.
        let records = blocks * (BLOCK_SIZE / RECORD_SIZE) as u64;
        self.create_with_content(path, records, creation_date, file_type, None)
            .map(|e| e.to_file_entry())
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if self.tape.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let entry = self.locate(path)?;
        self.delete_entry(&entry)
    }

    fn dir(
        &mut self,
        _volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        if !options.brief {
            let today = Local::now().date_naive();
            if self.caps8 {
                writeln!(out, "{}", today.format("%m/%d/%y")).map_err(FsError::Io)?;
            } else {
                writeln!(out, " {}\n", today.format("%d-%B-%y").to_string().to_uppercase())
                    .map_err(FsError::Io)?;
            }
        }
        let caps8 = self.caps8;
        for entry in self.internal_filter(pattern, true, true)? {
            if options.brief {
                if entry.is_empty() {
                    continue;
                }
                if caps8 {
                    writeln!(out, "{:<6}.{:<3}", entry.filename, entry.extension)
                        .map_err(FsError::Io)?;
                } else {
                    writeln!(out, "{:<6} {:<3}", entry.filename, entry.extension)
                        .map_err(FsError::Io)?;
                }
            } else if caps8 {
                let version = if entry.version != 0 {
                    format!("V{}", entry.version)
                } else {
                    String::new()
                };
                let creation_date = entry
                    .creation_date()
                    .map(|d| d.format("%m/%d/%y").to_string())
                    .unwrap_or_default();
                writeln!(
                    out,
                    "{:<6}.{:<3} {:<8} {}",
                    entry.filename, entry.extension, creation_date, version
                )
                .map_err(FsError::Io)?;
            } else {
                let creation_date = entry
                    .creation_date()
                    .map(|d| d.format("%d-%b-%y").to_string().to_uppercase())
                    .unwrap_or_else(|| "--".to_string());
                writeln!(
                    out,
                    "{:<6} {:<3} {:<9}",
                    entry.filename, entry.extension, creation_date
                )
                .map_err(FsError::Io)?;
            }
        }
        Ok(())
    }

    fn examine(
        &mut self,
        arg: Option<&str>,
        _options: &ExamineOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        if let Some(arg) = arg {
            return self.dump(Some(arg), None, None, out);
        }
        writeln!(
            out,
            "Num    Filename    Type     Rec  Seq Cont        Date     Size"
        )
        .map_err(FsError::Io)?;
        writeln!(
            out,
            "---    --------    ----     ---  --- ----        ----     ----"
        )
        .map_err(FsError::Io)?;
        for entry in self.read_file_headers(true)? {
            let file_type = file_type_name(entry.record_type)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("{:>4o}", entry.record_type));
            writeln!(
                out,
                "{:<4} {:>6}.{:<3}  {:>6}  {:>6} {:>4} {:>4}  {} {:>8}",
                entry.file_number,
                entry.filename,
                entry.extension,
                file_type,
                entry.record_length,
                entry.sequence,
                entry.continued,
                entry
                    .creation_date()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "          ".to_string()),
                entry.size
            )
            .map_err(FsError::Io)?;
        }
        Ok(())
    }

    fn file_types(&self) -> Vec<String> {
        STANDARD_FILE_TYPES
            .iter()
            .map(|&(_, name)| name.to_string())
            .collect()
    }

    fn flush(&mut self) -> Result<()> {
        self.tape.flush().map_err(FsError::from)
    }

    fn close(&mut self) -> Result<()> {
        self.tape.close().map_err(FsError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of, size_of};
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<RawCaps11Header>(), HEADER_RECORD_SIZE);
    const_assert_eq!(align_of::<RawCaps11Header>(), 1);

    const_assert_eq!(offset_of!(RawCaps11Header, filename), 0);
    const_assert_eq!(offset_of!(RawCaps11Header, extension), 6);
    const_assert_eq!(offset_of!(RawCaps11Header, record_type), 9);
    const_assert_eq!(offset_of!(RawCaps11Header, record_length), 10);
    const_assert_eq!(offset_of!(RawCaps11Header, sequence), 12);
    const_assert_eq!(offset_of!(RawCaps11Header, continued), 13);
    const_assert_eq!(offset_of!(RawCaps11Header, date), 14);
    const_assert_eq!(offset_of!(RawCaps11Header, version), 20);
    const_assert_eq!(offset_of!(RawCaps11Header, unused), 21);

    fn new_fs() -> Caps11Fs {
        let mut fs = Caps11Fs::mount(ByteFile::from_vec(Vec::new())).unwrap();
        fs.initialize().unwrap();
        fs
    }

    #[test]
    fn test_write_read_roundtrip() {
        let mut fs = new_fs();
        let content: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        fs.write_bytes("PROG.BIN", &content, None, None, None).unwrap();
        let data = fs.read_bytes("PROG.BIN", None).unwrap();
        assert_eq!(&data[..content.len()], &content[..]);
        // Rounded up to whole 128-byte records.
        assert_eq!(data.len(), 512);
    }

    #[test]
    fn test_sentinel_terminates_tape() {
        let mut fs = new_fs();
        fs.write_bytes("A.BIN", &[7u8; 128], None, None, None).unwrap();
        let image = fs.tape.into_file().into_vec();
        // The tape ends with the sentinel record: 32 zero bytes framed by
        // its record length.
        let tail = &image[image.len() - 40..];
        assert_eq!(&tail[0..4], &[32, 0, 0, 0]);
        assert_eq!(&tail[4..36], &[0u8; 32]);
        assert_eq!(&tail[36..40], &[32, 0, 0, 0]);
    }

    #[test]
    fn test_multiple_files_and_delete() {
        let mut fs = new_fs();
        fs.write_bytes("A.BIN", &[1u8; 10], None, None, None).unwrap();
        fs.write_bytes("B.BIN", &[2u8; 10], None, None, None).unwrap();
        fs.write_bytes("C.BIN", &[3u8; 10], None, None, None).unwrap();
        assert_eq!(fs.entries().unwrap().len(), 3);
        fs.delete("B.BIN").unwrap();
        let entries = fs.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(&fs.read_bytes("C.BIN", None).unwrap()[..1], &[3u8]);
    }

    #[test]
    fn test_file_type_tag() {
        let mut fs = new_fs();
        fs.write_bytes("A.SRC", &[b'x'; 10], None, Some("ASCII"), None)
            .unwrap();
        let entry = fs.entry("A.SRC").unwrap();
        assert_eq!(entry.file_type.as_deref(), Some("ASCII"));
        assert!(fs.file_types().contains(&"BOOT".to_string()));
    }
}
