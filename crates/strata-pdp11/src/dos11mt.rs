//! DOS-11 MagTape driver.
//!
//! Each file on tape is a 14-byte RAD50 header record followed by 512-byte
//! data records and a tape mark; two marks end the tape. Writing appends
//! after the last file: the tape is truncated at the logical end and the
//! new header, data and marks are written in place of the second mark.

use std::io::{ErrorKind, Write};

use chrono::NaiveDate;
use strata_common::dates::{date_to_dos11, dos11_to_date};
use strata_common::enc::rad50::{asc_to_rad50_word, rad50_word_to_asc};
use strata_common::{FileMode, filename_match, word_to_bytes, bytes_to_word};
use strata_core::{
    DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result, Uic,
};
use strata_io::{BLOCK_SIZE, ByteFile, TapeStream};

use crate::rt11::rt11_canonical_filename;

const HEADER_RECORD_SIZE: usize = 14;
const RECORD_SIZE: usize = 512;
/// Default DOS-11 protection code for new files.
const DEFAULT_PROTECTION_CODE: u16 = 0o233;

/// A file header on tape, plus the tape position it was read from.
#[derive(Debug, Clone)]
pub struct Dos11MtEntry {
    pub uic: Uic,
    pub filename: String,
    pub extension: String,
    pub raw_creation_date: u16,
    pub protection_code: u16,
    /// Data size in bytes (without the header record).
    pub size: u64,
    /// Tape position of the header record.
    pub tape_pos: u64,
}

impl Dos11MtEntry {
    fn read(buffer: &[u8], tape_pos: u64, size: u64) -> Self {
        let word = |i: usize| bytes_to_word(buffer, i * 2);
        Self {
            filename: rad50_word_to_asc(word(0))
                + &rad50_word_to_asc(word(1))
                + &rad50_word_to_asc(word(6)),
            extension: rad50_word_to_asc(word(2)),
            uic: Uic::from_word(word(3)),
            protection_code: word(4),
            raw_creation_date: word(5),
            size,
            tape_pos,
        }
    }

    fn to_header(&self) -> [u8; HEADER_RECORD_SIZE] {
        let mut buffer = [0u8; HEADER_RECORD_SIZE];
        let words = [
            asc_to_rad50_word(&self.filename[..self.filename.len().min(3)]),
            asc_to_rad50_word(
                &self.filename[self.filename.len().min(3)..self.filename.len().min(6)],
            ),
            asc_to_rad50_word(&self.extension),
            self.uic.to_word(),
            self.protection_code,
            self.raw_creation_date,
            asc_to_rad50_word(
                &self.filename[self.filename.len().min(6)..self.filename.len().min(9)],
            ),
        ];
        for (i, word) in words.iter().enumerate() {
            buffer[i * 2..i * 2 + 2].copy_from_slice(&word_to_bytes(*word));
        }
        buffer
    }

    pub fn is_empty(&self) -> bool {
        self.filename.is_empty() && self.extension.is_empty()
    }

    /// Length in blocks.
    pub fn length(&self) -> u64 {
        self.size.div_ceil(BLOCK_SIZE as u64)
    }

    pub fn basename(&self) -> String {
        format!("{}.{}", self.filename, self.extension)
    }

    pub fn fullname(&self) -> String {
        format!("{}{}", self.uic, self.basename())
    }

    pub fn creation_date(&self) -> Option<NaiveDate> {
        dos11_to_date(self.raw_creation_date)
    }

    fn to_file_entry(&self) -> FileEntry {
        let mut entry = FileEntry::new(self.fullname())
            .with_blocks(self.length(), BLOCK_SIZE)
            .with_size(self.size)
            .with_date(self.creation_date());
        entry.basename = self.basename();
        entry
    }
}

/// DOS-11 MagTape filesystem over a SIMH tape stream.
pub struct Dos11MagTapeFs {
    tape: TapeStream,
    /// Current User Identification Code.
    pub uic: Uic,
}

/// Split `[g,u]name` into its UIC filter and basename. `[*,*]` (or any
/// prefix containing `*`) matches every UIC.
fn split_fullname(
    pattern: Option<&str>,
    wildcard: bool,
    current: Uic,
) -> (Option<Uic>, Option<String>) {
    match pattern {
        None => (Some(current), None),
        Some(pattern) => {
            let (prefix, rest) = Uic::split_path(pattern);
            let uic = match prefix {
                Some(p) if p.contains('*') => None,
                Some(p) => Uic::parse(p).ok().or(Some(current)),
                None => Some(current),
            };
            let name = if rest.is_empty() {
                None
            } else {
                Some(rt11_canonical_filename(rest, wildcard))
            };
            (uic, name)
        }
    }
}

impl Dos11MagTapeFs {
    pub fn mount(file: ByteFile) -> Result<Self> {
        Ok(Self {
            tape: TapeStream::new(file),
            uic: Uic::new(0o1, 0o1),
        })
    }

    /// Scan the whole tape for file headers.
    fn read_file_headers(&mut self, uic: Option<Uic>) -> Result<Vec<Dos11MtEntry>> {
        let mut entries = Vec::new();
        self.tape.rewind()?;
        loop {
            let tape_pos = self.tape.pos()?;
            match self.tape.read_header() {
                Ok((header, size)) => {
                    if header.len() >= HEADER_RECORD_SIZE {
                        let entry = Dos11MtEntry::read(&header, tape_pos, size);
                        if uic.is_none_or(|u| u == entry.uic) {
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

    /// Tape position of the logical end of tape (just before the final
    /// mark), where a new file may be appended.
    fn end_of_tape(&mut self) -> Result<u64> {
        self.read_file_headers(None)?;
        Ok(self.tape.pos()?.saturating_sub(4))
    }

    fn internal_filter(
        &mut self,
        pattern: Option<&str>,
        include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<Dos11MtEntry>> {
        let (uic, name) = split_fullname(pattern, wildcard, self.uic);
        Ok(self
            .read_file_headers(uic)?
            .into_iter()
            .filter(|e| filename_match(&e.basename(), name.as_deref(), wildcard))
            .filter(|e| include_all || !e.is_empty())
            .collect())
    }

    fn locate(&mut self, path: &str) -> Result<Dos11MtEntry> {
        self.internal_filter(Some(path), false, false)?
            .into_iter()
            .next()
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn read_entry_bytes(&mut self, entry: &Dos11MtEntry) -> Result<Vec<u8>> {
        self.tape.seek(entry.tape_pos)?;
        let data = self.tape.read_file()?;
        Ok(data[HEADER_RECORD_SIZE.min(data.len())..].to_vec())
    }

    /// Blank a header in place, which is how a tape file is deleted.
    fn delete_entry(&mut self, entry: &Dos11MtEntry) -> Result<()> {
        let blank = Dos11MtEntry {
            uic: Uic::new(0o1, 0o1),
            filename: String::new(),
            extension: String::new(),
            raw_creation_date: 0,
            protection_code: 0,
            size: entry.size,
            tape_pos: entry.tape_pos,
        };
        self.tape.seek(entry.tape_pos)?;
        self.tape.write_forward(&blank.to_header())?;
        Ok(())
    }

    fn create_with_content(
        &mut self,
        path: &str,
        length: u64,
        creation_date: Option<NaiveDate>,
        content: Option<&[u8]>,
    ) -> Result<Dos11MtEntry> {
        if self.tape.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let (uic, basename) = split_fullname(Some(path), false, self.uic);
        let basename = basename.ok_or_else(|| {
            FsError::InvalidArg(format!("invalid filename: {}", path))
        })?;
        let uic = uic.unwrap_or(self.uic);
        if let Ok(old) = self.locate(path) {
            self.delete_entry(&old)?;
        }
        let tape_pos = self.end_of_tape()?;
        self.tape.seek(tape_pos)?;
        self.tape.truncate_here()?;

        let (filename, extension) = basename
            .split_once('.')
            .map(|(n, e)| (n.to_string(), e.to_string()))
            .ok_or_else(|| FsError::InvalidArg(format!("invalid filename: {}", path)))?;
        let entry = Dos11MtEntry {
            uic,
            filename,
            extension,
            raw_creation_date: date_to_dos11(creation_date),
            protection_code: DEFAULT_PROTECTION_CODE,
            size: length * RECORD_SIZE as u64,
            tape_pos,
        };
        self.tape.write_forward(&entry.to_header())?;
        let empty_record = [0u8; RECORD_SIZE];
        for i in 0..length as usize {
            match content {
                Some(content) => {
                    let mut record = [0u8; RECORD_SIZE];
                    let from = i * RECORD_SIZE;
                    let to = ((i + 1) * RECORD_SIZE).min(content.len());
                    if from < content.len() {
                        record[..to - from].copy_from_slice(&content[from..to]);
                    }
                    self.tape.write_forward(&record)?;
                }
                None => self.tape.write_forward(&empty_record)?,
            }
        }
        self.tape.write_mark()?;
        self.tape.write_mark()?;
        self.tape.truncate_here()?;
        Ok(entry)
    }

    /// Write a fresh empty tape: a single mark.
    pub fn initialize(&mut self) -> Result<()> {
        self.tape.rewind()?;
        self.tape.write_mark()?;
        self.tape.truncate_here()?;
        Ok(())
    }
}

impl Filesystem for Dos11MagTapeFs {
    fn fs_name(&self) -> &'static str {
        "dos11mt"
    }

    fn fs_description(&self) -> &'static str {
        "PDP-11 DOS-11 MagTape"
    }

    fn size(&mut self) -> Result<u64> {
        self.tape.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        let uic = self.uic;
        Ok(self
            .read_file_headers(Some(uic))?
            .iter()
            .filter(|e| !e.is_empty())
            .map(Dos11MtEntry::to_file_entry)
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
            .map(Dos11MtEntry::to_file_entry)
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
        _file_type: Option<&str>,
        _mode: Option<FileMode>,
    ) -> Result<()> {
        let length = (data.len() as u64).div_ceil(RECORD_SIZE as u64);
        self.create_with_content(path, length, creation_date, Some(data))?;
        Ok(())
    }

    fn create_file(
        &mut self,
        path: &str,
        blocks: u64,
        creation_date: Option<NaiveDate>,
        _file_type: Option<&str>,
    ) -> Result<FileEntry> {
        self.create_with_content(path, blocks, creation_date, None)
            .map(|e| e.to_file_entry())
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if self.tape.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let entry = self.locate(path)?;
        self.delete_entry(&entry)
    }

    fn chdir(&mut self, path: &str) -> bool {
        match Uic::parse(path) {
            Ok(uic) => {
                self.uic = uic;
                true
            }
            Err(_) => false,
        }
    }

    fn pwd(&self) -> String {
        self.uic.to_string()
    }

    fn dir(
        &mut self,
        volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        if options.uic {
            writeln!(out, "{}:\n", volume_id).map_err(FsError::Io)?;
            let mut uics: Vec<Uic> = self
                .read_file_headers(None)?
                .iter()
                .filter(|e| !e.is_empty())
                .map(|e| e.uic)
                .collect();
            uics.sort();
            uics.dedup();
            for uic in uics {
                writeln!(out, "{}", uic.to_wide_string()).map_err(FsError::Io)?;
            }
            return Ok(());
        }
        let (uic, name) = split_fullname(pattern, true, self.uic);
        if !options.brief {
            writeln!(
                out,
                "DIRECTORY {}: {}\n",
                volume_id,
                uic.map(|u| u.to_string()).unwrap_or_else(|| "[*,*]".to_string())
            )
            .map_err(FsError::Io)?;
        }
        let mut files = 0u64;
        let mut blocks = 0u64;
        for entry in self.read_file_headers(uic)? {
            if entry.is_empty() || !filename_match(&entry.basename(), name.as_deref(), true) {
                continue;
            }
            let fullname = format!("{:<6}.{:<3}", entry.filename, entry.extension);
            if options.brief {
                writeln!(out, "{}", fullname).map_err(FsError::Io)?;
                continue;
            }
            let creation_date = entry
                .creation_date()
                .map(|d| d.format("%d-%b-%y").to_string().to_uppercase())
                .unwrap_or_default();
            let uic_str = if uic.is_none() {
                entry.uic.to_wide_string()
            } else {
                String::new()
            };
            writeln!(
                out,
                "{:>10} {:5}  {:>9} <{:03o}> {}",
                fullname,
                entry.length(),
                creation_date,
                entry.protection_code,
                uic_str
            )
            .map_err(FsError::Io)?;
            blocks += entry.length();
            files += 1;
        }
        if options.brief {
            return Ok(());
        }
        writeln!(out).map_err(FsError::Io)?;
        writeln!(out, "TOTL BLKS: {:5}", blocks).map_err(FsError::Io)?;
        writeln!(out, "TOTL FILES: {:4}", files).map_err(FsError::Io)?;
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
        for entry in self.read_file_headers(None)? {
            writeln!(
                out,
                "{:>9}.{:<3} {:<9}  <{:o}> {} {:>6}",
                entry.filename,
                entry.extension,
                entry.uic.to_wide_string(),
                entry.protection_code,
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

    fn new_fs() -> Dos11MagTapeFs {
        let mut fs = Dos11MagTapeFs::mount(ByteFile::from_vec(Vec::new())).unwrap();
        fs.initialize().unwrap();
        fs
    }

    #[test]
    fn test_write_and_read_back() {
        let mut fs = new_fs();
        let content = b"hello magtape world".repeat(40);
        fs.write_bytes("HELLO.TXT", &content, None, None, None)
            .unwrap();
        let data = fs.read_bytes("HELLO.TXT", None).unwrap();
        assert_eq!(&data[..content.len()], &content[..]);
        let entry = fs.entry("HELLO.TXT").unwrap();
        assert_eq!(entry.blocks, 2);
    }

    #[test]
    fn test_append_keeps_existing_files() {
        let mut fs = new_fs();
        fs.write_bytes("A.DAT", &[1u8; 100], None, None, None).unwrap();
        fs.write_bytes("B.DAT", &[2u8; 100], None, None, None).unwrap();
        let entries = fs.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(&fs.read_bytes("A.DAT", None).unwrap()[..4], &[1, 1, 1, 1]);
        assert_eq!(&fs.read_bytes("B.DAT", None).unwrap()[..4], &[2, 2, 2, 2]);
    }

    #[test]
    fn test_delete_blanks_header() {
        let mut fs = new_fs();
        fs.write_bytes("A.DAT", &[1u8; 100], None, None, None).unwrap();
        fs.write_bytes("B.DAT", &[2u8; 100], None, None, None).unwrap();
        fs.delete("A.DAT").unwrap();
        assert!(matches!(fs.entry("A.DAT"), Err(FsError::NotFound(_))));
        // B is still there.
        assert_eq!(&fs.read_bytes("B.DAT", None).unwrap()[..4], &[2, 2, 2, 2]);
    }

    #[test]
    fn test_ends_with_two_marks() {
        let mut fs = new_fs();
        fs.write_bytes("A.DAT", &[1u8; 10], None, None, None).unwrap();
        let image = fs.tape.into_file().into_vec();
        assert_eq!(&image[image.len() - 8..], &[0u8; 8]);
    }
}
