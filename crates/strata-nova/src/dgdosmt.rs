//! Data General DOS/RDOS magtape driver (read-only).
//!
//! Tapes use a fixed block of 257 16-bit words: 255 words of data and two
//! copies of the file number, which must agree. Files are the tape
//! segments between marks and are addressed by their file number.

use std::io::{ErrorKind, Write};

use chrono::NaiveDate;
use strata_common::{FileMode, filename_match};
use strata_core::{
    DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result,
};
use strata_io::{ByteFile, TapeStream};

pub const DATA_WORDS: usize = 255;
pub const DATA_BLOCK_SIZE: usize = DATA_WORDS * 2;
const FILE_NUMBER_SIZE: usize = 4;
pub const TAPE_BLOCK_SIZE: usize = DATA_BLOCK_SIZE + FILE_NUMBER_SIZE;
/// A dump archive stored on tape starts with a dump name block.
const DUMP_NAME_BLOCK_ID: u8 = 0o377;

/// The two trailing file-number words of a tape block, which must match.
fn get_file_number(buffer: &[u8]) -> Result<u16> {
    if buffer.len() != TAPE_BLOCK_SIZE {
        return Err(FsError::corrupt(format!(
            "invalid block size {}",
            buffer.len()
        )));
    }
    let tail = &buffer[buffer.len() - FILE_NUMBER_SIZE..];
    let file_number1 = u16::from_be_bytes([tail[0], tail[1]]);
    let file_number2 = u16::from_be_bytes([tail[2], tail[3]]);
    if file_number1 != file_number2 {
        return Err(FsError::corrupt(format!(
            "invalid file number: {} != {}",
            file_number1, file_number2
        )));
    }
    Ok(file_number1)
}

/// A file on tape: one tape segment.
#[derive(Debug, Clone)]
pub struct DgdosMtEntry {
    pub file_number: u16,
    /// Length in tape blocks.
    pub length: u64,
    pub tape_pos: u64,
    /// True when the segment carries a DUMP archive.
    pub is_dump: bool,
}

impl DgdosMtEntry {
    pub fn basename(&self) -> String {
        self.file_number.to_string()
    }

    pub fn file_type(&self) -> &'static str {
        if self.is_dump { "dump" } else { "raw" }
    }

    pub fn size(&self) -> u64 {
        self.length * DATA_BLOCK_SIZE as u64
    }

    fn to_file_entry(&self) -> FileEntry {
        let mut entry = FileEntry::new(self.basename())
            .with_blocks(self.length, DATA_BLOCK_SIZE)
            .with_type(self.file_type());
        entry.read_only = true;
        entry
    }
}

/// DG DOS/RDOS magtape filesystem over a SIMH tape stream.
pub struct DgdosMagTapeFs {
    tape: TapeStream,
}

impl DgdosMagTapeFs {
    pub fn mount(file: ByteFile) -> Result<Self> {
        Self::mount_strict(file, true)
    }

    pub fn mount_strict(file: ByteFile, strict: bool) -> Result<Self> {
        let mut fs = Self {
            tape: TapeStream::new(file),
        };
        if strict {
            fs.validate()?;
        }
        Ok(fs)
    }

    /// Check that every block of every file carries a consistent file
    /// number.
    fn validate(&mut self) -> Result<()> {
        self.tape.rewind()?;
        loop {
            let buffer = match self.tape.read_forward() {
                Ok(buffer) => buffer,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if buffer.is_empty() {
                continue;
            }
            let file_number = get_file_number(&buffer)?;
            loop {
                let buffer = match self.tape.read_forward() {
                    Ok(buffer) => buffer,
                    Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                if buffer.is_empty() {
                    break;
                }
                let tmp = get_file_number(&buffer)?;
                if tmp != file_number {
                    return Err(FsError::corrupt(format!(
                        "invalid file number: {} != {}",
                        tmp, file_number
                    )));
                }
            }
        }
    }

    fn read_dir_entries(&mut self) -> Result<Vec<DgdosMtEntry>> {
        let mut entries = Vec::new();
        self.tape.rewind()?;
        loop {
            let tape_pos = self.tape.pos()?;
            match self.tape.read_header() {
                Ok((header, size)) => {
                    if header.is_empty() {
                        break;
                    }
                    entries.push(DgdosMtEntry {
                        file_number: *header.last().unwrap_or(&0) as u16,
                        length: (header.len() as u64 + size) / TAPE_BLOCK_SIZE as u64,
                        tape_pos,
                        is_dump: header.first() == Some(&DUMP_NAME_BLOCK_ID),
                    });
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(entries)
    }

    fn locate(&mut self, path: &str) -> Result<DgdosMtEntry> {
        self.read_dir_entries()?
            .into_iter()
            .find(|e| e.basename() == path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn read_entry_bytes(&mut self, entry: &DgdosMtEntry) -> Result<Vec<u8>> {
        self.tape.seek(entry.tape_pos)?;
        let mut data = Vec::with_capacity(entry.length as usize * DATA_BLOCK_SIZE);
        loop {
            let buffer = self.tape.read_forward().map_err(FsError::from)?;
            if buffer.is_empty() {
                break;
            }
            if buffer.len() != TAPE_BLOCK_SIZE {
                return Err(FsError::corrupt(format!(
                    "invalid block size {}",
                    buffer.len()
                )));
            }
            data.extend_from_slice(&buffer[..DATA_BLOCK_SIZE]);
        }
        Ok(data)
    }

    /// Write a fresh tape: logical end of tape (two marks).
    pub fn initialize(&mut self) -> Result<()> {
        if self.tape.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        self.tape.rewind()?;
        self.tape.write_mark()?;
        self.tape.write_mark()?;
        self.tape.truncate_here()?;
        Ok(())
    }
}

impl Filesystem for DgdosMagTapeFs {
    fn fs_name(&self) -> &'static str {
        "dgdosmt"
    }

    fn fs_description(&self) -> &'static str {
        "Data General DOS/RDOS Magtape"
    }

    fn size(&mut self) -> Result<u64> {
        self.tape.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        Ok(self
            .read_dir_entries()?
            .iter()
            .map(DgdosMtEntry::to_file_entry)
            .collect())
    }

    fn filter_entries(
        &mut self,
        pattern: Option<&str>,
        _include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<FileEntry>> {
        Ok(self
            .read_dir_entries()?
            .iter()
            .filter(|e| filename_match(&e.basename(), pattern, wildcard))
            .map(DgdosMtEntry::to_file_entry)
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

    fn dir(
        &mut self,
        _volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        if !options.brief {
            writeln!(out, "Num Type         Size").map_err(FsError::Io)?;
            writeln!(out, "--- ----         ----").map_err(FsError::Io)?;
        }
        for entry in self.read_dir_entries()? {
            if !filename_match(&entry.basename(), pattern, true) {
                continue;
            }
            if options.brief {
                writeln!(out, "{:>3}", entry.basename()).map_err(FsError::Io)?;
            } else {
                writeln!(
                    out,
                    "{:>3} {:<4} {:>12}",
                    entry.basename(),
                    entry.file_type(),
                    entry.size()
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
        writeln!(out, "Num Type   Tape pos         Size").map_err(FsError::Io)?;
        writeln!(out, "--- ----   --------         ----").map_err(FsError::Io)?;
        for entry in self.read_dir_entries()? {
            writeln!(
                out,
                "{:>3} {:<4} {:>10} {:>12}",
                entry.file_number,
                entry.file_type(),
                entry.tape_pos,
                entry.size()
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

    /// Build a tape with two files of one block each.
    fn build_tape() -> ByteFile {
        let mut tape = TapeStream::new(ByteFile::from_vec(Vec::new()));
        for file_number in [0u16, 1] {
            let mut block = vec![0u8; TAPE_BLOCK_SIZE];
            block[0] = 0x41 + file_number as u8;
            let tail = TAPE_BLOCK_SIZE - FILE_NUMBER_SIZE;
            block[tail..tail + 2].copy_from_slice(&file_number.to_be_bytes());
            block[tail + 2..tail + 4].copy_from_slice(&file_number.to_be_bytes());
            tape.write_forward(&block).unwrap();
            tape.write_mark().unwrap();
        }
        tape.write_mark().unwrap();
        tape.into_file()
    }

    #[test]
    fn test_mount_validates_file_numbers() {
        assert!(DgdosMagTapeFs::mount(build_tape()).is_ok());
        // Corrupt one of the trailing file number words of the last
        // block (mark + trailing length + mark follow it).
        let mut image = build_tape().into_vec();
        let len = image.len();
        image[len - 14] = 0xFF;
        let err = DgdosMagTapeFs::mount(ByteFile::from_vec(image));
        assert!(err.is_err());
    }

    #[test]
    fn test_list_and_read() {
        let mut fs = DgdosMagTapeFs::mount(build_tape()).unwrap();
        let entries = fs.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].fullname, "0");
        assert_eq!(entries[1].fullname, "1");
        let data = fs.read_bytes("1", None).unwrap();
        assert_eq!(data.len(), DATA_BLOCK_SIZE);
        assert_eq!(data[0], 0x42);
    }

    #[test]
    fn test_writes_rejected() {
        let mut fs = DgdosMagTapeFs::mount(build_tape()).unwrap();
        assert!(matches!(
            fs.write_bytes("2", b"x", None, None, None),
            Err(FsError::ReadOnlyFs)
        ));
    }
}
