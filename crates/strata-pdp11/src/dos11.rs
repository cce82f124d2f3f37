//! DOS-11 / XXDP+ filesystem driver (read-only).
//!
//! Block 1 selects the MFD variety: a non-zero first word is the DOS-11
//! form (a chain of MFD blocks of UIC entries), zero is the XXDP+ form
//! with a single implied UFD. Each UFD block carries up to 28 entries.
//! Contiguous files are plain block runs; linked files chain through a
//! next-block word at the start of every block, leaving 510 data bytes.

use std::collections::HashSet;
use std::io::Write;

use bytemuck::{Pod, Zeroable};
use chrono::NaiveDate;
use strata_common::dates::dos11_to_date;
use strata_common::enc::rad50::rad2asc;
use strata_common::{FileMode, bytes_to_word, filename_match};
use strata_core::{
    DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result, Uic,
};
use strata_io::{BLOCK_SIZE, BlockDevice, ByteFile};

use crate::rt11::rt11_canonical_filename;

const MFD_BLOCK: u64 = 1;
const UFD_ENTRIES: usize = 28;
const MFD_ENTRY_SIZE: usize = 8;
const UFD_ENTRY_SIZE: usize = 18;
/// High bit of the date word flags a contiguous file.
const CONTIGUOUS_FILE_TYPE: u16 = 0o100000;
/// Data bytes per block of a linked file.
pub const LINKED_FILE_BLOCK_SIZE: usize = 510;

/// On-disk shape of a UFD entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawUfdEntry {
    /// Filename, chars 1-3 (RAD50).
    pub name1: [u8; 2],
    /// Filename, chars 4-6 (RAD50).
    pub name2: [u8; 2],
    /// Extension (RAD50).
    pub ext: [u8; 2],
    /// Packed creation date; the high bit flags a contiguous file.
    pub date: [u8; 2],
    /// Next free byte in the last block.
    pub next_free_byte: [u8; 2],
    /// Block number of the first logical block.
    pub start_block: [u8; 2],
    /// Length in blocks.
    pub length: [u8; 2],
    /// Last block written.
    pub last_block: [u8; 2],
    /// Lock, usage count and protection code.
    pub protection: [u8; 2],
}

/// One UFD directory entry.
#[derive(Debug, Clone)]
pub struct Dos11Entry {
    pub uic: Uic,
    pub filename: String,
    pub filetype: String,
    pub raw_creation_date: u16,
    pub contiguous: bool,
    /// First block of the file.
    pub file_position: u64,
    /// Length in blocks.
    pub length: u64,
    /// Lock, usage count and protection code.
    pub protection_code: u16,
}

impl Dos11Entry {
    fn read(buffer: &[u8], position: usize, uic: Uic) -> Self {
        let raw: &RawUfdEntry =
            bytemuck::from_bytes(&buffer[position..position + UFD_ENTRY_SIZE]);
        let mut raw_creation_date = u16::from_le_bytes(raw.date);
        let contiguous = raw_creation_date & CONTIGUOUS_FILE_TYPE != 0;
        raw_creation_date &= !CONTIGUOUS_FILE_TYPE;
        Self {
            uic,
            filename: rad2asc(&raw.name1, 0) + &rad2asc(&raw.name2, 0),
            filetype: rad2asc(&raw.ext, 0),
            raw_creation_date,
            contiguous,
            file_position: u16::from_le_bytes(raw.start_block) as u64,
            length: u16::from_le_bytes(raw.length) as u64,
            protection_code: u16::from_le_bytes(raw.protection),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filename.is_empty() && self.filetype.is_empty()
    }

    pub fn basename(&self) -> String {
        format!("{}.{}", self.filename, self.filetype)
    }

    pub fn fullname(&self) -> String {
        format!("{}{}", self.uic, self.basename())
    }

    pub fn creation_date(&self) -> Option<NaiveDate> {
        dos11_to_date(self.raw_creation_date)
    }

    fn to_file_entry(&self) -> FileEntry {
        let block_size = if self.contiguous {
            BLOCK_SIZE
        } else {
            LINKED_FILE_BLOCK_SIZE
        };
        let mut entry = FileEntry::new(self.fullname())
            .with_blocks(self.length, block_size)
            .with_date(self.creation_date());
        entry.basename = self.basename();
        entry.read_only = true;
        entry.file_type = Some(if self.contiguous { "C" } else { "L" }.to_string());
        entry
    }
}

/// A User File Directory block: a next-block link and up to 28 entries.
#[derive(Debug, Clone)]
pub struct UfdBlock {
    pub block_number: u64,
    pub next_block_number: u64,
    pub uic: Uic,
    pub entries: Vec<Dos11Entry>,
}

impl UfdBlock {
    fn from_bytes(block_number: u64, buffer: &[u8], uic: Uic) -> Self {
        let next_block_number = bytes_to_word(buffer, 0) as u64;
        let mut entries = Vec::with_capacity(UFD_ENTRIES);
        let mut position = 2;
        while position < UFD_ENTRIES * UFD_ENTRY_SIZE {
            entries.push(Dos11Entry::read(buffer, position, uic));
            position += UFD_ENTRY_SIZE;
        }
        Self {
            block_number,
            next_block_number,
            uic,
            entries,
        }
    }
}

#[derive(Debug, Clone)]
struct MfdEntry {
    uic: Uic,
    ufd_block: u64,
    #[allow(dead_code)]
    num_words: u16,
}

/// DOS-11 / XXDP+ filesystem over a block device.
pub struct Dos11Fs {
    dev: BlockDevice,
    /// Current User Identification Code.
    pub uic: Uic,
}

impl Dos11Fs {
    pub fn mount(file: ByteFile) -> Result<Self> {
        let dev = BlockDevice::new(file)?;
        let mut fs = Self {
            dev,
            uic: Uic::new(0o1, 0o1),
        };
        // Probe the MFD so a mount of a non-DOS image fails early.
        fs.read_mfd_entries(None)?;
        Ok(fs)
    }

    pub fn read_block(&mut self, block_number: u64, count: usize) -> Result<Vec<u8>> {
        self.dev.read_block(block_number, count).map_err(FsError::from)
    }

    /// Read the master file directory, optionally filtered by UIC.
    fn read_mfd_entries(&mut self, uic: Option<Uic>) -> Result<Vec<MfdEntry>> {
        let t = self.read_block(MFD_BLOCK, 1)?;
        let mfd2 = bytes_to_word(&t, 0);
        let mut entries = Vec::new();
        if mfd2 != 0 {
            // MFD variety #1 (DOS-11)
            let t = self.read_block(mfd2 as u64, 1)?;
            for position in (0..BLOCK_SIZE - MFD_ENTRY_SIZE).step_by(MFD_ENTRY_SIZE) {
                let entry = MfdEntry {
                    uic: Uic::from_word(bytes_to_word(&t, position + 2)),
                    ufd_block: bytes_to_word(&t, position + 4) as u64,
                    num_words: bytes_to_word(&t, position + 6),
                };
                if entry.ufd_block != 0 && uic.is_none_or(|u| u == entry.uic) {
                    entries.push(entry);
                }
            }
        } else {
            // MFD variety #2 (XXDP+)
            entries.push(MfdEntry {
                uic: self.uic,
                ufd_block: bytes_to_word(&t, 2) as u64,
                num_words: 0,
            });
        }
        Ok(entries)
    }

    fn read_ufd_blocks(&mut self, mfd: &MfdEntry) -> Result<Vec<UfdBlock>> {
        let mut blocks = Vec::new();
        let mut visited = HashSet::new();
        let mut next_block_number = mfd.ufd_block;
        while next_block_number != 0 {
            if !visited.insert(next_block_number) {
                return Err(FsError::corrupt(format!(
                    "UFD chain loops at block {}",
                    next_block_number
                )));
            }
            let buffer = self.read_block(next_block_number, 1)?;
            let block = UfdBlock::from_bytes(next_block_number, &buffer, mfd.uic);
            next_block_number = block.next_block_number;
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Canonical `[g,u]NAME.EXT` form of a path; the UIC part is optional.
    pub fn dos11_canonical_filename(&self, fullname: &str, wildcard: bool) -> String {
        let (uic, rest) = match Uic::split_path(fullname) {
            (Some(prefix), rest) => (Uic::parse(prefix).ok(), rest),
            (None, rest) => (None, rest),
        };
        let name = if rest.is_empty() {
            String::new()
        } else {
            rt11_canonical_filename(rest, wildcard)
        };
        match uic {
            Some(uic) => format!("{}{}", uic, name),
            None => name,
        }
    }

    fn internal_filter(
        &mut self,
        pattern: Option<&str>,
        include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<Dos11Entry>> {
        let mut uic = Some(self.uic);
        let mut name_pattern = None;
        if let Some(pattern) = pattern {
            let (uic_part, rest) = Uic::split_path(pattern);
            if let Some(prefix) = uic_part {
                if prefix.contains('*') {
                    // [*,*] lists every UIC
                    uic = None;
                } else {
                    match Uic::parse(prefix) {
                        Ok(parsed) => uic = Some(parsed),
                        Err(_) => return Ok(Vec::new()),
                    }
                }
            }
            if !rest.is_empty() {
                name_pattern = Some(rt11_canonical_filename(rest, wildcard));
            }
        }
        let mut result = Vec::new();
        for mfd in self.read_mfd_entries(uic)? {
            for ufd_block in self.read_ufd_blocks(&mfd)? {
                for entry in ufd_block.entries {
                    if !filename_match(&entry.basename(), name_pattern.as_deref(), wildcard) {
                        continue;
                    }
                    if !include_all && entry.is_empty() {
                        continue;
                    }
                    result.push(entry);
                }
            }
        }
        Ok(result)
    }

    fn locate(&mut self, fullname: &str) -> Result<Dos11Entry> {
        let canonical = self.dos11_canonical_filename(fullname, false);
        if canonical.is_empty() {
            return Err(FsError::NotFound(fullname.to_string()));
        }
        self.internal_filter(Some(&canonical), false, false)?
            .into_iter()
            .next()
            .ok_or_else(|| FsError::NotFound(fullname.to_string()))
    }

    /// Content of a file: block arithmetic for contiguous files, the
    /// next-block chain for linked files.
    fn read_entry_bytes(&mut self, entry: &Dos11Entry) -> Result<Vec<u8>> {
        if entry.contiguous {
            self.read_block(entry.file_position, entry.length as usize)
        } else {
            let mut data = Vec::with_capacity(entry.length as usize * LINKED_FILE_BLOCK_SIZE);
            let mut visited = HashSet::new();
            let mut next_block_number = entry.file_position;
            let mut remaining = entry.length;
            while next_block_number != 0 && remaining > 0 {
                if !visited.insert(next_block_number) {
                    return Err(FsError::corrupt(format!(
                        "linked file loops at block {}",
                        next_block_number
                    )));
                }
                let t = self.read_block(next_block_number, 1)?;
                next_block_number = bytes_to_word(&t, 0) as u64;
                data.extend_from_slice(&t[2..]);
                remaining -= 1;
            }
            Ok(data)
        }
    }
}

impl Filesystem for Dos11Fs {
    fn fs_name(&self) -> &'static str {
        "dos11"
    }

    fn fs_description(&self) -> &'static str {
        "PDP-11 DOS-11 / XXDP+"
    }

    fn size(&mut self) -> Result<u64> {
        self.dev.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        let uic = self.uic;
        let mut result = Vec::new();
        for mfd in self.read_mfd_entries(Some(uic))? {
            for ufd_block in self.read_ufd_blocks(&mfd)? {
                result.extend(ufd_block.entries.iter().filter(|e| !e.is_empty()).map(
                    Dos11Entry::to_file_entry,
                ));
            }
        }
        Ok(result)
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
            .map(Dos11Entry::to_file_entry)
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
        _volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        let mut i = 0usize;
        let mut files = 0u64;
        let mut blocks = 0u64;
        for entry in self.internal_filter(pattern, true, true)? {
            if entry.is_empty() {
                continue;
            }
            i += 1;
            let fullname = format!("{:<6}.{:<3}", entry.filename, entry.filetype);
            if options.brief {
                writeln!(out, "{}", fullname).map_err(FsError::Io)?;
                continue;
            }
            let date = entry
                .creation_date()
                .map(|d| d.format("%d-%b-%y").to_string())
                .unwrap_or_default();
            let attr = if entry.contiguous { "C" } else { " " };
            write!(
                out,
                "{:>10} {:5}{:1} {:>9}",
                fullname, entry.length, attr, date
            )
            .map_err(FsError::Io)?;
            blocks += entry.length;
            files += 1;
            if i % 2 == 1 {
                write!(out, "    ").map_err(FsError::Io)?;
            } else {
                writeln!(out).map_err(FsError::Io)?;
            }
        }
        if options.brief {
            return Ok(());
        }
        if i % 2 == 1 {
            writeln!(out).map_err(FsError::Io)?;
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
            if arg.chars().all(|c| c.is_ascii_digit()) {
                let block = arg.parse::<u64>().unwrap_or(0);
                return self.dump(None, Some(block), Some(block), out);
            }
            return self.dump(Some(arg), None, None, out);
        }
        for mfd in self.read_mfd_entries(None)? {
            for ufd_block in self.read_ufd_blocks(&mfd)? {
                writeln!(out, "\n*User File Directory Block").map_err(FsError::Io)?;
                writeln!(out, "UIC:                   {}", ufd_block.uic).map_err(FsError::Io)?;
                writeln!(out, "Block number:          {}", ufd_block.block_number)
                    .map_err(FsError::Io)?;
                writeln!(out, "Next dir block:        {}", ufd_block.next_block_number)
                    .map_err(FsError::Io)?;
                writeln!(
                    out,
                    "\nNum  File        UIC        Date       Length  Block   Code\n"
                )
                .map_err(FsError::Io)?;
                for (i, e) in ufd_block.entries.iter().enumerate() {
                    let date = e
                        .creation_date()
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "          ".to_string());
                    writeln!(
                        out,
                        "{:02}#  {:<6}.{:<3}  {:<9}  {} {:>6} {:6} {:>6o}",
                        i,
                        e.filename,
                        e.filetype,
                        e.uic.to_string(),
                        date,
                        e.length,
                        e.file_position,
                        e.protection_code
                    )
                    .map_err(FsError::Io)?;
                }
            }
        }
        Ok(())
    }

    fn read_block(&mut self, block_number: u64, count: usize) -> Result<Vec<u8>> {
        Dos11Fs::read_block(self, block_number, count)
    }

    fn flush(&mut self) -> Result<()> {
        self.dev.flush().map_err(FsError::from)
    }

    fn close(&mut self) -> Result<()> {
        self.dev.close().map_err(FsError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of, size_of};
    use static_assertions::const_assert_eq;
    use strata_common::enc::rad50::asc2rad;
    use strata_common::word_to_bytes;

    const_assert_eq!(size_of::<RawUfdEntry>(), UFD_ENTRY_SIZE);
    const_assert_eq!(align_of::<RawUfdEntry>(), 1);

    const_assert_eq!(offset_of!(RawUfdEntry, name1), 0);
    const_assert_eq!(offset_of!(RawUfdEntry, name2), 2);
    const_assert_eq!(offset_of!(RawUfdEntry, ext), 4);
    const_assert_eq!(offset_of!(RawUfdEntry, date), 6);
    const_assert_eq!(offset_of!(RawUfdEntry, next_free_byte), 8);
    const_assert_eq!(offset_of!(RawUfdEntry, start_block), 10);
    const_assert_eq!(offset_of!(RawUfdEntry, length), 12);
    const_assert_eq!(offset_of!(RawUfdEntry, last_block), 14);
    const_assert_eq!(offset_of!(RawUfdEntry, protection), 16);

    /// Build a small DOS-11 (variety 1) image:
    /// MFD1 at 1, MFD2 at 2, UFD for [100,100] at 3, data from 10.
    fn build_image() -> ByteFile {
        let mut image = vec![0u8; 64 * BLOCK_SIZE];
        let uic = Uic::new(0o100, 0o100);
        image[1 * BLOCK_SIZE..1 * BLOCK_SIZE + 2].copy_from_slice(&word_to_bytes(2));
        // MFD2: one entry
        let mfd2 = 2 * BLOCK_SIZE;
        image[mfd2..mfd2 + 2].copy_from_slice(&word_to_bytes(0));
        image[mfd2 + 2..mfd2 + 4].copy_from_slice(&word_to_bytes(uic.to_word()));
        image[mfd2 + 4..mfd2 + 6].copy_from_slice(&word_to_bytes(3)); // UFD block
        image[mfd2 + 6..mfd2 + 8].copy_from_slice(&word_to_bytes(9));
        // UFD block 3: CONTIG.TXT (contiguous, blocks 10-11), LINKED.DAT
        // (linked from block 12)
        let ufd = 3 * BLOCK_SIZE;
        image[ufd..ufd + 2].copy_from_slice(&word_to_bytes(0));
        let e0 = ufd + 2;
        image[e0..e0 + 2].copy_from_slice(&asc2rad("CON"));
        image[e0 + 2..e0 + 4].copy_from_slice(&asc2rad("TIG"));
        image[e0 + 4..e0 + 6].copy_from_slice(&asc2rad("TXT"));
        image[e0 + 6..e0 + 8].copy_from_slice(&word_to_bytes(CONTIGUOUS_FILE_TYPE | 5075));
        image[e0 + 10..e0 + 12].copy_from_slice(&word_to_bytes(10));
        image[e0 + 12..e0 + 14].copy_from_slice(&word_to_bytes(2));
        let e1 = ufd + 2 + UFD_ENTRY_SIZE;
        image[e1..e1 + 2].copy_from_slice(&asc2rad("LIN"));
        image[e1 + 2..e1 + 4].copy_from_slice(&asc2rad("KED"));
        image[e1 + 4..e1 + 6].copy_from_slice(&asc2rad("DAT"));
        image[e1 + 6..e1 + 8].copy_from_slice(&word_to_bytes(5075));
        image[e1 + 10..e1 + 12].copy_from_slice(&word_to_bytes(12));
        image[e1 + 12..e1 + 14].copy_from_slice(&word_to_bytes(2));
        // Contiguous data
        image[10 * BLOCK_SIZE..10 * BLOCK_SIZE + 4].copy_from_slice(b"AAAA");
        image[11 * BLOCK_SIZE..11 * BLOCK_SIZE + 4].copy_from_slice(b"BBBB");
        // Linked data: block 12 -> 13 -> end
        let b12 = 12 * BLOCK_SIZE;
        image[b12..b12 + 2].copy_from_slice(&word_to_bytes(13));
        image[b12 + 2..b12 + 6].copy_from_slice(b"1111");
        let b13 = 13 * BLOCK_SIZE;
        image[b13..b13 + 2].copy_from_slice(&word_to_bytes(0));
        image[b13 + 2..b13 + 6].copy_from_slice(b"2222");
        ByteFile::from_vec(image)
    }

    #[test]
    fn test_mount_and_list() {
        let mut fs = Dos11Fs::mount(build_image()).unwrap();
        assert!(fs.chdir("[100,100]"));
        let entries = fs.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].fullname, "[100,100]CONTIG.TXT");
    }

    #[test]
    fn test_read_contiguous() {
        let mut fs = Dos11Fs::mount(build_image()).unwrap();
        fs.chdir("[100,100]");
        let data = fs.read_bytes("CONTIG.TXT", None).unwrap();
        assert_eq!(data.len(), 2 * BLOCK_SIZE);
        assert_eq!(&data[..4], b"AAAA");
        assert_eq!(&data[BLOCK_SIZE..BLOCK_SIZE + 4], b"BBBB");
    }

    #[test]
    fn test_read_linked_follows_chain() {
        let mut fs = Dos11Fs::mount(build_image()).unwrap();
        fs.chdir("[100,100]");
        let data = fs.read_bytes("LINKED.DAT", None).unwrap();
        assert_eq!(data.len(), 2 * LINKED_FILE_BLOCK_SIZE);
        assert_eq!(&data[..4], b"1111");
        assert_eq!(
            &data[LINKED_FILE_BLOCK_SIZE..LINKED_FILE_BLOCK_SIZE + 4],
            b"2222"
        );
    }

    #[test]
    fn test_uic_pattern() {
        let mut fs = Dos11Fs::mount(build_image()).unwrap();
        let entries = fs
            .filter_entries(Some("[100,100]*.TXT"), false, true)
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].basename, "CONTIG.TXT");
        // The current UIC does not include the file, so no match without
        // the explicit prefix.
        let entries = fs.filter_entries(Some("*.TXT"), false, true).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_writes_fail_read_only() {
        let mut fs = Dos11Fs::mount(build_image()).unwrap();
        assert!(matches!(
            fs.write_bytes("X.TXT", b"x", None, None, None),
            Err(FsError::ReadOnlyFs)
        ));
        assert!(matches!(fs.delete("CONTIG.TXT"), Err(FsError::ReadOnlyFs)));
    }
}
