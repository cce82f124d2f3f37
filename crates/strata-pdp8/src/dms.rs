//! PDP-8 4k Disk Monitor System (DMS) driver.
//!
//! Blocks are 129 12-bit words (258 bytes), with the first word of the
//! disk skipped. Three Directory Name blocks hold up to 25 five-word
//! entries each; the Storage Allocation Map records, for every disk
//! block, the number of the file occupying it, so a file's block list is
//! the set of SAM slots carrying its file number.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write as IoWrite};

use chrono::NaiveDate;
use strata_common::enc::pack12::{
    bytes_to_words_image, dms_bytes_to_words_ascii, dms_words_to_bytes_ascii,
    words_to_bytes_image,
};
use strata_common::enc::sixbit::{asc_to_sixbit_word12, sixbit_word12_to_asc};
use strata_common::{FileMode, filename_match, oct_dump};
use strata_core::{
    DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result,
};
use strata_io::ByteFile;

/// Block size in words; the last word links to the next block.
pub const BLOCK_SIZE_WORD: usize = 129;
pub const BYTES_PER_WORD: usize = 2;
pub const DATA_BLOCK_SIZE_WORD: usize = BLOCK_SIZE_WORD - 1;

const DN_ENTRY_SIZE: usize = 5;
const DN_ENTRIES: usize = 25;
/// First Directory Name block.
const DN_START: u64 = 0o177;

pub const EMPTY_FILE_NUMBER: u16 = 0;
/// Monitor, DN, SAM and scratch blocks.
pub const RESERVED_FILE_NUMBER: u16 = 1;
pub const MAX_FILE_NUMBER: u16 = 0o77;
const MONITOR_FILENAME: &str = "EX C";
const INVALID_FILENAMES: &[&str] = &["CALL", "SAVE"];

pub const FILE_TYPE_ASCII: u16 = 0o0;
pub const FILE_TYPE_BIN: u16 = 0o1;
pub const FILE_TYPE_FTC_BIN: u16 = 0o2;
pub const FILE_TYPE_SYS_USER: u16 = 0o3;

const EXT_SYS: &str = "SYS";
const EXT_USER: &str = "USER";
const EXT_ASCII: &str = "ASCII";
const EXT_BINARY: &str = "BINARY";
const EXT_FTC_BIN: &str = "FTC BIN";

/// A parsed DMS filename: `name.extension[:core_addr][;entry_point]`.
///
/// Names are at most four characters; the extension selects the program
/// type. `*` is accepted as a type wildcard in patterns.
#[derive(Debug, Clone)]
pub struct DmsFilename {
    /// Four characters, space padded.
    pub filename: String,
    /// `None` is the type wildcard.
    pub program_type: Option<u16>,
    pub system_program: bool,
    pub core_addr: u16,
    pub entry_point: u16,
}

impl DmsFilename {
    pub fn parse(fullname: &str, wildcard: bool) -> Result<Self> {
        let fullname = fullname.to_uppercase();
        let mut core_addr = 0o200;
        let mut entry_point = 0;
        let mut name_part = fullname.as_str();
        if let Some((rest, entry)) = name_part.split_once(';') {
            entry_point = u16::from_str_radix(entry.trim(), 8)
                .map_err(|_| FsError::InvalidArg(format!("invalid entry point: {}", entry)))?;
            name_part = rest;
        }
        if let Some((rest, addr)) = name_part.split_once(':') {
            core_addr = u16::from_str_radix(addr.trim(), 8)
                .map_err(|_| FsError::InvalidArg(format!("invalid core address: {}", addr)))?;
            name_part = rest;
        }
        let (name, extension) = match name_part.rsplit_once('.') {
            Some((name, ext)) => (name, Some(ext)),
            None => (name_part, None),
        };
        let filename = sixbit_word12_to_asc(asc_to_sixbit_word12(&name[..name.len().min(2)]))
            + &sixbit_word12_to_asc(asc_to_sixbit_word12(
                &name[name.len().min(2)..name.len().min(4)],
            ));
        if INVALID_FILENAMES.contains(&filename.trim_end()) {
            return Err(FsError::InvalidArg(format!("invalid filename: {}", fullname)));
        }
        let (program_type, system_program) = match extension {
            Some("*") if wildcard => (None, false),
            Some(EXT_ASCII) => (Some(FILE_TYPE_ASCII), false),
            Some(EXT_BINARY) => (Some(FILE_TYPE_BIN), false),
            Some(EXT_FTC_BIN) => (Some(FILE_TYPE_FTC_BIN), false),
            Some(EXT_SYS) => (Some(FILE_TYPE_SYS_USER), true),
            Some(EXT_USER) => (Some(FILE_TYPE_SYS_USER), false),
            _ => {
                return Err(FsError::InvalidArg(format!(
                    "invalid file extension: {}",
                    fullname
                )));
            }
        };
        Ok(Self {
            filename,
            program_type,
            system_program,
            core_addr,
            entry_point,
        })
    }

    fn matches(&self, entry: &DmsEntry) -> bool {
        if !filename_match(entry.filename.trim(), Some(self.filename.trim()), true) {
            return false;
        }
        match self.program_type {
            None => true,
            Some(t) => t == entry.program_type && self.system_program == entry.system_program,
        }
    }
}

/// A Directory Name entry (five words).
#[derive(Debug, Clone)]
pub struct DmsEntry {
    /// Filename, four chars space padded.
    pub filename: String,
    /// Core address low bits; 0o7777 marks a non-contiguous saved file.
    pub low_core_addr: u16,
    pub entry_point: u16,
    pub high_core_addr: u16,
    pub system_program: bool,
    pub program_type: u16,
    pub file_number: u16,
    /// Disk blocks carrying this file number, from the SAM.
    pub blocks: Vec<u64>,
    /// DN block this entry belongs to.
    pub dn_block: u64,
}

impl DmsEntry {
    fn read(words: &[u16], position: usize, dn_block: u64) -> Self {
        let flags = words[position + 4];
        Self {
            filename: sixbit_word12_to_asc(words[position])
                + &sixbit_word12_to_asc(words[position + 1]),
            low_core_addr: words[position + 2],
            entry_point: words[position + 3],
            program_type: flags >> 10,
            high_core_addr: (flags >> 7) & 0o7,
            system_program: (flags >> 6) & 1 != 0,
            file_number: flags & 0o77,
            blocks: Vec::new(),
            dn_block,
        }
    }

    fn to_words(&self) -> [u16; DN_ENTRY_SIZE] {
        let flags = (self.program_type << 10)
            | (self.high_core_addr << 7)
            | ((self.system_program as u16) << 6)
            | self.file_number;
        [
            asc_to_sixbit_word12(&self.filename[..self.filename.len().min(2)]),
            asc_to_sixbit_word12(
                &self.filename[self.filename.len().min(2)..self.filename.len().min(4)],
            ),
            self.low_core_addr & 0o7777,
            self.entry_point & 0o7777,
            flags & 0o7777,
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.file_number == EMPTY_FILE_NUMBER
    }

    pub fn extension(&self) -> &'static str {
        match self.program_type {
            FILE_TYPE_ASCII => EXT_ASCII,
            FILE_TYPE_BIN => EXT_BINARY,
            FILE_TYPE_FTC_BIN => EXT_FTC_BIN,
            _ if self.system_program => EXT_SYS,
            _ => EXT_USER,
        }
    }

    pub fn fullname(&self) -> String {
        format!("{}.{}", self.filename.trim_end(), self.extension())
    }

    pub fn length(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn to_file_entry(&self) -> FileEntry {
        FileEntry::new(self.fullname())
            .with_blocks(self.length(), DATA_BLOCK_SIZE_WORD * BYTES_PER_WORD)
            .with_type(self.extension())
    }
}

/// The Storage Allocation Map: one 6-bit file number per disk block,
/// chained across SAM blocks of 256 slots each.
pub struct StorageAllocationMap {
    /// SAM block numbers, in chain order.
    sam_blocks: Vec<u64>,
    /// Block number to file number, 256 slots per SAM block.
    slots: Vec<u16>,
    /// File number to blocks.
    files_blocks: BTreeMap<u16, Vec<u64>>,
}

impl StorageAllocationMap {
    fn read(fs: &mut DmsFs) -> Result<Self> {
        let mut sam_blocks = Vec::new();
        let mut slots = Vec::new();
        let mut next_block_number = fs.first_sam_block_number;
        while next_block_number != 0 {
            if sam_blocks.contains(&next_block_number) {
                return Err(FsError::corrupt(format!(
                    "SAM chain loops at block {}",
                    next_block_number
                )));
            }
            let words = fs.read_words_block(next_block_number)?;
            sam_blocks.push(next_block_number);
            // Slot n and n+128 share a word: low half and high half.
            for i in 0..128 {
                slots.push(words[i] & 0o77);
            }
            for i in 0..128 {
                slots.push(words[i] >> 6);
            }
            next_block_number = words[128] as u64;
        }
        let mut files_blocks: BTreeMap<u16, Vec<u64>> = BTreeMap::new();
        for (block_number, &file_number) in slots.iter().enumerate() {
            if file_number != 0 {
                files_blocks
                    .entry(file_number)
                    .or_default()
                    .push(block_number as u64);
            }
        }
        Ok(Self {
            sam_blocks,
            slots,
            files_blocks,
        })
    }

    fn write(&self, fs: &mut DmsFs) -> Result<()> {
        for (seq, &block_number) in self.sam_blocks.iter().enumerate() {
            let mut words = [0u16; BLOCK_SIZE_WORD];
            for i in 0..128 {
                let low = self.slots[seq * 256 + i] & 0o77;
                let high = self.slots[seq * 256 + i + 128] & 0o77;
                words[i] = low | (high << 6);
            }
            words[128] = self
                .sam_blocks
                .get(seq + 1)
                .copied()
                .unwrap_or(0) as u16;
            fs.write_words_block(block_number, &words)?;
        }
        Ok(())
    }

    pub fn free(&self) -> u64 {
        self.slots
            .iter()
            .filter(|&&f| f == EMPTY_FILE_NUMBER)
            .count() as u64
    }

    pub fn blocks_of(&self, file_number: u16) -> Vec<u64> {
        self.files_blocks
            .get(&file_number)
            .cloned()
            .unwrap_or_default()
    }

    fn set_block(&mut self, block_number: u64, file_number: u16) {
        if let Some(slot) = self.slots.get_mut(block_number as usize) {
            *slot = file_number;
            self.files_blocks
                .entry(file_number)
                .or_default()
                .push(block_number);
        }
    }

    /// Find an unused file number and claim `length` free slots for it.
    fn allocate_space(&mut self, fullname: &str, length: usize) -> Result<u16> {
        if length as u64 > self.free() {
            return Err(FsError::NoSpace(fullname.to_string()));
        }
        let new_file_number = (RESERVED_FILE_NUMBER + 1..=MAX_FILE_NUMBER)
            .find(|n| !self.files_blocks.contains_key(n))
            .ok_or_else(|| FsError::NoSpace(fullname.to_string()))?;
        let mut blocks = Vec::with_capacity(length);
        for block_number in 0..self.slots.len() as u64 {
            if blocks.len() == length {
                break;
            }
            if self.slots[block_number as usize] == EMPTY_FILE_NUMBER {
                self.slots[block_number as usize] = new_file_number;
                blocks.push(block_number);
            }
        }
        self.files_blocks.insert(new_file_number, blocks);
        Ok(new_file_number)
    }

    fn free_space(&mut self, file_number: u16) {
        for slot in self.slots.iter_mut() {
            if *slot == file_number {
                *slot = EMPTY_FILE_NUMBER;
            }
        }
        self.files_blocks.remove(&file_number);
    }
}

/// A Directory Name block.
struct DnBlock {
    block_number: u64,
    block_seq_nr: usize,
    first_scratch_block_number: u16,
    version_number: u16,
    first_sam_block_number: u16,
    next_directory_name: u16,
    /// File number to entry.
    entries: BTreeMap<u16, DmsEntry>,
}

impl DnBlock {
    fn read(
        fs: &mut DmsFs,
        block_number: u64,
        block_seq_nr: usize,
        sam: Option<&StorageAllocationMap>,
    ) -> Result<Self> {
        let words = fs.read_words_block(block_number)?;
        let mut entries = BTreeMap::new();
        if let Some(sam) = sam {
            let mut position = 3;
            while position + DN_ENTRY_SIZE <= 3 + DN_ENTRIES * DN_ENTRY_SIZE {
                let mut entry = DmsEntry::read(&words, position, block_number);
                if !entry.is_empty() {
                    entry.blocks = sam.blocks_of(entry.file_number);
                    entries.insert(entry.file_number, entry);
                }
                position += DN_ENTRY_SIZE;
            }
        }
        Ok(Self {
            block_number,
            block_seq_nr,
            first_scratch_block_number: words[0],
            version_number: words[1],
            first_sam_block_number: words[2],
            next_directory_name: words[3 + DN_ENTRIES * DN_ENTRY_SIZE],
            entries,
        })
    }

    fn write(&self, fs: &mut DmsFs) -> Result<()> {
        let mut words = [0u16; BLOCK_SIZE_WORD];
        words[0] = self.first_scratch_block_number;
        words[1] = self.version_number;
        words[2] = self.first_sam_block_number;
        let mut position = 3;
        for file_number in self.first_file_number()..=self.last_file_number() {
            if let Some(entry) = self.entries.get(&file_number) {
                words[position..position + DN_ENTRY_SIZE].copy_from_slice(&entry.to_words());
            }
            position += DN_ENTRY_SIZE;
        }
        words[3 + DN_ENTRIES * DN_ENTRY_SIZE] = self.next_directory_name;
        fs.write_words_block(self.block_number, &words)
    }

    fn first_file_number(&self) -> u16 {
        (self.block_seq_nr * DN_ENTRIES) as u16 + 1
    }

    fn last_file_number(&self) -> u16 {
        (((self.block_seq_nr + 1) * DN_ENTRIES) as u16).min(MAX_FILE_NUMBER)
    }
}

/// DMS filesystem over an image of 129-word blocks.
pub struct DmsFs {
    file: ByteFile,
    pub version_string: String,
    pub first_scratch_block_number: u64,
    pub first_sam_block_number: u64,
}

impl DmsFs {
    pub fn mount(file: ByteFile) -> Result<Self> {
        Self::mount_strict(file, true)
    }

    pub fn mount_strict(file: ByteFile, strict: bool) -> Result<Self> {
        let mut fs = Self {
            file,
            version_string: String::new(),
            first_scratch_block_number: 0,
            first_sam_block_number: 0,
        };
        let dn = DnBlock::read(&mut fs, DN_START, 0, None)?;
        fs.first_scratch_block_number = dn.first_scratch_block_number as u64;
        fs.first_sam_block_number = dn.first_sam_block_number as u64;
        fs.version_string = sixbit_word12_to_asc(dn.version_number);
        if strict {
            let sam = StorageAllocationMap::read(&mut fs)?;
            let reserved_blocks = sam.blocks_of(RESERVED_FILE_NUMBER);
            if !reserved_blocks.contains(&fs.first_scratch_block_number) {
                return Err(FsError::corrupt(
                    "scratch blocks are not reserved in the SAM",
                ));
            }
        }
        Ok(fs)
    }

    /// Read a block as 129 12-bit words; the first word of the disk is
    /// skipped.
    pub fn read_words_block(&mut self, block_number: u64) -> Result<Vec<u16>> {
        let position = block_number * (BLOCK_SIZE_WORD * BYTES_PER_WORD) as u64
            + BYTES_PER_WORD as u64;
        self.file.seek(SeekFrom::Start(position)).map_err(FsError::from)?;
        let mut data = vec![0u8; BLOCK_SIZE_WORD * BYTES_PER_WORD];
        self.file.read_exact(&mut data).map_err(FsError::from)?;
        Ok(data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]) & 0o7777)
            .collect())
    }

    pub fn write_words_block(&mut self, block_number: u64, words: &[u16]) -> Result<()> {
        debug_assert_eq!(words.len(), BLOCK_SIZE_WORD);
        let position = block_number * (BLOCK_SIZE_WORD * BYTES_PER_WORD) as u64
            + BYTES_PER_WORD as u64;
        self.file.seek(SeekFrom::Start(position)).map_err(FsError::from)?;
        for &word in words {
            self.file
                .write_all(&(word & 0o7777).to_le_bytes())
                .map_err(FsError::from)?;
        }
        Ok(())
    }

    /// Walk the Directory Name block chain.
    fn read_dn_blocks(&mut self, sam: &StorageAllocationMap) -> Result<Vec<DnBlock>> {
        let mut blocks = Vec::new();
        let mut visited = Vec::new();
        let mut next_block_number = DN_START;
        let mut block_seq_nr = 0;
        while next_block_number != 0 {
            if visited.contains(&next_block_number) {
                return Err(FsError::corrupt(format!(
                    "DN chain loops at block {}",
                    next_block_number
                )));
            }
            visited.push(next_block_number);
            let dn = DnBlock::read(self, next_block_number, block_seq_nr, Some(sam))?;
            next_block_number = dn.next_directory_name as u64;
            block_seq_nr += 1;
            blocks.push(dn);
        }
        Ok(blocks)
    }

    fn internal_entries(&mut self) -> Result<Vec<DmsEntry>> {
        let sam = StorageAllocationMap::read(self)?;
        Ok(self
            .read_dn_blocks(&sam)?
            .into_iter()
            .flat_map(|dn| dn.entries.into_values())
            .collect())
    }

    fn locate(&mut self, fullname: &str) -> Result<DmsEntry> {
        let dms_filename = DmsFilename::parse(fullname, false)?;
        self.internal_entries()?
            .into_iter()
            .find(|e| {
                e.filename.trim() == dms_filename.filename.trim()
                    && Some(e.program_type) == dms_filename.program_type
            })
            .ok_or_else(|| FsError::NotFound(fullname.to_string()))
    }

    /// Raw file content as 12-bit words, data words only.
    fn read_entry_words(&mut self, entry: &DmsEntry) -> Result<Vec<u16>> {
        let mut words = Vec::with_capacity(entry.blocks.len() * DATA_BLOCK_SIZE_WORD);
        for &block_number in &entry.blocks {
            let block = self.read_words_block(block_number)?;
            words.extend_from_slice(&block[..DATA_BLOCK_SIZE_WORD]);
        }
        Ok(words)
    }

    fn write_entry_words(&mut self, entry: &DmsEntry, words: &[u16]) -> Result<()> {
        for (i, &block_number) in entry.blocks.iter().enumerate() {
            let mut block = [0u16; BLOCK_SIZE_WORD];
            let from = i * DATA_BLOCK_SIZE_WORD;
            if from < words.len() {
                let to = ((i + 1) * DATA_BLOCK_SIZE_WORD).min(words.len());
                block[..to - from].copy_from_slice(&words[from..to]);
            }
            // Last word links to the next block
            block[BLOCK_SIZE_WORD - 1] = entry
                .blocks
                .get(i + 1)
                .copied()
                .unwrap_or(0) as u16;
            self.write_words_block(block_number, &block)?;
        }
        Ok(())
    }

    fn delete_entry(&mut self, entry: &DmsEntry) -> Result<()> {
        if entry.file_number == EMPTY_FILE_NUMBER || entry.file_number == RESERVED_FILE_NUMBER {
            return Err(FsError::InvalidArg(format!(
                "cannot delete {}",
                entry.fullname()
            )));
        }
        let mut sam = StorageAllocationMap::read(self)?;
        sam.free_space(entry.file_number);
        sam.write(self)?;
        let mut dn = DnBlock::read(
            self,
            entry.dn_block,
            ((entry.file_number - 1) / DN_ENTRIES as u16) as usize,
            Some(&sam),
        )?;
        dn.entries.remove(&entry.file_number);
        dn.write(self)
    }

    fn create_dms_file(
        &mut self,
        fullname: &str,
        number_of_blocks: usize,
    ) -> Result<DmsEntry> {
        if self.file.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let dms_filename = DmsFilename::parse(fullname, false)?;
        if let Ok(old) = self.locate(fullname) {
            self.delete_entry(&old)?;
        }
        let mut sam = StorageAllocationMap::read(self)?;
        let file_number = sam.allocate_space(fullname, number_of_blocks)?;
        let blocks = sam.blocks_of(file_number);
        let mut result = None;
        for dn in self.read_dn_blocks(&sam)? {
            if dn.first_file_number() <= file_number && file_number <= dn.last_file_number() {
                let entry = DmsEntry {
                    filename: dms_filename.filename.clone(),
                    low_core_addr: dms_filename.core_addr & 0o7777,
                    entry_point: dms_filename.entry_point,
                    high_core_addr: (dms_filename.core_addr >> 12) & 0o7,
                    system_program: dms_filename.system_program,
                    program_type: dms_filename.program_type.unwrap_or(FILE_TYPE_ASCII),
                    file_number,
                    blocks: blocks.clone(),
                    dn_block: dn.block_number,
                };
                let mut dn = dn;
                dn.entries.insert(file_number, entry.clone());
                dn.write(self)?;
                result = Some(entry);
                break;
            }
        }
        let entry = result.ok_or_else(|| FsError::NoSpace(fullname.to_string()))?;
        sam.write(self)?;
        Ok(entry)
    }

    pub fn free(&mut self) -> Result<u64> {
        Ok(StorageAllocationMap::read(self)?.free())
    }

    /// Create an empty DMS filesystem: DN blocks at 0o177/0o201/0o202,
    /// the SAM at 0o200, scratch blocks at the end of the disk.
    pub fn initialize(&mut self) -> Result<()> {
        let version_string = "AF";
        let scratch_blocks: [u64; 5] = [251, 252, 253, 254, 255];
        let dn_blocks: [u64; 3] = [DN_START, DN_START + 2, DN_START + 3];
        let sam_blocks: [u64; 1] = [DN_START + 1];
        self.first_scratch_block_number = scratch_blocks[0];
        self.first_sam_block_number = sam_blocks[0];
        self.version_string = version_string.to_string();
        // Zero the SAM chain before reading it back.
        for &block_number in &sam_blocks {
            self.write_words_block(block_number, &[0u16; BLOCK_SIZE_WORD])?;
        }
        let mut sam = StorageAllocationMap::read(self)?;
        for &block_number in scratch_blocks
            .iter()
            .chain(dn_blocks.iter())
            .chain(sam_blocks.iter())
        {
            sam.set_block(block_number, RESERVED_FILE_NUMBER);
        }
        sam.write(self)?;
        for (i, &block_number) in dn_blocks.iter().enumerate() {
            let mut dn = DnBlock {
                block_number,
                block_seq_nr: i,
                first_scratch_block_number: 0,
                version_number: 0,
                first_sam_block_number: 0,
                next_directory_name: if i + 1 < dn_blocks.len() {
                    dn_blocks[i + 1] as u16
                } else {
                    0
                },
                entries: BTreeMap::new(),
            };
            if i == 0 {
                dn.first_scratch_block_number = scratch_blocks[0] as u16;
                dn.first_sam_block_number = sam_blocks[0] as u16;
                dn.version_number = asc_to_sixbit_word12(version_string);
                // The resident monitor entry.
                dn.entries.insert(
                    RESERVED_FILE_NUMBER,
                    DmsEntry {
                        filename: MONITOR_FILENAME.to_string(),
                        low_core_addr: 0o7000,
                        entry_point: 0o7000,
                        high_core_addr: 0,
                        system_program: true,
                        program_type: FILE_TYPE_SYS_USER,
                        file_number: RESERVED_FILE_NUMBER,
                        blocks: Vec::new(),
                        dn_block: block_number,
                    },
                );
            }
            dn.write(self)?;
        }
        Ok(())
    }
}

impl Filesystem for DmsFs {
    fn fs_name(&self) -> &'static str {
        "dms"
    }

    fn fs_description(&self) -> &'static str {
        "PDP-8 4k Disk Monitor System"
    }

    fn size(&mut self) -> Result<u64> {
        self.file.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        Ok(self
            .internal_entries()?
            .iter()
            .map(DmsEntry::to_file_entry)
            .collect())
    }

    fn filter_entries(
        &mut self,
        pattern: Option<&str>,
        _include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<FileEntry>> {
        let dms_filename = match pattern {
            Some(pattern) => Some(DmsFilename::parse(pattern, wildcard)?),
            None => None,
        };
        Ok(self
            .internal_entries()?
            .iter()
            .filter(|e| dms_filename.as_ref().is_none_or(|f| f.matches(e)))
            .map(DmsEntry::to_file_entry)
            .collect())
    }

    fn entry(&mut self, path: &str) -> Result<FileEntry> {
        self.locate(path).map(|e| e.to_file_entry())
    }

    fn read_bytes(&mut self, path: &str, mode: Option<FileMode>) -> Result<Vec<u8>> {
        let entry = self.locate(path)?;
        let mode = mode.unwrap_or_else(|| {
            if entry.program_type == FILE_TYPE_ASCII {
                FileMode::Ascii
            } else {
                FileMode::Image
            }
        });
        let words = self.read_entry_words(&entry)?;
        Ok(match mode {
            FileMode::Ascii => dms_words_to_bytes_ascii(&words),
            FileMode::Image => words_to_bytes_image(&words),
        })
    }

    fn write_bytes(
        &mut self,
        path: &str,
        data: &[u8],
        _creation_date: Option<NaiveDate>,
        _file_type: Option<&str>,
        mode: Option<FileMode>,
    ) -> Result<()> {
        let dms_filename = DmsFilename::parse(path, false)?;
        let mode = mode.unwrap_or_else(|| {
            if dms_filename.program_type == Some(FILE_TYPE_ASCII) {
                FileMode::Ascii
            } else {
                FileMode::Image
            }
        });
        let words = match mode {
            FileMode::Ascii => {
                // End-of-file is a pair of escaped form feeds.
                let mut content = data.to_vec();
                if !content.ends_with(b"\x0C\x0C") {
                    content.extend_from_slice(b"\x0C\x0C");
                }
                dms_bytes_to_words_ascii(&content)
            }
            FileMode::Image => bytes_to_words_image(data),
        };
        let number_of_blocks = words.len().div_ceil(DATA_BLOCK_SIZE_WORD);
        let entry = self.create_dms_file(path, number_of_blocks)?;
        self.write_entry_words(&entry, &words)
    }

    fn create_file(
        &mut self,
        path: &str,
        blocks: u64,
        _creation_date: Option<NaiveDate>,
        _file_type: Option<&str>,
    ) -> Result<FileEntry> {
        self.create_dms_file(path, blocks as usize)
            .map(|e| e.to_file_entry())
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if self.file.is_read_only() {
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
        out: &mut dyn IoWrite,
    ) -> Result<()> {
        let sam = StorageAllocationMap::read(self)?;
        if !options.brief {
            writeln!(out, "\nFB={:>04o}\n", sam.free()).map_err(FsError::Io)?;
            writeln!(out, "NAME  TYPE    BLK\n").map_err(FsError::Io)?;
            writeln!(out, "{}", self.version_string).map_err(FsError::Io)?;
        }
        let dms_filename = match pattern {
            Some(pattern) => Some(DmsFilename::parse(pattern, true)?),
            None => None,
        };
        for entry in self.internal_entries()? {
            if entry.file_number == RESERVED_FILE_NUMBER && !options.full {
                continue;
            }
            if dms_filename.as_ref().is_some_and(|f| !f.matches(&entry)) {
                continue;
            }
            if options.brief {
                writeln!(out, "{:<4}.{}", entry.filename, entry.extension())
                    .map_err(FsError::Io)?;
            } else {
                let fullname = if entry.program_type == FILE_TYPE_SYS_USER {
                    format!(
                        "{:<4}.{:<4}({:>o})",
                        entry.filename,
                        entry.extension(),
                        entry.high_core_addr
                    )
                } else {
                    format!("{:<4}.{:<7}", entry.filename, entry.extension())
                };
                writeln!(out, "{} {:>04o}", fullname, entry.length()).map_err(FsError::Io)?;
            }
        }
        writeln!(out).map_err(FsError::Io)?;
        Ok(())
    }

    fn examine(
        &mut self,
        arg: Option<&str>,
        _options: &ExamineOptions,
        out: &mut dyn IoWrite,
    ) -> Result<()> {
        if let Some(arg) = arg {
            let dms_filename = DmsFilename::parse(arg, true)?;
            writeln!(out, "Filename       Num  Low   Entry Core").map_err(FsError::Io)?;
            writeln!(out, "                    Core  Point Bank").map_err(FsError::Io)?;
            writeln!(out, "--------       ---  ----  ----- ----").map_err(FsError::Io)?;
            for entry in self.internal_entries()? {
                if dms_filename.matches(&entry) {
                    writeln!(
                        out,
                        "{:<14} #{:02}  {:04o}  {:>04o}  {:>o}",
                        entry.fullname(),
                        entry.file_number,
                        entry.low_core_addr,
                        entry.entry_point,
                        entry.high_core_addr
                    )
                    .map_err(FsError::Io)?;
                }
            }
            return Ok(());
        }
        let sam = StorageAllocationMap::read(self)?;
        for dn in self.read_dn_blocks(&sam)? {
            writeln!(out, "\n*Directory Name Block").map_err(FsError::Io)?;
            writeln!(out, "Block number:          {:>5}", dn.block_number)
                .map_err(FsError::Io)?;
            writeln!(
                out,
                "First scratch block:   {:>5}",
                dn.first_scratch_block_number
            )
            .map_err(FsError::Io)?;
            writeln!(out, "Version number:        {:>5}", dn.version_number)
                .map_err(FsError::Io)?;
            writeln!(out, "First SAM block:       {:>5}", dn.first_sam_block_number)
                .map_err(FsError::Io)?;
            writeln!(out, "Next dir name:         {:>5}", dn.next_directory_name)
                .map_err(FsError::Io)?;
            for entry in dn.entries.values() {
                writeln!(
                    out,
                    "{:<14} #{:02}  {:04o}  {:>04o}  {:>o}     {:?}",
                    entry.fullname(),
                    entry.file_number,
                    entry.low_core_addr,
                    entry.entry_point,
                    entry.high_core_addr,
                    entry.blocks
                )
                .map_err(FsError::Io)?;
            }
        }
        Ok(())
    }

    fn dump(
        &mut self,
        path: Option<&str>,
        start: Option<u64>,
        end: Option<u64>,
        out: &mut dyn IoWrite,
    ) -> Result<()> {
        let blocks: Vec<u64> = match path {
            Some(path) => {
                let entry = self.locate(path)?;
                let start = start.unwrap_or(0) as usize;
                let end = end
                    .map(|e| e as usize)
                    .unwrap_or_else(|| entry.blocks.len().saturating_sub(1));
                entry
                    .blocks
                    .get(start..=end.min(entry.blocks.len().saturating_sub(1)))
                    .unwrap_or(&[])
                    .to_vec()
            }
            None => {
                let start = start.unwrap_or(0);
                let end = match end {
                    Some(end) => end,
                    None if start == 0 => {
                        self.size()? / (BLOCK_SIZE_WORD * BYTES_PER_WORD) as u64 - 1
                    }
                    None => start,
                };
                (start..=end).collect()
            }
        };
        for (i, block_number) in blocks.iter().enumerate() {
            let words = self.read_words_block(*block_number)?;
            writeln!(out, "\nBLOCK NUMBER   {:08}", i).map_err(FsError::Io)?;
            oct_dump(out, &words).map_err(FsError::Io)?;
        }
        Ok(())
    }

    fn file_types(&self) -> Vec<String> {
        vec![
            EXT_SYS.to_string(),
            EXT_USER.to_string(),
            EXT_ASCII.to_string(),
            EXT_BINARY.to_string(),
            EXT_FTC_BIN.to_string(),
        ]
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

    fn new_fs() -> DmsFs {
        // 256 blocks of 129 words, plus the skipped first word.
        let file = ByteFile::with_size(256 * BLOCK_SIZE_WORD * BYTES_PER_WORD + BYTES_PER_WORD);
        let mut fs = DmsFs {
            file,
            version_string: String::new(),
            first_scratch_block_number: 0,
            first_sam_block_number: 0,
        };
        fs.initialize().unwrap();
        fs
    }

    #[test]
    fn test_initialize_and_remount() {
        let fs = new_fs();
        let image = fs.file.into_vec();
        let mut fs = DmsFs::mount(ByteFile::from_vec(image)).unwrap();
        assert_eq!(fs.version_string, "AF");
        assert_eq!(fs.first_sam_block_number, 0o200);
        // The monitor is the only visible entry.
        let entries = fs.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].fullname, "EX C.SYS");
    }

    #[test]
    fn test_ascii_write_read_roundtrip() {
        let mut fs = new_fs();
        let text: String = (0..50)
            .map(|i| format!("{:5} ABCDEFGHIJKLMNOPQRSTUVWXYZ01234567890\n", i))
            .collect();
        fs.write_bytes("50.ASCII", text.as_bytes(), None, None, None)
            .unwrap();
        let data = fs.read_bytes("50.ASCII", None).unwrap();
        let read_back = String::from_utf8_lossy(&data);
        for i in 0..50 {
            let line = format!("{:5} ABCDEFGHIJKLMNOPQRSTUVWXYZ01234567890", i);
            assert!(read_back.contains(&line), "missing line {}", i);
        }
    }

    #[test]
    fn test_filter_by_extension() {
        let mut fs = new_fs();
        for i in 0..7 {
            let name = format!("F{}.ASCII", i);
            fs.write_bytes(&name, b"data\n", None, None, None).unwrap();
        }
        fs.write_bytes("PR.BINARY", &[1, 2, 3], None, None, None).unwrap();
        let entries = fs.filter_entries(Some("*.ASCII"), false, true).unwrap();
        assert_eq!(entries.len(), 7);
    }

    #[test]
    fn test_delete_frees_sam_slots() {
        let mut fs = new_fs();
        fs.write_bytes("AB.BINARY", &[0x55; 600], None, None, None)
            .unwrap();
        let free = fs.free().unwrap();
        let entry = fs.entry("AB.BINARY").unwrap();
        fs.delete("AB.BINARY").unwrap();
        assert_eq!(fs.free().unwrap(), free + entry.blocks);
        assert!(fs.entry("AB.BINARY").is_err());
    }

    #[test]
    fn test_allocation_is_not_necessarily_contiguous() {
        let mut fs = new_fs();
        fs.write_bytes("A.BINARY", &[1u8; 1000], None, None, None).unwrap();
        fs.write_bytes("B.BINARY", &[2u8; 1000], None, None, None).unwrap();
        fs.delete("A.BINARY").unwrap();
        // C is larger than the hole A left, so its blocks wrap around B.
        fs.write_bytes("C.BINARY", &[3u8; 2000], None, None, None).unwrap();
        let data = fs.read_bytes("C.BINARY", None).unwrap();
        assert_eq!(&data[..4], &[3, 3, 3, 3]);
        assert_eq!(&fs.read_bytes("B.BINARY", None).unwrap()[..4], &[2, 2, 2, 2]);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut fs = new_fs();
        assert!(matches!(
            fs.write_bytes("CALL.ASCII", b"x", None, None, None),
            Err(FsError::InvalidArg(_))
        ));
        assert!(matches!(
            fs.write_bytes("NOEXT", b"x", None, None, None),
            Err(FsError::InvalidArg(_))
        ));
    }
}
