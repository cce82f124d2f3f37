//! TSS/8 filesystem driver.
//!
//! A two-level directory: the Master File Directory (one 4096-word track)
//! lists project-programmer numbers, each pointing at a retrieval chain of
//! 8-word descriptors whose seven block pointers locate the user's UFD.
//! Every UFD is itself a file traversed the same way. File blocks are
//! allocated through the bit Storage Allocation Table kept in the FIP
//! track.

use std::io::Write;

use chrono::{Local, NaiveDate};
use strata_common::dates::{date_to_tss8, tss8_to_date};
use strata_common::{FileMode, filename_match, oct_dump};
use strata_core::{
    DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result,
};
use strata_io::{BLOCK_SIZE, ByteFile, WordBlockDevice};

pub const WORDS_PER_BLOCK: usize = 256;
pub const WORDS_PER_TRACK: usize = 4096;
pub const BLOCKS_PER_TRACK: u64 = (WORDS_PER_TRACK / WORDS_PER_BLOCK) as u64;
/// Monitor tracks before the swapping area.
const MONITOR_SIZE: u64 = 5 * BLOCKS_PER_TRACK;
/// FIP phantom track, holding the SAT.
const FIP_BLOCK: u64 = BLOCKS_PER_TRACK;

const ENTRY_SIZE: usize = 8;
const RETRIEVAL_SIZE: usize = 8;

// MFD entry word offsets
const MFD_PASSWORD_POS: usize = 1;
const MFD_PASSWORD_SIZE: usize = 2;
const MFD_NEXT_POS: usize = 3;
const MFD_QUOTA_POS: usize = 4;
const MFD_DEVICE_TIME_POS: usize = 5;
const MFD_CPU_TIME_POS: usize = 6;
const MFD_RETRIEVAL_POINTER_POS: usize = 7;

// UFD entry word offsets
const UFD_FILENAME_SIZE: usize = 3;
const UFD_NEXT_POS: usize = 3;
const UFD_EXT_PROTECTION_POS: usize = 4;
const UFD_FILE_SIZE_POS: usize = 5;
const UFD_CREATION_DATE_POS: usize = 6;
const UFD_RETRIEVAL_POINTER_POS: usize = 7;

// SAT layout inside the FIP track
const SAT_SIZE: usize = 0o530;
const SAT_END_POS: usize = 0o7777;
const SAT_START_POS: usize = SAT_END_POS - SAT_SIZE + 1 + 2;
const SAT_CNT: usize = SAT_END_POS - SAT_SIZE + 2;

const QUOTA_MULTIPLIER: u32 = 25;
pub const DEFAULT_PROTECTION_CODE: u16 = 0o12;
pub const TSS8_BLOCK_SIZE_BYTES: usize = 384;

/// Extension tags by index in the ext/protection word.
const EXTENSIONS: [&str; 16] = [
    "", "ASC", "SAV", "BIN", "BAS", "BAC", "FCL", "TMP", "", "DAT", "LST", "PAL", "", "", "", "",
];
const BINARY_EXTENSIONS: &[&str] = &["SAV", "BIN", "BAC", "TMP", "DAT"];

/// Project-programmer number: two 6-bit octal fields. `None` in a filter
/// matches anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ppn {
    pub group: u8,
    pub user: u8,
}

impl Ppn {
    pub const fn new(group: u8, user: u8) -> Self {
        Self {
            group: group & 0o77,
            user: user & 0o77,
        }
    }

    pub fn from_word(word: u16) -> Self {
        Self::new((word >> 6) as u8, (word & 0o77) as u8)
    }

    pub fn to_word(self) -> u16 {
        ((self.group as u16) << 6) | self.user as u16
    }
}

impl std::fmt::Display for Ppn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:o},{:o}]", self.group, self.user)
    }
}

/// PPN filter with `*` wildcards.
#[derive(Debug, Clone, Copy)]
pub struct PpnPattern {
    pub group: Option<u8>,
    pub user: Option<u8>,
}

impl PpnPattern {
    fn exact(ppn: Ppn) -> Self {
        Self {
            group: Some(ppn.group),
            user: Some(ppn.user),
        }
    }

    fn parse(code: &str) -> Option<Self> {
        let inner = code.split_once('[')?.1.split_once(']')?.0;
        let (group_str, user_str) = inner.split_once(',')?;
        let group = if group_str.trim() == "*" {
            None
        } else {
            Some(u8::from_str_radix(group_str.trim(), 8).ok()? & 0o77)
        };
        let user = if user_str.trim() == "*" {
            None
        } else {
            Some(u8::from_str_radix(user_str.trim(), 8).ok()? & 0o77)
        };
        Some(Self { group, user })
    }

    fn matches(&self, ppn: Ppn) -> bool {
        self.group.is_none_or(|g| g == ppn.group) && self.user.is_none_or(|u| u == ppn.user)
    }

    fn as_exact(&self) -> Option<Ppn> {
        Some(Ppn::new(self.group?, self.user?))
    }
}

const MFD_PPN: Ppn = Ppn::new(0, 1);

/// 6-bit text: two characters per word, offset by 0o40.
pub fn words_to_ascii(words: &[u16]) -> String {
    let mut result = String::new();
    for &word in words {
        if word == 0 {
            continue;
        }
        result.push((((word >> 6) & 0o77) as u8 + 0o40) as char);
        result.push(((word & 0o77) as u8 + 0o40) as char);
    }
    result
}

pub fn ascii_to_words(data: &str) -> Vec<u16> {
    let mut buffer: Vec<u8> = data.to_uppercase().into_bytes();
    if buffer.len() % 2 != 0 {
        buffer.push(0x20);
    }
    buffer
        .chunks_exact(2)
        .map(|c| {
            let chr1 = (c[0].wrapping_sub(0o40) & 0o77) as u16;
            let chr2 = (c[1].wrapping_sub(0o40) & 0o77) as u16;
            chr2 | (chr1 << 6)
        })
        .collect()
}

/// TSS/8 word packing: a word pair becomes three bytes of the 24-bit
/// doubleword. ASCII mode masks each byte to 7 bits.
fn words_to_bytes(words: &[u16], mode: FileMode) -> Vec<u8> {
    let mask = if mode == FileMode::Ascii { 0x7F } else { 0xFF };
    let mut data = Vec::with_capacity(words.len() / 2 * 3);
    for pair in words.chunks_exact(2) {
        let dw = ((pair[0] as u32) << 12) | pair[1] as u32;
        data.push(((dw >> 16) & mask) as u8);
        data.push(((dw >> 8) & mask) as u8);
        data.push((dw & mask) as u8);
    }
    data
}

fn bytes_to_words(data: &[u8], mode: FileMode) -> Vec<u16> {
    let mask = if mode == FileMode::Ascii { 0x7F } else { 0xFF };
    let mut words = Vec::with_capacity(data.len() / 3 * 2);
    for triple in data.chunks(3) {
        if triple.len() < 3 {
            break;
        }
        let dw = (((triple[0] & mask) as u32) << 16)
            | (((triple[1] & mask) as u32) << 8)
            | (triple[2] & mask) as u32;
        words.push(((dw >> 12) & 0xFFF) as u16);
        words.push((dw & 0xFFF) as u16);
    }
    words
}

/// Canonical `NAME.EXT` with the name folded through the 6-bit encoding
/// (at most six characters).
pub fn tss8_canonical_filename(fullname: &str, wildcard: bool) -> String {
    let fullname = fullname.to_uppercase();
    let (filename, extension) = match fullname.split_once('.') {
        Some((name, ext)) => (name.to_string(), ext.to_string()),
        None => (fullname, if wildcard { "*".to_string() } else { String::new() }),
    };
    let words = ascii_to_words(&filename);
    let filename = words_to_ascii(&words[..words.len().min(UFD_FILENAME_SIZE)])
        .trim()
        .to_string();
    format!("{}.{}", filename, extension)
}

fn split_fullname(
    current: Ppn,
    fullname: Option<&str>,
    wildcard: bool,
) -> (PpnPattern, Option<String>) {
    let mut ppn = PpnPattern::exact(current);
    let mut name = None;
    if let Some(fullname) = fullname {
        let rest = if fullname.contains('[') {
            match PpnPattern::parse(fullname) {
                Some(parsed) => {
                    ppn = parsed;
                    fullname.split_once(']').map(|(_, r)| r).unwrap_or("")
                }
                None => fullname,
            }
        } else {
            fullname
        };
        if !rest.is_empty() {
            name = Some(tss8_canonical_filename(rest, wildcard));
        }
    }
    (ppn, name)
}

fn extension_index(extension: &str) -> u16 {
    EXTENSIONS
        .iter()
        .position(|&e| !e.is_empty() && e == extension)
        .unwrap_or(0) as u16
}

/// An MFD entry: one PPN with its password, quota, accounting counters
/// and the retrieval pointer of the UFD.
#[derive(Debug, Clone)]
pub struct MfdEntry {
    pub position: usize,
    pub ppn: Ppn,
    pub password: String,
    pub next: usize,
    pub quota: u32,
    pub device_time: u16,
    pub cpu_time: u16,
    pub retrieval_pointer: usize,
}

impl MfdEntry {
    fn read(words: &[u16], position: usize) -> Self {
        Self {
            position,
            ppn: Ppn::from_word(words[position]),
            password: words_to_ascii(
                &words[position + MFD_PASSWORD_POS..position + MFD_PASSWORD_POS + MFD_PASSWORD_SIZE],
            ),
            next: words[position + MFD_NEXT_POS] as usize,
            quota: words[position + MFD_QUOTA_POS] as u32 * QUOTA_MULTIPLIER,
            device_time: words[position + MFD_DEVICE_TIME_POS],
            cpu_time: words[position + MFD_CPU_TIME_POS],
            retrieval_pointer: words[position + MFD_RETRIEVAL_POINTER_POS] as usize,
        }
    }

    fn to_words(&self) -> [u16; ENTRY_SIZE] {
        let mut password = ascii_to_words(&self.password);
        password.truncate(MFD_PASSWORD_SIZE);
        password.resize(MFD_PASSWORD_SIZE, 0);
        [
            self.ppn.to_word(),
            password[0],
            password[1],
            self.next as u16,
            (self.quota / QUOTA_MULTIPLIER) as u16,
            self.device_time,
            self.cpu_time,
            self.retrieval_pointer as u16,
        ]
    }

    /// The entry at offset 0 is a dummy anchor.
    fn is_dummy(&self) -> bool {
        self.position == 0
    }
}

/// A UFD entry: filename, extension/protection, size, date, retrieval.
#[derive(Debug, Clone)]
pub struct UfdEntry {
    pub position: usize,
    pub filename: String,
    pub extension_idx: u16,
    pub protection: u16,
    pub next: usize,
    /// Length in blocks.
    pub length: u64,
    pub raw_creation_date: u16,
    pub retrieval_pointer: usize,
    pub ppn: Ppn,
}

impl UfdEntry {
    fn read(words: &[u16], position: usize, ppn: Ppn) -> Self {
        let ext_protection = words[position + UFD_EXT_PROTECTION_POS];
        Self {
            position,
            filename: words_to_ascii(&words[position..position + UFD_FILENAME_SIZE])
                .trim()
                .to_string(),
            extension_idx: (ext_protection >> 7) & 0xF,
            protection: ext_protection & 0o77,
            next: words[position + UFD_NEXT_POS] as usize,
            length: words[position + UFD_FILE_SIZE_POS] as u64,
            raw_creation_date: words[position + UFD_CREATION_DATE_POS],
            retrieval_pointer: words[position + UFD_RETRIEVAL_POINTER_POS] as usize,
            ppn,
        }
    }

    fn to_words(&self) -> [u16; ENTRY_SIZE] {
        let mut name = ascii_to_words(&self.filename);
        name.truncate(UFD_FILENAME_SIZE);
        name.resize(UFD_FILENAME_SIZE, 0);
        [
            name[0],
            name[1],
            name[2],
            self.next as u16,
            self.protection | ((self.extension_idx & 0xF) << 7),
            self.length as u16,
            self.raw_creation_date,
            self.retrieval_pointer as u16,
        ]
    }

    fn is_dummy(&self) -> bool {
        self.position == 0
    }

    pub fn extension(&self) -> &'static str {
        EXTENSIONS[self.extension_idx as usize]
    }

    pub fn basename(&self) -> String {
        format!("{}.{}", self.filename, self.extension())
    }

    pub fn fullname(&self) -> String {
        format!("{}{}", self.ppn, self.basename())
    }

    pub fn creation_date(&self) -> Option<NaiveDate> {
        tss8_to_date(self.raw_creation_date)
    }

    fn to_file_entry(&self) -> FileEntry {
        let mut entry = FileEntry::new(self.fullname())
            .with_blocks(self.length, TSS8_BLOCK_SIZE_BYTES)
            .with_date(self.creation_date())
            .with_type(self.extension());
        entry.basename = self.basename();
        entry.protected = self.protection & 0o20 != 0;
        entry
    }
}

/// The Storage Allocation Table: one bit per file-storage block, kept at
/// the top of the FIP track. A zero bit is a free block.
pub struct StorageAllocationTable {
    bitmaps: Vec<u16>,
}

impl StorageAllocationTable {
    fn read(fs: &mut Tss8Fs) -> Result<Self> {
        let words = fs.read_words_track(FIP_BLOCK)?;
        Ok(Self {
            bitmaps: words[SAT_START_POS..=SAT_END_POS].to_vec(),
        })
    }

    fn write(&self, fs: &mut Tss8Fs) -> Result<()> {
        let mut words = fs.read_words_track(FIP_BLOCK)?;
        words[SAT_CNT] = self.free() as u16 & 0o7777;
        words[SAT_START_POS..=SAT_END_POS].copy_from_slice(&self.bitmaps);
        fs.write_words_track(FIP_BLOCK, &words)
    }

    pub fn total_bits(&self) -> usize {
        self.bitmaps.len() * 12
    }

    pub fn is_free(&self, bit_index: usize) -> bool {
        self.bitmaps[bit_index / 12] & (1 << (bit_index % 12)) == 0
    }

    pub fn set_used(&mut self, bit_index: usize) {
        self.bitmaps[bit_index / 12] |= 1 << (bit_index % 12);
    }

    pub fn set_free(&mut self, bit_index: usize) {
        self.bitmaps[bit_index / 12] &= !(1 << (bit_index % 12));
    }

    fn allocate_one(&mut self) -> Result<usize> {
        for bit in 0..self.total_bits() {
            if self.is_free(bit) {
                self.set_used(bit);
                return Ok(bit);
            }
        }
        Err(FsError::NoSpace("volume is full".to_string()))
    }

    fn allocate(&mut self, size: usize) -> Result<Vec<usize>> {
        let mut blocks = Vec::with_capacity(size);
        for bit in 0..self.total_bits() {
            if blocks.len() == size {
                break;
            }
            if self.is_free(bit) {
                self.set_used(bit);
                blocks.push(bit);
            }
        }
        if blocks.len() < size {
            return Err(FsError::NoSpace("volume is full".to_string()));
        }
        Ok(blocks)
    }

    pub fn used(&self) -> u64 {
        self.bitmaps.iter().map(|b| b.count_ones() as u64).sum()
    }

    pub fn free(&self) -> u64 {
        self.total_bits() as u64 - self.used()
    }
}

/// TSS/8 filesystem over a 12-bit word block device.
pub struct Tss8Fs {
    dev: WordBlockDevice,
    /// Number of configured users (sizes the swapping area).
    pub users: u64,
    /// First block of the Master File Directory track.
    pub mfd_block: u64,
    /// Current project-programmer number.
    pub ppn: Ppn,
}

impl Tss8Fs {
    /// Open an image without probing for an MFD, for `initialize`.
    pub fn open_uninitialized(file: ByteFile) -> Result<Self> {
        Ok(Self {
            dev: WordBlockDevice::new(file)?,
            users: 20,
            mfd_block: MONITOR_SIZE + BLOCKS_PER_TRACK * 20,
            ppn: Ppn::new(0, 1),
        })
    }

    pub fn mount(file: ByteFile) -> Result<Self> {
        let mut fs = Self {
            dev: WordBlockDevice::new(file)?,
            users: 0,
            mfd_block: 0,
            ppn: Ppn::new(0, 1),
        };
        let (users, mfd_block) = fs.guess_users()?;
        fs.users = users;
        fs.mfd_block = mfd_block;
        Ok(fs)
    }

    /// Probe for the MFD: its first 8-word block is a dummy whose link
    /// points at offset 0o10 and whose first entry looks sane.
    fn guess_users(&mut self) -> Result<(u64, u64)> {
        for users in 8..32u64 {
            let block_number = MONITOR_SIZE + BLOCKS_PER_TRACK * users;
            let Ok(words) = self.dev.read_block_12bit(block_number) else {
                break;
            };
            if words[UFD_NEXT_POS] != 0o10 {
                continue;
            }
            if words[ENTRY_SIZE + UFD_EXT_PROTECTION_POS] & 0o7700 != 0 {
                continue;
            }
            if words[ENTRY_SIZE + UFD_RETRIEVAL_POINTER_POS] != 0o20 {
                continue;
            }
            if words[ENTRY_SIZE + ENTRY_SIZE] != 0 {
                continue;
            }
            return Ok((users, block_number));
        }
        Err(FsError::corrupt("no valid MFD found"))
    }

    fn read_words_track(&mut self, first_block_number: u64) -> Result<Vec<u16>> {
        let mut words = Vec::with_capacity(WORDS_PER_TRACK);
        for i in 0..BLOCKS_PER_TRACK {
            words.extend(self.dev.read_block_12bit(first_block_number + i)?);
        }
        Ok(words)
    }

    fn write_words_track(&mut self, first_block_number: u64, words: &[u16]) -> Result<()> {
        for i in 0..BLOCKS_PER_TRACK {
            let from = i as usize * WORDS_PER_BLOCK;
            self.dev
                .write_block_12bit(first_block_number + i, &words[from..from + WORDS_PER_BLOCK])?;
        }
        Ok(())
    }

    /// Disk blocks listed by a retrieval chain in a directory's words.
    fn retrieval_blocks(&self, words: &[u16], mut retrieval_pointer: usize) -> Result<Vec<u64>> {
        let mut blocks = Vec::new();
        let mut visited = Vec::new();
        while retrieval_pointer != 0 {
            if visited.contains(&retrieval_pointer) || retrieval_pointer + RETRIEVAL_SIZE > words.len() {
                return Err(FsError::corrupt("retrieval chain is damaged"));
            }
            visited.push(retrieval_pointer);
            let next = words[retrieval_pointer] as usize;
            for &segment in &words[retrieval_pointer + 1..retrieval_pointer + RETRIEVAL_SIZE] {
                if segment != 0 {
                    blocks.push(segment as u64 - 1 + self.mfd_block);
                }
            }
            retrieval_pointer = next;
        }
        Ok(blocks)
    }

    fn read_mfd(&mut self) -> Result<(Vec<u16>, Vec<MfdEntry>)> {
        let words = self.read_words_track(self.mfd_block)?;
        let mut entries = Vec::new();
        let mut position = 0;
        loop {
            let entry = MfdEntry::read(&words, position);
            let next = entry.next;
            entries.push(entry);
            if next == 0 || next >= words.len() {
                break;
            }
            position = next;
        }
        Ok((words, entries))
    }

    fn write_mfd(&mut self, words: &[u16]) -> Result<()> {
        let mfd_block = self.mfd_block;
        self.write_words_track(mfd_block, words)
    }

    /// Read a directory file (the UFD) through its MFD retrieval chain.
    fn read_ufd(&mut self, mfd_words: &[u16], mfd_entry: &MfdEntry) -> Result<(Vec<u16>, Vec<UfdEntry>)> {
        let blocks = self.retrieval_blocks(mfd_words, mfd_entry.retrieval_pointer)?;
        let mut words = Vec::with_capacity(blocks.len() * WORDS_PER_BLOCK);
        for block in blocks {
            words.extend(self.dev.read_block_12bit(block)?);
        }
        let mut entries = Vec::new();
        let mut position = 0;
        loop {
            if position + ENTRY_SIZE > words.len() {
                break;
            }
            let entry = UfdEntry::read(&words, position, mfd_entry.ppn);
            let next = entry.next;
            entries.push(entry);
            if next == 0 || next >= words.len() {
                break;
            }
            position = next;
        }
        Ok((words, entries))
    }

    fn write_ufd(&mut self, mfd_words: &[u16], mfd_entry: &MfdEntry, words: &[u16]) -> Result<()> {
        let blocks = self.retrieval_blocks(mfd_words, mfd_entry.retrieval_pointer)?;
        for (i, block) in blocks.into_iter().enumerate() {
            let from = i * WORDS_PER_BLOCK;
            if from >= words.len() {
                break;
            }
            let mut chunk = words[from..(from + WORDS_PER_BLOCK).min(words.len())].to_vec();
            chunk.resize(WORDS_PER_BLOCK, 0);
            self.dev.write_block_12bit(block, &chunk)?;
        }
        Ok(())
    }

    /// 8-word slots of a directory that are neither entries nor retrieval
    /// blocks.
    fn free_directory_slots(words: &[u16], entries: &[impl DirSlot]) -> Vec<usize> {
        let mut used = Vec::new();
        for entry in entries {
            used.push(entry.position());
            let mut retrieval_pointer = entry.retrieval_pointer();
            while retrieval_pointer != 0 && retrieval_pointer < words.len() {
                if used.contains(&retrieval_pointer) {
                    break;
                }
                used.push(retrieval_pointer);
                retrieval_pointer = words[retrieval_pointer] as usize;
            }
        }
        (0..words.len())
            .step_by(ENTRY_SIZE)
            .filter(|p| !used.contains(p))
            .collect()
    }

    /// Release every block of a retrieval chain and zero the chain.
    fn free_retrieval_blocks(
        &mut self,
        words: &mut [u16],
        mut retrieval_pointer: usize,
    ) -> Result<()> {
        let mut sat = StorageAllocationTable::read(self)?;
        while retrieval_pointer != 0 && retrieval_pointer + RETRIEVAL_SIZE <= words.len() {
            let next = words[retrieval_pointer] as usize;
            for i in retrieval_pointer + 1..retrieval_pointer + RETRIEVAL_SIZE {
                if words[i] != 0 {
                    sat.set_free(words[i] as usize);
                }
            }
            words[retrieval_pointer..retrieval_pointer + RETRIEVAL_SIZE].fill(0);
            if next == retrieval_pointer {
                break;
            }
            retrieval_pointer = next;
        }
        sat.write(self)
    }

    /// Grow a retrieval chain by `extend` blocks, appending descriptors
    /// from the free directory slots as needed.
    fn extend_retrieval_blocks(
        &mut self,
        words: &mut [u16],
        retrieval_pointer: usize,
        extend: usize,
        free_slots: &mut Vec<usize>,
    ) -> Result<()> {
        let mut sat = StorageAllocationTable::read(self)?;
        let mut allocated = sat.allocate(extend)?;
        allocated.reverse();
        let mut pointer = retrieval_pointer;
        while !allocated.is_empty() {
            let next = words[pointer] as usize;
            for i in pointer + 1..pointer + RETRIEVAL_SIZE {
                if words[i] == 0 {
                    if let Some(block) = allocated.pop() {
                        words[i] = block as u16;
                    }
                    if allocated.is_empty() {
                        break;
                    }
                }
            }
            if !allocated.is_empty() && next == 0 {
                let new_pointer = free_slots
                    .first()
                    .copied()
                    .ok_or_else(|| FsError::NoSpace("directory is full".to_string()))?;
                free_slots.remove(0);
                words[pointer] = new_pointer as u16;
                words[new_pointer..new_pointer + RETRIEVAL_SIZE].fill(0);
                pointer = new_pointer;
            } else if !allocated.is_empty() {
                pointer = next;
            }
        }
        sat.write(self)
    }

    /// Shrink a retrieval chain to `keep` blocks.
    fn reduce_retrieval_blocks(
        &mut self,
        words: &mut [u16],
        mut retrieval_pointer: usize,
        mut keep: usize,
    ) -> Result<()> {
        let mut sat = StorageAllocationTable::read(self)?;
        while retrieval_pointer != 0 && retrieval_pointer + RETRIEVAL_SIZE <= words.len() {
            let next = words[retrieval_pointer] as usize;
            for i in retrieval_pointer + 1..retrieval_pointer + RETRIEVAL_SIZE {
                if words[i] != 0 {
                    if keep == 0 {
                        sat.set_free(words[i] as usize);
                        words[i] = 0;
                    } else {
                        keep -= 1;
                    }
                }
            }
            retrieval_pointer = next;
        }
        sat.write(self)
    }

    fn locate(&mut self, path: &str) -> Result<UfdEntry> {
        let (ppn, basename) = split_fullname(self.ppn, Some(path), false);
        let basename = basename.ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let (mfd_words, mfd_entries) = self.read_mfd()?;
        for mfd_entry in mfd_entries.iter().filter(|e| !e.is_dummy()) {
            if !ppn.matches(mfd_entry.ppn) {
                continue;
            }
            let (_, entries) = self.read_ufd(&mfd_words, mfd_entry)?;
            for entry in entries {
                if !entry.is_dummy() && entry.basename() == basename {
                    return Ok(entry);
                }
            }
        }
        Err(FsError::NotFound(path.to_string()))
    }

    fn entry_blocks(&mut self, entry: &UfdEntry) -> Result<Vec<u64>> {
        let (mfd_words, mfd_entries) = self.read_mfd()?;
        let mfd_entry = mfd_entries
            .iter()
            .find(|e| !e.is_dummy() && e.ppn == entry.ppn)
            .ok_or_else(|| FsError::NotFound(entry.ppn.to_string()))?
            .clone();
        let (ufd_words, _) = self.read_ufd(&mfd_words, &mfd_entry)?;
        self.retrieval_blocks(&ufd_words, entry.retrieval_pointer)
    }

    fn default_mode(extension: &str) -> FileMode {
        if BINARY_EXTENSIONS.contains(&extension) {
            FileMode::Image
        } else {
            FileMode::Ascii
        }
    }

    pub fn free_blocks(&mut self) -> Result<u64> {
        Ok(StorageAllocationTable::read(self)?.free())
    }

    fn create_tss8_file(
        &mut self,
        path: &str,
        number_of_blocks: u64,
        creation_date: Option<NaiveDate>,
    ) -> Result<UfdEntry> {
        if self.dev.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        // Resize in place when the file exists.
        if let Ok(entry) = self.locate(path) {
            self.resize_entry(&entry, number_of_blocks)?;
            return self.locate(path);
        }
        let (ppn, basename) = split_fullname(self.ppn, Some(path), false);
        let basename =
            basename.ok_or_else(|| FsError::InvalidArg(format!("invalid filename: {}", path)))?;
        let (mfd_words, mfd_entries) = self.read_mfd()?;
        let mfd_entry = mfd_entries
            .iter()
            .find(|e| !e.is_dummy() && ppn.matches(e.ppn))
            .ok_or_else(|| {
                FsError::NotFound(format!("directory not found: {}", path))
            })?
            .clone();
        let (mut ufd_words, ufd_entries) = self.read_ufd(&mfd_words, &mfd_entry)?;
        let mut free_slots = Self::free_directory_slots(&ufd_words, &ufd_entries);
        if free_slots.len() < 2 {
            return Err(FsError::NoSpace("directory is full".to_string()));
        }
        let position = free_slots.remove(0);
        let retrieval_pointer = free_slots.remove(0);
        let (filename, extension) = basename
            .split_once('.')
            .map(|(n, e)| (n.to_string(), e.to_string()))
            .unwrap_or((basename.clone(), String::new()));
        let entry = UfdEntry {
            position,
            filename,
            extension_idx: extension_index(&extension),
            protection: DEFAULT_PROTECTION_CODE,
            next: 0,
            length: number_of_blocks,
            raw_creation_date: date_to_tss8(
                creation_date.or_else(|| Some(Local::now().date_naive())),
            ),
            retrieval_pointer,
            ppn: mfd_entry.ppn,
        };
        ufd_words[position..position + ENTRY_SIZE].copy_from_slice(&entry.to_words());
        // Link after the last entry
        let last = ufd_entries.last().expect("dummy entry exists").clone();
        let mut last_words: [u16; ENTRY_SIZE] =
            ufd_words[last.position..last.position + ENTRY_SIZE]
                .try_into()
                .expect("entry size");
        last_words[UFD_NEXT_POS] = position as u16;
        ufd_words[last.position..last.position + ENTRY_SIZE].copy_from_slice(&last_words);
        // Fresh retrieval block
        ufd_words[retrieval_pointer..retrieval_pointer + RETRIEVAL_SIZE].fill(0);
        self.extend_retrieval_blocks(
            &mut ufd_words,
            retrieval_pointer,
            number_of_blocks as usize,
            &mut free_slots,
        )?;
        self.write_ufd(&mfd_words, &mfd_entry, &ufd_words)?;
        self.locate(path)
    }

    fn resize_entry(&mut self, entry: &UfdEntry, number_of_blocks: u64) -> Result<()> {
        let (mfd_words, mfd_entries) = self.read_mfd()?;
        let mfd_entry = mfd_entries
            .iter()
            .find(|e| !e.is_dummy() && e.ppn == entry.ppn)
            .ok_or_else(|| FsError::NotFound(entry.ppn.to_string()))?
            .clone();
        let (mut ufd_words, ufd_entries) = self.read_ufd(&mfd_words, &mfd_entry)?;
        let current = self
            .retrieval_blocks(&ufd_words, entry.retrieval_pointer)?
            .len() as u64;
        if number_of_blocks < current {
            self.reduce_retrieval_blocks(
                &mut ufd_words,
                entry.retrieval_pointer,
                number_of_blocks as usize,
            )?;
        } else if number_of_blocks > current {
            let mut free_slots = Self::free_directory_slots(&ufd_words, &ufd_entries);
            self.extend_retrieval_blocks(
                &mut ufd_words,
                entry.retrieval_pointer,
                (number_of_blocks - current) as usize,
                &mut free_slots,
            )?;
        }
        let mut entry_words: [u16; ENTRY_SIZE] = ufd_words
            [entry.position..entry.position + ENTRY_SIZE]
            .try_into()
            .expect("entry size");
        entry_words[UFD_FILE_SIZE_POS] = number_of_blocks as u16;
        ufd_words[entry.position..entry.position + ENTRY_SIZE].copy_from_slice(&entry_words);
        self.write_ufd(&mfd_words, &mfd_entry, &ufd_words)
    }

    /// Write an empty TSS/8 volume: SAT, MFD with the system accounts.
    pub fn initialize(&mut self) -> Result<()> {
        self.users = 20;
        self.mfd_block = MONITOR_SIZE + BLOCKS_PER_TRACK * self.users;
        let total_blocks = self.dev.size()? / BLOCK_SIZE as u64;

        let mut sat = StorageAllocationTable::read(self)?;
        // The MFD track maps to SAT bits 0..=16.
        for i in 0..=BLOCKS_PER_TRACK as usize {
            sat.set_used(i);
        }
        // Bits past the end of the disk.
        let last = (total_blocks.saturating_sub(self.mfd_block) + 1) as usize;
        for i in last.min(sat.total_bits())..sat.total_bits() {
            sat.set_used(i);
        }
        sat.write(self)?;

        // The dummy MFD anchor
        self.write_mfd(&vec![0u16; WORDS_PER_TRACK])?;
        for (ppn, password) in [
            (Ppn::new(0, 1), "SYSTEM"),
            (Ppn::new(0, 2), "LIBRARY"),
            (Ppn::new(0, 3), "OPERATOR"),
        ] {
            self.create_ufd(ppn, password)?;
        }
        Ok(())
    }

    /// Allocate a new MFD entry and a one-block UFD seed for a PPN.
    fn create_ufd(&mut self, ppn: Ppn, password: &str) -> Result<()> {
        let (mut mfd_words, mfd_entries) = self.read_mfd()?;
        if mfd_entries.iter().any(|e| !e.is_dummy() && e.ppn == ppn) {
            return Err(FsError::InvalidArg(format!(
                "directory already exists: {}",
                ppn
            )));
        }
        let mut sat = StorageAllocationTable::read(self)?;
        let mut free_slots = Self::free_directory_slots(&mfd_words, &mfd_entries);
        if free_slots.len() < 2 {
            return Err(FsError::NoSpace("MFD is full".to_string()));
        }
        let position = free_slots.remove(0);
        let retrieval_pointer = free_slots.remove(0);
        let entry = MfdEntry {
            position,
            ppn,
            password: password.to_string(),
            next: 0,
            quota: 0,
            device_time: 0,
            cpu_time: 0,
            retrieval_pointer,
        };
        mfd_words[position..position + ENTRY_SIZE].copy_from_slice(&entry.to_words());
        // Link after the last entry
        let last = mfd_entries.last().expect("dummy entry exists").clone();
        let mut last_words: [u16; ENTRY_SIZE] = mfd_words
            [last.position..last.position + ENTRY_SIZE]
            .try_into()
            .expect("entry size");
        last_words[MFD_NEXT_POS] = position as u16;
        mfd_words[last.position..last.position + ENTRY_SIZE].copy_from_slice(&last_words);
        // One-block UFD seed
        let block = sat.allocate_one()?;
        mfd_words[retrieval_pointer..retrieval_pointer + RETRIEVAL_SIZE].fill(0);
        mfd_words[retrieval_pointer + 1] = block as u16;
        let ufd_block = block as u64 - 1 + self.mfd_block;
        self.dev
            .write_block_12bit(ufd_block, &[0u16; WORDS_PER_BLOCK])?;
        self.write_mfd(&mfd_words)?;
        sat.write(self)
    }
}

/// Position and retrieval pointer of a directory entry of either level.
trait DirSlot {
    fn position(&self) -> usize;
    fn retrieval_pointer(&self) -> usize;
}

impl DirSlot for MfdEntry {
    fn position(&self) -> usize {
        self.position
    }
    fn retrieval_pointer(&self) -> usize {
        self.retrieval_pointer
    }
}

impl DirSlot for UfdEntry {
    fn position(&self) -> usize {
        self.position
    }
    fn retrieval_pointer(&self) -> usize {
        self.retrieval_pointer
    }
}

impl Filesystem for Tss8Fs {
    fn fs_name(&self) -> &'static str {
        "tss8"
    }

    fn fs_description(&self) -> &'static str {
        "PDP-8 TSS/8"
    }

    fn size(&mut self) -> Result<u64> {
        self.dev.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        let ppn = PpnPattern::exact(self.ppn);
        let (mfd_words, mfd_entries) = self.read_mfd()?;
        let mut result = Vec::new();
        for mfd_entry in mfd_entries.iter().filter(|e| !e.is_dummy()) {
            if !ppn.matches(mfd_entry.ppn) {
                continue;
            }
            let (_, entries) = self.read_ufd(&mfd_words, mfd_entry)?;
            result.extend(
                entries
                    .iter()
                    .filter(|e| !e.is_dummy())
                    .map(UfdEntry::to_file_entry),
            );
        }
        Ok(result)
    }

    fn filter_entries(
        &mut self,
        pattern: Option<&str>,
        _include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<FileEntry>> {
        let (ppn, name) = split_fullname(self.ppn, pattern, wildcard);
        let (mfd_words, mfd_entries) = self.read_mfd()?;
        let mut result = Vec::new();
        for mfd_entry in mfd_entries.iter().filter(|e| !e.is_dummy()) {
            if !ppn.matches(mfd_entry.ppn) {
                continue;
            }
            let (_, entries) = self.read_ufd(&mfd_words, mfd_entry)?;
            for entry in entries.iter().filter(|e| !e.is_dummy()) {
                if filename_match(&entry.basename(), name.as_deref(), wildcard) {
                    result.push(entry.to_file_entry());
                }
            }
        }
        Ok(result)
    }

    fn entry(&mut self, path: &str) -> Result<FileEntry> {
        self.locate(path).map(|e| e.to_file_entry())
    }

    fn read_bytes(&mut self, path: &str, mode: Option<FileMode>) -> Result<Vec<u8>> {
        let entry = self.locate(path)?;
        let mode = mode.unwrap_or_else(|| Self::default_mode(entry.extension()));
        let blocks = self.entry_blocks(&entry)?;
        let mut data = Vec::with_capacity(blocks.len() * TSS8_BLOCK_SIZE_BYTES);
        for block in blocks.into_iter().take(entry.length as usize) {
            let words = self.dev.read_block_12bit(block)?;
            data.extend(words_to_bytes(&words, mode));
        }
        Ok(data)
    }

    fn write_bytes(
        &mut self,
        path: &str,
        data: &[u8],
        creation_date: Option<NaiveDate>,
        _file_type: Option<&str>,
        mode: Option<FileMode>,
    ) -> Result<()> {
        let number_of_blocks = (data.len() as u64).div_ceil(TSS8_BLOCK_SIZE_BYTES as u64);
        let entry = self.create_tss8_file(path, number_of_blocks.max(1), creation_date)?;
        let mode = mode.unwrap_or_else(|| Self::default_mode(entry.extension()));
        let blocks = self.entry_blocks(&entry)?;
        let mut padded = data.to_vec();
        padded.resize(blocks.len() * TSS8_BLOCK_SIZE_BYTES, 0);
        let words = bytes_to_words(&padded, mode);
        for (i, block) in blocks.into_iter().enumerate() {
            let mut chunk = words
                .get(i * WORDS_PER_BLOCK..((i + 1) * WORDS_PER_BLOCK).min(words.len()))
                .unwrap_or(&[])
                .to_vec();
            chunk.resize(WORDS_PER_BLOCK, 0);
            self.dev.write_block_12bit(block, &chunk)?;
        }
        Ok(())
    }

    fn create_file(
        &mut self,
        path: &str,
        blocks: u64,
        creation_date: Option<NaiveDate>,
        _file_type: Option<&str>,
    ) -> Result<FileEntry> {
        self.create_tss8_file(path, blocks.max(1), creation_date)
            .map(|e| e.to_file_entry())
    }

    fn create_directory(&mut self, path: &str) -> Result<()> {
        if self.dev.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let ppn = PpnPattern::parse(path)
            .and_then(|p| p.as_exact())
            .ok_or_else(|| FsError::InvalidArg(format!("invalid PPN: {}", path)))?;
        self.create_ufd(ppn, "")
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if self.dev.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let entry = self.locate(path)?;
        let (mfd_words, mfd_entries) = self.read_mfd()?;
        let mfd_entry = mfd_entries
            .iter()
            .find(|e| !e.is_dummy() && e.ppn == entry.ppn)
            .ok_or_else(|| FsError::NotFound(entry.ppn.to_string()))?
            .clone();
        let (mut ufd_words, ufd_entries) = self.read_ufd(&mfd_words, &mfd_entry)?;
        let index = ufd_entries
            .iter()
            .position(|e| e.position == entry.position)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let prev = &ufd_entries[index.saturating_sub(1)];
        let mut prev_words: [u16; ENTRY_SIZE] = ufd_words
            [prev.position..prev.position + ENTRY_SIZE]
            .try_into()
            .expect("entry size");
        prev_words[UFD_NEXT_POS] = entry.next as u16;
        ufd_words[prev.position..prev.position + ENTRY_SIZE].copy_from_slice(&prev_words);
        ufd_words[entry.position..entry.position + ENTRY_SIZE].fill(0);
        self.free_retrieval_blocks(&mut ufd_words, entry.retrieval_pointer)?;
        self.write_ufd(&mfd_words, &mfd_entry, &ufd_words)
    }

    fn chdir(&mut self, path: &str) -> bool {
        match PpnPattern::parse(path).and_then(|p| p.as_exact()) {
            Some(ppn) => {
                self.ppn = ppn;
                true
            }
            None => false,
        }
    }

    fn pwd(&self) -> String {
        self.ppn.to_string()
    }

    fn dir(
        &mut self,
        _volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        let (ppn, name) = split_fullname(self.ppn, pattern, true);
        if options.uic || ppn.as_exact() == Some(MFD_PPN) {
            if !options.brief {
                let dt = Local::now().format("%d-%b-%y  %H:%M:%S").to_string().to_uppercase();
                writeln!(out, "SYSTEM ACCOUNT    {}\n", dt).map_err(FsError::Io)?;
                writeln!(out, " PASSWORD    CPU        DEV     DISK  QUOTA\n")
                    .map_err(FsError::Io)?;
            }
            let (mfd_words, mfd_entries) = self.read_mfd()?;
            for mfd_entry in mfd_entries.iter().filter(|e| !e.is_dummy()) {
                if options.brief {
                    writeln!(out, "{}", mfd_entry.ppn).map_err(FsError::Io)?;
                } else {
                    let (_, entries) = self.read_ufd(&mfd_words, mfd_entry)?;
                    let disk_usage: u64 = entries
                        .iter()
                        .filter(|e| !e.is_dummy())
                        .map(|e| e.length)
                        .sum();
                    writeln!(
                        out,
                        "{:>4o} {:4}  {}  {} {:>5}  {:>5}",
                        mfd_entry.ppn.to_word(),
                        mfd_entry.password,
                        format_time(mfd_entry.cpu_time as u64 * 64 / 10),
                        format_time(mfd_entry.device_time as u64 * 512 / 10),
                        disk_usage,
                        mfd_entry.quota
                    )
                    .map_err(FsError::Io)?;
                }
            }
            return Ok(());
        }
        let mut blocks = 0u64;
        if !options.brief {
            let dt = Local::now().format("%d-%b-%y").to_string().to_uppercase();
            let group = ppn.group.unwrap_or(0);
            let user = ppn.user.unwrap_or(0);
            writeln!(
                out,
                "DISK FILES FOR USER {:2o},{:2o} ON  {:>9}\n",
                group, user, dt
            )
            .map_err(FsError::Io)?;
            writeln!(out, "NAME      SIZE  PROT    DATE").map_err(FsError::Io)?;
        }
        let (mfd_words, mfd_entries) = self.read_mfd()?;
        for mfd_entry in mfd_entries.iter().filter(|e| !e.is_dummy()) {
            if !ppn.matches(mfd_entry.ppn) {
                continue;
            }
            let (_, entries) = self.read_ufd(&mfd_words, mfd_entry)?;
            for entry in entries.iter().filter(|e| !e.is_dummy()) {
                if !filename_match(&entry.basename(), name.as_deref(), true) {
                    continue;
                }
                if options.brief {
                    writeln!(out, "{}", entry.basename()).map_err(FsError::Io)?;
                } else {
                    let dt = entry
                        .creation_date()
                        .map(|d| d.format("%d-%b-%y").to_string().to_uppercase())
                        .unwrap_or_default();
                    blocks += entry.length;
                    writeln!(
                        out,
                        "{:<6}.{:<3} {:>3}   {:2o}  {:>9}",
                        entry.filename,
                        entry.extension(),
                        entry.length,
                        entry.protection,
                        dt
                    )
                    .map_err(FsError::Io)?;
                }
            }
        }
        if !options.brief {
            writeln!(out, "\nTOTAL DISK SEGMENTS:  {:<6}", blocks).map_err(FsError::Io)?;
        }
        Ok(())
    }

    fn examine(
        &mut self,
        arg: Option<&str>,
        options: &ExamineOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        if options.bitmap {
            let sat = StorageAllocationTable::read(self)?;
            for i in 0..sat.total_bits() {
                write!(
                    out,
                    "{:>4} {}  ",
                    i,
                    if sat.is_free(i) { "[ ]" } else { "[X]" }
                )
                .map_err(FsError::Io)?;
                if i % 16 == 15 {
                    writeln!(out).map_err(FsError::Io)?;
                }
            }
            writeln!(out, "\nLEFT: {:<6} USED: {:<6}", sat.free(), sat.used())
                .map_err(FsError::Io)?;
            return Ok(());
        }
        if let Some(arg) = arg {
            writeln!(
                out,
                "PPN         Basename     Prt  Creation        Pos   Next    Ret Length"
            )
            .map_err(FsError::Io)?;
            writeln!(
                out,
                "---         --------     ---  --------        ---   ----    --- ------"
            )
            .map_err(FsError::Io)?;
            for file_entry in self.filter_entries(Some(arg), false, true)? {
                writeln!(
                    out,
                    "{:<24} {:>6}",
                    file_entry.fullname, file_entry.blocks
                )
                .map_err(FsError::Io)?;
            }
            return Ok(());
        }
        writeln!(out, "Number of users:          {}\n", self.users).map_err(FsError::Io)?;
        writeln!(out, "PPN         Password  Next Quota  Dev   CPU  Retrieval")
            .map_err(FsError::Io)?;
        writeln!(out, "                                  Time  Time Pointer").map_err(FsError::Io)?;
        writeln!(out, "---------   --------  ---- -----  ----  ---- ---------")
            .map_err(FsError::Io)?;
        let (_, mfd_entries) = self.read_mfd()?;
        for entry in mfd_entries.iter().filter(|e| !e.is_dummy()) {
            writeln!(
                out,
                "{:<11} {:8} {:>5}  {:>4}  {:>4}  {:>4}  {:>4}",
                entry.ppn.to_string(),
                entry.password,
                entry.next,
                entry.quota,
                entry.device_time,
                entry.cpu_time,
                entry.retrieval_pointer
            )
            .map_err(FsError::Io)?;
        }
        Ok(())
    }

    fn dump(
        &mut self,
        path: Option<&str>,
        start: Option<u64>,
        end: Option<u64>,
        out: &mut dyn Write,
    ) -> Result<()> {
        let blocks: Vec<u64> = match path {
            Some(path) => {
                let entry = self.locate(path)?;
                let blocks = self.entry_blocks(&entry)?;
                let start = start.unwrap_or(0) as usize;
                let end = end
                    .map(|e| e as usize)
                    .unwrap_or(blocks.len().saturating_sub(1))
                    .min(blocks.len().saturating_sub(1));
                blocks.get(start..=end).unwrap_or(&[]).to_vec()
            }
            None => {
                let start_block = start.unwrap_or(0);
                let end = match end {
                    Some(end) => end,
                    None if start.is_none() => self.size()? / BLOCK_SIZE as u64 - 1,
                    None => start_block,
                };
                (start_block..=end).collect()
            }
        };
        for (i, block) in blocks.iter().enumerate() {
            let words = self.dev.read_block_12bit(*block)?;
            writeln!(out, "\nBLOCK NUMBER   {:08}", i).map_err(FsError::Io)?;
            oct_dump(out, &words).map_err(FsError::Io)?;
        }
        Ok(())
    }

    fn file_types(&self) -> Vec<String> {
        EXTENSIONS
            .iter()
            .filter(|e| !e.is_empty())
            .map(|e| e.to_string())
            .collect()
    }

    fn flush(&mut self) -> Result<()> {
        self.dev.flush().map_err(FsError::from)
    }

    fn close(&mut self) -> Result<()> {
        self.dev.close().map_err(FsError::from)
    }
}

fn format_time(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn new_fs() -> Tss8Fs {
        // Monitor + FIP + swapping for 20 users + file area
        let blocks = MONITOR_SIZE + BLOCKS_PER_TRACK * 20 + 1000;
        let file = ByteFile::with_size(blocks as usize * BLOCK_SIZE);
        let mut fs = Tss8Fs {
            dev: WordBlockDevice::new(file).unwrap(),
            users: 0,
            mfd_block: 0,
            ppn: Ppn::new(0, 1),
        };
        fs.initialize().unwrap();
        fs
    }

    #[test]
    fn test_initialize_and_remount() {
        let fs = new_fs();
        let image = fs.dev.into_file().into_vec();
        let mut fs = Tss8Fs::mount(ByteFile::from_vec(image)).unwrap();
        assert_eq!(fs.users, 20);
        let (_, entries) = fs.read_mfd().unwrap();
        let ppns: Vec<String> = entries
            .iter()
            .filter(|e| !e.is_dummy())
            .map(|e| e.ppn.to_string())
            .collect();
        assert_eq!(ppns, vec!["[0,1]", "[0,2]", "[0,3]"]);
        // Passwords are stored in two 6-bit words, four characters.
        assert_eq!(
            entries.iter().find(|e| e.ppn == Ppn::new(0, 1) && !e.is_dummy()).unwrap().password,
            "SYST"
        );
    }

    #[test]
    fn test_write_read_roundtrip() {
        let mut fs = new_fs();
        fs.ppn = Ppn::new(0, 2);
        let content = b"HELLO TSS8 TIMESHARING\n".repeat(30);
        fs.write_bytes("HELLO.ASC", &content, None, None, None).unwrap();
        let data = fs.read_bytes("HELLO.ASC", None).unwrap();
        assert_eq!(&data[..content.len()], &content[..]);
    }

    #[test]
    fn test_image_mode_binary_extension() {
        let mut fs = new_fs();
        fs.ppn = Ppn::new(0, 2);
        let content: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        fs.write_bytes("CORE.SAV", &content, None, None, None).unwrap();
        let data = fs.read_bytes("CORE.SAV", None).unwrap();
        assert_eq!(&data[..content.len()], &content[..]);
    }

    #[test]
    fn test_delete_releases_sat_blocks() {
        let mut fs = new_fs();
        fs.ppn = Ppn::new(0, 2);
        fs.write_bytes("A.DAT", &[1u8; 1000], None, None, None).unwrap();
        let entry = fs.entry("A.DAT").unwrap();
        let free = fs.free_blocks().unwrap();
        fs.delete("A.DAT").unwrap();
        assert_eq!(fs.free_blocks().unwrap(), free + entry.blocks);
        assert!(fs.entry("A.DAT").is_err());
    }

    #[test]
    fn test_create_directory_and_file_in_it() {
        let mut fs = new_fs();
        fs.create_directory("[10,20]").unwrap();
        fs.ppn = Ppn::new(0o10, 0o20);
        fs.write_bytes("X.ASC", b"IN A NEW PPN", None, None, None).unwrap();
        let entry = fs.entry("[10,20]X.ASC").unwrap();
        assert_eq!(entry.fullname, "[10,20]X.ASC");
        // Creating the same PPN again fails
        assert!(fs.create_directory("[10,20]").is_err());
    }

    #[test]
    fn test_ppn_isolation() {
        let mut fs = new_fs();
        fs.ppn = Ppn::new(0, 2);
        fs.write_bytes("MINE.ASC", b"DATA", None, None, None).unwrap();
        fs.ppn = Ppn::new(0, 3);
        assert!(fs.entry("MINE.ASC").is_err());
        assert!(fs.entry("[0,2]MINE.ASC").is_ok());
    }

    #[test]
    fn test_resize_on_overwrite() {
        let mut fs = new_fs();
        fs.ppn = Ppn::new(0, 2);
        fs.write_bytes("R.DAT", &[1u8; 2000], None, None, None).unwrap();
        let before = fs.entry("R.DAT").unwrap().blocks;
        fs.write_bytes("R.DAT", &[2u8; 400], None, None, None).unwrap();
        let after = fs.entry("R.DAT").unwrap().blocks;
        assert!(after < before);
        let data = fs.read_bytes("R.DAT", None).unwrap();
        assert_eq!(&data[..400], &[2u8; 400][..]);
    }
}
