//! SOLO filesystem driver (Brinch Hansen, 1976).
//!
//! A fixed 4800-block disk: kernel and two OS segments at fixed addresses,
//! a two-block free bitmap at 152, the catalog page index at 154. Files
//! are looked up through a multiplicative filename hash into one of
//! fifteen catalog pages; each entry points at a page map listing the
//! file's (sparsely allocated) data blocks.

use std::io::Write;

use bytemuck::{Pod, Zeroable};
use chrono::NaiveDate;
use strata_common::{FileMode, bytes_to_word, filename_match, word_to_bytes};
use strata_core::{
    DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result,
};
use strata_io::{BLOCK_SIZE, BlockDevice, ByteFile};

/// End of medium, the ASCII-file terminator.
const EM: u8 = 0x19;

pub const DISK_SIZE: u64 = 4800;
const ID_LENGTH: usize = 12;
const ENTRY_LENGTH: usize = 32;
/// Entries in a catalog page.
const CAT_PAGE_LENGTH: usize = BLOCK_SIZE / ENTRY_LENGTH;
/// Blocks covered by one bitmap group (15 bytes of bits).
const GROUP_LENGTH: u64 = 120;
const FREE_PAGE_GROUP_LENGTH: usize = 15;
const FREE_PAGE_GROUP_PAD: usize = 1;
/// Groups per bitmap block.
const FREE_PAGE_LENGTH: usize = 31;
const FREE_LIST_LENGTH: u64 = 2;
pub const MAX_FILE_SIZE: usize = 255;

const KERNEL_ADDR: u64 = 0;
const KERNEL_LENGTH: u64 = 24;
const SEGMENT_LENGTH: u64 = 64;
const SOLO_OS_ADDR: u64 = KERNEL_ADDR + KERNEL_LENGTH;
const OTHER_OS_ADDR: u64 = SOLO_OS_ADDR + SEGMENT_LENGTH;
const FREE_LIST_ADDR: u64 = OTHER_OS_ADDR + SEGMENT_LENGTH;
const CAT_ADDR: u64 = FREE_LIST_ADDR + FREE_LIST_LENGTH;

/// The three segment pseudo-files at fixed disk addresses.
const SEGMENTS: &[(u64, &str)] = &[
    (KERNEL_ADDR, "@KERNEL"),
    (SOLO_OS_ADDR, "@SOLO"),
    (OTHER_OS_ADDR, "@OTHEROS"),
];

pub const FILE_TYPE_EMPTY: u16 = 0;
pub const FILE_TYPE_SCRATCH: u16 = 1;
pub const FILE_TYPE_ASCII: u16 = 2;
pub const FILE_TYPE_SEQCODE: u16 = 3;
pub const FILE_TYPE_CONCODE: u16 = 4;

const FILE_TYPES: &[(u16, &str)] = &[
    (FILE_TYPE_EMPTY, "EMPTY"),
    (FILE_TYPE_SCRATCH, "SCRATCH"),
    (FILE_TYPE_ASCII, "ASCII"),
    (FILE_TYPE_SEQCODE, "SEQCODE"),
    (FILE_TYPE_CONCODE, "CONCODE"),
];

fn file_type_name(id: u16) -> &'static str {
    FILE_TYPES
        .iter()
        .find(|(t, _)| *t == id)
        .map(|&(_, name)| name)
        .unwrap_or("")
}

fn file_type_id(file_type: Option<&str>) -> Result<u16> {
    let Some(file_type) = file_type else {
        return Ok(FILE_TYPE_ASCII);
    };
    FILE_TYPES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(file_type))
        .map(|&(t, _)| t)
        .ok_or_else(|| {
            FsError::InvalidArg("invalid file type specified with option".to_string())
        })
}

/// The SOLO multiplicative filename hash; keys are 1-based over the whole
/// catalog.
pub fn filename_hash(filename: &str, catalog_length: usize) -> usize {
    let mut key = 1usize;
    for c in filename.chars().take(ID_LENGTH) {
        if c != ' ' {
            key = key * (c.to_ascii_uppercase() as usize) % (catalog_length * CAT_PAGE_LENGTH) + 1;
        }
    }
    key
}

/// Canonical SOLO name: alphanumerics only, uppercased, at most 12 chars.
/// A leading `@` survives when segments are in scope.
pub fn solo_canonical_filename(fullname: &str, wildcard: bool, segment: bool) -> String {
    let filtered: String = fullname
        .chars()
        .filter(|&c| c.is_alphanumeric() || (wildcard && c == '*'))
        .collect::<String>()
        .to_uppercase()
        .chars()
        .take(ID_LENGTH)
        .collect();
    if segment && fullname.starts_with('@') {
        format!("@{}", filtered)
    } else {
        filtered
    }
}

/// Trim an ASCII file at its end-of-medium marker.
fn solo_to_ascii(data: Vec<u8>) -> Vec<u8> {
    match data.iter().position(|&b| b == EM) {
        Some(pos) => data[..pos].to_vec(),
        None => {
            let end = data.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
            data[..end].to_vec()
        }
    }
}

fn ascii_to_solo(data: &[u8]) -> Vec<u8> {
    let mut data = data.to_vec();
    if data.last() != Some(&EM) {
        data.push(EM);
    }
    data
}

/// On-disk shape of a catalog entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawCatalogEntry {
    /// Filename, space padded ASCII.
    pub file_id: [u8; 12],
    /// Empty, scratch, ascii, seqcode or concode.
    pub file_type: [u8; 2],
    /// Page map block number.
    pub page_map: [u8; 2],
    /// Protected against accidental overwriting or deletion.
    pub protected: [u8; 2],
    pub spare: [u8; 10],
    /// Filename hash.
    pub hash_key: [u8; 2],
    /// Number of files with the same key.
    pub searchlength: [u8; 2],
}

/// A catalog entry, with its page map loaded.
#[derive(Debug, Clone)]
pub struct SoloEntry {
    pub filename: String,
    pub file_type_id: u16,
    pub page_map_block_number: u64,
    pub protected: bool,
    pub spare: [u8; 10],
    pub hash_key: u16,
    /// Count of files sharing this slot's hash.
    pub searchlength: u16,
    /// File block to disk block mapping.
    pub page_map: Vec<u64>,
    /// Catalog page block and slot the entry was read from.
    pub cat_block: u64,
    pub slot: usize,
}

impl SoloEntry {
    fn read(buffer: &[u8], position: usize, cat_block: u64, slot: usize) -> Self {
        let raw: &RawCatalogEntry =
            bytemuck::from_bytes(&buffer[position..position + ENTRY_LENGTH]);
        let filename = String::from_utf8_lossy(&raw.file_id)
            .trim_end_matches([' ', '\0'])
            .to_string();
        Self {
            filename,
            file_type_id: u16::from_le_bytes(raw.file_type),
            page_map_block_number: u16::from_le_bytes(raw.page_map) as u64,
            protected: u16::from_le_bytes(raw.protected) != 0,
            spare: raw.spare,
            hash_key: u16::from_le_bytes(raw.hash_key),
            searchlength: u16::from_le_bytes(raw.searchlength),
            page_map: Vec::new(),
            cat_block,
            slot,
        }
    }

    fn write_buffer(&self, buffer: &mut [u8], position: usize) {
        let mut raw = RawCatalogEntry::zeroed();
        let filename = format!("{:<width$}", self.filename, width = ID_LENGTH);
        raw.file_id.copy_from_slice(&filename.as_bytes()[..ID_LENGTH]);
        raw.file_type = self.file_type_id.to_le_bytes();
        raw.page_map = (self.page_map_block_number as u16).to_le_bytes();
        raw.protected = (self.protected as u16).to_le_bytes();
        raw.spare = self.spare;
        raw.hash_key = self.hash_key.to_le_bytes();
        raw.searchlength = self.searchlength.to_le_bytes();
        buffer[position..position + ENTRY_LENGTH].copy_from_slice(bytemuck::bytes_of(&raw));
    }

    pub fn is_empty(&self) -> bool {
        self.filename.is_empty()
    }

    /// File length in blocks.
    pub fn length(&self) -> u64 {
        self.page_map.len() as u64
    }

    fn to_file_entry(&self) -> FileEntry {
        let mut entry = FileEntry::new(self.filename.clone())
            .with_blocks(self.length(), BLOCK_SIZE)
            .with_type(file_type_name(self.file_type_id));
        entry.protected = self.protected;
        entry
    }
}

/// The free-block bitmap: 120-bit groups, fifteen bytes plus one pad each.
pub struct SoloBitmap {
    groups: Vec<u128>,
}

impl SoloBitmap {
    fn read(fs: &mut SoloFs) -> Result<Self> {
        let mut groups = Vec::with_capacity(FREE_PAGE_LENGTH * FREE_LIST_LENGTH as usize);
        for block_number in FREE_LIST_ADDR..FREE_LIST_ADDR + FREE_LIST_LENGTH {
            let t = fs.read_block(block_number, 1)?;
            for i in 0..FREE_PAGE_LENGTH {
                let position = i * (FREE_PAGE_GROUP_LENGTH + FREE_PAGE_GROUP_PAD);
                let mut group = 0u128;
                for &byte in &t[position..position + FREE_PAGE_GROUP_LENGTH] {
                    group = (group << 8) | byte as u128;
                }
                groups.push(group);
            }
        }
        Ok(Self { groups })
    }

    fn write(&self, fs: &mut SoloFs) -> Result<()> {
        let free = self.free();
        let first_free_block = self.find_first_free();
        let mut remaining = self.groups.iter();
        for block_number in FREE_LIST_ADDR..FREE_LIST_ADDR + FREE_LIST_LENGTH {
            let mut t = vec![0u8; BLOCK_SIZE];
            for i in 0..FREE_PAGE_LENGTH {
                let position = i * (FREE_PAGE_GROUP_LENGTH + FREE_PAGE_GROUP_PAD);
                let group = remaining.next().copied().unwrap_or(0);
                for j in 0..FREE_PAGE_GROUP_LENGTH {
                    t[position + j] =
                        (group >> (8 * (FREE_PAGE_GROUP_LENGTH - 1 - j))) as u8;
                }
            }
            // Trailer: number of free blocks and first free block.
            let misc = BLOCK_SIZE - 16;
            t[misc..misc + 2].copy_from_slice(&word_to_bytes(free as u16));
            t[misc + 2..misc + 4].copy_from_slice(&word_to_bytes(first_free_block as u16));
            fs.write_block(&t, block_number, 1)?;
        }
        Ok(())
    }

    pub fn is_free(&self, block_number: u64) -> bool {
        let group = (block_number / GROUP_LENGTH) as usize;
        let bit = block_number % GROUP_LENGTH;
        self.groups[group] & (1 << bit) != 0
    }

    pub fn set_free(&mut self, block_number: u64) {
        let group = (block_number / GROUP_LENGTH) as usize;
        let bit = block_number % GROUP_LENGTH;
        self.groups[group] |= 1 << bit;
    }

    pub fn set_used(&mut self, block_number: u64) {
        let group = (block_number / GROUP_LENGTH) as usize;
        let bit = block_number % GROUP_LENGTH;
        self.groups[group] &= !(1 << bit);
    }

    /// Claim `size` free blocks, lowest first.
    fn allocate(&mut self, size: usize) -> Result<Vec<u64>> {
        let mut blocks = Vec::with_capacity(size);
        for block in 0..DISK_SIZE {
            if self.is_free(block) {
                self.set_used(block);
                blocks.push(block);
                if blocks.len() == size {
                    break;
                }
            }
        }
        if blocks.len() < size {
            return Err(FsError::NoSpace("solo volume is full".to_string()));
        }
        Ok(blocks)
    }

    fn find_first_free(&self) -> u64 {
        (0..DISK_SIZE)
            .find(|&block| self.is_free(block))
            .unwrap_or(DISK_SIZE)
    }

    pub fn free(&self) -> u64 {
        self.groups
            .iter()
            .enumerate()
            .filter(|(i, _)| (*i as u64) * GROUP_LENGTH < DISK_SIZE)
            .map(|(_, g)| g.count_ones() as u64)
            .sum()
    }
}

/// SOLO filesystem over a block device.
pub struct SoloFs {
    dev: BlockDevice,
    /// Catalog pages (always 15 on a valid disk).
    pub catalog_length: usize,
}

impl SoloFs {
    /// Open an image without validating the catalog, for `initialize`.
    pub fn open_uninitialized(file: ByteFile) -> Result<Self> {
        Ok(Self {
            dev: BlockDevice::new(file)?,
            catalog_length: 15,
        })
    }

    pub fn mount(file: ByteFile) -> Result<Self> {
        let dev = BlockDevice::new(file)?;
        let mut fs = Self {
            dev,
            catalog_length: 0,
        };
        let buffer = fs.read_block(CAT_ADDR, 1)?;
        fs.catalog_length = bytes_to_word(&buffer, 0) as usize;
        if fs.catalog_length != 15 {
            return Err(FsError::corrupt("invalid catalog length"));
        }
        Ok(fs)
    }

    pub fn read_block(&mut self, block_number: u64, count: usize) -> Result<Vec<u8>> {
        self.dev.read_block(block_number, count).map_err(FsError::from)
    }

    pub fn write_block(&mut self, buffer: &[u8], block_number: u64, count: usize) -> Result<()> {
        self.dev
            .write_block(buffer, block_number, count)
            .map_err(FsError::from)
    }

    /// A page map block: a length word followed by that many block numbers.
    pub fn read_page_map(&mut self, block_number: u64) -> Result<Vec<u64>> {
        let buffer = self.read_block(block_number, 1)?;
        let length = (bytes_to_word(&buffer, 0) as usize).min(MAX_FILE_SIZE);
        Ok((0..length)
            .map(|i| bytes_to_word(&buffer, 2 + i * 2) as u64)
            .collect())
    }

    pub fn write_page_map(&mut self, page_map: &[u64], block_number: u64) -> Result<()> {
        if page_map.len() > MAX_FILE_SIZE {
            return Err(FsError::NoSpace("file exceeds 255 blocks".to_string()));
        }
        let mut buffer = vec![0u8; BLOCK_SIZE];
        buffer[0..2].copy_from_slice(&word_to_bytes(page_map.len() as u16));
        for (i, &block) in page_map.iter().enumerate() {
            buffer[2 + i * 2..4 + i * 2].copy_from_slice(&word_to_bytes(block as u16));
        }
        self.write_block(&buffer, block_number, 1)
    }

    /// Read one catalog page; page maps are loaded for non-empty entries.
    fn read_catalog_page(&mut self, block_number: u64) -> Result<Vec<SoloEntry>> {
        let buffer = self.read_block(block_number, 1)?;
        let mut entries = Vec::with_capacity(CAT_PAGE_LENGTH);
        for slot in 0..CAT_PAGE_LENGTH {
            let mut entry = SoloEntry::read(&buffer, slot * ENTRY_LENGTH, block_number, slot);
            if !entry.is_empty() {
                entry.page_map = self.read_page_map(entry.page_map_block_number)?;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    fn write_catalog_page(&mut self, block_number: u64, entries: &[SoloEntry]) -> Result<()> {
        let mut buffer = vec![0u8; BLOCK_SIZE];
        for (slot, entry) in entries.iter().enumerate() {
            entry.write_buffer(&mut buffer, slot * ENTRY_LENGTH);
        }
        self.write_block(&buffer, block_number, 1)
    }

    /// All catalog entries, page by page.
    fn catalog_entries(&mut self) -> Result<Vec<SoloEntry>> {
        let mut entries = Vec::new();
        for block_number in self.read_page_map(CAT_ADDR)? {
            entries.extend(self.read_catalog_page(block_number)?);
        }
        Ok(entries)
    }

    fn catalog_page_for_hash(&mut self, hash_key: usize) -> Result<u64> {
        let page_num = (hash_key - 1) / CAT_PAGE_LENGTH;
        let pages = self.read_page_map(CAT_ADDR)?;
        pages
            .get(page_num)
            .copied()
            .ok_or_else(|| FsError::corrupt("hash key outside the catalog"))
    }

    /// Adjust the collision count on the slot a hash key maps to.
    fn update_searchlength(&mut self, hash_key: usize, delta: i32) -> Result<()> {
        let block_number = self.catalog_page_for_hash(hash_key)?;
        let mut entries = self.read_catalog_page(block_number)?;
        let slot = (hash_key - 1) % CAT_PAGE_LENGTH;
        let value = entries[slot].searchlength as i32 + delta;
        entries[slot].searchlength = value.max(0) as u16;
        self.write_catalog_page(block_number, &entries)
    }

    fn segment_addr(filename: &str) -> Option<(u64, u64)> {
        SEGMENTS
            .iter()
            .find(|(_, name)| *name == filename)
            .map(|&(addr, _)| {
                let length = if addr == KERNEL_ADDR {
                    KERNEL_LENGTH
                } else {
                    SEGMENT_LENGTH
                };
                (addr, length)
            })
    }

    fn segment_file_entry(filename: &str) -> Option<FileEntry> {
        Self::segment_addr(filename).map(|(_, length)| {
            let mut entry = FileEntry::new(filename.to_string())
                .with_blocks(length, BLOCK_SIZE)
                .with_type("SEGMENT");
            entry.protected = true;
            entry
        })
    }

    /// Hash lookup: the hash selects the page, then the page is scanned.
    fn locate(&mut self, fullname: &str) -> Result<SoloEntry> {
        let fullname = solo_canonical_filename(fullname, false, false);
        if fullname.is_empty() {
            return Err(FsError::NotFound(fullname));
        }
        let hash_key = filename_hash(&fullname, self.catalog_length);
        let block_number = self.catalog_page_for_hash(hash_key)?;
        let page = self.read_catalog_page(block_number)?;
        if let Some(entry) = page.iter().find(|e| !e.is_empty() && e.filename == fullname) {
            return Ok(entry.clone());
        }
        // Fallback: full catalog scan.
        self.catalog_entries()?
            .into_iter()
            .find(|e| !e.is_empty() && e.filename == fullname)
            .ok_or(FsError::NotFound(fullname))
    }

    fn delete_entry(&mut self, entry: &SoloEntry) -> Result<()> {
        let mut bitmap = SoloBitmap::read(self)?;
        for &block_number in &entry.page_map {
            bitmap.set_free(block_number);
        }
        bitmap.set_free(entry.page_map_block_number);
        bitmap.write(self)?;
        let mut entries = self.read_catalog_page(entry.cat_block)?;
        let old_key = entries[entry.slot].hash_key as usize;
        let searchlength = entries[entry.slot].searchlength;
        entries[entry.slot] = SoloEntry {
            filename: String::new(),
            file_type_id: FILE_TYPE_EMPTY,
            page_map_block_number: 0,
            protected: false,
            spare: [0u8; 10],
            hash_key: 0,
            searchlength,
            page_map: Vec::new(),
            cat_block: entry.cat_block,
            slot: entry.slot,
        };
        self.write_catalog_page(entry.cat_block, &entries)?;
        if old_key > 0 {
            self.update_searchlength(old_key, -1)?;
        }
        Ok(())
    }

    /// Insert an entry into a page: at or after the hash slot when
    /// `search_key` is given, else at the first free slot.
    fn create_entry_in_page(
        &mut self,
        block_number: u64,
        search_key: Option<usize>,
        entry_template: &SoloEntry,
    ) -> Result<Option<SoloEntry>> {
        let mut entries = self.read_catalog_page(block_number)?;
        let start = search_key.map(|k| (k - 1) % CAT_PAGE_LENGTH).unwrap_or(0);
        for slot in start..CAT_PAGE_LENGTH {
            if entries[slot].is_empty() {
                let mut new_entry = entry_template.clone();
                new_entry.cat_block = block_number;
                new_entry.slot = slot;
                new_entry.searchlength = entries[slot].searchlength;
                entries[slot] = new_entry.clone();
                self.write_catalog_page(block_number, &entries)?;
                return Ok(Some(new_entry));
            }
        }
        Ok(None)
    }

    fn create_solo_file(
        &mut self,
        fullname: &str,
        number_of_blocks: usize,
        file_type: Option<&str>,
        protected: bool,
    ) -> Result<SoloEntry> {
        if number_of_blocks > MAX_FILE_SIZE {
            return Err(FsError::NoSpace("file exceeds 255 blocks".to_string()));
        }
        let type_id = file_type_id(file_type)?;
        if type_id == FILE_TYPE_EMPTY {
            return Err(FsError::InvalidArg(
                "invalid file type specified with option".to_string(),
            ));
        }
        let canonical = solo_canonical_filename(fullname, false, true);
        if canonical.starts_with('@') {
            return Err(FsError::InvalidArg(format!(
                "cannot create segment {}",
                canonical
            )));
        }
        if let Ok(old_entry) = self.locate(&canonical) {
            self.delete_entry(&old_entry)?;
        }
        // One extra block holds the page map.
        let mut bitmap = SoloBitmap::read(self)?;
        let blocks = bitmap.allocate(number_of_blocks + 1)?;
        let page_map_block_number = blocks[0];
        let file_blocks = blocks[1..].to_vec();
        self.write_page_map(&file_blocks, page_map_block_number)?;

        let fullname = solo_canonical_filename(&canonical, false, false);
        let hash_key = filename_hash(&fullname, self.catalog_length);
        let template = SoloEntry {
            filename: fullname.clone(),
            file_type_id: type_id,
            page_map_block_number,
            protected,
            spare: [0u8; 10],
            hash_key: hash_key as u16,
            searchlength: 0,
            page_map: file_blocks,
            cat_block: 0,
            slot: 0,
        };
        let block_number = self.catalog_page_for_hash(hash_key)?;
        let mut new_entry =
            self.create_entry_in_page(block_number, Some(hash_key), &template)?;
        if new_entry.is_none() {
            // Hash page is full: wrap across the whole catalog.
            for block_number in self.read_page_map(CAT_ADDR)? {
                new_entry = self.create_entry_in_page(block_number, None, &template)?;
                if new_entry.is_some() {
                    break;
                }
            }
        }
        let new_entry = new_entry
            .ok_or_else(|| FsError::NoSpace("catalog is full".to_string()))?;
        bitmap.write(self)?;
        self.update_searchlength(new_entry.hash_key as usize, 1)?;
        Ok(new_entry)
    }

    fn read_entry_bytes(&mut self, entry: &SoloEntry) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(entry.page_map.len() * BLOCK_SIZE);
        for &block_number in &entry.page_map {
            data.extend(self.read_block(block_number, 1)?);
        }
        Ok(data)
    }

    pub fn free_blocks(&mut self) -> Result<u64> {
        let bitmap = SoloBitmap::read(self)?;
        Ok(bitmap.free())
    }

    fn internal_filter(
        &mut self,
        pattern: Option<&str>,
        wildcard: bool,
    ) -> Result<Vec<SoloEntry>> {
        let mut type_filter: Option<u16> = None;
        let mut name_pattern = None;
        if let Some(pattern) = pattern {
            let pattern = match pattern.split_once(';') {
                Some((name, file_type)) => {
                    type_filter = Some(file_type_id(Some(file_type))?);
                    name
                }
                None => pattern,
            };
            name_pattern = Some(solo_canonical_filename(pattern, true, true));
        }
        Ok(self
            .catalog_entries()?
            .into_iter()
            .filter(|e| !e.is_empty())
            .filter(|e| filename_match(&e.filename, name_pattern.as_deref(), wildcard))
            .filter(|e| type_filter.is_none_or(|t| t == e.file_type_id))
            .collect())
    }

    /// Write a freshly formatted SOLO disk.
    pub fn initialize(&mut self) -> Result<()> {
        let empty_block = vec![0u8; BLOCK_SIZE];
        for block_number in 0..DISK_SIZE {
            self.write_block(&empty_block, block_number, 1)?;
        }
        let mut bitmap = SoloBitmap::read(self)?;
        for i in 0..=CAT_ADDR {
            bitmap.set_used(i);
        }
        for i in CAT_ADDR + 1..DISK_SIZE {
            bitmap.set_free(i);
        }
        bitmap.write(self)?;
        self.catalog_length = 15;
        let mut bitmap = SoloBitmap::read(self)?;
        let catalog_pages = bitmap.allocate(self.catalog_length)?;
        bitmap.write(self)?;
        self.write_page_map(&catalog_pages, CAT_ADDR)?;
        for block_number in catalog_pages {
            self.write_block(&empty_block, block_number, 1)?;
        }
        // The scratch area every SOLO disk carries.
        self.create_solo_file("NEXT", MAX_FILE_SIZE, Some("SCRATCH"), true)?;
        Ok(())
    }
}

impl Filesystem for SoloFs {
    fn fs_name(&self) -> &'static str {
        "solo"
    }

    fn fs_description(&self) -> &'static str {
        "PDP-11 SOLO"
    }

    fn size(&mut self) -> Result<u64> {
        self.dev.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        Ok(self
            .catalog_entries()?
            .iter()
            .filter(|e| !e.is_empty())
            .map(SoloEntry::to_file_entry)
            .collect())
    }

    fn filter_entries(
        &mut self,
        pattern: Option<&str>,
        include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<FileEntry>> {
        let mut result = Vec::new();
        if include_all {
            let canonical = pattern.map(|p| {
                solo_canonical_filename(p.split(';').next().unwrap_or(p), true, true)
            });
            for (_, name) in SEGMENTS {
                if filename_match(name, canonical.as_deref(), wildcard) {
                    if let Some(entry) = Self::segment_file_entry(name) {
                        result.push(entry);
                    }
                }
            }
        }
        result.extend(
            self.internal_filter(pattern, wildcard)?
                .iter()
                .map(SoloEntry::to_file_entry),
        );
        Ok(result)
    }

    fn entry(&mut self, path: &str) -> Result<FileEntry> {
        let canonical = solo_canonical_filename(path, false, true);
        if canonical.starts_with('@') {
            return Self::segment_file_entry(&canonical)
                .ok_or_else(|| FsError::NotFound(path.to_string()));
        }
        self.locate(path).map(|e| e.to_file_entry())
    }

    fn read_bytes(&mut self, path: &str, mode: Option<FileMode>) -> Result<Vec<u8>> {
        let canonical = solo_canonical_filename(path, false, true);
        if canonical.starts_with('@') {
            let (addr, length) = Self::segment_addr(&canonical)
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;
            return self.read_block(addr, length as usize);
        }
        let entry = self.locate(path)?;
        let data = self.read_entry_bytes(&entry)?;
        let ascii = match mode {
            Some(FileMode::Ascii) => true,
            Some(FileMode::Image) => false,
            None => entry.file_type_id == FILE_TYPE_ASCII,
        };
        Ok(if ascii { solo_to_ascii(data) } else { data })
    }

    fn write_bytes(
        &mut self,
        path: &str,
        data: &[u8],
        _creation_date: Option<NaiveDate>,
        file_type: Option<&str>,
        _mode: Option<FileMode>,
    ) -> Result<()> {
        if self.dev.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let canonical = solo_canonical_filename(path, false, true);
        if canonical.starts_with('@') {
            // Segments are overwritten in place.
            let (addr, length) = Self::segment_addr(&canonical)
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;
            if data.len() > length as usize * BLOCK_SIZE {
                return Err(FsError::NoSpace(path.to_string()));
            }
            let blocks = data.len().div_ceil(BLOCK_SIZE);
            return self.write_block(data, addr, blocks);
        }
        let converted;
        let data = if file_type_id(file_type)? == FILE_TYPE_ASCII {
            converted = ascii_to_solo(data);
            &converted[..]
        } else {
            data
        };
        let number_of_blocks = data.len().div_ceil(BLOCK_SIZE);
        let entry = self.create_solo_file(path, number_of_blocks, file_type, false)?;
        for (i, &block_number) in entry.page_map.iter().enumerate() {
            let from = i * BLOCK_SIZE;
            let to = ((i + 1) * BLOCK_SIZE).min(data.len());
            if from >= data.len() {
                break;
            }
            self.write_block(&data[from..to], block_number, 1)?;
        }
        Ok(())
    }

    fn create_file(
        &mut self,
        path: &str,
        blocks: u64,
        _creation_date: Option<NaiveDate>,
        file_type: Option<&str>,
    ) -> Result<FileEntry> {
        if self.dev.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        self.create_solo_file(path, blocks as usize, file_type, false)
            .map(|e| e.to_file_entry())
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if self.dev.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let canonical = solo_canonical_filename(path, false, true);
        if canonical.starts_with('@') {
            return Err(FsError::InvalidArg(
                "segments cannot be deleted".to_string(),
            ));
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
            writeln!(out, "SOLO SYSTEM FILES\n").map_err(FsError::Io)?;
        }
        let mut listed = self.filter_entries(pattern, options.full, true)?;
        listed.sort_by(|a, b| a.fullname.cmp(&b.fullname));
        let mut files = 0u64;
        let mut blocks = 0u64;
        for entry in &listed {
            if options.brief {
                writeln!(out, "{}", entry.fullname).map_err(FsError::Io)?;
            } else {
                writeln!(
                    out,
                    "{:<12} {:<12} {:<12} {:>6} PAGES",
                    entry.fullname,
                    entry.file_type.as_deref().unwrap_or(""),
                    if entry.protected {
                        "PROTECTED"
                    } else {
                        "UNPROTECTED"
                    },
                    entry.blocks
                )
                .map_err(FsError::Io)?;
            }
            blocks += entry.blocks;
            files += 1;
        }
        if options.brief {
            return Ok(());
        }
        writeln!(out, "{:>5} ENTRIES", files).map_err(FsError::Io)?;
        writeln!(out, "{:>5} PAGES", blocks).map_err(FsError::Io)?;
        Ok(())
    }

    fn examine(
        &mut self,
        arg: Option<&str>,
        options: &ExamineOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        if options.bitmap {
            let bitmap = SoloBitmap::read(self)?;
            for i in 0..DISK_SIZE {
                write!(
                    out,
                    "{:>4} {}  ",
                    i,
                    if bitmap.is_free(i) { "[ ]" } else { "[X]" }
                )
                .map_err(FsError::Io)?;
                if i % 16 == 15 {
                    writeln!(out).map_err(FsError::Io)?;
                }
            }
            return Ok(());
        }
        if let Some(arg) = arg {
            return self.dump(Some(arg), None, None, out);
        }
        for (_, name) in SEGMENTS {
            writeln!(out, " -  {:<12}  SEGMENT", name).map_err(FsError::Io)?;
        }
        let mut index = 1;
        for (page_num, block_number) in
            self.read_page_map(CAT_ADDR)?.into_iter().enumerate()
        {
            for entry in self.read_catalog_page(block_number)? {
                writeln!(
                    out,
                    "{:>3} {:>2}# {:<12}  {:<8}  {}  Key: {:>6} ({})  Length: {:>4}  Map: {:>4}",
                    index,
                    page_num + 1,
                    entry.filename,
                    file_type_name(entry.file_type_id),
                    if entry.protected { "PROT" } else { "    " },
                    entry.hash_key,
                    entry.searchlength,
                    entry.length(),
                    entry.page_map_block_number
                )
                .map_err(FsError::Io)?;
                index += 1;
            }
        }
        Ok(())
    }

    fn read_block(&mut self, block_number: u64, count: usize) -> Result<Vec<u8>> {
        SoloFs::read_block(self, block_number, count)
    }

    fn file_types(&self) -> Vec<String> {
        FILE_TYPES
            .iter()
            .map(|&(_, name)| name.to_string())
            .chain(std::iter::once("SEGMENT".to_string()))
            .collect()
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
    use pretty_assertions::assert_eq;
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<RawCatalogEntry>(), ENTRY_LENGTH);
    const_assert_eq!(align_of::<RawCatalogEntry>(), 1);

    const_assert_eq!(offset_of!(RawCatalogEntry, file_id), 0);
    const_assert_eq!(offset_of!(RawCatalogEntry, file_type), 12);
    const_assert_eq!(offset_of!(RawCatalogEntry, page_map), 14);
    const_assert_eq!(offset_of!(RawCatalogEntry, protected), 16);
    const_assert_eq!(offset_of!(RawCatalogEntry, spare), 18);
    const_assert_eq!(offset_of!(RawCatalogEntry, hash_key), 28);
    const_assert_eq!(offset_of!(RawCatalogEntry, searchlength), 30);

    fn new_fs() -> SoloFs {
        let file = ByteFile::with_size(DISK_SIZE as usize * BLOCK_SIZE);
        let dev = BlockDevice::new(file).unwrap();
        let mut fs = SoloFs {
            dev,
            catalog_length: 15,
        };
        fs.initialize().unwrap();
        fs
    }

    #[test]
    fn test_initialize_creates_protected_next() {
        let mut fs = new_fs();
        let entry = fs.entry("NEXT").unwrap();
        assert!(entry.protected);
        assert_eq!(entry.blocks, 255);
        assert_eq!(entry.file_type.as_deref(), Some("SCRATCH"));
    }

    #[test]
    fn test_write_read_ascii_roundtrip() {
        let mut fs = new_fs();
        let content = vec![b'A'; 440];
        fs.write_bytes("10", &content, None, Some("ASCII"), None).unwrap();
        let data = fs.read_bytes("10", None).unwrap();
        assert_eq!(data, content);
    }

    #[test]
    fn test_delete_releases_blocks_plus_page_map() {
        let mut fs = new_fs();
        fs.write_bytes("50", &[b'x'; 3 * BLOCK_SIZE], None, Some("ASCII"), None)
            .unwrap();
        let entry = fs.entry("50").unwrap();
        let free = fs.free_blocks().unwrap();
        fs.delete("50").unwrap();
        assert_eq!(fs.free_blocks().unwrap(), free + entry.blocks + 1);
    }

    #[test]
    fn test_hash_lookup_and_collisions() {
        let mut fs = new_fs();
        for name in ["ALPHA", "BETA", "GAMMA", "DELTA", "EPSILON"] {
            fs.write_bytes(name, name.as_bytes(), None, Some("ASCII"), None)
                .unwrap();
        }
        for name in ["ALPHA", "BETA", "GAMMA", "DELTA", "EPSILON"] {
            let data = fs.read_bytes(name, None).unwrap();
            assert_eq!(data, name.as_bytes());
        }
    }

    #[test]
    fn test_segments_readable_not_deletable() {
        let mut fs = new_fs();
        let entry = fs.entry("@KERNEL").unwrap();
        assert_eq!(entry.blocks, 24);
        assert!(entry.protected);
        let data = fs.read_bytes("@KERNEL", None).unwrap();
        assert_eq!(data.len(), 24 * BLOCK_SIZE);
        assert!(matches!(fs.delete("@KERNEL"), Err(FsError::InvalidArg(_))));
        // Overwrite is allowed.
        fs.write_bytes("@KERNEL", &[0xAB; 512], None, None, None).unwrap();
        assert_eq!(fs.read_bytes("@KERNEL", None).unwrap()[0], 0xAB);
    }

    #[test]
    fn test_copy_roundtrip() {
        let mut fs = new_fs();
        let content = vec![0x42u8; 440];
        fs.write_bytes("10", &content, None, Some("ASCII"), None).unwrap();
        let data = fs.read_bytes("10", None).unwrap();
        fs.write_bytes("10NEW", &data, None, Some("ASCII"), None).unwrap();
        assert_eq!(fs.read_bytes("10NEW", None).unwrap(), content);
    }

    #[test]
    fn test_max_file_size() {
        let mut fs = new_fs();
        assert!(matches!(
            fs.create_file("BIG", 256, None, Some("ASCII")),
            Err(FsError::NoSpace(_))
        ));
    }
}
