//! OS/8 filesystem driver.
//!
//! Directory segments live in blocks 1-6 and mirror the RT-11 layout at
//! 12-bit word granularity: a five-word header, then variable-size
//! entries (four name words, the volume's extra words, minus-length).
//! Images larger than 4096 blocks are divided into equal partitions,
//! selected with `[n]` path prefixes.

use std::io::Write;

use chrono::NaiveDate;
use strata_common::dates::{date_to_os8, os8_to_date};
use strata_common::enc::pack12::{
    bytes_to_words_ascii, bytes_to_words_image, words_to_bytes_ascii, words_to_bytes_image,
};
use strata_common::enc::sixbit::{asc_to_os8_word, os8_word_to_asc};
use strata_common::{FileMode, filename_match, oct_dump};
use strata_core::{
    DirOptions, EntryStatus, ExamineOptions, FileEntry, Filesystem, FsError, Result,
};
use strata_io::rx::RX_SECTOR_TRACK;
use strata_io::{BLOCK_SIZE, ByteFile, WordBlockDevice};

/// Directory entry size in words, without extra words.
const DIR_ENTRY_SIZE: usize = 5;
const EMPTY_DIR_ENTRY_SIZE: usize = 2;
const DIRECTORY_SEGMENT_HEADER_SIZE: usize = 5;
const DIRECTORY_SEGMENT_SIZE: usize = 256;
const DIRECTORY_SEGMENT_START: u64 = 1;
const NUM_OF_SEGMENTS: u64 = 6;
/// Data bytes per block: 256 words in the 3-bytes-per-2-words packing.
pub const OS8_BLOCK_SIZE_BYTES: usize = 384;
/// Blocks per partition.
const PARTITION_BLOCKS: u64 = 0o10000;

/// Extensions whose files default to ASCII transfer mode.
const ASCII_EXTENSIONS: &[&str] = &[
    "BA", "BI", "FC", "FT", "HL", "LS", "MA", "PA", "PS", "RA", "SB", "TE", "TX", "WU",
];

/// Canonical OS/8 `NAME.EX` form: up to six name characters and a
/// two-character extension, filtered through the filename word encoding.
pub fn os8_canonical_filename(fullname: &str, wildcard: bool) -> String {
    let fullname = fullname.to_uppercase();
    let (filename, extension) = match fullname.split_once('.') {
        Some((name, ext)) => (name.to_string(), ext.to_string()),
        None => (fullname, if wildcard { "*".to_string() } else { String::new() }),
    };
    let mut name = String::new();
    for i in (0..filename.len().min(6)).step_by(2) {
        name += &os8_word_to_asc(asc_to_os8_word(&filename[i..(i + 2).min(filename.len())]));
    }
    let extension = os8_word_to_asc(asc_to_os8_word(
        &extension[..extension.len().min(2)],
    ));
    format!("{}.{}", name, extension)
}

/// Split an optional `[n]` partition prefix from a path.
fn os8_split_fullname(
    current: usize,
    fullname: Option<&str>,
    wildcard: bool,
) -> (usize, Option<String>) {
    let mut partition = current;
    let mut name = None;
    if let Some(fullname) = fullname {
        let rest = if let Some(stripped) = fullname.strip_prefix('[') {
            match stripped.split_once(']') {
                Some((num, rest)) if num.chars().all(|c| c.is_ascii_digit()) => {
                    partition = num.parse().unwrap_or(current);
                    rest
                }
                _ => fullname,
            }
        } else {
            fullname
        };
        if !rest.is_empty() {
            name = Some(os8_canonical_filename(rest, wildcard));
        }
    }
    (partition, name)
}

/// An OS/8 directory entry: permanent, tentative (zero length) or empty.
#[derive(Debug, Clone)]
pub struct Os8Entry {
    pub filename: String,
    pub extension: String,
    /// Length in blocks.
    pub length: u64,
    pub raw_creation_date: u16,
    pub extra_words: Vec<u16>,
    /// First data block, relative to the partition.
    pub file_position: u64,
    pub empty_entry: bool,
}

impl Os8Entry {
    fn empty(length: u64, file_position: u64) -> Self {
        Self {
            filename: String::new(),
            extension: String::new(),
            length,
            raw_creation_date: 0,
            extra_words: Vec::new(),
            file_position,
            empty_entry: true,
        }
    }

    fn read(words: &[u16], position: usize, file_position: u64, extra_words: usize) -> Self {
        if words[position] != 0 {
            let filename = os8_word_to_asc(words[position])
                + &os8_word_to_asc(words[position + 1])
                + &os8_word_to_asc(words[position + 2]);
            let extension = os8_word_to_asc(words[position + 3]);
            let extra = words[position + 4..position + 4 + extra_words].to_vec();
            let raw_creation_date = extra.first().copied().unwrap_or(0);
            let length = words[position + 4 + extra_words];
            Self {
                filename,
                extension,
                length: if length != 0 {
                    (0o10000 - length) as u64
                } else {
                    0
                },
                raw_creation_date,
                extra_words: extra,
                file_position,
                empty_entry: false,
            }
        } else {
            Self::empty((0o10000 - words[position + 1]) as u64 & 0o7777, file_position)
        }
    }

    fn to_words(&self, extra_words: usize) -> Vec<u16> {
        let mut words = Vec::new();
        if self.is_empty() {
            words.push(0);
            words.push((0o10000 - self.length as u16) & 0o7777);
        } else {
            let name = &self.filename;
            words.push(asc_to_os8_word(&name[..name.len().min(2)]));
            words.push(asc_to_os8_word(
                &name[name.len().min(2)..name.len().min(4)],
            ));
            words.push(asc_to_os8_word(
                &name[name.len().min(4)..name.len().min(6)],
            ));
            words.push(asc_to_os8_word(&self.extension));
            let mut extra = self.extra_words.clone();
            extra.resize(extra_words, 0);
            if extra_words > 0 {
                // The first extra word carries the creation date
                extra[0] = self.raw_creation_date;
            }
            words.extend(extra);
            words.push(if self.length != 0 {
                (0o10000 - self.length as u16) & 0o7777
            } else {
                0
            });
        }
        words
    }

    pub fn is_empty(&self) -> bool {
        self.empty_entry
    }

    pub fn is_tentative(&self) -> bool {
        self.length == 0 && !self.empty_entry
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_empty() && !self.is_tentative()
    }

    fn entry_len(&self, extra_words: usize) -> usize {
        if self.is_empty() {
            EMPTY_DIR_ENTRY_SIZE
        } else {
            DIR_ENTRY_SIZE + extra_words
        }
    }

    pub fn fullname(&self) -> String {
        format!("{}.{}", self.filename, self.extension)
    }

    pub fn creation_date(&self) -> Option<NaiveDate> {
        os8_to_date(self.raw_creation_date)
    }

    fn to_file_entry(&self, partition: usize) -> FileEntry {
        let fullname = if partition == 0 {
            self.fullname()
        } else {
            format!("[{}]{}", partition, self.fullname())
        };
        let mut entry = FileEntry::new(fullname)
            .with_blocks(self.length, OS8_BLOCK_SIZE_BYTES)
            .with_date(self.creation_date());
        entry.basename = self.fullname();
        entry.status = if self.is_empty() {
            EntryStatus::Empty
        } else if self.is_tentative() {
            EntryStatus::Tentative
        } else {
            EntryStatus::Permanent
        };
        entry
    }
}

/// A directory segment of one 256-word block.
#[derive(Debug, Clone)]
pub struct Os8Segment {
    pub block_number: u64,
    pub data_block_number: u64,
    pub next_block_number: u64,
    pub tentative_last_word: u16,
    pub extra_words: usize,
    pub entries: Vec<Os8Entry>,
}

impl Os8Segment {
    fn from_words(block_number: u64, words: &[u16]) -> Self {
        let number_of_entries = (0o10000 - words[0]) as usize & 0o7777;
        let data_block_number = words[1] as u64;
        let next_block_number = words[2] as u64;
        let tentative_last_word = words[3];
        let extra_words = (0o10000 - words[4]) as usize & 0o7777;
        let mut entries = Vec::with_capacity(number_of_entries);
        let mut file_position = data_block_number;
        let mut position = DIRECTORY_SEGMENT_HEADER_SIZE;
        for _ in 0..number_of_entries {
            if position + EMPTY_DIR_ENTRY_SIZE > DIRECTORY_SEGMENT_SIZE {
                break;
            }
            let entry = Os8Entry::read(words, position, file_position, extra_words);
            file_position += entry.length;
            position += entry.entry_len(extra_words);
            entries.push(entry);
        }
        Self {
            block_number,
            data_block_number,
            next_block_number,
            tentative_last_word,
            extra_words,
            entries,
        }
    }

    fn to_words(&self) -> Vec<u16> {
        let mut words = Vec::with_capacity(DIRECTORY_SEGMENT_SIZE);
        words.push((0o10000 - self.entries.len() as u16) & 0o7777);
        words.push(self.data_block_number as u16);
        words.push(self.next_block_number as u16);
        words.push(self.tentative_last_word);
        words.push((0o10000 - self.extra_words as u16) & 0o7777);
        for entry in &self.entries {
            words.extend(entry.to_words(self.extra_words));
        }
        words.resize(DIRECTORY_SEGMENT_SIZE, 0);
        words
    }

    pub fn max_entries(&self) -> usize {
        (DIRECTORY_SEGMENT_SIZE - DIRECTORY_SEGMENT_HEADER_SIZE)
            / (DIR_ENTRY_SIZE + self.extra_words)
            - 1
    }

    /// Coalesce runs of adjacent empty entries.
    fn compact(&mut self) {
        let mut new_entries: Vec<Os8Entry> = Vec::with_capacity(self.entries.len());
        let mut prev_empty: Option<usize> = None;
        for entry in self.entries.drain(..) {
            if !entry.is_empty() {
                prev_empty = None;
                new_entries.push(entry);
            } else if let Some(i) = prev_empty {
                new_entries[i].length += entry.length;
            } else {
                prev_empty = Some(new_entries.len());
                new_entries.push(entry);
            }
        }
        self.entries = new_entries;
    }

    /// Shrink the empty entry at `index` to `length` and insert an empty
    /// successor for the remainder.
    fn insert_empty_entry_after(&mut self, index: usize, length: u64) {
        let entry = &mut self.entries[index];
        if entry.length == length {
            return;
        }
        let new_entry = Os8Entry::empty(entry.length - length, entry.file_position + length);
        entry.length = length;
        self.entries.insert(index + 1, new_entry);
    }

    pub fn free(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.is_empty())
            .map(|e| e.length)
            .sum()
    }
}

/// OS/8 filesystem over a 12-bit word block device.
pub struct Os8Fs {
    dev: WordBlockDevice,
    pub current_partition: usize,
    pub number_of_blocks: u64,
}

impl Os8Fs {
    pub fn mount(file: ByteFile) -> Result<Self> {
        let mut dev = WordBlockDevice::new(file)?;
        let number_of_blocks = dev.size()? / BLOCK_SIZE as u64;
        Ok(Self {
            dev,
            current_partition: 0,
            number_of_blocks,
        })
    }

    pub fn num_of_partitions(&self) -> usize {
        (1 + (self.number_of_blocks.saturating_sub(1)) / PARTITION_BLOCKS) as usize
    }

    pub fn partition_size(&self) -> u64 {
        self.number_of_blocks / self.num_of_partitions() as u64
    }

    fn partition_base(&self, partition: usize) -> Result<u64> {
        if partition >= self.num_of_partitions() {
            return Err(FsError::NotFound(format!(
                "partition not found: [{}]",
                partition
            )));
        }
        Ok(partition as u64 * self.partition_size())
    }

    fn read_segment(&mut self, base: u64, block_number: u64) -> Result<Os8Segment> {
        let words = self.dev.read_block_12bit(base + block_number)?;
        Ok(Os8Segment::from_words(block_number, &words))
    }

    fn write_segment(&mut self, base: u64, segment: &Os8Segment) -> Result<()> {
        self.dev
            .write_block_12bit(base + segment.block_number, &segment.to_words())
            .map_err(FsError::from)
    }

    fn read_dir_segments(&mut self, partition: usize) -> Result<Vec<Os8Segment>> {
        let base = self.partition_base(partition)?;
        let mut segments = Vec::new();
        let mut visited = Vec::new();
        let mut next_block_number = DIRECTORY_SEGMENT_START;
        while next_block_number != 0 {
            if visited.contains(&next_block_number) {
                return Err(FsError::corrupt(format!(
                    "directory segment chain loops at block {}",
                    next_block_number
                )));
            }
            visited.push(next_block_number);
            let segment = self.read_segment(base, next_block_number)?;
            next_block_number = segment.next_block_number;
            segments.push(segment);
        }
        Ok(segments)
    }

    fn locate(
        &mut self,
        partition: usize,
        fullname: &str,
    ) -> Result<Option<(Os8Segment, usize)>> {
        for segment in self.read_dir_segments(partition)? {
            for (i, entry) in segment.entries.iter().enumerate() {
                if entry.is_permanent() && entry.fullname() == fullname {
                    return Ok(Some((segment, i)));
                }
            }
        }
        Ok(None)
    }

    fn split_segment(
        &mut self,
        partition: usize,
        segments: &mut [Os8Segment],
        segment_index: usize,
        entry_index: usize,
    ) -> Result<bool> {
        let base = self.partition_base(partition)?;
        let used: Vec<u64> = segments.iter().map(|s| s.block_number).collect();
        let block_number = (0..NUM_OF_SEGMENTS)
            .map(|i| DIRECTORY_SEGMENT_START + i)
            .find(|b| !used.contains(b));
        let Some(block_number) = block_number else {
            return Ok(false);
        };
        let extra_words = segments[0].extra_words;
        let old = &mut segments[segment_index];
        let mut tail = old.entries.split_off(entry_index + 1);
        if tail.is_empty() {
            tail = vec![old.entries.pop().expect("entry exists")];
        }
        let new_segment = Os8Segment {
            block_number,
            data_block_number: tail[0].file_position,
            next_block_number: old.next_block_number,
            tentative_last_word: 0,
            extra_words,
            entries: tail,
        };
        old.next_block_number = block_number;
        log::debug!(
            "splitting OS/8 directory segment {} into block {}",
            old.block_number,
            block_number
        );
        let old = segments[segment_index].clone();
        self.write_segment(base, &old)?;
        self.write_segment(base, &new_segment)?;
        Ok(true)
    }

    fn allocate_space(
        &mut self,
        partition: usize,
        fullname: &str,
        length: u64,
        creation_date: Option<NaiveDate>,
    ) -> Result<Os8Entry> {
        let base = self.partition_base(partition)?;
        for _attempt in 0..=NUM_OF_SEGMENTS {
            let mut segments = self.read_dir_segments(partition)?;
            let mut best: Option<(usize, usize, u64)> = None;
            'search: for (si, segment) in segments.iter().enumerate() {
                for (ei, entry) in segment.entries.iter().enumerate() {
                    if entry.is_empty() && entry.length >= length {
                        if best.map_or(true, |(_, _, best_len)| best_len > entry.length) {
                            best = Some((si, ei, entry.length));
                            if entry.length == length {
                                break 'search;
                            }
                        }
                    }
                }
            }
            let Some((si, ei, best_len)) = best else {
                return Err(FsError::NoSpace(fullname.to_string()));
            };
            if best_len != length {
                if segments[si].entries.len() >= segments[si].max_entries() {
                    if !self.split_segment(partition, &mut segments, si, ei)? {
                        return Err(FsError::NoSpace(fullname.to_string()));
                    }
                    continue;
                }
                segments[si].insert_empty_entry_after(ei, length);
            }
            let extra_words = segments[si].extra_words;
            let (filename, extension) = match fullname.rsplit_once('.') {
                Some((name, ext)) => (name.to_string(), ext.to_string()),
                None => (fullname.to_string(), String::new()),
            };
            let entry = &mut segments[si].entries[ei];
            entry.empty_entry = false;
            entry.extra_words = vec![0; extra_words];
            entry.filename = filename.to_uppercase();
            entry.extension = extension.to_uppercase();
            entry.raw_creation_date = date_to_os8(creation_date);
            entry.length = length;
            let result = entry.clone();
            let segment = segments[si].clone();
            self.write_segment(base, &segment)?;
            return Ok(result);
        }
        Err(FsError::NoSpace(fullname.to_string()))
    }

    pub fn free_blocks(&mut self, partition: usize) -> Result<u64> {
        Ok(self
            .read_dir_segments(partition)?
            .iter()
            .map(Os8Segment::free)
            .sum())
    }

    fn read_entry_words(&mut self, partition: usize, entry: &Os8Entry) -> Result<Vec<u16>> {
        let base = self.partition_base(partition)?;
        let mut words = Vec::with_capacity(entry.length as usize * 256);
        for i in 0..entry.length {
            words.extend(self.dev.read_block_12bit(base + entry.file_position + i)?);
        }
        Ok(words)
    }

    fn default_mode(extension: &str) -> FileMode {
        if ASCII_EXTENSIONS.contains(&extension.to_uppercase().as_str()) {
            FileMode::Ascii
        } else {
            FileMode::Image
        }
    }

    /// Create an empty OS/8 directory on every partition.
    pub fn initialize(&mut self) -> Result<()> {
        self.current_partition = 0;
        self.number_of_blocks = self.dev.size()? / BLOCK_SIZE as u64;
        let partition_size = self.partition_size();
        let is_rx = self.dev.is_rx_12bit();
        for partition in 0..self.num_of_partitions() {
            let base = self.partition_base(partition)?;
            let data_block_number = DIRECTORY_SEGMENT_START + NUM_OF_SEGMENTS;
            let mut length = partition_size - data_block_number;
            if is_rx {
                // Track 0 is reserved on RX media.
                length -= RX_SECTOR_TRACK;
            }
            let segment = Os8Segment {
                block_number: DIRECTORY_SEGMENT_START,
                data_block_number,
                next_block_number: 0,
                tentative_last_word: 0,
                extra_words: 1,
                entries: vec![Os8Entry::empty(length, data_block_number)],
            };
            self.write_segment(base, &segment)?;
        }
        Ok(())
    }
}

impl Filesystem for Os8Fs {
    fn fs_name(&self) -> &'static str {
        "os8"
    }

    fn fs_description(&self) -> &'static str {
        "PDP-8 OS/8"
    }

    fn size(&mut self) -> Result<u64> {
        self.dev.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        let partition = self.current_partition;
        Ok(self
            .read_dir_segments(partition)?
            .iter()
            .flat_map(|s| s.entries.iter())
            .map(|e| e.to_file_entry(partition))
            .collect())
    }

    fn filter_entries(
        &mut self,
        pattern: Option<&str>,
        include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<FileEntry>> {
        let (partition, pattern) = os8_split_fullname(self.current_partition, pattern, wildcard);
        let mut result = Vec::new();
        for segment in self.read_dir_segments(partition)? {
            for entry in &segment.entries {
                if !filename_match(&entry.fullname(), pattern.as_deref(), wildcard) {
                    continue;
                }
                if !include_all && (entry.is_empty() || entry.is_tentative()) {
                    continue;
                }
                result.push(entry.to_file_entry(partition));
            }
        }
        Ok(result)
    }

    fn entry(&mut self, path: &str) -> Result<FileEntry> {
        let (partition, fullname) = os8_split_fullname(self.current_partition, Some(path), false);
        let fullname = fullname.ok_or_else(|| FsError::NotFound(path.to_string()))?;
        match self.locate(partition, &fullname)? {
            Some((segment, index)) => Ok(segment.entries[index].to_file_entry(partition)),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    fn read_bytes(&mut self, path: &str, mode: Option<FileMode>) -> Result<Vec<u8>> {
        let (partition, fullname) = os8_split_fullname(self.current_partition, Some(path), false);
        let fullname = fullname.ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let (segment, index) = self
            .locate(partition, &fullname)?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let entry = &segment.entries[index];
        let mode = mode.unwrap_or_else(|| Self::default_mode(&entry.extension));
        let words = self.read_entry_words(partition, entry)?;
        Ok(match mode {
            FileMode::Ascii => words_to_bytes_ascii(&words),
            FileMode::Image => words_to_bytes_image(&words),
        })
    }

    fn write_bytes(
        &mut self,
        path: &str,
        data: &[u8],
        creation_date: Option<NaiveDate>,
        _file_type: Option<&str>,
        mode: Option<FileMode>,
    ) -> Result<()> {
        let number_of_blocks = (data.len() as u64).div_ceil(OS8_BLOCK_SIZE_BYTES as u64);
        let entry = self.create_file(path, number_of_blocks, creation_date, None)?;
        let (partition, fullname) =
            os8_split_fullname(self.current_partition, Some(path), false);
        let fullname = fullname.ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let (segment, index) = self
            .locate(partition, &fullname)?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let file_position = segment.entries[index].file_position;
        let mode = mode.unwrap_or_else(|| {
            Self::default_mode(fullname.rsplit_once('.').map(|(_, e)| e).unwrap_or(""))
        });
        let base = self.partition_base(partition)?;
        for i in 0..entry.blocks {
            let from = i as usize * OS8_BLOCK_SIZE_BYTES;
            let to = ((i as usize + 1) * OS8_BLOCK_SIZE_BYTES).min(data.len());
            let chunk = if from < data.len() {
                &data[from..to]
            } else {
                &[]
            };
            let mut words = match mode {
                FileMode::Ascii => bytes_to_words_ascii(chunk),
                FileMode::Image => bytes_to_words_image(chunk),
            };
            words.resize(256, 0);
            self.dev
                .write_block_12bit(base + file_position + i, &words)?;
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
        if self.dev.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let (partition, fullname) = os8_split_fullname(self.current_partition, Some(path), false);
        let fullname = fullname.ok_or_else(|| {
            FsError::InvalidArg(format!("invalid filename: {}", path))
        })?;
        if self.locate(partition, &fullname)?.is_some() {
            self.delete(path)?;
        }
        self.allocate_space(partition, &fullname, blocks, creation_date)
            .map(|e| e.to_file_entry(partition))
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if self.dev.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let (partition, fullname) = os8_split_fullname(self.current_partition, Some(path), false);
        let fullname = fullname.ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let base = self.partition_base(partition)?;
        let (mut segment, index) = self
            .locate(partition, &fullname)?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let entry = &mut segment.entries[index];
        entry.empty_entry = true;
        entry.filename = String::new();
        entry.extension = String::new();
        entry.extra_words = Vec::new();
        segment.compact();
        self.write_segment(base, &segment)
    }

    fn chdir(&mut self, path: &str) -> bool {
        let path = path.trim_start_matches('[').trim_end_matches(']');
        match path.parse::<usize>() {
            Ok(partition) if partition < self.num_of_partitions() => {
                self.current_partition = partition;
                true
            }
            _ => false,
        }
    }

    fn pwd(&self) -> String {
        if self.current_partition == 0 {
            String::new()
        } else {
            format!("[{}]", self.current_partition)
        }
    }

    fn dir(
        &mut self,
        _volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        let (partition, pattern) = os8_split_fullname(self.current_partition, pattern, true);
        let unused = self.free_blocks(partition)?;
        let mut i = 0usize;
        let mut files = 0u64;
        let mut blocks = 0u64;
        for segment in self.read_dir_segments(partition)? {
            for entry in &segment.entries {
                if !filename_match(&entry.fullname(), pattern.as_deref(), true) {
                    continue;
                }
                let fullname = if entry.is_empty() || entry.is_tentative() {
                    if !options.full {
                        continue;
                    }
                    i += 1;
                    "<EMPTY>  ".to_string()
                } else {
                    i += 1;
                    let fullname = format!("{:<6}.{:<2}", entry.filename, entry.extension);
                    if options.brief {
                        writeln!(out, "{}", fullname).map_err(FsError::Io)?;
                        continue;
                    }
                    files += 1;
                    blocks += entry.length;
                    fullname
                };
                let date = entry
                    .creation_date()
                    .map(|d| d.format("%d-%b-%y").to_string().to_uppercase())
                    .unwrap_or_default();
                write!(
                    out,
                    "{} {:04o} {:>3} {:<9}",
                    fullname, entry.file_position, entry.length, date
                )
                .map_err(FsError::Io)?;
                if i % 3 == 0 {
                    writeln!(out).map_err(FsError::Io)?;
                } else {
                    write!(out, "  ").map_err(FsError::Io)?;
                }
            }
        }
        if options.brief {
            return Ok(());
        }
        if i % 3 != 0 {
            writeln!(out).map_err(FsError::Io)?;
        }
        writeln!(
            out,
            "\n{:>4} FILES IN {:>4} BLOCKS - {:>4} FREE BLOCKS",
            files, blocks, unused
        )
        .map_err(FsError::Io)?;
        Ok(())
    }

    fn examine(
        &mut self,
        arg: Option<&str>,
        _options: &ExamineOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        if let Some(arg) = arg {
            writeln!(out, "Filename    Type  Date       Length  Block").map_err(FsError::Io)?;
            writeln!(out, "--------    ----  ----       ------  -----").map_err(FsError::Io)?;
            let (partition, pattern) = os8_split_fullname(self.current_partition, Some(arg), true);
            for segment in self.read_dir_segments(partition)? {
                for entry in &segment.entries {
                    if !filename_match(&entry.fullname(), pattern.as_deref(), true) {
                        continue;
                    }
                    let attr = if entry.is_tentative() {
                        "TEMP"
                    } else if entry.is_permanent() {
                        "PERM"
                    } else {
                        "EMPTY"
                    };
                    let date = entry
                        .creation_date()
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "          ".to_string());
                    writeln!(
                        out,
                        "{:<11} {:<5} {} {:>6} {:6}",
                        entry.fullname(),
                        attr,
                        date,
                        entry.length,
                        entry.file_position
                    )
                    .map_err(FsError::Io)?;
                }
            }
            return Ok(());
        }
        writeln!(out, "Number of partitions:     {}", self.num_of_partitions())
            .map_err(FsError::Io)?;
        writeln!(out, "Size of each partition:   {}", self.partition_size())
            .map_err(FsError::Io)?;
        for partition in 0..self.num_of_partitions() {
            writeln!(out, "\n*Partition").map_err(FsError::Io)?;
            writeln!(out, "Partition number:         {:>5}", partition).map_err(FsError::Io)?;
            for segment in self.read_dir_segments(partition)? {
                writeln!(out, "\n*Segment").map_err(FsError::Io)?;
                writeln!(out, "Block number:          {:>5}", segment.block_number)
                    .map_err(FsError::Io)?;
                writeln!(out, "Number of entries:     {:>5}", segment.entries.len())
                    .map_err(FsError::Io)?;
                writeln!(out, "Data block:            {:>5}", segment.data_block_number)
                    .map_err(FsError::Io)?;
                writeln!(out, "Next dir segment:      {:>5}", segment.next_block_number)
                    .map_err(FsError::Io)?;
                writeln!(out, "Extra words:           {:>5}", segment.extra_words)
                    .map_err(FsError::Io)?;
                for (i, entry) in segment.entries.iter().enumerate() {
                    writeln!(
                        out,
                        "{:02}#  {:<11} {:>6} {:6}",
                        i,
                        entry.fullname(),
                        entry.length,
                        entry.file_position
                    )
                    .map_err(FsError::Io)?;
                }
            }
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
        let (base, start, end) = match path {
            Some(path) => {
                let (partition, fullname) =
                    os8_split_fullname(self.current_partition, Some(path), false);
                let fullname = fullname.ok_or_else(|| FsError::NotFound(path.to_string()))?;
                let (segment, index) = self
                    .locate(partition, &fullname)?
                    .ok_or_else(|| FsError::NotFound(path.to_string()))?;
                let entry = &segment.entries[index];
                let base = self.partition_base(partition)? + entry.file_position;
                let start = start.unwrap_or(0);
                let end = end
                    .unwrap_or_else(|| entry.length.saturating_sub(1))
                    .min(entry.length.saturating_sub(1));
                (base, start, end)
            }
            None => {
                let start_block = start.unwrap_or(0);
                let end = match end {
                    Some(end) => end,
                    None if start.is_none() => self.number_of_blocks.saturating_sub(1),
                    None => start_block,
                };
                (0, start_block, end)
            }
        };
        for block_number in start..=end {
            let words = self.dev.read_block_12bit(base + block_number)?;
            writeln!(out, "\nBLOCK NUMBER   {:08}", block_number).map_err(FsError::Io)?;
            oct_dump(out, &words).map_err(FsError::Io)?;
        }
        Ok(())
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

    fn new_fs(blocks: usize) -> Os8Fs {
        let file = ByteFile::with_size(blocks * BLOCK_SIZE);
        let mut fs = Os8Fs::mount(file).unwrap();
        fs.initialize().unwrap();
        fs
    }

    #[test]
    fn test_initialize_single_partition() {
        let mut fs = new_fs(1000);
        assert_eq!(fs.num_of_partitions(), 1);
        let segments = fs.read_dir_segments(0).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].data_block_number, 7);
        assert_eq!(segments[0].extra_words, 1);
        assert_eq!(fs.free_blocks(0).unwrap(), 1000 - 7);
    }

    #[test]
    fn test_write_read_roundtrip_image() {
        let mut fs = new_fs(1000);
        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        fs.write_bytes("DATA.BN", &content, None, None, Some(FileMode::Image))
            .unwrap();
        let data = fs
            .read_bytes("DATA.BN", Some(FileMode::Image))
            .unwrap();
        assert_eq!(&data[..content.len()], &content[..]);
    }

    #[test]
    fn test_ascii_extension_default() {
        let mut fs = new_fs(1000);
        let text = b"HELLO OS8 WORLD\n";
        fs.write_bytes("HELLO.PA", text, None, None, None).unwrap();
        let data = fs.read_bytes("HELLO.PA", None).unwrap();
        assert_eq!(&data[..text.len()], text);
    }

    #[test]
    fn test_delete_and_free_blocks() {
        let mut fs = new_fs(1000);
        fs.create_file("A.BN", 10, None, None).unwrap();
        let free = fs.free_blocks(0).unwrap();
        fs.delete("A.BN").unwrap();
        assert_eq!(fs.free_blocks(0).unwrap(), free + 10);
    }

    #[test]
    fn test_partitions_on_large_image() {
        let mut fs = new_fs(0o10000 * 2);
        assert_eq!(fs.num_of_partitions(), 2);
        fs.write_bytes("[1]F.BN", &[1u8; 100], None, None, None).unwrap();
        assert!(fs.entry("F.BN").is_err());
        assert!(fs.entry("[1]F.BN").is_ok());
        assert!(fs.chdir("[1]"));
        assert_eq!(fs.pwd(), "[1]");
        assert!(fs.entry("F.BN").is_ok());
        let data = fs.read_bytes("F.BN", Some(FileMode::Image)).unwrap();
        assert_eq!(&data[..4], &[1, 1, 1, 1]);
    }

    #[test]
    fn test_creation_date_stored_in_extra_word() {
        let mut fs = new_fs(1000);
        let date = NaiveDate::from_ymd_opt(1975, 6, 15);
        fs.create_file("D.BN", 1, date, None).unwrap();
        let entry = fs.entry("D.BN").unwrap();
        assert_eq!(entry.creation_date, date);
    }

    #[test]
    fn test_canonical_filename() {
        assert_eq!(os8_canonical_filename("hello.pa", false), "HELLO.PA");
        assert_eq!(os8_canonical_filename("a", true), "A.*");
        assert_eq!(os8_canonical_filename("toolongname.text", false), "TOOLON.TE");
    }
}
