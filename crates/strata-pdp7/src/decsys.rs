//! DECSys-7 DECtape driver.
//!
//! A tape is 384 blocks of 256 18-bit words. Block 1 carries two Baudot
//! labels, block 2 the program directory (length word, entries, first
//! free block in word 255), block 3 the library directory with
//! variable-length Baudot names. System programs are contiguous with a
//! word-count prologue; working and library programs are linked blocks.
//! Working entries carry three forks: FORTRAN source, assembler source
//! and relocatable binary, selected with an `F,`/`A,`/`B,` name prefix.

use std::io::Write;

use chrono::NaiveDate;
use strata_common::FileMode;
use strata_common::enc::baudot::{LABEL_END_WORD, read_baudot_string, str_to_baudot};
use strata_common::enc::fiodec::{fiodec_to_str, str_to_fiodec};
use strata_common::enc::pack18::{bytes_to_words18, words18_to_bytes};
use strata_common::filename_match;
use strata_core::{
    DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result,
};
use strata_io::{ByteFile, WordBlockDevice};

pub const DECTAPE_BLOCKS: u64 = 384;
pub const WORDS_PER_BLOCK: usize = 256;
/// Data words per block of a linked file (two-word prologue).
pub const LINKED_FILE_WORDS_PER_BLOCK: usize = 254;

const TAPE_LABEL_BLOCK: u64 = 1;
const PROGRAM_DIRECTORY_BLOCK: u64 = 2;
const LIBRARY_DIRECTORY_BLOCK: u64 = 3;
const KEYBOARD_MONITOR_BLOCK: u64 = 4;
const KEYBOARD_MONITOR_SIZE: u64 = 3;
const FIRST_FILE_BLOCK: u64 = KEYBOARD_MONITOR_BLOCK + KEYBOARD_MONITOR_SIZE;
const LAST_FILE_BLOCK: u64 = DECTAPE_BLOCKS - 2;

const SYSTEM_ENTRY_SIZE: usize = 5;
const WORKING_ENTRY_SIZE: usize = 6;

/// File organizations and fork selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Contiguous system program.
    System,
    /// Working program (three forks).
    Working,
    /// Library program (linked).
    Library,
    /// FORTRAN source fork of a working program.
    Fortran,
    /// Assembler source fork of a working program.
    Assembler,
    /// Relocatable binary fork of a working program.
    Binary,
}

impl FileType {
    pub fn name(self) -> &'static str {
        match self {
            FileType::System => "SYSTEM",
            FileType::Working => "WORKING",
            FileType::Library => "LIBRARY",
            FileType::Fortran => "FORTRAN",
            FileType::Assembler => "ASSEMBLER",
            FileType::Binary => "BINARY",
        }
    }

    pub fn short(self) -> char {
        self.name().chars().next().expect("name is not empty")
    }

    pub fn file_mode(self) -> FileMode {
        match self {
            FileType::Fortran | FileType::Assembler => FileMode::Ascii,
            _ => FileMode::Image,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let value = value.to_uppercase();
        for t in [
            FileType::System,
            FileType::Working,
            FileType::Library,
            FileType::Fortran,
            FileType::Assembler,
            FileType::Binary,
        ] {
            if t.name().starts_with(&value) && !value.is_empty() {
                return Ok(t);
            }
        }
        Err(FsError::InvalidArg(format!("invalid file type: {}", value)))
    }
}

/// Canonical DECSys filename: the characters the Baudot code can carry.
pub fn decsys_canonical_filename(fullname: &str, wildcard: bool) -> String {
    fullname
        .to_uppercase()
        .trim()
        .chars()
        .filter(|&c| {
            c.is_ascii_alphanumeric()
                || "-?:$!&#`()'.;/\"' ".contains(c)
                || (wildcard && c == '*')
        })
        .collect()
}

/// Split an optional `T,NAME` prefix.
pub fn decsys_split_fullname(
    fullname: &str,
    wildcard: bool,
) -> Result<(Option<FileType>, String)> {
    match fullname.split_once(',') {
        Some((file_type, name)) => Ok((
            Some(FileType::parse(file_type)?),
            decsys_canonical_filename(name, wildcard),
        )),
        None => Ok((None, decsys_canonical_filename(fullname, wildcard))),
    }
}

/// A program or library directory entry.
#[derive(Debug, Clone)]
pub struct DecsysEntry {
    pub filename: String,
    /// The storage organization: System, Working or Library.
    pub file_type: FileType,
    /// System block / library block / relocatable binary fork.
    pub block_number: u64,
    pub fortran_block_number: u64,
    pub assembler_block_number: u64,
    pub starting_address: u32,
}

impl DecsysEntry {
    fn entry_words(&self) -> Vec<u32> {
        match self.file_type {
            FileType::System => {
                let mut words = vec![1u32];
                words.extend(str_to_baudot(&self.filename, Some(2)));
                words.push(self.block_number as u32);
                words.push(self.starting_address + 1);
                words
            }
            FileType::Library => {
                let mut words = str_to_baudot(&self.filename, None);
                words.push(LABEL_END_WORD);
                words.push(self.block_number as u32);
                words.push(LABEL_END_WORD);
                words
            }
            _ => {
                let mut words = vec![2u32];
                words.extend(str_to_baudot(&self.filename, Some(2)));
                words.push(self.fortran_block_number as u32);
                words.push(self.assembler_block_number as u32);
                words.push(self.block_number as u32);
                words
            }
        }
    }

    fn fork_block(&self, file_type: FileType) -> u64 {
        match file_type {
            FileType::Fortran => self.fortran_block_number,
            FileType::Assembler => self.assembler_block_number,
            _ => self.block_number,
        }
    }

    fn set_fork_block(&mut self, file_type: FileType, block: u64) {
        match file_type {
            FileType::Fortran => self.fortran_block_number = block,
            FileType::Assembler => self.assembler_block_number = block,
            _ => self.block_number = block,
        }
    }
}

struct ProgramDirectory {
    entries: Vec<DecsysEntry>,
    first_free_block: u64,
}

struct LibraryDirectory {
    entries: Vec<DecsysEntry>,
}

/// DECSys-7 filesystem over an 18-bit word device.
pub struct DecsysFs {
    dev: WordBlockDevice,
}

impl DecsysFs {
    pub fn mount(file: ByteFile) -> Result<Self> {
        Self::mount_strict(file, true)
    }

    pub fn mount_strict(file: ByteFile, strict: bool) -> Result<Self> {
        let mut dev = WordBlockDevice::new(file)?;
        if strict {
            let blocks = dev.size()? / (WORDS_PER_BLOCK * 4) as u64;
            if blocks != DECTAPE_BLOCKS {
                return Err(FsError::InvalidArg(
                    "invalid DECSys tape size".to_string(),
                ));
            }
        }
        Ok(Self { dev })
    }

    fn read_words(&mut self, block_number: u64) -> Result<Vec<u32>> {
        if block_number >= DECTAPE_BLOCKS {
            return Err(FsError::corrupt(format!(
                "block {} is beyond the end of the tape",
                block_number
            )));
        }
        self.dev.read_block_18bit(block_number).map_err(FsError::from)
    }

    fn write_words(&mut self, block_number: u64, words: &[u32]) -> Result<()> {
        self.dev
            .write_block_18bit(block_number, words)
            .map_err(FsError::from)
    }

    /// The two Baudot labels in the tape label block.
    pub fn read_tape_label(&mut self) -> Result<(String, String)> {
        let words = self.read_words(TAPE_LABEL_BLOCK)?;
        let (label1, position) = read_baudot_string(&words, 0);
        let (label2, _) = read_baudot_string(&words, position + 1);
        Ok((label1, label2))
    }

    pub fn write_tape_label(&mut self, label1: &str, label2: &str) -> Result<()> {
        let mut words = str_to_baudot(label1, None);
        words.push(LABEL_END_WORD);
        words.extend(str_to_baudot(label2, None));
        words.push(LABEL_END_WORD);
        words.resize(WORDS_PER_BLOCK, 0);
        self.write_words(TAPE_LABEL_BLOCK, &words)
    }

    fn read_program_directory(&mut self) -> Result<ProgramDirectory> {
        let words = self.read_words(PROGRAM_DIRECTORY_BLOCK)?;
        let dir_length = words[0] as usize;
        let first_free_block = words[255] as u64;
        let mut entries = Vec::new();
        let mut position = 1;
        while position < words.len() - 5 && position < dir_length {
            if words[position] == 1 {
                // System program
                let (filename, _) = read_baudot_string(&words[position + 1..position + 3], 0);
                entries.push(DecsysEntry {
                    filename,
                    file_type: FileType::System,
                    block_number: words[position + 3] as u64,
                    fortran_block_number: 0,
                    assembler_block_number: 0,
                    starting_address: words[position + 4].saturating_sub(1),
                });
                position += SYSTEM_ENTRY_SIZE;
            } else {
                // Working program
                let (filename, _) = read_baudot_string(&words[position + 1..position + 3], 0);
                entries.push(DecsysEntry {
                    filename,
                    file_type: FileType::Working,
                    fortran_block_number: words[position + 3] as u64,
                    assembler_block_number: words[position + 4] as u64,
                    block_number: words[position + 5] as u64,
                    starting_address: 0,
                });
                position += WORKING_ENTRY_SIZE;
            }
        }
        Ok(ProgramDirectory {
            entries,
            first_free_block,
        })
    }

    fn write_program_directory(&mut self, directory: &ProgramDirectory) -> Result<()> {
        let mut words = vec![0u32];
        for entry in &directory.entries {
            words.extend(entry.entry_words());
        }
        words[0] = words.len() as u32 - 1;
        words.resize(255, 0);
        words.push(directory.first_free_block as u32);
        self.write_words(PROGRAM_DIRECTORY_BLOCK, &words)
    }

    fn read_library_directory(&mut self) -> Result<LibraryDirectory> {
        let words = self.read_words(LIBRARY_DIRECTORY_BLOCK)?;
        let dir_length = words[0] as usize;
        let mut entries = Vec::new();
        let mut position = 1;
        while position < words.len() - 5 && position < dir_length {
            let (filename, end) = read_baudot_string(&words, position);
            let block_number = words[end + 1] as u64;
            entries.push(DecsysEntry {
                filename,
                file_type: FileType::Library,
                block_number,
                fortran_block_number: 0,
                assembler_block_number: 0,
                starting_address: 0,
            });
            position = end + 3;
        }
        Ok(LibraryDirectory { entries })
    }

    fn write_library_directory(&mut self, directory: &LibraryDirectory) -> Result<()> {
        let mut words = vec![0u32];
        for entry in &directory.entries {
            words.extend(entry.entry_words());
        }
        words[0] = words.len() as u32 - 1;
        words.resize(WORDS_PER_BLOCK, 0);
        self.write_words(LIBRARY_DIRECTORY_BLOCK, &words)
    }

    fn read_dir_entries(&mut self) -> Result<Vec<DecsysEntry>> {
        let mut entries = self.read_program_directory()?.entries;
        entries.extend(self.read_library_directory()?.entries);
        Ok(entries)
    }

    /// The blocks of an entry's fork.
    ///
    /// System files are contiguous with a two's complement word count and
    /// a `777777` terminator; a missing terminator stops at the end of
    /// the medium. Working and library files are linked through their
    /// first word.
    fn get_blocks(&mut self, entry: &DecsysEntry, file_type: FileType) -> Result<Vec<u64>> {
        if entry.file_type == FileType::System {
            let block_number = entry.block_number;
            if block_number == 0 {
                return Ok(Vec::new());
            }
            let mut num_blocks = 0u64;
            loop {
                if block_number + num_blocks >= DECTAPE_BLOCKS {
                    // No terminator before the end of the medium
                    break;
                }
                let buffer = self.read_words(block_number + num_blocks)?;
                let num_words = (0o1000000 - buffer[0] as u64) & 0o777777;
                let span = (num_words + 2).div_ceil(WORDS_PER_BLOCK as u64);
                let last_block = block_number + num_blocks + span - 1;
                if last_block >= DECTAPE_BLOCKS {
                    break;
                }
                let buffer = if span > 1 {
                    self.read_words(last_block)?
                } else {
                    buffer
                };
                let last_word = buffer[((num_words + 2) % WORDS_PER_BLOCK as u64) as usize];
                num_blocks += span;
                if last_word == 0o777777 {
                    break;
                }
            }
            Ok((block_number..block_number + num_blocks).collect())
        } else {
            let mut next_block_number = entry.fork_block(file_type);
            let mut blocks = Vec::new();
            while next_block_number != 0 {
                if blocks.contains(&next_block_number) {
                    return Err(FsError::corrupt(format!(
                        "linked file loops at block {}",
                        next_block_number
                    )));
                }
                blocks.push(next_block_number);
                next_block_number = self.read_words(next_block_number)?[0] as u64;
            }
            Ok(blocks)
        }
    }

    /// Resolve a `T,NAME` path to its entry and effective fork type.
    fn locate(&mut self, fullname: &str) -> Result<(DecsysEntry, FileType)> {
        let (file_type, filename) = decsys_split_fullname(fullname, false)?;
        for entry in self.read_dir_entries()? {
            if entry.filename != filename {
                continue;
            }
            match file_type {
                None => return Ok((entry.clone(), entry.file_type)),
                Some(t @ (FileType::Fortran | FileType::Assembler | FileType::Binary)) => {
                    if entry.file_type == FileType::Working {
                        return Ok((entry, t));
                    }
                }
                Some(t) => {
                    if entry.file_type == t {
                        return Ok((entry, t));
                    }
                }
            }
        }
        Err(FsError::NotFound(fullname.to_string()))
    }

    /// The file content as 18-bit words, prologues stripped.
    fn read_entry_words(&mut self, entry: &DecsysEntry, file_type: FileType) -> Result<Vec<u32>> {
        let blocks = self.get_blocks(entry, file_type)?;
        let mut data = Vec::new();
        if entry.file_type == FileType::System {
            let mut num_words = 0u64;
            for (i, block) in blocks.iter().enumerate() {
                let mut words = self.read_words(*block)?;
                if i == 0 {
                    num_words = (0o1000000 - words[0] as u64) & 0o777777;
                    words.drain(..2);
                }
                words.truncate(num_words as usize);
                num_words -= words.len() as u64;
                data.extend(words);
                if num_words == 0 {
                    break;
                }
            }
        } else {
            for block in blocks {
                let words = self.read_words(block)?;
                let num_words = ((0o1000000 - words[1] as u64) & 0o777777) as usize;
                data.extend(&words[2..(2 + num_words).min(words.len())]);
            }
        }
        Ok(data)
    }

    /// Every block referenced by any file, computed by chasing every
    /// chain.
    pub fn get_allocated_blocks(&mut self) -> Result<Vec<u64>> {
        let mut blocks: Vec<u64> = (0..FIRST_FILE_BLOCK).collect();
        for entry in self.read_dir_entries()? {
            if entry.file_type == FileType::Working {
                for file_type in [FileType::Fortran, FileType::Assembler, FileType::Binary] {
                    blocks.extend(self.get_blocks(&entry, file_type)?);
                }
            } else {
                blocks.extend(self.get_blocks(&entry, entry.file_type)?);
            }
        }
        Ok(blocks)
    }

    /// Allocate blocks for a linked file, writing the block prologues.
    /// Returns the blocks and the new first-free-block number.
    fn allocate_space(&mut self, number_of_blocks: usize) -> Result<(Vec<u64>, u64)> {
        let allocated = self.get_allocated_blocks()?;
        let mut blocks = Vec::with_capacity(number_of_blocks);
        for block in FIRST_FILE_BLOCK..=LAST_FILE_BLOCK {
            if blocks.len() == number_of_blocks {
                break;
            }
            if !allocated.contains(&block) {
                blocks.push(block);
            }
        }
        if blocks.len() < number_of_blocks {
            return Err(FsError::NoSpace("tape is full".to_string()));
        }
        log::debug!("allocated blocks {:?}", blocks);
        for (i, &block) in blocks.iter().enumerate() {
            let next = blocks.get(i + 1).copied().unwrap_or(0);
            let mut words = vec![0u32; WORDS_PER_BLOCK];
            words[0] = next as u32;
            words[1] = (0o1000000 - LINKED_FILE_WORDS_PER_BLOCK as u32) & 0o777777;
            self.write_words(block, &words)?;
        }
        let first_free_block = allocated
            .iter()
            .chain(blocks.iter())
            .max()
            .copied()
            .unwrap_or(FIRST_FILE_BLOCK)
            + 1;
        Ok((blocks, first_free_block))
    }

    /// Write words into a linked chain, rewriting the prologues.
    fn write_linked_words(&mut self, blocks: &[u64], words: &[u32]) -> Result<()> {
        for (i, &block) in blocks.iter().enumerate() {
            let next = blocks.get(i + 1).copied().unwrap_or(0);
            let from = i * LINKED_FILE_WORDS_PER_BLOCK;
            let chunk = words
                .get(from..(from + LINKED_FILE_WORDS_PER_BLOCK).min(words.len()))
                .unwrap_or(&[]);
            let mut block_words = vec![next as u32, (0o1000000 - chunk.len() as u32) & 0o777777];
            block_words.extend_from_slice(chunk);
            block_words.resize(WORDS_PER_BLOCK, 0);
            self.write_words(block, &block_words)?;
        }
        Ok(())
    }

    fn create_decsys_file(
        &mut self,
        fullname: &str,
        number_of_blocks: usize,
    ) -> Result<(DecsysEntry, FileType, Vec<u64>)> {
        if self.dev.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let (file_type, filename) = decsys_split_fullname(fullname, false)?;
        let file_type = match file_type {
            None => {
                return Err(FsError::InvalidArg(
                    "specify the file type as TYPE,FILENAME".to_string(),
                ));
            }
            Some(FileType::System) => {
                return Err(FsError::InvalidArg(
                    "SYSTEM files cannot be created".to_string(),
                ));
            }
            Some(FileType::Library) => FileType::Binary,
            Some(t) => t,
        };
        let (blocks, first_free_block) = self.allocate_space(number_of_blocks)?;
        let mut directory = self.read_program_directory()?;
        let first_block = blocks.first().copied().unwrap_or(0);
        match directory
            .entries
            .iter_mut()
            .find(|e| e.filename == filename && e.file_type == FileType::Working)
        {
            Some(entry) => {
                entry.set_fork_block(file_type, first_block);
            }
            None => {
                let mut entry = DecsysEntry {
                    filename: filename.clone(),
                    file_type: FileType::Working,
                    block_number: 0,
                    fortran_block_number: 0,
                    assembler_block_number: 0,
                    starting_address: 0,
                };
                entry.set_fork_block(file_type, first_block);
                directory.entries.push(entry);
            }
        }
        directory.first_free_block = first_free_block;
        self.write_program_directory(&directory)?;
        let (entry, file_type) = self.locate(fullname)?;
        Ok((entry, file_type, blocks))
    }

    /// Write an empty DECSys tape: blank labels and empty directories.
    pub fn initialize(&mut self) -> Result<()> {
        self.write_tape_label("", "")?;
        self.write_program_directory(&ProgramDirectory {
            entries: Vec::new(),
            first_free_block: FIRST_FILE_BLOCK,
        })?;
        self.write_library_directory(&LibraryDirectory {
            entries: Vec::new(),
        })
    }

    fn entry_to_file_entry(&mut self, entry: &DecsysEntry, file_type: FileType) -> FileEntry {
        let blocks = self.get_blocks(entry, file_type).unwrap_or_default();
        let block_size = if entry.file_type == FileType::System {
            WORDS_PER_BLOCK * 3
        } else {
            LINKED_FILE_WORDS_PER_BLOCK * 3
        };
        let mut file_entry = FileEntry::new(format!("{},{}", file_type.short(), entry.filename))
            .with_blocks(blocks.len() as u64, block_size)
            .with_type(file_type.name());
        file_entry.basename = entry.filename.clone();
        file_entry.read_only = entry.file_type == FileType::System;
        file_entry
    }
}

impl Filesystem for DecsysFs {
    fn fs_name(&self) -> &'static str {
        "decsys"
    }

    fn fs_description(&self) -> &'static str {
        "PDP-7 DECSys"
    }

    fn size(&mut self) -> Result<u64> {
        self.dev.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        let entries = self.read_dir_entries()?;
        Ok(entries
            .iter()
            .map(|e| self.entry_to_file_entry(e, e.file_type))
            .collect())
    }

    fn filter_entries(
        &mut self,
        pattern: Option<&str>,
        _include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<FileEntry>> {
        let (file_type, name_pattern) = match pattern {
            Some(pattern) => {
                let (t, p) = decsys_split_fullname(pattern, true)?;
                (t, if p.is_empty() { None } else { Some(p) })
            }
            None => (None, None),
        };
        let mut result = Vec::new();
        for entry in self.read_dir_entries()? {
            if !filename_match(&entry.filename, name_pattern.as_deref(), wildcard) {
                continue;
            }
            let effective = match file_type {
                None => entry.file_type,
                Some(t @ (FileType::Fortran | FileType::Assembler | FileType::Binary)) => {
                    if entry.file_type != FileType::Working {
                        continue;
                    }
                    t
                }
                Some(t) => {
                    if entry.file_type != t {
                        continue;
                    }
                    t
                }
            };
            result.push(self.entry_to_file_entry(&entry, effective));
        }
        Ok(result)
    }

    fn entry(&mut self, path: &str) -> Result<FileEntry> {
        let (entry, file_type) = self.locate(path)?;
        Ok(self.entry_to_file_entry(&entry, file_type))
    }

    fn read_bytes(&mut self, path: &str, mode: Option<FileMode>) -> Result<Vec<u8>> {
        let (entry, file_type) = self.locate(path)?;
        let mode = mode.unwrap_or_else(|| file_type.file_mode());
        let words = self.read_entry_words(&entry, file_type)?;
        Ok(match mode {
            FileMode::Ascii => fiodec_to_str(&words).into_bytes(),
            FileMode::Image => words18_to_bytes(&words, FileMode::Image),
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
        let (file_type, _) = decsys_split_fullname(path, false)?;
        let mode = mode.unwrap_or_else(|| {
            file_type.map(FileType::file_mode).unwrap_or(FileMode::Ascii)
        });
        let words = match mode {
            FileMode::Ascii => {
                let text = String::from_utf8_lossy(data);
                str_to_fiodec(&text)
            }
            FileMode::Image => bytes_to_words18(data, FileMode::Image),
        };
        let number_of_blocks = words.len().div_ceil(LINKED_FILE_WORDS_PER_BLOCK).max(1);
        let (_, _, blocks) = self.create_decsys_file(path, number_of_blocks)?;
        self.write_linked_words(&blocks, &words)
    }

    fn create_file(
        &mut self,
        path: &str,
        blocks: u64,
        _creation_date: Option<NaiveDate>,
        _file_type: Option<&str>,
    ) -> Result<FileEntry> {
        let (entry, file_type, _) = self.create_decsys_file(path, blocks.max(1) as usize)?;
        Ok(self.entry_to_file_entry(&entry, file_type))
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if self.dev.is_read_only() {
            return Err(FsError::ReadOnlyFs);
        }
        let (entry, file_type) = self.locate(path)?;
        match entry.file_type {
            FileType::Library => {
                let mut directory = self.read_library_directory()?;
                directory.entries.retain(|e| e.filename != entry.filename);
                self.write_library_directory(&directory)
            }
            FileType::Working
                if matches!(
                    file_type,
                    FileType::Fortran | FileType::Assembler | FileType::Binary
                ) =>
            {
                // Deallocate one fork; the entry stays.
                let mut directory = self.read_program_directory()?;
                if let Some(e) = directory
                    .entries
                    .iter_mut()
                    .find(|e| e.filename == entry.filename)
                {
                    e.set_fork_block(file_type, 0);
                }
                self.write_program_directory(&directory)
            }
            _ => {
                let mut directory = self.read_program_directory()?;
                directory.entries.retain(|e| e.filename != entry.filename);
                self.write_program_directory(&directory)
            }
        }
    }

    fn dir(
        &mut self,
        _volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        if !options.brief {
            let (label1, label2) = self.read_tape_label()?;
            writeln!(out, "{}  {}", label1, label2).map_err(FsError::Io)?;
        }
        for entry in self.read_dir_entries()? {
            let (file_type, name_pattern) = match pattern {
                Some(pattern) => decsys_split_fullname(pattern, true)?,
                None => (None, String::new()),
            };
            if !name_pattern.is_empty()
                && !filename_match(&entry.filename, Some(&name_pattern), true)
            {
                continue;
            }
            if let Some(t) = file_type {
                let matches = match t {
                    FileType::Fortran | FileType::Assembler | FileType::Binary => {
                        entry.file_type == FileType::Working
                    }
                    t => entry.file_type == t,
                };
                if !matches {
                    continue;
                }
            }
            if options.brief {
                writeln!(out, "{}", entry.filename).map_err(FsError::Io)?;
            } else {
                match entry.file_type {
                    FileType::System => writeln!(
                        out,
                        "{} S {:04}",
                        entry.filename, entry.block_number
                    )
                    .map_err(FsError::Io)?,
                    FileType::Library => writeln!(
                        out,
                        "{}, L {:04}",
                        entry.filename, entry.block_number
                    )
                    .map_err(FsError::Io)?,
                    _ => writeln!(
                        out,
                        "{} W {:04},{:04},{:04}",
                        entry.filename,
                        entry.fortran_block_number,
                        entry.assembler_block_number,
                        entry.block_number
                    )
                    .map_err(FsError::Io)?,
                }
            }
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
            let mut allocated = self.get_allocated_blocks()?;
            allocated.sort_unstable();
            let tmp: Vec<String> = allocated.iter().map(|x| format!("{:04}", x)).collect();
            writeln!(out, "Allocated Blocks: {}", tmp.join(", ")).map_err(FsError::Io)?;
            return Ok(());
        }
        if let Some(arg) = arg {
            let (entry, _) = self.locate(arg)?;
            writeln!(out, "Filename:                 {}", entry.filename).map_err(FsError::Io)?;
            writeln!(out, "File type:                {}", entry.file_type.name())
                .map_err(FsError::Io)?;
            match entry.file_type {
                FileType::System => {
                    let blocks = self.get_blocks(&entry, FileType::System)?;
                    writeln!(out, "Blocks:                   {:?}", blocks).map_err(FsError::Io)?;
                    writeln!(
                        out,
                        "Starting address:         {:>06}",
                        entry.starting_address
                    )
                    .map_err(FsError::Io)?;
                }
                FileType::Library => {
                    let blocks = self.get_blocks(&entry, FileType::Library)?;
                    writeln!(out, "Blocks:                   {:?}", blocks).map_err(FsError::Io)?;
                }
                _ => {
                    for t in [FileType::Fortran, FileType::Assembler, FileType::Binary] {
                        let blocks = self.get_blocks(&entry, t)?;
                        writeln!(out, "{:<9} Blocks:         {:?}", t.name(), blocks)
                            .map_err(FsError::Io)?;
                    }
                }
            }
            return Ok(());
        }
        let (label1, label2) = self.read_tape_label()?;
        writeln!(out, "Label 1:                  {}", label1).map_err(FsError::Io)?;
        writeln!(out, "Label 2:                  {}", label2).map_err(FsError::Io)?;
        let directory = self.read_program_directory()?;
        writeln!(
            out,
            "First free block number:  {:04}\n",
            directory.first_free_block
        )
        .map_err(FsError::Io)?;
        writeln!(out, "Filename        Type     Address  Length").map_err(FsError::Io)?;
        writeln!(out, "--------        ----     -------  ------").map_err(FsError::Io)?;
        for entry in self.read_dir_entries()? {
            let forks: Vec<FileType> = if entry.file_type == FileType::Working {
                vec![FileType::Fortran, FileType::Assembler, FileType::Binary]
            } else {
                vec![entry.file_type]
            };
            for file_type in forks {
                let blocks = self.get_blocks(&entry, file_type)?;
                let block = blocks.first().copied().unwrap_or(0);
                writeln!(
                    out,
                    "{:<15} {:<10}  {:04}  {}",
                    format!("{},{}", file_type.short(), entry.filename),
                    file_type.name(),
                    block,
                    blocks.len()
                )
                .map_err(FsError::Io)?;
            }
        }
        Ok(())
    }

    fn file_types(&self) -> Vec<String> {
        ["SYSTEM", "WORKING", "LIBRARY", "FORTRAN", "ASSEMBLER", "BINARY"]
            .iter()
            .map(|s| s.to_string())
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
    use pretty_assertions::assert_eq;

    fn new_fs() -> DecsysFs {
        let file = ByteFile::with_size(DECTAPE_BLOCKS as usize * WORDS_PER_BLOCK * 4);
        let mut fs = DecsysFs::mount(file).unwrap();
        fs.initialize().unwrap();
        fs
    }

    #[test]
    fn test_tape_label_roundtrip() {
        let mut fs = new_fs();
        fs.write_tape_label("CAB DECSYS7 COPY", "15 JUNE 1966").unwrap();
        let (label1, label2) = fs.read_tape_label().unwrap();
        assert_eq!(label1, "CAB DECSYS7 COPY");
        assert_eq!(label2, "15 JUNE 1966");
    }

    #[test]
    fn test_fortran_source_roundtrip() {
        let mut fs = new_fs();
        let source = "C FORTRAN TEST\n      X = 1\n      END\n";
        fs.write_bytes("F,HELLO", source.as_bytes(), None, None, None)
            .unwrap();
        let data = fs.read_bytes("F,HELLO", None).unwrap();
        let text = String::from_utf8(data).unwrap();
        assert!(text.starts_with(source));
    }

    #[test]
    fn test_working_forks_are_independent() {
        let mut fs = new_fs();
        fs.write_bytes("F,PROG", b"FORTRAN SOURCE\n", None, None, None).unwrap();
        fs.write_bytes("A,PROG", b"ASSEMBLER SOURCE\n", None, None, None).unwrap();
        let entries = fs.read_dir_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_ne!(entries[0].fortran_block_number, 0);
        assert_ne!(entries[0].assembler_block_number, 0);
        let f = String::from_utf8(fs.read_bytes("F,PROG", None).unwrap()).unwrap();
        let a = String::from_utf8(fs.read_bytes("A,PROG", None).unwrap()).unwrap();
        assert!(f.contains("FORTRAN"));
        assert!(a.contains("ASSEMBLER"));
    }

    #[test]
    fn test_allocation_skips_used_blocks() {
        let mut fs = new_fs();
        fs.write_bytes("F,ONE", &[b'X'; 600], None, None, None).unwrap();
        fs.write_bytes("F,TWO", &[b'Y'; 600], None, None, None).unwrap();
        let allocated = fs.get_allocated_blocks().unwrap();
        let unique: std::collections::HashSet<u64> = allocated.iter().copied().collect();
        assert_eq!(allocated.len(), unique.len());
    }

    #[test]
    fn test_type_prefix_required_for_create() {
        let mut fs = new_fs();
        assert!(matches!(
            fs.write_bytes("HELLO", b"X", None, None, None),
            Err(FsError::InvalidArg(_))
        ));
    }

    #[test]
    fn test_binary_fork_image_roundtrip() {
        let mut fs = new_fs();
        let content: Vec<u8> = (0..300u32).map(|i| (i % 63) as u8 + 0x80).collect();
        fs.write_bytes("B,OBJ", &content, None, None, Some(FileMode::Image))
            .unwrap();
        let data = fs.read_bytes("B,OBJ", Some(FileMode::Image)).unwrap();
        assert_eq!(&data[..content.len()], &content[..]);
    }
}
