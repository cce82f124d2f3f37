//! RT-11 directory segments.
//!
//! A segment is two blocks: a five-word header followed by fixed-size
//! entries (14 bytes plus the volume's extra bytes). Entries cover the
//! data area in strict block-ascending order; the last entry of a segment
//! carries the end-of-segment flag.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use chrono::NaiveDate;
use strata_common::dates::rt11_to_date;
use strata_common::enc::rad50::{asc2rad, rad2asc};
use strata_common::{bytes_to_word, word_to_bytes};
use strata_core::{EntryStatus, FileEntry};

use strata_io::BLOCK_SIZE;

pub const DIR_ENTRY_SIZE: usize = 14;
pub const SEGMENT_HEADER_SIZE: usize = 10;
pub const SEGMENT_SIZE: usize = BLOCK_SIZE * 2;

bitflags! {
    /// Directory entry class bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryClass: u8 {
        /// Tentative file.
        const TENT = 0o001;
        /// Empty area.
        const MPTY = 0o002;
        /// Permanent file.
        const PERM = 0o004;
        /// End-of-segment marker.
        const EOS  = 0o010;
        /// Protected from write.
        const READ = 0o100;
        /// Protected permanent file.
        const PROT = 0o200;
    }
}

/// On-disk shape of the five-word segment header.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawSegmentHeader {
    /// Total number of segments in this directory (1-31).
    pub num_of_segments: [u8; 2],
    /// Segment number of the next logical directory segment, 0 at the end.
    pub next_logical_dir_segment: [u8; 2],
    /// Number of the highest segment currently in use.
    pub highest_segment: [u8; 2],
    /// Extra bytes per directory entry.
    pub extra_bytes: [u8; 2],
    /// Block number where the data identified by this segment begins.
    pub data_block_number: [u8; 2],
}

/// On-disk shape of a directory entry (without extra bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawDirEntry {
    pub entry_type: u8,
    pub class: u8,
    /// Filename, chars 1-3 (RAD50).
    pub name1: [u8; 2],
    /// Filename, chars 4-6 (RAD50).
    pub name2: [u8; 2],
    /// Extension (RAD50).
    pub ext: [u8; 2],
    /// Length in blocks.
    pub length: [u8; 2],
    pub job: u8,
    pub channel: u8,
    /// Packed creation date.
    pub date: [u8; 2],
}

/// A parsed directory entry plus its computed file position.
#[derive(Debug, Clone)]
pub struct Rt11Entry {
    pub entry_type: u8,
    pub class: EntryClass,
    pub filename: String,
    pub filetype: String,
    /// Length in blocks.
    pub length: u64,
    pub job: u8,
    pub channel: u8,
    pub raw_creation_date: u16,
    pub extra_bytes: Vec<u8>,
    /// First data block of this entry.
    pub file_position: u64,
}

impl Rt11Entry {
    pub fn read(buffer: &[u8], position: usize, file_position: u64, extra_bytes: usize) -> Self {
        let raw: &RawDirEntry =
            bytemuck::from_bytes(&buffer[position..position + DIR_ENTRY_SIZE]);
        Self {
            entry_type: raw.entry_type,
            class: EntryClass::from_bits_retain(raw.class),
            filename: rad2asc(&raw.name1, 0) + &rad2asc(&raw.name2, 0),
            filetype: rad2asc(&raw.ext, 0),
            length: bytes_to_word(buffer, position + 8) as u64,
            job: raw.job,
            channel: raw.channel,
            raw_creation_date: bytes_to_word(buffer, position + 12),
            extra_bytes: buffer[position + DIR_ENTRY_SIZE..position + DIR_ENTRY_SIZE + extra_bytes]
                .to_vec(),
            file_position,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DIR_ENTRY_SIZE + self.extra_bytes.len());
        out.push(self.entry_type);
        out.push(self.class.bits());
        let name = &self.filename;
        let split = name.len().min(3);
        out.extend_from_slice(&asc2rad(&name[..split]));
        out.extend_from_slice(&asc2rad(&name[split..name.len().min(6)]));
        out.extend_from_slice(&asc2rad(&self.filetype));
        out.extend_from_slice(&word_to_bytes(self.length as u16));
        out.push(self.job);
        out.push(self.channel);
        out.extend_from_slice(&word_to_bytes(self.raw_creation_date));
        out.extend_from_slice(&self.extra_bytes);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.class.contains(EntryClass::MPTY)
    }

    pub fn is_tentative(&self) -> bool {
        self.class.contains(EntryClass::TENT)
    }

    pub fn is_permanent(&self) -> bool {
        self.class.contains(EntryClass::PERM)
    }

    pub fn is_end_of_segment(&self) -> bool {
        self.class.contains(EntryClass::EOS)
    }

    pub fn is_protected_by_monitor(&self) -> bool {
        self.class.contains(EntryClass::READ)
    }

    pub fn is_protected_permanent(&self) -> bool {
        self.class.contains(EntryClass::PROT)
    }

    pub fn fullname(&self) -> String {
        format!("{}.{}", self.filename, self.filetype)
    }

    pub fn creation_date(&self) -> Option<NaiveDate> {
        rt11_to_date(self.raw_creation_date)
    }

    pub fn to_file_entry(&self) -> FileEntry {
        let mut entry = FileEntry::new(self.fullname())
            .with_blocks(self.length, BLOCK_SIZE)
            .with_date(self.creation_date());
        entry.read_only = self.is_protected_by_monitor();
        entry.protected = self.is_protected_permanent();
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

/// A volume directory segment: header, entries, end-of-segment marker.
#[derive(Debug, Clone)]
pub struct Rt11Segment {
    /// Block number of this directory segment.
    pub block_number: u64,
    /// Total number of segments in this directory (1-31).
    pub num_of_segments: u16,
    /// Segment number of the next logical directory segment, 0 at the end.
    pub next_logical_dir_segment: u16,
    /// Number of the highest segment currently in use.
    pub highest_segment: u16,
    /// Extra bytes per directory entry.
    pub extra_bytes: u16,
    /// Block number where the data identified by this segment begins.
    pub data_block_number: u16,
    pub max_entries: usize,
    pub entries: Vec<Rt11Entry>,
}

impl Rt11Segment {
    pub fn from_bytes(block_number: u64, buffer: &[u8]) -> Self {
        let header: &RawSegmentHeader =
            bytemuck::from_bytes(&buffer[..SEGMENT_HEADER_SIZE]);
        let num_of_segments = u16::from_le_bytes(header.num_of_segments);
        let next_logical_dir_segment = u16::from_le_bytes(header.next_logical_dir_segment);
        let highest_segment = u16::from_le_bytes(header.highest_segment);
        let extra_bytes = u16::from_le_bytes(header.extra_bytes);
        let data_block_number = u16::from_le_bytes(header.data_block_number);

        let dir_entry_size = DIR_ENTRY_SIZE + extra_bytes as usize;
        let max_entries = (SEGMENT_SIZE - SEGMENT_HEADER_SIZE) / dir_entry_size;
        let mut entries = Vec::new();
        let mut file_position = data_block_number as u64;
        let mut position = SEGMENT_HEADER_SIZE;
        while position < SEGMENT_SIZE - dir_entry_size {
            let entry = Rt11Entry::read(buffer, position, file_position, extra_bytes as usize);
            file_position += entry.length;
            let end = entry.is_end_of_segment();
            entries.push(entry);
            if end {
                break;
            }
            position += dir_entry_size;
        }

        Self {
            block_number,
            num_of_segments,
            next_logical_dir_segment,
            highest_segment,
            extra_bytes,
            data_block_number,
            max_entries,
            entries,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let header = RawSegmentHeader {
            num_of_segments: self.num_of_segments.to_le_bytes(),
            next_logical_dir_segment: self.next_logical_dir_segment.to_le_bytes(),
            highest_segment: self.highest_segment.to_le_bytes(),
            extra_bytes: self.extra_bytes.to_le_bytes(),
            data_block_number: self.data_block_number.to_le_bytes(),
        };
        let mut out = Vec::with_capacity(SEGMENT_SIZE);
        out.extend_from_slice(bytemuck::bytes_of(&header));
        for entry in &self.entries {
            out.extend_from_slice(&entry.to_bytes());
        }
        out.resize(SEGMENT_SIZE, 0);
        out
    }

    /// Block number of the next directory segment, 0 at the end of the
    /// chain.
    pub fn next_block_number(&self, dir_segment: u64) -> u64 {
        if self.next_logical_dir_segment == 0 {
            0
        } else {
            (self.next_logical_dir_segment as u64 - 1) * 2 + dir_segment
        }
    }

    /// Coalesce runs of adjacent empty entries, inheriting the
    /// end-of-segment flag from the absorbed entry.
    pub fn compact(&mut self) {
        let mut new_entries: Vec<Rt11Entry> = Vec::with_capacity(self.entries.len());
        let mut prev_empty: Option<usize> = None;
        for entry in self.entries.drain(..) {
            if !entry.is_empty() {
                prev_empty = None;
                new_entries.push(entry);
            } else if let Some(i) = prev_empty {
                new_entries[i].length += entry.length;
                if entry.is_end_of_segment() {
                    new_entries[i].class |= EntryClass::EOS;
                }
            } else {
                prev_empty = Some(new_entries.len());
                new_entries.push(entry);
            }
        }
        self.entries = new_entries;
    }

    /// Shrink the empty entry at `index` to `length` blocks and insert a
    /// new empty successor covering the remainder. No-op when the entry
    /// fits exactly.
    pub fn insert_entry_after(&mut self, index: usize, length: u64) {
        let entry = &mut self.entries[index];
        if entry.length == length {
            return;
        }
        let mut new_entry = entry.clone();
        if entry.is_end_of_segment() {
            new_entry.class = EntryClass::EOS;
            entry.class -= EntryClass::EOS;
        }
        new_entry.length = entry.length - length;
        new_entry.file_position = entry.file_position + length;
        entry.length = length;
        self.entries.insert(index + 1, new_entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of, size_of};
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<RawSegmentHeader>(), SEGMENT_HEADER_SIZE);
    const_assert_eq!(align_of::<RawSegmentHeader>(), 1);

    const_assert_eq!(offset_of!(RawSegmentHeader, num_of_segments), 0);
    const_assert_eq!(offset_of!(RawSegmentHeader, next_logical_dir_segment), 2);
    const_assert_eq!(offset_of!(RawSegmentHeader, highest_segment), 4);
    const_assert_eq!(offset_of!(RawSegmentHeader, extra_bytes), 6);
    const_assert_eq!(offset_of!(RawSegmentHeader, data_block_number), 8);

    const_assert_eq!(size_of::<RawDirEntry>(), DIR_ENTRY_SIZE);
    const_assert_eq!(align_of::<RawDirEntry>(), 1);

    const_assert_eq!(offset_of!(RawDirEntry, entry_type), 0);
    const_assert_eq!(offset_of!(RawDirEntry, class), 1);
    const_assert_eq!(offset_of!(RawDirEntry, name1), 2);
    const_assert_eq!(offset_of!(RawDirEntry, name2), 4);
    const_assert_eq!(offset_of!(RawDirEntry, ext), 6);
    const_assert_eq!(offset_of!(RawDirEntry, length), 8);
    const_assert_eq!(offset_of!(RawDirEntry, job), 10);
    const_assert_eq!(offset_of!(RawDirEntry, channel), 11);
    const_assert_eq!(offset_of!(RawDirEntry, date), 12);

    fn empty_entry(length: u64, position: u64, class: EntryClass) -> Rt11Entry {
        Rt11Entry {
            entry_type: 0,
            class,
            filename: String::new(),
            filetype: String::new(),
            length,
            job: 0,
            channel: 0,
            raw_creation_date: 0,
            extra_bytes: Vec::new(),
            file_position: position,
        }
    }

    #[test]
    fn test_compact_coalesces_and_inherits_eos() {
        let mut segment = Rt11Segment {
            block_number: 6,
            num_of_segments: 1,
            next_logical_dir_segment: 0,
            highest_segment: 1,
            extra_bytes: 0,
            data_block_number: 8,
            max_entries: 72,
            entries: vec![
                empty_entry(5, 8, EntryClass::MPTY),
                empty_entry(7, 13, EntryClass::MPTY),
                empty_entry(0, 20, EntryClass::MPTY | EntryClass::EOS),
            ],
        };
        segment.compact();
        assert_eq!(segment.entries.len(), 1);
        assert_eq!(segment.entries[0].length, 12);
        assert!(segment.entries[0].is_end_of_segment());
    }

    #[test]
    fn test_insert_entry_after_splits_empty() {
        let mut segment = Rt11Segment {
            block_number: 6,
            num_of_segments: 1,
            next_logical_dir_segment: 0,
            highest_segment: 1,
            extra_bytes: 0,
            data_block_number: 8,
            max_entries: 72,
            entries: vec![empty_entry(20, 8, EntryClass::MPTY | EntryClass::EOS)],
        };
        segment.insert_entry_after(0, 5);
        assert_eq!(segment.entries.len(), 2);
        assert_eq!(segment.entries[0].length, 5);
        assert!(!segment.entries[0].is_end_of_segment());
        assert_eq!(segment.entries[1].length, 15);
        assert_eq!(segment.entries[1].file_position, 13);
        assert!(segment.entries[1].is_end_of_segment());
    }

    #[test]
    fn test_segment_bytes_roundtrip() {
        let mut entry = empty_entry(10, 8, EntryClass::PERM | EntryClass::EOS);
        entry.filename = "HELLO ".trim().to_string();
        entry.filetype = "TXT".to_string();
        entry.raw_creation_date = 0o45123;
        let segment = Rt11Segment {
            block_number: 6,
            num_of_segments: 4,
            next_logical_dir_segment: 0,
            highest_segment: 1,
            extra_bytes: 0,
            data_block_number: 14,
            max_entries: 72,
            entries: vec![entry],
        };
        let parsed = Rt11Segment::from_bytes(6, &segment.to_bytes());
        assert_eq!(parsed.num_of_segments, 4);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].fullname(), "HELLO.TXT");
        assert_eq!(parsed.entries[0].length, 10);
        assert_eq!(parsed.entries[0].raw_creation_date, 0o45123);
    }
}
