//! RT-11 filesystem driver.
//!
//! Block 1 is the home block; the directory is a chain of two-block
//! segments starting at the block named there (6 by default). Files are
//! contiguous runs of blocks described by their directory entries.

use std::collections::HashSet;
use std::io::Write;

use chrono::NaiveDate;
use strata_common::dates::date_to_rt11;
use strata_common::enc::rad50::{asc2rad, rad2asc};
use strata_common::{FileMode, bytes_to_word, filename_match, word_to_bytes};
use strata_core::{DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result};
use strata_io::rx::{
    RX_SECTOR_TRACK, RX01_SECTOR_SIZE, RX01_SIZE, RX02_SECTOR_SIZE, RX02_SIZE,
};
use strata_io::{BLOCK_SIZE, BlockDevice, ByteFile};

pub use dir::{EntryClass, Rt11Entry, Rt11Segment};
use dir::{SEGMENT_SIZE, SEGMENT_HEADER_SIZE, DIR_ENTRY_SIZE};

mod dir;

const HOME_BLOCK: u64 = 1;
const DEFAULT_DIR_SEGMENT: u64 = 6;

/// Canonical RT-11 `NAME.EXT` form of a filename: uppercased and filtered
/// through RAD50 so only representable characters survive.
pub fn rt11_canonical_filename(fullname: &str, wildcard: bool) -> String {
    let fullname = fullname.to_uppercase();
    let (filename, filetype) = match fullname.split_once('.') {
        Some((name, ext)) => (name.to_string(), ext.to_string()),
        None => (fullname, if wildcard { "*".to_string() } else { String::new() }),
    };
    let head = rad2asc(&asc2rad(&filename[..filename.len().min(3)]), 0);
    let tail = rad2asc(
        &asc2rad(&filename[filename.len().min(3)..filename.len().min(6)]),
        0,
    );
    let filetype = rad2asc(&asc2rad(&filetype), 0);
    format!("{}{}.{}", head, tail, filetype)
}

/// RT-11 filesystem over a block device.
pub struct Rt11Fs {
    dev: BlockDevice,
    /// First directory segment block.
    pub dir_segment: u64,
    /// System version (RAD50).
    pub ver: String,
    /// Volume identification.
    pub id: String,
    /// Owner name.
    pub owner: String,
    /// System identification.
    pub sys_id: String,
    pub checksum: u16,
}

impl Rt11Fs {
    pub fn mount(file: ByteFile) -> Result<Self> {
        let dev = BlockDevice::new(file)?;
        let mut fs = Self {
            dev,
            dir_segment: DEFAULT_DIR_SEGMENT,
            ver: String::new(),
            id: String::new(),
            owner: String::new(),
            sys_id: String::new(),
            checksum: 0,
        };
        fs.read_home()?;
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

    fn read_home(&mut self) -> Result<()> {
        let t = self.read_block(HOME_BLOCK, 1)?;
        let dir_segment = bytes_to_word(&t, 468);
        self.dir_segment = if dir_segment != 0 {
            dir_segment as u64
        } else {
            DEFAULT_DIR_SEGMENT
        };
        self.ver = rad2asc(&t, 470);
        self.id = ascii_field(&t[472..484]);
        self.owner = ascii_field(&t[484..496]);
        self.sys_id = ascii_field(&t[496..508]);
        self.checksum = bytes_to_word(&t, 510);
        Ok(())
    }

    fn write_home(&mut self) -> Result<()> {
        let mut home = vec![0u8; BLOCK_SIZE];
        home[468..470].copy_from_slice(&word_to_bytes(self.dir_segment as u16));
        home[470..472].copy_from_slice(&asc2rad(&self.ver));
        copy_padded(&mut home[472..484], self.id.as_bytes());
        copy_padded(&mut home[484..496], self.owner.as_bytes());
        copy_padded(&mut home[496..508], self.sys_id.as_bytes());
        home[510..512].copy_from_slice(&word_to_bytes(0));
        self.write_block(&home, HOME_BLOCK, 1)
    }

    /// Read the whole directory segment chain.
    pub fn read_dir_segments(&mut self) -> Result<Vec<Rt11Segment>> {
        let mut segments = Vec::new();
        let mut visited = HashSet::new();
        let mut next_block_number = self.dir_segment;
        while next_block_number != 0 {
            if !visited.insert(next_block_number) {
                return Err(FsError::corrupt(format!(
                    "directory segment chain loops at block {}",
                    next_block_number
                )));
            }
            let buffer = self.read_block(next_block_number, 2)?;
            let segment = Rt11Segment::from_bytes(next_block_number, &buffer);
            next_block_number = segment.next_block_number(self.dir_segment);
            segments.push(segment);
        }
        Ok(segments)
    }

    fn write_segment(&mut self, segment: &Rt11Segment) -> Result<()> {
        self.write_block(&segment.to_bytes(), segment.block_number, 2)
    }

    /// Locate a permanent file, returning its segment and entry index.
    fn locate(&mut self, fullname: &str) -> Result<Option<(Rt11Segment, usize)>> {
        let fullname = rt11_canonical_filename(fullname, false);
        for segment in self.read_dir_segments()? {
            for (i, entry) in segment.entries.iter().enumerate() {
                if entry.is_permanent() && entry.fullname() == fullname {
                    return Ok(Some((segment, i)));
                }
            }
        }
        Ok(None)
    }

    /// Split the segment holding the empty entry at `entry_index`.
    ///
    /// Entries past the chosen one move to a fresh segment taken from the
    /// lowest unused segment block, linked after the old one; the old
    /// segment's last entry gets the end-of-segment flag and the count of
    /// segments in use is bumped. When the chosen entry is already the
    /// last, the entry itself moves so the new segment has room to grow.
    /// Fails only when no segment block is free in the directory window.
    fn split_segment(
        &mut self,
        segments: &mut [Rt11Segment],
        segment_index: usize,
        entry_index: usize,
    ) -> Result<bool> {
        let used: HashSet<u64> = segments.iter().map(|s| s.block_number).collect();
        let window = segments[0].num_of_segments as u64;
        let mut block_number = None;
        let mut candidate = self.dir_segment;
        while candidate < self.dir_segment + window * 2 {
            if !used.contains(&candidate) {
                block_number = Some(candidate);
                break;
            }
            candidate += 2;
        }
        let Some(block_number) = block_number else {
            return Ok(false);
        };

        let extra_bytes = segments[0].extra_bytes;
        let num_of_segments = segments[0].num_of_segments;
        let in_use = segments.len() as u16 + 1;
        segments[0].highest_segment = in_use;

        let old = &mut segments[segment_index];
        let mut tail = old.entries.split_off(entry_index + 1);
        if tail.is_empty() {
            // The empty entry is the segment's last; move it across.
            tail = vec![old.entries.pop().expect("entry exists")];
        }
        let mut new_segment = Rt11Segment {
            block_number,
            num_of_segments,
            next_logical_dir_segment: old.next_logical_dir_segment,
            highest_segment: 1,
            extra_bytes,
            data_block_number: tail[0].file_position as u16,
            max_entries: old.max_entries,
            entries: tail,
        };
        if let Some(last) = new_segment.entries.last_mut() {
            last.class |= EntryClass::EOS;
        }
        old.next_logical_dir_segment = ((block_number - self.dir_segment) / 2 + 1) as u16;
        if let Some(last) = old.entries.last_mut() {
            last.class |= EntryClass::EOS;
        }

        log::debug!(
            "splitting directory segment {} at entry {}, new segment at block {}",
            segments[segment_index].block_number,
            entry_index,
            block_number
        );

        let first = segments[0].clone();
        self.write_segment(&first)?;
        if segment_index != 0 {
            let old = segments[segment_index].clone();
            self.write_segment(&old)?;
        }
        self.write_segment(&new_segment)?;
        Ok(true)
    }

    /// Allocate space for a new file: best-fit over the empty entries,
    /// splitting a full segment before inserting into it.
    fn allocate_space(
        &mut self,
        fullname: &str,
        length: u64,
        creation_date: Option<NaiveDate>,
    ) -> Result<FileEntry> {
        // A split rewrites the chain on disk, so the search restarts; each
        // split consumes one block of the directory window, which bounds
        // the loop.
        for _attempt in 0..=31 {
            let mut segments = self.read_dir_segments()?;
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
                if segments[si].entries.len() >= segments[si].max_entries {
                    if !self.split_segment(&mut segments, si, ei)? {
                        return Err(FsError::NoSpace(fullname.to_string()));
                    }
                    continue;
                }
                segments[si].insert_entry_after(ei, length);
            }

            let fullname = fullname.to_uppercase();
            let (filename, filetype) = match fullname.rsplit_once('.') {
                Some((name, ext)) => (name.to_string(), ext.to_string()),
                None => (fullname, String::new()),
            };
            let entry = &mut segments[si].entries[ei];
            entry.filename = filename;
            entry.filetype = filetype;
            entry.raw_creation_date = date_to_rt11(creation_date);
            entry.job = 0;
            entry.channel = 0;
            entry.class = if entry.is_end_of_segment() {
                EntryClass::PERM | EntryClass::EOS
            } else {
                EntryClass::PERM
            };
            entry.length = length;
            let file_entry = entry.to_file_entry();
            let segment = segments[si].clone();
            self.write_segment(&segment)?;
            return Ok(file_entry);
        }
        Err(FsError::NoSpace(fullname.to_string()))
    }

    /// Sum of the empty entries, i.e. the allocatable blocks.
    pub fn free_blocks(&mut self) -> Result<u64> {
        Ok(self
            .read_dir_segments()?
            .iter()
            .flat_map(|s| s.entries.iter())
            .filter(|e| e.is_empty())
            .map(|e| e.length)
            .sum())
    }

    fn internal_entries(&mut self) -> Result<Vec<Rt11Entry>> {
        Ok(self
            .read_dir_segments()?
            .into_iter()
            .flat_map(|s| s.entries)
            .collect())
    }

    /// Write an empty RT-11 directory onto the image.
    pub fn initialize(&mut self) -> Result<()> {
        let mut size = self.dev.size()?;
        // RX01/RX02 reserve track 0
        if size == RX01_SIZE {
            size -= RX_SECTOR_TRACK * RX01_SECTOR_SIZE as u64;
        } else if size == RX02_SIZE {
            size -= RX_SECTOR_TRACK * RX02_SECTOR_SIZE as u64;
        }
        let length = size / BLOCK_SIZE as u64;
        let num_of_segments: u16 = if length >= 18000 {
            31
        } else if length >= 4000 {
            16
        } else if length >= 800 {
            4
        } else {
            1
        };

        self.dir_segment = DEFAULT_DIR_SEGMENT;
        self.ver = "V05".to_string();
        self.id = String::new();
        self.owner = String::new();
        self.sys_id = "DECRT11A".to_string();
        self.write_home()?;

        let data_block_number = (self.dir_segment + num_of_segments as u64 * 2) as u16;
        let empty = Rt11Entry {
            entry_type: 0,
            class: EntryClass::MPTY,
            filename: "EMPTY".to_string(),
            filetype: "FIL".to_string(),
            length: length - data_block_number as u64,
            job: 0,
            channel: 0,
            raw_creation_date: 0,
            extra_bytes: Vec::new(),
            file_position: data_block_number as u64,
        };
        let end = Rt11Entry {
            entry_type: 0,
            class: EntryClass::EOS,
            filename: String::new(),
            filetype: String::new(),
            length: 0,
            job: 0,
            channel: 0,
            raw_creation_date: 0,
            extra_bytes: Vec::new(),
            file_position: length,
        };
        let segment = Rt11Segment {
            block_number: self.dir_segment,
            num_of_segments,
            next_logical_dir_segment: 0,
            highest_segment: 1,
            extra_bytes: 0,
            data_block_number,
            max_entries: (SEGMENT_SIZE - SEGMENT_HEADER_SIZE) / DIR_ENTRY_SIZE,
            entries: vec![empty, end],
        };
        self.write_segment(&segment)
    }

    fn write_examine_segment(
        segment: &Rt11Segment,
        dir_segment: u64,
        out: &mut dyn Write,
    ) -> std::io::Result<()> {
        writeln!(out, "\n*Segment")?;
        writeln!(out, "Block number:          {}", segment.block_number)?;
        writeln!(
            out,
            "Next dir segment:      {}",
            segment.next_block_number(dir_segment)
        )?;
        writeln!(out, "Number of segments:    {}", segment.num_of_segments)?;
        writeln!(out, "Highest segment:       {}", segment.highest_segment)?;
        writeln!(out, "Max entries:           {}", segment.max_entries)?;
        writeln!(out, "Data block:            {}", segment.data_block_number)?;
        writeln!(
            out,
            "\nNum  File        Date       Length  Type Class Job Chn  Block\n"
        )?;
        for (i, e) in segment.entries.iter().enumerate() {
            let date = e
                .creation_date()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "          ".to_string());
            writeln!(
                out,
                "{:02}#  {:<11} {} {:>6} {:5o} {:5o} {:3} {:3} {:6}",
                i,
                e.fullname(),
                date,
                e.length,
                e.entry_type,
                e.class.bits(),
                e.job,
                e.channel,
                e.file_position
            )?;
        }
        Ok(())
    }
}

fn ascii_field(data: &[u8]) -> String {
    data.iter()
        .map(|&b| {
            if b.is_ascii() && b != 0 {
                b as char
            } else {
                '?'
            }
        })
        .collect::<String>()
        .trim_end_matches(['?', ' '])
        .to_string()
}

fn copy_padded(dest: &mut [u8], src: &[u8]) {
    let n = src.len().min(dest.len());
    dest[..n].copy_from_slice(&src[..n]);
}

impl Filesystem for Rt11Fs {
    fn fs_name(&self) -> &'static str {
        "rt11"
    }

    fn fs_description(&self) -> &'static str {
        "PDP-11 RT-11"
    }

    fn size(&mut self) -> Result<u64> {
        self.dev.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        Ok(self
            .internal_entries()?
            .iter()
            .map(Rt11Entry::to_file_entry)
            .collect())
    }

    fn filter_entries(
        &mut self,
        pattern: Option<&str>,
        include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<FileEntry>> {
        let pattern = pattern.map(|p| rt11_canonical_filename(p, true));
        let mut result = Vec::new();
        for entry in self.internal_entries()? {
            if !filename_match(&entry.fullname(), pattern.as_deref(), wildcard) {
                continue;
            }
            if !include_all
                && (entry.is_empty() || entry.is_tentative() || entry.is_end_of_segment())
            {
                continue;
            }
            result.push(entry.to_file_entry());
        }
        Ok(result)
    }

    fn entry(&mut self, path: &str) -> Result<FileEntry> {
        match self.locate(path)? {
            Some((segment, index)) => Ok(segment.entries[index].to_file_entry()),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    fn read_bytes(&mut self, path: &str, _mode: Option<FileMode>) -> Result<Vec<u8>> {
        let (segment, index) = self
            .locate(path)?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let entry = &segment.entries[index];
        self.read_block(entry.file_position, entry.length as usize)
    }

    fn write_bytes(
        &mut self,
        path: &str,
        data: &[u8],
        creation_date: Option<NaiveDate>,
        _file_type: Option<&str>,
        _mode: Option<FileMode>,
    ) -> Result<()> {
        let length = (data.len() as u64).div_ceil(BLOCK_SIZE as u64);
        self.create_file(path, length, creation_date, None)?;
        let position = self
            .locate(path)?
            .map(|(s, i)| s.entries[i].file_position)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        self.write_block(data, position, length as usize)
    }

    fn create_file(
        &mut self,
        path: &str,
        blocks: u64,
        creation_date: Option<NaiveDate>,
        _file_type: Option<&str>,
    ) -> Result<FileEntry> {
        if self.exists(path) {
            self.delete(path)?;
        }
        self.allocate_space(path, blocks, creation_date)
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        let (mut segment, index) = self
            .locate(path)?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let entry = &mut segment.entries[index];
        entry.class -= EntryClass::PERM | EntryClass::TENT | EntryClass::READ | EntryClass::PROT;
        entry.class |= EntryClass::MPTY;
        segment.compact();
        self.write_segment(&segment)
    }

    fn dir(
        &mut self,
        _volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        let pattern = pattern.map(|p| rt11_canonical_filename(p, true));
        let mut i = 0usize;
        let mut files = 0u64;
        let mut blocks = 0u64;
        let mut unused = 0u64;
        for entry in self.internal_entries()? {
            if !filename_match(&entry.fullname(), pattern.as_deref(), true) {
                continue;
            }
            if !entry.is_empty()
                && !entry.is_tentative()
                && !entry.is_permanent()
                && !entry.is_protected_permanent()
                && !entry.is_protected_by_monitor()
            {
                continue;
            }
            i += 1;
            let (fullname, date) = if entry.is_empty() || entry.is_tentative() {
                if options.brief {
                    continue;
                }
                unused += entry.length;
                ("< UNUSED >".to_string(), String::new())
            } else {
                let fullname = format!("{:<6}.{:<3}", entry.filename, entry.filetype);
                if options.brief {
                    writeln!(out, "{}", fullname).map_err(FsError::Io)?;
                    continue;
                }
                let date = entry
                    .creation_date()
                    .map(|d| d.format("%d-%b-%y").to_string())
                    .unwrap_or_default();
                (fullname, date)
            };
            if entry.is_permanent() {
                files += 1;
                blocks += entry.length;
            }
            let attr = if entry.is_protected_permanent() {
                "P"
            } else if entry.is_protected_by_monitor() {
                "A"
            } else {
                " "
            };
            write!(
                out,
                "{:>10} {:5}{:1} {:>9}",
                fullname, entry.length, attr, date
            )
            .map_err(FsError::Io)?;
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
        writeln!(out, " {} Files, {} Blocks", files, blocks).map_err(FsError::Io)?;
        writeln!(out, " {} Free blocks", unused).map_err(FsError::Io)?;
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
        writeln!(out, "Directory segment:     {}", self.dir_segment).map_err(FsError::Io)?;
        writeln!(out, "System version:        {}", self.ver).map_err(FsError::Io)?;
        writeln!(out, "Volume identification: {}", self.id).map_err(FsError::Io)?;
        writeln!(out, "Owner name:            {}", self.owner).map_err(FsError::Io)?;
        writeln!(out, "System identification: {}", self.sys_id).map_err(FsError::Io)?;
        for segment in self.read_dir_segments()? {
            Self::write_examine_segment(&segment, self.dir_segment, out).map_err(FsError::Io)?;
        }
        Ok(())
    }

    fn read_block(&mut self, block_number: u64, count: usize) -> Result<Vec<u8>> {
        Rt11Fs::read_block(self, block_number, count)
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

    fn new_fs(blocks: usize) -> Rt11Fs {
        let file = ByteFile::with_size(blocks * BLOCK_SIZE);
        let mut fs = Rt11Fs::mount(file).unwrap();
        fs.initialize().unwrap();
        fs.read_home().unwrap();
        fs
    }

    #[test]
    fn test_initialize_256kb() {
        // A 256 KB cartridge gets a single directory segment.
        let mut fs = new_fs(512);
        let segments = fs.read_dir_segments().unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].num_of_segments, 1);
        assert_eq!(segments[0].data_block_number, 8);
        assert_eq!(fs.free_blocks().unwrap(), 512 - 8);
    }

    #[test]
    fn test_create_and_read_roundtrip() {
        let mut fs = new_fs(512);
        let lines: String = (0..50)
            .map(|i| format!("line number {:05} of the test data\n", i))
            .collect();
        fs.write_bytes("A.TXT", lines.as_bytes(), None, None, None)
            .unwrap();
        let data = fs.read_bytes("A.TXT", None).unwrap();
        assert_eq!(&data[..lines.len()], lines.as_bytes());
        let entry = fs.entry("a.txt").unwrap();
        assert_eq!(entry.fullname, "A.TXT");
    }

    #[test]
    fn test_create_updates_free_blocks() {
        let mut fs = new_fs(512);
        fs.create_file("A.TXT", 10, None, None).unwrap();
        assert_eq!(fs.free_blocks().unwrap(), 512 - 8 - 10);
    }

    #[test]
    fn test_delete_releases_space() {
        let mut fs = new_fs(512);
        fs.create_file("A.TXT", 10, None, None).unwrap();
        let free = fs.free_blocks().unwrap();
        fs.delete("A.TXT").unwrap();
        assert_eq!(fs.free_blocks().unwrap(), free + 10);
        assert!(matches!(
            fs.entry("A.TXT"),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_dir_listing_totals() {
        let mut fs = new_fs(512);
        fs.write_bytes("A.TXT", &[b'x'; 2200], None, None, None)
            .unwrap();
        let entry = fs.entry("A.TXT").unwrap();
        assert_eq!(entry.blocks, 5);
        fs.create_file("B.DAT", 5, None, None).unwrap();
        let mut out = Vec::new();
        fs.dir("DK", None, &DirOptions::default(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(" 2 Files, 10 Blocks"), "{}", text);
    }

    #[test]
    fn test_no_space() {
        let mut fs = new_fs(64);
        let err = fs.create_file("BIG.DAT", 1000, None, None).unwrap_err();
        assert!(matches!(err, FsError::NoSpace(_)));
        // The directory is unchanged.
        assert_eq!(fs.free_blocks().unwrap(), 64 - 8);
    }

    #[test]
    fn test_best_fit_allocation() {
        let mut fs = new_fs(512);
        fs.create_file("A.DAT", 10, None, None).unwrap();
        fs.create_file("B.DAT", 3, None, None).unwrap();
        fs.create_file("C.DAT", 10, None, None).unwrap();
        // Deleting B leaves a 3-block hole which a 2-block file should
        // reuse in preference to the large tail area.
        fs.delete("B.DAT").unwrap();
        let entry = fs.create_file("D.DAT", 2, None, None).unwrap();
        let (segment, index) = fs.locate("D.DAT").unwrap().unwrap();
        assert_eq!(segment.entries[index].file_position, 8 + 10);
        assert_eq!(entry.blocks, 2);
    }

    #[test]
    fn test_overwrite_same_name_deletes_first() {
        let mut fs = new_fs(512);
        fs.write_bytes("A.TXT", b"first version", None, None, None)
            .unwrap();
        fs.write_bytes("A.TXT", b"second", None, None, None).unwrap();
        let matching = fs
            .filter_entries(Some("A.TXT"), false, false)
            .unwrap();
        assert_eq!(matching.len(), 1);
        let data = fs.read_bytes("A.TXT", None).unwrap();
        assert_eq!(&data[..6], b"second");
    }

    #[test]
    fn test_segment_split_keeps_files_readable() {
        // Fill the first segment's entry table to force a split.
        let mut fs = new_fs(20000);
        let segments = fs.read_dir_segments().unwrap();
        assert_eq!(segments[0].num_of_segments, 31);
        let max_entries = segments[0].max_entries;
        let count = max_entries + 4;
        for i in 0..count {
            let name = format!("F{:04}.DAT", i);
            fs.write_bytes(&name, format!("file {}", i).as_bytes(), None, None, None)
                .unwrap();
        }
        let segments = fs.read_dir_segments().unwrap();
        assert!(segments.len() > 1, "expected a directory split");
        for i in 0..count {
            let name = format!("F{:04}.DAT", i);
            let expected = format!("file {}", i);
            let data = fs.read_bytes(&name, None).unwrap();
            assert_eq!(&data[..expected.len()], expected.as_bytes());
        }
    }

    #[test]
    fn test_idempotent_mount() {
        let mut fs = new_fs(512);
        fs.write_bytes("A.TXT", b"data", None, None, None).unwrap();
        let first: Vec<_> = fs.entries().unwrap();
        let image = fs.dev.into_file().into_vec();
        let mut fs = Rt11Fs::mount(ByteFile::from_vec(image)).unwrap();
        assert_eq!(fs.entries().unwrap(), first);
    }

    #[test]
    fn test_canonical_filename() {
        assert_eq!(rt11_canonical_filename("hello.txt", false), "HELLO.TXT");
        assert_eq!(rt11_canonical_filename("*.txt", true), "*.TXT");
        assert_eq!(rt11_canonical_filename("toolongname.ext", false), "TOOLON.EXT");
        assert_eq!(rt11_canonical_filename("a", true), "A.*");
    }
}
