//! PDP-7 UNIX (version 0) driver, read-only.
//!
//! The file area lives on the second disk surface: 64-word blocks, with
//! i-nodes in blocks 2-711 (five 12-word i-nodes per block). Directories
//! are 8-word entries of i-number plus a four-word name. The root is the
//! `dd` directory at i-node 4.

use std::io::Write;

use chrono::NaiveDate;
use strata_common::enc::pack18::words18_to_bytes;
use strata_common::{FileMode, filename_match};
use strata_core::{
    DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result,
};
use strata_io::{ByteFile, WordBlockDevice};

pub const V0_WORDS_PER_BLOCK: usize = 64;
/// Exported size: each 18-bit word becomes three bytes.
const V0_IO_BYTES_PER_WORD: usize = 3;
const V0_BLOCKS_PER_SURFACE: u64 = 8000;
const V0_FIRST_INODE_BLOCK: u64 = 2;
const V0_INODE_SIZE: usize = 12;
const V0_INODES_PER_BLOCK: u64 = (V0_WORDS_PER_BLOCK / V0_INODE_SIZE) as u64;
const V0_DIRENT_SIZE: usize = 8;

const V0_MAXINT: u32 = 0o777777;

const V0_USED: u32 = 0o400000;
const V0_LARGE: u32 = 0o200000;
const V0_SPECIAL: u32 = 0o000040;
const V0_DIR: u32 = 0o000020;

/// The `dd` directory.
const V0_ROOT_INODE: u64 = 4;

/// A version-0 i-node: flags, seven block pointers, uid, link count,
/// size in words and the uniq stamp.
#[derive(Debug, Clone)]
pub struct Unix0Inode {
    pub inode_num: u64,
    pub flags: u32,
    pub uid: i32,
    pub nlinks: u32,
    /// Size in words.
    pub size: u64,
    pub uniq: u32,
    pub addr: [u32; 7],
}

/// UNIX version 0 filesystem over an 18-bit word device.
pub struct Unix0Fs {
    dev: WordBlockDevice,
    pub pwd: String,
}

impl Unix0Fs {
    pub fn mount(file: ByteFile) -> Result<Self> {
        let dev = WordBlockDevice::new(file)?.with_words_per_block_18bit(V0_WORDS_PER_BLOCK);
        Ok(Self {
            dev,
            pwd: "/".to_string(),
        })
    }

    fn read_words(&mut self, block_number: u64) -> Result<Vec<u32>> {
        self.dev
            .read_block_18bit(V0_BLOCKS_PER_SURFACE + block_number)
            .map_err(FsError::from)
    }

    pub fn read_inode(&mut self, inode_num: u64) -> Result<Unix0Inode> {
        let block_number = V0_FIRST_INODE_BLOCK + inode_num / V0_INODES_PER_BLOCK;
        let offset = V0_INODE_SIZE * (inode_num % V0_INODES_PER_BLOCK) as usize;
        let words = self.read_words(block_number)?;
        let words = &words[offset..offset + V0_INODE_SIZE];
        let uid = if words[8] == V0_MAXINT {
            -1
        } else {
            words[8] as i32
        };
        let mut addr = [0u32; 7];
        addr.copy_from_slice(&words[1..8]);
        Ok(Unix0Inode {
            inode_num,
            flags: words[0],
            uid,
            nlinks: V0_MAXINT - words[9] + 1,
            size: words[10] as u64,
            uniq: words[11],
            addr,
        })
    }

    pub fn is_dir(inode: &Unix0Inode) -> bool {
        inode.flags & V0_DIR == V0_DIR
    }

    pub fn is_large(inode: &Unix0Inode) -> bool {
        inode.flags & V0_LARGE != 0
    }

    pub fn is_allocated(inode: &Unix0Inode) -> bool {
        inode.flags & V0_USED != 0
    }

    pub fn is_special(inode: &Unix0Inode) -> bool {
        inode.flags & V0_SPECIAL == V0_SPECIAL
    }

    /// Data blocks of an i-node: direct pointers, or per-pointer indirect
    /// blocks of further pointers for large files.
    fn blocks(&mut self, inode: &Unix0Inode) -> Result<Vec<u64>> {
        let mut blocks = Vec::new();
        if Self::is_large(inode) {
            for &block_number in &inode.addr {
                if block_number == 0 {
                    break;
                }
                for n in self.read_words(block_number as u64)? {
                    if n == 0 {
                        return Ok(blocks);
                    }
                    blocks.push(n as u64);
                }
            }
        } else {
            for &block_number in &inode.addr {
                if block_number == 0 {
                    break;
                }
                blocks.push(block_number as u64);
            }
        }
        Ok(blocks)
    }

    fn read_inode_words(&mut self, inode: &Unix0Inode) -> Result<Vec<u32>> {
        let mut words = Vec::new();
        for block_number in self.blocks(inode)? {
            words.extend(self.read_words(block_number)?);
        }
        Ok(words)
    }

    /// Directory content: `(inum, name)` pairs from 8-word entries.
    fn list_dir(&mut self, inode: &Unix0Inode) -> Result<Vec<(u64, String)>> {
        if !Self::is_dir(inode) {
            return Ok(Vec::new());
        }
        let data = self.read_inode_words(inode)?;
        let mut files = Vec::new();
        for chunk in data.chunks(V0_DIRENT_SIZE) {
            if chunk.len() < V0_DIRENT_SIZE {
                break;
            }
            let inum = chunk[0] as u64;
            if inum > 0 {
                let name_bytes = words18_to_bytes(&chunk[1..6], FileMode::Ascii);
                let name = String::from_utf8_lossy(&name_bytes)
                    .trim_end_matches([' ', '\0'])
                    .to_string();
                files.push((inum, name));
            }
        }
        Ok(files)
    }

    /// Walk a `/`-separated path from the root i-node.
    fn get_inode(&mut self, path: &str) -> Result<Unix0Inode> {
        let mut inode = self.read_inode(V0_ROOT_INODE)?;
        for name in path.split('/').filter(|s| !s.is_empty()) {
            if !Self::is_dir(&inode) {
                return Err(FsError::NotFound(path.to_string()));
            }
            let entries = self.list_dir(&inode)?;
            let next = entries
                .into_iter()
                .find(|(_, n)| n == name)
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;
            inode = self.read_inode(next.0)?;
        }
        if !Self::is_allocated(&inode) {
            return Err(FsError::NotFound(path.to_string()));
        }
        Ok(inode)
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else if self.pwd.ends_with('/') {
            format!("{}{}", self.pwd, path)
        } else {
            format!("{}/{}", self.pwd, path)
        }
    }

    fn inode_to_file_entry(&mut self, inode: &Unix0Inode, fullname: &str) -> FileEntry {
        let blocks = self.blocks(inode).map(|b| b.len() as u64).unwrap_or(0);
        let mut entry = FileEntry::new(fullname.to_string())
            .with_blocks(blocks, V0_WORDS_PER_BLOCK * 4)
            .with_size(inode.size * V0_IO_BYTES_PER_WORD as u64);
        entry.basename = fullname
            .rsplit('/')
            .next()
            .unwrap_or(fullname)
            .to_string();
        entry.is_directory = Self::is_dir(inode);
        entry.read_only = true;
        entry
    }
}

impl Filesystem for Unix0Fs {
    fn fs_name(&self) -> &'static str {
        "unix0"
    }

    fn fs_description(&self) -> &'static str {
        "UNIX version 0"
    }

    fn size(&mut self) -> Result<u64> {
        self.dev.size().map_err(FsError::from)
    }

    fn entries(&mut self) -> Result<Vec<FileEntry>> {
        let pwd = self.pwd.clone();
        let inode = self.get_inode(&pwd)?;
        let mut result = Vec::new();
        for (inum, name) in self.list_dir(&inode)? {
            let child = self.read_inode(inum)?;
            let fullname = if pwd.ends_with('/') {
                format!("{}{}", pwd, name)
            } else {
                format!("{}/{}", pwd, name)
            };
            result.push(self.inode_to_file_entry(&child, &fullname));
        }
        Ok(result)
    }

    fn filter_entries(
        &mut self,
        pattern: Option<&str>,
        _include_all: bool,
        wildcard: bool,
    ) -> Result<Vec<FileEntry>> {
        let entries = self.entries()?;
        Ok(entries
            .into_iter()
            .filter(|e| filename_match(&e.basename, pattern, wildcard))
            .collect())
    }

    fn entry(&mut self, path: &str) -> Result<FileEntry> {
        let fullname = self.resolve(path);
        let inode = self.get_inode(&fullname)?;
        Ok(self.inode_to_file_entry(&inode, &fullname))
    }

    fn read_bytes(&mut self, path: &str, mode: Option<FileMode>) -> Result<Vec<u8>> {
        let fullname = self.resolve(path);
        let inode = self.get_inode(&fullname)?;
        let mode = mode.unwrap_or(FileMode::Image);
        let mut words = self.read_inode_words(&inode)?;
        words.truncate(inode.size as usize);
        Ok(words18_to_bytes(&words, mode))
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
        let fullname = self.resolve(path);
        match self.get_inode(&fullname) {
            Ok(inode) if Self::is_dir(&inode) => {
                self.pwd = fullname;
                true
            }
            _ => false,
        }
    }

    fn pwd(&self) -> String {
        self.pwd.clone()
    }

    fn is_dir(&mut self, path: &str) -> bool {
        let fullname = self.resolve(path);
        self.get_inode(&fullname)
            .map(|i| Self::is_dir(&i))
            .unwrap_or(false)
    }

    fn dir(
        &mut self,
        _volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        let pwd = self.pwd.clone();
        let inode = self.get_inode(&pwd)?;
        let mut listing = self.list_dir(&inode)?;
        listing.sort_by(|a, b| a.1.cmp(&b.1));
        for (inum, name) in listing {
            if !filename_match(&name, pattern, true) {
                continue;
            }
            if !options.full && name.starts_with('.') {
                continue;
            }
            if options.brief {
                writeln!(out, "{}", name).map_err(FsError::Io)?;
                continue;
            }
            let child = self.read_inode(inum)?;
            let uid = if child.uid == -1 { 0o77 } else { child.uid as u32 };
            writeln!(
                out,
                "{:>03o} {:02o} {:02o} {:>02o} {:>05o} {}",
                inum,
                child.flags & 0o77,
                uid,
                child.nlinks,
                child.size,
                name
            )
            .map_err(FsError::Io)?;
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
            let fullname = self.resolve(arg);
            let inode = self.get_inode(&fullname)?;
            writeln!(out, "\n*Inode").map_err(FsError::Io)?;
            writeln!(out, "Inode number:          {:>6}", inode.inode_num).map_err(FsError::Io)?;
            writeln!(out, "Uniq:                  {:>6}", inode.uniq).map_err(FsError::Io)?;
            writeln!(out, "Flags:                 {:>06o}", inode.flags).map_err(FsError::Io)?;
            let kind = if Self::is_dir(&inode) {
                "directory"
            } else if Self::is_special(&inode) {
                "special file"
            } else if Self::is_large(&inode) {
                "large file"
            } else {
                "file"
            };
            writeln!(out, "Type:                  {:>6}", kind).map_err(FsError::Io)?;
            writeln!(out, "Owner user id:         {:>6}", inode.uid).map_err(FsError::Io)?;
            writeln!(out, "Link count:            {:>6}", inode.nlinks).map_err(FsError::Io)?;
            writeln!(out, "Size (words):          {:>6}", inode.size).map_err(FsError::Io)?;
            let blocks = self.blocks(&inode)?;
            writeln!(out, "Blocks:                {:?}", blocks).map_err(FsError::Io)?;
            return Ok(());
        }
        for inode_num in 1..=16 {
            let inode = self.read_inode(inode_num)?;
            if Self::is_allocated(&inode) {
                writeln!(
                    out,
                    "{:>4}# uid: {:>3}  nlinks: {:>3}  size: {:>5} words  flags: {:o}",
                    inode.inode_num, inode.uid, inode.nlinks, inode.size, inode.flags
                )
                .map_err(FsError::Io)?;
            } else {
                writeln!(out, "{:>4}# ---", inode.inode_num).map_err(FsError::Io)?;
            }
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

    /// Build a tiny v0 surface: root `dd` at i-node 4 containing one
    /// file `readme` at i-node 5.
    fn build_image() -> ByteFile {
        let surface_words = (V0_BLOCKS_PER_SURFACE as usize + 200) * V0_WORDS_PER_BLOCK;
        let mut words = vec![0u32; 2 * surface_words];
        let base = V0_BLOCKS_PER_SURFACE as usize * V0_WORDS_PER_BLOCK;
        let word_at = |block: u64, offset: usize| -> usize {
            base + block as usize * V0_WORDS_PER_BLOCK + offset
        };
        // I-node 4 (dd): directory, one data block at 800
        let inode4 = word_at(V0_FIRST_INODE_BLOCK + 4 / V0_INODES_PER_BLOCK, 12 * 4 % 64);
        words[inode4] = V0_USED | V0_DIR;
        words[inode4 + 1] = 800;
        words[inode4 + 8] = 1; // uid
        words[inode4 + 9] = V0_MAXINT; // nlinks = 1
        words[inode4 + 10] = V0_DIRENT_SIZE as u32;
        // I-node 5 (readme): file with one block at 801
        let inode5 = word_at(V0_FIRST_INODE_BLOCK + 5 / V0_INODES_PER_BLOCK, 12 * (5 % 5));
        words[inode5] = V0_USED;
        words[inode5 + 1] = 801;
        words[inode5 + 9] = V0_MAXINT;
        words[inode5 + 10] = 4; // 4 words of content
        // Directory block 800: entry (5, "readme")
        let dir = word_at(800, 0);
        words[dir] = 5;
        // Name "readme" packed 2 ASCII chars per word (9/9)
        words[dir + 1] = ((b'r' as u32) << 9) | b'e' as u32;
        words[dir + 2] = ((b'a' as u32) << 9) | b'd' as u32;
        words[dir + 3] = ((b'm' as u32) << 9) | b'e' as u32;
        words[dir + 4] = (b' ' as u32) << 9 | b' ' as u32;
        // File block 801: 4 words
        let file = word_at(801, 0);
        for (i, w) in [0o111111, 0o222222, 0o333333, 0o444444].iter().enumerate() {
            words[file + i] = *w;
        }
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        ByteFile::from_vec(bytes)
    }

    #[test]
    fn test_list_root() {
        let mut fs = Unix0Fs::mount(build_image()).unwrap();
        let entries = fs.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].basename, "readme");
        assert!(!entries[0].is_directory);
    }

    #[test]
    fn test_read_file_words() {
        let mut fs = Unix0Fs::mount(build_image()).unwrap();
        let data = fs.read_bytes("/readme", None).unwrap();
        // 4 words, three bytes each in image mode
        assert_eq!(data.len(), 12);
    }

    #[test]
    fn test_not_found() {
        let mut fs = Unix0Fs::mount(build_image()).unwrap();
        assert!(matches!(
            fs.read_bytes("/missing", None),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_writes_rejected() {
        let mut fs = Unix0Fs::mount(build_image()).unwrap();
        assert!(matches!(
            fs.write_bytes("/x", b"data", None, None, None),
            Err(FsError::ReadOnlyFs)
        ));
    }
}
