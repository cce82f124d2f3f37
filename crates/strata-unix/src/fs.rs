//! The shared filesystem walk for UNIX v1, v6 and v7.

use std::io::Write;

use chrono::NaiveDate;
use strata_common::{FileMode, bytes_to_word, filename_match};
use strata_core::{
    DirOptions, ExamineOptions, FileEntry, Filesystem, FsError, Result,
};
use strata_io::{BLOCK_SIZE, BlockDevice, ByteFile};

use crate::inode::{UnixInode, format_mode};
use crate::{unix_join, unix_split};

const SUPER_BLOCK: u64 = 1;

/// The UNIX generations this driver reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnixVersion {
    V1,
    V6,
    V7,
}

impl UnixVersion {
    pub fn inode_size(self) -> usize {
        match self {
            UnixVersion::V1 | UnixVersion::V6 => 32,
            UnixVersion::V7 => 64,
        }
    }

    pub fn filename_len(self) -> usize {
        match self {
            UnixVersion::V1 => 8,
            _ => 14,
        }
    }

    pub fn root_inode(self) -> u64 {
        match self {
            UnixVersion::V1 => 41,
            UnixVersion::V6 => 1,
            UnixVersion::V7 => 2,
        }
    }

    pub fn number(self) -> u32 {
        match self {
            UnixVersion::V1 => 1,
            UnixVersion::V6 => 6,
            UnixVersion::V7 => 7,
        }
    }
}

/// Read-only ancient UNIX filesystem over a block device.
pub struct UnixFs {
    dev: BlockDevice,
    pub version: UnixVersion,
    pub pwd: String,
    /// Blocks devoted to the i-list (v6 superblock).
    pub isize: u16,
    /// First block not potentially available for allocation.
    pub fsize: u16,
    pub nfree: u16,
    pub ninode: u16,
}

impl UnixFs {
    pub fn mount(file: ByteFile, version: UnixVersion) -> Result<Self> {
        let dev = BlockDevice::new(file)?;
        let mut fs = Self {
            dev,
            version,
            pwd: "/".to_string(),
            isize: 0,
            fsize: 0,
            nfree: 0,
            ninode: 0,
        };
        fs.read_superblock()?;
        if version == UnixVersion::V6 {
            log::trace!(
                "superblock: isize={} fsize={} nfree={} ninode={}",
                fs.isize,
                fs.fsize,
                fs.nfree,
                fs.ninode
            );
        }
        // The root inode must be a directory or this is not a UNIX disk.
        let root = fs.read_inode(version.root_inode())?;
        if !root.is_allocated() || !root.is_dir() {
            return Err(FsError::corrupt("root inode is not a directory"));
        }
        Ok(fs)
    }

    pub fn read_block(&mut self, block_number: u64, count: usize) -> Result<Vec<u8>> {
        self.dev.read_block(block_number, count).map_err(FsError::from)
    }

    fn read_superblock(&mut self) -> Result<()> {
        if self.version == UnixVersion::V6 {
            let data = self.read_block(SUPER_BLOCK, 1)?;
            self.isize = bytes_to_word(&data, 0);
            self.fsize = bytes_to_word(&data, 2);
            self.nfree = bytes_to_word(&data, 4);
            self.ninode = bytes_to_word(&data, 206);
        }
        Ok(())
    }

    /// Read an i-node; the i-list starts at block 2.
    pub fn read_inode(&mut self, inode_num: u64) -> Result<UnixInode> {
        let inode_size = self.version.inode_size();
        let offset = BLOCK_SIZE as u64 * 2 + (inode_num - 1) * inode_size as u64;
        let block = offset / BLOCK_SIZE as u64;
        let in_block = (offset % BLOCK_SIZE as u64) as usize;
        let data = self.read_block(block, 2)?;
        Ok(UnixInode::read(
            self.version,
            inode_num,
            &data[in_block..in_block + inode_size],
        ))
    }

    /// Data blocks: direct pointers for small files, a level of 16-bit
    /// indirect blocks for large ones.
    fn blocks(&mut self, inode: &UnixInode) -> Result<Vec<u64>> {
        let mut blocks = Vec::new();
        if inode.is_large() {
            for &block_number in &inode.addr {
                if block_number == 0 {
                    break;
                }
                let indirect = self.read_block(block_number as u64, 1)?;
                for i in (0..indirect.len()).step_by(2) {
                    let n = bytes_to_word(&indirect, i);
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

    fn read_inode_bytes(&mut self, inode: &UnixInode) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(inode.size as usize);
        for block_number in self.blocks(inode)? {
            data.extend(self.read_block(block_number, 1)?);
        }
        data.truncate(inode.size as usize);
        Ok(data)
    }

    /// Directory content as `(inode, name)` pairs.
    fn list_dir(&mut self, inode: &UnixInode) -> Result<Vec<(u64, String)>> {
        if !inode.is_dir() {
            return Ok(Vec::new());
        }
        let dirent_size = 2 + self.version.filename_len();
        let data = self.read_inode_bytes(inode)?;
        let mut files = Vec::new();
        for chunk in data.chunks(dirent_size) {
            if chunk.len() < dirent_size {
                break;
            }
            let inum = bytes_to_word(chunk, 0) as u64;
            if inum > 0 {
                let name = String::from_utf8_lossy(&chunk[2..])
                    .trim_end_matches('\0')
                    .to_string();
                files.push((inum, name));
            }
        }
        Ok(files)
    }

    /// Resolve a path from the root inode; every intermediate component
    /// must be a directory.
    pub fn get_inode(&mut self, path: &str) -> Result<UnixInode> {
        let mut inode = self.read_inode(self.version.root_inode())?;
        for name in path.split('/').filter(|s| !s.is_empty()) {
            if !inode.is_dir() {
                return Err(FsError::NotFound(path.to_string()));
            }
            let entries = self.list_dir(&inode)?;
            let next = entries
                .into_iter()
                .find(|(_, n)| n == name)
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;
            inode = self.read_inode(next.0)?;
        }
        if !inode.is_allocated() {
            return Err(FsError::NotFound(path.to_string()));
        }
        Ok(inode)
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            unix_join(&self.pwd, path)
        }
    }

    fn inode_to_file_entry(&mut self, inode: &UnixInode, fullname: &str) -> FileEntry {
        let mut entry = FileEntry::new(fullname.to_string())
            .with_size(inode.size)
            .with_date(inode.modification_date());
        entry.blocks = inode.length();
        entry.basename = unix_split(fullname).1;
        entry.is_directory = inode.is_dir();
        entry.read_only = true;
        entry
    }

    /// The uid to name map from `/etc/uids` (v1) or `/etc/passwd`.
    fn read_uids(&mut self) -> Vec<(u16, String)> {
        let filename = if self.version == UnixVersion::V1 {
            "/etc/uids"
        } else {
            "/etc/passwd"
        };
        let mut result = Vec::new();
        if let Ok(data) = self.read_bytes(filename, Some(FileMode::Image)) {
            for line in String::from_utf8_lossy(&data).lines() {
                let fields: Vec<&str> = line.split(':').collect();
                let parsed = if self.version == UnixVersion::V1 {
                    fields
                        .get(1)
                        .and_then(|u| u.parse().ok())
                        .map(|uid| (uid, fields[0].to_string()))
                } else {
                    fields
                        .get(2)
                        .and_then(|u| u.parse().ok())
                        .map(|uid| (uid, fields[0].to_string()))
                };
                if let Some(pair) = parsed {
                    result.push(pair);
                }
            }
        }
        result
    }
}

impl Filesystem for UnixFs {
    fn fs_name(&self) -> &'static str {
        match self.version {
            UnixVersion::V1 => "unix1",
            UnixVersion::V6 => "unix6",
            UnixVersion::V7 => "unix7",
        }
    }

    fn fs_description(&self) -> &'static str {
        match self.version {
            UnixVersion::V1 => "UNIX version 1",
            UnixVersion::V6 => "UNIX version 6",
            UnixVersion::V7 => "UNIX version 7",
        }
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
            let fullname = unix_join(&pwd, &name);
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
        let (dirname, name_pattern) = match pattern {
            None => (self.pwd.clone(), None),
            Some(pattern) if !pattern.starts_with('/') => {
                (self.pwd.clone(), Some(pattern.to_string()))
            }
            Some(pattern) => {
                if self.is_dir(pattern) {
                    (pattern.to_string(), None)
                } else {
                    let (dirname, name) = unix_split(pattern);
                    (dirname, Some(name))
                }
            }
        };
        let inode = self.get_inode(&dirname)?;
        let mut result = Vec::new();
        for (inum, name) in self.list_dir(&inode)? {
            if !filename_match(&name, name_pattern.as_deref(), wildcard) {
                continue;
            }
            let child = self.read_inode(inum)?;
            let fullname = unix_join(&dirname, &name);
            result.push(self.inode_to_file_entry(&child, &fullname));
        }
        Ok(result)
    }

    fn entry(&mut self, path: &str) -> Result<FileEntry> {
        let fullname = self.resolve(path);
        let inode = self.get_inode(&fullname)?;
        Ok(self.inode_to_file_entry(&inode, &fullname))
    }

    fn read_bytes(&mut self, path: &str, _mode: Option<FileMode>) -> Result<Vec<u8>> {
        let fullname = self.resolve(path);
        let inode = self.get_inode(&fullname)?;
        self.read_inode_bytes(&inode)
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
            Ok(inode) if inode.is_dir() => {
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
            .map(|inode| inode.is_dir())
            .unwrap_or(false)
    }

    fn dir(
        &mut self,
        _volume_id: &str,
        pattern: Option<&str>,
        options: &DirOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        let mut entries = self.filter_entries(pattern, true, true)?;
        if entries.is_empty() {
            return Err(FsError::NotFound(
                pattern.unwrap_or(&self.pwd).to_string(),
            ));
        }
        entries.sort_by(|a, b| a.basename.cmp(&b.basename));
        let uids = self.read_uids();
        if !options.brief {
            let blocks: u64 = entries.iter().map(|e| e.blocks).sum();
            if self.version == UnixVersion::V1 {
                writeln!(out, "total {:>4}", blocks).map_err(FsError::Io)?;
            } else {
                writeln!(out, "blocks = {}", blocks).map_err(FsError::Io)?;
            }
        }
        let version = self.version;
        for entry in &entries {
            if !options.full && entry.basename.starts_with('.') {
                continue;
            }
            if options.brief {
                writeln!(out, "{}", entry.basename).map_err(FsError::Io)?;
                continue;
            }
            let inode = self.get_inode(&entry.fullname)?;
            let mode = format_mode(inode.flags, version);
            let uid = uids
                .iter()
                .find(|(u, _)| *u == inode.uid)
                .map(|(_, n)| n.clone())
                .unwrap_or_else(|| inode.uid.to_string());
            let time = inode
                .modification_date()
                .map(|d| d.format("%b %d %Y").to_string())
                .unwrap_or_default();
            if version == UnixVersion::V1 {
                writeln!(
                    out,
                    "{:>3} {} {:>2} {:<6} {:>6} {} {}",
                    inode.inode_num, mode, inode.nlinks, uid, inode.size, time, entry.basename
                )
                .map_err(FsError::Io)?;
            } else {
                writeln!(
                    out,
                    "{:>5} {}{:>2} {:<6} {:>6} {} {}",
                    inode.inode_num, mode, inode.nlinks, uid, inode.size, time, entry.basename
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
            if arg.chars().all(|c| c.is_ascii_digit()) {
                let block = arg.parse::<u64>().unwrap_or(0);
                return self.dump(None, Some(block), Some(block), out);
            }
            return self.dump(Some(arg), None, None, out);
        }
        writeln!(out, "Version:             {}", self.version.number()).map_err(FsError::Io)?;
        writeln!(out, "PWD:                 {}", self.pwd).map_err(FsError::Io)?;
        if self.version == UnixVersion::V6 {
            writeln!(out, "ISIZE:               {}", self.isize).map_err(FsError::Io)?;
            writeln!(out, "FSIZE:               {}", self.fsize).map_err(FsError::Io)?;
            writeln!(out, "NFREE:               {}", self.nfree).map_err(FsError::Io)?;
            writeln!(out, "NINODE:              {}", self.ninode).map_err(FsError::Io)?;
        }
        let version = self.version;
        for inode_num in 1..=32u64 {
            let Ok(inode) = self.read_inode(inode_num) else {
                break;
            };
            if inode.is_allocated() {
                writeln!(
                    out,
                    "{:>4}# {:>3}  nlinks: {} size: {} {} flags: {:o}",
                    inode.inode_num,
                    inode.uid,
                    inode.nlinks,
                    inode.size,
                    format_mode(inode.flags, version),
                    inode.flags
                )
                .map_err(FsError::Io)?;
            } else {
                writeln!(out, "{:>4}# ---", inode.inode_num).map_err(FsError::Io)?;
            }
        }
        Ok(())
    }

    fn read_block(&mut self, block_number: u64, count: usize) -> Result<Vec<u8>> {
        UnixFs::read_block(self, block_number, count)
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
    use crate::inode::{V6_ALL, V6_DIR, V6_LRG, V6_ROWN, V6_WOWN};

    /// Build a tiny v6 image: root directory with `hello.txt`.
    fn build_v6_image() -> ByteFile {
        let mut image = vec![0u8; 200 * BLOCK_SIZE];
        // Superblock
        image[BLOCK_SIZE..BLOCK_SIZE + 2].copy_from_slice(&10u16.to_le_bytes()); // isize
        image[BLOCK_SIZE + 2..BLOCK_SIZE + 4].copy_from_slice(&200u16.to_le_bytes()); // fsize
        // Root inode (1) at byte 1024
        let root = 2 * BLOCK_SIZE;
        image[root..root + 2].copy_from_slice(&(V6_ALL | V6_DIR | 0o777).to_le_bytes());
        image[root + 2] = 2; // nlinks
        image[root + 6..root + 8].copy_from_slice(&48u16.to_le_bytes()); // size: 3 entries
        image[root + 8..root + 10].copy_from_slice(&50u16.to_le_bytes()); // addr[0]
        // Inode 2: hello.txt
        let ino2 = root + 32;
        image[ino2..ino2 + 2]
            .copy_from_slice(&(V6_ALL | V6_ROWN | V6_WOWN).to_le_bytes());
        image[ino2 + 2] = 1;
        image[ino2 + 3] = 3; // uid
        image[ino2 + 6..ino2 + 8].copy_from_slice(&13u16.to_le_bytes()); // size
        image[ino2 + 8..ino2 + 10].copy_from_slice(&51u16.to_le_bytes()); // addr[0]
        // Directory block 50
        let dir = 50 * BLOCK_SIZE;
        for (i, (inum, name)) in [(1u16, "."), (1, ".."), (2, "hello.txt")].iter().enumerate() {
            let at = dir + i * 16;
            image[at..at + 2].copy_from_slice(&inum.to_le_bytes());
            image[at + 2..at + 2 + name.len()].copy_from_slice(name.as_bytes());
        }
        // File block 51
        image[51 * BLOCK_SIZE..51 * BLOCK_SIZE + 13].copy_from_slice(b"HELLO, UNIX.\n");
        ByteFile::from_vec(image)
    }

    #[test]
    fn test_mount_and_superblock() {
        let fs = UnixFs::mount(build_v6_image(), UnixVersion::V6).unwrap();
        assert_eq!(fs.isize, 10);
        assert_eq!(fs.fsize, 200);
    }

    #[test]
    fn test_mount_rejects_garbage() {
        let file = ByteFile::with_size(200 * BLOCK_SIZE);
        assert!(UnixFs::mount(file, UnixVersion::V6).is_err());
    }

    #[test]
    fn test_path_resolution_and_read() {
        let mut fs = UnixFs::mount(build_v6_image(), UnixVersion::V6).unwrap();
        let data = fs.read_bytes("/hello.txt", None).unwrap();
        assert_eq!(data, b"HELLO, UNIX.\n");
        let entry = fs.entry("/hello.txt").unwrap();
        assert_eq!(entry.size, 13);
        assert!(!entry.is_directory);
    }

    #[test]
    fn test_resolution_through_non_directory_fails() {
        let mut fs = UnixFs::mount(build_v6_image(), UnixVersion::V6).unwrap();
        assert!(matches!(
            fs.entry("/hello.txt/sub"),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_entries_and_filter() {
        let mut fs = UnixFs::mount(build_v6_image(), UnixVersion::V6).unwrap();
        let entries = fs.entries().unwrap();
        assert_eq!(entries.len(), 3);
        let filtered = fs.filter_entries(Some("*.txt"), false, true).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].basename, "hello.txt");
    }

    #[test]
    fn test_large_file_indirect_blocks() {
        let mut image = build_v6_image().into_vec();
        // Inode 3: large file with one indirect block at 60 listing
        // blocks 61 and 62.
        let ino3 = 2 * BLOCK_SIZE + 64;
        image[ino3..ino3 + 2].copy_from_slice(&(V6_ALL | V6_LRG | V6_ROWN).to_le_bytes());
        image[ino3 + 2] = 1;
        image[ino3 + 5] = 0;
        image[ino3 + 6..ino3 + 8].copy_from_slice(&1024u16.to_le_bytes());
        image[ino3 + 8..ino3 + 10].copy_from_slice(&60u16.to_le_bytes());
        let ind = 60 * BLOCK_SIZE;
        image[ind..ind + 2].copy_from_slice(&61u16.to_le_bytes());
        image[ind + 2..ind + 4].copy_from_slice(&62u16.to_le_bytes());
        image[61 * BLOCK_SIZE] = 0xA1;
        image[62 * BLOCK_SIZE] = 0xB2;
        // Link it into the root as "big"
        let dir = 50 * BLOCK_SIZE + 3 * 16;
        image[dir..dir + 2].copy_from_slice(&3u16.to_le_bytes());
        image[dir + 2..dir + 5].copy_from_slice(b"big");
        let root = 2 * BLOCK_SIZE;
        image[root + 6..root + 8].copy_from_slice(&64u16.to_le_bytes());

        let mut fs = UnixFs::mount(ByteFile::from_vec(image), UnixVersion::V6).unwrap();
        let data = fs.read_bytes("/big", None).unwrap();
        assert_eq!(data.len(), 1024);
        assert_eq!(data[0], 0xA1);
        assert_eq!(data[512], 0xB2);
    }

    #[test]
    fn test_chdir() {
        let mut fs = UnixFs::mount(build_v6_image(), UnixVersion::V6).unwrap();
        assert!(!fs.chdir("/hello.txt"));
        assert!(fs.chdir("/"));
        assert_eq!(fs.pwd(), "/");
    }
}
