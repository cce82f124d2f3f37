//! Version-specific i-node shapes and mode bits.

use bytemuck::{Pod, Zeroable};
use chrono::{DateTime, NaiveDate};

use crate::fs::UnixVersion;

// Version 1 flags
pub const V1_ALL: u16 = 0o100000;
pub const V1_DIR: u16 = 0o040000;
pub const V1_LRG: u16 = 0o010000;
pub const V1_SUID: u16 = 0o000040;
pub const V1_XOWN: u16 = 0o000020;
pub const V1_ROWN: u16 = 0o000010;
pub const V1_WOWN: u16 = 0o000004;
pub const V1_ROTH: u16 = 0o000002;
pub const V1_WOTH: u16 = 0o000001;

// Version 6/7 flags
pub const V6_ALL: u16 = 0o100000;
pub const V6_BLK: u16 = 0o060000;
pub const V6_DIR: u16 = 0o040000;
pub const V6_CHR: u16 = 0o020000;
pub const V6_LRG: u16 = 0o010000;
pub const V6_SUID: u16 = 0o4000;
pub const V6_SGID: u16 = 0o2000;
pub const V6_STXT: u16 = 0o1000;
pub const V6_ROWN: u16 = 0o400;
pub const V6_WOWN: u16 = 0o200;
pub const V6_XOWN: u16 = 0o100;
pub const V6_RGRP: u16 = 0o040;
pub const V6_WGRP: u16 = 0o020;
pub const V6_XGRP: u16 = 0o010;
pub const V6_ROTH: u16 = 0o004;
pub const V6_WOTH: u16 = 0o002;
pub const V6_XOTH: u16 = 0o001;

/// Unpack 3-byte integers (the v7 block address packing).
pub fn l3tol(data: &[u8], n: usize) -> Vec<u32> {
    (0..n)
        .map(|i| {
            let b = &data[i * 3..i * 3 + 3];
            ((b[0] as u32) << 16) | (b[1] as u32) | ((b[2] as u32) << 8)
        })
        .collect()
}

/// On-disk shape of a version 1 i-node.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawInodeV1 {
    pub flags: [u8; 2],
    pub nlinks: u8,
    pub uid: u8,
    /// Size in bytes.
    pub size: [u8; 2],
    /// Block numbers or device numbers.
    pub addr: [[u8; 2]; 8],
    pub atime: [u8; 4],
    pub mtime: [u8; 4],
    pub unused: [u8; 2],
}

/// On-disk shape of a version 6 i-node.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawInodeV6 {
    pub flags: [u8; 2],
    pub nlinks: u8,
    pub uid: u8,
    pub gid: u8,
    /// High byte of the 24-bit size.
    pub size_high: u8,
    /// Low word of the 24-bit size.
    pub size_low: [u8; 2],
    pub addr: [[u8; 2]; 8],
    pub atime: [u8; 4],
    pub mtime: [u8; 4],
}

/// On-disk shape of a version 7 i-node.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawInodeV7 {
    pub flags: [u8; 2],
    pub nlinks: [u8; 2],
    pub uid: [u8; 2],
    pub gid: [u8; 2],
    pub size_high: [u8; 2],
    pub size_low: [u8; 2],
    /// Thirteen packed 3-byte disk block addresses.
    pub addr: [u8; 40],
    pub atime: [u8; 4],
    pub mtime: [u8; 4],
    pub ctime: [u8; 4],
}

/// An i-node of any supported version.
#[derive(Debug, Clone)]
pub struct UnixInode {
    pub version: UnixVersion,
    pub inode_num: u64,
    pub flags: u16,
    pub nlinks: u16,
    pub uid: u16,
    pub gid: Option<u16>,
    /// Size in bytes.
    pub size: u64,
    /// Direct or indirect block numbers.
    pub addr: Vec<u32>,
    pub atime: u32,
    pub mtime: u32,
}

impl UnixInode {
    pub fn read(version: UnixVersion, inode_num: u64, buffer: &[u8]) -> Self {
        match version {
            UnixVersion::V1 => {
                let raw: &RawInodeV1 = bytemuck::from_bytes(&buffer[..32]);
                Self {
                    version,
                    inode_num,
                    flags: u16::from_le_bytes(raw.flags),
                    nlinks: raw.nlinks as u16,
                    uid: raw.uid as u16,
                    gid: None,
                    size: u16::from_le_bytes(raw.size) as u64,
                    addr: raw.addr.iter().map(|a| u16::from_le_bytes(*a) as u32).collect(),
                    atime: u32::from_le_bytes(raw.atime),
                    mtime: u32::from_le_bytes(raw.mtime),
                }
            }
            UnixVersion::V6 => {
                let raw: &RawInodeV6 = bytemuck::from_bytes(&buffer[..32]);
                Self {
                    version,
                    inode_num,
                    flags: u16::from_le_bytes(raw.flags),
                    nlinks: raw.nlinks as u16,
                    uid: raw.uid as u16,
                    gid: Some(raw.gid as u16),
                    size: ((raw.size_high as u64) << 16)
                        + u16::from_le_bytes(raw.size_low) as u64,
                    addr: raw.addr.iter().map(|a| u16::from_le_bytes(*a) as u32).collect(),
                    atime: u32::from_le_bytes(raw.atime),
                    mtime: u32::from_le_bytes(raw.mtime),
                }
            }
            UnixVersion::V7 => {
                let raw: &RawInodeV7 = bytemuck::from_bytes(&buffer[..64]);
                Self {
                    version,
                    inode_num,
                    flags: u16::from_le_bytes(raw.flags),
                    nlinks: u16::from_le_bytes(raw.nlinks),
                    uid: u16::from_le_bytes(raw.uid),
                    gid: Some(u16::from_le_bytes(raw.gid)),
                    size: ((u16::from_le_bytes(raw.size_high) as u64) << 16)
                        + u16::from_le_bytes(raw.size_low) as u64,
                    addr: l3tol(&raw.addr, 13),
                    atime: u32::from_le_bytes(raw.atime),
                    mtime: u32::from_le_bytes(raw.mtime),
                }
            }
        }
    }

    pub fn is_dir(&self) -> bool {
        match self.version {
            UnixVersion::V1 => self.flags & V1_DIR == V1_DIR,
            _ => self.flags & V6_DIR == V6_DIR,
        }
    }

    pub fn is_large(&self) -> bool {
        match self.version {
            UnixVersion::V1 => self.flags & V1_LRG != 0,
            _ => self.flags & V6_LRG != 0,
        }
    }

    pub fn is_allocated(&self) -> bool {
        match self.version {
            UnixVersion::V1 => self.flags & V1_ALL != 0,
            UnixVersion::V6 => self.flags & V6_ALL != 0,
            UnixVersion::V7 => self.flags != 0,
        }
    }

    /// Length in 512-byte blocks.
    pub fn length(&self) -> u64 {
        self.size.div_ceil(strata_io::BLOCK_SIZE as u64)
    }

    pub fn modification_date(&self) -> Option<NaiveDate> {
        DateTime::from_timestamp(self.mtime as i64, 0).map(|dt| dt.date_naive())
    }
}

/// `ls`-style mode string in the version's dialect.
pub fn format_mode(flags: u16, version: UnixVersion) -> String {
    let columns: &[&[(u16, char)]] = if version == UnixVersion::V1 {
        &[
            &[(V1_LRG, 'l'), (0, 's')],
            &[(V1_DIR, 'd'), (V1_SUID, 's'), (V1_XOWN, 'x'), (0, '-')],
            &[(V1_ROWN, 'r'), (0, '-')],
            &[(V1_WOWN, 'w'), (0, '-')],
            &[(V1_ROTH, 'r'), (0, '-')],
            &[(V1_WOTH, 'w'), (0, '-')],
        ]
    } else {
        &[
            &[(V6_BLK, 'b'), (V6_DIR, 'd'), (V6_CHR, 'c'), (0, '-')],
            &[(V6_ROWN, 'r'), (0, '-')],
            &[(V6_WOWN, 'w'), (0, '-')],
            &[(V6_SUID, 's'), (V6_XOWN, 'x'), (0, '-')],
            &[(V6_RGRP, 'r'), (0, '-')],
            &[(V6_WGRP, 'w'), (0, '-')],
            &[(V6_SGID, 's'), (V6_XGRP, 'x'), (0, '-')],
            &[(V6_ROTH, 'r'), (0, '-')],
            &[(V6_WOTH, 'w'), (0, '-')],
            &[(V6_XOTH, 'x'), (0, '-')],
            &[(V6_STXT, 't'), (0, ' ')],
        ]
    };
    let mut result = String::new();
    for column in columns {
        if let Some(&(_, ch)) = column.iter().find(|(flag, _)| flags & flag == *flag) {
            result.push(ch);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of, size_of};
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<RawInodeV1>(), 32);
    const_assert_eq!(align_of::<RawInodeV1>(), 1);
    const_assert_eq!(offset_of!(RawInodeV1, flags), 0);
    const_assert_eq!(offset_of!(RawInodeV1, nlinks), 2);
    const_assert_eq!(offset_of!(RawInodeV1, uid), 3);
    const_assert_eq!(offset_of!(RawInodeV1, size), 4);
    const_assert_eq!(offset_of!(RawInodeV1, addr), 6);
    const_assert_eq!(offset_of!(RawInodeV1, atime), 22);
    const_assert_eq!(offset_of!(RawInodeV1, mtime), 26);

    const_assert_eq!(size_of::<RawInodeV6>(), 32);
    const_assert_eq!(align_of::<RawInodeV6>(), 1);
    const_assert_eq!(offset_of!(RawInodeV6, flags), 0);
    const_assert_eq!(offset_of!(RawInodeV6, nlinks), 2);
    const_assert_eq!(offset_of!(RawInodeV6, uid), 3);
    const_assert_eq!(offset_of!(RawInodeV6, gid), 4);
    const_assert_eq!(offset_of!(RawInodeV6, size_high), 5);
    const_assert_eq!(offset_of!(RawInodeV6, size_low), 6);
    const_assert_eq!(offset_of!(RawInodeV6, addr), 8);
    const_assert_eq!(offset_of!(RawInodeV6, atime), 24);
    const_assert_eq!(offset_of!(RawInodeV6, mtime), 28);

    const_assert_eq!(size_of::<RawInodeV7>(), 64);
    const_assert_eq!(align_of::<RawInodeV7>(), 1);
    const_assert_eq!(offset_of!(RawInodeV7, flags), 0);
    const_assert_eq!(offset_of!(RawInodeV7, nlinks), 2);
    const_assert_eq!(offset_of!(RawInodeV7, uid), 4);
    const_assert_eq!(offset_of!(RawInodeV7, gid), 6);
    const_assert_eq!(offset_of!(RawInodeV7, size_high), 8);
    const_assert_eq!(offset_of!(RawInodeV7, size_low), 10);
    const_assert_eq!(offset_of!(RawInodeV7, addr), 12);
    const_assert_eq!(offset_of!(RawInodeV7, atime), 52);
    const_assert_eq!(offset_of!(RawInodeV7, mtime), 56);
    const_assert_eq!(offset_of!(RawInodeV7, ctime), 60);

    #[test]
    fn test_l3tol() {
        // high, low, mid
        let data = [0x01, 0x02, 0x03];
        assert_eq!(l3tol(&data, 1), vec![0x010302]);
    }

    #[test]
    fn test_v6_inode_parse() {
        let mut buffer = [0u8; 32];
        buffer[0..2].copy_from_slice(&(V6_ALL | V6_DIR | 0o755).to_le_bytes());
        buffer[2] = 2; // nlinks
        buffer[3] = 5; // uid
        buffer[4] = 1; // gid
        buffer[5] = 0; // size high byte
        buffer[6..8].copy_from_slice(&100u16.to_le_bytes());
        buffer[8..10].copy_from_slice(&42u16.to_le_bytes());
        let inode = UnixInode::read(UnixVersion::V6, 1, &buffer);
        assert!(inode.is_dir());
        assert!(inode.is_allocated());
        assert!(!inode.is_large());
        assert_eq!(inode.size, 100);
        assert_eq!(inode.addr[0], 42);
        assert_eq!(inode.uid, 5);
    }

    #[test]
    fn test_mode_formatting() {
        let mode = format_mode(V6_DIR | V6_ROWN | V6_WOWN | V6_XOWN | V6_ROTH | V6_XOTH,
            UnixVersion::V6);
        assert_eq!(mode, "drwx---r-x");
    }
}
