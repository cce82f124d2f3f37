//! RX01/RX02 floppy geometry.
//!
//! RX media store 512-byte logical blocks as groups of physical sectors
//! laid out with the canonical DEC 2:1 interleave and 6-sector track skew.
//! The mapping must match the hardware exactly or images stop being
//! interchangeable with emulators.

use crate::BLOCK_SIZE;

/// Sectors per track.
pub const RX_SECTOR_TRACK: u64 = 26;
/// Tracks per disk.
pub const RX_TRACK_DISK: u64 = 77;
/// RX01 bytes per sector.
pub const RX01_SECTOR_SIZE: usize = 128;
/// RX02 bytes per sector.
pub const RX02_SECTOR_SIZE: usize = 256;
/// RX01 capacity in bytes.
pub const RX01_SIZE: u64 = RX_TRACK_DISK * RX_SECTOR_TRACK * RX01_SECTOR_SIZE as u64;
/// RX02 capacity in bytes.
pub const RX02_SIZE: u64 = RX_TRACK_DISK * RX_SECTOR_TRACK * RX02_SECTOR_SIZE as u64;

/// 12-bit words stored per RX01 sector (96 of the 128 bytes are used).
pub const RX01_WORDS_PER_SECTOR: usize = 64;
/// 12-bit words stored per RX02 sector (192 of the 256 bytes are used).
pub const RX02_WORDS_PER_SECTOR: usize = 128;

/// Sector size implied by an exact RX image size, 512 otherwise.
pub fn sector_size_for(image_size: u64) -> usize {
    if image_size == RX01_SIZE {
        RX01_SECTOR_SIZE
    } else if image_size == RX02_SIZE {
        RX02_SECTOR_SIZE
    } else {
        BLOCK_SIZE
    }
}

/// Byte position of logical sector `sector_number` on an interleaved disk.
///
/// Track 0 is reserved; logical sector 0 lands on track 1, and the last
/// logical track wraps onto track 0.
pub fn rxfactr(sector_number: u64, sector_size: usize) -> u64 {
    if sector_size != RX01_SECTOR_SIZE && sector_size != RX02_SECTOR_SIZE {
        return sector_number * BLOCK_SIZE as u64;
    }
    let mut track = sector_number / RX_SECTOR_TRACK + 1;
    let mut i = (sector_number % RX_SECTOR_TRACK) << 1;
    if i >= RX_SECTOR_TRACK {
        i += 1;
    }
    let sector = (i + 6 * (track - 1)) % RX_SECTOR_TRACK + 1;
    if track >= RX_TRACK_DISK {
        track = 0;
    }
    track * 3328 + (sector - 1) * sector_size as u64
}

/// Byte positions of the sectors holding 12-bit block `block_number`.
///
/// A 256-word block spans 4 RX01 sectors or 2 RX02 sectors.
pub fn rxfactr_12bit(block_number: u64, sector_size: usize) -> Vec<u64> {
    let words_per_sector = if sector_size == RX01_SECTOR_SIZE {
        RX01_WORDS_PER_SECTOR
    } else {
        RX02_WORDS_PER_SECTOR
    };
    let sectors_per_block = (256 / words_per_sector) as u64;
    (0..sectors_per_block)
        .map(|i| rxfactr(block_number * sectors_per_block + i, sector_size))
        .collect()
}

/// Unpack the 12-bit words of one RX sector (two words per three bytes).
pub fn rx_extract_12bit_words(data: &[u8], sector_size: usize) -> Vec<u16> {
    let words = if sector_size == RX01_SECTOR_SIZE {
        RX01_WORDS_PER_SECTOR
    } else {
        RX02_WORDS_PER_SECTOR
    };
    let mut result = Vec::with_capacity(words);
    for i in (0..words * 3 / 2).step_by(3) {
        let b0 = data[i] as u16;
        let b1 = data[i + 1] as u16;
        let b2 = data[i + 2] as u16;
        result.push(b0 | ((b2 & 0o360) << 4));
        result.push(b1 | ((b2 & 0o17) << 8));
    }
    result
}

/// Pack 12-bit words into one RX sector, starting at word `position`.
///
/// The tail of the sector past the packed words stays zero.
pub fn rx_pack_12bit_words(words: &[u16], position: usize, sector_size: usize) -> Vec<u8> {
    let count = if sector_size == RX01_SECTOR_SIZE {
        RX01_WORDS_PER_SECTOR
    } else {
        RX02_WORDS_PER_SECTOR
    };
    let mut data = vec![0u8; sector_size];
    for i in (0..count).step_by(2) {
        let w1 = words.get(position + i).copied().unwrap_or(0) & 0o7777;
        let w2 = words.get(position + i + 1).copied().unwrap_or(0) & 0o7777;
        let offset = i * 3 / 2;
        data[offset] = (w1 & 0xFF) as u8;
        data[offset + 1] = (w2 & 0xFF) as u8;
        data[offset + 2] = (((w2 >> 8) & 0o17) | ((w1 >> 4) & 0o360)) as u8;
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rxfactr_linear() {
        assert_eq!(rxfactr(3, BLOCK_SIZE), 3 * 512);
    }

    #[test]
    fn test_rxfactr_first_sectors() {
        // Sector 0 is track 1, interleaved sector 1.
        assert_eq!(rxfactr(0, RX01_SECTOR_SIZE), 3328);
        // Sector 1 maps to interleaved sector 3 of track 1.
        assert_eq!(rxfactr(1, RX01_SECTOR_SIZE), 3328 + 2 * 128);
    }

    #[test]
    fn test_rxfactr_positions_are_unique() {
        let total = RX_SECTOR_TRACK * RX_TRACK_DISK;
        let mut seen = std::collections::HashSet::new();
        for s in 0..total {
            assert!(seen.insert(rxfactr(s, RX02_SECTOR_SIZE)));
        }
    }

    #[test]
    fn test_pack_extract_roundtrip() {
        let words: Vec<u16> = (0..256u16).map(|i| (i * 17) & 0o7777).collect();
        for &sector_size in &[RX01_SECTOR_SIZE, RX02_SECTOR_SIZE] {
            let per = if sector_size == RX01_SECTOR_SIZE { 64 } else { 128 };
            let mut out = Vec::new();
            for pos in (0..256).step_by(per) {
                let sector = rx_pack_12bit_words(&words, pos, sector_size);
                out.extend(rx_extract_12bit_words(&sector, sector_size));
            }
            assert_eq!(out, words);
        }
    }
}
