use std::io::{Error, ErrorKind, Read, Result, Seek, SeekFrom, Write};

use crate::block::BlockDevice;
use crate::file::ByteFile;
use crate::rx::{rx_extract_12bit_words, rx_pack_12bit_words, rxfactr_12bit};
use crate::{BLOCK_SIZE, read_only_error};

/// 12-bit words per logical block.
pub const WORDS_PER_BLOCK_12BIT: usize = 256;
/// Default 18-bit words per block (DECtape); UNIX v0 surfaces use 64.
pub const WORDS_PER_BLOCK_18BIT: usize = 256;
/// Each 18-bit word is stored as a little-endian 32-bit word.
pub const BYTES_PER_WORD_18BIT: usize = 4;

/// 12-bit and 18-bit word overlays on a [`BlockDevice`].
///
/// In 12-bit mode, RX media are read sector-by-sector through the
/// interleave with the PDP-8 two-words-per-three-bytes packing; linear
/// media store one word per little-endian 16-bit pair. Byte-level block
/// access stays linear even on RX media, matching how PDP-8 monitors see
/// the disk.
pub struct WordBlockDevice {
    dev: BlockDevice,
    is_rx_12bit: bool,
    words_per_block_18bit: usize,
}

impl WordBlockDevice {
    pub fn new(file: ByteFile) -> Result<Self> {
        let dev = BlockDevice::new(file)?;
        let is_rx_12bit = dev.is_rx();
        let dev = BlockDevice::without_rx_support(dev.into_file());
        Ok(Self {
            dev,
            is_rx_12bit,
            words_per_block_18bit: WORDS_PER_BLOCK_18BIT,
        })
    }

    /// Override the 18-bit words-per-block geometry.
    pub fn with_words_per_block_18bit(mut self, words: usize) -> Self {
        self.words_per_block_18bit = words;
        self
    }

    pub fn is_rx_12bit(&self) -> bool {
        self.is_rx_12bit
    }

    pub fn size(&mut self) -> Result<u64> {
        self.dev.size()
    }

    pub fn is_read_only(&self) -> bool {
        self.dev.is_read_only()
    }

    pub fn file_mut(&mut self) -> &mut ByteFile {
        self.dev.file_mut()
    }

    pub fn into_file(self) -> ByteFile {
        self.dev.into_file()
    }

    pub fn read_block(&mut self, block_number: u64, count: usize) -> Result<Vec<u8>> {
        self.dev.read_block(block_number, count)
    }

    pub fn write_block(&mut self, buffer: &[u8], block_number: u64, count: usize) -> Result<()> {
        self.dev.write_block(buffer, block_number, count)
    }

    /// Read a block as 256 12-bit words.
    pub fn read_block_12bit(&mut self, block_number: u64) -> Result<Vec<u16>> {
        if self.is_rx_12bit {
            let sector_size = crate::rx::sector_size_for(self.dev.size()?);
            let mut result = Vec::with_capacity(WORDS_PER_BLOCK_12BIT);
            for position in rxfactr_12bit(block_number, sector_size) {
                let file = self.dev.file_mut();
                file.seek(SeekFrom::Start(position))?;
                let mut sector = vec![0u8; sector_size];
                file.read_exact(&mut sector)?;
                result.extend(rx_extract_12bit_words(&sector, sector_size));
            }
            Ok(result)
        } else {
            let data = self.dev.read_block(block_number, 1)?;
            Ok(data
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) & 0o7777)
                .collect())
        }
    }

    /// Write 256 12-bit words as a block.
    pub fn write_block_12bit(&mut self, block_number: u64, words: &[u16]) -> Result<()> {
        if words.len() != WORDS_PER_BLOCK_12BIT {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "a 12-bit block is 256 words",
            ));
        }
        if self.is_rx_12bit {
            if self.is_read_only() {
                return Err(read_only_error());
            }
            let sector_size = crate::rx::sector_size_for(self.dev.size()?);
            let words_per_sector = if sector_size == crate::rx::RX01_SECTOR_SIZE {
                crate::rx::RX01_WORDS_PER_SECTOR
            } else {
                crate::rx::RX02_WORDS_PER_SECTOR
            };
            for (i, position) in rxfactr_12bit(block_number, sector_size).iter().enumerate() {
                let sector = rx_pack_12bit_words(words, i * words_per_sector, sector_size);
                let file = self.dev.file_mut();
                file.seek(SeekFrom::Start(*position))?;
                file.write_all(&sector)?;
            }
            Ok(())
        } else {
            let mut data = Vec::with_capacity(BLOCK_SIZE);
            for &word in words {
                data.extend_from_slice(&(word & 0o7777).to_le_bytes());
            }
            self.dev.write_block(&data, block_number, 1)
        }
    }

    /// Read a block as 18-bit words, one per stored 32-bit word.
    pub fn read_block_18bit(&mut self, block_number: u64) -> Result<Vec<u32>> {
        let bytes = self.words_per_block_18bit * BYTES_PER_WORD_18BIT;
        let file = self.dev.file_mut();
        file.seek(SeekFrom::Start(block_number * bytes as u64))?;
        let mut buffer = vec![0u8; bytes];
        file.read_exact(&mut buffer)?;
        Ok(buffer
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) & 0o777777)
            .collect())
    }

    /// Write 18-bit words as a block.
    pub fn write_block_18bit(&mut self, block_number: u64, words: &[u32]) -> Result<()> {
        if words.len() != self.words_per_block_18bit {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "word count does not match the block geometry",
            ));
        }
        let bytes = self.words_per_block_18bit * BYTES_PER_WORD_18BIT;
        let file = self.dev.file_mut();
        file.seek(SeekFrom::Start(block_number * bytes as u64))?;
        for &word in words {
            file.write_all(&(word & 0o777777).to_le_bytes())?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.dev.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.dev.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rx::RX01_SIZE;

    #[test]
    fn test_12bit_linear_roundtrip() {
        let file = ByteFile::with_size(BLOCK_SIZE * 4);
        let mut dev = WordBlockDevice::new(file).unwrap();
        let words: Vec<u16> = (0..256u16).map(|i| (i * 13) & 0o7777).collect();
        dev.write_block_12bit(2, &words).unwrap();
        assert_eq!(dev.read_block_12bit(2).unwrap(), words);
    }

    #[test]
    fn test_12bit_rx_roundtrip() {
        let file = ByteFile::with_size(RX01_SIZE as usize);
        let mut dev = WordBlockDevice::new(file).unwrap();
        assert!(dev.is_rx_12bit());
        let words: Vec<u16> = (0..256u16).map(|i| (4095 - i) & 0o7777).collect();
        dev.write_block_12bit(7, &words).unwrap();
        assert_eq!(dev.read_block_12bit(7).unwrap(), words);
    }

    #[test]
    fn test_18bit_roundtrip() {
        let file = ByteFile::with_size(1024 * 8);
        let mut dev = WordBlockDevice::new(file).unwrap();
        let words: Vec<u32> = (0..256u32).map(|i| (i * 1001) & 0o777777).collect();
        dev.write_block_18bit(3, &words).unwrap();
        assert_eq!(dev.read_block_18bit(3).unwrap(), words);
    }
}
