use std::io::{Read, Result, Seek, SeekFrom, Write};

use crate::file::ByteFile;
use crate::rx::{RX01_SECTOR_SIZE, RX02_SECTOR_SIZE, rxfactr, sector_size_for};
use crate::{BLOCK_SIZE, read_only_error};

/// Fixed-size logical block I/O over a [`ByteFile`].
///
/// The sector layout is chosen from the image size: exact RX01/RX02 images
/// go through the interleave mapping, everything else is linear. Logical
/// blocks are always 512 bytes.
pub struct BlockDevice {
    file: ByteFile,
    sector_size: usize,
    is_rx: bool,
}

impl BlockDevice {
    pub fn new(mut file: ByteFile) -> Result<Self> {
        let size = file.size()?;
        let sector_size = sector_size_for(size);
        let is_rx = sector_size == RX01_SECTOR_SIZE || sector_size == RX02_SECTOR_SIZE;
        if is_rx {
            log::debug!("RX media detected, sector size {}", sector_size);
        }
        Ok(Self {
            file,
            sector_size,
            is_rx,
        })
    }

    /// Build a device that ignores RX geometry even on RX-sized images.
    pub fn without_rx_support(file: ByteFile) -> Self {
        Self {
            file,
            sector_size: BLOCK_SIZE,
            is_rx: false,
        }
    }

    pub fn is_rx(&self) -> bool {
        self.is_rx
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    pub fn size(&mut self) -> Result<u64> {
        self.file.size()
    }

    pub fn is_read_only(&self) -> bool {
        self.file.is_read_only()
    }

    /// Access to the underlying image, for byte-granular formats.
    pub fn file_mut(&mut self) -> &mut ByteFile {
        &mut self.file
    }

    pub fn into_file(self) -> ByteFile {
        self.file
    }

    pub fn read_block(&mut self, block_number: u64, count: usize) -> Result<Vec<u8>> {
        if !self.is_rx {
            return self.file.read_block(block_number, count);
        }
        let sectors_per_block = (BLOCK_SIZE / self.sector_size) as u64;
        let start_sector = block_number * sectors_per_block;
        let mut data = Vec::with_capacity(count * BLOCK_SIZE);
        for i in 0..count as u64 * sectors_per_block {
            let position = rxfactr(start_sector + i, self.sector_size);
            self.file.seek(SeekFrom::Start(position))?;
            let mut sector = vec![0u8; self.sector_size];
            self.file.read_exact(&mut sector)?;
            data.extend_from_slice(&sector);
        }
        Ok(data)
    }

    pub fn write_block(&mut self, buffer: &[u8], block_number: u64, count: usize) -> Result<()> {
        if !self.is_rx {
            return self.file.write_block(buffer, block_number, count);
        }
        if self.is_read_only() {
            return Err(read_only_error());
        }
        let sectors_per_block = (BLOCK_SIZE / self.sector_size) as u64;
        let start_sector = block_number * sectors_per_block;
        let mut padded;
        let buffer = if buffer.len() < count * BLOCK_SIZE {
            padded = buffer.to_vec();
            padded.resize(count * BLOCK_SIZE, 0);
            &padded[..]
        } else {
            buffer
        };
        for i in 0..count * sectors_per_block as usize {
            let position = rxfactr(start_sector + i as u64, self.sector_size);
            self.file.seek(SeekFrom::Start(position))?;
            self.file
                .write_all(&buffer[i * self.sector_size..(i + 1) * self.sector_size])?;
        }
        Ok(())
    }

    pub fn truncate(&mut self, size: u64) -> Result<()> {
        self.file.truncate(size)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.file.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rx::RX01_SIZE;

    #[test]
    fn test_linear_block_io() {
        let file = ByteFile::with_size(BLOCK_SIZE * 8);
        let mut dev = BlockDevice::new(file).unwrap();
        assert!(!dev.is_rx());
        let block = vec![0x42u8; BLOCK_SIZE];
        dev.write_block(&block, 5, 1).unwrap();
        assert_eq!(dev.read_block(5, 1).unwrap(), block);
    }

    #[test]
    fn test_rx01_roundtrip_through_interleave() {
        let file = ByteFile::with_size(RX01_SIZE as usize);
        let mut dev = BlockDevice::new(file).unwrap();
        assert!(dev.is_rx());
        assert_eq!(dev.sector_size(), RX01_SECTOR_SIZE);
        let block: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i % 199) as u8).collect();
        dev.write_block(&block, 3, 1).unwrap();
        assert_eq!(dev.read_block(3, 1).unwrap(), block);
        // The interleave scatters the block across the raw image.
        let raw = dev.file_mut().read_block(3, 1).unwrap();
        assert_ne!(raw, block);
    }
}
