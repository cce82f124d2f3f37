use std::fs::{File, OpenOptions};
use std::io::{Cursor, Error, ErrorKind, Read, Result, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{BLOCK_SIZE, read_only_error};

enum Backing {
    File(File),
    Memory(Cursor<Vec<u8>>),
}

/// Random access to an image file.
///
/// Backed either by a host file or by an in-memory buffer; the latter is
/// what `initialize` and the tests build images in. Writes on a read-only
/// image fail with [`ErrorKind::PermissionDenied`].
pub struct ByteFile {
    backing: Backing,
    read_only: bool,
}

impl ByteFile {
    /// Open an image file for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            backing: Backing::File(file),
            read_only: false,
        })
    }

    /// Open an image file for reading only.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self {
            backing: Backing::File(file),
            read_only: true,
        })
    }

    /// Create (or truncate) an image file of the given size, zero-filled.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        Ok(Self {
            backing: Backing::File(file),
            read_only: false,
        })
    }

    /// Build an in-memory image from a buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            backing: Backing::Memory(Cursor::new(data)),
            read_only: false,
        }
    }

    /// Build a zero-filled in-memory image of `size` bytes.
    pub fn with_size(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Image size in bytes.
    pub fn size(&mut self) -> Result<u64> {
        match &mut self.backing {
            Backing::File(f) => f.metadata().map(|m| m.len()),
            Backing::Memory(c) => Ok(c.get_ref().len() as u64),
        }
    }

    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    pub fn tell(&mut self) -> Result<u64> {
        self.stream_position()
    }

    /// Resize the image. Extension zero-fills.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        if self.read_only {
            return Err(read_only_error());
        }
        match &mut self.backing {
            Backing::File(f) => f.set_len(size),
            Backing::Memory(c) => {
                c.get_mut().resize(size as usize, 0);
                if c.position() > size {
                    c.set_position(size);
                }
                Ok(())
            }
        }
    }

    /// Read `count` blocks starting at block `block_number`.
    ///
    /// The result is always `count * BLOCK_SIZE` bytes; the region past the
    /// end of a short image reads as zeros.
    pub fn read_block(&mut self, block_number: u64, count: usize) -> Result<Vec<u8>> {
        let size = self.size()?;
        let position = block_number
            .checked_mul(BLOCK_SIZE as u64)
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "block number out of range"))?;
        if position >= size && count > 0 {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("block {} is beyond the end of the image", block_number),
            ));
        }
        let mut buffer = vec![0u8; count * BLOCK_SIZE];
        self.seek(SeekFrom::Start(position))?;
        let mut filled = 0;
        while filled < buffer.len() {
            let n = self.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(buffer)
    }

    /// Write `count` blocks starting at block `block_number`.
    ///
    /// `buffer` may be longer than `count * BLOCK_SIZE`; the excess is
    /// ignored. A shorter buffer is zero-padded to the block boundary.
    pub fn write_block(&mut self, buffer: &[u8], block_number: u64, count: usize) -> Result<()> {
        if self.read_only {
            return Err(read_only_error());
        }
        let length = count * BLOCK_SIZE;
        let position = block_number
            .checked_mul(BLOCK_SIZE as u64)
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "block number out of range"))?;
        self.seek(SeekFrom::Start(position))?;
        if buffer.len() >= length {
            self.write_all(&buffer[..length])
        } else {
            self.write_all(buffer)?;
            let pad = vec![0u8; length - buffer.len()];
            self.write_all(&pad)
        }
    }

    /// Read the whole image.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let size = self.size()? as usize;
        let mut data = vec![0u8; size];
        self.seek(SeekFrom::Start(0))?;
        self.read_exact(&mut data)?;
        Ok(data)
    }

    /// Consume an in-memory image, returning its buffer.
    ///
    /// Panics if the image is file-backed; only tests and `initialize`
    /// pipelines use this.
    pub fn into_vec(self) -> Vec<u8> {
        match self.backing {
            Backing::Memory(c) => c.into_inner(),
            Backing::File(_) => panic!("into_vec on a file-backed image"),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

impl Read for ByteFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.backing {
            Backing::File(f) => f.read(buf),
            Backing::Memory(c) => c.read(buf),
        }
    }
}

impl Write for ByteFile {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.read_only {
            return Err(read_only_error());
        }
        match &mut self.backing {
            Backing::File(f) => f.write(buf),
            Backing::Memory(c) => c.write(buf),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match &mut self.backing {
            Backing::File(f) => f.flush(),
            Backing::Memory(c) => c.flush(),
        }
    }
}

impl Seek for ByteFile {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match &mut self.backing {
            Backing::File(f) => f.seek(pos),
            Backing::Memory(c) => c.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_io_roundtrip() {
        let mut f = ByteFile::with_size(BLOCK_SIZE * 4);
        let block: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
        f.write_block(&block, 2, 1).unwrap();
        assert_eq!(f.read_block(2, 1).unwrap(), block);
        assert_eq!(f.read_block(1, 1).unwrap(), vec![0u8; BLOCK_SIZE]);
    }

    #[test]
    fn test_short_buffer_is_padded() {
        let mut f = ByteFile::with_size(BLOCK_SIZE * 2);
        f.write_block(&[0xAA; 10], 0, 1).unwrap();
        let data = f.read_block(0, 1).unwrap();
        assert_eq!(&data[..10], &[0xAA; 10]);
        assert_eq!(&data[10..], &vec![0u8; BLOCK_SIZE - 10][..]);
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut f = ByteFile::with_size(BLOCK_SIZE);
        assert!(f.read_block(1, 1).is_err());
    }

    #[test]
    fn test_read_only_write_fails() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), vec![0u8; BLOCK_SIZE]).unwrap();
        let mut f = ByteFile::open_read_only(tmp.path()).unwrap();
        let err = f.write_block(&[0u8; BLOCK_SIZE], 0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_truncate_extends_with_zeros() {
        let mut f = ByteFile::from_vec(vec![1u8; 16]);
        f.truncate(32).unwrap();
        assert_eq!(f.size().unwrap(), 32);
        let data = f.read_all().unwrap();
        assert_eq!(&data[16..], &[0u8; 16]);
    }
}
