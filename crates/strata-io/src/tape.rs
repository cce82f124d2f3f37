use std::io::{Error, ErrorKind, Read, Result, Seek, SeekFrom, Write};

use crate::file::ByteFile;

/// SIMH-style magnetic tape over a [`ByteFile`].
///
/// Records are framed by a 32-bit little-endian length before and after the
/// payload, which is zero-padded to an even length. A zero length is a tape
/// mark. End of medium surfaces as [`ErrorKind::UnexpectedEof`].
pub struct TapeStream {
    file: ByteFile,
}

impl TapeStream {
    pub fn new(file: ByteFile) -> Self {
        Self { file }
    }

    pub fn is_read_only(&self) -> bool {
        self.file.is_read_only()
    }

    pub fn size(&mut self) -> Result<u64> {
        self.file.size()
    }

    pub fn file_mut(&mut self) -> &mut ByteFile {
        &mut self.file
    }

    pub fn into_file(self) -> ByteFile {
        self.file
    }

    /// Current tape position.
    pub fn pos(&mut self) -> Result<u64> {
        self.file.tell()
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.seek(0)
    }

    /// Truncate the tape at the current position.
    pub fn truncate_here(&mut self) -> Result<()> {
        let pos = self.pos()?;
        self.file.truncate(pos)
    }

    /// Read the record at the current position.
    ///
    /// Returns the payload, or an empty vector for a tape mark. The high
    /// half of the length word must be zero; anything else is a framing
    /// error. End of medium is `UnexpectedEof`.
    pub fn read_forward(&mut self) -> Result<Vec<u8>> {
        let mut bc = [0u8; 4];
        let n = self.file.read(&mut bc)?;
        if n == 0 {
            return Err(Error::new(ErrorKind::UnexpectedEof, "end of medium"));
        }
        if n < 4 {
            self.file.read_exact(&mut bc[n..])?;
        }
        if bc[2] != 0 || bc[3] != 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!(
                    "invalid record size, size = 0x{:02X}{:02X}{:02X}{:02X}",
                    bc[3], bc[2], bc[1], bc[0]
                ),
            ));
        }
        let wc = (((bc[1] as usize) << 8 | bc[0] as usize) + 1) & !1;
        if wc == 0 {
            // Tape mark
            return Ok(Vec::new());
        }
        let mut buffer = vec![0u8; wc];
        let mut filled = 0;
        while filled < wc {
            let n = self.file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        // Trailing record length
        let mut trailer = [0u8; 4];
        let _ = self.file.read(&mut trailer)?;
        Ok(buffer)
    }

    /// Write one record (length, payload padded to even length, length).
    pub fn write_forward(&mut self, data: &[u8]) -> Result<()> {
        let wc = data.len() as u32;
        let bc = [(wc & 0xFF) as u8, ((wc >> 8) & 0xFF) as u8, 0, 0];
        self.file.write_all(&bc)?;
        self.file.write_all(data)?;
        if data.len() % 2 != 0 {
            self.file.write_all(&[0])?;
        }
        self.file.write_all(&bc)
    }

    /// Write a tape mark at the current position.
    pub fn write_mark(&mut self) -> Result<()> {
        self.file.write_all(&[0u8; 4])
    }

    /// Read records up to the next tape mark, concatenated.
    pub fn read_file(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let buffer = self.read_forward()?;
            if buffer.is_empty() {
                return Ok(data);
            }
            data.extend_from_slice(&buffer);
        }
    }

    /// Read one header record, then skip to the next tape mark.
    ///
    /// Returns the header and the number of payload bytes skipped. An empty
    /// header means the position was at a tape mark.
    pub fn read_header(&mut self) -> Result<(Vec<u8>, u64)> {
        let header = self.read_forward()?;
        if header.is_empty() {
            return Ok((header, 0));
        }
        match self.skip_file() {
            Ok(skipped) => Ok((header, skipped)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok((header, 0)),
            Err(e) => Err(e),
        }
    }

    /// Skip records up to the next tape mark, returning the bytes skipped.
    pub fn skip_file(&mut self) -> Result<u64> {
        let mut skipped = 0u64;
        loop {
            let buffer = self.read_forward()?;
            if buffer.is_empty() {
                return Ok(skipped);
            }
            skipped += buffer.len() as u64;
        }
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

    #[test]
    fn test_record_roundtrip() {
        let mut tape = TapeStream::new(ByteFile::from_vec(Vec::new()));
        tape.write_forward(b"HELLO").unwrap();
        tape.write_mark().unwrap();
        tape.rewind().unwrap();
        let rec = tape.read_forward().unwrap();
        // Payload is padded to even length.
        assert_eq!(&rec[..5], b"HELLO");
        assert_eq!(rec.len(), 6);
        assert!(tape.read_forward().unwrap().is_empty());
    }

    #[test]
    fn test_read_file_concatenates_records() {
        let mut tape = TapeStream::new(ByteFile::from_vec(Vec::new()));
        tape.write_forward(&[1u8; 10]).unwrap();
        tape.write_forward(&[2u8; 10]).unwrap();
        tape.write_mark().unwrap();
        tape.rewind().unwrap();
        let data = tape.read_file().unwrap();
        assert_eq!(data.len(), 20);
        assert_eq!(&data[..10], &[1u8; 10]);
    }

    #[test]
    fn test_end_of_medium() {
        let mut tape = TapeStream::new(ByteFile::from_vec(Vec::new()));
        let err = tape.read_forward().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_bad_length_high_half() {
        let mut tape = TapeStream::new(ByteFile::from_vec(vec![0, 0, 1, 0]));
        let err = tape.read_forward().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_header_skips_to_mark() {
        let mut tape = TapeStream::new(ByteFile::from_vec(Vec::new()));
        tape.write_forward(b"HDR0").unwrap();
        tape.write_forward(&[0u8; 512]).unwrap();
        tape.write_forward(&[0u8; 512]).unwrap();
        tape.write_mark().unwrap();
        tape.write_forward(b"NEXT").unwrap();
        tape.rewind().unwrap();
        let (header, skipped) = tape.read_header().unwrap();
        assert_eq!(header, b"HDR0");
        assert_eq!(skipped, 1024);
        assert_eq!(tape.read_forward().unwrap(), b"NEXT");
    }
}
