//! Wire codec primitives.
//!
//! All integers travel big-endian; variable-length byte strings carry a u32
//! length prefix. Messages are built and parsed through `WireWriter` /
//! `WireReader` so the field layout lives in one place per message.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of input (wanted {wanted} more bytes, had {had})")]
    Truncated { wanted: usize, had: usize },
    #[error("unknown message tag: {0}")]
    UnknownTag(u8),
    #[error("declared length {0} exceeds remaining input")]
    BadLength(u32),
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Append-only big-endian encoder.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// u32 length prefix + raw bytes.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    pub fn put_raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-style big-endian decoder over a borrowed buffer.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Fail unless the whole input was consumed.
    pub fn finish(self) -> Result<(), WireError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(WireError::TrailingBytes(self.buf.len()))
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(WireError::Truncated {
                wanted: n,
                had: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// u32 length prefix + raw bytes.
    pub fn get_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.get_u32()?;
        if len as usize > self.remaining() {
            return Err(WireError::BadLength(len));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    pub fn get_raw(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_roundtrip() {
        let mut w = WireWriter::new();
        w.put_u8(0xab);
        w.put_u16(0x1234);
        w.put_u32(0xdeadbeef);
        w.put_u64(0x0102030405060708);
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        assert_eq!(r.get_u8().unwrap(), 0xab);
        assert_eq!(r.get_u16().unwrap(), 0x1234);
        assert_eq!(r.get_u32().unwrap(), 0xdeadbeef);
        assert_eq!(r.get_u64().unwrap(), 0x0102030405060708);
        r.finish().unwrap();
    }

    #[test]
    fn test_big_endian_layout() {
        let mut w = WireWriter::new();
        w.put_u32(1);
        assert_eq!(w.into_bytes(), vec![0, 0, 0, 1]);

        let mut w = WireWriter::new();
        w.put_u16(0x0102);
        assert_eq!(w.into_bytes(), vec![1, 2]);
    }

    #[test]
    fn test_length_prefixed_bytes() {
        let mut w = WireWriter::new();
        w.put_bytes(b"hello");
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
        assert_eq!(&bytes[4..], b"hello");

        let mut r = WireReader::new(&bytes);
        assert_eq!(r.get_bytes().unwrap(), b"hello");
        r.finish().unwrap();
    }

    #[test]
    fn test_empty_bytes() {
        let mut w = WireWriter::new();
        w.put_bytes(b"");
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        assert_eq!(r.get_bytes().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_truncated_read() {
        let mut r = WireReader::new(&[0, 0]);
        assert!(matches!(
            r.get_u32(),
            Err(WireError::Truncated { wanted: 4, had: 2 })
        ));
    }

    #[test]
    fn test_bad_declared_length() {
        // Length prefix claims 100 bytes but only 2 follow
        let mut r = WireReader::new(&[0, 0, 0, 100, 1, 2]);
        assert_eq!(r.get_bytes(), Err(WireError::BadLength(100)));
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let r = WireReader::new(&[1, 2, 3]);
        assert_eq!(r.finish(), Err(WireError::TrailingBytes(3)));
    }
}
