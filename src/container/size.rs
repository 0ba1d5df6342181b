//! container/size — заголовок объявленного размера образа (u64, native-endian).

use std::io::{self, Read};

use byteorder::{ByteOrder, NativeEndian};

use crate::consts::{PAGE_SIZE, SIZE_HEADER_LEN};
use crate::error::{Phase, Result, SnapError};

/// Total image size announced before the first record. Always a multiple of PAGE_SIZE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct DeclaredSize(u64);

impl DeclaredSize {
    pub fn new(bytes: u64) -> Result<Self> {
        if bytes % PAGE_SIZE as u64 != 0 {
            return Err(SnapError::format(
                Phase::SizeHeader,
                format!(
                    "declared size {} is not a multiple of {}",
                    bytes, PAGE_SIZE
                ),
            ));
        }
        Ok(DeclaredSize(bytes))
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn page_count(&self) -> u64 {
        self.0 / PAGE_SIZE as u64
    }

    pub fn to_bytes(&self) -> [u8; SIZE_HEADER_LEN] {
        let mut out = [0u8; SIZE_HEADER_LEN];
        NativeEndian::write_u64(&mut out, self.0);
        out
    }
}

/// Parse from the start of `buf`; Ok(None) while fewer than 8 bytes are buffered.
pub fn parse_size_header(buf: &[u8]) -> Result<Option<DeclaredSize>> {
    if buf.len() < SIZE_HEADER_LEN {
        return Ok(None);
    }
    DeclaredSize::new(NativeEndian::read_u64(&buf[..SIZE_HEADER_LEN])).map(Some)
}

/// Parse from a reader; end-of-stream before 8 bytes is a format error.
pub fn read_size_header<R: Read>(r: &mut R) -> Result<DeclaredSize> {
    let mut buf = [0u8; SIZE_HEADER_LEN];
    let mut got = 0usize;
    while got < SIZE_HEADER_LEN {
        match r.read(&mut buf[got..]) {
            Ok(0) => return Err(short_size_header(got)),
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SnapError::Read(e)),
        }
    }
    DeclaredSize::new(NativeEndian::read_u64(&buf))
}

pub(crate) fn short_size_header(available: usize) -> SnapError {
    SnapError::format(
        Phase::SizeHeader,
        format!(
            "couldn't read size header: {} of {} bytes available",
            available, SIZE_HEADER_LEN
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn size_header_roundtrip() {
        let s = DeclaredSize::new(8192).unwrap();
        assert_eq!(s.page_count(), 2);
        let parsed = parse_size_header(&s.to_bytes()).unwrap().unwrap();
        assert_eq!(parsed, s);
    }

    #[test]
    fn short_buffer_waits_for_more() {
        assert_eq!(parse_size_header(&[0u8; 7]).unwrap(), None);
    }

    #[test]
    fn unaligned_size_rejected() {
        let mut b = [0u8; 8];
        NativeEndian::write_u64(&mut b, 4097);
        let err = parse_size_header(&b).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::SizeHeader));
    }

    #[test]
    fn reader_eof_before_eight_bytes() {
        let mut r = Cursor::new(vec![0u8; 3]);
        let err = read_size_header(&mut r).unwrap_err();
        assert!(err.is_format());
        assert!(err.to_string().contains("3 of 8"));
    }
}
