//! chunk — кодек 8-байтового заголовка страницы (chunk header).
//!
//! Формат (u64, native-endian):
//!   [63..48] iteration_seq — номер итерации live-миграции, породившей страницу
//!   [47..0]  page_offset   — байтовое смещение страницы в образе (кратно PAGE_SIZE)
//!
//! Ошибка выравнивания при декодировании фатальна для всего потока:
//! после неё границам последующих записей доверять нельзя.

use byteorder::{ByteOrder, NativeEndian};

use crate::consts::{
    CHUNK_HEADER_SIZE, ITER_SEQ_BITS, ITER_SEQ_MASK, ITER_SEQ_SHIFT, PAGE_OFFSET_MASK, PAGE_SIZE,
};
use crate::error::{Phase, Result, SnapError};

/// Decoded chunk header. Always holds a well-formed word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHeader(u64);

impl ChunkHeader {
    /// Encode: pack offset and generation into one word.
    pub fn new(page_offset: u64, iteration_seq: u32) -> Result<Self> {
        if page_offset > PAGE_OFFSET_MASK {
            return Err(SnapError::Field(format!(
                "page offset {:#x} does not fit in {} bits",
                page_offset, ITER_SEQ_SHIFT
            )));
        }
        if iteration_seq as u64 > ITER_SEQ_MASK {
            return Err(SnapError::Field(format!(
                "iteration seq {} does not fit in {} bits",
                iteration_seq, ITER_SEQ_BITS
            )));
        }
        Ok(ChunkHeader(
            ((iteration_seq as u64) << ITER_SEQ_SHIFT) | page_offset,
        ))
    }

    /// Decode a raw word, validating page alignment.
    pub fn from_word(word: u64) -> Result<Self> {
        let hdr = ChunkHeader(word);
        if hdr.page_offset() % PAGE_SIZE as u64 != 0 {
            return Err(SnapError::format(
                Phase::Records,
                format!(
                    "chunk header {:#018x}: page offset {:#x} is not aligned to {} bytes",
                    word,
                    hdr.page_offset(),
                    PAGE_SIZE
                ),
            ));
        }
        Ok(hdr)
    }

    /// Decode the first 8 bytes of a record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CHUNK_HEADER_SIZE {
            return Err(SnapError::format(
                Phase::Records,
                format!("chunk header needs {} bytes, got {}", CHUNK_HEADER_SIZE, bytes.len()),
            ));
        }
        Self::from_word(NativeEndian::read_u64(&bytes[..CHUNK_HEADER_SIZE]))
    }

    #[inline]
    pub fn word(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn page_offset(&self) -> u64 {
        self.0 & PAGE_OFFSET_MASK
    }

    #[inline]
    pub fn iteration_seq(&self) -> u16 {
        ((self.0 >> ITER_SEQ_SHIFT) & ITER_SEQ_MASK) as u16
    }

    #[inline]
    pub fn page_index(&self) -> u64 {
        self.page_offset() / PAGE_SIZE as u64
    }

    pub fn to_bytes(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut out = [0u8; CHUNK_HEADER_SIZE];
        NativeEndian::write_u64(&mut out, self.0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_split_at_bit_48() {
        let word = (7u64 << 48) | (3 * PAGE_SIZE as u64);
        let h = ChunkHeader::from_word(word).unwrap();
        assert_eq!(h.iteration_seq(), 7);
        assert_eq!(h.page_offset(), 3 * 4096);
        assert_eq!(h.page_index(), 3);
        assert_eq!(h.word(), word);
    }

    #[test]
    fn encode_matches_decode() {
        let h = ChunkHeader::new(0xFFFF_FFFF_F000, 0xFFFF).unwrap();
        let d = ChunkHeader::decode(&h.to_bytes()).unwrap();
        assert_eq!(d.page_offset(), 0xFFFF_FFFF_F000);
        assert_eq!(d.iteration_seq(), 0xFFFF);
    }

    #[test]
    fn encode_rejects_oversized_fields() {
        assert!(matches!(
            ChunkHeader::new(1u64 << 48, 0),
            Err(SnapError::Field(_))
        ));
        assert!(matches!(
            ChunkHeader::new(0, 1 << 16),
            Err(SnapError::Field(_))
        ));
    }

    #[test]
    fn decode_rejects_misaligned_offset() {
        let err = ChunkHeader::from_word((1u64 << 48) | 4097).unwrap_err();
        assert!(err.is_format());
        assert_eq!(err.phase(), Some(Phase::Records));
    }

    #[test]
    fn decode_short_input_is_format_error() {
        assert!(ChunkHeader::decode(&[0u8; 5]).unwrap_err().is_format());
    }
}
