//! Общие константы формата (container header, size header, page records).
//!
//! Все многобайтовые поля пишутся гипервизором в native-endian.

// -------- Pages / records --------

/// Размер одной страницы (blob) памяти VM.
pub const PAGE_SIZE: usize = 4096;

/// Chunk header: один u64 перед каждой страницей.
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Полная запись в потоке: [chunk header u64][page 4096].
pub const RECORD_SIZE: usize = CHUNK_HEADER_SIZE + PAGE_SIZE;

// Chunk header layout (u64):
// [63..48] iteration seq (16 bit)
// [47..0]  page byte offset (48 bit, multiple of PAGE_SIZE)
pub const ITER_SEQ_BITS: u32 = 16;
pub const ITER_SEQ_SHIFT: u32 = 64 - ITER_SEQ_BITS;
pub const PAGE_OFFSET_MASK: u64 = (1u64 << ITER_SEQ_SHIFT) - 1;
pub const ITER_SEQ_MASK: u64 = (1u64 << ITER_SEQ_BITS) - 1;

// -------- Size header --------

/// Declared total image size (u64) that precedes the first record.
pub const SIZE_HEADER_LEN: usize = 8;

// -------- Container header (libvirt save image) --------
//
// Layout:
// [magic 16][version u32][descriptor_len u32][was_running u32][compression u32][reserved u32 x 15]
// затем descriptor_len байт XML-дескриптора, последний байт — NUL.

pub const MAGIC_LEN: usize = 16;

/// Written by libvirt once the save has completed.
pub const MAGIC_FINAL: &[u8; MAGIC_LEN] = b"LibvirtQemudSave";

/// Written while the save is still in progress (libvirt swaps it on completion).
pub const MAGIC_PARTIAL: &[u8; MAGIC_LEN] = b"LibvirtQemudPart";

pub const CONTAINER_VERSION: u32 = 2;
pub const CONTAINER_RESERVED_WORDS: usize = 15;

pub const HDR_OFF_MAGIC: usize = 0;
pub const HDR_OFF_VERSION: usize = 16;
pub const HDR_OFF_DESCRIPTOR_LEN: usize = 20;
pub const HDR_OFF_WAS_RUNNING: usize = 24;
pub const HDR_OFF_COMPRESSION: usize = 28;
pub const HDR_OFF_RESERVED: usize = 32;

/// Fixed prefix length: 16 + 4 * (4 + 15) = 92.
pub const CONTAINER_FIXED_LEN: usize = HDR_OFF_RESERVED + 4 * CONTAINER_RESERVED_WORDS;

/// Expected prefix + descriptor length; anything else is only warned about.
pub const CONTAINER_ALIGNED_LEN: usize = 2 * PAGE_SIZE;

pub const COMPRESS_RAW: u32 = 0;
pub const COMPRESS_XZ: u32 = 3;
pub const COMPRESS_CLOUDLET: u32 = 4;

// -------- Producer defaults --------

/// Default read size of the producer thread (10 pages, as the capture scripts read).
pub const DEFAULT_READ_CHUNK: usize = 10 * PAGE_SIZE;

/// Default hand-off queue capacity in deliveries.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
