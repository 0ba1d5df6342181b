//! container/header — внешний заголовок save-образа (libvirt) перед потоком памяти.
//!
//! Layout (native-endian, 92 байта + дескриптор):
//!   [magic 16][version u32=2][descriptor_len u32][was_running u32][compression u32][reserved u32 x15]
//!   [descriptor: descriptor_len байт XML, последний байт — NUL]
//!
//! Магия бывает двух видов: "in-progress" (пока save идёт) и "final" (после завершения).
//! Оба варианта равноправны. Набор допустимых тегов задаётся парсеру снаружи.
//!
//! Длина prefix+descriptor != 8192 — только предупреждение, не ошибка.

use std::io::{self, Read};

use byteorder::{ByteOrder, NativeEndian};
use log::{debug, warn};

use crate::consts::{
    COMPRESS_CLOUDLET, COMPRESS_RAW, COMPRESS_XZ, CONTAINER_ALIGNED_LEN, CONTAINER_FIXED_LEN,
    CONTAINER_RESERVED_WORDS, CONTAINER_VERSION, HDR_OFF_COMPRESSION, HDR_OFF_DESCRIPTOR_LEN,
    HDR_OFF_MAGIC, HDR_OFF_RESERVED, HDR_OFF_VERSION, HDR_OFF_WAS_RUNNING, MAGIC_FINAL, MAGIC_LEN,
    MAGIC_PARTIAL,
};
use crate::error::{Phase, Result, SnapError};
use crate::util::trim_trailing_nul;

/// Which stage of the save a magic tag denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    Final,
    InProgress,
}

/// One accepted magic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagicTag {
    pub tag: [u8; MAGIC_LEN],
    pub state: SaveState,
}

impl MagicTag {
    pub const fn new(tag: [u8; MAGIC_LEN], state: SaveState) -> Self {
        Self { tag, state }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    Raw,
    Xz,
    Cloudlet,
    Unknown(u32),
}

impl CompressionMode {
    pub fn from_code(code: u32) -> Self {
        match code {
            COMPRESS_RAW => CompressionMode::Raw,
            COMPRESS_XZ => CompressionMode::Xz,
            COMPRESS_CLOUDLET => CompressionMode::Cloudlet,
            other => CompressionMode::Unknown(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            CompressionMode::Raw => COMPRESS_RAW,
            CompressionMode::Xz => COMPRESS_XZ,
            CompressionMode::Cloudlet => COMPRESS_CLOUDLET,
            CompressionMode::Unknown(c) => *c,
        }
    }

    pub fn name(&self) -> String {
        match self {
            CompressionMode::Raw => "raw".to_string(),
            CompressionMode::Xz => "xz".to_string(),
            CompressionMode::Cloudlet => "cloudlet".to_string(),
            CompressionMode::Unknown(c) => format!("unknown({})", c),
        }
    }
}

/// Parsed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic: [u8; MAGIC_LEN],
    pub state: SaveState,
    pub version: u32,
    pub was_running: bool,
    pub compression: CompressionMode,
    /// Descriptor bytes as stored, including the terminating NUL and any NUL padding.
    descriptor_raw: Vec<u8>,
}

impl ContainerHeader {
    /// Build a header around a descriptor text (a terminating NUL is appended).
    pub fn new(
        tag: MagicTag,
        descriptor: &str,
        was_running: bool,
        compression: CompressionMode,
    ) -> Self {
        let mut descriptor_raw = descriptor.as_bytes().to_vec();
        descriptor_raw.push(0);
        Self {
            magic: tag.tag,
            state: tag.state,
            version: CONTAINER_VERSION,
            was_running,
            compression,
            descriptor_raw,
        }
    }

    pub fn descriptor_len(&self) -> u32 {
        self.descriptor_raw.len() as u32
    }

    /// Descriptor text without the terminating NUL and trailing padding.
    pub fn descriptor(&self) -> String {
        String::from_utf8_lossy(trim_trailing_nul(&self.descriptor_raw)).into_owned()
    }

    pub fn descriptor_bytes(&self) -> &[u8] {
        &self.descriptor_raw
    }

    /// Byte offset where the size header (and then the page records) starts.
    pub fn payload_offset(&self) -> u64 {
        (CONTAINER_FIXED_LEN + self.descriptor_raw.len()) as u64
    }

    pub fn is_aligned(&self) -> bool {
        self.payload_offset() == CONTAINER_ALIGNED_LEN as u64
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; CONTAINER_FIXED_LEN];
        out[HDR_OFF_MAGIC..HDR_OFF_MAGIC + MAGIC_LEN].copy_from_slice(&self.magic);
        NativeEndian::write_u32(&mut out[HDR_OFF_VERSION..HDR_OFF_VERSION + 4], self.version);
        NativeEndian::write_u32(
            &mut out[HDR_OFF_DESCRIPTOR_LEN..HDR_OFF_DESCRIPTOR_LEN + 4],
            self.descriptor_len(),
        );
        NativeEndian::write_u32(
            &mut out[HDR_OFF_WAS_RUNNING..HDR_OFF_WAS_RUNNING + 4],
            self.was_running as u32,
        );
        NativeEndian::write_u32(
            &mut out[HDR_OFF_COMPRESSION..HDR_OFF_COMPRESSION + 4],
            self.compression.code(),
        );
        // reserved words уже нули
        out.extend_from_slice(&self.descriptor_raw);
        out
    }

    /// Same header stamped with the final-save magic, as written into a restorable image.
    pub fn finalized(&self) -> Self {
        let mut h = self.clone();
        h.magic = *MAGIC_FINAL;
        h.state = SaveState::Final;
        h
    }

    /// Encode with the descriptor NUL-padded so the whole header is exactly `boundary` bytes.
    pub fn encode_aligned(&self, boundary: usize) -> Result<Vec<u8>> {
        let current = self.payload_offset() as usize;
        if current > boundary {
            return Err(SnapError::Field(format!(
                "container header is {} bytes, larger than the {}-byte alignment",
                current, boundary
            )));
        }
        let mut padded = self.clone();
        padded.descriptor_raw.resize(boundary - CONTAINER_FIXED_LEN, 0);
        Ok(padded.encode())
    }
}

/// Fixed-prefix fields, validated, before the descriptor is available.
struct FixedPrefix {
    tag: MagicTag,
    version: u32,
    descriptor_len: usize,
    was_running: bool,
    compression: CompressionMode,
}

/// Container header parser over an in-memory prefix or any `Read` source.
#[derive(Debug, Clone)]
pub struct ContainerHeaderParser {
    tags: Vec<MagicTag>,
}

impl Default for ContainerHeaderParser {
    fn default() -> Self {
        Self::libvirt()
    }
}

impl ContainerHeaderParser {
    /// Parser accepting exactly the given tags.
    pub fn new(tags: Vec<MagicTag>) -> Self {
        Self { tags }
    }

    /// Final and in-progress libvirt save tags.
    pub fn libvirt() -> Self {
        Self::new(vec![
            MagicTag::new(*MAGIC_FINAL, SaveState::Final),
            MagicTag::new(*MAGIC_PARTIAL, SaveState::InProgress),
        ])
    }

    pub fn with_tag(mut self, tag: MagicTag) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn tags(&self) -> &[MagicTag] {
        &self.tags
    }

    /// Does `prefix` start with one of the accepted tags? Needs at least 16 bytes.
    pub fn recognizes(&self, prefix: &[u8]) -> bool {
        prefix.len() >= MAGIC_LEN && self.match_tag(&prefix[..MAGIC_LEN]).is_some()
    }

    fn match_tag(&self, magic: &[u8]) -> Option<MagicTag> {
        self.tags.iter().copied().find(|t| &t.tag[..] == magic)
    }

    /// Parse from the start of `buf`.
    ///
    /// Returns:
    /// - Ok(Some(header)) — header complete; `header.payload_offset()` bytes are consumed;
    /// - Ok(None) — buffer too short so far (fixed prefix, if present, is already validated);
    /// - Err(Format) — invalid header.
    pub fn parse_prefix(&self, buf: &[u8]) -> Result<Option<ContainerHeader>> {
        if buf.len() < CONTAINER_FIXED_LEN {
            return Ok(None);
        }
        let fixed = self.parse_fixed(&buf[..CONTAINER_FIXED_LEN])?;
        let end = CONTAINER_FIXED_LEN + fixed.descriptor_len;
        if buf.len() < end {
            return Ok(None);
        }
        finish(fixed, buf[CONTAINER_FIXED_LEN..end].to_vec()).map(Some)
    }

    /// Parse from a reader positioned at the header start; leaves it positioned at the size header.
    pub fn read_from<R: Read>(&self, r: &mut R) -> Result<ContainerHeader> {
        let mut fixed_buf = [0u8; CONTAINER_FIXED_LEN];
        read_exact_header(r, &mut fixed_buf, "fixed prefix")?;
        let fixed = self.parse_fixed(&fixed_buf)?;
        // descriptor_len не доверенный: читаем через take, без предварительной аллокации
        let mut descriptor = Vec::new();
        r.by_ref()
            .take(fixed.descriptor_len as u64)
            .read_to_end(&mut descriptor)
            .map_err(SnapError::Read)?;
        if descriptor.len() < fixed.descriptor_len {
            return Err(SnapError::format(
                Phase::ContainerHeader,
                format!(
                    "stream ended inside the descriptor ({} of {} bytes)",
                    descriptor.len(),
                    fixed.descriptor_len
                ),
            ));
        }
        finish(fixed, descriptor)
    }

    fn parse_fixed(&self, b: &[u8]) -> Result<FixedPrefix> {
        let magic = &b[HDR_OFF_MAGIC..HDR_OFF_MAGIC + MAGIC_LEN];
        let tag = self.match_tag(magic).ok_or_else(|| {
            SnapError::format(
                Phase::ContainerHeader,
                format!(
                    "invalid magic {:?}",
                    String::from_utf8_lossy(magic)
                ),
            )
        })?;

        let version = NativeEndian::read_u32(&b[HDR_OFF_VERSION..HDR_OFF_VERSION + 4]);
        if version != CONTAINER_VERSION {
            return Err(SnapError::format(
                Phase::ContainerHeader,
                format!(
                    "unsupported version {} (expected {})",
                    version, CONTAINER_VERSION
                ),
            ));
        }

        for i in 0..CONTAINER_RESERVED_WORDS {
            let off = HDR_OFF_RESERVED + 4 * i;
            let w = NativeEndian::read_u32(&b[off..off + 4]);
            if w != 0 {
                return Err(SnapError::format(
                    Phase::ContainerHeader,
                    format!("reserved word #{} is {:#x}, must be 0", i, w),
                ));
            }
        }

        Ok(FixedPrefix {
            tag,
            version,
            descriptor_len: NativeEndian::read_u32(
                &b[HDR_OFF_DESCRIPTOR_LEN..HDR_OFF_DESCRIPTOR_LEN + 4],
            ) as usize,
            was_running: NativeEndian::read_u32(&b[HDR_OFF_WAS_RUNNING..HDR_OFF_WAS_RUNNING + 4])
                != 0,
            compression: CompressionMode::from_code(NativeEndian::read_u32(
                &b[HDR_OFF_COMPRESSION..HDR_OFF_COMPRESSION + 4],
            )),
        })
    }
}

fn finish(fixed: FixedPrefix, descriptor_raw: Vec<u8>) -> Result<ContainerHeader> {
    if descriptor_raw.last() != Some(&0) {
        return Err(SnapError::format(
            Phase::ContainerHeader,
            "missing NUL byte after descriptor",
        ));
    }

    let hdr = ContainerHeader {
        magic: fixed.tag.tag,
        state: fixed.tag.state,
        version: fixed.version,
        was_running: fixed.was_running,
        compression: fixed.compression,
        descriptor_raw,
    };

    if !hdr.is_aligned() {
        warn!(
            "container header length {} is not aligned with {} bytes",
            hdr.payload_offset(),
            CONTAINER_ALIGNED_LEN
        );
    }
    if hdr.compression != CompressionMode::Raw {
        warn!(
            "container compression mode {} is not supported, body is decoded as raw",
            hdr.compression.name()
        );
    }
    debug!(
        "container header: state={:?}, descriptor_len={}, was_running={}, payload_offset={}",
        hdr.state,
        hdr.descriptor_len(),
        hdr.was_running,
        hdr.payload_offset()
    );
    Ok(hdr)
}

fn read_exact_header<R: Read>(r: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    match r.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(SnapError::format(
            Phase::ContainerHeader,
            format!("stream ended inside the {} ({} bytes needed)", what, buf.len()),
        )),
        Err(e) => Err(SnapError::Read(e)),
    }
}
