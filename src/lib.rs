#![allow(non_snake_case)]

// Формат и ошибки
pub mod consts;
pub mod error;
pub mod config;
pub mod metrics;

// Декодер: leaves first
pub mod chunk;      // src/chunk.rs — ChunkHeader (bit-packed u64)
pub mod container;  // src/container/{mod,header,size}.rs
pub mod stream;     // src/stream/{mod,framer,source}.rs
pub mod image;      // src/image.rs — PageSink, FileImage, MemImage, NullImage
pub mod reconstruct; // src/reconstruct/{mod,index,apply}.rs
pub mod validate;   // src/validate.rs
pub mod session;    // src/session.rs — state machine

// CLI (используется бинарём memsnap)
pub mod cli;

// Утилиты (env_flag, trim_trailing_nul, ...)
pub mod util; // src/util/mod.rs

// Удобные реэкспорты
pub use chunk::ChunkHeader;
pub use config::{ContainerMode, DuplicatePolicy, ImageLayout, SessionBuilder, SnapConfig};
pub use container::{
    CompressionMode, ContainerHeader, ContainerHeaderParser, DeclaredSize, MagicTag, SaveState,
};
pub use error::{Phase, Result, SnapError};
pub use image::{FileImage, MemImage, NullImage, PageSink};
pub use reconstruct::{Reconstructor, SnapshotIndex};
pub use session::{Session, SessionOutcome, SessionState};
pub use stream::{ByteSource, RawRecord, StreamFramer};
pub use validate::{validate, ValidationReport, Verdict};
