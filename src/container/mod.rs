//! container — разбор префикса потока: опциональный container header + size header.
//!
//! - header.rs — ContainerHeader / ContainerHeaderParser (две магии, версия, reserved, NUL).
//! - size.rs   — DeclaredSize (u64, кратно PAGE_SIZE).

pub mod header;
pub mod size;

pub use header::{CompressionMode, ContainerHeader, ContainerHeaderParser, MagicTag, SaveState};
pub use size::{parse_size_header, read_size_header, DeclaredSize};
