//! Типизированные ошибки декодера.
//!
//! FormatError (`Format`, `Truncated`) и ошибки записи в образ (`Write`) фатальны:
//! поток без доверенного фрейминга пересинхронизировать нельзя.
//! Находки валидатора (пропуски, дубликаты) сюда не попадают — это payload отчёта.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Фаза обработки, в которой возникла ошибка формата.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ContainerHeader,
    SizeHeader,
    Records,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::ContainerHeader => "container header",
            Phase::SizeHeader => "size header",
            Phase::Records => "page records",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SnapError {
    /// Malformed or unsupported input.
    #[error("format error in {phase}: {msg}")]
    Format { phase: Phase, msg: String },

    /// End-of-stream arrived in the middle of a record.
    #[error("truncated final record: {pending} of {record} byte(s) present at end of stream")]
    Truncated { pending: usize, record: usize },

    /// A value does not fit its on-wire field (encode side).
    #[error("invalid field: {0}")]
    Field(String),

    /// Reading the source failed.
    #[error("source read failed: {0}")]
    Read(#[source] io::Error),

    /// Positioned write into the output image failed.
    #[error("image write failed at offset {offset}: {source}")]
    Write {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Output image is held by another session.
    #[error("output image {} is locked by another session", .0.display())]
    Locked(PathBuf),
}

impl SnapError {
    pub(crate) fn format(phase: Phase, msg: impl Into<String>) -> Self {
        SnapError::Format {
            phase,
            msg: msg.into(),
        }
    }

    /// True for FormatError-class failures (bad header, bad framing, truncation).
    pub fn is_format(&self) -> bool {
        matches!(self, SnapError::Format { .. } | SnapError::Truncated { .. })
    }

    /// Phase of a format failure; truncation always belongs to the record stream.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            SnapError::Format { phase, .. } => Some(*phase),
            SnapError::Truncated { .. } => Some(Phase::Records),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapError>;
