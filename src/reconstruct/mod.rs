//! reconstruct — применение записей к разреженному образу.
//!
//! - index.rs — SnapshotIndex (page -> последнее поколение, счётчики, аномалии).
//! - apply.rs — Reconstructor (decode заголовка, позиционная запись, политика дубликатов).

pub mod apply;
pub mod index;

pub use apply::Reconstructor;
pub use index::{Anomaly, AnomalyKind, Observation, SnapshotIndex};
