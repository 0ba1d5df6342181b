//! reconstruct/apply — Reconstructor: запись страниц в образ + обновление SnapshotIndex.
//!
//! Правила:
//! - Страница пишется по page_offset (+ base, если в образе сохранён container header)
//!   независимо от порядка прихода. Последняя пришедшая запись побеждает.
//! - Ошибка decode заголовка — фатальна (фрейминг потока больше не доверенный).
//! - Ошибка позиционной записи — фатальна, без повторов.
//! - Дубликат в том же поколении — аномалия (warn), не ошибка.
//!   Дубликат с другим поколением — обычная перезапись между итерациями.

use log::{debug, info, warn};

use crate::chunk::ChunkHeader;
use crate::config::DuplicatePolicy;
use crate::error::{Result, SnapError};
use crate::image::PageSink;
use crate::metrics::{
    record_gen_regression, record_overwrite, record_page_written, record_same_gen_duplicate,
};
use crate::stream::RawRecord;

use super::index::{Anomaly, AnomalyKind, Observation, SnapshotIndex};

pub struct Reconstructor<'s, S: PageSink + ?Sized> {
    sink: &'s mut S,
    index: SnapshotIndex,
    policy: DuplicatePolicy,
    base: u64,
    current_seq: Option<u16>,
}

impl<'s, S: PageSink + ?Sized> Reconstructor<'s, S> {
    /// `base` — image offset of page offset 0.
    pub fn new(sink: &'s mut S, policy: DuplicatePolicy, base: u64) -> Self {
        Self {
            sink,
            index: SnapshotIndex::new(),
            policy,
            base,
            current_seq: None,
        }
    }

    /// Decode the record header and apply its page.
    pub fn apply(&mut self, rec: &RawRecord) -> Result<(ChunkHeader, Observation)> {
        let hdr = ChunkHeader::decode(rec.header_bytes())?;
        let obs = self.apply_page(hdr, rec.payload())?;
        Ok((hdr, obs))
    }

    /// Apply an already decoded page.
    pub fn apply_page(&mut self, hdr: ChunkHeader, payload: &[u8]) -> Result<Observation> {
        let seq = hdr.iteration_seq();
        if self.current_seq != Some(seq) {
            match self.current_seq {
                None => info!("iteration {}: first record", seq),
                Some(prev) => info!("iteration {}: start (previous {})", seq, prev),
            }
            self.current_seq = Some(seq);
        }

        let offset = self.base + hdr.page_offset();
        self.sink
            .write_at(offset, payload)
            .map_err(|e| SnapError::Write { offset, source: e })?;
        record_page_written();

        let page_index = hdr.page_index();
        let obs = self.index.observe(page_index, seq);
        match obs {
            Observation::First => {
                debug!("page {} (iter {}) written at {}", page_index, seq, offset);
            }
            Observation::Overwrite { previous } => {
                record_overwrite();
                debug!(
                    "page {} overwritten by iteration {} (was {})",
                    page_index, seq, previous
                );
                self.strict_anomaly(page_index, seq, previous);
            }
            Observation::SameGeneration => {
                record_same_gen_duplicate();
                warn!(
                    "duplicated page {} (offset {}) within iteration {}",
                    page_index,
                    hdr.page_offset(),
                    seq
                );
                let kind = match self.policy {
                    DuplicatePolicy::Strict => AnomalyKind::Duplicate,
                    DuplicatePolicy::GenerationAware => AnomalyKind::SameGenerationDuplicate,
                };
                self.index.push_anomaly(Anomaly {
                    page_index,
                    iteration_seq: seq,
                    previous_seq: seq,
                    kind,
                });
            }
            Observation::Regression { previous } => {
                record_overwrite();
                record_gen_regression();
                // Порядок прихода всё равно побеждает — старые данные лягут поверх новых.
                warn!(
                    "page {} rewritten by older iteration {} after iteration {}",
                    page_index, seq, previous
                );
                let kind = match self.policy {
                    DuplicatePolicy::Strict => AnomalyKind::Duplicate,
                    DuplicatePolicy::GenerationAware => AnomalyKind::GenerationRegression,
                };
                self.index.push_anomaly(Anomaly {
                    page_index,
                    iteration_seq: seq,
                    previous_seq: previous,
                    kind,
                });
            }
        }
        Ok(obs)
    }

    fn strict_anomaly(&mut self, page_index: u64, seq: u16, previous: u16) {
        if self.policy == DuplicatePolicy::Strict {
            warn!(
                "duplicated page {} (iteration {} after {}) under strict policy",
                page_index, seq, previous
            );
            self.index.push_anomaly(Anomaly {
                page_index,
                iteration_seq: seq,
                previous_seq: previous,
                kind: AnomalyKind::Duplicate,
            });
        }
    }

    pub fn index(&self) -> &SnapshotIndex {
        &self.index
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Flush the sink and hand over the finalized index.
    pub fn finish(self) -> Result<SnapshotIndex> {
        self.sink.flush_image().map_err(|e| SnapError::Write {
            offset: self.base,
            source: e,
        })?;
        Ok(self.index)
    }
}
