//! session — конечный автомат всего декодера.
//!
//!   Init -> ReadingContainerHeader -> ReadingSizeHeader -> StreamingRecords -> Validating -> Done
//!   (любая FormatError / ошибка записи образа) -> Failed
//!
//! Done достигается и при pass, и при fail вердикте — вердикт лежит в отчёте.
//! Всё состояние декодера принадлежит одному потребителю (этой сессии); производитель
//! живёт отдельно и общается только через ByteSource.

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{ContainerMode, ImageLayout, SnapConfig};
use crate::consts::{CONTAINER_ALIGNED_LEN, MAGIC_LEN, SIZE_HEADER_LEN};
use crate::container::size::short_size_header;
use crate::container::{
    parse_size_header, ContainerHeader, ContainerHeaderParser, DeclaredSize, SaveState,
};
use crate::error::{Phase, Result, SnapError};
use crate::image::PageSink;
use crate::metrics::{record_session_aborted, record_session_failed, record_session_passed};
use crate::reconstruct::{Reconstructor, SnapshotIndex};
use crate::stream::{ByteSource, StreamFramer};
use crate::validate::{validate, ValidationReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    ReadingContainerHeader,
    ReadingSizeHeader,
    StreamingRecords,
    Validating,
    Done,
    Failed,
}

/// Everything a finished session knows.
#[derive(Debug)]
pub struct SessionOutcome {
    pub header: Option<ContainerHeader>,
    pub declared_size: DeclaredSize,
    /// Image offset of page offset 0 (non-zero when the container header is kept).
    pub base_offset: u64,
    pub records: u64,
    pub bytes_in: u64,
    pub index: SnapshotIndex,
    pub report: ValidationReport,
}

pub struct Session {
    cfg: SnapConfig,
    parser: ContainerHeaderParser,
    state: SessionState,
    failed_in: Option<SessionState>,
}

impl Session {
    pub fn new(cfg: SnapConfig) -> Self {
        let parser = cfg.header_parser();
        Self {
            cfg,
            parser,
            state: SessionState::Init,
            failed_in: None,
        }
    }

    pub fn config(&self) -> &SnapConfig {
        &self.cfg
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// State the session was in when it transitioned to Failed.
    pub fn failed_in(&self) -> Option<SessionState> {
        self.failed_in
    }

    /// Drive the whole pipeline: headers, records, validation.
    pub fn run<B, S>(&mut self, source: &mut B, sink: &mut S) -> Result<SessionOutcome>
    where
        B: ByteSource + ?Sized,
        S: PageSink + ?Sized,
    {
        if self.state != SessionState::Init {
            return Err(SnapError::format(
                Phase::ContainerHeader,
                format!("session already used (state {:?})", self.state),
            ));
        }
        match self.run_inner(source, sink) {
            Ok(outcome) => {
                self.state = SessionState::Done;
                if outcome.report.passed() {
                    record_session_passed();
                } else {
                    record_session_failed();
                }
                Ok(outcome)
            }
            Err(e) => {
                warn!("session failed while {:?}: {}", self.state, e);
                self.failed_in = Some(self.state);
                self.state = SessionState::Failed;
                record_session_aborted();
                Err(e)
            }
        }
    }

    fn run_inner<B, S>(&mut self, source: &mut B, sink: &mut S) -> Result<SessionOutcome>
    where
        B: ByteSource + ?Sized,
        S: PageSink + ?Sized,
    {
        let mut buf: Vec<u8> = Vec::new();
        let mut eos = false;

        // ----- container header -----
        self.state = SessionState::ReadingContainerHeader;
        let header = self.read_container_header(source, &mut buf, &mut eos)?;

        // ----- size header -----
        self.state = SessionState::ReadingSizeHeader;
        let declared = loop {
            if let Some(s) = parse_size_header(&buf)? {
                buf.drain(..SIZE_HEADER_LEN);
                break s;
            }
            if eos {
                return Err(short_size_header(buf.len()));
            }
            eos = !pull(source, &mut buf)?;
        };
        info!(
            "declared image size: {} bytes ({} pages)",
            declared.bytes(),
            declared.page_count()
        );

        let base = self.prepare_image(sink, header.as_ref(), declared)?;

        // ----- records -----
        self.state = SessionState::StreamingRecords;
        let mut framer = StreamFramer::new();
        let mut rec = Reconstructor::new(sink, self.cfg.duplicate_policy, base);
        let mut applied = 0u64;

        // хвост, прочитанный вместе с заголовками, — первая поставка для framer
        for r in framer.feed(&buf) {
            rec.apply(&r).map_err(|e| at_record(e, applied))?;
            applied += 1;
        }
        drop(buf);

        while !eos {
            match source.next_delivery()? {
                Some(d) => {
                    for r in framer.feed(&d) {
                        rec.apply(&r).map_err(|e| at_record(e, applied))?;
                        applied += 1;
                    }
                }
                None => eos = true,
            }
        }

        let bytes_in = framer.bytes_in();
        let records = framer.finish()?;
        let index = rec.finish()?;
        debug!(
            "stream done: {} record(s), {} payload byte(s) after headers",
            records, bytes_in
        );

        // ----- validation -----
        self.state = SessionState::Validating;
        let report = validate(&index, declared, self.cfg.duplicate_policy);

        Ok(SessionOutcome {
            header,
            declared_size: declared,
            base_offset: base,
            records,
            bytes_in,
            index,
            report,
        })
    }

    fn read_container_header<B>(
        &self,
        source: &mut B,
        buf: &mut Vec<u8>,
        eos: &mut bool,
    ) -> Result<Option<ContainerHeader>>
    where
        B: ByteSource + ?Sized,
    {
        let required = match self.cfg.container {
            ContainerMode::Absent => return Ok(None),
            ContainerMode::Auto => false,
            ContainerMode::Required => true,
        };

        loop {
            if buf.len() >= MAGIC_LEN && !self.parser.recognizes(&buf[..]) {
                if required {
                    return Err(SnapError::format(
                        Phase::ContainerHeader,
                        format!(
                            "invalid magic {:?}",
                            String::from_utf8_lossy(&buf[..MAGIC_LEN])
                        ),
                    ));
                }
                debug!("no container header, stream starts with the size header");
                return Ok(None);
            }
            if let Some(h) = self.parser.parse_prefix(&buf[..])? {
                buf.drain(..h.payload_offset() as usize);
                info!(
                    "container header: {:?} save, descriptor {} bytes, payload at {}",
                    h.state,
                    h.descriptor_len(),
                    h.payload_offset()
                );
                return Ok(Some(h));
            }
            if *eos {
                if !required && buf.len() < MAGIC_LEN {
                    // слишком коротко даже для магии — пусть разбирается size header
                    return Ok(None);
                }
                return Err(SnapError::format(
                    Phase::ContainerHeader,
                    format!("stream ended inside the container header ({} bytes)", buf.len()),
                ));
            }
            *eos = !pull(source, buf)?;
        }
    }

    /// Size the sink and, for `WithHeader`, write the aligned container header. Returns the page base.
    fn prepare_image<S>(
        &self,
        sink: &mut S,
        header: Option<&ContainerHeader>,
        declared: DeclaredSize,
    ) -> Result<u64>
    where
        S: PageSink + ?Sized,
    {
        let base = match (self.cfg.layout, header) {
            (ImageLayout::WithHeader, Some(h)) => {
                if h.state != SaveState::Final {
                    info!("container header: in-progress magic rewritten as final in the image");
                }
                let bytes = h.finalized().encode_aligned(CONTAINER_ALIGNED_LEN)?;
                sink.write_at(0, &bytes)
                    .map_err(|e| SnapError::Write { offset: 0, source: e })?;
                CONTAINER_ALIGNED_LEN as u64
            }
            (ImageLayout::WithHeader, None) => {
                warn!("no container header in stream, writing a flat image");
                0
            }
            (ImageLayout::Flat, _) => 0,
        };
        sink.set_logical_size(base + declared.bytes())
            .map_err(|e| SnapError::Write {
                offset: base + declared.bytes(),
                source: e,
            })?;
        Ok(base)
    }
}

fn pull<B: ByteSource + ?Sized>(source: &mut B, buf: &mut Vec<u8>) -> Result<bool> {
    match source.next_delivery()? {
        Some(d) => {
            buf.extend_from_slice(&d);
            Ok(true)
        }
        None => Ok(false),
    }
}

fn at_record(e: SnapError, n: u64) -> SnapError {
    match e {
        SnapError::Format { phase, msg } => SnapError::Format {
            phase,
            msg: format!("record #{}: {}", n, msg),
        },
        other => other,
    }
}
