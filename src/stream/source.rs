//! stream/source — источники байтов для декодера.
//!
//! - ByteSource: последовательные поставки произвольной длины + явный end-of-stream (Ok(None)).
//! - ReaderSource: синхронное чтение из любого `Read` (файл, pipe, Cursor).
//! - VecSource: заранее нарезанные поставки (тесты, replay).
//! - spawn_producer: отдельный поток-производитель, читающий источник в FIFO-очередь
//!   (mpsc; bounded = backpressure, unbounded = без ограничения).
//! - wait_for_source: ожидание появления именованного pipe/файла до первого чтения.
//!
//! Удаление pipe производителем видно потребителю как обычный EOF.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Result, SnapError};
use crate::metrics::record_delivery;

pub trait ByteSource {
    /// Next delivery; Ok(None) is the end-of-stream signal. Empty deliveries are allowed.
    fn next_delivery(&mut self) -> Result<Option<Vec<u8>>>;
}

// -------------------- ReaderSource --------------------

pub struct ReaderSource<R: Read> {
    inner: R,
    chunk: usize,
    done: bool,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(inner: R, chunk: usize) -> Self {
        Self {
            inner,
            chunk: chunk.max(1),
            done: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    fn next_delivery(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.chunk];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    return Ok(None);
                }
                Ok(n) => {
                    buf.truncate(n);
                    record_delivery(n);
                    return Ok(Some(buf));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SnapError::Read(e)),
            }
        }
    }
}

// -------------------- VecSource --------------------

/// Pre-split deliveries, replayed in order.
#[derive(Debug, Default)]
pub struct VecSource {
    parts: VecDeque<Vec<u8>>,
}

impl VecSource {
    pub fn new(parts: Vec<Vec<u8>>) -> Self {
        Self {
            parts: parts.into(),
        }
    }

    /// Split `bytes` into deliveries of `chunk` bytes (last one may be shorter).
    pub fn chunked(bytes: &[u8], chunk: usize) -> Self {
        Self::new(bytes.chunks(chunk.max(1)).map(|c| c.to_vec()).collect())
    }

    /// Split `bytes` at the given sizes, cycling through them.
    pub fn with_sizes(bytes: &[u8], sizes: &[usize]) -> Self {
        let mut parts = Vec::new();
        let mut pos = 0usize;
        let mut i = 0usize;
        while pos < bytes.len() {
            let n = sizes.get(i % sizes.len().max(1)).copied().unwrap_or(bytes.len()).max(1);
            let end = (pos + n).min(bytes.len());
            parts.push(bytes[pos..end].to_vec());
            pos = end;
            i += 1;
        }
        Self::new(parts)
    }
}

impl ByteSource for VecSource {
    fn next_delivery(&mut self) -> Result<Option<Vec<u8>>> {
        let next = self.parts.pop_front();
        if let Some(p) = &next {
            record_delivery(p.len());
        }
        Ok(next)
    }
}

// -------------------- Producer thread + FIFO --------------------

/// Сообщение очереди производитель -> потребитель.
enum Delivery {
    Bytes(Vec<u8>),
    Failed(io::Error),
    End,
}

enum QueueTx {
    Bounded(SyncSender<Delivery>),
    Unbounded(Sender<Delivery>),
}

impl QueueTx {
    /// false — потребитель ушёл, дальше читать незачем.
    fn send(&self, d: Delivery) -> bool {
        match self {
            QueueTx::Bounded(tx) => tx.send(d).is_ok(),
            QueueTx::Unbounded(tx) => tx.send(d).is_ok(),
        }
    }
}

/// Consumer end of the hand-off queue.
pub struct ChannelSource {
    rx: Receiver<Delivery>,
    done: bool,
}

impl ByteSource for ChannelSource {
    fn next_delivery(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv() {
            Ok(Delivery::Bytes(b)) => {
                record_delivery(b.len());
                Ok(Some(b))
            }
            Ok(Delivery::End) => {
                self.done = true;
                Ok(None)
            }
            Ok(Delivery::Failed(e)) => {
                self.done = true;
                Err(SnapError::Read(e))
            }
            Err(_) => {
                self.done = true;
                Err(SnapError::Read(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "producer exited without end-of-stream",
                )))
            }
        }
    }
}

/// Spawn the producer thread: reads `reader` in `chunk`-sized reads and enqueues every
/// non-empty read. `capacity = None` gives an unbounded queue (no backpressure).
pub fn spawn_producer<R>(
    mut reader: R,
    chunk: usize,
    capacity: Option<usize>,
) -> (ChannelSource, JoinHandle<u64>)
where
    R: Read + Send + 'static,
{
    let (tx, rx) = match capacity {
        Some(cap) => {
            let (tx, rx) = mpsc::sync_channel(cap);
            (QueueTx::Bounded(tx), rx)
        }
        None => {
            let (tx, rx) = mpsc::channel();
            (QueueTx::Unbounded(tx), rx)
        }
    };
    let chunk = chunk.max(1);

    let handle = thread::spawn(move || {
        let mut total = 0u64;
        loop {
            let mut buf = vec![0u8; chunk];
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("producer: end of stream after {} byte(s)", total);
                    let _ = tx.send(Delivery::End);
                    break;
                }
                Ok(n) => {
                    buf.truncate(n);
                    total += n as u64;
                    if !tx.send(Delivery::Bytes(buf)) {
                        debug!("producer: consumer gone, stop after {} byte(s)", total);
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("producer: read failed after {} byte(s): {}", total, e);
                    let _ = tx.send(Delivery::Failed(e));
                    break;
                }
            }
        }
        total
    });

    (ChannelSource { rx, done: false }, handle)
}

// -------------------- Wait for source --------------------

/// Poll until `path` exists (e.g. a named pipe created by the hypervisor side).
pub fn wait_for_source(path: &Path, attempts: u32, interval: Duration) -> Result<()> {
    for attempt in 0..attempts.max(1) {
        if path.exists() {
            if attempt > 0 {
                debug!("source {} appeared after {} attempt(s)", path.display(), attempt);
            }
            return Ok(());
        }
        if attempt == 0 {
            info!("waiting for {}", path.display());
        }
        thread::sleep(interval);
    }
    if path.exists() {
        return Ok(());
    }
    Err(SnapError::Read(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} did not appear after {} attempt(s)", path.display(), attempts),
    )))
}
