//! stream/framer — нарезка невыровненного потока байтов на записи по RECORD_SIZE (8 + 4096).
//!
//! Поставки (deliveries) приходят произвольной длины. Framer держит carry-буфер
//! (< RECORD_SIZE байт) между поставками и выдаёт полные записи строго в порядке прихода.
//!
//! Использование:
//!   let mut framer = StreamFramer::new();
//!   for delivery in source {
//!       for rec in framer.feed(&delivery) { /* обработка rec */ }
//!   }
//!   framer.finish()?; // непустой carry => Truncated

use std::collections::VecDeque;

use log::{debug, warn};

use crate::consts::{CHUNK_HEADER_SIZE, RECORD_SIZE};
use crate::error::{Result, SnapError};
use crate::metrics::record_framed;

/// One complete record: [chunk header 8][page 4096].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    bytes: Vec<u8>,
}

impl RawRecord {
    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), RECORD_SIZE);
        Self { bytes }
    }

    pub fn header_bytes(&self) -> &[u8] {
        &self.bytes[..CHUNK_HEADER_SIZE]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[CHUNK_HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, Default)]
pub struct StreamFramer {
    carry: Vec<u8>,
    /// Records already cut but not yet handed out (iterator dropped early).
    ready: VecDeque<RawRecord>,
    records: u64,
    bytes_in: u64,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            carry: Vec::with_capacity(RECORD_SIZE),
            ready: VecDeque::new(),
            records: 0,
            bytes_in: 0,
        }
    }

    /// Bytes currently held back waiting for the rest of a record. Always < RECORD_SIZE.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Complete records cut but not yet returned; the next `feed` yields them first.
    pub fn ready(&self) -> usize {
        self.ready.len()
    }

    pub fn records_emitted(&self) -> u64 {
        self.records
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Append a delivery and iterate over every record it completes.
    ///
    /// The iterator is lazy. If it is dropped early, the rest of the delivery is still cut:
    /// complete records go to the ready queue, the tail goes to the carry buffer.
    pub fn feed<'f, 'd>(&'f mut self, delivery: &'d [u8]) -> Frames<'f, 'd> {
        self.bytes_in += delivery.len() as u64;
        Frames {
            framer: self,
            input: delivery,
        }
    }

    /// Hand out records left in the ready queue (no new input).
    pub fn drain_ready(&mut self) -> Frames<'_, 'static> {
        self.feed(&[])
    }

    /// End-of-stream: fails only when a partial record is pending.
    pub fn finish(self) -> Result<u64> {
        if !self.carry.is_empty() {
            return Err(SnapError::Truncated {
                pending: self.carry.len(),
                record: RECORD_SIZE,
            });
        }
        if !self.ready.is_empty() {
            warn!(
                "framer: {} complete record(s) were never consumed",
                self.ready.len()
            );
        }
        debug!(
            "framer: clean end of stream, {} record(s), {} byte(s)",
            self.records, self.bytes_in
        );
        Ok(self.records)
    }

    fn emitted(&mut self) {
        self.records += 1;
        record_framed(1);
    }
}

/// Lazy, single-pass record sequence over one delivery.
pub struct Frames<'f, 'd> {
    framer: &'f mut StreamFramer,
    input: &'d [u8],
}

impl Frames<'_, '_> {
    /// Cut the next complete record from carry + input; the tail goes to carry.
    fn cut(&mut self) -> Option<RawRecord> {
        let carry = &mut self.framer.carry;
        let need = RECORD_SIZE - carry.len();
        if self.input.len() < need {
            carry.extend_from_slice(self.input);
            self.input = &[];
            return None;
        }

        let (head, tail) = self.input.split_at(need);
        self.input = tail;
        let rec = if carry.is_empty() {
            head.to_vec()
        } else {
            let mut r = std::mem::replace(carry, Vec::with_capacity(RECORD_SIZE));
            r.extend_from_slice(head);
            r
        };
        Some(RawRecord::from_vec(rec))
    }
}

impl Iterator for Frames<'_, '_> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        let rec = match self.framer.ready.pop_front() {
            Some(r) => r,
            None => self.cut()?,
        };
        self.framer.emitted();
        Some(rec)
    }
}

impl Drop for Frames<'_, '_> {
    fn drop(&mut self) {
        while let Some(rec) = self.cut() {
            self.framer.ready.push_back(rec);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(n: usize) -> Vec<u8> {
        (0..n * RECORD_SIZE).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn single_delivery_exact_records() {
        let data = stream(3);
        let mut f = StreamFramer::new();
        let recs: Vec<_> = f.feed(&data).collect();
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[1].as_bytes(), &data[RECORD_SIZE..2 * RECORD_SIZE]);
        assert_eq!(f.pending(), 0);
        assert_eq!(f.finish().unwrap(), 3);
    }

    #[test]
    fn carry_spans_deliveries() {
        let data = stream(2);
        let mut f = StreamFramer::new();
        assert_eq!(f.feed(&data[..100]).count(), 0);
        assert_eq!(f.pending(), 100);
        let recs: Vec<_> = f.feed(&data[100..RECORD_SIZE + 5]).collect();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].as_bytes(), &data[..RECORD_SIZE]);
        assert_eq!(f.pending(), 5);
        assert_eq!(f.feed(&data[RECORD_SIZE + 5..]).count(), 1);
        assert_eq!(f.finish().unwrap(), 2);
    }

    #[test]
    fn dropped_iterator_keeps_order() {
        let data = stream(3);
        let mut f = StreamFramer::new();
        let first = f.feed(&data).next().unwrap();
        assert_eq!(first.as_bytes(), &data[..RECORD_SIZE]);
        // остаток поставки нарезан сразу: carry остаётся меньше записи
        assert_eq!(f.pending(), 0);
        assert_eq!(f.ready(), 2);
        let rest: Vec<_> = f.drain_ready().collect();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1].as_bytes(), &data[2 * RECORD_SIZE..]);
        assert_eq!(f.finish().unwrap(), 3);
    }

    #[test]
    fn early_drop_with_partial_tail_keeps_order() {
        let data = stream(3);
        let mut f = StreamFramer::new();
        // 2 записи + 10 байт третьей
        let cut = 2 * RECORD_SIZE + 10;
        assert_eq!(f.feed(&data[..cut]).next().unwrap().as_bytes(), &data[..RECORD_SIZE]);
        assert_eq!(f.ready(), 1);
        assert_eq!(f.pending(), 10);
        assert!(f.pending() < RECORD_SIZE);

        let rest: Vec<_> = f.feed(&data[cut..]).collect();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].as_bytes(), &data[RECORD_SIZE..2 * RECORD_SIZE]);
        assert_eq!(rest[1].as_bytes(), &data[2 * RECORD_SIZE..]);
        assert_eq!(f.finish().unwrap(), 3);
    }

    #[test]
    fn partial_tail_is_truncation() {
        let data = stream(1);
        let mut f = StreamFramer::new();
        assert_eq!(f.feed(&data[..RECORD_SIZE - 1]).count(), 0);
        match f.finish() {
            Err(SnapError::Truncated { pending, record }) => {
                assert_eq!(pending, RECORD_SIZE - 1);
                assert_eq!(record, RECORD_SIZE);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }
}
