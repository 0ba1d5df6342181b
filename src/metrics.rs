//! Lightweight global metrics for MemSnap.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Producer / framer
//! - Reconstructor
//! - Sessions (verdicts)

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ----- Producer / framer -----
static DELIVERIES_TOTAL: AtomicU64 = AtomicU64::new(0);
static BYTES_IN: AtomicU64 = AtomicU64::new(0);
static RECORDS_FRAMED: AtomicU64 = AtomicU64::new(0);

// ----- Reconstructor -----
static PAGES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static PAGE_OVERWRITES: AtomicU64 = AtomicU64::new(0);
static SAME_GEN_DUPLICATES: AtomicU64 = AtomicU64::new(0);
static GEN_REGRESSIONS: AtomicU64 = AtomicU64::new(0);

// ----- Sessions -----
static SESSIONS_PASSED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_FAILED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_ABORTED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    // Producer / framer
    pub deliveries_total: u64,
    pub bytes_in: u64,
    pub records_framed: u64,

    // Reconstructor
    pub pages_written: u64,
    pub page_overwrites: u64,
    pub same_gen_duplicates: u64,
    pub gen_regressions: u64,

    // Sessions
    pub sessions_passed: u64,
    pub sessions_failed: u64,
    pub sessions_aborted: u64,
}

impl MetricsSnapshot {
    pub fn avg_delivery_bytes(&self) -> f64 {
        if self.deliveries_total == 0 {
            0.0
        } else {
            self.bytes_in as f64 / self.deliveries_total as f64
        }
    }
}

// ----- Recorders (producer / framer) -----
pub fn record_delivery(len: usize) {
    DELIVERIES_TOTAL.fetch_add(1, Ordering::Relaxed);
    BYTES_IN.fetch_add(len as u64, Ordering::Relaxed);
}

pub fn record_framed(n: u64) {
    RECORDS_FRAMED.fetch_add(n, Ordering::Relaxed);
}

// ----- Recorders (reconstructor) -----
pub fn record_page_written() {
    PAGES_WRITTEN.fetch_add(1, Ordering::Relaxed);
}

pub fn record_overwrite() {
    PAGE_OVERWRITES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_same_gen_duplicate() {
    SAME_GEN_DUPLICATES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_gen_regression() {
    GEN_REGRESSIONS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (sessions) -----
pub fn record_session_passed() {
    SESSIONS_PASSED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_session_failed() {
    SESSIONS_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_session_aborted() {
    SESSIONS_ABORTED.fetch_add(1, Ordering::Relaxed);
}

pub fn metrics_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        deliveries_total: DELIVERIES_TOTAL.load(Ordering::Relaxed),
        bytes_in: BYTES_IN.load(Ordering::Relaxed),
        records_framed: RECORDS_FRAMED.load(Ordering::Relaxed),

        pages_written: PAGES_WRITTEN.load(Ordering::Relaxed),
        page_overwrites: PAGE_OVERWRITES.load(Ordering::Relaxed),
        same_gen_duplicates: SAME_GEN_DUPLICATES.load(Ordering::Relaxed),
        gen_regressions: GEN_REGRESSIONS.load(Ordering::Relaxed),

        sessions_passed: SESSIONS_PASSED.load(Ordering::Relaxed),
        sessions_failed: SESSIONS_FAILED.load(Ordering::Relaxed),
        sessions_aborted: SESSIONS_ABORTED.load(Ordering::Relaxed),
    }
}

pub fn metrics_reset() {
    for c in [
        &DELIVERIES_TOTAL,
        &BYTES_IN,
        &RECORDS_FRAMED,
        &PAGES_WRITTEN,
        &PAGE_OVERWRITES,
        &SAME_GEN_DUPLICATES,
        &GEN_REGRESSIONS,
        &SESSIONS_PASSED,
        &SESSIONS_FAILED,
        &SESSIONS_ABORTED,
    ] {
        c.store(0, Ordering::Relaxed);
    }
}
