//! validate — финальная проверка полноты образа после чистого end-of-stream.
//!
//! Порядок проверок:
//!   (a) каждая страница 0..expected должна присутствовать — сообщается первый пропуск;
//!   (b) ни одной страницы с offset >= declared size — сообщается первая такая;
//!   (c) при strict-политике — ни одного дубликата.
//! Fail — штатный результат (находка целостности), не ошибка инструмента.

use std::collections::BTreeMap;
use std::fmt;

use log::{info, warn};
use serde::Serialize;

use crate::config::DuplicatePolicy;
use crate::consts::PAGE_SIZE;
use crate::container::DeclaredSize;
use crate::reconstruct::{Anomaly, AnomalyKind, SnapshotIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub verdict: Verdict,
    pub declared_size: u64,
    pub expected_pages: u64,
    pub distinct_pages: u64,
    pub records: u64,
    /// Records per iteration generation.
    pub per_iteration: BTreeMap<u16, u64>,
    pub first_missing: Option<u64>,
    pub first_out_of_range: Option<u64>,
    /// Duplicates that fail the verdict (strict policy only).
    pub failing_duplicates: u64,
    pub anomalies: Vec<Anomaly>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn same_generation_duplicates(&self) -> usize {
        self.anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::SameGenerationDuplicate)
            .count()
    }
}

/// Read-only check of the finalized index against the declared size.
pub fn validate(
    index: &SnapshotIndex,
    declared: DeclaredSize,
    policy: DuplicatePolicy,
) -> ValidationReport {
    let expected = declared.page_count();

    let first_missing = index.first_missing(expected);
    if let Some(idx) = first_missing {
        warn!("page {} is missing (offset {})", idx, idx * PAGE_SIZE as u64);
    }

    let first_out_of_range = index.first_at_or_beyond(expected);
    if let Some(idx) = first_out_of_range {
        warn!(
            "page {} (offset {}) is beyond declared size {}",
            idx,
            idx * PAGE_SIZE as u64,
            declared.bytes()
        );
    }

    let failing_duplicates = match policy {
        DuplicatePolicy::Strict => index.duplicates(),
        DuplicatePolicy::GenerationAware => 0,
    };

    let verdict = if first_missing.is_none() && first_out_of_range.is_none() && failing_duplicates == 0
    {
        Verdict::Pass
    } else {
        Verdict::Fail
    };

    let report = ValidationReport {
        verdict,
        declared_size: declared.bytes(),
        expected_pages: expected,
        distinct_pages: index.distinct_pages(),
        records: index.records(),
        per_iteration: index.per_iteration().clone(),
        first_missing,
        first_out_of_range,
        failing_duplicates,
        anomalies: index.anomalies().to_vec(),
    };
    info!("{}", report);
    report
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.verdict {
            Verdict::Pass => {
                write!(
                    f,
                    "PASS: {} pages ({} records processed)",
                    self.distinct_pages, self.records
                )?;
                for (seq, n) in &self.per_iteration {
                    write!(f, ", iter {}: {}", seq, n)?;
                }
                if !self.anomalies.is_empty() {
                    write!(f, ", {} anomaly(ies)", self.anomalies.len())?;
                }
                Ok(())
            }
            Verdict::Fail => {
                let mut parts = Vec::new();
                if let Some(idx) = self.first_missing {
                    parts.push(format!("page {} is missing", idx));
                }
                if let Some(idx) = self.first_out_of_range {
                    parts.push(format!(
                        "page {} beyond declared size {}",
                        idx, self.declared_size
                    ));
                }
                if self.failing_duplicates > 0 {
                    parts.push(format!("{} duplicated page(s)", self.failing_duplicates));
                }
                write!(
                    f,
                    "FAIL: {} ({} of {} pages present)",
                    parts.join("; "),
                    self.distinct_pages,
                    self.expected_pages
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(pages: &[u64]) -> SnapshotIndex {
        let mut ix = SnapshotIndex::new();
        for &p in pages {
            ix.observe(p, 0);
        }
        ix
    }

    #[test]
    fn exact_set_passes() {
        let ix = index_of(&[2, 0, 1, 3]);
        let r = validate(&ix, DeclaredSize::new(4 * 4096).unwrap(), DuplicatePolicy::GenerationAware);
        assert!(r.passed());
        assert_eq!(r.distinct_pages, 4);
        assert_eq!(r.per_iteration.get(&0), Some(&4));
        assert!(r.to_string().starts_with("PASS: 4 pages"));
    }

    #[test]
    fn missing_middle_page_fails() {
        let ix = index_of(&[0, 1, 3]);
        let r = validate(&ix, DeclaredSize::new(4 * 4096).unwrap(), DuplicatePolicy::GenerationAware);
        assert_eq!(r.verdict, Verdict::Fail);
        assert_eq!(r.first_missing, Some(2));
        assert_eq!(r.first_out_of_range, None);
        assert!(r.to_string().contains("page 2 is missing"));
    }

    #[test]
    fn page_at_declared_end_fails() {
        let ix = index_of(&[0, 1, 2]);
        let r = validate(&ix, DeclaredSize::new(2 * 4096).unwrap(), DuplicatePolicy::GenerationAware);
        assert_eq!(r.verdict, Verdict::Fail);
        assert_eq!(r.first_missing, None);
        assert_eq!(r.first_out_of_range, Some(2));
    }

    #[test]
    fn empty_image_passes_with_zero_size() {
        let ix = SnapshotIndex::new();
        let r = validate(&ix, DeclaredSize::new(0).unwrap(), DuplicatePolicy::Strict);
        assert!(r.passed());
        assert_eq!(r.expected_pages, 0);
    }
}
