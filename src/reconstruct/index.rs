//! reconstruct/index — SnapshotIndex: какие страницы видели, каким поколением, сколько раз.
//!
//! page_index -> iteration_seq последней (по порядку прихода) записи.
//! Плюс счётчик записей на каждое поколение и журнал аномалий.

use std::collections::BTreeMap;

use serde::Serialize;

/// What the index learnt from one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Page seen for the first time.
    First,
    /// Page rewritten by a newer generation (ordinary multi-iteration overwrite).
    Overwrite { previous: u16 },
    /// Page rewritten within the same generation.
    SameGeneration,
    /// Page rewritten by an older generation than the one already stored.
    Regression { previous: u16 },
}

impl Observation {
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, Observation::First)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    SameGenerationDuplicate,
    GenerationRegression,
    /// Any duplicate under the strict policy.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    pub page_index: u64,
    pub iteration_seq: u16,
    pub previous_seq: u16,
    pub kind: AnomalyKind,
}

#[derive(Debug, Default, Clone)]
pub struct SnapshotIndex {
    pages: BTreeMap<u64, u16>,
    per_iteration: BTreeMap<u16, u64>,
    records: u64,
    duplicates: u64,
    anomalies: Vec<Anomaly>,
}

impl SnapshotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one applied record.
    pub fn observe(&mut self, page_index: u64, seq: u16) -> Observation {
        self.records += 1;
        *self.per_iteration.entry(seq).or_insert(0) += 1;

        let obs = match self.pages.insert(page_index, seq) {
            None => Observation::First,
            Some(prev) if prev == seq => Observation::SameGeneration,
            Some(prev) if prev < seq => Observation::Overwrite { previous: prev },
            Some(prev) => Observation::Regression { previous: prev },
        };
        if obs.is_duplicate() {
            self.duplicates += 1;
        }
        obs
    }

    pub(crate) fn push_anomaly(&mut self, a: Anomaly) {
        self.anomalies.push(a);
    }

    pub fn contains(&self, page_index: u64) -> bool {
        self.pages.contains_key(&page_index)
    }

    /// Generation of the last record that wrote `page_index`.
    pub fn seq_of(&self, page_index: u64) -> Option<u16> {
        self.pages.get(&page_index).copied()
    }

    pub fn distinct_pages(&self) -> u64 {
        self.pages.len() as u64
    }

    /// Records applied (including rewrites).
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Records that hit an already-present page.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn per_iteration(&self) -> &BTreeMap<u16, u64> {
        &self.per_iteration
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// Lowest index in `0..count` that was never written.
    pub fn first_missing(&self, count: u64) -> Option<u64> {
        // Ключи отсортированы: первый разрыв последовательности 0,1,2.. и есть пропуск.
        let mut expected = 0u64;
        for &idx in self.pages.range(..count).map(|(k, _)| k) {
            if idx != expected {
                return Some(expected);
            }
            expected += 1;
        }
        if expected < count {
            Some(expected)
        } else {
            None
        }
    }

    /// Lowest written index that is `>= count`.
    pub fn first_at_or_beyond(&self, count: u64) -> Option<u64> {
        self.pages.range(count..).next().map(|(k, _)| *k)
    }
}
