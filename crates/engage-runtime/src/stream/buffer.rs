use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use engage_core::Segment;

/// The thinking stage's view of one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub segment: Segment,
    pub technical: Option<String>,
    pub social: Option<String>,
    pub relevance: f64,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(
        segment: Segment,
        technical: Option<String>,
        social: Option<String>,
        relevance: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            segment,
            technical,
            social,
            relevance,
            timestamp: Utc::now(),
        }
    }

    /// One-line note used when summarizing a batch.
    pub fn note(&self) -> String {
        let speaker = self.segment.speaker.as_deref().unwrap_or("someone");
        match self.technical.as_deref().and_then(|t| t.lines().next()) {
            Some(gist) if !gist.trim().is_empty() => {
                format!("{}: {} [{}]", speaker, self.segment.text, gist.trim())
            }
            _ => format!("{}: {}", speaker, self.segment.text),
        }
    }
}

/// Fixed-capacity ring of recent analyses; the oldest entry is evicted on overflow.
#[derive(Debug, Clone)]
pub struct AnalysisBuffer {
    records: VecDeque<AnalysisRecord>,
    capacity: usize,
}

impl AnalysisBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: AnalysisRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The newest `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<AnalysisRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Take every record out, oldest first.
    pub fn drain(&mut self) -> Vec<AnalysisRecord> {
        self.records.drain(..).collect()
    }

    /// Put a drained batch back in front of anything added since. If that
    /// overflows, the oldest records go.
    pub fn restore(&mut self, batch: Vec<AnalysisRecord>) {
        let newer: Vec<AnalysisRecord> = self.records.drain(..).collect();
        for record in batch.into_iter().chain(newer) {
            self.push(record);
        }
    }
}
