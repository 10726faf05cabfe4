//! Bounded record of recent smoothed transforms and their confidence.
//!
//! Reporting only; the stabilizer never reads it back for correctness.

use std::collections::VecDeque;

use crate::transform::Homography;

/// Maximum number of entries kept.
pub const HISTORY_CAPACITY: usize = 30;

/// Entries averaged by `recent_confidence`.
pub const RECENT_WINDOW: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistoryEntry {
    pub smoothed: Homography,
    pub confidence: f64,
}

/// FIFO ring of the last `HISTORY_CAPACITY` entries.
#[derive(Clone, Debug)]
pub struct TransformHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl TransformHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(&mut self, smoothed: Homography, confidence: f64) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            smoothed,
            confidence,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// Mean confidence of up to the last `RECENT_WINDOW` entries; 0 when empty.
    pub fn recent_confidence(&self) -> f64 {
        let n = self.entries.len().min(RECENT_WINDOW);
        if n == 0 {
            return 0.0;
        }
        self.entries.iter().rev().take(n).map(|e| e.confidence).sum::<f64>() / n as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}

impl Default for TransformHistory {
    fn default() -> Self {
        Self::new()
    }
}
