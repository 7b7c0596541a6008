// src/retry/ledger.rs

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One handled failure: `node` failed (or was held) at `attempt`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub node: String,
    pub attempt: u32,
}

/// Failures the retry controller already acted on, keyed by
/// `(node, attempt)`. Persisted with the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<LedgerEntry>", into = "Vec<LedgerEntry>")]
pub struct RetryLedger {
    entries: BTreeSet<LedgerEntry>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, node: &str, attempt: u32) -> bool {
        self.entries.contains(&LedgerEntry {
            node: node.to_string(),
            attempt,
        })
    }

    /// Returns `false` if the entry was already present.
    pub fn record(&mut self, node: &str, attempt: u32) -> bool {
        self.entries.insert(LedgerEntry {
            node: node.to_string(),
            attempt,
        })
    }

    /// Drop an entry so the failure is handled again on the next report.
    pub fn forget(&mut self, node: &str, attempt: u32) -> bool {
        self.entries.remove(&LedgerEntry {
            node: node.to_string(),
            attempt,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }
}

impl From<Vec<LedgerEntry>> for RetryLedger {
    fn from(entries: Vec<LedgerEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }
}

impl From<RetryLedger> for Vec<LedgerEntry> {
    fn from(ledger: RetryLedger) -> Self {
        ledger.entries.into_iter().collect()
    }
}
