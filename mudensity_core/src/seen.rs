//! Replay guard for comm log records.
//!
//! The host re-reads overlapping log windows. Records that carry a guid are
//! recognised by it, records without one by what they announce. Entries are
//! bucketed by comm timestamp so the old ones can be pruned once no pending
//! link could still be fed by them.

use std::collections::{BTreeMap, HashMap};

use crate::comms::RawEvent;
use crate::geometry::Coordinate;

/// Identity of one ingested record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Guid(String),
    /// What a guid-less record announced
    Content {
        origin: Coordinate,
        target: Option<Coordinate>,
        quantity: Option<u64>,
    },
}

impl RecordKey {
    pub fn of(event: &RawEvent) -> Self {
        match &event.record_id {
            Some(guid) => RecordKey::Guid(guid.clone()),
            None => RecordKey::Content {
                origin: event.origin.coord,
                target: event.target.as_ref().map(|t| t.coord),
                quantity: event.quantity,
            },
        }
    }
}

/// Occurrences of each guid-less record within the batch being ingested.
pub type BatchTally = HashMap<(i64, RecordKey), usize>;

/// Records already ingested, bucketed by comm timestamp.
///
/// Guid-less records are counted rather than flagged: two identical field
/// lines in one batch are two fields. A later batch only gets through the
/// copies beyond the most any earlier batch carried.
#[derive(Debug, Default)]
pub struct SeenRecords {
    by_time: BTreeMap<i64, HashMap<RecordKey, usize>>,
}

impl SeenRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a record as seen. Returns false when it was seen before.
    pub fn admit(&mut self, timestamp: i64, key: RecordKey, tally: &mut BatchTally) -> bool {
        let occurrence = match &key {
            RecordKey::Guid(_) => 1,
            RecordKey::Content { .. } => {
                let count = tally.entry((timestamp, key.clone())).or_insert(0);
                *count += 1;
                *count
            }
        };

        let seen = self.by_time.entry(timestamp).or_default().entry(key).or_insert(0);
        if occurrence <= *seen {
            return false;
        }
        *seen = occurrence;
        true
    }

    /// Forget every record stamped before `horizon`. Returns how many were dropped.
    pub fn prune_before(&mut self, horizon: i64) -> usize {
        let kept = self.by_time.split_off(&horizon);
        let dropped = self.len();
        self.by_time = kept;
        dropped
    }

    /// Latest comm timestamp seen.
    pub fn newest(&self) -> Option<i64> {
        self.by_time.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.by_time.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_time.is_empty()
    }
}
