//! Category Aggregator
//!
//! Attributes the time of every descendant of a root operation to the
//! sub-module category that produced it.
//!
//! # Walk
//!
//! ```text
//! root 100 (fsal_read, 0 → 900 us)
//! ├─ 101 CFS   dst 100 clr 100   400 us   → CFS  += 400
//! │  └─ 102 CFS dst 101 clr 100  150 us   → duplicate of (CFS, 100), skipped
//! └─ 103 KVS   dst 100 clr 100   200 us   → KVS  += 200
//! ```
//!
//! Descendants are discovered breadth-first through `entity_maps` rows whose
//! `dst_opid` is an already discovered operation, in store order. Each child
//! opid is attributed once, through the first map entry that reaches it.
//!
//! # De-duplication
//!
//! Asynchronous clearance makes one piece of work visible under several map
//! entries. A [`DedupLedger`] scoped to one `aggregate` call remembers which
//! `(sm_tag, opid)` keys have been attributed:
//!
//! - if `(sm_tag, clr_opid)` or `(sm_tag, dst_opid)` is already in the ledger,
//!   the descendant is skipped and `(sm_tag, src_opid)` is recorded as its
//!   substitute key, so its own children under the same tag are skipped too;
//! - otherwise `(sm_tag, clr_opid)` is recorded and the duration is counted.
//!
//! When both keys are present the clearance key is reported as the match.

use crate::category::{CategoryIndex, CategoryTable};
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::event::{MapEntry, OpId};
use crate::span::{self, Span};
use crate::store::EventStore;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// Ledger key: time of `opid` already attributed to `sm_tag`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AttributionKey {
    pub sm_tag: String,
    pub opid: OpId,
}

impl AttributionKey {
    fn new(sm_tag: &str, opid: OpId) -> Self {
        Self {
            sm_tag: sm_tag.to_string(),
            opid,
        }
    }
}

/// Ledger decision for one descendant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Counted,
    Duplicate { matched: AttributionKey },
}

/// `(sm_tag, attribution key)` pairs seen during one aggregate call
#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: HashSet<AttributionKey>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether the child of `entry` tagged `sm_tag` is counted
    pub fn admit(&mut self, sm_tag: &str, entry: &MapEntry) -> Admission {
        let clr_key = AttributionKey::new(sm_tag, entry.clr_opid);
        let dst_key = AttributionKey::new(sm_tag, entry.dst_opid);

        let matched = if self.seen.contains(&clr_key) {
            clr_key
        } else if self.seen.contains(&dst_key) {
            dst_key
        } else {
            self.seen.insert(clr_key);
            return Admission::Counted;
        };

        self.seen.insert(AttributionKey::new(sm_tag, entry.src_opid));
        Admission::Duplicate { matched }
    }

    pub fn contains(&self, sm_tag: &str, opid: OpId) -> bool {
        self.seen.contains(&AttributionKey::new(sm_tag, opid))
    }
}

/// What happened to one descendant's duration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttributionOutcome {
    /// Added to its category bucket
    Counted { category: String },
    /// Already attributed through another linkage
    Duplicate { category: String, matched: AttributionKey },
    /// sm_tag missing or not in the category table
    Uncategorised,
}

/// Per-descendant record explaining the buckets
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribution {
    pub opid: OpId,
    pub map_id: i64,
    pub dst_opid: OpId,
    pub clr_opid: OpId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sm_tag: Option<String>,
    pub duration: i64,
    #[serde(flatten)]
    pub outcome: AttributionOutcome,
}

/// Cumulative time of one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryBucket {
    pub name: String,
    pub duration: i64,
    pub contributors: usize,
}

/// Result of aggregating one root operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryBreakdown {
    pub total: Span,
    /// One bucket per table category, in table order
    pub buckets: Vec<CategoryBucket>,
    /// Time of descendants without a known category (informational)
    pub uncategorised: i64,
    pub attributions: Vec<Attribution>,
}

impl CategoryBreakdown {
    pub fn bucket(&self, name: &str) -> Option<&CategoryBucket> {
        self.buckets.iter().find(|b| b.name == name)
    }

    /// Duration of a named bucket, 0 for unknown names
    pub fn duration_of(&self, name: &str) -> i64 {
        self.bucket(name).map_or(0, |b| b.duration)
    }

    /// `(label, duration)` pairs for bar-chart renderers
    pub fn as_pairs(&self) -> Vec<(String, i64)> {
        self.buckets
            .iter()
            .map(|b| (b.name.clone(), b.duration))
            .collect()
    }
}

/// Buckets descendant time of a root operation by category
pub struct CategoryAggregator<'a, S: ?Sized> {
    store: &'a S,
    table: &'a CategoryTable,
}

impl<'a, S: EventStore + ?Sized> CategoryAggregator<'a, S> {
    pub fn new(store: &'a S, table: &'a CategoryTable) -> Self {
        Self { store, table }
    }

    /// Aggregate descendants of `root`
    ///
    /// Returns `Ok(None)` when the root span itself is incomplete; the reason
    /// is recorded in `diagnostics` and the caller may move on to the next id.
    ///
    /// # Errors
    /// Store failures are propagated unchanged.
    pub fn aggregate(
        &self,
        root: OpId,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<CategoryBreakdown>> {
        let total = match span::resolve(self.store, root)?.into_span(diagnostics) {
            Some(span) => span,
            None => return Ok(None),
        };

        let mut buckets: Vec<CategoryBucket> = self
            .table
            .names()
            .map(|name| CategoryBucket {
                name: name.to_string(),
                duration: 0,
                contributors: 0,
            })
            .collect();
        let mut uncategorised = 0;
        let mut attributions = Vec::new();
        let mut ledger = DedupLedger::new();

        let mut discovered: HashSet<OpId> = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);

        while let Some(parent) = queue.pop_front() {
            for entry in self.store.maps_by_dst_opid(parent)? {
                if !discovered.insert(entry.src_opid) {
                    continue;
                }
                queue.push_back(entry.src_opid);

                let child = match span::resolve(self.store, entry.src_opid)?.into_span(diagnostics)
                {
                    Some(span) => span,
                    None => continue,
                };

                let sm_tag = child.sm_tag.clone().or_else(|| entry.sm_tag.clone());
                let category = sm_tag.as_deref().and_then(|t| self.table.classify(t));

                let outcome = match (sm_tag.as_deref(), category) {
                    (Some(tag), Some(index)) => {
                        self.admit(&mut ledger, &mut buckets, tag, index, &entry, &child)
                    }
                    _ => {
                        uncategorised = child.duration().saturating_add(uncategorised);
                        AttributionOutcome::Uncategorised
                    }
                };

                tracing::debug!(
                    "opid {} -> {} ({:?}, {} us): {:?}",
                    entry.dst_opid,
                    entry.src_opid,
                    sm_tag,
                    child.duration(),
                    outcome
                );

                attributions.push(Attribution {
                    opid: entry.src_opid,
                    map_id: entry.id,
                    dst_opid: entry.dst_opid,
                    clr_opid: entry.clr_opid,
                    sm_tag,
                    duration: child.duration(),
                    outcome,
                });
            }
        }

        Ok(Some(CategoryBreakdown {
            total,
            buckets,
            uncategorised,
            attributions,
        }))
    }

    fn admit(
        &self,
        ledger: &mut DedupLedger,
        buckets: &mut [CategoryBucket],
        sm_tag: &str,
        index: CategoryIndex,
        entry: &MapEntry,
        child: &Span,
    ) -> AttributionOutcome {
        let category = self.table.name(index).to_string();
        match ledger.admit(sm_tag, entry) {
            Admission::Counted => {
                buckets[index].duration = buckets[index].duration.saturating_add(child.duration());
                buckets[index].contributors += 1;
                AttributionOutcome::Counted { category }
            }
            Admission::Duplicate { matched } => {
                AttributionOutcome::Duplicate { category, matched }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(src: OpId, dst: OpId, clr: OpId) -> MapEntry {
        MapEntry {
            id: src,
            pid: 1,
            time: 0,
            module: "cfs".to_string(),
            fn_tag: "cfs_read".to_string(),
            sm_tag: None,
            entity_type: "map".to_string(),
            map_name: "cfs_to_nfs".to_string(),
            src_opid: src,
            dst_opid: dst,
            clr_opid: clr,
        }
    }

    #[test]
    fn test_ledger_first_admission_counts() {
        let mut ledger = DedupLedger::new();
        assert_eq!(ledger.admit("CFS", &entry(101, 100, 100)), Admission::Counted);
        assert!(ledger.contains("CFS", 100));
        assert!(!ledger.contains("CFS", 101));
    }

    #[test]
    fn test_ledger_shared_clearance_is_duplicate() {
        let mut ledger = DedupLedger::new();
        ledger.admit("CFS", &entry(101, 100, 100));
        assert_eq!(
            ledger.admit("CFS", &entry(102, 101, 100)),
            Admission::Duplicate {
                matched: AttributionKey::new("CFS", 100)
            }
        );
        // Substitute key recorded for the skipped child
        assert!(ledger.contains("CFS", 102));
    }

    #[test]
    fn test_ledger_different_tag_is_independent() {
        let mut ledger = DedupLedger::new();
        ledger.admit("CFS", &entry(101, 100, 100));
        assert_eq!(ledger.admit("KVS", &entry(102, 101, 100)), Admission::Counted);
    }

    #[test]
    fn test_ledger_dst_match() {
        let mut ledger = DedupLedger::new();
        ledger.admit("KVS", &entry(5, 1, 9));
        // clr 7 unseen, dst 9 seen
        assert_eq!(
            ledger.admit("KVS", &entry(6, 9, 7)),
            Admission::Duplicate {
                matched: AttributionKey::new("KVS", 9)
            }
        );
    }

    #[test]
    fn test_ledger_clearance_key_wins_when_both_match() {
        let mut ledger = DedupLedger::new();
        ledger.admit("KVS", &entry(5, 1, 3));
        ledger.admit("KVS", &entry(6, 2, 4));
        // clr 3 and dst 4 are both in the ledger
        assert_eq!(
            ledger.admit("KVS", &entry(7, 4, 3)),
            Admission::Duplicate {
                matched: AttributionKey::new("KVS", 3)
            }
        );
    }

    #[test]
    fn test_ledger_counting_records_clearance_not_dst() {
        let mut ledger = DedupLedger::new();
        ledger.admit("DSAL", &entry(10, 2, 1));
        assert!(ledger.contains("DSAL", 1));
        assert!(!ledger.contains("DSAL", 2));
        // A later child whose dst is that first dst is therefore still counted
        assert_eq!(ledger.admit("DSAL", &entry(11, 2, 5)), Admission::Counted);
    }
}
