//! Non-fatal data-quality findings
//!
//! A perf-counter database routinely contains operations that were still in
//! flight when the dump was taken, or nested interval markers that lost their
//! partner. Those items are skipped, never silently: every skip is recorded
//! here, logged at `warn` level and handed back to the caller with the result.

use crate::event::{OpId, Timestamp};
use serde::Serialize;
use std::fmt;

/// Which lifecycle events an incomplete operation is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Missing {
    Init,
    Finish,
    Both,
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Init => f.write_str("init"),
            Missing::Finish => f.write_str("finish"),
            Missing::Both => f.write_str("init and finish"),
        }
    }
}

/// A single per-item finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Operation lacks a paired init/finish
    IncompleteSpan { opid: OpId, missing: Missing },

    /// Finish recorded before init; a store anomaly
    InvertedSpan {
        opid: OpId,
        start: Timestamp,
        end: Timestamp,
    },

    /// `attr_time_start` never closed by an `attr_time_end`
    UnmatchedIntervalStart {
        opid: OpId,
        attr_id: i64,
        label: String,
    },

    /// `attr_time_end` with no open `attr_time_start`
    OrphanedIntervalEnd {
        opid: OpId,
        attr_id: i64,
        label: String,
    },

    /// Nested interval whose end precedes its start
    InvertedInterval {
        opid: OpId,
        label: String,
        start: Timestamp,
        end: Timestamp,
    },

    /// Map entry that would close a cycle in the call tree
    CycleSkipped { map_id: i64, src_opid: OpId, attach_opid: OpId },
}

impl Diagnostic {
    /// Operation id the finding is about
    pub fn opid(&self) -> OpId {
        match self {
            Diagnostic::IncompleteSpan { opid, .. }
            | Diagnostic::InvertedSpan { opid, .. }
            | Diagnostic::UnmatchedIntervalStart { opid, .. }
            | Diagnostic::OrphanedIntervalEnd { opid, .. }
            | Diagnostic::InvertedInterval { opid, .. } => *opid,
            Diagnostic::CycleSkipped { src_opid, .. } => *src_opid,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::IncompleteSpan { opid, missing } => {
                write!(f, "opid {}: incomplete states (missing {}), discarding this sample", opid, missing)
            }
            Diagnostic::InvertedSpan { opid, start, end } => write!(
                f,
                "opid {}: finish ({}) precedes init ({}), discarding this sample",
                opid, end, start
            ),
            Diagnostic::UnmatchedIntervalStart { opid, attr_id, label } => write!(
                f,
                "opid {}: interval '{}' started at attribute {} is never closed",
                opid, label, attr_id
            ),
            Diagnostic::OrphanedIntervalEnd { opid, attr_id, label } => write!(
                f,
                "opid {}: interval '{}' closed at attribute {} was never opened",
                opid, label, attr_id
            ),
            Diagnostic::InvertedInterval { opid, label, start, end } => write!(
                f,
                "opid {}: interval '{}' ends ({}) before it starts ({})",
                opid, label, end, start
            ),
            Diagnostic::CycleSkipped { map_id, src_opid, attach_opid } => write!(
                f,
                "map {}: linking opid {} under {} would create a cycle, edge dropped",
                map_id, src_opid, attach_opid
            ),
        }
    }
}

/// Ordered collection of findings for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finding and log it
    pub fn report(&mut self, diagnostic: Diagnostic) {
        tracing::warn!("{}", diagnostic);
        self.items.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// True if any finding concerns `opid`
    pub fn mentions(&self, opid: OpId) -> bool {
        self.items.iter().any(|d| d.opid() == opid)
    }

    /// Number of incomplete or inverted top-level spans
    pub fn skipped_spans(&self) -> usize {
        self.items
            .iter()
            .filter(|d| {
                matches!(
                    d,
                    Diagnostic::IncompleteSpan { .. } | Diagnostic::InvertedSpan { .. }
                )
            })
            .count()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_and_query() {
        let mut diags = Diagnostics::new();
        assert!(diags.is_empty());

        diags.report(Diagnostic::IncompleteSpan {
            opid: 102,
            missing: Missing::Finish,
        });
        diags.report(Diagnostic::OrphanedIntervalEnd {
            opid: 7,
            attr_id: 3,
            label: "kvs_get".to_string(),
        });

        assert_eq!(diags.len(), 2);
        assert!(diags.mentions(102));
        assert!(diags.mentions(7));
        assert!(!diags.mentions(100));
        assert_eq!(diags.skipped_spans(), 1);
    }

    #[test]
    fn test_display_incomplete() {
        let d = Diagnostic::IncompleteSpan {
            opid: 5,
            missing: Missing::Both,
        };
        assert_eq!(
            d.to_string(),
            "opid 5: incomplete states (missing init and finish), discarding this sample"
        );
    }

    #[test]
    fn test_serialize_tagged() {
        let d = Diagnostic::InvertedSpan {
            opid: 9,
            start: 20,
            end: 10,
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["kind"], "inverted_span");
        assert_eq!(json["opid"], 9);
    }
}
