//! Call-Tree Builder
//!
//! Reconstructs the call graph below one root operation for visualisation.
//!
//! # Shape
//!
//! Every operation contributes an `init` node and a `finish` node joined by an
//! edge labelled with its duration. Nested intervals recorded as
//! `*attr_time_start*` / `*attr_time_end*` attributes are chained between the
//! two. Children hang off their clearance operation: the parent's init points
//! at the child's init, the child's finish points back at the parent's finish.
//!
//! ```text
//!   fsal_read init ──────────── 900 us ───────────► fsal_read finish
//!        │    └─► kvs_get [120 us] ─► m0_io [300 us] ─┘      ▲
//!        ▼                                                   │
//!   cfs_read init ── 400 us ──► cfs_read finish ─────────────┘
//! ```
//!
//! # Discovery
//!
//! Starting from the root, each operation is expanded once. Its children are
//! the map entries whose `dst_opid` (direct child) or `clr_opid` (fanned-out
//! child) is the operation. A child reached again through another entry gets
//! extra edges, never a second set of nodes. An edge that would make the
//! operation graph cyclic is dropped and reported.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{ReconstructError, Result};
use crate::event::{AttributeEvent, IntervalEdge, MapEntry, OpId, Timestamp};
use crate::span::{self, Span};
use crate::store::EventStore;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};

/// Index of a node in the tree's graph
pub type NodeId = NodeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Init,
    Finish,
    Interval,
}

/// One vertex of the call graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub opid: OpId,
    pub kind: NodeKind,
    pub label: String,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Display metadata (non-interval attributes), init nodes only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(String, String)>,
}

impl Node {
    pub fn duration(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

/// Directed edge; `duration` is set on the init → finish edge of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

/// Nodes belonging to one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    pub span: Span,
    /// Operation the node set was first attached under, `None` for the root
    pub parent: Option<OpId>,
    pub init: NodeId,
    pub finish: NodeId,
    pub intervals: Vec<NodeId>,
}

/// A nested start/end pair inside one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interval {
    pub label: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub start_attr: i64,
    pub end_attr: i64,
}

impl Interval {
    pub fn duration(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

/// Split an operation's attributes into nested intervals and display metadata
///
/// Pairing is a strict stack of depth one: a start is closed by the next end.
/// A second start while one is open leaves the first unmatched; an end with
/// nothing open is orphaned. Both are reported and dropped.
pub fn pair_intervals(
    opid: OpId,
    attributes: &[AttributeEvent],
    diagnostics: &mut Diagnostics,
) -> (Vec<Interval>, Vec<(String, String)>) {
    let mut ordered: Vec<&AttributeEvent> = attributes.iter().filter(|a| a.opid == opid).collect();
    ordered.sort_by_key(|a| a.id);

    let mut intervals = Vec::new();
    let mut metadata = Vec::new();
    let mut open: Option<(&AttributeEvent, &str)> = None;

    for attr in ordered {
        let marker = match attr.interval_marker() {
            Some(marker) => marker,
            None => {
                metadata.push((attr.attr_name.clone(), attr.attr_val.clone()));
                continue;
            }
        };

        match (marker.edge, open.take()) {
            (IntervalEdge::Start, previous) => {
                if let Some((unclosed, label)) = previous {
                    diagnostics.report(Diagnostic::UnmatchedIntervalStart {
                        opid,
                        attr_id: unclosed.id,
                        label: label.to_string(),
                    });
                }
                open = Some((attr, marker.label));
            }
            (IntervalEdge::End, None) => {
                diagnostics.report(Diagnostic::OrphanedIntervalEnd {
                    opid,
                    attr_id: attr.id,
                    label: marker.label.to_string(),
                });
            }
            (IntervalEdge::End, Some((start, label))) => {
                let label = if label.is_empty() {
                    format!("interval {}", intervals.len() + 1)
                } else {
                    label.to_string()
                };
                if attr.time < start.time {
                    diagnostics.report(Diagnostic::InvertedInterval {
                        opid,
                        label,
                        start: start.time,
                        end: attr.time,
                    });
                    continue;
                }
                intervals.push(Interval {
                    label,
                    start: start.time,
                    end: attr.time,
                    start_attr: start.id,
                    end_attr: attr.id,
                });
            }
        }
    }

    if let Some((unclosed, label)) = open {
        diagnostics.report(Diagnostic::UnmatchedIntervalStart {
            opid,
            attr_id: unclosed.id,
            label: label.to_string(),
        });
    }

    (intervals, metadata)
}

/// Reconstructed call graph below one root operation
#[derive(Debug, Clone)]
pub struct CallTree {
    root: OpId,
    graph: DiGraph<Node, Option<i64>>,
    operations: Vec<Operation>,
    op_index: HashMap<OpId, usize>,
    diagnostics: Diagnostics,
}

impl Serialize for CallTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CallTree", 5)?;
        state.serialize_field("root", &self.root)?;
        state.serialize_field("nodes", &self.nodes().collect::<Vec<_>>())?;
        state.serialize_field("edges", &self.edges())?;
        state.serialize_field("operations", &self.operations)?;
        state.serialize_field("diagnostics", &self.diagnostics)?;
        state.end()
    }
}

impl CallTree {
    fn new(root: OpId) -> Self {
        Self {
            root,
            graph: DiGraph::new(),
            operations: Vec::new(),
            op_index: HashMap::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn root(&self) -> OpId {
        self.root
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Edges in insertion order
    pub fn edges(&self) -> Vec<Edge> {
        self.graph
            .edge_references()
            .map(|e| Edge {
                from: e.source(),
                to: e.target(),
                duration: *e.weight(),
            })
            .collect()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.graph.node_weight(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Operations in discovery order, root first
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn operation(&self, opid: OpId) -> Option<&Operation> {
        self.op_index.get(&opid).map(|&i| &self.operations[i])
    }

    pub fn contains(&self, opid: OpId) -> bool {
        self.op_index.contains_key(&opid)
    }

    /// Operations attached directly under `opid`, in attachment order
    pub fn children_of(&self, opid: OpId) -> Vec<OpId> {
        let init = match self.operation(opid) {
            Some(op) => op.init,
            None => return Vec::new(),
        };
        let mut links: Vec<(EdgeIndex, OpId)> = self
            .graph
            .edges(init)
            .filter(|e| self.graph[e.target()].kind == NodeKind::Init)
            .map(|e| (e.id(), self.graph[e.target()].opid))
            .collect();
        links.sort_by_key(|&(edge, _)| edge);
        links.into_iter().map(|(_, child)| child).collect()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Outgoing edges of a node
    pub fn edges_from(&self, id: NodeId) -> impl Iterator<Item = Edge> + '_ {
        self.graph.edges(id).map(|e| Edge {
            from: e.source(),
            to: e.target(),
            duration: *e.weight(),
        })
    }

    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.graph.contains_edge(from, to)
    }

    /// `(label, duration)` per operation, for bar-chart renderers
    pub fn as_pairs(&self) -> Vec<(String, i64)> {
        self.operations
            .iter()
            .map(|op| {
                (
                    format!("{} {}", op.span.fn_tag, op.span.opid),
                    op.span.duration(),
                )
            })
            .collect()
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = self.graph.add_node(node);
        self.graph[id].id = id;
        id
    }

    fn push_edge(&mut self, from: NodeId, to: NodeId, duration: Option<i64>) {
        self.graph.update_edge(from, to, duration);
    }

    fn add_operation(
        &mut self,
        span: Span,
        parent: Option<OpId>,
        intervals: Vec<Interval>,
        metadata: Vec<(String, String)>,
    ) {
        let opid = span.opid;
        let init = self.push_node(Node {
            id: NodeIndex::end(),
            opid,
            kind: NodeKind::Init,
            label: format!("{} init", span.fn_tag),
            start: span.start,
            end: span.end,
            attributes: metadata,
        });
        let finish = self.push_node(Node {
            id: NodeIndex::end(),
            opid,
            kind: NodeKind::Finish,
            label: format!("{} finish", span.fn_tag),
            start: span.start,
            end: span.end,
            attributes: Vec::new(),
        });
        self.push_edge(init, finish, Some(span.duration()));

        let mut interval_ids = Vec::with_capacity(intervals.len());
        let mut previous = init;
        for interval in intervals {
            let id = self.push_node(Node {
                id: NodeIndex::end(),
                opid,
                kind: NodeKind::Interval,
                label: interval.label,
                start: interval.start,
                end: interval.end,
                attributes: Vec::new(),
            });
            self.push_edge(previous, id, None);
            interval_ids.push(id);
            previous = id;
        }
        if previous != init {
            self.push_edge(previous, finish, None);
        }

        self.op_index.insert(opid, self.operations.len());
        self.operations.push(Operation {
            span,
            parent,
            init,
            finish,
            intervals: interval_ids,
        });
    }

    /// Link `child` under `parent`; false if that would close a cycle
    ///
    /// Init nodes only reach other init nodes through attachment edges, so a
    /// path from the child's init to the parent's init means `child` is
    /// already an ancestor of `parent`.
    fn attach(&mut self, parent: OpId, child: OpId) -> bool {
        let (parent_op, child_op) = match (self.operation(parent), self.operation(child)) {
            (Some(p), Some(c)) => ((p.init, p.finish), (c.init, c.finish)),
            _ => return false,
        };
        if has_path_connecting(&self.graph, child_op.0, parent_op.0, None) {
            return false;
        }
        self.push_edge(parent_op.0, child_op.0, None);
        self.push_edge(child_op.1, parent_op.1, None);
        true
    }
}

/// Builds a [`CallTree`] from an event store
pub struct CallTreeBuilder<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: EventStore + ?Sized> CallTreeBuilder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Build the call tree rooted at `root`
    ///
    /// # Errors
    /// - `InsufficientData` if the store has no states, attributes or maps for
    ///   `root`, or if the root span is incomplete
    /// - `Store` if a query fails
    pub fn build(&self, root: OpId) -> Result<CallTree> {
        let mut root_diagnostics = Diagnostics::new();
        let root_states = self.store.states_by_opid(root)?;
        let root_attrs = self.store.attributes_by_opid(root)?;
        let root_links = self.child_links(root, &mut root_diagnostics)?;

        if root_states.is_empty() && root_attrs.is_empty() && root_links.is_empty() {
            return Err(ReconstructError::insufficient(
                format!("opid {}", root),
                "no states, attributes or maps",
            ));
        }

        let mut tree = CallTree::new(root);
        tree.diagnostics.extend(root_diagnostics);
        let root_span = match span::resolve_events(root, &root_states) {
            span::Resolution::Complete(span) => span,
            span::Resolution::Incomplete(diagnostic) => {
                let detail = diagnostic.to_string();
                tree.diagnostics.report(diagnostic);
                return Err(ReconstructError::insufficient(format!("opid {}", root), detail));
            }
        };

        let (intervals, metadata) = pair_intervals(root, &root_attrs, &mut tree.diagnostics);
        tree.add_operation(root_span, None, intervals, metadata);

        let mut expanded = HashSet::new();
        let mut rejected = HashSet::new();
        let mut pending = vec![(root, root_links)];

        while let Some((current, links)) = pending.pop() {
            if !expanded.insert(current) {
                continue;
            }
            let mut discovered = Vec::new();

            for entry in links {
                if rejected.contains(&entry.src_opid) {
                    continue;
                }
                let attach_to = if tree.contains(entry.clr_opid) {
                    entry.clr_opid
                } else {
                    current
                };

                if !tree.contains(entry.src_opid) {
                    if !self.add_child(&mut tree, &entry, attach_to)? {
                        rejected.insert(entry.src_opid);
                        continue;
                    }
                    discovered.push(entry.src_opid);
                }

                if !tree.attach(attach_to, entry.src_opid) {
                    tree.diagnostics.report(Diagnostic::CycleSkipped {
                        map_id: entry.id,
                        src_opid: entry.src_opid,
                        attach_opid: attach_to,
                    });
                }
            }

            // Reverse so the first discovered child is expanded first
            for child in discovered.into_iter().rev() {
                let links = self.child_links(child, &mut tree.diagnostics)?;
                pending.push((child, links));
            }
        }

        tracing::debug!(
            "call tree for opid {}: {} operations, {} nodes, {} edges, {} diagnostics",
            root,
            tree.operations.len(),
            tree.node_count(),
            tree.edge_count(),
            tree.diagnostics.len()
        );

        Ok(tree)
    }

    /// Direct and fanned-out child links of `opid`, in store order
    ///
    /// Entries whose source is `opid` itself are reported and dropped.
    fn child_links(&self, opid: OpId, diagnostics: &mut Diagnostics) -> Result<Vec<MapEntry>> {
        let mut links = self.store.maps_by_dst_opid(opid)?;
        links.extend(self.store.maps_by_clr_opid(opid)?);
        links.sort_by_key(|m| m.id);
        links.dedup_by_key(|m| m.id);
        links.retain(|m| {
            if m.src_opid != opid {
                return true;
            }
            diagnostics.report(Diagnostic::CycleSkipped {
                map_id: m.id,
                src_opid: m.src_opid,
                attach_opid: opid,
            });
            false
        });
        Ok(links)
    }

    /// Create the node set for a newly discovered child
    fn add_child(&self, tree: &mut CallTree, entry: &MapEntry, parent: OpId) -> Result<bool> {
        let child = entry.src_opid;
        let span = match span::resolve(self.store, child)?.into_span(&mut tree.diagnostics) {
            Some(span) => span,
            None => return Ok(false),
        };
        let attrs = self.store.attributes_by_opid(child)?;
        let (intervals, metadata) = pair_intervals(child, &attrs, &mut tree.diagnostics);
        tree.add_operation(span, Some(parent), intervals, metadata);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(id: i64, time: Timestamp, name: &str) -> AttributeEvent {
        AttributeEvent {
            id,
            pid: 1,
            time,
            module: "kvs".to_string(),
            fn_tag: "kvs_get".to_string(),
            sm_tag: Some("KVS".to_string()),
            entity_type: "attribute".to_string(),
            opid: 1,
            attr_name: name.to_string(),
            attr_val: time.to_string(),
        }
    }

    #[test]
    fn test_pair_intervals_sequential() {
        let mut diags = Diagnostics::new();
        let attrs = vec![
            attr(1, 10, "kvs_get_attr_time_start"),
            attr(2, 25, "kvs_get_attr_time_end"),
            attr(3, 30, "read_count"),
            attr(4, 40, "m0_io_attr_time_start"),
            attr(5, 90, "m0_io_attr_time_end"),
        ];
        let (intervals, metadata) = pair_intervals(1, &attrs, &mut diags);

        assert!(diags.is_empty());
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].label, "kvs_get");
        assert_eq!(intervals[0].duration(), 15);
        assert_eq!(intervals[1].label, "m0_io");
        assert_eq!(intervals[1].duration(), 50);
        assert_eq!(metadata, vec![("read_count".to_string(), "30".to_string())]);
    }

    #[test]
    fn test_pair_intervals_orders_by_id() {
        let mut diags = Diagnostics::new();
        let attrs = vec![
            attr(2, 25, "attr_time_end"),
            attr(1, 10, "attr_time_start"),
        ];
        let (intervals, _) = pair_intervals(1, &attrs, &mut diags);
        assert!(diags.is_empty());
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].label, "interval 1");
    }

    #[test]
    fn test_pair_intervals_double_start() {
        let mut diags = Diagnostics::new();
        let attrs = vec![
            attr(1, 10, "a_attr_time_start"),
            attr(2, 20, "b_attr_time_start"),
            attr(3, 30, "b_attr_time_end"),
        ];
        let (intervals, _) = pair_intervals(1, &attrs, &mut diags);
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].label, "b");
        assert_eq!(
            diags.iter().next(),
            Some(&Diagnostic::UnmatchedIntervalStart {
                opid: 1,
                attr_id: 1,
                label: "a".to_string()
            })
        );
    }

    #[test]
    fn test_pair_intervals_orphaned_end_and_trailing_start() {
        let mut diags = Diagnostics::new();
        let attrs = vec![
            attr(1, 10, "a_attr_time_end"),
            attr(2, 20, "b_attr_time_start"),
        ];
        let (intervals, _) = pair_intervals(1, &attrs, &mut diags);
        assert!(intervals.is_empty());
        assert_eq!(diags.len(), 2);
        assert!(matches!(
            diags.iter().next(),
            Some(Diagnostic::OrphanedIntervalEnd { attr_id: 1, .. })
        ));
        assert!(matches!(
            diags.iter().nth(1),
            Some(Diagnostic::UnmatchedIntervalStart { attr_id: 2, .. })
        ));
    }

    #[test]
    fn test_pair_intervals_inverted() {
        let mut diags = Diagnostics::new();
        let attrs = vec![
            attr(1, 50, "x_attr_time_start"),
            attr(2, 20, "x_attr_time_end"),
        ];
        let (intervals, _) = pair_intervals(1, &attrs, &mut diags);
        assert!(intervals.is_empty());
        assert!(matches!(
            diags.iter().next(),
            Some(Diagnostic::InvertedInterval { start: 50, end: 20, .. })
        ));
    }
}
