//! Event Store Adapter
//!
//! Read-only query surface over the three perf-counter relations. The
//! reconstruction code is written against the [`EventStore`] trait so it can
//! run on the SQLite database produced by the storage stack or on an
//! in-memory table (tests, benches, embedding).
//!
//! Every method returns rows in ascending insertion id order. Implementations
//! never retry: a failed query is surfaced as a [`StoreError`].

mod memory;
mod pattern;
mod sqlite;

pub use memory::MemoryStore;
pub use pattern::FnTagPattern;
pub use sqlite::{SqliteStore, StoreConfig, SCHEMA};

use crate::error::StoreError;
use crate::event::{AttributeEvent, MapEntry, OpId, StateEvent};

/// Result type for store queries
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Window over the ordered list of opids for one fn_tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpSelection {
    /// Skip forward to the first opid greater than or equal to this one
    pub start_opid: Option<OpId>,
    /// Maximum number of opids, `None` for no limit
    pub limit: Option<usize>,
}

impl OpSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_start(mut self, start_opid: OpId) -> Self {
        self.start_opid = Some(start_opid);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply the window to opids already in insertion order
    pub fn apply<I>(&self, ordered: I) -> Vec<OpId>
    where
        I: IntoIterator<Item = OpId>,
    {
        let start = self.start_opid;
        let skipped = ordered
            .into_iter()
            .skip_while(|&opid| start.is_some_and(|s| opid < s));

        match self.limit {
            Some(limit) => skipped.take(limit).collect(),
            None => skipped.collect(),
        }
    }
}

/// Read-only access to the perf-counter relations
pub trait EventStore {
    /// All `entity_states` rows for one operation
    fn states_by_opid(&self, opid: OpId) -> StoreResult<Vec<StateEvent>>;

    /// All `entity_states` rows whose fn_tag matches the pattern
    fn states_by_fn_tag(&self, fn_tag: &FnTagPattern) -> StoreResult<Vec<StateEvent>>;

    /// All `entity_attributes` rows for one operation
    fn attributes_by_opid(&self, opid: OpId) -> StoreResult<Vec<AttributeEvent>>;

    /// Map entries naming `opid` as the direct parent
    fn maps_by_dst_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>>;

    /// Map entries naming `opid` as the child
    fn maps_by_src_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>>;

    /// Map entries cleared under `opid`
    fn maps_by_clr_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>>;

    /// Distinct opids with a state row matching `fn_tag`, ordered by first
    /// appearance, windowed by `selection`
    fn distinct_opids_by_fn_tag(
        &self,
        fn_tag: &FnTagPattern,
        selection: OpSelection,
    ) -> StoreResult<Vec<OpId>>;
}

impl<S: EventStore + ?Sized> EventStore for &S {
    fn states_by_opid(&self, opid: OpId) -> StoreResult<Vec<StateEvent>> {
        (**self).states_by_opid(opid)
    }

    fn states_by_fn_tag(&self, fn_tag: &FnTagPattern) -> StoreResult<Vec<StateEvent>> {
        (**self).states_by_fn_tag(fn_tag)
    }

    fn attributes_by_opid(&self, opid: OpId) -> StoreResult<Vec<AttributeEvent>> {
        (**self).attributes_by_opid(opid)
    }

    fn maps_by_dst_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>> {
        (**self).maps_by_dst_opid(opid)
    }

    fn maps_by_src_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>> {
        (**self).maps_by_src_opid(opid)
    }

    fn maps_by_clr_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>> {
        (**self).maps_by_clr_opid(opid)
    }

    fn distinct_opids_by_fn_tag(
        &self,
        fn_tag: &FnTagPattern,
        selection: OpSelection,
    ) -> StoreResult<Vec<OpId>> {
        (**self).distinct_opids_by_fn_tag(fn_tag, selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_all() {
        assert_eq!(OpSelection::all().apply(vec![5, 3, 9]), vec![5, 3, 9]);
    }

    #[test]
    fn test_selection_skips_forward_to_start() {
        // Skipping stops at the first opid >= start; later smaller ids stay
        let sel = OpSelection::all().with_start(4);
        assert_eq!(sel.apply(vec![1, 3, 5, 2, 8]), vec![5, 2, 8]);
    }

    #[test]
    fn test_selection_limit() {
        let sel = OpSelection::all().with_limit(2);
        assert_eq!(sel.apply(vec![1, 2, 3]), vec![1, 2]);
    }

    #[test]
    fn test_selection_start_and_limit() {
        let sel = OpSelection::all().with_start(2).with_limit(2);
        assert_eq!(sel.apply(vec![1, 2, 3, 4]), vec![2, 3]);
    }

    #[test]
    fn test_selection_start_past_end() {
        let sel = OpSelection::all().with_start(100);
        assert!(sel.apply(vec![1, 2, 3]).is_empty());
    }
}
