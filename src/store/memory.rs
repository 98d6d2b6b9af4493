//! Vector-backed event store
//!
//! Holds the three relations in memory and answers the same queries as the
//! SQLite backend. Rows may be pushed in any order; queries always return
//! them sorted by insertion id.

use super::{EventStore, FnTagPattern, OpSelection, StoreResult};
use crate::event::{AttributeEvent, MapEntry, OpId, StateEvent};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    states: Vec<StateEvent>,
    attributes: Vec<AttributeEvent>,
    maps: Vec<MapEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        states: Vec<StateEvent>,
        attributes: Vec<AttributeEvent>,
        maps: Vec<MapEntry>,
    ) -> Self {
        let mut store = Self {
            states,
            attributes,
            maps,
        };
        store.states.sort_by_key(|s| s.id);
        store.attributes.sort_by_key(|a| a.id);
        store.maps.sort_by_key(|m| m.id);
        store
    }

    pub fn push_state(&mut self, state: StateEvent) {
        let pos = self.states.partition_point(|s| s.id <= state.id);
        self.states.insert(pos, state);
    }

    pub fn push_attribute(&mut self, attr: AttributeEvent) {
        let pos = self.attributes.partition_point(|a| a.id <= attr.id);
        self.attributes.insert(pos, attr);
    }

    pub fn push_map(&mut self, map: MapEntry) {
        let pos = self.maps.partition_point(|m| m.id <= map.id);
        self.maps.insert(pos, map);
    }

    pub fn len(&self) -> usize {
        self.states.len() + self.attributes.len() + self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maps_where<F>(&self, pred: F) -> Vec<MapEntry>
    where
        F: Fn(&MapEntry) -> bool,
    {
        self.maps.iter().filter(|m| pred(m)).cloned().collect()
    }
}

impl EventStore for MemoryStore {
    fn states_by_opid(&self, opid: OpId) -> StoreResult<Vec<StateEvent>> {
        Ok(self
            .states
            .iter()
            .filter(|s| s.opid == opid)
            .cloned()
            .collect())
    }

    fn states_by_fn_tag(&self, fn_tag: &FnTagPattern) -> StoreResult<Vec<StateEvent>> {
        Ok(self
            .states
            .iter()
            .filter(|s| fn_tag.matches(&s.fn_tag))
            .cloned()
            .collect())
    }

    fn attributes_by_opid(&self, opid: OpId) -> StoreResult<Vec<AttributeEvent>> {
        Ok(self
            .attributes
            .iter()
            .filter(|a| a.opid == opid)
            .cloned()
            .collect())
    }

    fn maps_by_dst_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>> {
        Ok(self.maps_where(|m| m.dst_opid == opid))
    }

    fn maps_by_src_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>> {
        Ok(self.maps_where(|m| m.src_opid == opid))
    }

    fn maps_by_clr_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>> {
        Ok(self.maps_where(|m| m.clr_opid == opid))
    }

    fn distinct_opids_by_fn_tag(
        &self,
        fn_tag: &FnTagPattern,
        selection: OpSelection,
    ) -> StoreResult<Vec<OpId>> {
        let mut seen = HashSet::new();
        let ordered = self
            .states
            .iter()
            .filter(|s| fn_tag.matches(&s.fn_tag))
            .map(|s| s.opid)
            .filter(|opid| seen.insert(*opid));
        Ok(selection.apply(ordered))
    }
}
