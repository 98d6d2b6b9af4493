// Integration test utilities
//
// Builds perf-counter event sets in memory and optionally writes them to a
// SQLite database laid out like the dumper's output.

#![allow(dead_code)]

use anyhow::Result;
use perfc_trace::event::{AttributeEvent, MapEntry, OpId, StateEvent, StateType, Timestamp};
use perfc_trace::store::{MemoryStore, SCHEMA};
use rusqlite::{params, Connection};
use std::path::Path;

/// Event set under construction; ids are assigned in call order
#[derive(Debug, Default)]
pub struct Fixture {
    next_id: i64,
    pub states: Vec<StateEvent>,
    pub attributes: Vec<AttributeEvent>,
    pub maps: Vec<MapEntry>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn state(
        &mut self,
        opid: OpId,
        fn_tag: &str,
        sm_tag: Option<&str>,
        state_type: StateType,
        time: Timestamp,
    ) -> &mut Self {
        let id = self.id();
        self.states.push(StateEvent {
            id,
            pid: 4242,
            time,
            module: "cortxfs".to_string(),
            fn_tag: fn_tag.to_string(),
            sm_tag: sm_tag.map(str::to_string),
            entity_type: "state".to_string(),
            opid,
            state_type,
        });
        self
    }

    /// Matched init/finish pair
    pub fn op(
        &mut self,
        opid: OpId,
        fn_tag: &str,
        sm_tag: Option<&str>,
        start: Timestamp,
        end: Timestamp,
    ) -> &mut Self {
        self.state(opid, fn_tag, sm_tag, StateType::Init, start)
            .state(opid, fn_tag, sm_tag, StateType::Finish, end)
    }

    pub fn attr(&mut self, opid: OpId, name: &str, value: &str, time: Timestamp) -> &mut Self {
        let id = self.id();
        self.attributes.push(AttributeEvent {
            id,
            pid: 4242,
            time,
            module: "cortxfs".to_string(),
            fn_tag: "attr".to_string(),
            sm_tag: None,
            entity_type: "attribute".to_string(),
            opid,
            attr_name: name.to_string(),
            attr_val: value.to_string(),
        });
        self
    }

    pub fn map(&mut self, src: OpId, dst: OpId, clr: OpId, sm_tag: Option<&str>) -> &mut Self {
        let id = self.id();
        self.maps.push(MapEntry {
            id,
            pid: 4242,
            time: id,
            module: "cortxfs".to_string(),
            fn_tag: "map".to_string(),
            sm_tag: sm_tag.map(str::to_string),
            entity_type: "map".to_string(),
            map_name: "opid_map".to_string(),
            src_opid: src,
            dst_opid: dst,
            clr_opid: clr,
        });
        self
    }

    pub fn store(&self) -> MemoryStore {
        MemoryStore::from_parts(
            self.states.clone(),
            self.attributes.clone(),
            self.maps.clone(),
        )
    }

    /// Write the event set to a fresh SQLite database at `path`
    pub fn write_sqlite(&self, path: &Path) -> Result<()> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        for s in &self.states {
            conn.execute(
                "INSERT INTO entity_states (id, pid, time, tsdb_mod, fn_tag, sm_tag, entity_type, opid, state_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    s.id,
                    s.pid,
                    s.time,
                    s.module,
                    s.fn_tag,
                    s.sm_tag,
                    s.entity_type,
                    s.opid,
                    s.state_type.as_str()
                ],
            )?;
        }
        for a in &self.attributes {
            conn.execute(
                "INSERT INTO entity_attributes (id, pid, time, tsdb_mod, fn_tag, sm_tag, entity_type, opid, attr_name, attr_val)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    a.id,
                    a.pid,
                    a.time,
                    a.module,
                    a.fn_tag,
                    a.sm_tag,
                    a.entity_type,
                    a.opid,
                    a.attr_name,
                    a.attr_val
                ],
            )?;
        }
        for m in &self.maps {
            conn.execute(
                "INSERT INTO entity_maps (id, pid, time, tsdb_mod, fn_tag, sm_tag, entity_type, map_name, src_opid, dst_opid, clr_opid)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    m.id,
                    m.pid,
                    m.time,
                    m.module,
                    m.fn_tag,
                    m.sm_tag,
                    m.entity_type,
                    m.map_name,
                    m.src_opid,
                    m.dst_opid,
                    m.clr_opid
                ],
            )?;
        }
        Ok(())
    }
}

/// Three `read` operations: 100 (0→50), 101 (10→15), 102 with no finish
pub fn read_histogram_fixture() -> Fixture {
    let mut fx = Fixture::new();
    fx.op(100, "read", None, 0, 50)
        .op(101, "read", None, 10, 15)
        .state(102, "read", None, StateType::Init, 20);
    fx
}

/// A read request fanning out through CFS into KVS and DSAL
///
/// ```text
/// 100 read            0..100
///  └ 101 cfs_read     CFS   5..60
///     ├ 102 kvs_get   KVS  10..20   (cleared under 100)
///     └ 103 dsal_read DSAL 25..55   (cleared under 100)
/// ```
pub fn request_fixture() -> Fixture {
    let mut fx = Fixture::new();
    fx.op(100, "read", None, 0, 100)
        .op(101, "cfs_read", Some("CFS"), 5, 60)
        .op(102, "kvs_get", Some("KVS"), 10, 20)
        .op(103, "dsal_read", Some("DSAL"), 25, 55)
        .attr(100, "count", "4096", 1)
        .map(101, 100, 100, Some("CFS"))
        .map(102, 101, 100, Some("KVS"))
        .map(103, 101, 100, Some("DSAL"));
    fx
}
