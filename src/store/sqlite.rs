//! SQLite backend for the perf-counter database
//!
//! The storage stack dumps its counters into a SQLite file with three tables.
//! This backend opens that file read-only and issues one query per request;
//! it holds no locks between queries.

use super::{EventStore, FnTagPattern, OpSelection, StoreResult};
use crate::error::StoreError;
use crate::event::{AttributeEvent, MapEntry, OpId, StateEvent, StateType};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Table layout expected by [`SqliteStore`]
///
/// Columns are read by name, so extra columns or a different column order in
/// an existing database are fine.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entity_states (
    id INTEGER PRIMARY KEY,
    pid INTEGER NOT NULL,
    time INTEGER NOT NULL,
    tsdb_mod TEXT NOT NULL,
    fn_tag TEXT NOT NULL,
    sm_tag TEXT,
    entity_type TEXT NOT NULL,
    opid INTEGER NOT NULL,
    state_type TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS entity_attributes (
    id INTEGER PRIMARY KEY,
    pid INTEGER NOT NULL,
    time INTEGER NOT NULL,
    tsdb_mod TEXT NOT NULL,
    fn_tag TEXT NOT NULL,
    sm_tag TEXT,
    entity_type TEXT NOT NULL,
    opid INTEGER NOT NULL,
    attr_name TEXT NOT NULL,
    attr_val
);
CREATE TABLE IF NOT EXISTS entity_maps (
    id INTEGER PRIMARY KEY,
    pid INTEGER NOT NULL,
    time INTEGER NOT NULL,
    tsdb_mod TEXT NOT NULL,
    fn_tag TEXT NOT NULL,
    sm_tag TEXT,
    entity_type TEXT NOT NULL,
    map_name TEXT NOT NULL,
    src_opid INTEGER NOT NULL,
    dst_opid INTEGER NOT NULL,
    clr_opid INTEGER NOT NULL
);
"#;

/// Connection settings for [`SqliteStore`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Page cache size in KiB (default: 256 MiB, large dumps are scanned often)
    pub cache_size_kib: i64,

    /// How long to wait on a locked database before failing
    pub busy_timeout: Duration,

    /// Open without write access (default: true)
    pub read_only: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_size_kib: 256 * 1024,
            busy_timeout: Duration::from_secs(5),
            read_only: true,
        }
    }
}

/// Perf-counter database opened through `rusqlite`
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

struct RawState {
    event: StateEvent,
    state_type: String,
}

const STATE_COLUMNS: &str =
    "id, pid, time, tsdb_mod, fn_tag, sm_tag, entity_type, opid, state_type";
const ATTR_COLUMNS: &str =
    "id, pid, time, tsdb_mod, fn_tag, sm_tag, entity_type, opid, attr_name, attr_val";
const MAP_COLUMNS: &str =
    "id, pid, time, tsdb_mod, fn_tag, sm_tag, entity_type, map_name, src_opid, dst_opid, clr_opid";

impl SqliteStore {
    /// Open an existing perf-counter database
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> StoreResult<Self> {
        let path = path.as_ref();
        let flags = if config.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };

        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update(None, "cache_size", -config.cache_size_kib)?;
        if config.read_only {
            conn.pragma_update(None, "query_only", true)?;
        }

        tracing::debug!(
            "opened perf database {} (cache {} KiB, read_only={})",
            path.display(),
            config.cache_size_kib,
            config.read_only
        );

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Path of the underlying database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn query_states<P: rusqlite::Params>(&self, clause: &str, params: P) -> StoreResult<Vec<StateEvent>> {
        let sql = format!(
            "SELECT {} FROM entity_states WHERE {} ORDER BY id ASC",
            STATE_COLUMNS, clause
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_map(params, read_state)?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|r| {
                let state_type: StateType =
                    r.state_type.parse().map_err(|reason| StoreError::InvalidRow {
                        table: "entity_states",
                        id: r.event.id,
                        reason,
                    })?;
                Ok(StateEvent {
                    state_type,
                    ..r.event
                })
            })
            .collect()
    }

    fn query_maps(&self, column: &str, opid: OpId) -> StoreResult<Vec<MapEntry>> {
        let sql = format!(
            "SELECT {} FROM entity_maps WHERE {} = ?1 ORDER BY id ASC",
            MAP_COLUMNS, column
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let maps = stmt
            .query_map(params![opid], read_map)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(maps)
    }
}

fn read_state(row: &Row) -> rusqlite::Result<RawState> {
    Ok(RawState {
        event: StateEvent {
            id: row.get("id")?,
            pid: row.get("pid")?,
            time: row.get("time")?,
            module: row.get("tsdb_mod")?,
            fn_tag: row.get("fn_tag")?,
            sm_tag: row.get("sm_tag")?,
            entity_type: row.get("entity_type")?,
            opid: row.get("opid")?,
            // Placeholder until the raw text is validated
            state_type: StateType::Init,
        },
        state_type: row.get("state_type")?,
    })
}

fn read_attribute(row: &Row) -> rusqlite::Result<AttributeEvent> {
    let attr_val = match row.get::<_, Value>("attr_val")? {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
    };

    Ok(AttributeEvent {
        id: row.get("id")?,
        pid: row.get("pid")?,
        time: row.get("time")?,
        module: row.get("tsdb_mod")?,
        fn_tag: row.get("fn_tag")?,
        sm_tag: row.get("sm_tag")?,
        entity_type: row.get("entity_type")?,
        opid: row.get("opid")?,
        attr_name: row.get("attr_name")?,
        attr_val,
    })
}

fn read_map(row: &Row) -> rusqlite::Result<MapEntry> {
    Ok(MapEntry {
        id: row.get("id")?,
        pid: row.get("pid")?,
        time: row.get("time")?,
        module: row.get("tsdb_mod")?,
        fn_tag: row.get("fn_tag")?,
        sm_tag: row.get("sm_tag")?,
        entity_type: row.get("entity_type")?,
        map_name: row.get("map_name")?,
        src_opid: row.get("src_opid")?,
        dst_opid: row.get("dst_opid")?,
        clr_opid: row.get("clr_opid")?,
    })
}

impl EventStore for SqliteStore {
    fn states_by_opid(&self, opid: OpId) -> StoreResult<Vec<StateEvent>> {
        self.query_states("opid = ?1", params![opid])
    }

    fn states_by_fn_tag(&self, fn_tag: &FnTagPattern) -> StoreResult<Vec<StateEvent>> {
        self.query_states("fn_tag LIKE ?1", params![fn_tag.as_str()])
    }

    fn attributes_by_opid(&self, opid: OpId) -> StoreResult<Vec<AttributeEvent>> {
        let sql = format!(
            "SELECT {} FROM entity_attributes WHERE opid = ?1 ORDER BY id ASC",
            ATTR_COLUMNS
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let attrs = stmt
            .query_map(params![opid], read_attribute)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(attrs)
    }

    fn maps_by_dst_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>> {
        self.query_maps("dst_opid", opid)
    }

    fn maps_by_src_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>> {
        self.query_maps("src_opid", opid)
    }

    fn maps_by_clr_opid(&self, opid: OpId) -> StoreResult<Vec<MapEntry>> {
        self.query_maps("clr_opid", opid)
    }

    fn distinct_opids_by_fn_tag(
        &self,
        fn_tag: &FnTagPattern,
        selection: OpSelection,
    ) -> StoreResult<Vec<OpId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT opid FROM entity_states WHERE fn_tag LIKE ?1 \
             GROUP BY opid ORDER BY MIN(id) ASC",
        )?;
        let ordered = stmt
            .query_map(params![fn_tag.as_str()], |row| row.get::<_, OpId>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let opids = selection.apply(ordered);
        tracing::debug!(
            "fn_tag '{}': {} opids selected ({:?})",
            fn_tag.as_str(),
            opids.len(),
            selection
        );
        Ok(opids)
    }
}
