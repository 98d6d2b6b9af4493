//! Perf-counter record schema
//!
//! The storage stack emits three kinds of rows into its perf-counter database.
//! This module defines their in-memory shape and the closed vocabularies
//! (`StateType`, nested interval markers) that the reconstruction code matches
//! on exactly.
//!
//! ```text
//! entity_states      opid transitions through init / finish
//! entity_attributes  key/value annotations on an opid
//! entity_maps        src_opid is a child of dst_opid, cleared under clr_opid
//! ```
//!
//! All three are read-only here. They are owned by the store and only ever
//! borrowed by the resolver, aggregator, call-tree builder and histogram code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operation identifier (SQLite INTEGER)
pub type OpId = i64;

/// Clock value in microseconds, one clock domain for the whole store
pub type Timestamp = i64;

/// Lifecycle state of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    Init,
    Finish,
}

impl StateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateType::Init => "init",
            StateType::Finish => "finish",
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(StateType::Init),
            "finish" => Ok(StateType::Finish),
            other => Err(format!("unknown state_type '{}'", other)),
        }
    }
}

/// One row of `entity_states`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEvent {
    pub id: i64,
    pub pid: i64,
    pub time: Timestamp,
    pub module: String,
    pub fn_tag: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sm_tag: Option<String>,
    pub entity_type: String,
    pub opid: OpId,
    pub state_type: StateType,
}

/// One row of `entity_attributes`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeEvent {
    pub id: i64,
    pub pid: i64,
    pub time: Timestamp,
    pub module: String,
    pub fn_tag: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sm_tag: Option<String>,
    pub entity_type: String,
    pub opid: OpId,
    pub attr_name: String,
    pub attr_val: String,
}

impl AttributeEvent {
    /// Nested interval marker carried by this attribute, if any
    pub fn interval_marker(&self) -> Option<IntervalMarker<'_>> {
        IntervalMarker::parse(&self.attr_name)
    }
}

/// One row of `entity_maps`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    pub id: i64,
    pub pid: i64,
    pub time: Timestamp,
    pub module: String,
    pub fn_tag: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sm_tag: Option<String>,
    pub entity_type: String,
    pub map_name: String,
    pub src_opid: OpId,
    pub dst_opid: OpId,
    pub clr_opid: OpId,
}

/// Attribute-name fragment opening a nested interval
pub const ATTR_TIME_START: &str = "attr_time_start";

/// Attribute-name fragment closing a nested interval
pub const ATTR_TIME_END: &str = "attr_time_end";

/// Which edge of a nested interval an attribute marks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalEdge {
    Start,
    End,
}

/// A parsed `*attr_time_start*` / `*attr_time_end*` attribute name
///
/// `label` is the attribute name with the marker fragment and any joining
/// underscores removed, e.g. `kvs_get_attr_time_start` has label `kvs_get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalMarker<'a> {
    pub edge: IntervalEdge,
    pub label: &'a str,
}

impl<'a> IntervalMarker<'a> {
    pub fn parse(attr_name: &'a str) -> Option<Self> {
        let (edge, pos, fragment) = if let Some(pos) = attr_name.find(ATTR_TIME_START) {
            (IntervalEdge::Start, pos, ATTR_TIME_START)
        } else if let Some(pos) = attr_name.find(ATTR_TIME_END) {
            (IntervalEdge::End, pos, ATTR_TIME_END)
        } else {
            return None;
        };

        let prefix = attr_name[..pos].trim_end_matches('_');
        let suffix = attr_name[pos + fragment.len()..].trim_start_matches('_');
        let label = if prefix.is_empty() { suffix } else { prefix };

        Some(Self { edge, label })
    }
}
