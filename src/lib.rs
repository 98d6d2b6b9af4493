//! perfc-trace - call-tree and latency breakdown reconstruction
//!
//! This library reads perf-counter events recorded by an instrumented storage
//! stack (state transitions, attributes and parent/child links per operation
//! id) and rebuilds per-operation spans, per-sub-module time breakdowns,
//! call trees with nested intervals and per-opid latency histograms.

pub mod aggregate;
pub mod call_tree;
pub mod category;
pub mod cli;
pub mod csv_output;
pub mod diagnostics;
pub mod dot_output;
pub mod error;
pub mod event;
pub mod histogram;
pub mod json_output;
pub mod span;
pub mod store;
pub mod svg_output;

pub use error::{ReconstructError, Result, StoreError};
