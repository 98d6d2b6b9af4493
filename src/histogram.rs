//! Histogram Extractor
//!
//! Per-operation latency for every operation of one `fn_tag`, the data behind
//! the "time per opid" bar chart.
//!
//! Selection runs in store order (first appearance of each opid), skips
//! forward to `start_opid`, and stops after `limit` ids. Incomplete spans are
//! reported and left out, so the output may be shorter than the selection.
//! Sorting by duration is stable: equal durations keep selection order.
//!
//! State rows for the whole selection are fetched with one `fn_tag` query and
//! grouped by opid. An opid whose matching rows do not resolve is re-read in
//! full by opid before it is reported as incomplete.

use crate::aggregate::{CategoryAggregator, CategoryBreakdown};
use crate::category::CategoryTable;
use crate::diagnostics::Diagnostics;
use crate::error::{ReconstructError, Result};
use crate::event::{OpId, StateEvent};
use crate::span::{self, Resolution};
use crate::store::{EventStore, FnTagPattern, OpSelection};
use clap::ValueEnum;
use serde::Serialize;
use std::collections::HashMap;

/// Order of histogram rows by duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Shortest first
    Asc,
    /// Longest first
    Desc,
}

/// What to extract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramOptions {
    /// `LIKE` pattern selecting operations
    pub fn_tag: String,
    /// Select exactly this opid (must match `fn_tag`)
    pub filter_opid: Option<OpId>,
    /// Skip forward to the first opid >= this one
    pub start_opid: Option<OpId>,
    /// Cap on selected opids, `None` for unbounded
    pub limit: Option<usize>,
    pub sort: Option<SortOrder>,
    /// Per-category breakdown instead of plain durations
    pub breakdown: bool,
}

impl HistogramOptions {
    pub fn new(fn_tag: impl Into<String>) -> Self {
        Self {
            fn_tag: fn_tag.into(),
            filter_opid: None,
            start_opid: None,
            limit: None,
            sort: None,
            breakdown: false,
        }
    }

    pub fn with_filter(mut self, opid: OpId) -> Self {
        self.filter_opid = Some(opid);
        self
    }

    pub fn with_start(mut self, opid: OpId) -> Self {
        self.start_opid = Some(opid);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_breakdown(mut self) -> Self {
        self.breakdown = true;
        self
    }

    /// Reject option combinations that cannot be honoured together
    ///
    /// # Errors
    /// `ConflictingOptions` when sorting is combined with a category breakdown.
    pub fn validate(&self) -> Result<()> {
        if self.breakdown && self.sort.is_some() {
            return Err(ReconstructError::ConflictingOptions(
                "sort order cannot be combined with a sub-module breakdown".to_string(),
            ));
        }
        Ok(())
    }

    fn selection(&self) -> OpSelection {
        OpSelection {
            start_opid: self.start_opid,
            limit: self.limit,
        }
    }
}

/// One bar of the histogram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistogramRow {
    pub opid: OpId,
    pub duration: i64,
}

/// Distribution summary over the extracted durations
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: usize,
    pub total: i64,
    pub min: i64,
    pub max: i64,
    pub mean: f64,
    pub p50: i64,
    pub p95: i64,
    pub p99: i64,
}

/// Durations per opid for one fn_tag
#[derive(Debug, Clone, Serialize)]
pub struct Histogram {
    pub fn_tag: String,
    /// Number of opids selected before incomplete ones were dropped
    pub selected: usize,
    pub rows: Vec<HistogramRow>,
    pub diagnostics: Diagnostics,
}

impl Histogram {
    /// `(label, duration)` pairs for bar-chart renderers
    pub fn as_pairs(&self) -> Vec<(String, i64)> {
        self.rows
            .iter()
            .map(|r| (r.opid.to_string(), r.duration))
            .collect()
    }

    /// Nearest-rank summary, `None` when no row survived
    pub fn summary(&self) -> Option<HistogramSummary> {
        if self.rows.is_empty() {
            return None;
        }

        let mut sorted: Vec<i64> = self.rows.iter().map(|r| r.duration).collect();
        sorted.sort_unstable();
        let total: i64 = sorted.iter().sum();
        let count = sorted.len();

        Some(HistogramSummary {
            count,
            total,
            min: sorted[0],
            max: sorted[count - 1],
            mean: total as f64 / count as f64,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        })
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice
fn percentile(sorted: &[i64], pct: f64) -> i64 {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Category breakdown per opid for one fn_tag
#[derive(Debug, Clone, Serialize)]
pub struct BreakdownHistogram {
    pub fn_tag: String,
    pub selected: usize,
    pub categories: Vec<String>,
    pub rows: Vec<CategoryBreakdown>,
    pub diagnostics: Diagnostics,
}

/// Resolve the opids selected by `options`
fn select<S: EventStore + ?Sized>(
    store: &S,
    pattern: &FnTagPattern,
    options: &HistogramOptions,
) -> Result<Vec<OpId>> {
    let opids = match options.filter_opid {
        Some(opid) => {
            let states = store.states_by_opid(opid)?;
            if !states.iter().any(|s| pattern.matches(&s.fn_tag)) {
                return Err(ReconstructError::insufficient(
                    format!("opid {}", opid),
                    format!("no states with fn_tag matching '{}'", options.fn_tag),
                ));
            }
            vec![opid]
        }
        None => store.distinct_opids_by_fn_tag(pattern, options.selection())?,
    };

    if opids.is_empty() {
        return Err(ReconstructError::insufficient(
            format!("fn_tag '{}'", options.fn_tag),
            "no operations selected",
        ));
    }
    Ok(opids)
}

fn group_by_opid(states: Vec<StateEvent>) -> HashMap<OpId, Vec<StateEvent>> {
    let mut grouped: HashMap<OpId, Vec<StateEvent>> = HashMap::new();
    for state in states {
        grouped.entry(state.opid).or_default().push(state);
    }
    grouped
}

/// Extract `(opid, duration)` rows
///
/// # Errors
/// - `ConflictingOptions` if `options` fail [`HistogramOptions::validate`]
/// - `InsufficientData` if nothing matches `fn_tag` / `filter_opid`
/// - `Store` if a query fails
pub fn extract<S: EventStore + ?Sized>(store: &S, options: &HistogramOptions) -> Result<Histogram> {
    options.validate()?;
    let pattern = FnTagPattern::new(&options.fn_tag)?;
    let opids = select(store, &pattern, options)?;
    let mut batch = group_by_opid(store.states_by_fn_tag(&pattern)?);
    let mut diagnostics = Diagnostics::new();

    let mut rows = Vec::with_capacity(opids.len());
    for &opid in &opids {
        let resolution = match batch.remove(&opid) {
            Some(states) => match span::resolve_events(opid, &states) {
                complete @ Resolution::Complete(_) => complete,
                Resolution::Incomplete(_) => span::resolve(store, opid)?,
            },
            None => span::resolve(store, opid)?,
        };
        if let Some(span) = resolution.into_span(&mut diagnostics) {
            rows.push(HistogramRow {
                opid,
                duration: span.duration(),
            });
        }
    }

    match options.sort {
        Some(SortOrder::Asc) => rows.sort_by(|a, b| a.duration.cmp(&b.duration)),
        Some(SortOrder::Desc) => rows.sort_by(|a, b| b.duration.cmp(&a.duration)),
        None => {}
    }

    tracing::debug!(
        "histogram '{}': {} selected, {} complete",
        options.fn_tag,
        opids.len(),
        rows.len()
    );

    Ok(Histogram {
        fn_tag: options.fn_tag.clone(),
        selected: opids.len(),
        rows,
        diagnostics,
    })
}

/// Extract a per-category breakdown for every selected opid
///
/// # Errors
/// Same as [`extract`].
pub fn extract_breakdown<S: EventStore + ?Sized>(
    store: &S,
    options: &HistogramOptions,
    table: &CategoryTable,
) -> Result<BreakdownHistogram> {
    options.validate()?;
    let pattern = FnTagPattern::new(&options.fn_tag)?;
    let opids = select(store, &pattern, options)?;
    let aggregator = CategoryAggregator::new(store, table);
    let mut diagnostics = Diagnostics::new();

    let mut rows = Vec::with_capacity(opids.len());
    for &opid in &opids {
        if let Some(breakdown) = aggregator.aggregate(opid, &mut diagnostics)? {
            rows.push(breakdown);
        }
    }

    Ok(BreakdownHistogram {
        fn_tag: options.fn_tag.clone(),
        selected: opids.len(),
        categories: table.names().map(str::to_string).collect(),
        rows,
        diagnostics,
    })
}
