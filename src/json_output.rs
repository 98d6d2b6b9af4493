//! JSON output format for reconstruction results
//!
//! Every document carries the crate version and the `perfc-trace-json-v1`
//! format tag, followed by a `kind` discriminator and the result itself.

use crate::aggregate::CategoryBreakdown;
use crate::call_tree::CallTree;
use crate::diagnostics::Diagnostics;
use crate::histogram::{BreakdownHistogram, Histogram, HistogramSummary};
use serde::Serialize;

/// Format name written into every document
pub const FORMAT: &str = "perfc-trace-json-v1";

/// Result payload, tagged by `kind`
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JsonReport<'a> {
    Histogram {
        histogram: &'a Histogram,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<HistogramSummary>,
    },
    BreakdownHistogram {
        histogram: &'a BreakdownHistogram,
    },
    Breakdown {
        breakdown: &'a CategoryBreakdown,
        diagnostics: &'a Diagnostics,
    },
    CallTree {
        tree: &'a CallTree,
    },
}

/// Root JSON output structure
#[derive(Debug, Serialize)]
pub struct JsonOutput<'a> {
    /// Format version identifier
    pub version: &'static str,
    /// Format name
    pub format: &'static str,
    #[serde(flatten)]
    pub report: JsonReport<'a>,
}

impl<'a> JsonOutput<'a> {
    fn new(report: JsonReport<'a>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            format: FORMAT,
            report,
        }
    }

    pub fn histogram(histogram: &'a Histogram) -> Self {
        Self::new(JsonReport::Histogram {
            histogram,
            summary: histogram.summary(),
        })
    }

    pub fn breakdown_histogram(histogram: &'a BreakdownHistogram) -> Self {
        Self::new(JsonReport::BreakdownHistogram { histogram })
    }

    pub fn breakdown(breakdown: &'a CategoryBreakdown, diagnostics: &'a Diagnostics) -> Self {
        Self::new(JsonReport::Breakdown {
            breakdown,
            diagnostics,
        })
    }

    pub fn call_tree(tree: &'a CallTree) -> Self {
        Self::new(JsonReport::CallTree { tree })
    }

    /// Pretty-printed document
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
