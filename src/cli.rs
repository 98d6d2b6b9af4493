//! CLI argument parsing for perfc-trace

use crate::event::OpId;
use crate::histogram::{HistogramOptions, SortOrder};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Default database file written by the perf-counter dumper
pub const DEFAULT_DB: &str = "cortxfs_perfc.db";

/// Output format for reports printed to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// CSV format for spreadsheet analysis
    Csv,
}

#[derive(Parser, Debug)]
#[command(name = "perfc-trace")]
#[command(version)]
#[command(
    about = "Reconstruct call trees and latency breakdowns from perf-counter databases",
    long_about = None
)]
pub struct Cli {
    /// Perf-counter database to read
    #[arg(short = 'd', long = "db", value_name = "DB", default_value = DEFAULT_DB, global = true)]
    pub db: PathBuf,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Time per opid for one fn_tag, optionally broken down by sub-module
    Hist(HistArgs),
    /// Call tree of one request
    Req(ReqArgs),
    /// Sub-module time breakdown of one request
    Breakdown(BreakdownArgs),
}

#[derive(Args, Debug)]
pub struct HistArgs {
    /// fn_tag to select (SQL LIKE pattern: % and _ are wildcards)
    #[arg(value_name = "FN_TAG")]
    pub fn_tag: String,

    /// Only this opid (must carry FN_TAG)
    #[arg(long = "opid", value_name = "OPID")]
    pub opid: Option<OpId>,

    /// Skip forward to the first opid >= this one
    #[arg(long = "start-opid", value_name = "OPID")]
    pub start_opid: Option<OpId>,

    /// Maximum number of opids (0 = unbounded)
    #[arg(short = 'n', long = "limit", value_name = "N", default_value = "0")]
    pub limit: usize,

    /// Sort bars by duration
    #[arg(long = "sort", value_enum, value_name = "ORDER")]
    pub sort: Option<SortOrder>,

    /// Stack sub-module time per opid instead of plain durations
    #[arg(long = "sm-breakdown")]
    pub sm_breakdown: bool,

    /// Category table (TOML) used with --sm-breakdown
    #[arg(long = "categories", value_name = "FILE")]
    pub categories: Option<PathBuf>,

    /// Write an SVG bar chart to this file
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (text, json or csv)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl HistArgs {
    /// Translate flags into extraction options
    pub fn options(&self) -> HistogramOptions {
        let mut options = HistogramOptions::new(self.fn_tag.clone());
        options.filter_opid = self.opid;
        options.start_opid = self.start_opid;
        options.limit = (self.limit > 0).then_some(self.limit);
        options.sort = self.sort;
        options.breakdown = self.sm_breakdown;
        options
    }
}

#[derive(Args, Debug)]
pub struct ReqArgs {
    /// Root operation id
    #[arg(value_name = "OPID")]
    pub opid: OpId,

    /// Write the tree as Graphviz DOT to this file (render with `dot -Tpng`)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (text or json; csv is not available for trees)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct BreakdownArgs {
    /// Root operation id
    #[arg(value_name = "OPID")]
    pub opid: OpId,

    /// Category table (TOML) replacing the built-in one
    #[arg(long = "categories", value_name = "FILE")]
    pub categories: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}
