use anyhow::{Context, Result};
use clap::Parser;
use perfc_trace::aggregate::{CategoryAggregator, CategoryBreakdown};
use perfc_trace::call_tree::{CallTree, CallTreeBuilder};
use perfc_trace::category::CategoryTable;
use perfc_trace::cli::{BreakdownArgs, Cli, Command, HistArgs, OutputFormat, ReqArgs};
use perfc_trace::diagnostics::Diagnostics;
use perfc_trace::histogram::{self, BreakdownHistogram, Histogram};
use perfc_trace::json_output::JsonOutput;
use perfc_trace::store::{SqliteStore, StoreConfig};
use perfc_trace::{csv_output, dot_output, svg_output, ReconstructError};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn open_store(db: &Path) -> Result<SqliteStore> {
    SqliteStore::open(db, &StoreConfig::default())
        .with_context(|| format!("Failed to open perf-counter database {}", db.display()))
}

fn load_categories(path: Option<&PathBuf>) -> Result<CategoryTable> {
    match path {
        Some(path) => CategoryTable::from_toml(path),
        None => CategoryTable::default_table(),
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    eprintln!("Wrote {}", path.display());
    Ok(())
}

/// Print diagnostics to stderr followed by a summary count
fn report_diagnostics(diagnostics: &Diagnostics) {
    if diagnostics.is_empty() {
        return;
    }
    for diagnostic in diagnostics {
        eprintln!("warning: {}", diagnostic);
    }
    eprintln!(
        "{} diagnostic(s), {} sample(s) discarded",
        diagnostics.len(),
        diagnostics.skipped_spans()
    );
}

fn print_histogram_text(hist: &Histogram) {
    println!("{} time per opid", hist.fn_tag);
    println!("─────────────────────────────────────────");
    println!("{:>12} {:>14}", "opid", "time (us)");
    for row in &hist.rows {
        println!("{:>12} {:>14}", row.opid, row.duration);
    }
    println!("─────────────────────────────────────────");
    println!(
        "{} of {} selected opid(s) complete",
        hist.rows.len(),
        hist.selected
    );
    if let Some(summary) = hist.summary() {
        println!(
            "min {} us, max {} us, mean {:.1} us, p50 {} us, p95 {} us, p99 {} us",
            summary.min, summary.max, summary.mean, summary.p50, summary.p95, summary.p99
        );
    }
}

fn print_breakdown_rows_text(hist: &BreakdownHistogram) {
    println!("{} sub-module time per opid (us)", hist.fn_tag);
    println!("─────────────────────────────────────────");
    let mut header = format!("{:>12} {:>10}", "opid", "total");
    for name in &hist.categories {
        header.push_str(&format!(" {:>8}", name));
    }
    header.push_str(&format!(" {:>8}", "other"));
    println!("{}", header);

    for row in &hist.rows {
        let mut line = format!("{:>12} {:>10}", row.total.opid, row.total.duration());
        for bucket in &row.buckets {
            line.push_str(&format!(" {:>8}", bucket.duration));
        }
        line.push_str(&format!(" {:>8}", row.uncategorised));
        println!("{}", line);
    }
    println!("─────────────────────────────────────────");
    println!(
        "{} of {} selected opid(s) complete",
        hist.rows.len(),
        hist.selected
    );
}

fn print_breakdown_text(breakdown: &CategoryBreakdown) {
    let total = &breakdown.total;
    println!(
        "opid {} ({}): {} us",
        total.opid,
        total.fn_tag,
        total.duration()
    );
    println!("─────────────────────────────────────────");
    for bucket in &breakdown.buckets {
        println!(
            "{:<12} {:>10} us  ({} contributor(s))",
            bucket.name, bucket.duration, bucket.contributors
        );
    }
    println!("{:<12} {:>10} us", "uncategorised", breakdown.uncategorised);
}

fn print_tree_text(tree: &CallTree) {
    fn walk(tree: &CallTree, opid: i64, depth: usize) {
        if let Some(op) = tree.operation(opid) {
            println!(
                "{:indent$}{} [{}] {} us",
                "",
                op.span.fn_tag,
                op.span.opid,
                op.span.duration(),
                indent = depth * 2
            );
            for interval in op.intervals.iter().filter_map(|&id| tree.node(id)) {
                println!(
                    "{:indent$}- {} {} us",
                    "",
                    interval.label,
                    interval.duration(),
                    indent = depth * 2 + 2
                );
            }
        }
        for child in tree.children_of(opid) {
            walk(tree, child, depth + 1);
        }
    }

    walk(tree, tree.root(), 0);
    println!("─────────────────────────────────────────");
    println!(
        "{} operation(s), {} node(s), {} edge(s)",
        tree.operations().len(),
        tree.node_count(),
        tree.edge_count()
    );
}

fn run_hist(db: &Path, args: &HistArgs) -> Result<()> {
    let options = args.options();
    // Reject conflicting flags before touching the database
    options.validate()?;
    let store = open_store(db)?;

    if options.breakdown {
        let table = load_categories(args.categories.as_ref())?;
        let hist = histogram::extract_breakdown(&store, &options, &table)?;
        match args.format {
            OutputFormat::Text => print_breakdown_rows_text(&hist),
            OutputFormat::Json => println!("{}", JsonOutput::breakdown_histogram(&hist).to_json()?),
            OutputFormat::Csv => print!("{}", csv_output::breakdown_to_csv(&hist)),
        }
        if let Some(path) = &args.output {
            write_file(path, &svg_output::render_breakdown(&hist))?;
        }
        report_diagnostics(&hist.diagnostics);
    } else {
        let hist = histogram::extract(&store, &options)?;
        match args.format {
            OutputFormat::Text => print_histogram_text(&hist),
            OutputFormat::Json => println!("{}", JsonOutput::histogram(&hist).to_json()?),
            OutputFormat::Csv => print!("{}", csv_output::histogram_to_csv(&hist)),
        }
        if let Some(path) = &args.output {
            write_file(path, &svg_output::render_histogram(&hist))?;
        }
        report_diagnostics(&hist.diagnostics);
    }
    Ok(())
}

fn run_req(db: &Path, args: &ReqArgs) -> Result<()> {
    if args.format == OutputFormat::Csv {
        anyhow::bail!("CSV output is not available for call trees; use text or json");
    }
    let store = open_store(db)?;
    let tree = CallTreeBuilder::new(&store).build(args.opid)?;

    match args.format {
        OutputFormat::Json => println!("{}", JsonOutput::call_tree(&tree).to_json()?),
        _ => print_tree_text(&tree),
    }
    if let Some(path) = &args.output {
        write_file(path, &dot_output::render_call_tree(&tree))?;
    }
    report_diagnostics(tree.diagnostics());
    Ok(())
}

fn run_breakdown(db: &Path, args: &BreakdownArgs) -> Result<()> {
    if args.format == OutputFormat::Csv {
        anyhow::bail!("CSV output is not available for a single breakdown; use `hist --sm-breakdown`");
    }
    let table = load_categories(args.categories.as_ref())?;
    let store = open_store(db)?;
    let mut diagnostics = Diagnostics::new();

    let breakdown = CategoryAggregator::new(&store, &table)
        .aggregate(args.opid, &mut diagnostics)?
        .ok_or_else(|| {
            let detail = diagnostics
                .iter()
                .find(|d| d.opid() == args.opid)
                .map(|d| d.to_string())
                .unwrap_or_else(|| "no complete span".to_string());
            ReconstructError::insufficient(format!("opid {}", args.opid), detail)
        })?;

    match args.format {
        OutputFormat::Json => println!("{}", JsonOutput::breakdown(&breakdown, &diagnostics).to_json()?),
        _ => print_breakdown_text(&breakdown),
    }
    report_diagnostics(&diagnostics);
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match &args.command {
        Command::Hist(hist) => run_hist(&args.db, hist),
        Command::Req(req) => run_req(&args.db, req),
        Command::Breakdown(breakdown) => run_breakdown(&args.db, breakdown),
    }
}
