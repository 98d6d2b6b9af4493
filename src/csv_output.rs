//! CSV output format for histograms and breakdowns
//!
//! One row per opid, durations in microseconds with a `us` suffix the way the
//! text reports print them.

use crate::histogram::{BreakdownHistogram, Histogram};

/// Escape CSV field (handle commas, quotes, newlines)
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// `opid,duration` rows
pub fn histogram_to_csv(histogram: &Histogram) -> String {
    let mut output = String::from("opid,duration\n");
    for row in &histogram.rows {
        output.push_str(&format!("{},{}us\n", row.opid, row.duration));
    }
    output
}

/// `opid,total,<category>...,uncategorised` rows
pub fn breakdown_to_csv(histogram: &BreakdownHistogram) -> String {
    let mut header = vec!["opid".to_string(), "total".to_string()];
    header.extend(histogram.categories.iter().map(|c| escape_field(c)));
    header.push("uncategorised".to_string());

    let mut output = header.join(",");
    output.push('\n');

    for row in &histogram.rows {
        let mut fields = vec![
            row.total.opid.to_string(),
            format!("{}us", row.total.duration()),
        ];
        fields.extend(row.buckets.iter().map(|b| format!("{}us", b.duration)));
        fields.push(format!("{}us", row.uncategorised));
        output.push_str(&fields.join(","));
        output.push('\n');
    }

    output
}
