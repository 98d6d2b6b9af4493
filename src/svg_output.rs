//! SVG bar charts
//!
//! Histograms render as one red bar per opid; breakdowns render as stacked
//! bars, one colour per category. The chart is self-contained SVG with the
//! opid labels rotated under the x axis and time (us) on the y axis.

use crate::histogram::{BreakdownHistogram, Histogram};

const WIDTH_PER_BAR: f64 = 18.0;
const MIN_WIDTH: f64 = 320.0;
const HEIGHT: f64 = 360.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;

/// Fill colours for stacked categories, cycled when there are more buckets
const PALETTE: [&str; 8] = [
    "#d62728", "#1f77b4", "#2ca02c", "#ff7f0e", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
];

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

struct Chart {
    body: String,
    width: f64,
    plot_height: f64,
    y_max: i64,
    bars: usize,
}

impl Chart {
    fn new(bars: usize, y_max: i64) -> Self {
        let width = (MARGIN_LEFT + MARGIN_RIGHT + bars as f64 * WIDTH_PER_BAR).max(MIN_WIDTH);
        Self {
            body: String::new(),
            width,
            plot_height: HEIGHT - MARGIN_TOP - MARGIN_BOTTOM,
            y_max: y_max.max(1),
            bars,
        }
    }

    fn slot_width(&self) -> f64 {
        (self.width - MARGIN_LEFT - MARGIN_RIGHT) / self.bars.max(1) as f64
    }

    fn scale(&self, value: i64) -> f64 {
        value.max(0) as f64 / self.y_max as f64 * self.plot_height
    }

    /// Draw a bar segment in slot `index` from `base` up by `value`
    fn bar(&mut self, index: usize, base: i64, value: i64, fill: &str, title: &str) {
        let slot = self.slot_width();
        let x = MARGIN_LEFT + index as f64 * slot + slot * 0.15;
        let h = self.scale(value);
        let y = MARGIN_TOP + self.plot_height - self.scale(base) - h;
        self.body.push_str(&format!(
            "  <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"{}\"><title>{}</title></rect>\n",
            x,
            y,
            slot * 0.7,
            h,
            fill,
            escape_xml(title)
        ));
    }

    fn x_label(&mut self, index: usize, text: &str) {
        let slot = self.slot_width();
        let x = MARGIN_LEFT + (index as f64 + 0.5) * slot;
        let y = MARGIN_TOP + self.plot_height + 8.0;
        self.body.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"8\" text-anchor=\"end\" transform=\"rotate(-90 {:.1} {:.1})\">{}</text>\n",
            x, y, x, y, escape_xml(text)
        ));
    }

    fn finish(self, title: &str, x_title: &str, legend: &[(String, &str)]) -> String {
        let bottom = MARGIN_TOP + self.plot_height;
        let mut out = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{:.0}\" height=\"{:.0}\" viewBox=\"0 0 {:.0} {:.0}\">\n",
            self.width, HEIGHT, self.width, HEIGHT
        );
        out.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"20\" font-size=\"14\" text-anchor=\"middle\">{}</text>\n",
            self.width / 2.0,
            escape_xml(title)
        ));
        out.push_str(&format!(
            "  <line x1=\"{m}\" y1=\"{t}\" x2=\"{m}\" y2=\"{b}\" stroke=\"black\"/>\n  <line x1=\"{m}\" y1=\"{b}\" x2=\"{r:.1}\" y2=\"{b}\" stroke=\"black\"/>\n",
            m = MARGIN_LEFT,
            t = MARGIN_TOP,
            b = bottom,
            r = self.width - MARGIN_RIGHT
        ));
        out.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"8\" text-anchor=\"end\">{}</text>\n  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"8\" text-anchor=\"end\">0</text>\n",
            MARGIN_LEFT - 4.0,
            MARGIN_TOP + 4.0,
            self.y_max,
            MARGIN_LEFT - 4.0,
            bottom
        ));
        out.push_str(&format!(
            "  <text x=\"14\" y=\"{:.1}\" font-size=\"10\" transform=\"rotate(-90 14 {:.1})\" text-anchor=\"middle\">time (us)</text>\n",
            MARGIN_TOP + self.plot_height / 2.0,
            MARGIN_TOP + self.plot_height / 2.0
        ));
        out.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"10\" text-anchor=\"middle\">{}</text>\n",
            self.width / 2.0,
            HEIGHT - 6.0,
            escape_xml(x_title)
        ));

        for (i, (name, colour)) in legend.iter().enumerate() {
            let y = MARGIN_TOP + i as f64 * 12.0;
            out.push_str(&format!(
                "  <rect x=\"{:.1}\" y=\"{:.1}\" width=\"8\" height=\"8\" fill=\"{}\"/><text x=\"{:.1}\" y=\"{:.1}\" font-size=\"8\">{}</text>\n",
                self.width - MARGIN_RIGHT - 70.0,
                y,
                colour,
                self.width - MARGIN_RIGHT - 58.0,
                y + 7.0,
                escape_xml(name)
            ));
        }

        out.push_str(&self.body);
        out.push_str("</svg>\n");
        out
    }
}

/// Bar chart of duration per opid
pub fn render_histogram(histogram: &Histogram) -> String {
    let y_max = histogram.rows.iter().map(|r| r.duration).max().unwrap_or(0);
    let mut chart = Chart::new(histogram.rows.len(), y_max);

    for (i, row) in histogram.rows.iter().enumerate() {
        let title = format!("opid {}: {} us", row.opid, row.duration);
        chart.bar(i, 0, row.duration, PALETTE[0], &title);
        chart.x_label(i, &row.opid.to_string());
    }

    chart.finish(
        &format!("{} time", histogram.fn_tag),
        &format!("{} opid(s)", histogram.fn_tag),
        &[],
    )
}

/// Stacked bar chart of category time per opid
pub fn render_breakdown(histogram: &BreakdownHistogram) -> String {
    let y_max = histogram
        .rows
        .iter()
        .map(|r| r.buckets.iter().map(|b| b.duration).sum::<i64>().max(r.total.duration()))
        .max()
        .unwrap_or(0);
    let mut chart = Chart::new(histogram.rows.len(), y_max);

    for (i, row) in histogram.rows.iter().enumerate() {
        let mut base = 0;
        for (j, bucket) in row.buckets.iter().enumerate() {
            if bucket.duration == 0 {
                continue;
            }
            let title = format!("opid {} {}: {} us", row.total.opid, bucket.name, bucket.duration);
            chart.bar(i, base, bucket.duration, PALETTE[j % PALETTE.len()], &title);
            base += bucket.duration;
        }
        chart.x_label(i, &row.total.opid.to_string());
    }

    let legend: Vec<(String, &str)> = histogram
        .categories
        .iter()
        .enumerate()
        .map(|(j, name)| (name.clone(), PALETTE[j % PALETTE.len()]))
        .collect();

    chart.finish(
        &format!("{} sub-module time", histogram.fn_tag),
        &format!("{} opid(s)", histogram.fn_tag),
        &legend,
    )
}
