use std::fmt::Write;

use crate::{format_float, LabelSet, Series, SeriesValue, Snapshot};

/// Renders a snapshot in the text exposition format.
///
/// Consecutive series sharing a name and type are written under a single
/// `# HELP`/`# TYPE` header. `# HELP` is only written when the snapshot knows
/// the family's help text.
pub fn encode(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let mut family: Option<(&str, &str)> = None;
    for series in snapshot {
        let header = (series.name.as_str(), series.metric_type().as_str());
        if family != Some(header) {
            if let Some(help) = snapshot.help(&series.name) {
                let _ = writeln!(out, "# HELP {} {}", series.name, help);
            }
            let _ = writeln!(out, "# TYPE {} {}", header.0, header.1);
            family = Some(header);
        }
        encode_series(&mut out, series);
    }
    out
}

fn encode_series(out: &mut String, series: &Series) {
    let name = series.name.as_str();
    match &series.value {
        SeriesValue::Counter(value) | SeriesValue::Gauge(value) | SeriesValue::Untyped(value) => {
            write_line(out, name, &series.labels, None, *value, series.timestamp);
        }
        SeriesValue::Histogram(histogram) => {
            let bucket = format!("{}_bucket", name);
            for (le, count) in &histogram.buckets {
                let le = format_float(*le);
                let extra = Some(("le", le.as_str()));
                write_line(out, &bucket, &series.labels, extra, *count, series.timestamp);
            }
            write_totals(out, series, histogram.sum, histogram.count);
        }
        SeriesValue::Summary(summary) => {
            for (quantile, value) in &summary.quantiles {
                let quantile = format_float(*quantile);
                let extra = Some(("quantile", quantile.as_str()));
                write_line(out, name, &series.labels, extra, *value, series.timestamp);
            }
            write_totals(out, series, summary.sum, summary.count);
        }
    }
}

fn write_totals(out: &mut String, series: &Series, sum: f64, count: f64) {
    let sum_name = format!("{}_sum", series.name);
    let count_name = format!("{}_count", series.name);
    write_line(out, &sum_name, &series.labels, None, sum, series.timestamp);
    write_line(out, &count_name, &series.labels, None, count, series.timestamp);
}

fn write_line(
    out: &mut String,
    name: &str,
    labels: &LabelSet,
    extra: Option<(&str, &str)>,
    value: f64,
    timestamp: Option<i64>,
) {
    out.push_str(name);
    if !labels.is_empty() || extra.is_some() {
        out.push('{');
        for (i, (key, value)) in labels.iter().chain(extra).enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(key);
            out.push_str("=\"");
            escape_label_value(out, value);
            out.push('"');
        }
        out.push('}');
    }
    out.push(' ');
    out.push_str(&format_float(value));
    if let Some(timestamp) = timestamp {
        let _ = write!(out, " {}", timestamp);
    }
    out.push('\n');
}

fn escape_label_value(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
}
