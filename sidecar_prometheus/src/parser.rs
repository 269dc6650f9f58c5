use std::collections::HashMap;

use crate::error::ParseError;
use crate::{parse_float, Histogram, LabelSet, MetricType, Series, SeriesValue, Snapshot, Summary};

/// A single sample line, before it is attached to its metric family
#[derive(Clone, Debug)]
struct Sample<'a> {
    name: &'a str,
    labels: LabelSet,
    value: f64,
    timestamp: Option<i64>,
}

/// Which part of a family a sample line carries
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Component {
    Value,
    Bucket,
    Sum,
    Count,
}

/// A parser for Prometheus's text exposition format.
///
/// Histogram and summary lines are folded back into one structured series per
/// label set. Samples without a `# TYPE` line are untyped.
pub fn parse(input: &str) -> Result<Snapshot, ParseError> {
    let mut snapshot = Snapshot::new();
    let mut types: HashMap<&str, MetricType> = HashMap::new();

    // Where each histogram/summary series lives in `snapshot`, by family and labels
    let mut families: HashMap<(&str, LabelSet), usize> = HashMap::new();

    for (index, line) in input.lines().enumerate() {
        let line_no = index + 1;

        // The line defines a metric's help text, kept escaped so it re-encodes as scraped
        if let Some(rest) = line.strip_prefix("# HELP ") {
            let mut parts = rest.trim_start().splitn(2, ' ');
            if let Some(name) = parts.next().filter(|name| !name.is_empty()) {
                snapshot.set_help(name, parts.next().unwrap_or("").trim());
            }
        }
        // The line defines a metric's type
        else if let Some(rest) = line.strip_prefix("# TYPE ") {
            let mut line_parts = rest.split_whitespace();
            if let (Some(name), Some(type_str)) = (line_parts.next(), line_parts.next()) {
                if let Ok(metric_type) = type_str.parse() {
                    types.insert(name, metric_type);
                }
            }
        }
        // The line is a comment or is empty
        else if line.starts_with('#') || line.trim().is_empty() {
        }
        // The line contains data
        else {
            let sample = parse_sample(line).ok_or_else(|| ParseError::InvalidSample {
                line: line_no,
                content: line.to_string(),
            })?;
            let (family, metric_type, component) = resolve(&types, sample.name);
            match metric_type {
                MetricType::Histogram | MetricType::Summary => {
                    let key = match (metric_type, component) {
                        (MetricType::Histogram, Component::Bucket) => {
                            sample.labels.without("le")
                        }
                        (MetricType::Summary, Component::Value) => {
                            sample.labels.without("quantile")
                        }
                        _ => sample.labels.clone(),
                    };
                    let index = *families.entry((family, key.clone())).or_insert_with(|| {
                        let value = match metric_type {
                            MetricType::Histogram => SeriesValue::Histogram(Histogram::default()),
                            _ => SeriesValue::Summary(Summary::default()),
                        };
                        snapshot.push(Series::new(family, key, value));
                        snapshot.len() - 1
                    });
                    attach(snapshot.series_mut(index), component, sample, line_no, line)?;
                }
                _ => {
                    let value = match metric_type {
                        MetricType::Counter => SeriesValue::Counter(sample.value),
                        MetricType::Gauge => SeriesValue::Gauge(sample.value),
                        _ => SeriesValue::Untyped(sample.value),
                    };
                    let mut series = Series::new(sample.name, sample.labels, value);
                    series.timestamp = sample.timestamp;
                    snapshot.push(series);
                }
            }
        }
    }
    Ok(snapshot)
}

/// Finds the family a sample belongs to, e.g. `foo_bucket` belongs to the histogram `foo`
fn resolve<'i>(
    types: &HashMap<&str, MetricType>,
    name: &'i str,
) -> (&'i str, MetricType, Component) {
    if let Some(metric_type) = types.get(name) {
        return (name, *metric_type, Component::Value);
    }
    let suffixes = [
        ("_bucket", Component::Bucket),
        ("_sum", Component::Sum),
        ("_count", Component::Count),
    ];
    for (suffix, component) in suffixes.iter() {
        if let Some(base) = name.strip_suffix(suffix) {
            match (types.get(base), component) {
                (Some(MetricType::Histogram), _) => {
                    return (base, MetricType::Histogram, *component)
                }
                (Some(MetricType::Summary), Component::Sum)
                | (Some(MetricType::Summary), Component::Count) => {
                    return (base, MetricType::Summary, *component)
                }
                _ => (),
            }
        }
    }
    (name, MetricType::Untyped, Component::Value)
}

fn attach(
    series: &mut Series,
    component: Component,
    sample: Sample,
    line_no: usize,
    line: &str,
) -> Result<(), ParseError> {
    series.timestamp = series.timestamp.or(sample.timestamp);
    match (&mut series.value, component) {
        (SeriesValue::Histogram(histogram), Component::Bucket) => {
            let le = bound(&sample, "le", line_no)?;
            histogram.buckets.push((le, sample.value));
        }
        (SeriesValue::Histogram(histogram), Component::Sum) => histogram.sum = sample.value,
        (SeriesValue::Histogram(histogram), Component::Count) => histogram.count = sample.value,
        (SeriesValue::Summary(summary), Component::Value) => {
            let quantile = bound(&sample, "quantile", line_no)?;
            summary.quantiles.push((quantile, sample.value));
        }
        (SeriesValue::Summary(summary), Component::Sum) => summary.sum = sample.value,
        (SeriesValue::Summary(summary), Component::Count) => summary.count = sample.value,
        _ => {
            return Err(ParseError::InvalidSample {
                line: line_no,
                content: line.to_string(),
            })
        }
    }
    Ok(())
}

fn bound(sample: &Sample, label: &'static str, line_no: usize) -> Result<f64, ParseError> {
    sample
        .labels
        .get(label)
        .and_then(parse_float)
        .ok_or_else(|| ParseError::MissingLabel {
            line: line_no,
            name: sample.name.to_string(),
            label,
        })
}

fn parse_sample(line: &str) -> Option<Sample<'_>> {
    // Split `metric_name{labels} value timestamp` into parts
    let (metric_str, rest) = if line.contains('}') {
        let mut reverse_parts = line.rsplitn(2, '}'); // use rsplit, because labels could contain escaped '}'
        let rest = reverse_parts.next()?;
        (reverse_parts.next()?, rest)
    } else {
        let line = line.trim_start();
        let end = line.find(char::is_whitespace)?;
        (&line[..end], &line[end..])
    };
    let mut line_parts = rest.split_whitespace();
    let value = parse_float(line_parts.next()?)?;
    let timestamp = match line_parts.next() {
        Some(unix_str) => Some(unix_str.parse().ok()?),
        None => None,
    };
    if line_parts.next().is_some() {
        return None;
    }

    // Split `metric_name{label1="value1",label2="value2"}` into parts
    let mut metric_parts = metric_str.trim().splitn(2, '{');
    let name = metric_parts.next()?.trim();
    if !is_metric_name(name) {
        return None;
    }
    let labels = match metric_parts.next() {
        Some(labels_str) => parse_labels(labels_str)?,
        None => LabelSet::new(),
    };

    Some(Sample {
        name,
        labels,
        value,
        timestamp,
    })
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(ch) if ch.is_ascii_alphabetic() || ch == '_' || ch == ':' => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == ':')
        }
        _ => false,
    }
}

fn parse_labels(input: &str) -> Option<LabelSet> {
    let mut labels = LabelSet::new();
    let mut tail = input.trim();
    while !tail.is_empty() {
        // Split first label
        let mut parts = tail.splitn(2, '=');
        let name = parts.next()?.trim();
        let rest = parts.next()?.trim_start();
        if name.is_empty() {
            return None;
        }

        // Parse the label
        let (value, offset) = parse_label_value(rest)?;
        labels.insert(name, value);

        // Advance to next label
        tail = rest[offset..].trim_start();
        match tail.strip_prefix(',') {
            Some(next) => tail = next.trim_start(),
            None if tail.is_empty() => break,
            None => return None,
        }
    }
    Some(labels)
}

/// Reads a quoted label value, returning it unescaped along with the number
/// of bytes consumed (including both quotes).
fn parse_label_value(value: &str) -> Option<(String, usize)> {
    if !value.starts_with('"') {
        return None;
    }
    let mut unescaped = String::new();
    let mut chars = value.char_indices().skip(1);
    while let Some((offset, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, 'n')) => unescaped.push('\n'),
                Some((_, ch)) => unescaped.push(ch),
                None => return None,
            },
            '"' => return Some((unescaped, offset + 1)),
            _ => unescaped.push(ch),
        }
    }
    None
}
