use sidecar_prometheus::{format_float, LabelSet, Series, SeriesValue, Snapshot};

/// Flattens every histogram and summary into independent gauges.
///
/// A histogram `foo` becomes one `foo_bucket` gauge per bucket (with an `le`
/// label), plus `foo_sum` and `foo_count`. A summary `foo` becomes one `foo`
/// gauge per quantile (with a `quantile` label), plus `foo_sum` and
/// `foo_count`. Buckets and quantiles are ordered by the string form of their
/// bound, so `+Inf` comes first. Other series pass through unchanged, which
/// makes normalizing twice the same as normalizing once.
pub fn normalize(snapshot: &Snapshot) -> Snapshot {
    let (series, help) = snapshot.clone().into_parts();
    let mut normalized = Snapshot::new();
    for (family, text) in help {
        normalized.set_help(family, text);
    }
    for series in series {
        for flat in normalize_series(series) {
            normalized.push(flat);
        }
    }
    normalized
}

/// Flattens a single series; scalar series are returned as-is
pub fn normalize_series(series: Series) -> Vec<Series> {
    let Series {
        name,
        labels,
        value,
        timestamp,
    } = series;
    let (flat, sum, count) = match value {
        SeriesValue::Histogram(histogram) => {
            let bucket_name = format!("{}_bucket", name);
            let flat = bounded(&bucket_name, &labels, "le", &histogram.buckets);
            (flat, histogram.sum, histogram.count)
        }
        SeriesValue::Summary(summary) => {
            let flat = bounded(&name, &labels, "quantile", &summary.quantiles);
            (flat, summary.sum, summary.count)
        }
        value => {
            return vec![Series {
                name,
                labels,
                value,
                timestamp,
            }]
        }
    };

    let mut out = flat;
    out.push(Series::gauge(format!("{}_sum", name), labels.clone(), sum));
    out.push(Series::gauge(format!("{}_count", name), labels, count));
    for series in &mut out {
        series.timestamp = timestamp;
    }
    out
}

fn bounded(name: &str, labels: &LabelSet, key: &str, points: &[(f64, f64)]) -> Vec<Series> {
    let mut points = points
        .iter()
        .map(|(bound, value)| (format_float(*bound), *value))
        .collect::<Vec<_>>();
    points.sort_by(|a, b| a.0.cmp(&b.0));
    points
        .into_iter()
        .map(|(bound, value)| Series::gauge(name, labels.with(key, bound), value))
        .collect()
}
