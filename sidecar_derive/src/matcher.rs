//! Pairs a series with its counterpart in another snapshot.
//!
//! Matching is exact: same name, and label sets holding the same pairs. When
//! a snapshot holds duplicates the first match wins.

use sidecar_prometheus::{LabelSet, MetricType, Snapshot};

/// The value of the first series with this name, type and label set
pub fn find(
    snapshot: &Snapshot,
    name: &str,
    metric_type: MetricType,
    labels: &LabelSet,
) -> Option<f64> {
    snapshot
        .iter()
        .find(|s| s.name == name && s.metric_type() == metric_type && s.labels == *labels)
        .and_then(|s| s.scalar())
}

/// The value of the first series with this name and label set, of any type
pub fn find_denominator(snapshot: &Snapshot, labels: &LabelSet, name: &str) -> Option<f64> {
    snapshot
        .iter()
        .find(|s| s.name == name && s.labels == *labels)
        .and_then(|s| s.scalar())
}

/// Like [`find_denominator`], but label sets only need to agree on the keys
/// other than `ignored`.
///
/// This exists for ratios of cumulative bucket counts whose denominator is
/// labeled by a `ge` bound the numerator doesn't share. Rules opt into it
/// explicitly; plain label equality never ignores a key.
pub fn find_denominator_ignoring(
    snapshot: &Snapshot,
    labels: &LabelSet,
    name: &str,
    ignored: &str,
) -> Option<f64> {
    snapshot
        .iter()
        .find(|s| s.name == name && s.labels.eq_ignoring(labels, ignored))
        .and_then(|s| s.scalar())
}
