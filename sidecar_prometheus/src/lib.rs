pub mod debug;
pub mod encoder;
pub mod error;
pub mod parser;
pub mod scrape;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

pub use encoder::encode;
pub use error::ParseError;
pub use parser::parse;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricType {
    /// The name used for this type in a `# TYPE` line
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Untyped => "untyped",
        }
    }
}

impl FromStr for MetricType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricType::Counter),
            "gauge" => Ok(MetricType::Gauge),
            "histogram" => Ok(MetricType::Histogram),
            "summary" => Ok(MetricType::Summary),
            "untyped" => Ok(MetricType::Untyped),
            _ => Err(()),
        }
    }
}

/// The label pairs identifying one series within a metric family.
///
/// Pairs are kept in the order they were added so that re-encoded text reads
/// like the scraped text, but equality and hashing ignore that order: two sets
/// are equal when they hold exactly the same `(key, value)` pairs.
#[derive(Clone, Debug, Default)]
pub struct LabelSet {
    pairs: Vec<(String, String)>,
}

impl LabelSet {
    pub fn new() -> Self {
        LabelSet { pairs: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a label, replacing the value in place if the key already exists
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((key, value)),
        }
    }

    /// A copy of this set with one more label appended
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = self.clone();
        labels.insert(key, value);
        labels
    }

    /// A copy of this set without the given label
    pub fn without(&self, key: &str) -> Self {
        LabelSet {
            pairs: self.pairs.iter().filter(|(k, _)| k != key).cloned().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Compares two sets as if neither contained `ignored`
    pub fn eq_ignoring(&self, other: &Self, ignored: &str) -> bool {
        let mine = self.iter().filter(|(k, _)| *k != ignored);
        let theirs = other.iter().filter(|(k, _)| *k != ignored).count();
        let mut count = 0;
        for (key, value) in mine {
            if other.get(key) != Some(value) {
                return false;
            }
            count += 1;
        }
        count == theirs
    }

    fn sorted(&self) -> Vec<&(String, String)> {
        let mut pairs = self.pairs.iter().collect::<Vec<_>>();
        pairs.sort();
        pairs
    }
}

impl PartialEq for LabelSet {
    fn eq(&self, other: &Self) -> bool {
        // keys are unique, so matching length plus containment is set equality
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl Eq for LabelSet {}

impl Hash for LabelSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sorted().hash(state);
    }
}

impl<K: Into<String>, V: Into<String>> std::iter::FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut labels = LabelSet::new();
        for (key, value) in iter {
            labels.insert(key, value);
        }
        labels
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Histogram {
    /// `(upper_bound, cumulative_count)` in scrape order
    pub buckets: Vec<(f64, f64)>,
    pub sum: f64,
    pub count: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    /// `(quantile, value)` in scrape order
    pub quantiles: Vec<(f64, f64)>,
    pub sum: f64,
    pub count: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SeriesValue {
    Counter(f64),
    Gauge(f64),
    Untyped(f64),
    Histogram(Histogram),
    Summary(Summary),
}

/// One named, labeled sample from a scrape (or derived from one)
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub name: String,
    pub labels: LabelSet,
    pub value: SeriesValue,
    pub timestamp: Option<i64>,
}

impl Series {
    pub fn new(name: impl Into<String>, labels: LabelSet, value: SeriesValue) -> Self {
        Series {
            name: name.into(),
            labels,
            value,
            timestamp: None,
        }
    }

    pub fn gauge(name: impl Into<String>, labels: LabelSet, value: f64) -> Self {
        Series::new(name, labels, SeriesValue::Gauge(value))
    }

    pub fn metric_type(&self) -> MetricType {
        match self.value {
            SeriesValue::Counter(_) => MetricType::Counter,
            SeriesValue::Gauge(_) => MetricType::Gauge,
            SeriesValue::Untyped(_) => MetricType::Untyped,
            SeriesValue::Histogram(_) => MetricType::Histogram,
            SeriesValue::Summary(_) => MetricType::Summary,
        }
    }

    /// The sample value, if this is a single-valued series
    pub fn scalar(&self) -> Option<f64> {
        match self.value {
            SeriesValue::Counter(v) | SeriesValue::Gauge(v) | SeriesValue::Untyped(v) => Some(v),
            SeriesValue::Histogram(_) | SeriesValue::Summary(_) => None,
        }
    }
}

/// Every series observed by one scrape, in the order they were read.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    series: Vec<Series>,

    /// `# HELP` text by family name
    help: HashMap<String, String>,
}

impl Snapshot {
    pub fn new() -> Self {
        Snapshot::default()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn push(&mut self, series: Series) {
        self.series.push(series);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Series> {
        self.series.iter()
    }

    pub fn help(&self, family: &str) -> Option<&str> {
        self.help.get(family).map(String::as_str)
    }

    pub fn set_help(&mut self, family: impl Into<String>, text: impl Into<String>) {
        self.help.insert(family.into(), text.into());
    }

    pub(crate) fn series_mut(&mut self, index: usize) -> &mut Series {
        &mut self.series[index]
    }

    pub fn into_parts(self) -> (Vec<Series>, HashMap<String, String>) {
        (self.series, self.help)
    }
}

impl From<Vec<Series>> for Snapshot {
    fn from(series: Vec<Series>) -> Self {
        Snapshot {
            series,
            help: HashMap::new(),
        }
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Series;
    type IntoIter = std::slice::Iter<'a, Series>;

    fn into_iter(self) -> Self::IntoIter {
        self.series.iter()
    }
}

/// Formats a float the way the text format spells it: the shortest decimal
/// that round-trips, with `+Inf`, `-Inf` and `NaN` for the special values.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".into()
    } else if value == f64::INFINITY {
        "+Inf".into()
    } else if value == f64::NEG_INFINITY {
        "-Inf".into()
    } else {
        format!("{}", value)
    }
}

/// Parses a float, accepting the text format's spellings of the special values
pub fn parse_float(value: &str) -> Option<f64> {
    match value {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => value.parse().ok(),
    }
}
