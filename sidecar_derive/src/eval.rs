use sidecar_prometheus::debug::DEBUG;
use sidecar_prometheus::{LabelSet, MetricType, Series, Snapshot};
use thiserror::Error;
use tracing::{info, warn};

use crate::matcher::{find, find_denominator, find_denominator_ignoring};
use crate::rule::{Function, Rule, Source};

/// Why a rule produced no output for one label set on this tick
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Skip {
    #[error("no previous value")]
    MissingPrevious,
    #[error("no denominator `{0}` with matching labels")]
    MissingDenominator(String),
    #[error("denominator is zero")]
    ZeroDenominator,
    #[error("counter `{0}` has been reset")]
    CounterReset(String),
    #[error("interval must be positive")]
    InvalidInterval,
    #[error("result is not a finite number")]
    NonFinite,
}

/// Evaluates one rule against two normalized snapshots.
///
/// Produces one gauge named after the rule for every series of the rule's
/// driving metric in `current` that can be paired up; label sets that can't
/// be paired are skipped. `interval` is the time between the snapshots, in
/// seconds.
pub fn evaluate(rule: &Rule, current: &Snapshot, previous: &Snapshot, interval: f64) -> Vec<Series> {
    let input = Input {
        current,
        previous,
        interval,
    };
    let mut derived = Vec::new();
    for series in current.iter().filter(|s| s.name == rule.driving_metric()) {
        let value = match series.scalar() {
            Some(value) => value,
            None => continue,
        };
        let result = match (&rule.function, &rule.source) {
            (Function::Rate, _) => input.rate(series, value),
            (Function::Delta, _) => input.delta(series, value),
            (Function::Avg, _) => input.avg(series, value),
            (
                Function::Ratio,
                Source::Ratio {
                    denominator,
                    ignore_label,
                    ..
                },
            ) => input.ratio(series, value, denominator, ignore_label.as_deref()),
            (
                Function::DeltaRatio,
                Source::Ratio {
                    denominator,
                    ignore_label,
                    ..
                },
            ) => input.delta_ratio(series, value, denominator, ignore_label.as_deref()),
            (function, source) => {
                warn!(rule = %rule.output_name, %function, ?source, "rule has no usable source");
                return derived;
            }
        };
        // NaN and infinities may be scraped; none of them are ever published
        let result = result.and_then(|output| {
            if output.is_finite() {
                Ok(output)
            } else {
                Err(Skip::NonFinite)
            }
        });
        match result {
            Ok(output) => {
                derived.push(Series::gauge(&rule.output_name, series.labels.clone(), output))
            }
            Err(skip) => {
                DEBUG.series_skipped();
                match skip {
                    Skip::CounterReset(_) | Skip::InvalidInterval => {
                        warn!(rule = %rule.output_name, labels = ?series.labels, "skipped: {}", skip)
                    }
                    _ => info!(rule = %rule.output_name, labels = ?series.labels, "skipped: {}", skip),
                }
            }
        }
    }
    DEBUG.series_derived(derived.len());
    derived
}

/// Evaluates every rule in order and concatenates the results
pub fn evaluate_all(
    rules: &[Rule],
    current: &Snapshot,
    previous: &Snapshot,
    interval: f64,
) -> Vec<Series> {
    rules
        .iter()
        .flat_map(|rule| evaluate(rule, current, previous, interval))
        .collect()
}

struct Input<'a> {
    current: &'a Snapshot,
    previous: &'a Snapshot,
    interval: f64,
}

impl Input<'_> {
    fn previous_value(&self, series: &Series) -> Result<f64, Skip> {
        find(
            self.previous,
            &series.name,
            series.metric_type(),
            &series.labels,
        )
        .ok_or(Skip::MissingPrevious)
    }

    /// `new - old`, rejecting a decrease of a counter
    fn increase(&self, series: &Series, value: f64) -> Result<f64, Skip> {
        let old = self.previous_value(series)?;
        if series.metric_type() == MetricType::Counter && value < old {
            return Err(Skip::CounterReset(series.name.clone()));
        }
        Ok(value - old)
    }

    fn rate(&self, series: &Series, value: f64) -> Result<f64, Skip> {
        if self.interval.is_nan() || self.interval <= 0.0 {
            return Err(Skip::InvalidInterval);
        }
        Ok(self.increase(series, value)? / self.interval)
    }

    fn delta(&self, series: &Series, value: f64) -> Result<f64, Skip> {
        self.increase(series, value)
    }

    // Averages across a counter reset too; there is no reset check here.
    fn avg(&self, series: &Series, value: f64) -> Result<f64, Skip> {
        let old = self.previous_value(series)?;
        Ok((value + old) / 2.0)
    }

    fn ratio(
        &self,
        series: &Series,
        value: f64,
        denominator: &str,
        ignore_label: Option<&str>,
    ) -> Result<f64, Skip> {
        let divisor = lookup_denominator(self.current, &series.labels, denominator, ignore_label)?;
        if divisor == 0.0 {
            return Err(Skip::ZeroDenominator);
        }
        Ok(value / divisor)
    }

    fn delta_ratio(
        &self,
        series: &Series,
        value: f64,
        denominator: &str,
        ignore_label: Option<&str>,
    ) -> Result<f64, Skip> {
        let numerator_delta = self.increase(series, value)?;
        let new = lookup_denominator(self.current, &series.labels, denominator, ignore_label)?;
        let old = lookup_denominator(self.previous, &series.labels, denominator, ignore_label)?;
        let denominator_delta = new - old;

        // The numerator's type decides whether a decrease is a reset
        if series.metric_type() == MetricType::Counter && denominator_delta < 0.0 {
            return Err(Skip::CounterReset(denominator.to_string()));
        }
        if denominator_delta == 0.0 {
            return Err(Skip::ZeroDenominator);
        }
        Ok(numerator_delta / denominator_delta)
    }
}

fn lookup_denominator(
    snapshot: &Snapshot,
    labels: &LabelSet,
    name: &str,
    ignore_label: Option<&str>,
) -> Result<f64, Skip> {
    let found = match ignore_label {
        Some(ignored) => find_denominator_ignoring(snapshot, labels, name, ignored),
        None => find_denominator(snapshot, labels, name),
    };
    found.ok_or_else(|| Skip::MissingDenominator(name.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::normalize::normalize;
    use crate::rule::parse_rules;
    use pretty_assertions::assert_eq;
    use sidecar_prometheus::{encode, parse};

    fn rule(function: Function, source: Source) -> Rule {
        Rule {
            output_name: "derived".into(),
            function,
            source,
        }
    }

    fn single(function: Function, name: &str) -> Rule {
        rule(function, Source::Single { name: name.into() })
    }

    fn ratio(function: Function, numerator: &str, denominator: &str) -> Rule {
        rule(
            function,
            Source::Ratio {
                numerator: numerator.into(),
                denominator: denominator.into(),
                ignore_label: None,
            },
        )
    }

    fn snapshot(text: &str) -> Snapshot {
        normalize(&parse(text).unwrap())
    }

    fn values(series: &[Series]) -> Vec<f64> {
        series.iter().filter_map(Series::scalar).collect()
    }

    const OLD: &str = r#"
# HELP request_count Counts requests by method and path
# TYPE request_count counter
request_count{method="GET",path="/rest/metrics"} 25
request_count{method="POST",path="/rest/support"} 10
# HELP request_total_time Total time in second requests take by method and path
# TYPE request_total_time counter
request_total_time{method="GET",path="/rest/metrics"} 0.5
request_total_time{method="POST",path="/rest/support"} 0.7
"#;

    const NEW: &str = r#"
# HELP request_count Counts requests by method and path
# TYPE request_count counter
request_count{method="GET",path="/rest/metrics"} 30
request_count{method="POST",path="/rest/support"} 20
# HELP request_total_time Total time in second requests take by method and path
# TYPE request_total_time counter
request_total_time{method="GET",path="/rest/metrics"} 0.9
request_total_time{method="POST",path="/rest/support"} 1.0
"#;

    #[test]
    fn rate_divides_increase_by_interval() {
        let derived = evaluate(
            &single(Function::Rate, "request_count"),
            &snapshot(NEW),
            &snapshot(OLD),
            10.0,
        );
        assert_eq!(
            encode(&Snapshot::from(derived)),
            "# TYPE derived gauge\n\
             derived{method=\"GET\",path=\"/rest/metrics\"} 0.5\n\
             derived{method=\"POST\",path=\"/rest/support\"} 1\n"
        );
    }

    #[test]
    fn delta_subtracts_previous() {
        let derived = evaluate(
            &single(Function::Delta, "request_count"),
            &snapshot(NEW),
            &snapshot(OLD),
            10.0,
        );
        assert_eq!(values(&derived), vec![5.0, 10.0]);
        assert_eq!(derived[0].name, "derived");
        assert_eq!(derived[0].metric_type(), MetricType::Gauge);
        assert_eq!(derived[0].labels.get("method"), Some("GET"));
    }

    #[test]
    fn counter_resets_are_dropped() {
        let old = snapshot("# TYPE request_count counter\nrequest_count{method=\"GET\"} 25\n");
        let new = snapshot("# TYPE request_count counter\nrequest_count{method=\"GET\"} 5\n");
        for function in [Function::Rate, Function::Delta].iter() {
            let derived = evaluate(&single(*function, "request_count"), &new, &old, 10.0);
            assert!(derived.is_empty(), "{} emitted {:?}", function, derived);
        }
    }

    #[test]
    fn gauges_may_decrease() {
        let old = snapshot("# TYPE temperature gauge\ntemperature 25\n");
        let new = snapshot("# TYPE temperature gauge\ntemperature 5\n");
        let rate = evaluate(&single(Function::Rate, "temperature"), &new, &old, 10.0);
        assert_eq!(values(&rate), vec![-2.0]);
        let delta = evaluate(&single(Function::Delta, "temperature"), &new, &old, 10.0);
        assert_eq!(values(&delta), vec![-20.0]);
    }

    #[test]
    fn rate_needs_a_positive_interval() {
        let derived = evaluate(
            &single(Function::Rate, "request_count"),
            &snapshot(NEW),
            &snapshot(OLD),
            0.0,
        );
        assert!(derived.is_empty());
    }

    #[test]
    fn mismatched_labels_produce_nothing() {
        let old = snapshot(
            "# TYPE request_count counter\n\
             request_count{method=\"GET\",path=\"/rest/metrics/1\"} 25\n\
             request_count{method=\"POST\",path=\"/rest/support/1\"} 10\n",
        );
        let new = snapshot(
            "# TYPE request_count counter\n\
             request_count{method=\"GET\",path=\"/rest/metrics/2\"} 30\n\
             request_count{method=\"POST\",path=\"/rest/support/2\"} 20\n",
        );
        for function in [Function::Rate, Function::Delta, Function::Avg].iter() {
            assert!(evaluate(&single(*function, "request_count"), &new, &old, 10.0).is_empty());
        }
    }

    #[test]
    fn label_order_does_not_matter() {
        let old = snapshot("# TYPE c counter\nc{a=\"1\",b=\"2\"} 10\n");
        let new = snapshot("# TYPE c counter\nc{b=\"2\",a=\"1\"} 14\n");
        let derived = evaluate(&single(Function::Delta, "c"), &new, &old, 10.0);
        assert_eq!(values(&derived), vec![4.0]);
        assert_eq!(derived[0].labels.iter().next(), Some(("b", "2")));
    }

    #[test]
    fn avg_is_the_midpoint() {
        let old = snapshot("avg_input 1.0\n");
        let new = snapshot("avg_input 2.0\n");
        let derived = evaluate(&single(Function::Avg, "avg_input"), &new, &old, 10.0);
        assert_eq!(
            encode(&Snapshot::from(derived)),
            "# TYPE derived gauge\nderived 1.5\n"
        );
    }

    #[test]
    fn avg_ignores_counter_resets() {
        let old = snapshot("# TYPE c counter\nc 25\n");
        let new = snapshot("# TYPE c counter\nc 5\n");
        let derived = evaluate(&single(Function::Avg, "c"), &new, &old, 10.0);
        assert_eq!(values(&derived), vec![15.0]);
    }

    #[test]
    fn ratio_divides_matching_series() {
        let current = snapshot(
            "# TYPE request_total_time gauge\n\
             request_total_time{method=\"GET\"} 0.2\n\
             request_total_time{method=\"POST\"} 0.4\n\
             # TYPE request_count counter\n\
             request_count{method=\"GET\"} 2.0\n\
             request_count{method=\"POST\"} 0.0\n",
        );
        let derived = evaluate(
            &ratio(Function::Ratio, "request_total_time", "request_count"),
            &current,
            &Snapshot::new(),
            10.0,
        );
        // POST has a zero denominator
        assert_eq!(values(&derived), vec![0.1]);
        assert_eq!(derived[0].labels.get("method"), Some("GET"));
    }

    #[test]
    fn ratio_without_denominator_is_skipped() {
        let current = snapshot(
            "request_total_time{key1=\"value1\"} 0.3\n\
             request_count{key3=\"value3\"} 5.0\n",
        );
        let derived = evaluate(
            &ratio(Function::Ratio, "request_total_time", "request_count"),
            &current,
            &Snapshot::new(),
            10.0,
        );
        assert!(derived.is_empty());
    }

    #[test]
    fn ratio_can_ignore_a_label() {
        let current = snapshot(
            "bucket_hits{job=\"api\",le=\"0.5\"} 30\n\
             bucket_total{job=\"api\",ge=\"0.5\"} 60\n",
        );
        let mut rule = ratio(Function::Ratio, "bucket_hits", "bucket_total");
        assert!(evaluate(&rule, &current, &Snapshot::new(), 10.0).is_empty());

        // ignore both bound labels by giving them the same key
        let current = snapshot(
            "bucket_hits{job=\"api\",ge=\"1\"} 30\n\
             bucket_total{job=\"api\",ge=\"0.5\"} 60\n",
        );
        rule.source = Source::Ratio {
            numerator: "bucket_hits".into(),
            denominator: "bucket_total".into(),
            ignore_label: Some("ge".into()),
        };
        let derived = evaluate(&rule, &current, &Snapshot::new(), 10.0);
        assert_eq!(values(&derived), vec![0.5]);
    }

    #[test]
    fn non_finite_results_are_dropped() {
        let current = snapshot(
            "num{a=\"1\"} 3\n\
             num{a=\"2\"} 4\n\
             den{a=\"1\"} NaN\n\
             den{a=\"2\"} 2\n",
        );
        let ratio_rule = ratio(Function::Ratio, "num", "den");
        let derived = evaluate(&ratio_rule, &current, &Snapshot::new(), 10.0);
        assert_eq!(values(&derived), vec![2.0]);
        assert_eq!(derived[0].labels.get("a"), Some("2"));

        // Inf - Inf is NaN
        let old = snapshot("num 1\nden +Inf\n");
        let new = snapshot("num 5\nden +Inf\n");
        let delta_ratio_rule = ratio(Function::DeltaRatio, "num", "den");
        assert!(evaluate(&delta_ratio_rule, &new, &old, 10.0).is_empty());

        let old = snapshot("g 1\n");
        let new = snapshot("g +Inf\n");
        for function in [Function::Rate, Function::Delta, Function::Avg].iter() {
            let derived = evaluate(&single(*function, "g"), &new, &old, 10.0);
            assert!(derived.is_empty(), "{} emitted {:?}", function, derived);
        }
        let nan = snapshot("g NaN\n");
        assert!(evaluate(&single(Function::Avg, "g"), &nan, &old, 10.0).is_empty());
    }

    #[test]
    fn delta_ratio_divides_deltas() {
        let old = snapshot(
            "request_count{key1=\"value1\"} 1.0\n\
             request_total_time{key1=\"value1\"} 0.1\n\
             request_count{key3=\"value3\"} 2.0\n\
             request_total_time{key3=\"value3\"} 0.2\n",
        );
        let new = snapshot(
            "request_count{key1=\"value1\"} 5.0\n\
             request_total_time{key1=\"value1\"} 0.5\n\
             request_count{key3=\"value3\"} 4.0\n\
             request_total_time{key3=\"value3\"} 0.4\n",
        );
        let derived = evaluate(
            &ratio(Function::DeltaRatio, "request_total_time", "request_count"),
            &new,
            &old,
            10.0,
        );
        // (0.5 - 0.1) / (5.0 - 1.0) and (0.4 - 0.2) / (4.0 - 2.0)
        let values = values(&derived);
        assert_eq!(values.len(), 2);
        assert!((values[0] - 0.1).abs() < 1e-12);
        assert!((values[1] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn delta_ratio_with_unchanged_denominator_is_skipped() {
        let old = snapshot(
            "# TYPE request_total_time counter\nrequest_total_time 0.5\n\
             # TYPE request_count counter\nrequest_count 25\n",
        );
        let new = snapshot(
            "# TYPE request_total_time counter\nrequest_total_time 0.9\n\
             # TYPE request_count counter\nrequest_count 25\n",
        );
        let derived = evaluate(
            &ratio(Function::DeltaRatio, "request_total_time", "request_count"),
            &new,
            &old,
            10.0,
        );
        assert!(derived.is_empty());
    }

    #[test]
    fn delta_ratio_drops_resets_on_either_side() {
        let old = snapshot(
            "# TYPE num counter\nnum 10\n\
             # TYPE den counter\nden 10\n",
        );
        let numerator_reset = snapshot(
            "# TYPE num counter\nnum 5\n\
             # TYPE den counter\nden 20\n",
        );
        let denominator_reset = snapshot(
            "# TYPE num counter\nnum 15\n\
             # TYPE den counter\nden 5\n",
        );
        let rule = ratio(Function::DeltaRatio, "num", "den");
        assert!(evaluate(&rule, &numerator_reset, &old, 10.0).is_empty());
        assert!(evaluate(&rule, &denominator_reset, &old, 10.0).is_empty());
    }

    #[test]
    fn delta_ratio_with_mismatched_labels_is_skipped() {
        let old = snapshot(
            "request_count{key1=\"value1\"} 1.0\n\
             request_total_time{key3=\"value3\"} 0.1\n",
        );
        let new = snapshot(
            "request_count{key1=\"value1\"} 5.0\n\
             request_total_time{key3=\"value3\"} 0.3\n",
        );
        let derived = evaluate(
            &ratio(Function::DeltaRatio, "request_total_time", "request_count"),
            &new,
            &old,
            10.0,
        );
        assert!(derived.is_empty());
    }

    #[test]
    fn delta_over_normalized_histograms() {
        let old = snapshot(
            r#"# TYPE http_request_duration_seconds histogram
http_request_duration_seconds_bucket{le="0.05"} 24054
http_request_duration_seconds_bucket{le="0.1"} 33444
http_request_duration_seconds_bucket{le="0.2"} 100392
http_request_duration_seconds_bucket{le="0.5"} 129389
http_request_duration_seconds_bucket{le="1"} 133988
http_request_duration_seconds_bucket{le="+Inf"} 144320
http_request_duration_seconds_sum 53423
http_request_duration_seconds_count 144320
"#,
        );
        let new = snapshot(
            r#"# TYPE http_request_duration_seconds histogram
http_request_duration_seconds_bucket{le="0.05"} 25054
http_request_duration_seconds_bucket{le="0.1"} 34444
http_request_duration_seconds_bucket{le="0.2"} 101392
http_request_duration_seconds_bucket{le="0.5"} 139389
http_request_duration_seconds_bucket{le="1"} 135988
http_request_duration_seconds_bucket{le="+Inf"} 149320
http_request_duration_seconds_sum 63423
http_request_duration_seconds_count 149320
"#,
        );

        let buckets = evaluate(
            &single(Function::Delta, "http_request_duration_seconds_bucket"),
            &new,
            &old,
            10.0,
        );
        assert_eq!(
            encode(&Snapshot::from(buckets)),
            r#"# TYPE derived gauge
derived{le="+Inf"} 5000
derived{le="0.05"} 1000
derived{le="0.1"} 1000
derived{le="0.2"} 1000
derived{le="0.5"} 10000
derived{le="1"} 2000
"#
        );

        let sum = evaluate(
            &single(Function::Delta, "http_request_duration_seconds_sum"),
            &new,
            &old,
            10.0,
        );
        assert_eq!(values(&sum), vec![10000.0]);

        let count = evaluate(
            &single(Function::Delta, "http_request_duration_seconds_count"),
            &new,
            &old,
            10.0,
        );
        assert_eq!(values(&count), vec![5000.0]);
    }

    #[test]
    fn evaluates_rules_from_configuration() {
        let rules = parse_rules(
            r#"
- metricName: request_rate
  function: rate
  parameters: {name: request_count}
- metricName: request_time_per_request
  function: deltaRatio
  parameters: {numerator: request_total_time, denominator: request_count}
- metricName: missing
  function: delta
  parameters: {name: not_scraped}
"#,
        )
        .unwrap();
        let derived = evaluate_all(&rules, &snapshot(NEW), &snapshot(OLD), 10.0);
        let names = derived.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "request_rate",
                "request_rate",
                "request_time_per_request",
                "request_time_per_request"
            ]
        );
        assert!(values(&derived).iter().all(|v| v.is_finite()));
    }
}
