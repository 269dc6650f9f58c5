use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Function {
    Rate,
    Delta,
    Avg,
    Ratio,
    DeltaRatio,
}

impl Function {
    pub fn as_str(&self) -> &'static str {
        match self {
            Function::Rate => "rate",
            Function::Delta => "delta",
            Function::Avg => "avg",
            Function::Ratio => "ratio",
            Function::DeltaRatio => "deltaRatio",
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The metrics a rule reads from
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Source {
    /// `rate`, `delta` and `avg` read a single metric
    Single { name: String },

    /// `ratio` and `deltaRatio` divide one metric by another
    Ratio {
        numerator: String,
        denominator: String,

        /// A label to disregard when pairing numerator and denominator
        ignore_label: Option<String>,
    },
}

/// A derived metric: `output_name` is computed by `function` over `source`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rule {
    pub output_name: String,
    pub function: Function,
    pub source: Source,
}

impl Rule {
    /// The metric whose series drive the rule; one output per matching series
    pub fn driving_metric(&self) -> &str {
        match &self.source {
            Source::Single { name } => name,
            Source::Ratio { numerator, .. } => numerator,
        }
    }
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("malformed rules: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("rule {index} has an empty metricName")]
    EmptyName { index: usize },
    #[error("rule `{rule}` ({function}) is missing the `{parameter}` parameter")]
    MissingParameter {
        rule: String,
        function: Function,
        parameter: &'static str,
    },
}

/// A rule as written in the configuration
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleConfig {
    metric_name: String,
    function: Function,
    #[serde(default)]
    parameters: HashMap<String, String>,
}

impl RuleConfig {
    fn into_rule(mut self, index: usize) -> Result<Rule, RuleError> {
        if self.metric_name.trim().is_empty() {
            return Err(RuleError::EmptyName { index });
        }
        let source = match self.function {
            Function::Rate | Function::Delta | Function::Avg => Source::Single {
                name: self.take("name")?,
            },
            Function::Ratio | Function::DeltaRatio => Source::Ratio {
                numerator: self.take("numerator")?,
                denominator: self.take("denominator")?,
                ignore_label: self
                    .parameters
                    .remove("ignoreLabel")
                    .filter(|label| !label.is_empty()),
            },
        };
        Ok(Rule {
            output_name: self.metric_name,
            function: self.function,
            source,
        })
    }

    fn take(&mut self, parameter: &'static str) -> Result<String, RuleError> {
        match self.parameters.remove(parameter) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(RuleError::MissingParameter {
                rule: self.metric_name.clone(),
                function: self.function,
                parameter,
            }),
        }
    }
}

/// Reads a YAML sequence of `{metricName, function, parameters}` rules
pub fn parse_rules(yaml: &str) -> Result<Vec<Rule>, RuleError> {
    let configs: Vec<RuleConfig> = serde_yaml::from_str(yaml)?;
    configs
        .into_iter()
        .enumerate()
        .map(|(index, config)| config.into_rule(index))
        .collect()
}
