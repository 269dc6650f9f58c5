use anyhow::{Context, Result};
use sidecar_derive::{parse_rules, Rule};
use sidecar_prometheus::scrape::{RetryPolicy, ScrapeTarget};
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;
use tracing::warn;

/// Used when `QUERY_INTERVAL` is unparsable or not positive
const DEFAULT_QUERY_INTERVAL: f64 = 30.0;

#[derive(Debug)]
pub struct Config {
    /// Enables verbose logging of errors that occur while scraping metrics
    pub debug: bool,

    /// How frequently (in seconds) to log internal debug metrics
    pub debug_interval: Option<Duration>,

    /// The host of the metrics endpoint to scrape, usually the pod's own.
    pub scrape_host: String,

    /// The port of the metrics endpoint to scrape.
    pub scrape_port: u16,

    /// The path of the metrics endpoint; "/" scrapes the root.
    pub scrape_path: String,

    /// How long (in seconds) to wait to receive a response from the metrics endpoint.
    pub scrape_timeout: Duration,

    /// How often, and how far apart, to retry a failed scrape before giving up.
    pub scrape_retry: RetryPolicy,

    /// The port to serve the published metrics on.
    pub listen_port: u16,

    /// The path to serve the published metrics on.
    pub publish_path: String,

    /// Seconds between two scrapes; also the interval used by `rate`.
    pub query_interval: f64,

    /// The derived metrics to compute on every tick.
    pub rules: Vec<Rule>,
}

impl Config {
    /// Loads configuration from arguments, env and dotenv
    pub fn load() -> Result<Config> {
        // Attempts to find a `.env` file to initialize/extend the environment
        dotenv::dotenv().ok();

        // Load the config from arguments, then environment variables
        Config::from_env(Environment::from_args())
    }

    fn from_env(env: Environment) -> Result<Config> {
        match env.scrape_enabled.as_str() {
            "true" | "on" | "1" => (),
            _ => {
                return Err(anyhow::format_err!(
                    "scraping is not enabled; set SCRAPE_ENABLED=true"
                ))
            }
        }

        let rules = match (&env.rules, &env.rules_file) {
            (Some(yaml), _) => parse_rules(yaml).context("invalid SIDECAR_RULES")?,
            (None, Some(path)) => {
                let yaml = std::fs::read_to_string(path)
                    .with_context(|| format!("reading SIDECAR_RULES_FILE {}", path))?;
                parse_rules(&yaml).with_context(|| format!("invalid rules in {}", path))?
            }
            (None, None) => {
                return Err(anyhow::format_err!(
                    "one of SIDECAR_RULES or SIDECAR_RULES_FILE is required"
                ))
            }
        };
        if rules.is_empty() {
            warn!("no rules configured, metrics will be republished unchanged");
        }

        if env.scrape_host.is_empty() {
            return Err(anyhow::format_err!("invalid SCRAPE_HOST"));
        }

        Ok(Config {
            debug: parse_bool(&env.debug).context("invalid DEBUG")?,
            debug_interval: match env.debug_interval {
                ToggleValue::Enabled(secs) => Some(Duration::from_secs(secs)),
                ToggleValue::EnabledDefault => Some(Duration::from_secs(300)),
                ToggleValue::Disabled => None,
            },
            scrape_host: env.scrape_host,
            scrape_port: env.scrape_port,
            scrape_path: if env.scrape_path.is_empty() {
                "/metrics".into()
            } else {
                env.scrape_path
            },
            scrape_timeout: Duration::from_secs(env.scrape_timeout),
            scrape_retry: RetryPolicy {
                retries: env.scrape_retries,
                delay: Duration::from_secs(env.scrape_retry_delay),
            },
            listen_port: env.listen_port,
            publish_path: if env.publish_path.starts_with('/') {
                env.publish_path
            } else {
                format!("/{}", env.publish_path)
            },
            query_interval: parse_interval(&env.query_interval),
            rules,
        })
    }

    pub fn scrape_target(&self) -> ScrapeTarget {
        ScrapeTarget::new(
            &self.scrape_host,
            self.scrape_port,
            &self.scrape_path,
            self.scrape_timeout,
        )
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.query_interval)
    }
}

/// Reads the query interval in seconds, falling back to 30 seconds
pub fn parse_interval(val: &str) -> f64 {
    match val.trim().parse::<f64>() {
        Ok(secs) if secs > 0.0 && secs.is_finite() => secs,
        Ok(secs) => {
            warn!(
                "QUERY_INTERVAL must be greater than zero (got {}), using {} seconds",
                secs, DEFAULT_QUERY_INTERVAL
            );
            DEFAULT_QUERY_INTERVAL
        }
        Err(err) => {
            warn!(
                "invalid QUERY_INTERVAL {:?} ({}), using {} seconds",
                val, err, DEFAULT_QUERY_INTERVAL
            );
            DEFAULT_QUERY_INTERVAL
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "sidecar-bot")]
struct Environment {
    /// Enables verbose logging of errors that occur while scraping metrics
    #[structopt(short, long, env = "DEBUG", default_value = "false")]
    debug: String,

    /// How frequently (in seconds) to log internal debug metrics
    #[structopt(long, env = "DEBUG_INTERVAL", default_value = "300")]
    debug_interval: ToggleValue<u64>,

    /// Must be "true" for the sidecar to run
    #[structopt(long, env = "SCRAPE_ENABLED", default_value = "false")]
    scrape_enabled: String,

    /// The host serving the metrics to scrape
    #[structopt(long, env = "SCRAPE_HOST", default_value = "localhost")]
    scrape_host: String,

    /// The port serving the metrics to scrape
    #[structopt(short = "p", long, env = "SCRAPE_PORT")]
    scrape_port: u16,

    /// The path serving the metrics to scrape
    #[structopt(long, env = "SCRAPE_PATH", default_value = "/metrics")]
    scrape_path: String,

    /// How long (in seconds) to wait for a scrape response
    #[structopt(long, env = "SCRAPE_TIMEOUT", default_value = "5")]
    scrape_timeout: u64,

    /// How many times to retry a failed scrape before exiting
    #[structopt(long, env = "SCRAPE_RETRIES", default_value = "5")]
    scrape_retries: u32,

    /// How long (in seconds) to wait between scrape retries
    #[structopt(long, env = "SCRAPE_RETRY_DELAY", default_value = "10")]
    scrape_retry_delay: u64,

    /// The port to publish metrics on
    #[structopt(short = "l", long, env = "LISTEN_PORT", default_value = "8080")]
    listen_port: u16,

    /// The path to publish metrics on
    #[structopt(long, env = "PUBLISH_PATH", default_value = "/")]
    publish_path: String,

    /// Seconds between scrapes (may be fractional)
    #[structopt(short = "i", long, env = "QUERY_INTERVAL", default_value = "30")]
    query_interval: String,

    /// The rules to evaluate, as a YAML list
    #[structopt(long, env = "SIDECAR_RULES")]
    rules: Option<String>,

    /// A YAML file containing the rules to evaluate
    #[structopt(long, env = "SIDECAR_RULES_FILE")]
    rules_file: Option<String>,
}

fn parse_bool(val: &str) -> Result<bool, std::str::ParseBoolError> {
    match val {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" | "" => Ok(false),
        _ => val.parse(),
    }
}

#[derive(Debug, Eq, PartialEq)]
enum ToggleValue<T: FromStr> {
    Enabled(T),
    EnabledDefault,
    Disabled,
}

impl<T: FromStr> Default for ToggleValue<T> {
    fn default() -> Self {
        ToggleValue::Disabled
    }
}

impl<T: FromStr> FromStr for ToggleValue<T> {
    type Err = T::Err;
    fn from_str(val: &str) -> std::result::Result<Self, Self::Err> {
        match val {
            "false" | "off" | "0" | "" => Ok(ToggleValue::Disabled),
            "true" | "on" | "1" => Ok(ToggleValue::EnabledDefault),
            _ => val.parse().map(ToggleValue::Enabled),
        }
    }
}
