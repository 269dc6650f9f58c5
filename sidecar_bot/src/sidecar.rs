use sidecar_derive::{evaluate_all, normalize, Rule};
use sidecar_prometheus::debug::DEBUG;
use sidecar_prometheus::{encode, parse, ParseError, Snapshot};
use tracing::{debug, warn};

/// Carries the previous scrape from one tick to the next.
pub struct Sidecar {
    rules: Vec<Rule>,

    /// None until the first scrape has been published
    previous: Option<Snapshot>,

    /// Seconds between two ticks
    interval: f64,
}

impl Sidecar {
    pub fn new(rules: Vec<Rule>, interval: f64) -> Self {
        Sidecar {
            rules,
            previous: None,
            interval,
        }
    }

    /// Runs one tick over a freshly scraped body and returns the text to publish.
    ///
    /// The text is the scrape as-is, followed by every derived gauge. The
    /// first tick only republishes the scrape; rules are evaluated from the
    /// second tick on. Nothing is kept when the body fails to parse.
    pub fn tick(&mut self, body: &str) -> Result<String, ParseError> {
        if body.trim().is_empty() {
            warn!("scrape returned no metrics");
        }
        let candidate = parse(body)?;
        DEBUG.series_scraped(candidate.len());

        let previous = match self.previous.take() {
            Some(previous) => previous,
            None => {
                debug!("publishing the first scrape, deriving from the next one");
                let text = encode(&candidate);
                self.previous = Some(candidate);
                return Ok(text);
            }
        };

        let current = normalize(&candidate);
        let previous = normalize(&previous);
        let mut derived = Snapshot::from(evaluate_all(
            &self.rules,
            &current,
            &previous,
            self.interval,
        ));
        for rule in &self.rules {
            derived.set_help(rule.output_name.as_str(), rule.output_name.as_str());
        }
        debug!(
            scraped = candidate.len(),
            derived = derived.len(),
            "evaluated {} rules",
            self.rules.len()
        );

        let mut text = encode(&candidate);
        text.push_str(&encode(&derived));
        self.previous = Some(candidate);
        Ok(text)
    }
}
