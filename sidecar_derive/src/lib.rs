//! Derives new metrics from pairs of consecutive scrapes.

pub mod eval;
pub mod matcher;
pub mod normalize;
pub mod rule;

pub use eval::{evaluate, evaluate_all, Skip};
pub use normalize::normalize;
pub use rule::{parse_rules, Function, Rule, RuleError, Source};
