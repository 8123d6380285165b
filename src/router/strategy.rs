//! Agent selection strategies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the router picks among the available, capability-matched agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Cycle through candidates with a persistent cursor so every available
    /// agent is chosen once per full cycle under uniform load.
    #[default]
    RoundRobin,
    /// Pick the candidate with the fewest processed tasks, ties broken by
    /// registry insertion order. A cheap proxy for load, not a live
    /// queue-depth measurement.
    LeastLoaded,
    /// Uniform random pick over the candidate list.
    Random,
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionStrategy::RoundRobin => write!(f, "round-robin"),
            SelectionStrategy::LeastLoaded => write!(f, "least-loaded"),
            SelectionStrategy::Random => write!(f, "random"),
        }
    }
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round-robin" | "round_robin" | "roundrobin" => Ok(SelectionStrategy::RoundRobin),
            "least-loaded" | "least_loaded" | "leastloaded" => Ok(SelectionStrategy::LeastLoaded),
            "random" => Ok(SelectionStrategy::Random),
            other => Err(format!("unknown selection strategy: {other}")),
        }
    }
}
