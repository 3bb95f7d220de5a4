use anyhow::{Result, bail};
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_ROUTES: &[&str] = &["803", "801", "550"];

/// Scheduling and matching parameters, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Route ids polled every iteration.
    pub routes: Vec<String>,
    /// Farthest a position may be from a stop to count as a visit, in metres.
    pub max_distance_m: f64,
    /// Consecutive-empty retries every route must reach before backing off.
    pub max_retries: u32,
    pub normal_sleep: Duration,
    pub extended_sleep: Duration,
    pub discovery_interval: Duration,
    /// How far behind the wall clock the stop matcher's upper bound trails.
    /// Positions written by a poll that races the matcher stay ahead of the
    /// new watermark as long as they are no older than this.
    pub match_lag: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            routes: DEFAULT_ROUTES.iter().map(|r| r.to_string()).collect(),
            max_distance_m: 100.0,
            max_retries: 3,
            normal_sleep: Duration::from_secs(30),
            extended_sleep: Duration::from_secs(10 * 60),
            discovery_interval: Duration::from_secs(4 * 60 * 60),
            match_lag: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.routes.is_empty() {
            bail!("at least one route must be configured");
        }
        if self.routes.iter().any(|r| r.trim().is_empty()) {
            bail!("route ids must not be blank");
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.routes.iter().find(|r| !seen.insert(r.as_str())) {
            bail!("route {dup} is configured more than once");
        }
        if !self.max_distance_m.is_finite() || self.max_distance_m <= 0.0 {
            bail!("max distance must be a positive number of metres, got {}", self.max_distance_m);
        }
        if self.max_retries == 0 {
            bail!("max retries must be at least 1");
        }
        Ok(())
    }
}

/// Splits a comma-separated route list, dropping blanks and duplicates.
pub fn parse_routes(raw: &str) -> Vec<String> {
    let mut routes: Vec<String> = Vec::new();
    for route in raw.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        if !routes.iter().any(|r| r == route) {
            routes.push(route.to_string());
        }
    }
    routes
}
