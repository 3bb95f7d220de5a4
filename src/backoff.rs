//! Detects an inactive upstream feed and chooses the next sleep duration.
//!
//! Each route has its own [`RouteBackoff`]; only a second (or later)
//! consecutive empty response counts as a retry, so a single dropped poll
//! never pushes the fleet towards the extended sleep.

use std::collections::HashMap;

/// Retry count every route starts with. Non-zero so a cold start does not
/// reach the threshold after a single failure.
pub const INITIAL_RETRIES: u32 = 1;

/// Outcome of one poll as far as backoff is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// The feed returned at least one position.
    Positions,
    /// The feed returned nothing, or could not be fetched.
    Empty,
}

/// Consecutive-empty-response counter for one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteBackoff {
    retries: u32,
    was_empty: bool,
}

impl Default for RouteBackoff {
    fn default() -> Self {
        Self {
            retries: INITIAL_RETRIES,
            was_empty: false,
        }
    }
}

impl RouteBackoff {
    pub fn record(&mut self, kind: ResponseKind) {
        match kind {
            ResponseKind::Positions => self.was_empty = false,
            ResponseKind::Empty => {
                if self.was_empty {
                    self.retries += 1;
                }
                self.was_empty = true;
            }
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn was_empty(&self) -> bool {
        self.was_empty
    }

    pub fn reached(&self, max_retries: u32) -> bool {
        self.retries >= max_retries
    }

    pub fn reset(&mut self) {
        self.retries = 0;
    }
}

/// Which of the two configured sleep durations to use next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepKind {
    Normal,
    Extended,
}

/// Per-route backoff state keyed by route id.
///
/// Only the control loop records into the tracker, after the route tasks of
/// an iteration have been joined.
#[derive(Debug, Clone, Default)]
pub struct EmptyResponseTracker {
    routes: HashMap<String, RouteBackoff>,
}

impl EmptyResponseTracker {
    pub fn new<S: AsRef<str>>(routes: &[S]) -> Self {
        Self {
            routes: routes
                .iter()
                .map(|r| (r.as_ref().to_string(), RouteBackoff::default()))
                .collect(),
        }
    }

    pub fn record(&mut self, route: &str, kind: ResponseKind) {
        self.routes.entry(route.to_string()).or_default().record(kind);
    }

    pub fn get(&self, route: &str) -> Option<&RouteBackoff> {
        self.routes.get(route)
    }

    /// The fleet is asleep iff every tracked route has reached `max_retries`.
    ///
    /// When it is, every counter is reset to zero and the extended sleep is
    /// chosen. An empty tracker is vacuously asleep.
    pub fn decide(&mut self, max_retries: u32) -> SleepKind {
        if self.routes.values().all(|r| r.reached(max_retries)) {
            self.routes.values_mut().for_each(RouteBackoff::reset);
            SleepKind::Extended
        } else {
            SleepKind::Normal
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RouteBackoff)> {
        self.routes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let b = RouteBackoff::default();
        assert_eq!(b.retries(), 1);
        assert!(!b.was_empty());
    }

    #[test]
    fn test_single_empty_does_not_count() {
        let mut b = RouteBackoff::default();
        b.record(ResponseKind::Empty);
        assert_eq!(b.retries(), 1);
        assert!(b.was_empty());
    }

    #[test]
    fn test_two_consecutive_empties_count_once() {
        let mut b = RouteBackoff::default();
        b.record(ResponseKind::Empty);
        b.record(ResponseKind::Empty);
        assert_eq!(b.retries(), 2);
    }

    #[test]
    fn test_positions_clear_flag_but_keep_retries() {
        let mut b = RouteBackoff::default();
        b.record(ResponseKind::Empty);
        b.record(ResponseKind::Empty);
        b.record(ResponseKind::Positions);
        assert_eq!(b.retries(), 2);
        assert!(!b.was_empty());

        // The streak restarts: the next empty is isolated again.
        b.record(ResponseKind::Empty);
        assert_eq!(b.retries(), 2);
    }

    #[test]
    fn test_extended_only_when_all_routes_reached() {
        let mut tracker = EmptyResponseTracker::new(&["803", "801"]);
        for _ in 0..4 {
            tracker.record("803", ResponseKind::Empty);
        }
        assert_eq!(tracker.get("803").unwrap().retries(), 4);
        assert_eq!(tracker.decide(3), SleepKind::Normal);
        // Nothing was reset by a normal decision.
        assert_eq!(tracker.get("803").unwrap().retries(), 4);

        for _ in 0..3 {
            tracker.record("801", ResponseKind::Empty);
        }
        assert_eq!(tracker.decide(3), SleepKind::Extended);
        assert_eq!(tracker.get("803").unwrap().retries(), 0);
        assert_eq!(tracker.get("801").unwrap().retries(), 0);
    }

    #[test]
    fn test_cold_start_single_failure_does_not_sleep() {
        let mut tracker = EmptyResponseTracker::new(&["803"]);
        tracker.record("803", ResponseKind::Empty);
        assert_eq!(tracker.decide(2), SleepKind::Normal);
    }

    #[test]
    fn test_after_reset_needs_full_streak_again() {
        let mut tracker = EmptyResponseTracker::new(&["803"]);
        for _ in 0..3 {
            tracker.record("803", ResponseKind::Empty);
        }
        assert_eq!(tracker.decide(3), SleepKind::Extended);

        // Still flagged empty, so each further empty counts.
        tracker.record("803", ResponseKind::Empty);
        assert_eq!(tracker.get("803").unwrap().retries(), 1);
        assert_eq!(tracker.decide(3), SleepKind::Normal);
    }
}
