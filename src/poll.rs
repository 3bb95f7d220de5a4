//! One poll of one route: fetch, classify, dedupe, persist.

use tracing::{debug, error, info, warn};

use crate::backoff::ResponseKind;
use crate::dedup::Deduplicator;
use crate::feed::PositionFeed;
use crate::store::Store;

/// How a route's poll went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The feed returned positions; `accepted` of them were new.
    Updated { received: usize, accepted: usize },
    /// The feed answered with no positions for the route.
    Empty,
    /// The feed could not be fetched or decoded.
    FetchFailed,
}

impl PollOutcome {
    pub fn response_kind(&self) -> ResponseKind {
        match self {
            PollOutcome::Updated { .. } => ResponseKind::Positions,
            PollOutcome::Empty | PollOutcome::FetchFailed => ResponseKind::Empty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteReport {
    pub route: String,
    pub outcome: PollOutcome,
    /// Set when the accepted batch could not be written.
    pub persist_error: Option<String>,
}

/// Per-route ingestion state, owned by whichever task is polling the route.
#[derive(Debug, Clone)]
pub struct RouteState {
    route: String,
    dedup: Deduplicator,
}

impl RouteState {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            dedup: Deduplicator::new(),
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Fetches the route, keeps positions whose timestamp moved and persists them.
    ///
    /// If the write fails the dedup state is rolled back, so the same
    /// positions are accepted again on the next poll.
    #[tracing::instrument(skip_all, fields(route = %self.route))]
    pub async fn poll(&mut self, feed: &dyn PositionFeed, store: &dyn Store) -> RouteReport {
        let positions = match feed.fetch(&self.route).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Feed fetch failed");
                return self.report(PollOutcome::FetchFailed, None);
            }
        };

        if positions.is_empty() {
            info!("No vehicles in response");
            return self.report(PollOutcome::Empty, None);
        }

        let received = positions.len();
        let snapshot = self.dedup.clone();
        let updated = self.dedup.filter(positions);
        let accepted = updated.len();

        for p in &updated {
            debug!(vehicle_id = %p.vehicle_id, timestamp = %p.timestamp, "Vehicle updated");
        }

        let mut persist_error = None;
        if updated.is_empty() {
            debug!(received, "No new vehicle positions to record");
        } else if let Err(e) = store.insert_positions(&updated).await {
            error!(accepted, error = %format!("{e:#}"), "Failed to persist vehicle positions");
            self.dedup = snapshot;
            persist_error = Some(format!("{e:#}"));
        } else {
            info!(received, accepted, "Logged vehicle positions");
        }

        self.report(PollOutcome::Updated { received, accepted }, persist_error)
    }

    fn report(&self, outcome: PollOutcome, persist_error: Option<String>) -> RouteReport {
        RouteReport {
            route: self.route.clone(),
            outcome,
            persist_error,
        }
    }
}
