//! The upstream source of vehicle positions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::fetch::{HttpClient, fetch_bytes};
use crate::model::VehiclePosition;
use crate::parser::{extract_positions, parse_feed};

/// Returns the current positions of the vehicles serving a route.
///
/// `Ok` with an empty list means the feed answered but had nothing for the
/// route; `Err` means the feed could not be reached or decoded.
#[async_trait]
pub trait PositionFeed: Send + Sync {
    async fn fetch(&self, route: &str) -> Result<Vec<VehiclePosition>>;
}

/// A GTFS-RT VehiclePositions endpoint shared by all routes.
pub struct GtfsRtFeed<C> {
    client: C,
    url: String,
}

impl<C: HttpClient> GtfsRtFeed<C> {
    pub fn new(client: C, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> PositionFeed for GtfsRtFeed<C> {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self, route: &str) -> Result<Vec<VehiclePosition>> {
        let fetched_at = Utc::now();
        let bytes = fetch_bytes(&self.client, &self.url)
            .await
            .with_context(|| format!("fetching vehicle positions for route {route}"))?;
        debug!(bytes = bytes.len(), "Feed bytes received, parsing");

        let feed = parse_feed(&bytes).context("decoding GTFS-RT feed")?;
        Ok(extract_positions(&feed, route, fetched_at))
    }
}
