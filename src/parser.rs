//! Protobuf parser for GTFS Realtime feeds.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use prost::Message;
use tracing::debug;

use crate::gtfs_rt::FeedMessage;
use crate::model::{GeoPoint, VehiclePosition};

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Extracts the positions of vehicles serving `route` from a decoded feed.
///
/// The vehicle id is taken from the vehicle descriptor id, then its label,
/// then the entity id. The observation time is the vehicle timestamp, then
/// the feed header timestamp, then `fetched_at`. Deleted entities and
/// entities without a position are skipped.
pub fn extract_positions(
    feed: &FeedMessage,
    route: &str,
    fetched_at: DateTime<Utc>,
) -> Vec<VehiclePosition> {
    let header_time = feed.header.timestamp.and_then(epoch_secs);
    let mut positions = Vec::new();

    for entity in &feed.entity {
        if entity.is_deleted == Some(true) {
            continue;
        }
        let Some(v) = &entity.vehicle else {
            continue;
        };
        let Some(trip) = &v.trip else {
            continue;
        };
        if trip.route_id.as_deref() != Some(route) {
            continue;
        }
        let Some(pos) = &v.position else {
            debug!(entity_id = %entity.id, "Vehicle entity has no position");
            continue;
        };

        let vehicle_id = v
            .vehicle
            .as_ref()
            .and_then(|d| d.id.clone().or_else(|| d.label.clone()))
            .unwrap_or_else(|| entity.id.clone());

        let timestamp = v
            .timestamp
            .and_then(epoch_secs)
            .or(header_time)
            .unwrap_or(fetched_at);

        positions.push(VehiclePosition {
            vehicle_id,
            route: route.to_string(),
            route_id: trip.route_id.clone().unwrap_or_default(),
            trip_id: trip.trip_id.clone().unwrap_or_default(),
            location: GeoPoint::new(pos.latitude as f64, pos.longitude as f64),
            timestamp,
        });
    }

    positions
}

fn epoch_secs(secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    Utc.timestamp_opt(secs, 0).single()
}
