//! Records ingested from the feed and derived from it.
//!
//! Field names are a stable contract with downstream readers of the store,
//! so renames here must keep the serialized names intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// One vehicle report as received from the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub vehicle_id: String,
    /// The route identifier the position was polled for.
    pub route: String,
    /// The route id carried by the trip descriptor in the feed.
    pub route_id: String,
    pub trip_id: String,
    pub location: GeoPoint,
    pub timestamp: DateTime<Utc>,
}

/// A vehicle known to the catalog, with its stop-matching watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_id: String,
    pub route: String,
    pub route_id: String,
    pub trip_id: String,
    /// Positions before this instant have already been matched to stops.
    pub last_analyzed: DateTime<Utc>,
}

impl Vehicle {
    /// Registers a newly discovered vehicle, watermarked at `discovered_at`.
    pub fn discovered(tuple: VehicleTuple, discovered_at: DateTime<Utc>) -> Self {
        Self {
            vehicle_id: tuple.vehicle_id,
            route: tuple.route,
            route_id: tuple.route_id,
            trip_id: tuple.trip_id,
            last_analyzed: discovered_at,
        }
    }
}

/// Distinct identity columns of stored positions, as scanned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleTuple {
    pub vehicle_id: String,
    pub route: String,
    pub route_id: String,
    pub trip_id: String,
}

impl From<&VehiclePosition> for VehicleTuple {
    fn from(p: &VehiclePosition) -> Self {
        Self {
            vehicle_id: p.vehicle_id.clone(),
            route: p.route.clone(),
            route_id: p.route_id.clone(),
            trip_id: p.trip_id.clone(),
        }
    }
}

/// A stop from the static catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    pub name: Option<String>,
    pub location: GeoPoint,
}

/// "This vehicle was nearest to this stop at this time."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleStopTime {
    pub vehicle_id: String,
    pub route: String,
    pub trip_id: String,
    pub stop_id: String,
    pub timestamp: DateTime<Utc>,
}
