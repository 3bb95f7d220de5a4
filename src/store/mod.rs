//! Persistence for positions, vehicles and derived stop times.
//!
//! [`Store`] is the async trait the ingestion and matching code talks to.
//! [`MemoryStore`] keeps everything in process memory; [`SqliteStore`]
//! persists to SQLite through `sqlx`. Both answer nearest-stop queries from a
//! [`StopIndex`] built over the static stop catalog.

mod memory;
mod sqlite;
mod stops;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use stops::StopIndex;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::model::{GeoPoint, Stop, Vehicle, VehiclePosition, VehicleStopTime, VehicleTuple};

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Appends positions. An empty batch is a no-op.
    async fn insert_positions(&self, batch: &[VehiclePosition]) -> Result<()>;

    /// Appends derived stop times. An empty batch is a no-op.
    async fn insert_stop_times(&self, batch: &[VehicleStopTime]) -> Result<()>;

    async fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<()>;

    async fn update_vehicle_watermark(&self, vehicle_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Distinct `(vehicle_id, route, route_id, trip_id)` tuples among stored positions.
    async fn distinct_vehicle_tuples(&self) -> Result<Vec<VehicleTuple>>;

    async fn contains_vehicle(&self, vehicle_id: &str) -> Result<bool>;

    /// Every vehicle in the catalog.
    async fn vehicles(&self) -> Result<Vec<Vehicle>>;

    /// Positions of `vehicle_id` with `from <= timestamp < to`, oldest first.
    async fn positions_since(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<VehiclePosition>>;

    /// The closest stop to `point` no farther than `max_distance_m` metres.
    async fn nearest_stop(&self, point: GeoPoint, max_distance_m: f64) -> Result<Option<Stop>>;
}
