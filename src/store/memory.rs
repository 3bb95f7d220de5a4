use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

use super::{StopIndex, Store};
use crate::model::{GeoPoint, Stop, Vehicle, VehiclePosition, VehicleStopTime, VehicleTuple};

#[derive(Default)]
struct Tables {
    positions: Vec<VehiclePosition>,
    vehicles: BTreeMap<String, Vehicle>,
    stop_times: Vec<VehicleStopTime>,
}

/// A [`Store`] held entirely in process memory.
///
/// Used for dry runs (`--memory`) and tests. Contents are lost on exit.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    stops: StopIndex,
}

impl MemoryStore {
    pub fn new(stops: StopIndex) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            stops,
        }
    }

    /// Every stored position, in insertion order.
    pub async fn positions(&self) -> Vec<VehiclePosition> {
        self.tables.read().await.positions.clone()
    }

    /// Every derived stop time, in insertion order.
    pub async fn stop_times(&self) -> Vec<VehicleStopTime> {
        self.tables.read().await.stop_times.clone()
    }

    pub async fn vehicle(&self, vehicle_id: &str) -> Option<Vehicle> {
        self.tables.read().await.vehicles.get(vehicle_id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_positions(&self, batch: &[VehiclePosition]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.tables.write().await.positions.extend_from_slice(batch);
        Ok(())
    }

    async fn insert_stop_times(&self, batch: &[VehicleStopTime]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.tables.write().await.stop_times.extend_from_slice(batch);
        Ok(())
    }

    async fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.vehicles.contains_key(&vehicle.vehicle_id) {
            bail!("vehicle {} already exists", vehicle.vehicle_id);
        }
        tables
            .vehicles
            .insert(vehicle.vehicle_id.clone(), vehicle.clone());
        Ok(())
    }

    async fn update_vehicle_watermark(&self, vehicle_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.vehicles.get_mut(vehicle_id) {
            Some(v) => {
                v.last_analyzed = at;
                Ok(())
            }
            None => bail!("vehicle {vehicle_id} not found"),
        }
    }

    async fn distinct_vehicle_tuples(&self) -> Result<Vec<VehicleTuple>> {
        let tables = self.tables.read().await;
        let mut seen = HashSet::new();
        let tuples = tables
            .positions
            .iter()
            .map(VehicleTuple::from)
            .filter(|t| seen.insert(t.clone()))
            .collect();
        Ok(tuples)
    }

    async fn contains_vehicle(&self, vehicle_id: &str) -> Result<bool> {
        Ok(self.tables.read().await.vehicles.contains_key(vehicle_id))
    }

    async fn vehicles(&self) -> Result<Vec<Vehicle>> {
        Ok(self.tables.read().await.vehicles.values().cloned().collect())
    }

    async fn positions_since(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<VehiclePosition>> {
        let tables = self.tables.read().await;
        let mut positions: Vec<_> = tables
            .positions
            .iter()
            .filter(|p| p.vehicle_id == vehicle_id && p.timestamp >= from && p.timestamp < to)
            .cloned()
            .collect();
        // Stable, so equal timestamps keep insertion order.
        positions.sort_by_key(|p| p.timestamp);
        Ok(positions)
    }

    async fn nearest_stop(&self, point: GeoPoint, max_distance_m: f64) -> Result<Option<Stop>> {
        Ok(self.stops.nearest(point, max_distance_m).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn position(vehicle_id: &str, trip_id: &str, secs: i64) -> VehiclePosition {
        VehiclePosition {
            vehicle_id: vehicle_id.to_string(),
            route: "803".to_string(),
            route_id: "803".to_string(),
            trip_id: trip_id.to_string(),
            location: GeoPoint::new(30.0, -97.0),
            timestamp: t(secs),
        }
    }

    #[tokio::test]
    async fn test_positions_since_is_half_open_and_sorted() {
        let store = MemoryStore::new(StopIndex::new(Vec::new()));
        store
            .insert_positions(&[
                position("V1", "T1", 20),
                position("V1", "T1", 10),
                position("V2", "T1", 15),
                position("V1", "T1", 30),
            ])
            .await
            .unwrap();

        let got = store.positions_since("V1", t(10), t(30)).await.unwrap();
        let secs: Vec<_> = got.iter().map(|p| (p.timestamp - t(0)).num_seconds()).collect();
        assert_eq!(secs, [10, 20]);
    }

    #[tokio::test]
    async fn test_distinct_tuples() {
        let store = MemoryStore::new(StopIndex::new(Vec::new()));
        store
            .insert_positions(&[
                position("V1", "T1", 0),
                position("V1", "T1", 1),
                position("V1", "T2", 2),
                position("V2", "T1", 0),
            ])
            .await
            .unwrap();

        assert_eq!(store.distinct_vehicle_tuples().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_vehicle_watermark_update() {
        let store = MemoryStore::new(StopIndex::new(Vec::new()));
        let v = Vehicle::discovered(VehicleTuple::from(&position("V1", "T1", 0)), t(0));
        store.insert_vehicle(&v).await.unwrap();
        assert!(store.contains_vehicle("V1").await.unwrap());
        assert!(store.insert_vehicle(&v).await.is_err());

        store.update_vehicle_watermark("V1", t(60)).await.unwrap();
        assert_eq!(store.vehicle("V1").await.unwrap().last_analyzed, t(60));
        assert!(store.update_vehicle_watermark("V9", t(60)).await.is_err());
    }
}
