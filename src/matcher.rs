//! Derives the sequence of stops each vehicle passed from its recorded
//! positions.
//!
//! For every vehicle in the catalog, positions from its watermark up to the
//! start of the pass are matched to the nearest stop within
//! `max_distance_m`. Consecutive matches at the same stop collapse into the
//! first one (a dwell). The surviving stop times are written in one batch
//! and only then is the watermark moved to the start of the pass.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::model::{Vehicle, VehiclePosition, VehicleStopTime};
use crate::store::Store;

/// Ordered stop visits for one vehicle, collapsing dwells as they are pushed.
#[derive(Debug, Default, Clone)]
pub struct StopTimeSequence {
    stop_times: Vec<VehicleStopTime>,
}

impl StopTimeSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `stop_time` unless it repeats the previous stop at the same
    /// or a later time. Returns whether it was kept.
    pub fn push(&mut self, stop_time: VehicleStopTime) -> bool {
        if let Some(last) = self.stop_times.last() {
            if last.stop_id == stop_time.stop_id && stop_time.timestamp >= last.timestamp {
                return false;
            }
        }
        self.stop_times.push(stop_time);
        true
    }

    pub fn len(&self) -> usize {
        self.stop_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stop_times.is_empty()
    }

    pub fn as_slice(&self) -> &[VehicleStopTime] {
        &self.stop_times
    }

    pub fn into_vec(self) -> Vec<VehicleStopTime> {
        self.stop_times
    }
}

/// Totals for one matcher pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MatchSummary {
    pub vehicles: usize,
    pub stop_times: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Result of matching a single vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleMatch {
    /// No positions since the watermark; nothing written, watermark untouched.
    NoPositions,
    /// `stop_times` were written and the watermark advanced.
    Matched { positions: usize, stop_times: usize },
}

/// Matches one vehicle's positions in `[last_analyzed, now)`.
///
/// Any store error leaves the watermark where it was, so the same range is
/// retried on the next pass.
#[tracing::instrument(skip_all, fields(vehicle_id = %vehicle.vehicle_id))]
pub async fn match_vehicle(
    store: &dyn Store,
    vehicle: &Vehicle,
    max_distance_m: f64,
    now: DateTime<Utc>,
) -> Result<VehicleMatch> {
    let positions = store
        .positions_since(&vehicle.vehicle_id, vehicle.last_analyzed, now)
        .await?;
    if positions.is_empty() {
        debug!(after = %vehicle.last_analyzed, "No positions available for vehicle");
        return Ok(VehicleMatch::NoPositions);
    }
    debug!(positions = positions.len(), after = %vehicle.last_analyzed, "Processing positions");

    let mut sequence = StopTimeSequence::new();
    for position in &positions {
        let Some(stop) = store.nearest_stop(position.location, max_distance_m).await? else {
            continue;
        };
        let stop_time = stop_time_for(vehicle, position, stop.stop_id);
        let (stop_id, timestamp) = (stop_time.stop_id.clone(), stop_time.timestamp);
        if sequence.push(stop_time) {
            debug!(stop_id = %stop_id, timestamp = %timestamp, "Added stop time");
        } else {
            debug!(stop_id = %stop_id, "Skip stop time at same stop");
        }
    }

    let stop_times = sequence.len();
    store.insert_stop_times(sequence.as_slice()).await?;
    // Positions exist only if now > last_analyzed, so this moves forward.
    store
        .update_vehicle_watermark(&vehicle.vehicle_id, now)
        .await?;

    info!(positions = positions.len(), stop_times, "Added stop times for vehicle");
    Ok(VehicleMatch::Matched {
        positions: positions.len(),
        stop_times,
    })
}

/// Runs [`match_vehicle`] over every vehicle in the catalog, one at a time.
///
/// A failure for one vehicle is logged and the pass continues with the
/// next. Only failing to list the catalog is an error.
#[tracing::instrument(skip_all)]
pub async fn make_vehicle_stop_times(
    store: &dyn Store,
    max_distance_m: f64,
    now: DateTime<Utc>,
) -> Result<MatchSummary> {
    let vehicles = store.vehicles().await?;
    if vehicles.is_empty() {
        debug!("No vehicles available for making stop times");
        return Ok(MatchSummary::default());
    }

    let mut summary = MatchSummary {
        vehicles: vehicles.len(),
        ..Default::default()
    };
    for vehicle in &vehicles {
        match match_vehicle(store, vehicle, max_distance_m, now).await {
            Ok(VehicleMatch::Matched { stop_times, .. }) => summary.stop_times += stop_times,
            Ok(VehicleMatch::NoPositions) => summary.skipped += 1,
            Err(e) => {
                error!(vehicle_id = %vehicle.vehicle_id, error = %format!("{e:#}"), "Failed to make stop times for vehicle");
                summary.failed += 1;
            }
        }
    }

    info!(
        vehicles = summary.vehicles,
        stop_times = summary.stop_times,
        skipped = summary.skipped,
        failed = summary.failed,
        "Stop matching pass complete"
    );
    Ok(summary)
}

fn stop_time_for(vehicle: &Vehicle, position: &VehiclePosition, stop_id: String) -> VehicleStopTime {
    VehicleStopTime {
        vehicle_id: vehicle.vehicle_id.clone(),
        route: position.route.clone(),
        trip_id: position.trip_id.clone(),
        stop_id,
        timestamp: position.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GeoPoint, Stop, VehicleTuple};
    use crate::store::{MemoryStore, StopIndex};
    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Fails stop-time writes while `fail_stop_times` is set.
    struct FailingStopTimes {
        inner: MemoryStore,
        fail_stop_times: AtomicBool,
    }

    #[async_trait]
    impl Store for FailingStopTimes {
        async fn insert_positions(&self, batch: &[VehiclePosition]) -> Result<()> {
            self.inner.insert_positions(batch).await
        }
        async fn insert_stop_times(&self, batch: &[VehicleStopTime]) -> Result<()> {
            if self.fail_stop_times.load(Ordering::SeqCst) {
                bail!("database is locked");
            }
            self.inner.insert_stop_times(batch).await
        }
        async fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<()> {
            self.inner.insert_vehicle(vehicle).await
        }
        async fn update_vehicle_watermark(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
            self.inner.update_vehicle_watermark(id, at).await
        }
        async fn distinct_vehicle_tuples(&self) -> Result<Vec<VehicleTuple>> {
            self.inner.distinct_vehicle_tuples().await
        }
        async fn contains_vehicle(&self, id: &str) -> Result<bool> {
            self.inner.contains_vehicle(id).await
        }
        async fn vehicles(&self) -> Result<Vec<Vehicle>> {
            self.inner.vehicles().await
        }
        async fn positions_since(
            &self,
            id: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<VehiclePosition>> {
            self.inner.positions_since(id, from, to).await
        }
        async fn nearest_stop(&self, point: GeoPoint, max: f64) -> Result<Option<Stop>> {
            self.inner.nearest_stop(point, max).await
        }
    }

    const STOP_A: (f64, f64) = (30.2600, -97.7400);
    const STOP_B: (f64, f64) = (30.2700, -97.7400);
    const NOWHERE: (f64, f64) = (30.2650, -97.7400);

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn stop(id: &str, (lat, lon): (f64, f64)) -> Stop {
        Stop {
            stop_id: id.to_string(),
            name: None,
            location: GeoPoint::new(lat, lon),
        }
    }

    fn position(secs: i64, (lat, lon): (f64, f64)) -> VehiclePosition {
        VehiclePosition {
            vehicle_id: "V1".to_string(),
            route: "803".to_string(),
            route_id: "803".to_string(),
            trip_id: "T1".to_string(),
            location: GeoPoint::new(lat, lon),
            timestamp: t(secs),
        }
    }

    fn stop_time(stop_id: &str, secs: i64) -> VehicleStopTime {
        VehicleStopTime {
            vehicle_id: "V1".to_string(),
            route: "803".to_string(),
            trip_id: "T1".to_string(),
            stop_id: stop_id.to_string(),
            timestamp: t(secs),
        }
    }

    async fn store_with(positions: &[VehiclePosition], watermark: DateTime<Utc>) -> MemoryStore {
        let store = MemoryStore::new(StopIndex::new(vec![stop("A", STOP_A), stop("B", STOP_B)]));
        store.insert_positions(positions).await.unwrap();
        let tuple = VehicleTuple::from(&position(0, STOP_A));
        store
            .insert_vehicle(&Vehicle::discovered(tuple, watermark))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_sequence_collapses_dwell() {
        let mut seq = StopTimeSequence::new();
        assert!(seq.push(stop_time("A", 10)));
        assert!(!seq.push(stop_time("A", 20)));
        assert!(seq.push(stop_time("B", 30)));
        assert!(seq.push(stop_time("A", 40)));
        assert_eq!(
            seq.into_vec(),
            vec![stop_time("A", 10), stop_time("B", 30), stop_time("A", 40)]
        );
    }

    #[test]
    fn test_sequence_drops_same_stop_same_time() {
        let mut seq = StopTimeSequence::new();
        seq.push(stop_time("A", 10));
        assert!(!seq.push(stop_time("A", 10)));
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn test_sequence_keeps_same_stop_earlier_time() {
        let mut seq = StopTimeSequence::new();
        seq.push(stop_time("A", 10));
        assert!(seq.push(stop_time("A", 5)));
    }

    #[tokio::test]
    async fn test_dwell_then_next_stop() {
        let positions = [position(10, STOP_A), position(20, STOP_A), position(30, STOP_B)];
        let store = store_with(&positions, t(0)).await;

        let summary = make_vehicle_stop_times(&store, 100.0, t(60)).await.unwrap();
        assert_eq!(summary.stop_times, 2);
        assert_eq!(store.stop_times().await, vec![stop_time("A", 10), stop_time("B", 30)]);
        assert_eq!(store.vehicle("V1").await.unwrap().last_analyzed, t(60));
    }

    #[tokio::test]
    async fn test_far_positions_yield_nothing() {
        let store = store_with(&[position(10, NOWHERE)], t(0)).await;

        let summary = make_vehicle_stop_times(&store, 100.0, t(60)).await.unwrap();
        assert_eq!(summary.stop_times, 0);
        assert!(store.stop_times().await.is_empty());
        // The range was still processed.
        assert_eq!(store.vehicle("V1").await.unwrap().last_analyzed, t(60));
    }

    #[tokio::test]
    async fn test_positions_before_watermark_are_ignored() {
        let positions = [position(10, STOP_A), position(30, STOP_B)];
        let store = store_with(&positions, t(20)).await;

        make_vehicle_stop_times(&store, 100.0, t(60)).await.unwrap();
        assert_eq!(store.stop_times().await, vec![stop_time("B", 30)]);
    }

    #[tokio::test]
    async fn test_rerun_adds_nothing_and_watermark_holds() {
        let positions = [position(10, STOP_A), position(30, STOP_B)];
        let store = store_with(&positions, t(0)).await;

        make_vehicle_stop_times(&store, 100.0, t(60)).await.unwrap();
        let summary = make_vehicle_stop_times(&store, 100.0, t(90)).await.unwrap();
        assert_eq!(summary.stop_times, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.stop_times().await.len(), 2);
        assert_eq!(store.vehicle("V1").await.unwrap().last_analyzed, t(60));
    }

    #[tokio::test]
    async fn test_clock_behind_watermark_leaves_it_alone() {
        let store = store_with(&[position(10, STOP_A)], t(100)).await;
        let vehicle = store.vehicle("V1").await.unwrap();

        let outcome = match_vehicle(&store, &vehicle, 100.0, t(50)).await.unwrap();
        assert_eq!(outcome, VehicleMatch::NoPositions);
        assert_eq!(store.vehicle("V1").await.unwrap().last_analyzed, t(100));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_watermark_for_retry() {
        let positions = [position(10, STOP_A), position(30, STOP_B)];
        let store = FailingStopTimes {
            inner: store_with(&positions, t(0)).await,
            fail_stop_times: AtomicBool::new(true),
        };

        let summary = make_vehicle_stop_times(&store, 100.0, t(60)).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.stop_times, 0);
        assert!(store.inner.stop_times().await.is_empty());
        assert_eq!(store.inner.vehicle("V1").await.unwrap().last_analyzed, t(0));

        store.fail_stop_times.store(false, Ordering::SeqCst);
        let summary = make_vehicle_stop_times(&store, 100.0, t(90)).await.unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.stop_times, 2);
        assert_eq!(
            store.inner.stop_times().await,
            vec![stop_time("A", 10), stop_time("B", 30)]
        );
        assert_eq!(store.inner.vehicle("V1").await.unwrap().last_analyzed, t(90));
    }

    #[tokio::test]
    async fn test_no_vehicles_is_benign() {
        let store = MemoryStore::new(StopIndex::new(Vec::new()));
        let summary = make_vehicle_stop_times(&store, 100.0, t(0)).await.unwrap();
        assert_eq!(summary, MatchSummary::default());
    }
}
