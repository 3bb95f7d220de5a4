use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::model::VehiclePosition;

/// Drops positions whose timestamp has not changed since the vehicle was
/// last seen.
#[derive(Debug, Default, Clone)]
pub struct Deduplicator {
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the positions of `batch` that moved their vehicle's timestamp,
    /// in their original order.
    ///
    /// Every examined position overwrites the last-seen entry, but whether it
    /// is kept is decided against the value from before that overwrite. A
    /// vehicle absent from the map is always kept.
    pub fn filter(&mut self, batch: Vec<VehiclePosition>) -> Vec<VehiclePosition> {
        batch
            .into_iter()
            .filter(|p| {
                let previous = self.last_seen.insert(p.vehicle_id.clone(), p.timestamp);
                previous != Some(p.timestamp)
            })
            .collect()
    }

    pub fn last_seen(&self, vehicle_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(vehicle_id).copied()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GeoPoint;
    use chrono::{Duration, TimeZone};

    fn position(vehicle_id: &str, secs: i64) -> VehiclePosition {
        VehiclePosition {
            vehicle_id: vehicle_id.to_string(),
            route: "803".to_string(),
            route_id: "803".to_string(),
            trip_id: "T1".to_string(),
            location: GeoPoint::new(30.0, -97.0),
            timestamp: Utc.with_ymd_and_hms(2015, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs),
        }
    }

    #[test]
    fn test_first_sight_is_accepted() {
        let mut dedup = Deduplicator::new();
        let out = dedup.filter(vec![position("V1", 0), position("V2", 0)]);
        assert_eq!(out.len(), 2);
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_refeeding_same_batch_is_noop() {
        let mut dedup = Deduplicator::new();
        let batch = vec![position("V1", 0), position("V2", 5), position("V3", 9)];

        assert_eq!(dedup.filter(batch.clone()).len(), 3);
        assert!(dedup.filter(batch).is_empty());
    }

    #[test]
    fn test_advanced_timestamp_is_accepted() {
        let mut dedup = Deduplicator::new();
        dedup.filter(vec![position("V1", 0)]);

        let out = dedup.filter(vec![position("V1", 30), position("V2", 0)]);
        assert_eq!(out.len(), 2);
        assert_eq!(dedup.last_seen("V1"), Some(position("V1", 30).timestamp));
    }

    #[test]
    fn test_earlier_timestamp_counts_as_change() {
        // Only equality is a duplicate; a feed that goes backwards is still new data.
        let mut dedup = Deduplicator::new();
        dedup.filter(vec![position("V1", 30)]);

        assert_eq!(dedup.filter(vec![position("V1", 0)]).len(), 1);
    }

    #[test]
    fn test_duplicate_within_one_batch_keeps_first() {
        let mut dedup = Deduplicator::new();
        let out = dedup.filter(vec![position("V1", 0), position("V1", 0)]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_preserves_order() {
        let mut dedup = Deduplicator::new();
        let out = dedup.filter(vec![position("B", 0), position("A", 0), position("C", 0)]);
        let ids: Vec<_> = out.iter().map(|p| p.vehicle_id.as_str()).collect();
        assert_eq!(ids, ["B", "A", "C"]);
    }
}
