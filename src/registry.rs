//! Discovery of vehicles that appear in stored positions but not yet in the
//! vehicle catalog.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::model::Vehicle;
use crate::store::Store;

/// Registers every vehicle id present in stored positions and missing from
/// the catalog, watermarked at `now`. Returns how many were added.
///
/// Re-running with no new vehicle ids is a no-op. When one vehicle id shows
/// up under several tuples (e.g. multiple trips) only the first is used.
#[tracing::instrument(skip_all)]
pub async fn discover_new_vehicles(store: &dyn Store, now: DateTime<Utc>) -> Result<usize> {
    debug!("Check for new vehicles");
    let tuples = store.distinct_vehicle_tuples().await?;
    let mut added = 0;

    for tuple in tuples {
        if store.contains_vehicle(&tuple.vehicle_id).await? {
            continue;
        }
        debug!(vehicle_id = %tuple.vehicle_id, "Adding new vehicle to catalog");
        store.insert_vehicle(&Vehicle::discovered(tuple, now)).await?;
        added += 1;
    }

    info!(added, "Inserted new vehicles");
    Ok(added)
}

/// Decides when discovery runs: on the first iteration, then once per interval.
#[derive(Debug, Clone)]
pub struct DiscoverySchedule {
    interval: Duration,
    next: Option<DateTime<Utc>>,
}

impl DiscoverySchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    /// Returns whether discovery is due at `now`; if so, schedules the next run.
    pub fn poll_due(&mut self, now: DateTime<Utc>) -> bool {
        let due = self.next.is_none_or(|next| now > next);
        if due {
            let next = now + self.interval;
            info!(next = %next, "Next check for new vehicles scheduled");
            self.next = Some(next);
        }
        due
    }

    pub fn next(&self) -> Option<DateTime<Utc>> {
        self.next
    }
}
