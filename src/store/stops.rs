use rstar::{AABB, RTree, RTreeObject};

use crate::geo::{bounding_box, haversine_distance};
use crate::model::{GeoPoint, Stop};

/// A stop's position in the R-tree, pointing back into the catalog.
#[derive(Debug, Clone, Copy)]
struct IndexedStop {
    idx: usize,
    lon: f64,
    lat: f64,
}

impl RTreeObject for IndexedStop {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lon, self.lat])
    }
}

/// R-tree over the static stop catalog for nearest-stop lookups.
pub struct StopIndex {
    stops: Vec<Stop>,
    tree: RTree<IndexedStop>,
}

impl StopIndex {
    pub fn new(stops: Vec<Stop>) -> Self {
        let indexed = stops
            .iter()
            .enumerate()
            .map(|(idx, s)| IndexedStop {
                idx,
                lon: s.location.lon,
                lat: s.location.lat,
            })
            .collect();

        Self {
            tree: RTree::bulk_load(indexed),
            stops,
        }
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// The closest stop within `max_distance_m` metres of `point`.
    ///
    /// Candidates come from a bounding-box query on the tree and are ranked
    /// by haversine distance; ties go to the lower stop id.
    pub fn nearest(&self, point: GeoPoint, max_distance_m: f64) -> Option<&Stop> {
        if max_distance_m.is_nan() || max_distance_m < 0.0 {
            return None;
        }
        let (lower, upper) = bounding_box(point, max_distance_m);
        let envelope = AABB::from_corners(lower, upper);

        self.tree
            .locate_in_envelope(&envelope)
            .map(|c| {
                let stop = &self.stops[c.idx];
                (haversine_distance(point, stop.location), stop)
            })
            .filter(|(dist, _)| *dist <= max_distance_m)
            .min_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| a.stop_id.cmp(&b.stop_id)))
            .map(|(_, stop)| stop)
    }
}
