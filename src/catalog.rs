//! Static stop catalog loaded from a GTFS `stops.txt`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;
use tracing::{info, warn};

use crate::model::{GeoPoint, Stop};

#[derive(Debug, Deserialize)]
struct StopRecord {
    stop_id: String,
    #[serde(default)]
    stop_name: Option<String>,
    #[serde(default)]
    stop_lat: Option<f64>,
    #[serde(default)]
    stop_lon: Option<f64>,
}

/// Reads stops from a GTFS `stops.txt` file at `path`.
pub fn load_stops(path: &str) -> Result<Vec<Stop>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening stop catalog {path}"))?;
    let stops = read_stops(file).with_context(|| format!("reading stop catalog {path}"))?;
    info!(path, stops = stops.len(), "Stop catalog loaded");
    Ok(stops)
}

/// Reads stops from GTFS `stops.txt` CSV content.
///
/// Extra columns are ignored. Rows without coordinates (e.g. generic nodes)
/// are skipped with a warning.
pub fn read_stops<R: Read>(reader: R) -> Result<Vec<Stop>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut stops = Vec::new();

    for result in rdr.deserialize() {
        let record: StopRecord = result?;
        match (record.stop_lat, record.stop_lon) {
            (Some(lat), Some(lon)) => stops.push(Stop {
                stop_id: record.stop_id,
                name: record.stop_name.filter(|n| !n.is_empty()),
                location: GeoPoint::new(lat, lon),
            }),
            _ => warn!(stop_id = %record.stop_id, "Stop has no coordinates, skipping"),
        }
    }

    Ok(stops)
}
