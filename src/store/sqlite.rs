use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::{StopIndex, Store};
use crate::model::{GeoPoint, Stop, Vehicle, VehiclePosition, VehicleStopTime, VehicleTuple};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS vehicle_position (
        vehicle_id TEXT NOT NULL,
        route TEXT NOT NULL,
        route_id TEXT NOT NULL,
        trip_id TEXT NOT NULL,
        lat REAL NOT NULL,
        lon REAL NOT NULL,
        timestamp INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS vehicle_id_timestamp ON vehicle_position (vehicle_id, timestamp)",
    r#"
    CREATE TABLE IF NOT EXISTS vehicles (
        vehicle_id TEXT PRIMARY KEY,
        route TEXT NOT NULL,
        route_id TEXT NOT NULL,
        trip_id TEXT NOT NULL,
        last_analyzed INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vehicle_stop_times (
        vehicle_id TEXT NOT NULL,
        route TEXT NOT NULL,
        trip_id TEXT NOT NULL,
        stop_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )
    "#,
];

type PositionRow = (String, String, String, String, f64, f64, i64);
type VehicleRow = (String, String, String, String, i64);

/// A [`Store`] backed by a SQLite database.
///
/// Timestamps are stored as Unix epoch milliseconds so range scans on the
/// `(vehicle_id, timestamp)` index compare numerically.
pub struct SqliteStore {
    pool: SqlitePool,
    stops: StopIndex,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url` and ensures the schema.
    pub async fn connect(url: &str, stops: StopIndex) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url '{url}'"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {url}"))?;

        Self::with_pool(pool, stops).await
    }

    /// A private in-memory database on a single pinned connection.
    pub async fn in_memory(stops: StopIndex) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::with_pool(pool, stops).await
    }

    async fn with_pool(pool: SqlitePool, stops: StopIndex) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&pool)
                .await
                .context("creating schema")?;
        }
        info!(stops = stops.len(), "SQLite store ready");
        Ok(Self { pool, stops })
    }
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp {ms} out of range"))
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_positions(&self, batch: &[VehiclePosition]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for p in batch {
            sqlx::query(
                r#"
                INSERT INTO vehicle_position (vehicle_id, route, route_id, trip_id, lat, lon, timestamp)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&p.vehicle_id)
            .bind(&p.route)
            .bind(&p.route_id)
            .bind(&p.trip_id)
            .bind(p.location.lat)
            .bind(p.location.lon)
            .bind(to_millis(p.timestamp))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_stop_times(&self, batch: &[VehicleStopTime]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for st in batch {
            sqlx::query(
                r#"
                INSERT INTO vehicle_stop_times (vehicle_id, route, trip_id, stop_id, timestamp)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&st.vehicle_id)
            .bind(&st.route)
            .bind(&st.trip_id)
            .bind(&st.stop_id)
            .bind(to_millis(st.timestamp))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vehicles (vehicle_id, route, route_id, trip_id, last_analyzed)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&vehicle.vehicle_id)
        .bind(&vehicle.route)
        .bind(&vehicle.route_id)
        .bind(&vehicle.trip_id)
        .bind(to_millis(vehicle.last_analyzed))
        .execute(&self.pool)
        .await
        .with_context(|| format!("inserting vehicle {}", vehicle.vehicle_id))?;
        Ok(())
    }

    async fn update_vehicle_watermark(&self, vehicle_id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE vehicles SET last_analyzed = ? WHERE vehicle_id = ?")
            .bind(to_millis(at))
            .bind(vehicle_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("vehicle {vehicle_id} not found");
        }
        Ok(())
    }

    async fn distinct_vehicle_tuples(&self) -> Result<Vec<VehicleTuple>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT DISTINCT vehicle_id, route, route_id, trip_id FROM vehicle_position",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(vehicle_id, route, route_id, trip_id)| VehicleTuple {
                vehicle_id,
                route,
                route_id,
                trip_id,
            })
            .collect())
    }

    async fn contains_vehicle(&self, vehicle_id: &str) -> Result<bool> {
        let found: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM vehicles WHERE vehicle_id = ?)")
                .bind(vehicle_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(found != 0)
    }

    async fn vehicles(&self) -> Result<Vec<Vehicle>> {
        let rows: Vec<VehicleRow> = sqlx::query_as(
            "SELECT vehicle_id, route, route_id, trip_id, last_analyzed FROM vehicles ORDER BY vehicle_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(vehicle_id, route, route_id, trip_id, last_analyzed)| {
                Ok(Vehicle {
                    vehicle_id,
                    route,
                    route_id,
                    trip_id,
                    last_analyzed: from_millis(last_analyzed)?,
                })
            })
            .collect()
    }

    async fn positions_since(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<VehiclePosition>> {
        let rows: Vec<PositionRow> = sqlx::query_as(
            r#"
            SELECT vehicle_id, route, route_id, trip_id, lat, lon, timestamp
            FROM vehicle_position
            WHERE vehicle_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp, rowid
            "#,
        )
        .bind(vehicle_id)
        .bind(to_millis(from))
        .bind(to_millis(to))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(vehicle_id, route, route_id, trip_id, lat, lon, ts)| {
                Ok(VehiclePosition {
                    vehicle_id,
                    route,
                    route_id,
                    trip_id,
                    location: GeoPoint::new(lat, lon),
                    timestamp: from_millis(ts)?,
                })
            })
            .collect()
    }

    async fn nearest_stop(&self, point: GeoPoint, max_distance_m: f64) -> Result<Option<Stop>> {
        Ok(self.stops.nearest(point, max_distance_m).cloned())
    }
}
