//! Core data model types for the ingestion pipeline.
//!
//! Files are classified into a [`SchemaKind`], decoded into ordered [`TripRecord`]s and handed
//! to a sink in batches. A [`ProcessingTask`] is the unit of work queued between the watcher
//! and the dispatcher.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The two trip data layouts understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    /// Green (street-hail livery) trips.
    Green,
    /// Yellow (medallion) trips.
    Yellow,
}

impl SchemaKind {
    /// Table / index name used by sinks for this schema.
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Green => "green_tripdata",
            Self::Yellow => "yellow_tripdata",
        }
    }

    /// The schema a sink configured for `self` would reject.
    pub fn other(self) -> Self {
        match self {
            Self::Green => Self::Yellow,
            Self::Yellow => Self::Green,
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Green => f.write_str("green"),
            Self::Yellow => f.write_str("yellow"),
        }
    }
}

impl FromStr for SchemaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "green" => Ok(Self::Green),
            "yellow" => Ok(Self::Yellow),
            other => Err(format!("unknown schema '{other}' (expected 'green' or 'yellow')")),
        }
    }
}

/// One green taxi trip. Every column is nullable in the source data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GreenTrip {
    pub vendor_id: Option<i32>,
    pub lpep_pickup_datetime: Option<NaiveDateTime>,
    pub lpep_dropoff_datetime: Option<NaiveDateTime>,
    pub store_and_fwd_flag: Option<String>,
    pub ratecode_id: Option<i32>,
    pub pu_location_id: Option<i32>,
    pub do_location_id: Option<i32>,
    pub passenger_count: Option<i32>,
    pub trip_distance: Option<f64>,
    pub fare_amount: Option<f64>,
    pub extra: Option<f64>,
    pub mta_tax: Option<f64>,
    pub tip_amount: Option<f64>,
    pub tolls_amount: Option<f64>,
    pub ehail_fee: Option<f64>,
    pub improvement_surcharge: Option<f64>,
    pub total_amount: Option<f64>,
    pub payment_type: Option<i32>,
    pub trip_type: Option<i32>,
    pub congestion_surcharge: Option<f64>,
}

/// One yellow taxi trip. Every column is nullable in the source data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YellowTrip {
    pub vendor_id: Option<i32>,
    pub tpep_pickup_datetime: Option<NaiveDateTime>,
    pub tpep_dropoff_datetime: Option<NaiveDateTime>,
    pub passenger_count: Option<i32>,
    pub trip_distance: Option<f64>,
    pub ratecode_id: Option<i32>,
    pub store_and_fwd_flag: Option<String>,
    pub pu_location_id: Option<i32>,
    pub do_location_id: Option<i32>,
    pub payment_type: Option<i32>,
    pub fare_amount: Option<f64>,
    pub extra: Option<f64>,
    pub mta_tax: Option<f64>,
    pub tip_amount: Option<f64>,
    pub tolls_amount: Option<f64>,
    pub improvement_surcharge: Option<f64>,
    pub total_amount: Option<f64>,
    pub congestion_surcharge: Option<f64>,
}

/// A decoded row of either schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TripRecord {
    Green(GreenTrip),
    Yellow(YellowTrip),
}

impl TripRecord {
    /// Schema this row belongs to.
    pub fn schema(&self) -> SchemaKind {
        match self {
            Self::Green(_) => SchemaKind::Green,
            Self::Yellow(_) => SchemaKind::Yellow,
        }
    }
}

impl From<GreenTrip> for TripRecord {
    fn from(t: GreenTrip) -> Self {
        Self::Green(t)
    }
}

impl From<YellowTrip> for TripRecord {
    fn from(t: YellowTrip) -> Self {
        Self::Yellow(t)
    }
}

/// A discovered file waiting for the dispatcher.
#[derive(Debug, Clone)]
pub struct ProcessingTask {
    /// Absolute path of the file in the watched directory.
    pub path: PathBuf,
    /// When the watcher handed the file over.
    pub enqueued_at: Instant,
}

impl ProcessingTask {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enqueued_at: Instant::now(),
        }
    }
}
