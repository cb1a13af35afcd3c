//! File classification and row decoding.
//!
//! The dispatcher only talks to the [`Decoder`] trait. [`parquet::ParquetTripDecoder`] is the
//! production implementation; tests substitute their own.
//!
//! Classification is purely by column names (compared case-insensitively):
//!
//! - green: has `lpep_pickup_datetime`, `ehail_fee` and `trip_type`
//! - yellow: has `tpep_pickup_datetime` and neither `ehail_fee` nor `trip_type`

pub mod parquet;

use std::collections::HashSet;
use std::path::Path;

use crate::error::DecodeResult;
use crate::types::{SchemaKind, TripRecord};

pub use self::parquet::ParquetTripDecoder;

const GREEN_INDICATOR: &str = "lpep_pickup_datetime";
const YELLOW_INDICATOR: &str = "tpep_pickup_datetime";
const GREEN_ONLY: [&str; 2] = ["ehail_fee", "trip_type"];

/// Schema sniffing and row materialization for one file format.
pub trait Decoder: Send + Sync {
    /// Classify a file. Unreadable or unrecognized files yield `None`; this never fails.
    fn detect_schema(&self, path: &Path) -> Option<SchemaKind>;

    /// Decode every row of `path`, in file order, as `schema`.
    fn decode(&self, path: &Path, schema: SchemaKind) -> DecodeResult<Vec<TripRecord>>;
}

/// Classify a column set.
pub fn classify_columns<'a, I>(columns: I) -> Option<SchemaKind>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: HashSet<String> = columns.into_iter().map(str::to_ascii_lowercase).collect();
    let green_only = GREEN_ONLY.iter().filter(|c| names.contains(**c)).count();

    if names.contains(GREEN_INDICATOR) && green_only == GREEN_ONLY.len() {
        Some(SchemaKind::Green)
    } else if names.contains(YELLOW_INDICATOR) && green_only == 0 {
        Some(SchemaKind::Yellow)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::classify_columns;
    use crate::types::SchemaKind;

    #[test]
    fn green_requires_all_indicators() {
        let cols = ["VendorID", "LPEP_PICKUP_DATETIME", "ehail_fee", "trip_type"];
        assert_eq!(classify_columns(cols), Some(SchemaKind::Green));

        let missing = ["VendorID", "lpep_pickup_datetime", "ehail_fee"];
        assert_eq!(classify_columns(missing), None);
    }

    #[test]
    fn yellow_rejects_green_only_columns() {
        let cols = ["VendorID", "tpep_pickup_datetime", "fare_amount"];
        assert_eq!(classify_columns(cols), Some(SchemaKind::Yellow));

        let hybrid = ["tpep_pickup_datetime", "trip_type"];
        assert_eq!(classify_columns(hybrid), None);
    }

    #[test]
    fn unrelated_columns_are_unknown() {
        assert_eq!(classify_columns(["id", "name"]), None);
        assert_eq!(classify_columns(std::iter::empty()), None);
    }
}
