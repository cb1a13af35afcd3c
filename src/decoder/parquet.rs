//! Parquet decoder for green/yellow trip files.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::{Field, Row};
use tracing::debug;

use super::{Decoder, classify_columns};
use crate::error::{DecodeError, DecodeResult};
use crate::types::{GreenTrip, SchemaKind, TripRecord, YellowTrip};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reads trip rows through the Parquet record API.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParquetTripDecoder;

impl ParquetTripDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ParquetTripDecoder {
    fn detect_schema(&self, path: &Path) -> Option<SchemaKind> {
        match detect_parquet_schema(path) {
            Ok(kind) => kind,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "schema detection failed");
                None
            }
        }
    }

    fn decode(&self, path: &Path, schema: SchemaKind) -> DecodeResult<Vec<TripRecord>> {
        let reader = SerializedFileReader::try_from(path)?;
        if classify_columns(top_level_columns(&reader).iter().map(String::as_str)) != Some(schema) {
            return Err(DecodeError::SchemaMismatch {
                expected: schema,
                path: path.to_path_buf(),
            });
        }

        let mut rows = Vec::new();
        for (idx0, row_res) in reader.into_iter().enumerate() {
            let row = row_res?;
            let view = RowView::new(idx0 + 1, &row);
            let record = match schema {
                SchemaKind::Green => TripRecord::Green(view.green()?),
                SchemaKind::Yellow => TripRecord::Yellow(view.yellow()?),
            };
            rows.push(record);
        }
        Ok(rows)
    }
}

/// Classify a Parquet file by its footer schema, without reading any row groups.
pub fn detect_parquet_schema(path: &Path) -> DecodeResult<Option<SchemaKind>> {
    if !path.is_file() {
        return Ok(None);
    }
    let reader = SerializedFileReader::try_from(path)?;
    let cols = top_level_columns(&reader);
    Ok(classify_columns(cols.iter().map(String::as_str)))
}

fn top_level_columns(reader: &SerializedFileReader<File>) -> Vec<String> {
    reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .root_schema()
        .get_fields()
        .iter()
        .map(|t| t.name().to_string())
        .collect()
}

/// Case-insensitive column lookup over one materialized row.
struct RowView<'a> {
    row: usize,
    fields: HashMap<String, &'a Field>,
}

impl<'a> RowView<'a> {
    fn new(row: usize, r: &'a Row) -> Self {
        let fields = r
            .get_column_iter()
            .map(|(name, field)| (name.to_ascii_lowercase(), field))
            .collect();
        Self { row, fields }
    }

    fn get(&self, column: &str) -> Option<&'a Field> {
        match self.fields.get(&column.to_ascii_lowercase()) {
            None | Some(Field::Null) => None,
            Some(f) => Some(*f),
        }
    }

    fn invalid(&self, column: &str, f: &Field, message: &str) -> DecodeError {
        DecodeError::InvalidValue {
            row: self.row,
            column: column.to_string(),
            raw: f.to_string(),
            message: message.to_string(),
        }
    }

    fn int(&self, column: &str) -> DecodeResult<Option<i32>> {
        let Some(f) = self.get(column) else {
            return Ok(None);
        };
        let wide: Option<i64> = match f {
            Field::Byte(v) => Some(i64::from(*v)),
            Field::Short(v) => Some(i64::from(*v)),
            Field::Int(v) => Some(i64::from(*v)),
            Field::Long(v) => Some(*v),
            Field::UByte(v) => Some(i64::from(*v)),
            Field::UShort(v) => Some(i64::from(*v)),
            Field::UInt(v) => Some(i64::from(*v)),
            Field::ULong(v) => i64::try_from(*v).ok(),
            // Some TLC exports store counts as doubles (e.g. `passenger_count = 1.0`).
            Field::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            Field::Double(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            _ => return Err(self.invalid(column, f, "expected integer")),
        };
        wide.and_then(|v| i32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| self.invalid(column, f, "integer out of range for i32"))
    }

    fn float(&self, column: &str) -> DecodeResult<Option<f64>> {
        let Some(f) = self.get(column) else {
            return Ok(None);
        };
        match f {
            Field::Float(v) => Ok(Some(f64::from(*v))),
            Field::Double(v) => Ok(Some(*v)),
            Field::Int(v) => Ok(Some(f64::from(*v))),
            Field::Long(v) => Ok(Some(*v as f64)),
            Field::Short(v) => Ok(Some(f64::from(*v))),
            _ => Err(self.invalid(column, f, "expected number")),
        }
    }

    fn string(&self, column: &str) -> DecodeResult<Option<String>> {
        let Some(f) = self.get(column) else {
            return Ok(None);
        };
        match f {
            Field::Str(s) => Ok(Some(s.clone())),
            _ => Err(self.invalid(column, f, "expected string")),
        }
    }

    fn datetime(&self, column: &str) -> DecodeResult<Option<NaiveDateTime>> {
        let Some(f) = self.get(column) else {
            return Ok(None);
        };
        let parsed = match f {
            Field::TimestampMillis(ms) | Field::Long(ms) => {
                DateTime::from_timestamp_millis(*ms).map(|d| d.naive_utc())
            }
            Field::TimestampMicros(us) => DateTime::from_timestamp_micros(*us).map(|d| d.naive_utc()),
            Field::Date(days) => days_since_epoch(*days),
            Field::Str(s) => parse_datetime_str(s),
            _ => return Err(self.invalid(column, f, "expected timestamp")),
        };
        parsed
            .map(Some)
            .ok_or_else(|| self.invalid(column, f, "timestamp out of range"))
    }

    fn green(&self) -> DecodeResult<GreenTrip> {
        Ok(GreenTrip {
            vendor_id: self.int("VendorID")?,
            lpep_pickup_datetime: self.datetime("lpep_pickup_datetime")?,
            lpep_dropoff_datetime: self.datetime("lpep_dropoff_datetime")?,
            store_and_fwd_flag: self.string("store_and_fwd_flag")?,
            ratecode_id: self.int("RatecodeID")?,
            pu_location_id: self.int("PULocationID")?,
            do_location_id: self.int("DOLocationID")?,
            passenger_count: self.int("passenger_count")?,
            trip_distance: self.float("trip_distance")?,
            fare_amount: self.float("fare_amount")?,
            extra: self.float("extra")?,
            mta_tax: self.float("mta_tax")?,
            tip_amount: self.float("tip_amount")?,
            tolls_amount: self.float("tolls_amount")?,
            ehail_fee: self.float("ehail_fee")?,
            improvement_surcharge: self.float("improvement_surcharge")?,
            total_amount: self.float("total_amount")?,
            payment_type: self.int("payment_type")?,
            trip_type: self.int("trip_type")?,
            congestion_surcharge: self.float("congestion_surcharge")?,
        })
    }

    fn yellow(&self) -> DecodeResult<YellowTrip> {
        Ok(YellowTrip {
            vendor_id: self.int("VendorID")?,
            tpep_pickup_datetime: self.datetime("tpep_pickup_datetime")?,
            tpep_dropoff_datetime: self.datetime("tpep_dropoff_datetime")?,
            passenger_count: self.int("passenger_count")?,
            trip_distance: self.float("trip_distance")?,
            ratecode_id: self.int("RatecodeID")?,
            store_and_fwd_flag: self.string("store_and_fwd_flag")?,
            pu_location_id: self.int("PULocationID")?,
            do_location_id: self.int("DOLocationID")?,
            payment_type: self.int("payment_type")?,
            fare_amount: self.float("fare_amount")?,
            extra: self.float("extra")?,
            mta_tax: self.float("mta_tax")?,
            tip_amount: self.float("tip_amount")?,
            tolls_amount: self.float("tolls_amount")?,
            improvement_surcharge: self.float("improvement_surcharge")?,
            total_amount: self.float("total_amount")?,
            congestion_surcharge: self.float("congestion_surcharge")?,
        })
    }
}

fn days_since_epoch(days: i32) -> Option<NaiveDateTime> {
    // 719_163 = days from 0001-01-01 (CE day 1) to 1970-01-01.
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(719_163)?)?.and_hms_opt(0, 0, 0)
}

fn parse_datetime_str(s: &str) -> Option<NaiveDateTime> {
    let normalized = s.replacen('T', " ", 1);
    let head = normalized.get(..19)?;
    NaiveDateTime::parse_from_str(head, DATETIME_FORMAT).ok()
}
