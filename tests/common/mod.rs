#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;

use tripdata_ingest::decoder::Decoder;
use tripdata_ingest::error::{DecodeError, DecodeResult, SinkError};
use tripdata_ingest::execution::{DispatchEvent, DispatchObserver};
use tripdata_ingest::sink::Sink;
use tripdata_ingest::types::{GreenTrip, SchemaKind, TripRecord, YellowTrip};

/// 2024-01-01 00:00:00 UTC in epoch millis.
pub const JAN_1_2024_MILLIS: i64 = 1_704_067_200_000;

pub enum Col {
    I32(Vec<i32>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Str(Vec<&'static str>),
}

/// Write a single-row-group Parquet file. `columns` must follow the schema's column order.
pub fn write_parquet(path: &Path, schema: &str, columns: Vec<Col>) {
    let schema = Arc::new(parse_message_type(schema).unwrap());
    let props = Arc::new(WriterProperties::builder().build());
    let file = File::create(path).unwrap();
    let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();

    let mut rg = writer.next_row_group().unwrap();
    let mut idx = 0usize;
    while let Some(mut col) = rg.next_column().unwrap() {
        match (col.untyped(), &columns[idx]) {
            (ColumnWriter::Int32ColumnWriter(w), Col::I32(v)) => {
                w.write_batch(v, None, None).unwrap();
            }
            (ColumnWriter::Int64ColumnWriter(w), Col::I64(v)) => {
                w.write_batch(v, None, None).unwrap();
            }
            (ColumnWriter::DoubleColumnWriter(w), Col::F64(v)) => {
                w.write_batch(v, None, None).unwrap();
            }
            (ColumnWriter::ByteArrayColumnWriter(w), Col::Str(v)) => {
                let vals: Vec<ByteArray> = v.iter().map(|s| ByteArray::from(*s)).collect();
                w.write_batch(&vals, None, None).unwrap();
            }
            _ => panic!("column {idx} does not match its writer"),
        }
        col.close().unwrap();
        idx += 1;
    }
    rg.close().unwrap();
    writer.close().unwrap();
}

/// Green file with `rows` rows; pickup times are one minute apart from 2024-01-01.
pub fn write_green(path: &Path, rows: usize) {
    let schema = r#"
        message schema {
          REQUIRED INT32 VendorID;
          REQUIRED INT64 lpep_pickup_datetime;
          REQUIRED BINARY store_and_fwd_flag (UTF8);
          REQUIRED DOUBLE fare_amount;
          REQUIRED DOUBLE ehail_fee;
          REQUIRED INT32 trip_type;
        }
    "#;
    write_parquet(
        path,
        schema,
        vec![
            Col::I32((0..rows).map(|i| (i % 2) as i32 + 1).collect()),
            Col::I64((0..rows).map(|i| JAN_1_2024_MILLIS + i as i64 * 60_000).collect()),
            Col::Str(vec!["N"; rows]),
            Col::F64((0..rows).map(|i| 5.0 + i as f64).collect()),
            Col::F64(vec![0.0; rows]),
            Col::I32(vec![1; rows]),
        ],
    );
}

/// Yellow file with `rows` rows. `passenger_count` is stored as a double, as some exports do.
pub fn write_yellow(path: &Path, rows: usize) {
    let schema = r#"
        message schema {
          REQUIRED INT32 VendorID;
          REQUIRED INT64 TPEP_PICKUP_DATETIME;
          REQUIRED DOUBLE passenger_count;
          REQUIRED DOUBLE fare_amount;
        }
    "#;
    write_parquet(
        path,
        schema,
        vec![
            Col::I32(vec![2; rows]),
            Col::I64((0..rows).map(|i| JAN_1_2024_MILLIS + i as i64 * 1_000).collect()),
            Col::F64(vec![1.0; rows]),
            Col::F64(vec![12.5; rows]),
        ],
    );
}

/// A valid Parquet file that is neither green nor yellow.
pub fn write_unknown(path: &Path) {
    let schema = r#"
        message schema {
          REQUIRED INT64 id;
          REQUIRED BINARY name (UTF8);
        }
    "#;
    write_parquet(path, schema, vec![Col::I64(vec![1, 2]), Col::Str(vec!["a", "b"])]);
}

/// Poll `cond` every 10ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    out.sort();
    out
}

/// Ordered log shared between the recording sink and observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Permits(usize),
    Deliver(usize),
}

pub type StepLog = Arc<Mutex<Vec<Step>>>;

/// Decoder double with a fixed classification and row count.
pub struct StubDecoder {
    pub detected: Option<SchemaKind>,
    pub rows: usize,
    pub fail_decode: bool,
    pub decode_calls: AtomicUsize,
}

impl StubDecoder {
    pub fn new(detected: Option<SchemaKind>, rows: usize) -> Self {
        Self {
            detected,
            rows,
            fail_decode: false,
            decode_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(detected: SchemaKind) -> Self {
        Self {
            fail_decode: true,
            ..Self::new(Some(detected), 0)
        }
    }

    pub fn decode_calls(&self) -> usize {
        self.decode_calls.load(Ordering::SeqCst)
    }
}

impl Decoder for StubDecoder {
    fn detect_schema(&self, _path: &Path) -> Option<SchemaKind> {
        self.detected
    }

    fn decode(&self, path: &Path, schema: SchemaKind) -> DecodeResult<Vec<TripRecord>> {
        self.decode_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_decode {
            return Err(DecodeError::InvalidValue {
                row: 1,
                column: "fare_amount".to_string(),
                raw: "abc".to_string(),
                message: format!("expected number in {}", path.display()),
            });
        }
        Ok((0..self.rows)
            .map(|i| match schema {
                SchemaKind::Green => TripRecord::Green(GreenTrip {
                    vendor_id: Some(i as i32),
                    ..GreenTrip::default()
                }),
                SchemaKind::Yellow => TripRecord::Yellow(YellowTrip {
                    vendor_id: Some(i as i32),
                    ..YellowTrip::default()
                }),
            })
            .collect())
    }
}

/// Sink double that records batch sizes and can fail on a given (1-based) batch.
pub struct RecordingSink {
    pub schema: SchemaKind,
    pub log: StepLog,
    pub fail_on_batch: Option<usize>,
    delivered: usize,
}

impl RecordingSink {
    pub fn new(schema: SchemaKind, log: StepLog) -> Self {
        Self {
            schema,
            log,
            fail_on_batch: None,
            delivered: 0,
        }
    }
}

impl Sink for RecordingSink {
    fn expected_schema(&self) -> SchemaKind {
        self.schema
    }

    fn deliver(&mut self, batch: &[TripRecord]) -> Result<(), SinkError> {
        if self.fail_on_batch == Some(self.delivered + 1) {
            return Err(SinkError::Rejected("index is read-only".to_string()));
        }
        self.delivered += 1;
        self.log.lock().unwrap().push(Step::Deliver(batch.len()));
        Ok(())
    }
}

/// Records permit acquisitions into a [`StepLog`] and keeps every event.
#[derive(Default)]
pub struct RecordingObserver {
    pub log: StepLog,
    pub events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingObserver {
    pub fn with_log(log: StepLog) -> Self {
        Self {
            log,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl DispatchObserver for RecordingObserver {
    fn on_event(&self, event: &DispatchEvent) {
        if let DispatchEvent::PermitsAcquired { permits, .. } = event {
            self.log.lock().unwrap().push(Step::Permits(*permits));
        }
        self.events.lock().unwrap().push(event.clone());
    }
}
