//! Relational-style sink: appends rows to `<root>/<table>.csv`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Sink, ensure_schema};
use crate::error::SinkError;
use crate::types::{SchemaKind, TripRecord};

/// Appends each batch to a CSV "table" named after the schema (e.g. `green_tripdata.csv`).
///
/// The header row is written only when the table file is created or empty.
#[derive(Debug)]
pub struct TableSink {
    schema: SchemaKind,
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl TableSink {
    pub fn new(root: impl AsRef<Path>, schema: SchemaKind) -> Self {
        Self {
            schema,
            path: root.as_ref().join(format!("{}.csv", schema.table_name())),
            writer: None,
        }
    }

    /// Location of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>, SinkError> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            let needs_header = file.metadata()?.len() == 0;
            debug!(table = %self.path.display(), needs_header, "opened table file");
            self.writer = Some(
                csv::WriterBuilder::new()
                    .has_headers(needs_header)
                    .from_writer(file),
            );
        }
        self.writer
            .as_mut()
            .ok_or_else(|| SinkError::Rejected("table writer unavailable".to_string()))
    }
}

impl Sink for TableSink {
    fn expected_schema(&self) -> SchemaKind {
        self.schema
    }

    fn deliver(&mut self, batch: &[TripRecord]) -> Result<(), SinkError> {
        ensure_schema(self.schema, batch)?;
        let w = self.writer()?;
        for record in batch {
            match record {
                TripRecord::Green(t) => w.serialize(t)?,
                TripRecord::Yellow(t) => w.serialize(t)?,
            }
        }
        w.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(w) = self.writer.as_mut() {
            w.flush()?;
        }
        Ok(())
    }
}
