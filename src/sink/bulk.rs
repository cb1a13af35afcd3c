//! Search-index style sink: OpenSearch bulk NDJSON.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::json;

use super::{Sink, ensure_schema};
use crate::error::SinkError;
use crate::types::{SchemaKind, TripRecord};

/// Appends each batch as a bulk request body (`{"index":{...}}` action line + document line)
/// to `<root>/<index>.ndjson`.
///
/// Every batch is written with a single `write_all` so a failed batch never leaves a
/// dangling action line without its document.
#[derive(Debug)]
pub struct BulkIndexSink {
    schema: SchemaKind,
    root: PathBuf,
    index: String,
}

impl BulkIndexSink {
    pub fn new(root: impl AsRef<Path>, schema: SchemaKind) -> Self {
        Self {
            schema,
            root: root.as_ref().to_path_buf(),
            index: schema.table_name().to_string(),
        }
    }

    /// Override the index name (defaults to the schema's table name).
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(format!("{}.ndjson", self.index))
    }

    fn render(&self, batch: &[TripRecord]) -> Result<Vec<u8>, SinkError> {
        let action = serde_json::to_string(&json!({ "index": { "_index": self.index } }))?;
        let mut body = Vec::with_capacity(batch.len() * 256);
        for record in batch {
            body.extend_from_slice(action.as_bytes());
            body.push(b'\n');
            serde_json::to_writer(&mut body, record)?;
            body.push(b'\n');
        }
        Ok(body)
    }
}

impl Sink for BulkIndexSink {
    fn expected_schema(&self) -> SchemaKind {
        self.schema
    }

    fn deliver(&mut self, batch: &[TripRecord]) -> Result<(), SinkError> {
        ensure_schema(self.schema, batch)?;
        let body = self.render(batch)?;

        fs::create_dir_all(&self.root)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())?;
        let mut out = BufWriter::new(file);
        out.write_all(&body)?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::BulkIndexSink;
    use crate::sink::Sink;
    use crate::types::{SchemaKind, TripRecord, YellowTrip};

    #[test]
    fn writes_action_and_document_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = BulkIndexSink::new(dir.path(), SchemaKind::Yellow).with_index("trips");
        let batch = vec![
            TripRecord::Yellow(YellowTrip {
                vendor_id: Some(2),
                ..Default::default()
            }),
            TripRecord::Yellow(YellowTrip::default()),
        ];
        sink.deliver(&batch).unwrap();

        let body = std::fs::read_to_string(dir.path().join("trips.ndjson")).unwrap();
        let lines: Vec<serde_json::Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["index"]["_index"], "trips");
        assert_eq!(lines[1]["vendor_id"], 2);
        assert!(lines[3]["vendor_id"].is_null());
    }
}
