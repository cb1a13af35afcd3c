//! Downstream destinations for decoded batches.
//!
//! A sink is bound to exactly one [`SchemaKind`]; the dispatcher quarantines files of the other
//! schema before decoding them. Two local implementations are provided:
//!
//! - [`TableSink`]: relational-style, one CSV table file per schema
//! - [`BulkIndexSink`]: search-index style, OpenSearch bulk NDJSON

pub mod bulk;
pub mod table;

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::SinkError;
use crate::types::{SchemaKind, TripRecord};

pub use bulk::BulkIndexSink;
pub use table::TableSink;

/// A destination for batches of decoded rows.
///
/// Batches already delivered are never rolled back, so implementations should tolerate
/// re-delivery of a file's leading batches after a partial failure.
pub trait Sink: Send {
    /// The only schema this sink accepts.
    fn expected_schema(&self) -> SchemaKind;

    /// Deliver one batch. An error aborts the rest of the file.
    fn deliver(&mut self, batch: &[TripRecord]) -> Result<(), SinkError>;

    /// Flush buffered state. Called once at pipeline shutdown.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn expected_schema(&self) -> SchemaKind {
        (**self).expected_schema()
    }

    fn deliver(&mut self, batch: &[TripRecord]) -> Result<(), SinkError> {
        (**self).deliver(batch)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Which sink implementation to build, as read from the pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub schema: SchemaKind,
    /// Directory that receives the table / index files.
    pub root: PathBuf,
    /// Index name override for [`SinkKind::BulkIndex`].
    #[serde(default)]
    pub index: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SinkKind {
    Table,
    BulkIndex,
}

impl SinkConfig {
    /// Build the configured sink.
    pub fn build(&self) -> Box<dyn Sink> {
        match self.kind {
            SinkKind::Table => Box::new(TableSink::new(&self.root, self.schema)),
            SinkKind::BulkIndex => {
                let mut sink = BulkIndexSink::new(&self.root, self.schema);
                if let Some(index) = &self.index {
                    sink = sink.with_index(index.clone());
                }
                Box::new(sink)
            }
        }
    }
}

pub(crate) fn ensure_schema(expected: SchemaKind, batch: &[TripRecord]) -> Result<(), SinkError> {
    match batch.iter().find(|r| r.schema() != expected) {
        Some(r) => Err(SinkError::WrongSchema {
            expected,
            received: r.schema(),
        }),
        None => Ok(()),
    }
}
