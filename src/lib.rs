//! `tripdata-ingest` watches a directory for NYC TLC trip data files and feeds them into a
//! downstream sink.
//!
//! Each file dropped into the watched directory goes through the same path:
//!
//! 1. [`watcher::DirectoryWatcher`] notices it on its next scan and hands it to the
//!    [`execution::IngestionQueue`].
//! 2. The single [`execution::Dispatcher`] classifies it as green or yellow
//!    ([`decoder::Decoder`]), decodes it into [`types::TripRecord`]s and delivers them to a
//!    [`sink::Sink`] in fixed-size batches, each batch admitted by the
//!    [`execution::RateLimiter`].
//! 3. [`outcome::OutcomeRouter`] moves the file to the output directory if every batch was
//!    delivered, or quarantines it in the error directory with a timestamped name and a
//!    `.error.json` reason sidecar.
//!
//! Delivery is at-least-once per file: a file only leaves the watched directory after its
//! outcome is known, so a crash mid-file means it is picked up again on the next start.
//!
//! ## Running a pipeline
//!
//! ```no_run
//! use std::sync::Arc;
//! use tripdata_ingest::config::PipelineConfig;
//! use tripdata_ingest::decoder::ParquetTripDecoder;
//! use tripdata_ingest::pipeline::IngestionPipeline;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load("pipeline.json")?;
//! let pipeline = IngestionPipeline::from_config(config, Arc::new(ParquetTripDecoder::new()))?;
//! pipeline.start()?;
//! // ... until shutdown is requested
//! pipeline.stop();
//! println!("{}", pipeline.metrics().snapshot());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`watcher`]: polling directory watcher with add/modify/delete hooks
//! - [`execution`]: queue, dispatcher, rate limiter, dispatch metrics and observers
//! - [`outcome`]: per-file outcomes and quarantine routing
//! - [`decoder`]: schema classification and Parquet row decoding
//! - [`sink`]: batch destinations (CSV table, bulk-index NDJSON)
//! - [`pipeline`]: assembles all of the above from a [`config::PipelineConfig`]
//! - [`config`], [`logging`], [`error`], [`types`]: supporting pieces

pub mod config;
pub mod decoder;
pub mod error;
pub mod execution;
pub mod logging;
pub mod outcome;
pub mod pipeline;
pub mod sink;
pub mod types;
pub mod watcher;

pub use error::{ConfigError, PipelineError, WatchError};
pub use outcome::ProcessingOutcome;
pub use pipeline::IngestionPipeline;
pub use types::{SchemaKind, TripRecord};
