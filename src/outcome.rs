//! Per-file outcomes and the filesystem moves they trigger.
//!
//! Every processed file ends in exactly one place: the output directory when it was
//! [`ProcessingOutcome::Delivered`], the error (quarantine) directory otherwise. A failed move
//! leaves the file where it was and is reported as a [`RouteError`].

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::RouteError;
use crate::types::SchemaKind;

/// Suffix appended to a quarantined file's name for its reason sidecar.
pub const SIDECAR_SUFFIX: &str = ".error.json";

/// Terminal result of processing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Every batch reached the sink.
    Delivered { rows: usize, batches: usize },
    /// The decoder recognized neither schema.
    UnknownSchema,
    /// The file is valid but the sink is bound to the other schema.
    SchemaMismatch {
        detected: SchemaKind,
        expected: SchemaKind,
    },
    /// Decoding failed after classification.
    ParseFailure { reason: String },
    /// A batch was rejected; earlier batches stay delivered.
    SinkFailure {
        reason: String,
        batches_delivered: usize,
        rows_delivered: usize,
    },
}

/// Fieldless discriminant of [`ProcessingOutcome`], handy for counters and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Delivered,
    UnknownSchema,
    SchemaMismatch,
    ParseFailure,
    SinkFailure,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::UnknownSchema => "unknown_schema",
            Self::SchemaMismatch => "schema_mismatch",
            Self::ParseFailure => "parse_failure",
            Self::SinkFailure => "sink_failure",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProcessingOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Delivered { .. } => OutcomeKind::Delivered,
            Self::UnknownSchema => OutcomeKind::UnknownSchema,
            Self::SchemaMismatch { .. } => OutcomeKind::SchemaMismatch,
            Self::ParseFailure { .. } => OutcomeKind::ParseFailure,
            Self::SinkFailure { .. } => OutcomeKind::SinkFailure,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Human-readable failure reason recorded alongside a quarantined file.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Delivered { .. } => None,
            Self::UnknownSchema => Some("Unknown schema type"),
            Self::SchemaMismatch { .. } => Some("Schema type mismatch"),
            Self::ParseFailure { reason } | Self::SinkFailure { reason, .. } => Some(reason.as_str()),
        }
    }
}

/// Moves finished files out of the watched directory.
#[derive(Debug, Clone)]
pub struct OutcomeRouter {
    output_dir: PathBuf,
    error_dir: PathBuf,
}

#[derive(Serialize)]
struct QuarantineRecord<'a> {
    source: &'a Path,
    quarantined_as: &'a Path,
    outcome: OutcomeKind,
    reason: &'a str,
    quarantined_at: DateTime<Utc>,
}

impl OutcomeRouter {
    pub fn new(output_dir: impl Into<PathBuf>, error_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            error_dir: error_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn error_dir(&self) -> &Path {
        &self.error_dir
    }

    /// Relocate `path` according to `outcome`, returning the new location.
    pub fn route(&self, path: &Path, outcome: &ProcessingOutcome) -> Result<PathBuf, RouteError> {
        match outcome.reason() {
            None => self.deliver(path),
            Some(reason) => self.quarantine(path, outcome.kind(), reason),
        }
    }

    /// Move into the output directory, replacing any same-named file.
    fn deliver(&self, path: &Path) -> Result<PathBuf, RouteError> {
        let name = path
            .file_name()
            .ok_or_else(|| RouteError::NoFileName(path.to_path_buf()))?;
        let dest = self.output_dir.join(name);
        move_file(path, &dest)?;
        info!(from = %path.display(), to = %dest.display(), "file delivered");
        Ok(dest)
    }

    fn quarantine(&self, path: &Path, kind: OutcomeKind, reason: &str) -> Result<PathBuf, RouteError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RouteError::NoFileName(path.to_path_buf()))?;

        let now = Utc::now();
        let stamped = quarantine_name(name, now.timestamp_millis());
        let dest = unique_destination(&self.error_dir, &stamped);
        move_file(path, &dest)?;
        warn!(
            from = %path.display(),
            to = %dest.display(),
            outcome = %kind,
            reason,
            "file quarantined"
        );

        let record = QuarantineRecord {
            source: path,
            quarantined_as: &dest,
            outcome: kind,
            reason,
            quarantined_at: now,
        };
        if let Err(e) = write_sidecar(&dest, &record) {
            warn!(file = %dest.display(), error = %e, "failed to write quarantine sidecar");
        }
        Ok(dest)
    }
}

/// Insert `_<millis>` before the extension: `trip.parquet` -> `trip_1700000000000.parquet`.
pub fn quarantine_name(file_name: &str, millis: i64) -> String {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{millis}{}", &file_name[..dot], &file_name[dot..]),
        _ => format!("{file_name}_{millis}"),
    }
}

fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    };
    (1u32..)
        .map(|n| dir.join(format!("{stem}_{n}{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

fn sidecar_path(dest: &Path) -> PathBuf {
    let mut s = dest.as_os_str().to_owned();
    s.push(SIDECAR_SUFFIX);
    PathBuf::from(s)
}

fn write_sidecar(dest: &Path, record: &QuarantineRecord<'_>) -> io::Result<()> {
    let body = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
    fs::write(sidecar_path(dest), body)
}

/// Rename, falling back to copy + remove when the rename itself fails (e.g. across devices).
///
/// The fallback copies into a hidden sibling of `to` first, so an error leaves both the
/// source and any existing file at `to` untouched.
fn move_file(from: &Path, to: &Path) -> Result<(), RouteError> {
    let err = match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    let failed = |source: io::Error| RouteError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    if !from.is_file() {
        return Err(failed(err));
    }

    let staged = staging_path(to);
    if let Err(e) = fs::copy(from, &staged).and_then(|_| fs::remove_file(from)) {
        let _ = fs::remove_file(&staged);
        debug!(from = %from.display(), error = %e, "copy fallback failed");
        return Err(failed(err));
    }
    fs::rename(&staged, to).map_err(|e| {
        // Put the source back so the file is still where it was.
        if fs::copy(&staged, from).is_ok() {
            let _ = fs::remove_file(&staged);
        }
        failed(e)
    })
}

fn staging_path(to: &Path) -> PathBuf {
    let name = to.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    to.with_file_name(format!(".{name}.partial"))
}
