use std::fs;

use tripdata_ingest::error::RouteError;
use tripdata_ingest::outcome::{OutcomeRouter, ProcessingOutcome, SIDECAR_SUFFIX};

fn router(root: &std::path::Path) -> OutcomeRouter {
    let out = root.join("out");
    let err = root.join("err");
    fs::create_dir_all(&out).unwrap();
    fs::create_dir_all(&err).unwrap();
    OutcomeRouter::new(out, err)
}

fn failure() -> ProcessingOutcome {
    ProcessingOutcome::SinkFailure {
        reason: "connection reset".to_string(),
        batches_delivered: 2,
        rows_delivered: 200,
    }
}

#[test]
fn same_named_failures_never_overwrite_each_other() {
    let root = tempfile::tempdir().unwrap();
    let r = router(root.path());

    let mut dests = Vec::new();
    for _ in 0..3 {
        let src = root.path().join("trip.parquet");
        fs::write(&src, b"x").unwrap();
        dests.push(r.route(&src, &failure()).unwrap());
    }

    dests.sort();
    dests.dedup();
    assert_eq!(dests.len(), 3);
    for d in &dests {
        assert!(d.is_file());
        assert_eq!(d.parent(), Some(r.error_dir()));
    }
}

#[test]
fn sidecar_records_outcome_and_reason() {
    let root = tempfile::tempdir().unwrap();
    let r = router(root.path());
    let src = root.path().join("yellow_tripdata.parquet");
    fs::write(&src, b"x").unwrap();

    let dest = r.route(&src, &failure()).unwrap();
    let mut sidecar = dest.as_os_str().to_owned();
    sidecar.push(SIDECAR_SUFFIX);
    let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(sidecar).unwrap()).unwrap();

    assert_eq!(v["outcome"], "sink_failure");
    assert_eq!(v["reason"], "connection reset");
    assert_eq!(v["source"], src.to_str().unwrap());
    assert!(v["quarantined_at"].is_string());
}

#[test]
fn missing_source_is_a_route_error() {
    let root = tempfile::tempdir().unwrap();
    let r = router(root.path());
    let err = r
        .route(&root.path().join("gone.parquet"), &ProcessingOutcome::Delivered { rows: 0, batches: 0 })
        .unwrap_err();
    assert!(matches!(err, RouteError::Move { .. }));
}
