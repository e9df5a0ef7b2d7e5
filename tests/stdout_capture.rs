#![cfg(unix)]

use logcatch::capture::{CapturePolicy, StdoutRedirect};
use logcatch::record::{MemoryPipeline, RecordOrigin, Severity};
use logcatch::MarkerClassifier;
use std::io::{self, Write};
use std::sync::Arc;

// Redirecting fd 1 affects the whole process, so this file holds a single test.
#[test]
fn test_stdout_writes_become_records() {
    let pipeline = Arc::new(MemoryPipeline::new());
    let redirect = StdoutRedirect::redirect().unwrap();
    let capture = redirect
        .start(
            CapturePolicy::new(false, true),
            MarkerClassifier::new(),
            pipeline.clone(),
        )
        .unwrap();

    {
        let mut out = io::stdout().lock();
        out.write_all(b"WARNING: cache is cold\n").unwrap();
        out.write_all(b"\n").unwrap();
        out.write_all(b"done in 3 steps\n").unwrap();
        out.flush().unwrap();
    }
    drop(capture);

    let records = pipeline.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].message, "WARNING: cache is cold");
    assert_eq!(records[0].severity, Severity::Warning);
    assert_eq!(records[1].message, "done in 3 steps");
    assert_eq!(records[1].severity, Severity::Info);
    assert!(records.iter().all(|r| r.origin == RecordOrigin::Capture));

    // Stdout is usable again after the capture ends.
    io::stdout().write_all(b"").unwrap();
    assert_eq!(pipeline.records().len(), 2);
}
