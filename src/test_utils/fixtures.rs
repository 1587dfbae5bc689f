//! Payload fixtures shared across the test suite.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// A usage payload with data for the given `(label, usage, estimated)`
/// line items.
pub fn usage_payload(lines: &[(&str, f64, bool)]) -> String {
    let lines: Vec<serde_json::Value> = lines
        .iter()
        .map(|(label, usage, estimated)| {
            serde_json::json!({
                "Label": label,
                "Usage": usage,
                "Read": 0.0,
                "IsEstimated": estimated,
                "MeterSerialNumberHis": "S123",
            })
        })
        .collect();
    serde_json::json!({
        "IsError": false,
        "IsDataAvailable": true,
        "IsConsumptionAvailable": true,
        "TargetUsage": 0.0,
        "AverageUsage": 349.0,
        "ActualUsage": 312.0,
        "MyUsage": "NA",
        "Lines": lines,
    })
    .to_string()
}

/// The payload the portal serves for a day it has not published yet.
pub fn unavailable_payload() -> String {
    serde_json::json!({
        "IsError": false,
        "IsDataAvailable": false,
        "IsConsumptionAvailable": false,
        "Lines": [],
    })
    .to_string()
}

/// Gzip-compresses a body the way the usage endpoint sometimes does.
pub fn gzip_compress(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write failed");
    encoder.finish().expect("gzip finish failed")
}
