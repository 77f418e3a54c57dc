//! The normalized record every channel returns for a completed run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single result record shared by the HTTP, SSE, and stdio channels.
///
/// Immutable once constructed; a run that timed out, was cancelled, or
/// failed to spawn still produces one of these with whatever partial
/// output exists. JSON round-trips losslessly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique run identifier.
    pub run_id: String,
    /// The exact command line that was (or would have been) executed.
    pub command: String,
    /// Exact process exit code; `None` when the process never exited on
    /// its own (killed, or never spawned).
    pub return_code: Option<i32>,
    /// Full captured standard output.
    pub stdout: String,
    /// Full captured standard error.
    pub stderr: String,
    /// Numeric metrics merged from the output stream, last value wins.
    pub metrics: BTreeMap<String, f64>,
    /// Files produced by the run, lexically sorted.
    pub artifacts: Vec<String>,
    /// True iff the exit code was zero and no fatal parse condition was
    /// observed.
    pub success: bool,
    /// Failure kind for timeout/cancellation/spawn failures; `None` for
    /// runs that exited on their own (a nonzero exit code is reported via
    /// `return_code`, not here).
    pub error: Option<String>,
    /// Accumulated non-fatal warnings, in arrival order.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Completion time (UTC).
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_is_lossless() {
        let result = RunResult {
            run_id: "1f6f4f2e".into(),
            command: "yolo predict model=m.pt source=img.jpg conf=0.5".into(),
            return_code: Some(0),
            stdout: "image 1/1 img.jpg: 2 detections, inference: 12.3ms\n".into(),
            stderr: String::new(),
            metrics: BTreeMap::from([
                ("inference_time_ms".to_string(), 12.3),
                ("total_detections".to_string(), 2.0),
            ]),
            artifacts: vec!["runs/predict/exp/img.jpg".into()],
            success: true,
            error: None,
            warnings: vec!["metric 'box_loss' has non-numeric value '1.2.3'".into()],
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&result).unwrap();
        let parsed: RunResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn failed_run_round_trips_optional_fields() {
        let result = RunResult {
            run_id: "r".into(),
            command: "yolo train model=m.pt data=d.yaml".into(),
            return_code: None,
            stdout: "Epoch 1/10\n".into(),
            stderr: String::new(),
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
            success: false,
            error: Some("Run timed out after 2000ms".into()),
            warnings: Vec::new(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["return_code"], serde_json::Value::Null);
        assert_eq!(json["success"], false);

        let parsed: RunResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, result);
    }
}
