//! The operation model: which CLI modes exist, which parameters each one
//! requires, and the typed request shape shared by all three channels.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::RunError;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// A mode of the wrapped CLI.
///
/// Wire names accept both the CLI token (`val`, `copy-cfg`) and the long
/// form (`validate`, `copy-config`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Train,
    #[serde(alias = "validate")]
    Val,
    Predict,
    Export,
    Track,
    Benchmark,
    Solution,
    Settings,
    #[serde(alias = "copy-config")]
    CopyCfg,
}

impl Operation {
    /// All supported operations, in route-listing order.
    pub const ALL: [Operation; 9] = [
        Operation::Train,
        Operation::Val,
        Operation::Predict,
        Operation::Export,
        Operation::Track,
        Operation::Benchmark,
        Operation::Solution,
        Operation::Settings,
        Operation::CopyCfg,
    ];

    /// The token passed to the CLI as its first argument.
    pub fn cli_name(self) -> &'static str {
        match self {
            Operation::Train => "train",
            Operation::Val => "val",
            Operation::Predict => "predict",
            Operation::Export => "export",
            Operation::Track => "track",
            Operation::Benchmark => "benchmark",
            Operation::Solution => "solution",
            Operation::Settings => "settings",
            Operation::CopyCfg => "copy-cfg",
        }
    }

    /// Default output project directory when the request names none.
    ///
    /// Matches the `runs/<mode>` convention of the wrapped CLI.
    pub fn default_project(self) -> String {
        format!("runs/{}", self.cli_name())
    }

    /// Parameter names that must be present before a command is built.
    pub fn required_params(self) -> &'static [&'static str] {
        match self {
            Operation::Train | Operation::Val => &["model", "data"],
            Operation::Predict | Operation::Track => &["model", "source"],
            Operation::Export | Operation::Benchmark => &["model"],
            Operation::Solution => &["model", "solution_type", "source"],
            Operation::Settings | Operation::CopyCfg => &[],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cli_name())
    }
}

impl FromStr for Operation {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Operation::Train),
            "val" | "validate" => Ok(Operation::Val),
            "predict" => Ok(Operation::Predict),
            "export" => Ok(Operation::Export),
            "track" => Ok(Operation::Track),
            "benchmark" => Ok(Operation::Benchmark),
            "solution" => Ok(Operation::Solution),
            "settings" => Ok(Operation::Settings),
            "copy-cfg" | "copy-config" => Ok(Operation::CopyCfg),
            other => Err(RunError::Validation(format!("unknown operation '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Extra arguments
// ---------------------------------------------------------------------------

/// A scalar value in the open-ended `extra_args` map.
///
/// Deliberately closed: nested objects and arrays are rejected at the
/// serde layer, so every value has an unambiguous `key=value` rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraValue::Bool(b) => write!(f, "{b}"),
            ExtraValue::Int(i) => write!(f, "{i}"),
            ExtraValue::Float(x) => write!(f, "{x}"),
            ExtraValue::Text(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Recognized parameters shared by all operations.
///
/// Every field is optional at the serde layer; per-operation required-ness
/// is enforced by the command builder via [`Operation::required_params`].
/// Unknown keys are rejected (`deny_unknown_fields`) — only `extra_args`
/// passes arbitrary flags through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OperationParams {
    /// Model path or name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Dataset descriptor (YAML path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Source path for images/videos.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub epochs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub imgsz: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub batch: Option<u32>,
    /// Confidence threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub conf: Option<f64>,
    /// IoU threshold for NMS.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub iou: Option<f64>,
    /// Initial learning rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0))]
    pub lr0: Option<f64>,
    /// Device selector (`cpu`, `0`, `0,1`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Export format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exist_ok: Option<bool>,
    /// Tracker configuration file (track operation).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker: Option<String>,
    /// Solution kind (solution operation).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution_type: Option<String>,
    /// Output project directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Experiment name under the project directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Caller-supplied run identifier (generated when absent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Pass-through flags not otherwise modeled, appended after the
    /// recognized parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, ExtraValue>,
}

impl OperationParams {
    /// Look up a recognized parameter's presence by name.
    ///
    /// Used by the command builder's required-field check; the name list
    /// comes from [`Operation::required_params`].
    pub(crate) fn has(&self, field: &str) -> bool {
        match field {
            "model" => self.model.is_some(),
            "data" => self.data.is_some(),
            "source" => self.source.is_some(),
            "solution_type" => self.solution_type.is_some(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One operation request as received from any channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// The operation to execute.
    pub operation: Operation,
    /// Recognized parameters plus pass-through extras.
    pub params: OperationParams,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
