//! Maps a typed operation request onto the exact argument vector for the
//! wrapped CLI.
//!
//! Arguments are always a discrete vector handed to the process spawner —
//! never a concatenated shell string — so values cannot be
//! shell-interpreted. Building is a pure function of the request and the
//! configuration captured at construction time.

use std::fmt;

use validator::Validate;

use crate::config::EngineConfig;
use crate::error::RunError;
use crate::operation::{ExtraValue, OperationRequest};

/// A fully built command: program plus argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Program name or path.
    pub program: String,
    /// Arguments, starting with the operation token.
    pub args: Vec<String>,
}

impl fmt::Display for CommandLine {
    /// Space-joined rendering for logs and the `command` result field.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Builds [`CommandLine`]s from operation requests.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    cli_program: String,
    default_device: Option<String>,
}

impl CommandBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cli_program: config.cli_program.clone(),
            default_device: config.default_device.clone(),
        }
    }

    /// Build the argument vector for `request`.
    ///
    /// Fails with [`RunError::Validation`] naming the offending field when
    /// a required parameter is missing, a numeric range is violated, or an
    /// extra argument is not safe to pass as a process argument.
    pub fn build(&self, request: &OperationRequest) -> Result<CommandLine, RunError> {
        let params = &request.params;

        for field in request.operation.required_params() {
            if !params.has(field) {
                return Err(RunError::Validation(format!(
                    "missing required parameter '{field}' for operation '{}'",
                    request.operation
                )));
            }
        }

        params.validate().map_err(|e| {
            let field = e
                .field_errors()
                .keys()
                .next()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "params".into());
            RunError::Validation(format!("invalid value for parameter '{field}'"))
        })?;

        let mut args = vec![request.operation.cli_name().to_string()];

        // Recognized parameters, fixed order, only when present. Defaults
        // the CLI already assumes are never emitted.
        push_kv(&mut args, "model", params.model.as_deref())?;
        push_kv(&mut args, "data", params.data.as_deref())?;
        push_kv(&mut args, "source", params.source.as_deref())?;
        push_num(&mut args, "epochs", params.epochs);
        push_num(&mut args, "imgsz", params.imgsz);
        push_num(&mut args, "batch", params.batch);
        push_float(&mut args, "conf", params.conf);
        push_float(&mut args, "iou", params.iou);
        push_float(&mut args, "lr0", params.lr0);
        push_kv(
            &mut args,
            "device",
            params
                .device
                .as_deref()
                .or(self.default_device.as_deref()),
        )?;
        push_kv(&mut args, "format", params.format.as_deref())?;
        push_bool(&mut args, "half", params.half);
        push_bool(&mut args, "save", params.save);
        push_bool(&mut args, "verbose", params.verbose);
        push_bool(&mut args, "exist_ok", params.exist_ok);
        push_kv(&mut args, "tracker", params.tracker.as_deref())?;
        push_kv(&mut args, "solution_type", params.solution_type.as_deref())?;
        push_kv(&mut args, "project", params.project.as_deref())?;
        push_kv(&mut args, "name", params.name.as_deref())?;

        // Pass-through extras, appended after recognized parameters.
        // BTreeMap iteration keeps the output deterministic.
        for (key, value) in &params.extra_args {
            validate_extra_key(key)?;
            let rendered = value.to_string();
            validate_value(key, &rendered)?;
            args.push(format!("{key}={rendered}"));
        }

        Ok(CommandLine {
            program: self.cli_program.clone(),
            args,
        })
    }
}

// ---------------------------------------------------------------------------
// Token helpers
// ---------------------------------------------------------------------------

/// Recognized parameter names; extra-args keys may not shadow them.
const RECOGNIZED_KEYS: [&str; 19] = [
    "model", "data", "source", "epochs", "imgsz", "batch", "conf", "iou", "lr0", "device",
    "format", "half", "save", "verbose", "exist_ok", "tracker", "solution_type", "project",
    "name",
];

fn push_kv(args: &mut Vec<String>, key: &str, value: Option<&str>) -> Result<(), RunError> {
    if let Some(v) = value {
        validate_value(key, v)?;
        args.push(format!("{key}={v}"));
    }
    Ok(())
}

fn push_num(args: &mut Vec<String>, key: &str, value: Option<u32>) {
    if let Some(v) = value {
        args.push(format!("{key}={v}"));
    }
}

fn push_float(args: &mut Vec<String>, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        args.push(format!("{key}={v}"));
    }
}

fn push_bool(args: &mut Vec<String>, key: &str, value: Option<bool>) {
    if let Some(v) = value {
        args.push(format!("{key}={v}"));
    }
}

/// Extra-args keys: alphanumeric plus `-`, `_`, `.`, and must not shadow a
/// recognized parameter.
fn validate_extra_key(key: &str) -> Result<(), RunError> {
    if key.is_empty() {
        return Err(RunError::Validation("extra argument key is empty".into()));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(RunError::Validation(format!(
            "extra argument key '{key}' contains unsafe characters"
        )));
    }
    if RECOGNIZED_KEYS.contains(&key) || key == "run_id" || key == "extra_args" {
        return Err(RunError::Validation(format!(
            "extra argument '{key}' shadows a recognized parameter"
        )));
    }
    Ok(())
}

/// Values may not contain control characters (NUL, newline, ...) that
/// could alter process-argument boundaries.
fn validate_value(key: &str, value: &str) -> Result<(), RunError> {
    if value.chars().any(|c| c.is_control()) {
        return Err(RunError::Validation(format!(
            "value for '{key}' contains control characters"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Operation, OperationParams};
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    fn builder() -> CommandBuilder {
        CommandBuilder::new(&EngineConfig::default())
    }

    fn predict_request() -> OperationRequest {
        OperationRequest {
            operation: Operation::Predict,
            params: OperationParams {
                model: Some("m.pt".into()),
                source: Some("img.jpg".into()),
                conf: Some(0.5),
                ..Default::default()
            },
        }
    }

    #[test]
    fn build_is_pure_and_deterministic() {
        let request = predict_request();
        let a = builder().build(&request).unwrap();
        let b = builder().build(&request).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.program, "yolo");
        assert_eq!(a.args, vec!["predict", "model=m.pt", "source=img.jpg", "conf=0.5"]);
    }

    #[test]
    fn display_joins_program_and_args() {
        let cmd = builder().build(&predict_request()).unwrap();
        assert_eq!(cmd.to_string(), "yolo predict model=m.pt source=img.jpg conf=0.5");
    }

    #[test]
    fn missing_required_field_is_named() {
        let request = OperationRequest {
            operation: Operation::Train,
            params: OperationParams {
                model: Some("m.pt".into()),
                ..Default::default()
            },
        };
        let err = builder().build(&request).unwrap_err();
        assert_matches!(&err, RunError::Validation(msg) if msg.contains("'data'"));
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let mut request = predict_request();
        request.params.iou = Some(2.0);
        let err = builder().build(&request).unwrap_err();
        assert_matches!(&err, RunError::Validation(msg) if msg.contains("iou"));
    }

    #[test]
    fn booleans_render_as_key_equals_bool() {
        let mut request = predict_request();
        request.params.save = Some(false);
        request.params.half = Some(true);
        let cmd = builder().build(&request).unwrap();
        assert!(cmd.args.contains(&"save=false".to_string()));
        assert!(cmd.args.contains(&"half=true".to_string()));
    }

    #[test]
    fn default_device_applies_only_when_absent() {
        let config = EngineConfig {
            default_device: Some("cpu".into()),
            ..EngineConfig::default()
        };
        let builder = CommandBuilder::new(&config);

        let cmd = builder.build(&predict_request()).unwrap();
        assert!(cmd.args.contains(&"device=cpu".to_string()));

        let mut request = predict_request();
        request.params.device = Some("0".into());
        let cmd = builder.build(&request).unwrap();
        assert!(cmd.args.contains(&"device=0".to_string()));
        assert!(!cmd.args.contains(&"device=cpu".to_string()));
    }

    #[test]
    fn extras_append_after_recognized_params() {
        let mut request = predict_request();
        request.params.extra_args = BTreeMap::from([
            ("patience".to_string(), ExtraValue::Int(50)),
            ("plots".to_string(), ExtraValue::Bool(true)),
        ]);
        let cmd = builder().build(&request).unwrap();
        assert_eq!(
            cmd.args,
            vec!["predict", "model=m.pt", "source=img.jpg", "conf=0.5", "patience=50", "plots=true"]
        );
    }

    #[test]
    fn unsafe_extra_key_is_rejected() {
        let mut request = predict_request();
        request.params.extra_args =
            BTreeMap::from([("bad key".to_string(), ExtraValue::Int(1))]);
        assert_matches!(builder().build(&request), Err(RunError::Validation(_)));

        request.params.extra_args =
            BTreeMap::from([("$(rm)".to_string(), ExtraValue::Int(1))]);
        assert_matches!(builder().build(&request), Err(RunError::Validation(_)));
    }

    #[test]
    fn control_characters_in_values_are_rejected() {
        let mut request = predict_request();
        request.params.model = Some("m.pt\nevil".into());
        assert_matches!(builder().build(&request), Err(RunError::Validation(_)));

        let mut request = predict_request();
        request.params.extra_args = BTreeMap::from([(
            "note".to_string(),
            ExtraValue::Text("a\0b".into()),
        )]);
        assert_matches!(builder().build(&request), Err(RunError::Validation(_)));
    }

    #[test]
    fn extra_key_shadowing_recognized_param_is_rejected() {
        let mut request = predict_request();
        request.params.extra_args =
            BTreeMap::from([("model".to_string(), ExtraValue::Text("x.pt".into()))]);
        let err = builder().build(&request).unwrap_err();
        assert_matches!(&err, RunError::Validation(msg) if msg.contains("shadows"));
    }

    #[test]
    fn settings_needs_no_params() {
        let request = OperationRequest {
            operation: Operation::Settings,
            params: OperationParams::default(),
        };
        let cmd = builder().build(&request).unwrap();
        assert_eq!(cmd.args, vec!["settings"]);
    }
}
