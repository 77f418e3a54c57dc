//! Line-delimited stdio RPC channel.
//!
//! Invoked once per call: reads one `{"method", "params", "id"}` JSON
//! object from stdin, executes the operation synchronously (no streaming
//! events on this channel), and writes exactly one JSON object to stdout
//! echoing the request id. All logging goes to stderr so stdout stays
//! protocol-clean.
//!
//! A nonzero exit code signals a transport-level failure (unreadable or
//! unparseable request, broken stdout). A run that merely failed is an
//! in-band `success: false` result with exit code zero.

use std::io::Write;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

use yolobridge_core::config::EngineConfig;
use yolobridge_core::operation::{Operation, OperationParams, OperationRequest};
use yolobridge_core::result::RunResult;
use yolobridge_runner::{ChannelKind, RunEngine};

/// One request line on stdin.
#[derive(Debug, Deserialize)]
struct RpcRequest {
    /// Operation name (accepts the same aliases as the HTTP paths).
    method: String,
    /// Recognized parameters plus `extra_args`.
    #[serde(default)]
    params: OperationParams,
    /// Correlation token, echoed verbatim in the response.
    #[serde(default)]
    id: Option<Value>,
}

fn ok_response(id: &Option<Value>, result: &RunResult) -> Value {
    json!({ "id": id, "result": result })
}

fn err_response(id: &Option<Value>, code: &str, message: &str) -> Value {
    json!({ "id": id, "error": { "code": code, "message": message } })
}

/// Write one response line to stdout. Returns false on a broken pipe.
fn emit(value: &Value) -> bool {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{value}").is_ok() && stdout.flush().is_ok()
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yolobridge_stdio=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    match stdin.read_line(&mut line).await {
        Ok(0) => {
            emit(&err_response(&None, "TRANSPORT_ERROR", "no request on stdin"));
            return 1;
        }
        Ok(_) => {}
        Err(err) => {
            emit(&err_response(
                &None,
                "TRANSPORT_ERROR",
                &format!("failed to read stdin: {err}"),
            ));
            return 1;
        }
    }

    let request: RpcRequest = match serde_json::from_str(line.trim()) {
        Ok(request) => request,
        Err(err) => {
            emit(&err_response(
                &None,
                "PARSE_ERROR",
                &format!("invalid request: {err}"),
            ));
            return 1;
        }
    };

    let operation: Operation = match request.method.parse() {
        Ok(operation) => operation,
        Err(err) => {
            // The request was transported fine; an unknown method is an
            // in-band error, not a transport failure.
            emit(&err_response(&request.id, "VALIDATION_ERROR", &err.to_string()));
            return 0;
        }
    };

    tracing::info!(operation = %operation, "Dispatching stdio request");
    let engine = RunEngine::new(EngineConfig::from_env());
    let response = match engine
        .submit(
            OperationRequest {
                operation,
                params: request.params,
            },
            ChannelKind::Stdio,
            None,
        )
        .await
    {
        Ok(result) => ok_response(&request.id, &result),
        Err(err) => err_response(&request.id, err.code(), &err.to_string()),
    };

    if emit(&response) {
        0
    } else {
        1
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn request_line_parses_with_id() {
        let request: RpcRequest = serde_json::from_str(
            r#"{"method": "predict", "params": {"model": "m.pt", "source": "img.jpg"}, "id": "abc-1"}"#,
        )
        .unwrap();
        assert_eq!(request.method, "predict");
        assert_eq!(request.params.model.as_deref(), Some("m.pt"));
        assert_eq!(request.id, Some(Value::String("abc-1".into())));
        assert_matches!(request.method.parse::<Operation>(), Ok(Operation::Predict));
    }

    #[test]
    fn params_and_id_are_optional() {
        let request: RpcRequest = serde_json::from_str(r#"{"method": "settings"}"#).unwrap();
        assert!(request.id.is_none());
        assert!(request.params.model.is_none());
    }

    #[test]
    fn error_response_echoes_the_id() {
        let id = Some(json!(42));
        let response = err_response(&id, "VALIDATION_ERROR", "unknown operation 'detect'");
        assert_eq!(response["id"], json!(42));
        assert_eq!(response["error"]["code"], "VALIDATION_ERROR");
    }

    #[test]
    fn unknown_recognized_param_is_a_parse_error() {
        let parsed = serde_json::from_str::<RpcRequest>(
            r#"{"method": "predict", "params": {"bogus": true}}"#,
        );
        assert!(parsed.is_err());
    }
}
