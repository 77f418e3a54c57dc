//! The streaming SSE channel.
//!
//! Each request starts its own run and receives that run's events as
//! `data: {"type": ..., "data": ...}` frames the moment they are parsed
//! (axum flushes per event; nothing is buffered until stream end),
//! followed by exactly one `complete` frame carrying the RunResult — or
//! one `error` frame when no result exists — and then the stream closes.
//!
//! Live events go only to the connection that initiated the run; there
//! is no way to attach to an in-flight run, and re-using its identifier
//! is rejected with a conflict by the registry.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use yolobridge_core::operation::{Operation, OperationParams, OperationRequest};
use yolobridge_core::parser::ParsedEvent;
use yolobridge_runner::ChannelKind;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// One serialized SSE frame: `{"type": ..., "data": ...}`.
#[derive(Debug, Serialize)]
struct SseFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    data: serde_json::Value,
}

/// GET /sse/{operation} — parameters as query string.
async fn sse_get(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    Query(params): Query<OperationParams>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let operation = parse_operation(&operation)?;
    Ok(start_stream(state, operation, params))
}

/// POST /sse/{operation} — parameters as JSON body.
async fn sse_post(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    Json(params): Json<OperationParams>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let operation = parse_operation(&operation)?;
    Ok(start_stream(state, operation, params))
}

fn parse_operation(raw: &str) -> Result<Operation, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown operation '{raw}'")))
}

/// Spawn the run and bridge its event channel into an SSE body.
fn start_stream(
    state: AppState,
    operation: Operation,
    params: OperationParams,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (frame_tx, frame_rx) = mpsc::channel::<SseFrame>(256);
    tokio::spawn(run_streaming(state, operation, params, frame_tx));

    let stream = ReceiverStream::new(frame_rx).map(|frame| {
        let event = Event::default()
            .json_data(&frame)
            .unwrap_or_else(|_| Event::default().data(r#"{"type":"error","data":{}}"#));
        Ok::<_, Infallible>(event)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Drive one run, forwarding events as frames, then emit the terminal
/// `complete` or `error` frame. The run keeps going even if the client
/// disconnects mid-stream; its result stays available in the registry.
async fn run_streaming(
    state: AppState,
    operation: Operation,
    params: OperationParams,
    frames: mpsc::Sender<SseFrame>,
) {
    let (event_tx, mut event_rx) = mpsc::channel::<ParsedEvent>(256);
    let engine = state.engine.clone();
    let submit = engine.submit(
        OperationRequest { operation, params },
        ChannelKind::Sse,
        Some(event_tx),
    );
    tokio::pin!(submit);

    let mut events_done = false;
    let outcome = loop {
        tokio::select! {
            maybe = event_rx.recv(), if !events_done => match maybe {
                Some(event) => {
                    if let Some(frame) = event_frame(&event) {
                        // A failed send only means the client is gone.
                        let _ = frames.send(frame).await;
                    }
                }
                None => events_done = true,
            },
            result = &mut submit => break result,
        }
    };

    // Flush events still buffered after the engine finished.
    while let Ok(event) = event_rx.try_recv() {
        if let Some(frame) = event_frame(&event) {
            let _ = frames.send(frame).await;
        }
    }

    let final_frame = match outcome {
        Ok(result) => SseFrame {
            kind: "complete",
            data: serde_json::to_value(&result).unwrap_or_else(|_| json!({})),
        },
        Err(err) => SseFrame {
            kind: "error",
            data: json!({ "error": err.to_string(), "code": err.code() }),
        },
    };
    let _ = frames.send(final_frame).await;
}

/// Map a parsed event onto its wire frame. Terminal events are folded
/// into the `complete` frame instead of being forwarded directly.
fn event_frame(event: &ParsedEvent) -> Option<SseFrame> {
    match event {
        ParsedEvent::Progress {
            current_step,
            total_steps,
            detail,
        } => Some(SseFrame {
            kind: "progress",
            data: json!({
                "current_step": current_step,
                "total_steps": total_steps,
                "detail": detail,
            }),
        }),
        ParsedEvent::Metric { values } => Some(SseFrame {
            kind: "metrics",
            data: serde_json::to_value(values).unwrap_or_else(|_| json!({})),
        }),
        ParsedEvent::Warning { message } => Some(SseFrame {
            kind: "warning",
            data: json!({ "message": message }),
        }),
        ParsedEvent::Terminal { .. } => None,
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/sse/{operation}", get(sse_get).post(sse_post))
}
