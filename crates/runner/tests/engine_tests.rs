//! End-to-end engine tests against a fake CLI script that emits the real
//! tool's line formats and drops artifact files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tokio::sync::mpsc;

use yolobridge_core::config::EngineConfig;
use yolobridge_core::error::RunError;
use yolobridge_core::operation::{Operation, OperationParams, OperationRequest};
use yolobridge_core::parser::ParsedEvent;
use yolobridge_runner::registry::CancelOutcome;
use yolobridge_runner::{ChannelKind, RunEngine, RunState};

/// Write an executable fake CLI into `dir` and return its path.
fn fake_cli(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("yolo");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn engine_with(dir: &Path, cli: &Path, timeout: Duration) -> RunEngine {
    RunEngine::new(EngineConfig {
        cli_program: cli.to_string_lossy().into_owned(),
        working_dir: Some(dir.to_path_buf()),
        timeout,
        kill_grace: Duration::from_millis(200),
        default_device: None,
        retention: Duration::from_secs(60),
    })
}

fn predict_request(run_id: Option<&str>) -> OperationRequest {
    OperationRequest {
        operation: Operation::Predict,
        params: OperationParams {
            model: Some("m.pt".into()),
            source: Some("img.jpg".into()),
            conf: Some(0.5),
            run_id: run_id.map(Into::into),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn predict_run_collects_metrics_and_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        tmp.path(),
        r#"mkdir -p runs/predict/exp
echo "image 1/1 img.jpg: 2 detections, inference: 12.3ms"
echo "prediction" > runs/predict/exp/img.jpg
echo "Results saved to runs/predict/exp""#,
    );
    let engine = engine_with(tmp.path(), &cli, Duration::from_secs(10));

    let result = engine
        .submit(predict_request(None), ChannelKind::Http, None)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.return_code, Some(0));
    assert_eq!(result.metrics["total_detections"], 2.0);
    assert_eq!(result.metrics["inference_time_ms"], 12.3);
    assert_eq!(result.artifacts, vec!["runs/predict/exp/img.jpg"]);
    assert!(result.command.contains("predict"));
    assert!(result.command.contains("conf=0.5"));
    assert!(result.error.is_none());

    let snapshot = engine.registry().get(&result.run_id).unwrap();
    assert_eq!(snapshot.state, RunState::Succeeded);
}

#[tokio::test]
async fn validation_rejects_before_any_handle_exists() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(tmp.path(), "echo never");
    let engine = engine_with(tmp.path(), &cli, Duration::from_secs(10));

    let request = OperationRequest {
        operation: Operation::Train,
        params: OperationParams {
            model: Some("m.pt".into()),
            run_id: Some("b-run".into()),
            ..Default::default()
        },
    };

    let err = engine
        .submit(request, ChannelKind::Http, None)
        .await
        .unwrap_err();
    assert_matches!(&err, RunError::Validation(msg) if msg.contains("'data'"));
    assert!(engine.registry().get("b-run").is_none());
}

#[tokio::test]
async fn timeout_terminates_the_child_and_preserves_partial_output() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(tmp.path(), "echo started\nsleep 10\necho never");
    let engine = engine_with(tmp.path(), &cli, Duration::from_millis(300));

    let started = std::time::Instant::now();
    let result = engine
        .submit(predict_request(Some("timeout-run")), ChannelKind::Http, None)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5), "child not terminated");
    assert!(!result.success);
    assert_eq!(result.return_code, None);
    assert!(result.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(result.stdout, "started\n");
    assert_eq!(
        engine.registry().get("timeout-run").unwrap().state,
        RunState::TimedOut
    );
}

#[tokio::test]
async fn events_arrive_in_order_and_end_with_terminal() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        tmp.path(),
        r#"echo "Epoch 1/3"
echo "Epoch 2/3"
echo "Epoch 3/3""#,
    );
    let engine = engine_with(tmp.path(), &cli, Duration::from_secs(10));

    let (tx, mut rx) = mpsc::channel(64);
    let request = OperationRequest {
        operation: Operation::Train,
        params: OperationParams {
            model: Some("m.pt".into()),
            data: Some("d.yaml".into()),
            ..Default::default()
        },
    };
    let result = engine
        .submit(request, ChannelKind::Sse, Some(tx))
        .await
        .unwrap();
    assert!(result.success);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events.len(), 4);
    for (i, event) in events.iter().take(3).enumerate() {
        assert_matches!(event, ParsedEvent::Progress { current_step, total_steps: 3, .. } => {
            assert_eq!(*current_step, i as u64 + 1);
        });
    }
    assert_matches!(&events[3], ParsedEvent::Terminal { success: true, .. });
}

#[tokio::test]
async fn concurrent_starts_of_one_identifier_have_one_winner() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(tmp.path(), "sleep 1");
    let engine = Arc::new(engine_with(tmp.path(), &cli, Duration::from_secs(10)));

    let a = engine.submit(predict_request(Some("same-id")), ChannelKind::Http, None);
    let b = engine.submit(predict_request(Some("same-id")), ChannelKind::Http, None);
    let (a, b) = tokio::join!(a, b);

    let outcomes = [a, b];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(RunError::Conflict(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 1);
}

#[tokio::test]
async fn cancellation_is_idempotent_and_returns_the_same_result() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(tmp.path(), "echo started\nsleep 10");
    let engine = Arc::new(engine_with(tmp.path(), &cli, Duration::from_secs(30)));

    let submit_engine = Arc::clone(&engine);
    let task = tokio::spawn(async move {
        submit_engine
            .submit(predict_request(Some("cancel-me")), ChannelKind::Http, None)
            .await
    });

    // Let the child get started before cancelling.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let registry = engine.registry();
    assert_matches!(
        registry.request_cancel("cancel-me").unwrap(),
        CancelOutcome::Signalled
    );

    let result = task.await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Run was cancelled"));
    assert_eq!(result.stdout, "started\n");
    assert_eq!(
        registry.get("cancel-me").unwrap().state,
        RunState::Cancelled
    );

    // Second cancellation: no-op, same terminal result.
    let outcome = registry.request_cancel("cancel-me").unwrap();
    assert_matches!(outcome, CancelOutcome::AlreadyTerminal(stored) => {
        assert_eq!(*stored, result);
    });
}

#[tokio::test]
async fn zero_output_child_yields_a_valid_empty_result() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(tmp.path(), "exit 0");
    let engine = engine_with(tmp.path(), &cli, Duration::from_secs(10));

    let result = engine
        .submit(predict_request(None), ChannelKind::Http, None)
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.return_code, Some(0));
    assert!(result.metrics.is_empty());
    assert!(result.stdout.is_empty());
    assert!(result.artifacts.is_empty());
}

#[tokio::test]
async fn nonzero_exit_is_reported_in_band() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(tmp.path(), "echo 'bad weights file' >&2\nexit 2");
    let engine = engine_with(tmp.path(), &cli, Duration::from_secs(10));

    let result = engine
        .submit(predict_request(Some("exit2")), ChannelKind::Http, None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.return_code, Some(2));
    assert_eq!(result.stderr, "bad weights file\n");
    assert!(result.error.is_none());
    assert_eq!(engine.registry().get("exit2").unwrap().state, RunState::Failed);
}

#[tokio::test]
async fn spawn_failure_still_produces_a_result() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("no-such-cli");
    let engine = engine_with(tmp.path(), &missing, Duration::from_secs(10));

    let result = engine
        .submit(predict_request(Some("no-spawn")), ChannelKind::Http, None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.return_code, None);
    assert!(result.error.as_deref().unwrap().contains("Failed to spawn"));
    assert_eq!(
        engine.registry().get("no-spawn").unwrap().state,
        RunState::Failed
    );
}

#[tokio::test]
async fn fatal_output_overrides_a_zero_exit_code() {
    let tmp = tempfile::tempdir().unwrap();
    let cli = fake_cli(
        tmp.path(),
        "echo 'Traceback (most recent call last):' >&2\nexit 0",
    );
    let engine = engine_with(tmp.path(), &cli, Duration::from_secs(10));

    let result = engine
        .submit(predict_request(Some("fatal-run")), ChannelKind::Http, None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.return_code, Some(0));
    assert!(!result.warnings.is_empty());
    assert_eq!(
        engine.registry().get("fatal-run").unwrap().state,
        RunState::Failed
    );
}
