//! Child-process supervision: spawn, concurrent stream draining, timeout,
//! and cooperative cancellation.
//!
//! Both output pipes are drained while the process runs (never after
//! exit) through a single ordered line queue consumed by one loop that
//! owns the parser, so stdout and stderr can never block each other and
//! event order matches arrival order. Timeout and cancellation race
//! against child exit; both route through the same graceful-then-hard
//! termination path.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use yolobridge_core::command::CommandLine;
use yolobridge_core::config::EngineConfig;
use yolobridge_core::error::RunError;
use yolobridge_core::parser::{OutputParser, ParsedEvent};

/// Maximum bytes captured per stream (10 MiB). Draining continues past
/// the cap so the child never blocks on a full pipe; capture stops.
const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;

/// Upper bound on post-termination stream draining. The readers normally
/// hit EOF as soon as the child's pipes close, but grandchildren can keep
/// a pipe open indefinitely.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Which pipe a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// How a supervised process came to an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The process exited on its own; `code` is `None` when killed by a
    /// signal outside our control.
    Exited { code: Option<i32> },
    /// The wall-clock timeout elapsed and the process was terminated.
    TimedOut { elapsed_ms: u64 },
    /// An external cancellation request terminated the process.
    Cancelled,
}

/// Captured output plus the completion kind.
#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub completion: Completion,
}

/// Spawns and supervises one child process per run.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
    kill_grace: Duration,
    working_dir: Option<std::path::PathBuf>,
}

impl ProcessRunner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            timeout: config.timeout,
            kill_grace: config.kill_grace,
            working_dir: config.working_dir.clone(),
        }
    }

    /// Spawn the command with both output pipes attached.
    ///
    /// `kill_on_drop` guarantees the child does not outlive the runner
    /// even on unexpected task teardown.
    pub fn spawn(&self, command: &CommandLine) -> Result<Child, RunError> {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.spawn().map_err(|e| RunError::Spawn {
            program: command.program.clone(),
            source: e,
        })
    }

    /// Drive a spawned child to completion: drain both streams, feed the
    /// parser, forward events, and race exit against timeout and
    /// cancellation.
    ///
    /// Completion is not reported until both streams are drained (bounded
    /// by [`STREAM_DRAIN_TIMEOUT`] after termination).
    pub async fn drive(
        &self,
        mut child: Child,
        parser: &mut OutputParser,
        events: Option<&mpsc::Sender<ParsedEvent>>,
        cancel: &CancellationToken,
    ) -> ProcessOutput {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (line_tx, mut line_rx) = mpsc::channel::<(StreamSource, String)>(1024);
        let stdout_task = tokio::spawn(forward_lines(stdout, StreamSource::Stdout, line_tx.clone()));
        let stderr_task = tokio::spawn(forward_lines(stderr, StreamSource::Stderr, line_tx));

        let started = Instant::now();
        let timeout = tokio::time::sleep(self.timeout);
        tokio::pin!(timeout);

        let mut capture = Capture::default();
        let mut streams_done = false;

        let completion = loop {
            tokio::select! {
                maybe = line_rx.recv(), if !streams_done => match maybe {
                    Some((source, line)) => {
                        consume_line(&mut capture, parser, events, source, line).await;
                    }
                    None => streams_done = true,
                },
                status = child.wait() => {
                    break Completion::Exited {
                        code: status.ok().and_then(|s| s.code()),
                    };
                }
                () = &mut timeout => {
                    self.terminate(&mut child).await;
                    break Completion::TimedOut {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                }
                () = cancel.cancelled() => {
                    self.terminate(&mut child).await;
                    break Completion::Cancelled;
                }
            }
        };

        // Drain whatever the readers still hold before reporting.
        if !streams_done {
            let drain_deadline = tokio::time::sleep(STREAM_DRAIN_TIMEOUT);
            tokio::pin!(drain_deadline);
            loop {
                tokio::select! {
                    maybe = line_rx.recv() => match maybe {
                        Some((source, line)) => {
                            consume_line(&mut capture, parser, events, source, line).await;
                        }
                        None => break,
                    },
                    () = &mut drain_deadline => {
                        tracing::warn!("Stream drain timed out; a grandchild may hold the pipe");
                        break;
                    }
                }
            }
        }
        stdout_task.abort();
        stderr_task.abort();

        ProcessOutput {
            stdout: capture.stdout,
            stderr: capture.stderr,
            completion,
        }
    }

    /// Graceful-then-hard termination: SIGTERM, wait out the grace
    /// period, then SIGKILL.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: pid comes from a live child we own.
            unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if tokio::time::timeout(self.kill_grace, child.wait())
                .await
                .is_ok()
            {
                return;
            }
            tracing::warn!(pid, "Child ignored SIGTERM, killing");
        }
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

/// Append a line to the right capture buffer, classify it, and forward
/// any events to the run's subscriber.
async fn consume_line(
    capture: &mut Capture,
    parser: &mut OutputParser,
    events: Option<&mpsc::Sender<ParsedEvent>>,
    source: StreamSource,
    line: String,
) {
    for event in parser.parse_line(&line) {
        if let Some(tx) = events {
            // A dropped receiver only means the subscriber went away;
            // the run itself continues.
            let _ = tx.send(event).await;
        }
    }
    capture.push(source, &line);
}

/// Read one pipe line-by-line into the shared ordered queue.
async fn forward_lines<R>(
    reader: Option<R>,
    source: StreamSource,
    tx: mpsc::Sender<(StreamSource, String)>,
) where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else { return };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send((source, line)).await.is_err() {
            break;
        }
    }
}

#[derive(Debug, Default)]
struct Capture {
    stdout: String,
    stderr: String,
}

impl Capture {
    fn push(&mut self, source: StreamSource, line: &str) {
        let buf = match source {
            StreamSource::Stdout => &mut self.stdout,
            StreamSource::Stderr => &mut self.stderr,
        };
        if buf.len() < MAX_CAPTURE_BYTES {
            buf.push_str(line);
            buf.push('\n');
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use yolobridge_core::parser::ParserRules;

    fn runner(timeout: Duration) -> ProcessRunner {
        ProcessRunner::new(&EngineConfig {
            timeout,
            kill_grace: Duration::from_millis(200),
            ..EngineConfig::default()
        })
    }

    fn sh(script: &str) -> CommandLine {
        CommandLine {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    fn fresh_parser() -> OutputParser {
        OutputParser::new(Arc::new(ParserRules::v8()))
    }

    #[tokio::test]
    async fn captures_both_streams_separately() {
        let runner = runner(Duration::from_secs(5));
        let child = runner.spawn(&sh("echo out; echo err >&2")).unwrap();
        let mut parser = fresh_parser();
        let cancel = CancellationToken::new();

        let output = runner.drive(child, &mut parser, None, &cancel).await;
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.completion, Completion::Exited { code: Some(0) });
    }

    #[tokio::test]
    async fn exit_code_propagates_exactly() {
        let runner = runner(Duration::from_secs(5));
        let child = runner.spawn(&sh("exit 3")).unwrap();
        let mut parser = fresh_parser();
        let cancel = CancellationToken::new();

        let output = runner.drive(child, &mut parser, None, &cancel).await;
        assert_eq!(output.completion, Completion::Exited { code: Some(3) });
    }

    #[tokio::test]
    async fn timeout_preserves_partial_output() {
        let runner = runner(Duration::from_millis(300));
        let child = runner
            .spawn(&sh("echo started; sleep 10; echo never"))
            .unwrap();
        let mut parser = fresh_parser();
        let cancel = CancellationToken::new();

        let started = std::time::Instant::now();
        let output = runner.drive(child, &mut parser, None, &cancel).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(output.completion, Completion::TimedOut { .. }));
        assert_eq!(output.stdout, "started\n");
    }

    #[tokio::test]
    async fn cancellation_terminates_the_child() {
        let runner = runner(Duration::from_secs(30));
        let child = runner.spawn(&sh("echo started; sleep 10")).unwrap();
        let mut parser = fresh_parser();
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel_clone.cancel();
        });

        let started = std::time::Instant::now();
        let output = runner.drive(child, &mut parser, None, &cancel).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(output.completion, Completion::Cancelled);
        assert_eq!(output.stdout, "started\n");
    }

    #[tokio::test]
    async fn spawn_failure_maps_to_spawn_error() {
        let runner = runner(Duration::from_secs(1));
        let missing = CommandLine {
            program: "/nonexistent/yolobridge-test-binary".into(),
            args: vec![],
        };
        assert!(matches!(
            runner.spawn(&missing),
            Err(RunError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn zero_output_child_completes() {
        let runner = runner(Duration::from_secs(5));
        let child = runner.spawn(&sh("true")).unwrap();
        let mut parser = fresh_parser();
        let cancel = CancellationToken::new();

        let output = runner.drive(child, &mut parser, None, &cancel).await;
        assert_eq!(output.stdout, "");
        assert_eq!(output.stderr, "");
        assert_eq!(output.completion, Completion::Exited { code: Some(0) });
    }

    #[tokio::test]
    async fn events_stream_in_arrival_order() {
        let runner = runner(Duration::from_secs(5));
        let child = runner
            .spawn(&sh("echo 'Epoch 1/2'; echo 'Epoch 2/2'; echo 'box_loss: 0.5'"))
            .unwrap();
        let mut parser = fresh_parser();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(64);

        let output = runner.drive(child, &mut parser, Some(&tx), &cancel).await;
        drop(tx);
        assert_eq!(output.completion, Completion::Exited { code: Some(0) });

        let mut received = Vec::new();
        while let Some(ev) = rx.recv().await {
            received.push(ev);
        }
        assert_eq!(received.len(), 3);
        assert!(matches!(
            received[0],
            ParsedEvent::Progress { current_step: 1, total_steps: 2, .. }
        ));
        assert!(matches!(
            received[1],
            ParsedEvent::Progress { current_step: 2, total_steps: 2, .. }
        ));
        assert!(matches!(received[2], ParsedEvent::Metric { .. }));
    }
}
