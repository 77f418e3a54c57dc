//! End-to-end orchestration of one run.
//!
//! All three channels call [`RunEngine::submit`]; the engine owns the
//! command builder, artifact scanner, process runner, parser rules, and
//! registry, and guarantees every submission past validation produces
//! exactly one [`RunResult`] — including timeout, cancellation, and
//! spawn-failure paths.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use yolobridge_core::artifacts::{ArtifactScan, ArtifactScanner};
use yolobridge_core::command::CommandBuilder;
use yolobridge_core::config::EngineConfig;
use yolobridge_core::error::RunError;
use yolobridge_core::operation::OperationRequest;
use yolobridge_core::parser::{OutputParser, ParsedEvent, ParserRules};
use yolobridge_core::result::RunResult;

use crate::process::{Completion, ProcessRunner};
use crate::registry::{ChannelKind, RunRegistry, RunState};

/// Shared execution engine behind all channel adapters.
pub struct RunEngine {
    builder: CommandBuilder,
    scanner: ArtifactScanner,
    runner: ProcessRunner,
    rules: Arc<ParserRules>,
    registry: Arc<RunRegistry>,
}

impl RunEngine {
    /// Engine with the shipped output grammar.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_rules(config, ParserRules::v8())
    }

    /// Engine with a caller-supplied output grammar (the grammar is
    /// CLI-version-specific and pluggable).
    pub fn with_rules(config: EngineConfig, rules: ParserRules) -> Self {
        Self {
            builder: CommandBuilder::new(&config),
            scanner: ArtifactScanner::new(&config),
            runner: ProcessRunner::new(&config),
            rules: Arc::new(rules),
            registry: Arc::new(RunRegistry::new(config.retention)),
        }
    }

    /// The registry backing this engine, for lookups, cancellation, and
    /// the eviction sweep.
    pub fn registry(&self) -> Arc<RunRegistry> {
        Arc::clone(&self.registry)
    }

    /// Execute one operation request through its full lifecycle.
    ///
    /// Returns `Err` only for `Validation` and `Conflict`, both raised
    /// before any subprocess exists (a validation failure happens before
    /// a run handle is even created). Every other outcome — success,
    /// nonzero exit, timeout, cancellation, spawn failure — is reported
    /// inside the returned [`RunResult`].
    ///
    /// When `events` is given, every [`ParsedEvent`] is forwarded to it
    /// in arrival order, ending with the Terminal event. One subscriber
    /// per run: the channel adapter that initiated it.
    pub async fn submit(
        &self,
        request: OperationRequest,
        channel: ChannelKind,
        events: Option<mpsc::Sender<ParsedEvent>>,
    ) -> Result<RunResult, RunError> {
        let command = self.builder.build(&request)?;
        let command_text = command.to_string();

        let run_id = request
            .params
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let cancel = self.registry.register(&run_id, &command_text, channel)?;
        tracing::info!(
            run_id = %run_id,
            operation = %request.operation,
            channel = %channel,
            command = %command_text,
            "Run registered",
        );

        // Snapshot the output directory before spawning so the post-run
        // diff only reports files this run produced.
        let out_dir = self.scanner.output_dir(&request);
        let snapshot = {
            let scanner = self.scanner.clone();
            let dir = out_dir.clone();
            tokio::task::spawn_blocking(move || scanner.snapshot(&dir))
                .await
                .unwrap_or_default()
        };

        let mut parser = OutputParser::new(Arc::clone(&self.rules));

        let child = match self.runner.spawn(&command) {
            Ok(child) => child,
            Err(err) => {
                tracing::error!(run_id = %run_id, error = %err, "Spawn failed");
                let result = Arc::new(RunResult {
                    run_id: run_id.clone(),
                    command: command_text,
                    return_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    metrics: Default::default(),
                    artifacts: Vec::new(),
                    success: false,
                    error: Some(err.to_string()),
                    warnings: Vec::new(),
                    timestamp: Utc::now(),
                });
                self.registry
                    .finish(&run_id, RunState::Failed, Arc::clone(&result));
                return Ok((*result).clone());
            }
        };

        self.registry.mark_running(&run_id);
        tracing::debug!(run_id = %run_id, "Child process spawned");

        let output = self
            .runner
            .drive(child, &mut parser, events.as_ref(), &cancel)
            .await;

        let exit_ok = matches!(output.completion, Completion::Exited { code: Some(0) });
        let terminal = parser.finish(exit_ok);
        if let (Some(tx), Some(event)) = (&events, &terminal) {
            let _ = tx.send(event.clone()).await;
        }
        let terminal_success = matches!(terminal, Some(ParsedEvent::Terminal { success: true, .. }));

        let scan = {
            let scanner = self.scanner.clone();
            let dir = out_dir.clone();
            tokio::task::spawn_blocking(move || scanner.scan_new(&dir, &snapshot))
                .await
                .unwrap_or_else(|_| ArtifactScan::default())
        };

        let (state, error) = match &output.completion {
            Completion::Exited { .. } if terminal_success => (RunState::Succeeded, None),
            Completion::Exited { .. } => (RunState::Failed, None),
            Completion::TimedOut { elapsed_ms } => (
                RunState::TimedOut,
                Some(
                    RunError::Timeout {
                        elapsed_ms: *elapsed_ms,
                    }
                    .to_string(),
                ),
            ),
            Completion::Cancelled => (RunState::Cancelled, Some(RunError::Cancelled.to_string())),
        };

        let return_code = match output.completion {
            Completion::Exited { code } => code,
            _ => None,
        };

        let mut warnings = parser.warnings().to_vec();
        if let Some(warning) = scan.warning {
            warnings.push(warning);
        }

        let result = Arc::new(RunResult {
            run_id: run_id.clone(),
            command: command_text,
            return_code,
            stdout: output.stdout,
            stderr: output.stderr,
            metrics: parser.metrics().clone(),
            artifacts: scan.artifacts,
            success: state == RunState::Succeeded,
            error,
            warnings,
            timestamp: Utc::now(),
        });

        self.registry.finish(&run_id, state, Arc::clone(&result));
        tracing::info!(
            run_id = %run_id,
            state = state.as_str(),
            return_code = ?result.return_code,
            artifacts = result.artifacts.len(),
            "Run finished",
        );

        Ok((*result).clone())
    }
}
