//! Incremental, line-oriented classification of the wrapped CLI's output
//! into typed events.
//!
//! Classification is best-effort and never fatal: a line that matches no
//! rule is simply raw output. The grammar itself is a versioned
//! [`ParserRules`] value because the wrapped CLI's line formats change
//! across releases; [`ParserRules::v8`] is the shipped default.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One classified event from a run's output stream.
///
/// Events for a single run form a strict total order (arrival order).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedEvent {
    /// A progress tick (`Epoch 3/10`, `42%|...`).
    Progress {
        current_step: u64,
        total_steps: u64,
        /// The raw line the tick was derived from.
        detail: Option<String>,
    },
    /// One or more numeric metrics read from a single line.
    Metric { values: BTreeMap<String, f64> },
    /// A non-fatal parse or output warning.
    Warning { message: String },
    /// The final event of a run's stream: emitted exactly once.
    Terminal {
        success: bool,
        metrics: BTreeMap<String, f64>,
    },
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A versioned output grammar: the regex rule set for one wrapped-CLI
/// generation. Construct alternates directly when targeting a different
/// CLI version; nothing in the parser assumes a specific set.
#[derive(Debug)]
pub struct ParserRules {
    /// Grammar identifier, for logs.
    pub version: &'static str,
    /// Step-style progress (`captures: current, total`).
    pub step_progress: Vec<Regex>,
    /// Percent-style progress (`capture: percent`).
    pub percent_progress: Regex,
    /// Named metric signatures (`capture: numeric value`).
    pub named_metrics: Vec<(&'static str, Regex)>,
    /// Generic `key: value` metric line; used only when the whole line is
    /// a single key/value pair and the value parses as a number.
    pub generic_metric: Regex,
    /// Markers that flip the terminal success flag.
    pub fatal: Vec<Regex>,
    /// The CLI's natural end-of-run marker line.
    pub final_marker: Regex,
}

impl ParserRules {
    /// Grammar for the v8-generation CLI.
    pub fn v8() -> Self {
        Self {
            version: "v8",
            step_progress: vec![Regex::new(r"(?i)\bEpoch\s+(\d+)/(\d+)").unwrap()],
            percent_progress: Regex::new(r"\b(\d{1,3})%\|").unwrap(),
            named_metrics: vec![
                ("box_loss", Regex::new(r"box_loss:\s*([\d.]+)").unwrap()),
                ("obj_loss", Regex::new(r"obj_loss:\s*([\d.]+)").unwrap()),
                ("cls_loss", Regex::new(r"cls_loss:\s*([\d.]+)").unwrap()),
                ("dfl_loss", Regex::new(r"dfl_loss:\s*([\d.]+)").unwrap()),
                ("total_loss", Regex::new(r"total_loss:\s*([\d.]+)").unwrap()),
                ("mAP50", Regex::new(r"\bmAP50:\s*([\d.]+)").unwrap()),
                ("mAP50-95", Regex::new(r"\bmAP50-95:\s*([\d.]+)").unwrap()),
                ("precision", Regex::new(r"Precision:\s*([\d.]+)").unwrap()),
                ("recall", Regex::new(r"Recall:\s*([\d.]+)").unwrap()),
                (
                    "inference_time_ms",
                    Regex::new(r"inference:\s*([\d.]+)ms").unwrap(),
                ),
                (
                    "total_detections",
                    Regex::new(r"(\d+)\s+detections?\b").unwrap(),
                ),
                (
                    "export_time_s",
                    Regex::new(r"Export complete \(([\d.]+)s\)").unwrap(),
                ),
            ],
            generic_metric: Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_./-]*):\s*([-+0-9.eE]+)\s*$")
                .unwrap(),
            fatal: vec![
                Regex::new(r"^Traceback \(most recent call last\)").unwrap(),
                Regex::new(r"(?i)^\s*error\b\s*[:\s]").unwrap(),
                Regex::new(r"CUDA out of memory").unwrap(),
            ],
            final_marker: Regex::new(r"^Results saved to\b").unwrap(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Stateful incremental parser for one run's output.
///
/// Restartable per invocation: construct a fresh parser per run, feed it
/// lines (or raw chunks) as they arrive, then call
/// [`finish`](OutputParser::finish) exactly once at end-of-stream.
#[derive(Debug)]
pub struct OutputParser {
    rules: Arc<ParserRules>,
    metrics: BTreeMap<String, f64>,
    warnings: Vec<String>,
    fatal_seen: bool,
    final_marker_seen: bool,
    terminal_emitted: bool,
    partial: String,
}

impl OutputParser {
    pub fn new(rules: Arc<ParserRules>) -> Self {
        Self {
            rules,
            metrics: BTreeMap::new(),
            warnings: Vec::new(),
            fatal_seen: false,
            final_marker_seen: false,
            terminal_emitted: false,
            partial: String::new(),
        }
    }

    /// Feed a raw chunk that may contain zero or more newline boundaries.
    ///
    /// Partial trailing lines are buffered until their newline arrives;
    /// call [`finish`](OutputParser::finish) to flush the remainder.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParsedEvent> {
        self.partial.push_str(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            events.extend(self.parse_line(line.trim_end_matches(['\n', '\r'])));
        }
        events
    }

    /// Classify one complete line.
    ///
    /// A single line can produce several events (a progress tick and a
    /// metric update often share a line). Unrecognized lines produce none.
    pub fn parse_line(&mut self, line: &str) -> Vec<ParsedEvent> {
        let rules = Arc::clone(&self.rules);
        let mut events = Vec::new();

        if rules.fatal.iter().any(|re| re.is_match(line)) {
            self.fatal_seen = true;
            events.push(self.warn(format!("fatal output: {}", line.trim())));
        }

        if rules.final_marker.is_match(line) {
            self.final_marker_seen = true;
        }

        // Progress: step-style first, percent-style as fallback.
        if let Some(caps) = rules.step_progress.iter().find_map(|re| re.captures(line)) {
            match (caps[1].parse::<u64>(), caps[2].parse::<u64>()) {
                (Ok(current), Ok(total)) => events.push(ParsedEvent::Progress {
                    current_step: current,
                    total_steps: total,
                    detail: Some(line.trim().to_string()),
                }),
                _ => events.push(self.warn(format!("unreadable progress tick: {line}"))),
            }
        } else if let Some(caps) = rules.percent_progress.captures(line) {
            if let Ok(pct) = caps[1].parse::<u64>() {
                events.push(ParsedEvent::Progress {
                    current_step: pct.min(100),
                    total_steps: 100,
                    detail: Some(line.trim().to_string()),
                });
            }
        }

        // Named metric signatures: collect every match on the line into a
        // single Metric event. Coercion failure on a matched signature
        // degrades to a Warning, never aborts parsing.
        let mut values = BTreeMap::new();
        for (name, re) in &rules.named_metrics {
            if let Some(caps) = re.captures(line) {
                match caps[1].parse::<f64>() {
                    Ok(v) => {
                        values.insert((*name).to_string(), v);
                    }
                    Err(_) => {
                        events.push(self.warn(format!(
                            "metric '{name}' has non-numeric value '{}'",
                            &caps[1]
                        )));
                    }
                }
            }
        }

        // Generic `key: value` line, only when nothing named matched it.
        if values.is_empty() {
            if let Some(caps) = rules.generic_metric.captures(line) {
                if let Ok(v) = caps[2].parse::<f64>() {
                    values.insert(caps[1].to_string(), v);
                }
            }
        }

        if !values.is_empty() {
            // Last-value-wins merge into the run snapshot.
            for (k, v) in &values {
                self.metrics.insert(k.clone(), *v);
            }
            events.push(ParsedEvent::Metric { values });
        }

        events
    }

    /// Flush any buffered partial line and emit the Terminal event.
    ///
    /// Returns `None` if the terminal event was already produced.
    /// `exit_ok` is whether the process exited with status zero.
    pub fn finish(&mut self, exit_ok: bool) -> Option<ParsedEvent> {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            // Trailing events fold into the snapshot; only Terminal is returned.
            let _ = self.parse_line(line.trim_end_matches(['\n', '\r']));
        }

        if self.terminal_emitted {
            return None;
        }
        self.terminal_emitted = true;
        Some(ParsedEvent::Terminal {
            success: exit_ok && !self.fatal_seen,
            metrics: self.metrics.clone(),
        })
    }

    /// The merged metrics snapshot (last value wins per key).
    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    /// Accumulated warning texts, in arrival order.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Whether a fatal marker was observed on any line.
    pub fn fatal_seen(&self) -> bool {
        self.fatal_seen
    }

    /// Whether the CLI's natural end-of-run marker was observed.
    pub fn final_marker_seen(&self) -> bool {
        self.final_marker_seen
    }

    /// Record a warning both as an event and in the run summary.
    fn warn(&mut self, message: String) -> ParsedEvent {
        self.warnings.push(message.clone());
        ParsedEvent::Warning { message }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
