use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::shell;
use crate::workspace::WorkspacePaths;

pub mod controller;
pub mod cursor;

pub use controller::{RunController, RunOutcome, RunState};
pub use cursor::{CursorFile, PinnedVersion, VersionMode, resolve_version};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    StepStarted {
        index: usize,
        total: usize,
        description: String,
    },
    StepLog {
        index: Option<usize>,
        line: String,
    },
    StepFinished {
        index: usize,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
    },
    RunDone {
        ok: bool,
        failed_step: Option<usize>,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

#[derive(Default)]
pub struct StdoutSink {
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    started_at: Option<Instant>,
    steps_started: usize,
    steps_ok: usize,
    steps_failed: usize,
    total_step_ms: u128,
}

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::StepStarted {
                index,
                total,
                description,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    s.steps_started = s.steps_started.saturating_add(1);
                    if s.started_at.is_none() {
                        s.started_at = Some(Instant::now());
                    }
                }
                println!("step {index}/{total}: {description}");
            }
            ExecEvent::StepLog { line, .. } => {
                println!("{line}");
            }
            ExecEvent::StepFinished {
                index,
                ok,
                error,
                elapsed_ms,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    if ok {
                        s.steps_ok = s.steps_ok.saturating_add(1);
                    } else {
                        s.steps_failed = s.steps_failed.saturating_add(1);
                    }
                    s.total_step_ms = s.total_step_ms.saturating_add(elapsed_ms);
                }
                if ok {
                    println!("step {index} done ({})", format_elapsed_ms(elapsed_ms));
                } else {
                    match error {
                        Some(e) => println!("step {index} FAILED: {e}"),
                        None => println!("step {index} FAILED"),
                    }
                }
            }
            ExecEvent::RunDone {
                ok,
                failed_step,
                error,
            } => {
                let mut summary = String::new();
                if let Ok(mut s) = self.state.lock() {
                    let wall = s.started_at.map(|t| t.elapsed()).unwrap_or_default();
                    summary.push_str("SUMMARY:\n");
                    summary.push_str(&format!(
                        "  status: {}\n",
                        if ok { "ok" } else { "failed" }
                    ));
                    summary.push_str(&format!(
                        "  steps: started={} ok={} failed={}\n",
                        s.steps_started, s.steps_ok, s.steps_failed
                    ));
                    summary.push_str(&format!(
                        "  elapsed: {}\n",
                        format_elapsed_hms(wall.as_secs())
                    ));
                    if let Some(i) = failed_step {
                        summary.push_str(&format!("  failed_step: {i}\n"));
                    }
                    if let Some(e) = error.as_deref().filter(|e| !e.trim().is_empty()) {
                        summary.push_str(&format!("  error: {e}\n"));
                    }
                    *s = StdoutSinkState::default();
                }
                print!("{summary}");
            }
        }
    }
}

/// Forwards events to a receiver; used by embedders and tests.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

#[derive(Clone)]
pub struct ExecCtx {
    pub dry_run: bool,
    pub paths: WorkspacePaths,
    pub sink: Arc<dyn ExecSink>,
    pub current_step: Option<usize>,
}

impl ExecCtx {
    pub fn new(paths: WorkspacePaths, dry_run: bool, sink: Arc<dyn ExecSink>) -> Self {
        Self {
            dry_run,
            paths,
            sink,
            current_step: None,
        }
    }

    pub fn set_step(&mut self, index: usize) {
        self.current_step = Some(index);
    }

    pub fn log(&self, msg: &str) {
        self.sink.emit(ExecEvent::StepLog {
            index: self.current_step,
            line: msg.to_string(),
        });
    }

    fn announce(&self, line: &str, dir: Option<&Path>) {
        match dir {
            Some(d) => self.log(&format!("Running: {line} (in {})", d.display())),
            None => self.log(&format!("Running: {line}")),
        }
    }

    /// Run `line` in `dir` (relative to the workspace root). Returns whether the
    /// command succeeded; with `may_fail` every outcome counts as success.
    pub fn run_cmd(&self, line: &str, dir: Option<&Path>, may_fail: bool) -> Result<bool> {
        self.announce(line, dir);
        if self.dry_run {
            self.log(&format!("DRY-RUN: {line}"));
            return Ok(true);
        }

        let cwd = self.paths.resolve_opt(dir);
        let status = shell::command(line, &cwd).and_then(|mut cmd| {
            cmd.stdin(Stdio::null())
                .status()
                .map_err(|e| Error::msg(format!("failed to run '{line}' in {}: {e}", cwd.display())))
        });

        match status {
            Ok(s) if s.success() => Ok(true),
            Ok(s) if may_fail => {
                self.log(&format!("ignoring failure ({s}): {line}"));
                Ok(true)
            }
            Ok(s) => {
                debug!(command = line, status = %s, "command failed");
                self.log(&format!("command failed ({s}): {line}"));
                Ok(false)
            }
            Err(e) if may_fail => {
                warn!(command = line, "ignoring error: {e}");
                self.log(&format!("ignoring error: {e}"));
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Run `line` in `dir` and return its stdout without the final line terminator.
    pub fn capture_cmd(&self, line: &str, dir: Option<&Path>) -> Result<String> {
        self.announce(line, dir);
        let cwd = self.paths.resolve_opt(dir);
        let out = shell::command(line, &cwd)?
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|e| Error::msg(format!("failed to run '{line}' in {}: {e}", cwd.display())))?;
        let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
        if text.ends_with('\n') {
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
        }
        debug!(command = line, status = %out.status, output = %text, "captured output");
        Ok(text)
    }
}

fn format_elapsed_ms(ms: u128) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format_elapsed_hms((ms / 1000) as u64)
    }
}

fn format_elapsed_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
