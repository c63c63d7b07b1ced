use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::executor::cursor::CursorFile;
use crate::executor::{ExecCtx, ExecEvent};
use crate::planner::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Fresh,
    InProgress { next: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Complete {
        executed: usize,
    },
    Failed {
        step: usize,
        description: String,
        error: Option<String>,
    },
}

impl RunOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Owns the step list and the persisted cursor; runs steps strictly in order.
pub struct RunController {
    plan: Plan,
    cursor: CursorFile,
}

impl RunController {
    pub fn new(plan: Plan, cursor: CursorFile) -> Self {
        Self { plan, cursor }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn cursor(&self) -> &CursorFile {
        &self.cursor
    }

    /// Reads the cursor and checks it against the current step list.
    pub fn state(&self) -> Result<RunState> {
        match self.cursor.load()? {
            None => Ok(RunState::Fresh),
            Some(next) if next > self.plan.len() => Err(Error::msg(format!(
                "step cursor {} points at step {next}, but there are only {} steps; run start to begin again",
                self.cursor.path().display(),
                self.plan.len()
            ))),
            Some(next) => Ok(RunState::InProgress { next }),
        }
    }

    pub fn start(&self, ctx: &mut ExecCtx) -> Result<RunOutcome> {
        self.run_from(ctx, 1)
    }

    pub fn resume(&self, ctx: &mut ExecCtx) -> Result<RunOutcome> {
        let from = match self.state()? {
            RunState::Fresh => 1,
            RunState::InProgress { next } => next,
        };
        if from > 1 {
            info!(step = from, "resuming");
        }
        self.run_from(ctx, from)
    }

    pub fn run_from(&self, ctx: &mut ExecCtx, from: usize) -> Result<RunOutcome> {
        let total = self.plan.len();
        if from == 0 || (from > total && total > 0) {
            return Err(Error::msg(format!(
                "cannot run from step {from}: valid steps are 1..={total}"
            )));
        }
        if ctx.dry_run {
            return Ok(self.dry_run_from(ctx, from));
        }

        for index in from..=total {
            let Some(step) = self.plan.get(index) else {
                break;
            };
            self.cursor.store(index)?;

            let description = step.describe();
            ctx.sink.emit(ExecEvent::StepStarted {
                index,
                total,
                description: description.clone(),
            });
            ctx.set_step(index);
            let start = Instant::now();
            let res = step.perform(ctx);
            let elapsed_ms = start.elapsed().as_millis();

            let error = match res {
                Ok(true) => {
                    ctx.sink.emit(ExecEvent::StepFinished {
                        index,
                        ok: true,
                        error: None,
                        elapsed_ms,
                    });
                    continue;
                }
                Ok(false) => None,
                Err(e) => Some(e.to_string()),
            };

            warn!(step = index, error = ?error, "step failed");
            ctx.sink.emit(ExecEvent::StepFinished {
                index,
                ok: false,
                error: error.clone(),
                elapsed_ms,
            });
            ctx.sink.emit(ExecEvent::RunDone {
                ok: false,
                failed_step: Some(index),
                error: error.clone(),
            });
            return Ok(RunOutcome::Failed {
                step: index,
                description,
                error,
            });
        }

        self.cursor.clear()?;
        debug!(path = %self.cursor.path().display(), "removed step cursor");
        ctx.sink.emit(ExecEvent::RunDone {
            ok: true,
            failed_step: None,
            error: None,
        });
        Ok(RunOutcome::Complete {
            executed: (total + 1).saturating_sub(from),
        })
    }

    fn dry_run_from(&self, ctx: &mut ExecCtx, from: usize) -> RunOutcome {
        let total = self.plan.len();
        for (offset, step) in self.plan.iter().skip(from - 1).enumerate() {
            let index = from + offset;
            ctx.sink.emit(ExecEvent::StepStarted {
                index,
                total,
                description: step.describe(),
            });
            ctx.set_step(index);
            ctx.log("DRY-RUN: not performed");
            ctx.sink.emit(ExecEvent::StepFinished {
                index,
                ok: true,
                error: None,
                elapsed_ms: 0,
            });
        }
        ctx.sink.emit(ExecEvent::RunDone {
            ok: true,
            failed_step: None,
            error: None,
        });
        RunOutcome::Complete {
            executed: (total + 1).saturating_sub(from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::ctx_in;
    use crate::steps::Step;
    use std::fs;
    use std::path::Path;

    // Each step appends its number to `log`, so the invocation order is observable.
    fn logging_plan(n: usize, failing: Option<usize>) -> Plan {
        let steps = (1..=n)
            .map(|i| {
                if Some(i) == failing {
                    Step::cmd(format!("sh -c 'echo {i} >> log; exit 1'"))
                } else {
                    Step::cmd(format!("sh -c 'echo {i} >> log'"))
                }
            })
            .collect();
        Plan::new(steps)
    }

    fn invoked(root: &Path) -> Vec<String> {
        fs::read_to_string(root.join("log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn controller(root: &Path, plan: Plan) -> RunController {
        RunController::new(plan, CursorFile::new(root.join(".last_step")))
    }

    #[test]
    fn start_runs_everything_and_removes_the_cursor() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (mut ctx, _rx) = ctx_in(tmp.path());
        let rc = controller(tmp.path(), logging_plan(3, None));

        let out = rc.start(&mut ctx).expect("run");
        assert_eq!(out, RunOutcome::Complete { executed: 3 });
        assert_eq!(invoked(tmp.path()), ["1", "2", "3"]);
        assert!(!tmp.path().join(".last_step").exists());
        assert_eq!(rc.state().expect("state"), RunState::Fresh);
    }

    #[test]
    fn resume_from_three_stops_at_four_and_keeps_the_cursor() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (mut ctx, _rx) = ctx_in(tmp.path());
        let rc = controller(tmp.path(), logging_plan(5, Some(4)));
        rc.cursor().store(3).expect("seed cursor");

        let out = rc.resume(&mut ctx).expect("run");
        match out {
            RunOutcome::Failed { step, error, .. } => {
                assert_eq!(step, 4);
                assert_eq!(error, None);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(invoked(tmp.path()), ["3", "4"]);
        assert_eq!(
            fs::read_to_string(tmp.path().join(".last_step")).expect("cursor"),
            "4\n"
        );
        assert_eq!(rc.state().expect("state"), RunState::InProgress { next: 4 });
    }

    #[test]
    fn io_failures_fail_the_run_with_their_message() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (mut ctx, _rx) = ctx_in(tmp.path());
        let plan = Plan::new(vec![Step::cmd("true").in_dir("missing-dir")]);
        let rc = controller(tmp.path(), plan);

        let RunOutcome::Failed { step, error, .. } = rc.start(&mut ctx).expect("run") else {
            panic!("expected failure");
        };
        assert_eq!(step, 1);
        assert!(error.expect("error message").contains("missing-dir"));
        assert_eq!(rc.cursor().load().expect("load"), Some(1));
    }

    #[test]
    fn cursor_beyond_the_plan_is_rejected_before_running() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (mut ctx, _rx) = ctx_in(tmp.path());
        let rc = controller(tmp.path(), logging_plan(2, None));
        rc.cursor().store(9).expect("seed cursor");

        assert!(rc.resume(&mut ctx).is_err());
        assert!(invoked(tmp.path()).is_empty());
    }

    #[test]
    fn dry_run_leaves_no_trace() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (mut ctx, rx) = ctx_in(tmp.path());
        ctx.dry_run = true;
        let rc = controller(tmp.path(), logging_plan(3, Some(2)));

        let out = rc.resume(&mut ctx).expect("dry run");
        assert_eq!(out, RunOutcome::Complete { executed: 3 });
        assert!(invoked(tmp.path()).is_empty());
        assert!(!tmp.path().join(".last_step").exists());

        let started = rx
            .try_iter()
            .filter(|ev| matches!(ev, ExecEvent::StepStarted { .. }))
            .count();
        assert_eq!(started, 3);
    }
}
