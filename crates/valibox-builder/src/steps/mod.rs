use std::fmt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::conditional::Conditional;
use crate::error::Result;
use crate::executor::ExecCtx;

pub mod feeds;
pub mod manifest;
pub mod release;
pub mod version;

pub use feeds::RewriteFeeds;
pub use manifest::RewritePackageManifest;
pub use release::{AssembleRelease, ReleaseReport};
pub use version::StampVersion;

#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Command(String),
    RewriteFeeds(RewriteFeeds),
    RewritePackageManifest(RewritePackageManifest),
    StampVersion(StampVersion),
    AssembleRelease(AssembleRelease),
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(line) => write!(f, "{line}"),
            Self::RewriteFeeds(a) => write!(f, "{a}"),
            Self::RewritePackageManifest(a) => write!(f, "{a}"),
            Self::StampVersion(a) => write!(f, "{a}"),
            Self::AssembleRelease(a) => write!(f, "{a}"),
        }
    }
}

/// One unit of the pipeline. `dir` is relative to the workspace root.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub dir: Option<PathBuf>,
    pub action: StepAction,
    pub may_fail: bool,
    pub skip: bool,
    pub conditional: Option<Conditional>,
}

impl Step {
    pub fn new(action: StepAction) -> Self {
        Self {
            dir: None,
            action,
            may_fail: false,
            skip: false,
            conditional: None,
        }
    }

    pub fn cmd(line: impl Into<String>) -> Self {
        Self::new(StepAction::Command(line.into()))
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn may_fail(mut self) -> Self {
        self.may_fail = true;
        self
    }

    pub fn skip_if(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn when(mut self, conditional: Conditional) -> Self {
        self.conditional = Some(conditional);
        self
    }

    /// `Ok(false)` is a failed command; `Err` is an I/O failure inside the guard or the action.
    pub fn perform(&self, ctx: &ExecCtx) -> Result<bool> {
        if self.skip {
            ctx.log("skipped (disabled by configuration)");
            return Ok(true);
        }

        let res = self.perform_guarded(ctx);
        if !self.may_fail {
            return res;
        }
        match res {
            Ok(true) => Ok(true),
            Ok(false) => {
                ctx.log("step failed; continuing (may fail)");
                Ok(true)
            }
            Err(e) => {
                warn!(step = %self.action, "ignoring error: {e}");
                ctx.log(&format!("ignoring error: {e}"));
                Ok(true)
            }
        }
    }

    fn perform_guarded(&self, ctx: &ExecCtx) -> Result<bool> {
        if let Some(c) = &self.conditional
            && c.evaluate(ctx)?
        {
            ctx.log(&format!("skipped (condition not met: {c})"));
            return Ok(true);
        }

        let dir = ctx.paths.resolve_opt(self.dir.as_deref());
        match &self.action {
            StepAction::Command(line) => ctx.run_cmd(line, self.dir.as_deref(), self.may_fail),
            StepAction::RewriteFeeds(a) => a.perform(ctx, &dir),
            StepAction::RewritePackageManifest(a) => a.perform(ctx, &dir),
            StepAction::StampVersion(a) => a.perform(ctx, &dir),
            StepAction::AssembleRelease(a) => a.perform(ctx),
        }
    }

    pub fn describe(&self) -> String {
        self.to_string()
    }

    pub fn dir_display(&self) -> String {
        self.dir
            .as_deref()
            .map(Path::display)
            .map(|d| d.to_string())
            .unwrap_or_else(|| "current dir".into())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(c) = &self.conditional {
            write!(f, "{c}\n\t")?;
        }
        write!(f, "in {}: {}", self.dir_display(), self.action)?;
        if self.may_fail {
            write!(f, " (may fail)")?;
        }
        if self.skip {
            write!(f, " (disabled)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::{ctx_in, log_lines};

    #[test]
    fn static_skip_runs_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (ctx, rx) = ctx_in(tmp.path());
        let step = Step::cmd("touch marker").skip_if(true);
        assert!(step.perform(&ctx).expect("perform"));
        assert!(!tmp.path().join("marker").exists());
        assert!(!log_lines(&rx).iter().any(|l| l.starts_with("Running:")));
    }

    #[test]
    fn existing_directory_skips_clone_without_spawning() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("spin")).expect("mkdir");
        let (ctx, rx) = ctx_in(tmp.path());

        let step = Step::cmd("touch cloned").when(Conditional::dir_exists("spin"));
        assert!(step.perform(&ctx).expect("perform"));
        assert!(!tmp.path().join("cloned").exists());
        let lines = log_lines(&rx);
        assert!(!lines.iter().any(|l| l.starts_with("Running:")), "{lines:?}");
    }

    #[test]
    fn missing_directory_lets_the_step_run() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (ctx, _rx) = ctx_in(tmp.path());
        let step = Step::cmd("touch cloned").when(Conditional::dir_exists("spin"));
        assert!(step.perform(&ctx).expect("perform"));
        assert!(tmp.path().join("cloned").is_file());
    }

    #[test]
    fn may_fail_always_reports_success() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (ctx, _rx) = ctx_in(tmp.path());
        assert!(!Step::cmd("false").perform(&ctx).expect("perform"));
        assert!(Step::cmd("false").may_fail().perform(&ctx).expect("perform"));

        let stamp = Step::new(StepAction::StampVersion(StampVersion::new(
            "no-such-dir/\0bad",
            "1.5",
        )))
        .may_fail();
        assert!(stamp.perform(&ctx).expect("io errors are swallowed too"));
    }

    #[test]
    fn guard_errors_fall_under_may_fail() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (ctx, _rx) = ctx_in(tmp.path());
        let guard = Conditional::output_is("definitely-not-a-real-program-9b2e", None, "master");

        let strict = Step::cmd("touch ran").when(guard.clone());
        assert!(strict.perform(&ctx).is_err());

        let tolerant = Step::cmd("touch ran").when(guard).may_fail();
        assert!(tolerant.perform(&ctx).expect("guard error is swallowed"));
        assert!(!tmp.path().join("ran").exists());
    }

    #[test]
    fn describes_directory_condition_and_flags() {
        let step = Step::cmd("git pull").in_dir("spin").may_fail();
        assert_eq!(step.describe(), "in spin: git pull (may fail)");

        let clone = Step::cmd("git clone https://github.com/SIDN/spin spin")
            .when(Conditional::dir_exists("spin"));
        assert_eq!(
            clone.describe(),
            "IF directory spin does not exist\n\tin current dir: git clone https://github.com/SIDN/spin spin"
        );
    }
}
