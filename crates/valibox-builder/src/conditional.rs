use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;
use crate::executor::ExecCtx;

/// Runtime predicate deciding whether its step is skipped. `evaluate` returning
/// `true` means "skip"; `skip_if_false` inverts the underlying predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conditional {
    DirExists {
        path: PathBuf,
        skip_if_false: bool,
    },
    CommandOutput {
        command: String,
        dir: Option<PathBuf>,
        expected: String,
        skip_if_false: bool,
    },
}

impl Conditional {
    /// Skip when `path` exists.
    pub fn dir_exists(path: impl Into<PathBuf>) -> Self {
        Self::DirExists {
            path: path.into(),
            skip_if_false: false,
        }
    }

    /// Skip when `command` (run in `dir`) prints exactly `expected`.
    pub fn output_is(command: &str, dir: Option<PathBuf>, expected: &str) -> Self {
        Self::CommandOutput {
            command: command.to_string(),
            dir,
            expected: expected.to_string(),
            skip_if_false: false,
        }
    }

    pub fn inverted(self) -> Self {
        match self {
            Self::DirExists {
                path,
                skip_if_false,
            } => Self::DirExists {
                path,
                skip_if_false: !skip_if_false,
            },
            Self::CommandOutput {
                command,
                dir,
                expected,
                skip_if_false,
            } => Self::CommandOutput {
                command,
                dir,
                expected,
                skip_if_false: !skip_if_false,
            },
        }
    }

    pub fn evaluate(&self, ctx: &ExecCtx) -> Result<bool> {
        let (holds, skip_if_false) = match self {
            Self::DirExists {
                path,
                skip_if_false,
            } => (ctx.paths.resolve(path).exists(), *skip_if_false),
            Self::CommandOutput {
                command,
                dir,
                expected,
                skip_if_false,
            } => {
                let output = ctx.capture_cmd(command, dir.as_deref())?;
                (output == *expected, *skip_if_false)
            }
        };
        let skip = if skip_if_false { !holds } else { holds };
        debug!(condition = %self, holds, skip, "evaluated conditional");
        Ok(skip)
    }
}

impl fmt::Display for Conditional {
    // Rendered as the condition under which the step runs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirExists {
                path,
                skip_if_false,
            } => write!(
                f,
                "IF directory {} {}",
                path.display(),
                if *skip_if_false { "exists" } else { "does not exist" }
            ),
            Self::CommandOutput {
                command,
                expected,
                skip_if_false,
                ..
            } => write!(
                f,
                "IF '{}' is {}'{}'",
                command,
                if *skip_if_false { "" } else { "not " },
                expected
            ),
        }
    }
}
