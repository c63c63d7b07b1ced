use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::executor::ExecCtx;
use crate::util::atomic_write_text;

/// Overlay file read by the firmware at runtime to report its version.
pub const VERSION_FILE: &str = "files/etc/valibox.version";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampVersion {
    /// Relative to the step directory.
    pub file: PathBuf,
    pub version: String,
}

impl StampVersion {
    pub fn new(file: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            version: version.into(),
        }
    }

    pub fn perform(&self, ctx: &ExecCtx, dir: &Path) -> Result<bool> {
        let path = dir.join(&self.file);
        atomic_write_text(&path, &format!("{}\n", self.version))?;
        ctx.log(&format!("stamped version {} into {}", self.version, path.display()));
        Ok(true)
    }
}

impl fmt::Display for StampVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write version '{}' to {}", self.version, self.file.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::ctx_in;

    #[test]
    fn writes_version_creating_overlay_dirs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (ctx, _rx) = ctx_in(tmp.path());
        let lede = tmp.path().join("lede-source");
        let step = StampVersion::new(VERSION_FILE, "1.5-beta-20261019080509");
        assert!(step.perform(&ctx, &lede).expect("stamp"));
        assert_eq!(
            std::fs::read_to_string(lede.join(VERSION_FILE)).expect("read"),
            "1.5-beta-20261019080509\n"
        );
    }
}
