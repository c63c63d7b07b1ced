use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::debug;

use crate::config::ReleaseConfig;
use crate::error::{Error, Result};
use crate::util::atomic_write_text;

/// The persisted 1-based index of the next step to run.
#[derive(Debug, Clone)]
pub struct CursorFile {
    path: PathBuf,
}

impl CursorFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<usize>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            Error::msg(format!(
                "failed to read step cursor {}: {e}",
                self.path.display()
            ))
        })?;
        let line = raw.lines().next().unwrap_or_default().trim();
        match line.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(Some(n)),
            _ => Err(Error::msg(format!(
                "step cursor {} is corrupt (expected a positive integer, found '{}'); remove it or run start",
                self.path.display(),
                line
            ))),
        }
    }

    /// Write `index` and sync it to disk before returning.
    pub fn store(&self, index: usize) -> Result<()> {
        let write = || -> std::io::Result<()> {
            let mut f = fs::File::create(&self.path)?;
            writeln!(f, "{index}")?;
            f.flush()?;
            f.sync_all()
        };
        write().map_err(|e| {
            Error::msg(format!(
                "failed to write step cursor {}: {e}",
                self.path.display()
            ))
        })?;
        debug!(cursor = index, path = %self.path.display(), "stored step cursor");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::msg(format!(
                "failed to remove step cursor {}: {e}",
                self.path.display()
            ))),
        }
    }
}

/// The version string a run was started with. Reused while that run's cursor exists,
/// so a resumed beta build stamps and releases under the same timestamp.
#[derive(Debug, Clone)]
pub struct PinnedVersion {
    path: PathBuf,
}

impl PinnedVersion {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            Error::msg(format!(
                "failed to read pinned version {}: {e}",
                self.path.display()
            ))
        })?;
        let version = raw.lines().next().unwrap_or_default().trim();
        if version.is_empty() {
            return Err(Error::msg(format!(
                "pinned version {} is empty; remove it or run start",
                self.path.display()
            )));
        }
        Ok(Some(version.to_string()))
    }

    pub fn store(&self, version: &str) -> Result<()> {
        atomic_write_text(&self.path, &format!("{version}\n"))?;
        debug!(version, path = %self.path.display(), "pinned run version");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::msg(format!(
                "failed to remove pinned version {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMode {
    /// Fresh version, pinned for later resumes.
    Start,
    /// The pinned version while a run is in progress, otherwise a fresh pinned one.
    Resume,
    /// The pinned version while a run is in progress; never writes.
    Inspect,
    /// Fresh version; never writes.
    Preview,
}

pub fn resolve_version(
    release: &ReleaseConfig,
    cursor: &CursorFile,
    pinned: &PinnedVersion,
    mode: VersionMode,
    now: NaiveDateTime,
) -> Result<String> {
    let reuse = matches!(mode, VersionMode::Resume | VersionMode::Inspect);
    if reuse
        && cursor.load()?.is_some()
        && let Some(version) = pinned.load()?
    {
        debug!(%version, "reusing pinned run version");
        return Ok(version);
    }

    let version = release.version(now);
    if matches!(mode, VersionMode::Start | VersionMode::Resume) {
        pinned.store(&version)?;
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_then_stored_then_cleared() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let c = CursorFile::new(tmp.path().join(".last_step"));
        assert_eq!(c.load().expect("load"), None);

        c.store(7).expect("store");
        assert_eq!(fs::read_to_string(c.path()).expect("read"), "7\n");
        assert_eq!(c.load().expect("load"), Some(7));

        c.clear().expect("clear");
        assert!(!c.path().exists());
        c.clear().expect("clearing twice is fine");
    }

    #[test]
    fn corrupt_cursor_is_reported() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let c = CursorFile::new(tmp.path().join(".last_step"));
        for bad in ["0\n", "abc\n", "", "-2"] {
            fs::write(c.path(), bad).expect("write");
            assert!(c.load().is_err(), "'{bad}' should be rejected");
        }
        fs::write(c.path(), " 12 \n").expect("write");
        assert_eq!(c.load().expect("load"), Some(12));
    }

    fn beta() -> ReleaseConfig {
        ReleaseConfig {
            beta: true,
            ..ReleaseConfig::default()
        }
    }

    fn at(h: u32, m: u32, sec: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2026, 10, 19)
            .and_then(|d| d.and_hms_opt(h, m, sec))
            .expect("valid timestamp")
    }

    #[test]
    fn resume_reuses_the_version_pinned_at_start() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cursor = CursorFile::new(tmp.path().join(".last_step"));
        let pinned = PinnedVersion::new(tmp.path().join(".last_version"));

        let first = resolve_version(&beta(), &cursor, &pinned, VersionMode::Start, at(8, 5, 9))
            .expect("start");
        assert_eq!(first, "1.5-beta-20261019080509");
        cursor.store(20).expect("cursor");

        for mode in [VersionMode::Resume, VersionMode::Inspect] {
            let again =
                resolve_version(&beta(), &cursor, &pinned, mode, at(9, 0, 0)).expect("resume");
            assert_eq!(again, first);
        }

        let restarted = resolve_version(&beta(), &cursor, &pinned, VersionMode::Start, at(9, 0, 0))
            .expect("start");
        assert_eq!(restarted, "1.5-beta-20261019090000");
        assert_eq!(pinned.load().expect("load"), Some(restarted));
    }

    #[test]
    fn pinned_version_is_ignored_without_a_cursor() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cursor = CursorFile::new(tmp.path().join(".last_step"));
        let pinned = PinnedVersion::new(tmp.path().join(".last_version"));
        pinned.store("1.5-beta-20200101000000").expect("stale pin");

        let v = resolve_version(&beta(), &cursor, &pinned, VersionMode::Inspect, at(9, 0, 0))
            .expect("inspect");
        assert_eq!(v, "1.5-beta-20261019090000");
        assert_eq!(
            pinned.load().expect("load").as_deref(),
            Some("1.5-beta-20200101000000"),
            "inspect never writes"
        );

        let v = resolve_version(&beta(), &cursor, &pinned, VersionMode::Preview, at(9, 1, 0))
            .expect("preview");
        assert_eq!(v, "1.5-beta-20261019090100");
        pinned.clear().expect("clear");
        assert!(!pinned.path().exists());
    }
}
