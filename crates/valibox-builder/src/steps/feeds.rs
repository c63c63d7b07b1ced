use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::util::atomic_write_text;

/// Regenerate the active feeds file from its template plus one `src-link` feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteFeeds {
    pub template: PathBuf,
    pub output: PathBuf,
    pub feed_name: String,
    /// Feed checkout, relative to the workspace root.
    pub feed_path: PathBuf,
}

impl RewriteFeeds {
    pub fn new(feed_name: impl Into<String>, feed_path: impl Into<PathBuf>) -> Self {
        Self {
            template: "feeds.conf.default".into(),
            output: "feeds.conf".into(),
            feed_name: feed_name.into(),
            feed_path: feed_path.into(),
        }
    }

    pub fn feed_line(&self, feed_abs: &Path) -> String {
        format!("src-link {} {}", self.feed_name, feed_abs.display())
    }

    pub fn perform(&self, ctx: &ExecCtx, dir: &Path) -> Result<bool> {
        let template = dir.join(&self.template);
        let output = dir.join(&self.output);
        let mut body = fs::read_to_string(&template).map_err(|e| {
            Error::msg(format!(
                "failed to read feeds template {}: {e}",
                template.display()
            ))
        })?;
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        let line = self.feed_line(&ctx.paths.resolve(&self.feed_path));
        body.push_str(&line);
        body.push('\n');

        atomic_write_text(&output, &body)?;
        ctx.log(&format!("wrote {} with '{line}'", output.display()));
        Ok(true)
    }
}

impl fmt::Display for RewriteFeeds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "copy {} to {} and add 'src-link {} {}'",
            self.template.display(),
            self.output.display(),
            self.feed_name,
            self.feed_path.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::ctx_in;

    #[test]
    fn copies_template_and_appends_feed_with_absolute_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let lede = tmp.path().join("lede-source");
        fs::create_dir_all(&lede).expect("mkdir");
        fs::write(
            lede.join("feeds.conf.default"),
            "src-git packages https://git.example/packages.git\nsrc-git luci https://git.example/luci.git",
        )
        .expect("write template");
        // A stale active file is replaced, not appended to.
        fs::write(lede.join("feeds.conf"), "garbage\n").expect("write stale");

        let (ctx, _rx) = ctx_in(tmp.path());
        let step = RewriteFeeds::new("sidn", "sidn_openwrt_pkgs");
        assert!(step.perform(&ctx, &lede).expect("rewrite"));

        let got = fs::read_to_string(lede.join("feeds.conf")).expect("read");
        assert_eq!(
            got,
            format!(
                "src-git packages https://git.example/packages.git\nsrc-git luci https://git.example/luci.git\nsrc-link sidn {}\n",
                tmp.path().join("sidn_openwrt_pkgs").display()
            )
        );
    }

    #[test]
    fn missing_template_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (ctx, _rx) = ctx_in(tmp.path());
        let step = RewriteFeeds::new("sidn", "sidn_openwrt_pkgs");
        let err = step.perform(&ctx, tmp.path()).unwrap_err().to_string();
        assert!(err.contains("feeds.conf.default"), "unexpected err: {err}");
        assert!(!tmp.path().join("feeds.conf").exists());
    }
}
