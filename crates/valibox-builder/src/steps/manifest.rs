use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::util::{atomic_write_text, sha256_file_hex};

static SOURCE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*PKG_SOURCE_URL\s*[:?+]?=").expect("valid regex"));
static HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*PKG_HASH\s*[:?+]?=").expect("valid regex"));

/// Point a package Makefile at a local source archive and pin its checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewritePackageManifest {
    /// Relative to the step directory.
    pub manifest: PathBuf,
    /// Relative to the workspace root.
    pub archive: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRewrite {
    pub body: String,
    pub source_lines: usize,
    pub hash_lines: usize,
}

impl RewritePackageManifest {
    pub fn new(manifest: impl Into<PathBuf>, archive: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            archive: archive.into(),
        }
    }

    pub fn perform(&self, ctx: &ExecCtx, dir: &Path) -> Result<bool> {
        let archive = ctx.paths.resolve(&self.archive);
        let manifest = dir.join(&self.manifest);

        // Checksum first: a missing archive must leave the manifest untouched.
        let hash = sha256_file_hex(&archive).map_err(|e| {
            Error::msg(format!(
                "cannot checksum source archive {}: {e}",
                archive.display()
            ))
        })?;
        let raw = fs::read_to_string(&manifest).map_err(|e| {
            Error::msg(format!(
                "failed to read package manifest {}: {e}",
                manifest.display()
            ))
        })?;

        let rewrite = rewrite_manifest(&raw, &archive, &hash);
        if rewrite.source_lines == 0 || rewrite.hash_lines == 0 {
            warn!(
                manifest = %manifest.display(),
                source_lines = rewrite.source_lines,
                hash_lines = rewrite.hash_lines,
                "package manifest is missing PKG_SOURCE_URL or PKG_HASH"
            );
        }
        atomic_write_text(&manifest, &rewrite.body)?;
        ctx.log(&format!(
            "{} now uses {} (sha256 {hash})",
            manifest.display(),
            archive.display()
        ));
        Ok(true)
    }
}

/// Replace the source URL and hash assignments; every other line is kept byte-for-byte.
pub fn rewrite_manifest(raw: &str, archive_abs: &Path, hash: &str) -> ManifestRewrite {
    let mut out = ManifestRewrite {
        body: String::with_capacity(raw.len() + 64),
        ..ManifestRewrite::default()
    };
    for line in raw.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        let terminator = &line[content.len()..];
        if SOURCE_URL_RE.is_match(content) {
            out.body
                .push_str(&format!("PKG_SOURCE_URL:=file://{}", archive_abs.display()));
            out.body.push_str(if terminator.is_empty() { "\n" } else { terminator });
            out.source_lines += 1;
        } else if HASH_RE.is_match(content) {
            out.body.push_str(&format!("PKG_HASH:={hash}"));
            out.body.push_str(if terminator.is_empty() { "\n" } else { terminator });
            out.hash_lines += 1;
        } else {
            out.body.push_str(line);
        }
    }
    out
}

impl fmt::Display for RewritePackageManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "update package manifest {} to use {} as the source",
            self.manifest.display(),
            self.archive.display()
        )
    }
}
