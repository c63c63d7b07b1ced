use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const CURSOR_FILE: &str = ".last_step";
pub const RUN_VERSION_FILE: &str = ".last_version";

fn default_tools_dir() -> String {
    "../valibox_build_tools".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Per-device overlays and diffconfigs, addressed as `<tools_dir>/arch/<device>/`.
    #[serde(default = "default_tools_dir")]
    pub tools_dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            tools_dir: default_tools_dir(),
        }
    }
}

/// Absolute locations for one invocation. Steps resolve their directories against `root`.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub cursor_file: PathBuf,
    /// Version string pinned by the run that owns `cursor_file`.
    pub version_file: PathBuf,
}

impl WorkspacePaths {
    pub fn resolve(&self, rel: &Path) -> PathBuf {
        if rel.is_absolute() {
            rel.to_path_buf()
        } else {
            self.root.join(rel)
        }
    }

    pub fn resolve_opt(&self, rel: Option<&Path>) -> PathBuf {
        match rel {
            Some(p) => self.resolve(p),
            None => self.root.clone(),
        }
    }
}

pub fn load_paths(root_dir: &Path) -> Result<WorkspacePaths> {
    let cwd = std::env::current_dir().map_err(|e| Error::msg(format!("cwd error: {e}")))?;
    let root = if root_dir.is_absolute() {
        root_dir.to_path_buf()
    } else {
        cwd.join(root_dir)
    };
    let root = normalize_lexically(&root);
    if !root.is_dir() {
        return Err(Error::msg(format!(
            "workspace root {} is not a directory",
            root.display()
        )));
    }
    Ok(WorkspacePaths {
        cursor_file: root.join(CURSOR_FILE),
        version_file: root.join(RUN_VERSION_FILE),
        root,
    })
}

/// Express `path` (relative to the workspace root) as seen from `from_dir`,
/// another root-relative directory. Absolute paths pass through unchanged.
pub fn relative_from(from_dir: &str, path: &str) -> String {
    if Path::new(path).is_absolute() {
        return path.to_string();
    }
    let depth = Path::new(from_dir)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count();
    let mut out = "../".repeat(depth);
    out.push_str(path.trim_start_matches("./"));
    out
}

// Drops `.` and folds `..` without touching the filesystem.
fn normalize_lexically(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(c);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_from_subdirectory() {
        assert_eq!(
            relative_from("lede-source", "../valibox_build_tools"),
            "../../valibox_build_tools"
        );
        assert_eq!(relative_from("lede-source", "./tools"), "../tools");
        assert_eq!(relative_from("a/b", "tools"), "../../tools");
        assert_eq!(relative_from("lede-source", "/opt/tools"), "/opt/tools");
    }

    #[test]
    fn load_paths_anchors_cursor_in_root() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let ws = load_paths(&tmp.path().join("sub/..")).expect("paths");
        assert_eq!(ws.root, tmp.path());
        assert_eq!(ws.cursor_file, tmp.path().join(CURSOR_FILE));
        assert_eq!(ws.version_file, tmp.path().join(RUN_VERSION_FILE));
        assert_eq!(ws.resolve(Path::new("spin")), tmp.path().join("spin"));
        assert_eq!(ws.resolve_opt(None), tmp.path());

        assert!(load_paths(&tmp.path().join("missing")).is_err());
    }
}
