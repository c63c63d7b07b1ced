use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use toml::Value;
use tracing::{debug, info};

use crate::devices;
use crate::error::{Error, Result};
use crate::util::atomic_write_text;
use crate::workspace::WorkspaceConfig;

pub const DEFAULT_CONFIG_FILE: &str = ".valibox_build_config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub workspace: WorkspaceConfig,
    pub checkout: CheckoutConfig,
    pub build: BuildOptions,
    pub release: ReleaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckoutConfig {
    pub lede_url: String,
    pub lede_branch: String,
    pub packages_url: String,
    pub packages_branch: String,
    pub spin_url: String,
    pub spin_branch: String,
    /// Fetch and pull existing checkouts.
    pub update: bool,
    /// Build the package from the local spin checkout instead of its release archive.
    pub local_spin: bool,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            lede_url: "https://github.com/lede-project/source".into(),
            lede_branch: "master".into(),
            packages_url: "https://github.com/SIDN/sidn_openwrt_pkgs".into(),
            packages_branch: "master".into(),
            spin_url: "https://github.com/SIDN/spin".into(),
            spin_branch: "master".into(),
            update: true,
            local_spin: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildOptions {
    pub target: String,
    pub verbose_build: bool,
    pub update_all_feeds: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            target: devices::ALL.into(),
            verbose_build: false,
            update_all_feeds: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReleaseConfig {
    pub create_release: bool,
    pub version_string: String,
    pub changelog_file: String,
    pub target_directory: String,
    pub beta: bool,
    pub file_suffix: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            create_release: false,
            version_string: "1.5".into(),
            changelog_file: "CHANGELOG".into(),
            target_directory: "release".into(),
            beta: false,
            file_suffix: String::new(),
        }
    }
}

impl ReleaseConfig {
    /// Version stamped into images and used to name the release directory.
    pub fn version(&self, now: NaiveDateTime) -> String {
        let mut out = self.version_string.trim().to_string();
        if self.beta {
            out.push_str("-beta-");
            out.push_str(&now.format("%Y%m%d%H%M%S").to_string());
        }
        let suffix = self.file_suffix.trim();
        if !suffix.is_empty() {
            out.push('-');
            out.push_str(suffix);
        }
        out
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        devices::resolve_targets(&self.build.target)?;

        for (key, value) in [
            ("workspace.tools_dir", &self.workspace.tools_dir),
            ("checkout.lede_url", &self.checkout.lede_url),
            ("checkout.lede_branch", &self.checkout.lede_branch),
            ("checkout.packages_url", &self.checkout.packages_url),
            ("checkout.packages_branch", &self.checkout.packages_branch),
            ("checkout.spin_url", &self.checkout.spin_url),
            ("checkout.spin_branch", &self.checkout.spin_branch),
            ("release.version_string", &self.release.version_string),
        ] {
            if value.trim().is_empty() {
                return Err(Error::msg(format!("config key '{key}' must not be empty")));
            }
        }

        if self.release.create_release {
            for (key, value) in [
                ("release.changelog_file", &self.release.changelog_file),
                ("release.target_directory", &self.release.target_directory),
            ] {
                if value.trim().is_empty() {
                    return Err(Error::msg(format!(
                        "config key '{key}' must be set when release.create_release is true"
                    )));
                }
            }
        }

        if self.release.file_suffix.contains('/') || self.release.version_string.contains('/') {
            return Err(Error::msg(
                "release.version_string and release.file_suffix must not contain '/'",
            ));
        }
        Ok(())
    }
}

/// Merged view of the config file over the built-in defaults.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    /// Look up a `section.key` leaf. Unknown pairs are an error, never a silent default.
    pub fn get(&self, path: &str) -> Result<&Value> {
        let Some((section, key)) = split_key(path) else {
            return Err(Error::msg(format!(
                "invalid config key '{}' (expected <section>.<key>)",
                path.trim()
            )));
        };
        let v = self
            .value
            .get(section)
            .and_then(Value::as_table)
            .ok_or_else(|| Error::msg(format!("unknown config section '{section}'")))?
            .get(key)
            .ok_or_else(|| Error::msg(format!("unknown config key '{section}.{key}'")))?;
        if v.is_table() {
            return Err(Error::msg(format!(
                "config key '{section}.{key}' is a table, not a value"
            )));
        }
        Ok(v)
    }

    pub fn get_str(&self, path: &str) -> Result<&str> {
        self.get(path)?
            .as_str()
            .ok_or_else(|| Error::msg(format!("config key '{}' is not a string", path.trim())))
    }

    pub fn get_bool(&self, path: &str) -> Result<bool> {
        self.get(path)?
            .as_bool()
            .ok_or_else(|| Error::msg(format!("config key '{}' is not a boolean", path.trim())))
    }

    /// Set an existing key from its textual form, keeping the key's type.
    pub fn set(&mut self, path: &str, raw: &str) -> Result<()> {
        let new_value = match self.get(path)? {
            Value::Boolean(_) => Value::Boolean(parse_bool(raw).ok_or_else(|| {
                Error::msg(format!(
                    "config key '{}' expects a boolean, got '{}'",
                    path.trim(),
                    raw
                ))
            })?),
            Value::Integer(_) => Value::Integer(raw.trim().parse().map_err(|e| {
                Error::msg(format!(
                    "config key '{}' expects an integer, got '{}': {e}",
                    path.trim(),
                    raw
                ))
            })?),
            _ => Value::String(raw.to_string()),
        };

        let mut candidate = self.value.clone();
        if let Some((section, key)) = split_key(path)
            && let Some(tbl) = candidate.get_mut(section).and_then(Value::as_table_mut)
        {
            tbl.insert(key.to_string(), new_value);
        }
        // Reject values that would make the config unloadable.
        typed_from_value(&candidate)?;
        self.value = candidate;
        Ok(())
    }

    pub fn typed(&self) -> Result<BuildConfig> {
        typed_from_value(&self.value)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(&self.value)?)
    }

    pub fn save(&self) -> Result<()> {
        let body = self.to_toml_string()?;
        atomic_write_text(&self.path, &body).map_err(|e| {
            Error::msg(format!(
                "failed to save config {}: {e}",
                self.path.display()
            ))
        })?;
        info!(path = %self.path.display(), "saved config");
        Ok(())
    }
}

fn split_key(path: &str) -> Option<(&str, &str)> {
    let (section, key) = path.trim().split_once('.')?;
    let (section, key) = (section.trim(), key.trim());
    if section.is_empty() || key.is_empty() || key.contains('.') {
        return None;
    }
    Some((section, key))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn typed_from_value(value: &Value) -> Result<BuildConfig> {
    let cfg: BuildConfig = value
        .clone()
        .try_into()
        .map_err(|e| Error::msg(format!("invalid config: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

fn merge_values(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

pub fn defaults() -> Result<Value> {
    Ok(Value::try_from(BuildConfig::default())?)
}

/// Parse config text and merge it over the defaults.
pub fn from_str(path: &Path, data: &str) -> Result<ConfigDoc> {
    let overlay: Value = toml::from_str(data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;
    let mut value = defaults()?;
    merge_values(&mut value, overlay);
    let doc = ConfigDoc {
        path: path.to_path_buf(),
        value,
    };
    doc.typed()
        .map_err(|e| Error::msg(format!("{} (in {})", e, path.display())))?;
    Ok(doc)
}

/// Load the config at `path`. A missing file yields the defaults.
pub fn load(path: &Path) -> Result<ConfigDoc> {
    if !path.exists() {
        debug!(path = %path.display(), "config file absent; using defaults");
        return Ok(ConfigDoc {
            path: path.to_path_buf(),
            value: defaults()?,
        });
    }
    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let doc = from_str(path, &data)?;
    debug!(path = %path.display(), "loaded config");
    Ok(doc)
}
