use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::devices::Device;
use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::util::{copy_file, ensure_dir};

pub const SKIPPED_FILE: &str = "skipped.txt";

/// Collect built images into `<output_dir>/<version>/<device>/` with the changelog beside them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleRelease {
    /// Firmware tree, relative to the workspace root.
    pub firmware_dir: PathBuf,
    pub devices: Vec<Device>,
    pub version: String,
    pub changelog: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub release_dir: PathBuf,
    pub assembled: Vec<String>,
    pub skipped: Vec<String>,
    pub images: Vec<PathBuf>,
}

impl AssembleRelease {
    pub fn assemble(&self, ctx: &ExecCtx) -> Result<ReleaseReport> {
        let changelog = ctx.paths.resolve(&self.changelog);
        if !changelog.is_file() {
            return Err(Error::msg(format!(
                "changelog {} not found",
                changelog.display()
            )));
        }
        let changelog_name = changelog
            .file_name()
            .ok_or_else(|| Error::msg(format!("invalid changelog path {}", changelog.display())))?;

        let firmware = ctx.paths.resolve(&self.firmware_dir);
        let release_dir = ctx.paths.resolve(&self.output_dir).join(&self.version);
        let mut report = ReleaseReport {
            release_dir: release_dir.clone(),
            ..ReleaseReport::default()
        };

        for device in &self.devices {
            let images = find_images(&firmware, device)?;
            if images.is_empty() {
                warn!(device = device.name, "no build artifacts found; skipping");
                ctx.log(&format!(
                    "no images for {} under {}; skipping",
                    device.name,
                    images_dir(&firmware, device).display()
                ));
                report.skipped.push(device.name.to_string());
                continue;
            }

            let dest = release_dir.join(device.name);
            ensure_dir(&dest)?;
            for img in &images {
                let Some(name) = img.file_name() else {
                    continue;
                };
                let out = dest.join(name);
                copy_file(img, &out)?;
                report.images.push(out);
            }
            copy_file(&changelog, &dest.join(changelog_name))?;
            ctx.log(&format!(
                "release {}: {} image(s) -> {}",
                device.name,
                images.len(),
                dest.display()
            ));
            report.assembled.push(device.name.to_string());
        }

        let skipped_path = release_dir.join(SKIPPED_FILE);
        if report.skipped.is_empty() {
            if skipped_path.exists() {
                fs::remove_file(&skipped_path).map_err(|e| {
                    Error::msg(format!("failed to remove {}: {e}", skipped_path.display()))
                })?;
            }
        } else {
            ensure_dir(&release_dir)?;
            let mut body = report.skipped.join("\n");
            body.push('\n');
            fs::write(&skipped_path, body).map_err(|e| {
                Error::msg(format!("failed to write {}: {e}", skipped_path.display()))
            })?;
        }

        info!(
            version = %self.version,
            assembled = report.assembled.len(),
            skipped = report.skipped.len(),
            "assembled release"
        );
        Ok(report)
    }

    /// Succeeds when at least one device made it into the release.
    pub fn perform(&self, ctx: &ExecCtx) -> Result<bool> {
        let report = self.assemble(ctx)?;
        if report.assembled.is_empty() {
            ctx.log("no device produced images; nothing was released");
            return Ok(false);
        }
        if !report.skipped.is_empty() {
            ctx.log(&format!(
                "released without: {} (see {})",
                report.skipped.join(", "),
                report.release_dir.join(SKIPPED_FILE).display()
            ));
        }
        Ok(true)
    }
}

fn images_dir(firmware: &Path, device: &Device) -> PathBuf {
    firmware
        .join("bin")
        .join("targets")
        .join(device.target)
        .join(device.subtarget)
}

pub fn find_images(firmware: &Path, device: &Device) -> Result<Vec<PathBuf>> {
    let dir = images_dir(firmware, device);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(&dir).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.contains(device.image_tag) && name.ends_with(".bin") {
            out.push(entry.path().to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}

impl fmt::Display for AssembleRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.devices.iter().map(|d| d.name).collect::<Vec<_>>();
        write!(
            f,
            "assemble release {} for {} into {} (changelog {})",
            self.version,
            names.join(", "),
            self.output_dir.join(&self.version).display(),
            self.changelog.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::CATALOGUE;
    use crate::executor::test_support::ctx_in;

    fn release_for(devices: &[Device]) -> AssembleRelease {
        AssembleRelease {
            firmware_dir: "lede-source".into(),
            devices: devices.to_vec(),
            version: "1.5".into(),
            changelog: "CHANGELOG".into(),
            output_dir: "release".into(),
        }
    }

    fn write_image(root: &Path, rel: &str) {
        let p = root.join("lede-source/bin/targets").join(rel);
        fs::create_dir_all(p.parent().expect("parent")).expect("mkdir");
        fs::write(p, b"image").expect("write image");
    }

    #[test]
    fn copies_images_and_changelog_and_records_skips() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::write(root.join("CHANGELOG"), "1.5: things\n").expect("changelog");
        write_image(root, "ar71xx/generic/lede-ar71xx-generic-gl-ar150-squashfs-sysupgrade.bin");
        write_image(root, "ar71xx/generic/lede-ar71xx-generic-gl-ar150-initramfs-kernel.elf");
        write_image(root, "ar71xx/generic/sha256sums");

        let (ctx, _rx) = ctx_in(root);
        let step = release_for(&CATALOGUE);
        let report = step.assemble(&ctx).expect("assemble");
        assert_eq!(report.assembled, vec!["gl-ar150"]);
        assert_eq!(report.skipped, vec!["gl-mt300a", "gl-6416"]);

        let out = root.join("release/1.5/gl-ar150");
        assert!(out
            .join("lede-ar71xx-generic-gl-ar150-squashfs-sysupgrade.bin")
            .is_file());
        assert!(!out
            .join("lede-ar71xx-generic-gl-ar150-initramfs-kernel.elf")
            .exists());
        assert_eq!(
            fs::read_to_string(out.join("CHANGELOG")).expect("changelog"),
            "1.5: things\n"
        );
        assert_eq!(
            fs::read_to_string(root.join("release/1.5").join(SKIPPED_FILE)).expect("skipped"),
            "gl-mt300a\ngl-6416\n"
        );
        assert!(step.perform(&ctx).expect("perform"));
    }

    #[test]
    fn nothing_built_fails_without_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("CHANGELOG"), "x\n").expect("changelog");
        let (ctx, _rx) = ctx_in(tmp.path());
        assert!(!release_for(&CATALOGUE).perform(&ctx).expect("perform"));
    }

    #[test]
    fn missing_changelog_is_an_io_failure_before_copying() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_image(
            tmp.path(),
            "ramips/mt7620/lede-ramips-mt7620-gl-mt300a-squashfs-sysupgrade.bin",
        );
        let (ctx, _rx) = ctx_in(tmp.path());
        assert!(release_for(&CATALOGUE[1..2]).perform(&ctx).is_err());
        assert!(!tmp.path().join("release").exists());
    }
}
