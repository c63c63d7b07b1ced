use std::path::PathBuf;

use serde::Serialize;

use crate::config::BuildConfig;
use crate::conditional::Conditional;
use crate::devices;
use crate::error::Result;
use crate::steps::version::VERSION_FILE;
use crate::steps::{
    AssembleRelease, RewriteFeeds, RewritePackageManifest, StampVersion, Step, StepAction,
};
use crate::workspace::relative_from;

pub const FIRMWARE_DIR: &str = "lede-source";
pub const PACKAGES_DIR: &str = "sidn_openwrt_pkgs";
pub const SPIN_DIR: &str = "spin";
pub const FEED_NAME: &str = "sidn";
pub const LOCAL_SPIN_ARCHIVE: &str = "spin-local.tar.gz";

/// The ordered step list. Indices exposed to callers are 1-based.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepListing {
    pub index: usize,
    pub dir: Option<String>,
    pub description: String,
    pub may_fail: bool,
    pub disabled: bool,
    pub condition: Option<String>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        index.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    pub fn listing(&self) -> Vec<StepListing> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, s)| StepListing {
                index: i + 1,
                dir: s.dir.as_ref().map(|d| d.display().to_string()),
                description: s.describe(),
                may_fail: s.may_fail,
                disabled: s.skip,
                condition: s.conditional.as_ref().map(|c| c.to_string()),
            })
            .collect()
    }

    /// One `N:\t<description>` entry per step.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("{}:\t{}\n", i + 1, step.describe()));
        }
        out
    }
}

fn checkout_steps(steps: &mut Vec<Step>, url: &str, dir: &str, branch: &str, update: bool) {
    steps.push(Step::cmd(format!("git clone {url} {dir}")).when(Conditional::dir_exists(dir)));
    steps.push(Step::cmd("git fetch").in_dir(dir).skip_if(!update));
    steps.push(
        Step::cmd(format!("git checkout {branch}"))
            .in_dir(dir)
            .when(Conditional::output_is(
                "git rev-parse --abbrev-ref HEAD",
                Some(PathBuf::from(dir)),
                branch,
            )),
    );
    steps.push(
        Step::cmd("git pull")
            .in_dir(dir)
            .may_fail()
            .skip_if(!update),
    );
}

fn feed_steps(steps: &mut Vec<Step>, update_all: bool) {
    if update_all {
        steps.push(Step::cmd("./scripts/feeds update -a").in_dir(FIRMWARE_DIR));
        steps.push(Step::cmd("./scripts/feeds install -a").in_dir(FIRMWARE_DIR));
        return;
    }
    // The full update only runs once, on a fresh checkout; later builds refresh the sidn feed alone.
    steps.push(
        Step::cmd("./scripts/feeds update -a")
            .in_dir(FIRMWARE_DIR)
            .when(Conditional::dir_exists(format!("{FIRMWARE_DIR}/feeds"))),
    );
    steps.push(
        Step::cmd("./scripts/feeds install -a")
            .in_dir(FIRMWARE_DIR)
            .when(Conditional::dir_exists(format!("{FIRMWARE_DIR}/package/feeds"))),
    );
    steps.push(Step::cmd(format!("./scripts/feeds update {FEED_NAME}")).in_dir(FIRMWARE_DIR));
    steps.push(
        Step::cmd(format!("./scripts/feeds install -a -p {FEED_NAME}")).in_dir(FIRMWARE_DIR),
    );
}

/// Turn a validated configuration into the ordered step list. Performs no I/O.
pub fn build_steps(cfg: &BuildConfig, version: &str) -> Result<Plan> {
    let targets = devices::resolve_targets(&cfg.build.target)?;
    let co = &cfg.checkout;
    let mut steps = Vec::new();

    for (url, dir, branch) in [
        (&co.lede_url, FIRMWARE_DIR, &co.lede_branch),
        (&co.packages_url, PACKAGES_DIR, &co.packages_branch),
        (&co.spin_url, SPIN_DIR, &co.spin_branch),
    ] {
        checkout_steps(&mut steps, url, dir, branch, co.update);
    }

    if co.local_spin {
        steps.push(
            Step::cmd(format!(
                "git archive --format=tar.gz --prefix=spin/ -o ../{LOCAL_SPIN_ARCHIVE} HEAD"
            ))
            .in_dir(SPIN_DIR),
        );
        steps.push(
            Step::new(StepAction::RewritePackageManifest(RewritePackageManifest::new(
                "spin/Makefile",
                LOCAL_SPIN_ARCHIVE,
            )))
            .in_dir(PACKAGES_DIR),
        );
    }

    steps.push(
        Step::new(StepAction::RewriteFeeds(RewriteFeeds::new(FEED_NAME, PACKAGES_DIR)))
            .in_dir(FIRMWARE_DIR),
    );
    feed_steps(&mut steps, cfg.build.update_all_feeds);

    let tools = relative_from(FIRMWARE_DIR, &cfg.workspace.tools_dir);
    let make = if cfg.build.verbose_build {
        "make -j1 V=s"
    } else {
        "make"
    };
    for device in &targets {
        let arch = format!("{tools}/arch/{}", device.name);
        steps.push(Step::cmd("rm -rf files").in_dir(FIRMWARE_DIR));
        steps.push(Step::cmd(format!("cp -r {arch}/files files")).in_dir(FIRMWARE_DIR));
        steps.push(
            Step::new(StepAction::StampVersion(StampVersion::new(VERSION_FILE, version)))
                .in_dir(FIRMWARE_DIR),
        );
        steps.push(Step::cmd(format!("cp {arch}/diffconfig .config")).in_dir(FIRMWARE_DIR));
        steps.push(Step::cmd("make defconfig").in_dir(FIRMWARE_DIR));
        steps.push(Step::cmd(make).in_dir(FIRMWARE_DIR));
    }

    if cfg.release.create_release {
        steps.push(Step::new(StepAction::AssembleRelease(AssembleRelease {
            firmware_dir: FIRMWARE_DIR.into(),
            devices: targets.iter().map(|d| **d).collect(),
            version: version.to_string(),
            changelog: cfg.release.changelog_file.clone().into(),
            output_dir: cfg.release.target_directory.clone().into(),
        })));
    }

    Ok(Plan::new(steps))
}
