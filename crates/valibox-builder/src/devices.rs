use crate::error::{Error, Result};

/// A supported hardware variant and where the firmware build drops its images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    pub name: &'static str,
    pub target: &'static str,
    pub subtarget: &'static str,
    /// Substring that identifies this device in image file names.
    pub image_tag: &'static str,
}

pub const CATALOGUE: [Device; 3] = [
    Device {
        name: "gl-ar150",
        target: "ar71xx",
        subtarget: "generic",
        image_tag: "gl-ar150",
    },
    Device {
        name: "gl-mt300a",
        target: "ramips",
        subtarget: "mt7620",
        image_tag: "gl-mt300a",
    },
    Device {
        name: "gl-6416",
        target: "ar71xx",
        subtarget: "generic",
        image_tag: "gl-inet-6416",
    },
];

pub const ALL: &str = "all";

pub fn find(name: &str) -> Option<&'static Device> {
    CATALOGUE.iter().find(|d| d.name == name.trim())
}

pub fn known_names() -> String {
    CATALOGUE
        .iter()
        .map(|d| d.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Expand a `build.target` selector into the devices to build, in catalogue order.
pub fn resolve_targets(selector: &str) -> Result<Vec<&'static Device>> {
    let selector = selector.trim();
    if selector == ALL {
        return Ok(CATALOGUE.iter().collect());
    }
    find(selector).map(|d| vec![d]).ok_or_else(|| {
        Error::msg(format!(
            "unknown target device '{}' (expected '{}' or one of: {})",
            selector,
            ALL,
            known_names()
        ))
    })
}
