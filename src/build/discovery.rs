//! Wheel discovery in a dist tree
//!
//! Wheels may sit anywhere below the dist directory (flat, or grouped as
//! `<pkg>-<version>/python-<x.y>/`), so discovery walks the whole tree.

use crate::core::state_machine::STATE_DIR;
use crate::core::traits::normalize_package_name;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

lazy_static! {
    /// `{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl`
    static ref WHEEL_FILENAME: Regex = Regex::new(
        r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._]*[A-Za-z0-9])?)-(?P<version>[^-]+)(?:-(?P<build>\d[^-]*))?-(?P<python>[^-]+)-(?P<abi>[^-]+)-(?P<platform>[^-]+)\.whl$"
    )
    .unwrap();
    static ref CPYTHON_TAG: Regex = Regex::new(r"cp(\d)(\d+)").unwrap();
}

/// Components of a conforming wheel filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    pub name: String,
    pub version: String,
    pub build: Option<String>,
    pub python_tag: String,
    pub abi_tag: String,
    pub platform_tag: String,
}

impl WheelFilename {
    /// Parse a file name; `None` when it does not follow the wheel convention
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = WHEEL_FILENAME.captures(file_name)?;
        Some(Self {
            name: caps["name"].to_string(),
            version: caps["version"].to_string(),
            build: caps.name("build").map(|m| m.as_str().to_string()),
            python_tag: caps["python"].to_string(),
            abi_tag: caps["abi"].to_string(),
            platform_tag: caps["platform"].to_string(),
        })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(Self::parse)
    }

    /// Whether the distribution name matches `package_name` after normalization
    pub fn is_for(&self, package_name: &str) -> bool {
        normalize_package_name(&self.name) == normalize_package_name(package_name)
    }
}

/// All `*.whl` files below `dist_dir`, sorted by path
pub fn find_wheels(dist_dir: &Path) -> Vec<PathBuf> {
    let mut wheels: Vec<PathBuf> = WalkDir::new(dist_dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != STATE_DIR)
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "whl"))
        .map(|e| e.into_path())
        .collect();
    wheels.sort();
    wheels
}

/// Python version (`3.12`) encoded in a wheel's CPython tag (`cp312`)
pub fn python_version_for(file_name: &str) -> Option<String> {
    let caps = CPYTHON_TAG.captures(file_name)?;
    Some(format!("{}.{}", &caps[1], &caps[2]))
}

/// Every wheel built for `package_name`, newest (by modification time) first
///
/// A variant built for several Python versions leaves one wheel per
/// CPython tag.
pub fn wheels_for(dist_dir: &Path, package_name: &str) -> Vec<PathBuf> {
    let mut wheels: Vec<(SystemTime, PathBuf)> = find_wheels(dist_dir)
        .into_iter()
        .filter(|p| WheelFilename::from_path(p).is_some_and(|w| w.is_for(package_name)))
        .map(|p| {
            let modified = p
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, p)
        })
        .collect();
    wheels.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    wheels.into_iter().map(|(_, p)| p).collect()
}

/// Newest wheel built for `package_name`
pub fn newest_wheel_for(dist_dir: &Path, package_name: &str) -> Option<PathBuf> {
    wheels_for(dist_dir, package_name).into_iter().next()
}
