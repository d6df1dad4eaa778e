use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

pub mod run;

pub use run::{BuildRequest, RunConfig};

pub const DEFAULT_PRODUCT_PREFIX: &str = "lineage";
pub const DEFAULT_BUILD_TARGET: &str = "bacon";
pub const DEFAULT_MANIFEST_URL: &str = "https://github.com/LineageOS/android.git";
pub const DEFAULT_MANIFEST_BRANCH: &str = "lineage-21.0";

/// Repository key that names the device tree.
pub const DEVICE_TREE_KEY: &str = "device_tree";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Variant {
    User,
    #[default]
    Userdebug,
    Eng,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::User => "user",
            Variant::Userdebug => "userdebug",
            Variant::Eng => "eng",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "user" => Ok(Variant::User),
            "userdebug" => Ok(Variant::Userdebug),
            "eng" => Ok(Variant::Eng),
            other => Err(Error::config(format!(
                "invalid build variant '{other}' (expected one of: user, userdebug, eng)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSettings {
    pub url: String,
    pub branch: String,
}

impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_MANIFEST_URL.into(),
            branch: DEFAULT_MANIFEST_BRANCH.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RepositoryEntry {
    #[serde(skip)]
    pub key: String,
    pub url: Option<String>,
    pub branch: Option<String>,
    pub path: Option<String>,
    pub optional: bool,
}

/// A device descriptor after defaults and command-line overrides were applied.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub source: PathBuf,
    pub codename: String,
    pub full_name: String,
    pub manufacturer: String,
    pub variant: Variant,
    pub product_prefix: String,
    pub build_target: String,
    pub manifest: ManifestSettings,
    /// In file order.
    pub repositories: Vec<RepositoryEntry>,
}

impl DeviceDescriptor {
    pub fn repository(&self, key: &str) -> Option<&RepositoryEntry> {
        self.repositories.iter().find(|r| r.key == key)
    }

    /// `<prefix>_<codename>-<variant>`, the combo handed to `lunch`.
    pub fn lunch_combo(&self) -> String {
        format!("{}_{}-{}", self.product_prefix, self.codename, self.variant)
    }

    pub fn device_tree_path(&self) -> String {
        self.repository(DEVICE_TREE_KEY)
            .and_then(|r| r.path.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("device/{}/{}", self.manufacturer, self.codename))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDescriptor {
    device: Option<RawDevice>,
    build: Option<RawBuild>,
    manifest: Option<RawManifest>,
    repositories: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDevice {
    codename: Option<String>,
    full_name: Option<String>,
    manufacturer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBuild {
    variant: Option<String>,
    product_prefix: Option<String>,
    target: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawManifest {
    url: Option<String>,
    branch: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

// Resolution order: literal path, `<dir>/<ref>.json`, `<dir>/<ref>`.
pub fn resolve_descriptor_path(reference: &str, config_dir: &Path) -> Result<PathBuf> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(Error::config("empty device reference"));
    }

    let literal = PathBuf::from(reference);
    if literal.is_file() {
        return Ok(literal);
    }

    let with_ext = config_dir.join(format!("{reference}.json"));
    if with_ext.is_file() {
        return Ok(with_ext);
    }

    let verbatim = config_dir.join(reference);
    if verbatim.is_file() {
        return Ok(verbatim);
    }

    let available = list_devices(config_dir);
    let known = if available.is_empty() {
        "(none)".to_string()
    } else {
        available.join(", ")
    };
    Err(Error::config(format!(
        "device configuration not found: '{reference}' (config dir: {}; available devices: {known})",
        config_dir.display()
    )))
}

/// Device names in `config_dir`: file names with the extension stripped.
pub fn list_devices(config_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(config_dir) else {
        return Vec::new();
    };
    let mut out = BTreeSet::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if !stem.starts_with('.') {
                out.insert(stem.to_string());
            }
        }
    }
    out.into_iter().collect()
}

pub fn load_device(
    reference: &str,
    config_dir: &Path,
    variant_override: Option<Variant>,
) -> Result<DeviceDescriptor> {
    let path = resolve_descriptor_path(reference, config_dir)?;
    load(&path, variant_override)
}

pub fn load(path: &Path, variant_override: Option<Variant>) -> Result<DeviceDescriptor> {
    let data = fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "failed to read device config {}: {e}",
            path.display()
        ))
    })?;
    parse(path, &data, variant_override)
}

pub fn parse(path: &Path, data: &str, variant_override: Option<Variant>) -> Result<DeviceDescriptor> {
    let raw: RawDescriptor = serde_json::from_str(data)
        .map_err(|e| Error::config(format!("JSON parse error in {}: {e}", path.display())))?;

    let device = raw.device.ok_or_else(|| {
        Error::config(format!("{}: missing 'device' object", path.display()))
    })?;
    let codename = non_empty(device.codename).ok_or_else(|| {
        Error::config(format!("{}: 'device.codename' is required", path.display()))
    })?;
    if codename.contains('/') || codename.contains('\\') {
        return Err(Error::config(format!(
            "{}: invalid codename '{codename}'",
            path.display()
        )));
    }

    let build = raw.build.unwrap_or_default();
    // An explicit override wins and the descriptor's value is not even validated.
    let variant = match variant_override {
        Some(v) => v,
        None => match non_empty(build.variant) {
            Some(s) => s
                .parse::<Variant>()
                .map_err(|e| e.context(format!("{}: build.variant", path.display())))?,
            None => Variant::default(),
        },
    };

    let manifest = raw.manifest.unwrap_or_default();
    let defaults = ManifestSettings::default();
    let manifest = ManifestSettings {
        url: non_empty(manifest.url).unwrap_or(defaults.url),
        branch: non_empty(manifest.branch).unwrap_or(defaults.branch),
    };

    let raw_repos = raw.repositories.unwrap_or_default();
    let mut repositories = Vec::with_capacity(raw_repos.len());
    for (key, value) in raw_repos {
        let mut entry: RepositoryEntry = serde_json::from_value(value).map_err(|e| {
            Error::config(format!(
                "{}: invalid repositories.{key}: {e}",
                path.display()
            ))
        })?;
        entry.key = key;
        repositories.push(entry);
    }

    Ok(DeviceDescriptor {
        source: path.to_path_buf(),
        full_name: non_empty(device.full_name).unwrap_or_else(|| codename.clone()),
        manufacturer: non_empty(device.manufacturer).unwrap_or_else(|| "unknown".into()),
        codename,
        variant,
        product_prefix: non_empty(build.product_prefix)
            .unwrap_or_else(|| DEFAULT_PRODUCT_PREFIX.into()),
        build_target: non_empty(build.target).unwrap_or_else(|| DEFAULT_BUILD_TARGET.into()),
        manifest,
        repositories,
    })
}
