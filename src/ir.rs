//! Parsed installer description and build configuration types.
//!
//! These are the structures the (external) parser hands to the builders:
//! a feature tree, top-level items, an optional bundle descriptor, a flat
//! requirement list, and the resolved build configuration. They derive
//! `Deserialize` so descriptions and configs can be loaded from TOML.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Target processor architecture for packages and prerequisites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X86,
    X64,
    Arm64,
}

impl Arch {
    /// All architectures, in emission order.
    pub const ALL: [Arch; 3] = [Arch::X86, Arch::X64, Arch::Arm64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete parsed installer description.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallerDescription {
    /// Items outside any feature; installed unconditionally.
    #[serde(default)]
    pub items: Vec<Item>,
    /// Optional feature tree. Order is significant: feature identity is
    /// positional, so reordering features changes their identifiers.
    #[serde(default)]
    pub features: Vec<Feature>,
    /// Runtime prerequisites, in install order.
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// Present when the product ships as a multi-package bundle.
    #[serde(default)]
    pub bundle: Option<Bundle>,
}

impl InstallerDescription {
    /// Parse a description from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing installer description")
    }
}

/// One selectable unit of installed functionality.
///
/// Features form a tree; duplicate display names are allowed because
/// identity is the position in the tree, not the name.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Feature {
    pub name: String,
    /// Installed by default when true.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the user may deselect the feature entirely.
    #[serde(default)]
    pub allow_absent: bool,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub features: Vec<Feature>,
}

fn default_true() -> bool {
    true
}

/// A single declaration inside a feature (or at top level).
///
/// Closed set: each variant owns its payload and plays exactly one role.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Item {
    /// Copy a file or a directory tree to a target path.
    Files(FileSet),
    /// Set a machine-level environment variable.
    EnvVar(EnvVar),
    /// Install a Windows service.
    Service(Service),
    /// Place a shortcut on the desktop or in the start menu.
    Shortcut(Shortcut),
    /// Run a command at a fixed point of the install sequence.
    CustomAction(CustomActionDecl),
    /// Exclude a source path from every file-set walk.
    Exclude { path: String },
    /// Write a registry value.
    Registry(RegistryValue),
}

/// Source file or directory plus its install target spec.
///
/// The target is either a bracketed root reference (`[INSTALLFOLDER]bin`),
/// a bare well-known root name, or a plain path anchored under the
/// primary install root.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSet {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Service {
    pub name: String,
    /// Target-spec path of the service executable.
    pub executable: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Start automatically at boot; manual start otherwise.
    #[serde(default)]
    pub auto_start: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Shortcut {
    pub name: String,
    /// Target-spec path of the file the shortcut points at.
    pub target: String,
    /// Where the shortcut lives: `desktop` or `start-menu`.
    pub location: String,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomActionDecl {
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// One of the five timing buckets; validated during item processing.
    pub timing: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryValue {
    /// Registry hive: `HKLM` or `HKCU`.
    pub root: String,
    pub key: String,
    /// Value name; the key's default value when absent.
    #[serde(default)]
    pub name: Option<String>,
    pub value: String,
}

/// A third-party runtime dependency of the product.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Requirement {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    /// Local file overriding the catalog download. When set, the
    /// requirement never touches the cache.
    #[serde(default)]
    pub source: Option<String>,
}

/// Multi-package bundle descriptor: prerequisites, extra exe packages,
/// and one-to-three product package sources.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bundle {
    #[serde(default)]
    pub prerequisites: Vec<Requirement>,
    #[serde(default)]
    pub exe_packages: Vec<ExePackage>,
    /// Platform-neutral product package; mutually exclusive in practice
    /// with the per-architecture sources below.
    #[serde(default)]
    pub msi: Option<String>,
    #[serde(default)]
    pub msi_x86: Option<String>,
    #[serde(default)]
    pub msi_x64: Option<String>,
    #[serde(default)]
    pub msi_arm64: Option<String>,
}

/// A caller-supplied exe package installed between prerequisites and the
/// product package.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExePackage {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub install_args: Option<String>,
    #[serde(default)]
    pub detect_condition: Option<String>,
}

/// Resolved build configuration, as handed over by the front end.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub product_name: String,
    pub version: String,
    pub manufacturer: String,
    #[serde(default = "default_platform")]
    pub platform: Arch,
    /// Restrict install-directory ACLs to administrators.
    #[serde(default)]
    pub harden_permissions: bool,
    /// Append the install folder to the system PATH.
    #[serde(default)]
    pub add_to_path: bool,
    /// Apply the hardened ACLs to registry-derived components too.
    #[serde(default)]
    pub registry_permissions: bool,
    /// Overrides the conventional `prereqs/` folder next to the
    /// description when chain sources fall back to local files.
    #[serde(default)]
    pub prereq_dir: Option<PathBuf>,
}

fn default_platform() -> Arch {
    Arch::X64
}

impl BuildConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading build config '{}'", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("parsing build config '{}'", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_parses_from_toml() {
        let desc = InstallerDescription::from_toml_str(
            r#"
            [[items]]
            kind = "files"
            source = "bin/app.exe"
            target = "[INSTALLFOLDER]bin"

            [[features]]
            name = "Docs"
            allow_absent = true

            [[features.items]]
            kind = "files"
            source = "docs"
            target = "docs"

            [[requirements]]
            type = "dotnet-runtime"
            version = "8.0"
            "#,
        )
        .unwrap();

        assert_eq!(desc.items.len(), 1);
        assert_eq!(desc.features.len(), 1);
        assert!(desc.features[0].enabled);
        assert!(desc.features[0].allow_absent);
        assert_eq!(desc.requirements[0].kind, "dotnet-runtime");
        assert!(desc.bundle.is_none());
    }

    #[test]
    fn unknown_item_field_is_rejected() {
        let err = InstallerDescription::from_toml_str(
            r#"
            [[items]]
            kind = "files"
            source = "a"
            target = "b"
            bogus = true
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn bundle_sources_parse() {
        let desc = InstallerDescription::from_toml_str(
            r#"
            [bundle]
            msi_x64 = "out/app-x64.msi"
            msi_arm64 = "out/app-arm64.msi"

            [[bundle.prerequisites]]
            type = "vcredist"
            version = "2022"
            "#,
        )
        .unwrap();

        let bundle = desc.bundle.unwrap();
        assert!(bundle.msi.is_none());
        assert_eq!(bundle.msi_x64.as_deref(), Some("out/app-x64.msi"));
        assert_eq!(bundle.prerequisites.len(), 1);
    }
}
