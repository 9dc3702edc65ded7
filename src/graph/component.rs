//! Components, installed files, and deterministic identifiers.
//!
//! A component is the smallest atomic install/uninstall unit. It carries
//! exactly one payload and a GUID the target format uses to recognize the
//! same installable unit across product versions, so the GUID must be a
//! pure function of the component's logical source path, never random.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Sequential identifier generator, one counter per prefix.
///
/// Identifiers are handed out in walk order, which is deterministic, so
/// repeated builds over unchanged input produce identical identifiers.
/// Each build uses a fresh generator; no counter survives across builds.
#[derive(Debug, Default)]
pub struct IdGen {
    counters: BTreeMap<&'static str, usize>,
}

impl IdGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next identifier for the given prefix: `cmp1`, `cmp2`, `dir1`, ...
    pub fn next(&mut self, prefix: &'static str) -> String {
        let counter = self.counters.entry(prefix).or_insert(0);
        *counter += 1;
        format!("{}{}", prefix, counter)
    }
}

/// Derive a stable GUID from a canonical source string.
///
/// SHA-256 over the input, first 16 digest bytes formatted into GUID
/// grammar. Stable across runs for the same input; distinct inputs give
/// distinct values with overwhelming probability.
pub fn stable_guid(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex: String = digest[..16].iter().map(|b| format!("{:02X}", b)).collect();
    format!(
        "{{{}-{}-{}-{}-{}}}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Synthesize a legacy 8.3 short name for the `ordinal`-th file (2nd or
/// later) targeting one (directory, name) slot.
///
/// The extension is truncated to three characters and upper-cased. The
/// base keeps letters, digits and underscores, upper-cased, truncated so
/// `base + "_" + ordinal` fits in eight characters. A base emptied by
/// truncation falls back to a fixed placeholder.
pub fn short_name(long: &str, ordinal: usize) -> String {
    let (stem, ext) = match long.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (long, None),
    };

    let suffix = format!("_{}", ordinal);
    let mut base: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    base.truncate(8usize.saturating_sub(suffix.len()));
    if base.is_empty() {
        base.push_str("FILE");
    }

    let short_ext: String = ext
        .unwrap_or("")
        .chars()
        .take(3)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if short_ext.is_empty() {
        format!("{}{}", base, suffix)
    } else {
        format!("{}{}.{}", base, suffix, short_ext)
    }
}

/// The atomic install/uninstall unit.
#[derive(Debug, Clone)]
pub struct Component {
    pub id: String,
    /// Deterministic install GUID, `{XXXXXXXX-...}` form.
    pub guid: String,
    pub payload: Payload,
    /// Features referencing this component. Empty means the component
    /// belongs to the synthetic always-installed root feature. Synthetic
    /// per-directory components may be shared by several features.
    pub features: Vec<String>,
}

/// Exactly one payload per component; kinds never mix.
#[derive(Debug, Clone)]
pub enum Payload {
    File(InstallFile),
    EnvVar(EnvEntry),
    Service(ServiceInstall),
    /// Marker for a directory created (and optionally ACL-hardened)
    /// without any file content.
    EmptyFolder { hardened: bool },
}

/// A file carried by a component.
#[derive(Debug, Clone)]
pub struct InstallFile {
    pub id: String,
    /// Target file name as displayed.
    pub name: String,
    /// Present only for the 2nd+ file targeting the same directory+name.
    pub short_name: Option<String>,
    /// Absolute source path on the build machine.
    pub source: PathBuf,
    /// Exactly one key path per component; files are their component's
    /// key path.
    pub key_path: bool,
}

/// A machine-level environment variable set at install time.
#[derive(Debug, Clone)]
pub struct EnvEntry {
    pub id: String,
    pub name: String,
    pub value: String,
    /// Append to the existing value instead of replacing it (PATH).
    pub append: bool,
}

/// A Windows service installed and controlled by the package.
#[derive(Debug, Clone)]
pub struct ServiceInstall {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    /// Formatted target path of the service executable.
    pub executable: String,
    pub auto_start: bool,
}
