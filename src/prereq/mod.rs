//! Static catalog of known runtime prerequisites.
//!
//! Maps (type, version) to download descriptors, detection rules and
//! silent-install arguments. Architecture-bearing entries carry one
//! download per architecture; architecture-neutral entries carry a
//! single download with no architecture tag.

pub mod cache;

use anyhow::{bail, Result};

use crate::ir::Arch;

/// One (type, version) entry of the catalog.
#[derive(Debug)]
pub struct PrereqSpec {
    pub kind: &'static str,
    pub version: &'static str,
    pub display_name: &'static str,
    /// Silent-install arguments passed to the package at chain time.
    pub install_args: &'static str,
    pub downloads: &'static [PrereqDownload],
}

/// A concrete downloadable payload for one architecture (or neutral).
#[derive(Debug)]
pub struct PrereqDownload {
    /// `None` marks an architecture-neutral payload.
    pub arch: Option<Arch>,
    pub url: &'static str,
    pub file_name: &'static str,
    /// Integrity hash, lowercase hex. Evergreen links have none.
    pub sha256: Option<&'static str>,
    /// Condition the bootstrapper evaluates to skip an already
    /// installed prerequisite.
    pub detect_condition: Option<&'static str>,
}

pub const CATALOG: &[PrereqSpec] = &[
    PrereqSpec {
        kind: "dotnet-runtime",
        version: "6.0",
        display_name: ".NET Runtime 6.0",
        install_args: "/install /quiet /norestart",
        downloads: &[
            PrereqDownload {
                arch: Some(Arch::X86),
                url: "https://aka.ms/dotnet/6.0/dotnet-runtime-win-x86.exe",
                file_name: "dotnet-runtime-6.0-win-x86.exe",
                sha256: None,
                detect_condition: Some("DOTNET_RUNTIME_6_X86_INSTALLED"),
            },
            PrereqDownload {
                arch: Some(Arch::X64),
                url: "https://aka.ms/dotnet/6.0/dotnet-runtime-win-x64.exe",
                file_name: "dotnet-runtime-6.0-win-x64.exe",
                sha256: None,
                detect_condition: Some("DOTNET_RUNTIME_6_X64_INSTALLED"),
            },
        ],
    },
    PrereqSpec {
        kind: "dotnet-runtime",
        version: "8.0",
        display_name: ".NET Runtime 8.0",
        install_args: "/install /quiet /norestart",
        downloads: &[
            PrereqDownload {
                arch: Some(Arch::X86),
                url: "https://aka.ms/dotnet/8.0/dotnet-runtime-win-x86.exe",
                file_name: "dotnet-runtime-8.0-win-x86.exe",
                sha256: None,
                detect_condition: Some("DOTNET_RUNTIME_8_X86_INSTALLED"),
            },
            PrereqDownload {
                arch: Some(Arch::X64),
                url: "https://aka.ms/dotnet/8.0/dotnet-runtime-win-x64.exe",
                file_name: "dotnet-runtime-8.0-win-x64.exe",
                sha256: None,
                detect_condition: Some("DOTNET_RUNTIME_8_X64_INSTALLED"),
            },
            PrereqDownload {
                arch: Some(Arch::Arm64),
                url: "https://aka.ms/dotnet/8.0/dotnet-runtime-win-arm64.exe",
                file_name: "dotnet-runtime-8.0-win-arm64.exe",
                sha256: None,
                detect_condition: Some("DOTNET_RUNTIME_8_ARM64_INSTALLED"),
            },
        ],
    },
    PrereqSpec {
        kind: "dotnet-desktop",
        version: "8.0",
        display_name: ".NET Desktop Runtime 8.0",
        install_args: "/install /quiet /norestart",
        downloads: &[
            PrereqDownload {
                arch: Some(Arch::X86),
                url: "https://aka.ms/dotnet/8.0/windowsdesktop-runtime-win-x86.exe",
                file_name: "windowsdesktop-runtime-8.0-win-x86.exe",
                sha256: None,
                detect_condition: Some("DOTNET_DESKTOP_8_X86_INSTALLED"),
            },
            PrereqDownload {
                arch: Some(Arch::X64),
                url: "https://aka.ms/dotnet/8.0/windowsdesktop-runtime-win-x64.exe",
                file_name: "windowsdesktop-runtime-8.0-win-x64.exe",
                sha256: None,
                detect_condition: Some("DOTNET_DESKTOP_8_X64_INSTALLED"),
            },
            PrereqDownload {
                arch: Some(Arch::Arm64),
                url: "https://aka.ms/dotnet/8.0/windowsdesktop-runtime-win-arm64.exe",
                file_name: "windowsdesktop-runtime-8.0-win-arm64.exe",
                sha256: None,
                detect_condition: Some("DOTNET_DESKTOP_8_ARM64_INSTALLED"),
            },
        ],
    },
    PrereqSpec {
        kind: "vcredist",
        version: "2022",
        display_name: "Microsoft Visual C++ 2015-2022 Redistributable",
        install_args: "/install /quiet /norestart",
        downloads: &[
            PrereqDownload {
                arch: Some(Arch::X86),
                url: "https://aka.ms/vs/17/release/vc_redist.x86.exe",
                file_name: "vc_redist.2022.x86.exe",
                sha256: None,
                detect_condition: Some("VCRT14_X86_INSTALLED"),
            },
            PrereqDownload {
                arch: Some(Arch::X64),
                url: "https://aka.ms/vs/17/release/vc_redist.x64.exe",
                file_name: "vc_redist.2022.x64.exe",
                sha256: None,
                detect_condition: Some("VCRT14_X64_INSTALLED"),
            },
            PrereqDownload {
                arch: Some(Arch::Arm64),
                url: "https://aka.ms/vs/17/release/vc_redist.arm64.exe",
                file_name: "vc_redist.2022.arm64.exe",
                sha256: None,
                detect_condition: Some("VCRT14_ARM64_INSTALLED"),
            },
        ],
    },
    PrereqSpec {
        kind: "dotnetfx",
        version: "4.8",
        display_name: "Microsoft .NET Framework 4.8",
        install_args: "/q /norestart",
        downloads: &[PrereqDownload {
            arch: None,
            url: "https://go.microsoft.com/fwlink/?linkid=2088631",
            file_name: "ndp48-x86-x64-allos-enu.exe",
            sha256: Some("68c9986a8dcc0214d909aa1f31bee9fb5461bb839edca996a75b08ddffc1483f"),
            detect_condition: Some("NETFRAMEWORK48_INSTALLED"),
        }],
    },
    PrereqSpec {
        kind: "webview2",
        version: "evergreen",
        display_name: "Microsoft Edge WebView2 Runtime",
        install_args: "/silent /install",
        downloads: &[PrereqDownload {
            arch: None,
            url: "https://go.microsoft.com/fwlink/p/?LinkId=2124703",
            file_name: "MicrosoftEdgeWebview2Setup.exe",
            sha256: None,
            detect_condition: Some("WEBVIEW2_INSTALLED"),
        }],
    },
];

impl PrereqSpec {
    /// Download descriptor for an architecture, falling back to an
    /// architecture-neutral payload if the entry carries one.
    pub fn download_for(&self, arch: Option<Arch>) -> Option<&'static PrereqDownload> {
        let neutral = || self.downloads.iter().find(|d| d.arch.is_none());
        match arch {
            Some(wanted) => self
                .downloads
                .iter()
                .find(|d| d.arch == Some(wanted))
                .or_else(neutral),
            None => neutral(),
        }
    }

    /// Architectures the entry defines payloads for; empty for
    /// architecture-neutral entries.
    pub fn supported_arches(&self) -> Vec<Arch> {
        self.downloads.iter().filter_map(|d| d.arch).collect()
    }

    pub fn is_arch_neutral(&self) -> bool {
        self.downloads.iter().all(|d| d.arch.is_none())
    }
}

/// Look up a (type, version) pair; `None` when either is unknown.
pub fn lookup(kind: &str, version: &str) -> Option<&'static PrereqSpec> {
    CATALOG
        .iter()
        .find(|spec| spec.kind == kind && spec.version == version)
}

/// Versions the catalog knows for a type, in catalog order.
pub fn known_versions(kind: &str) -> Vec<&'static str> {
    CATALOG
        .iter()
        .filter(|spec| spec.kind == kind)
        .map(|spec| spec.version)
        .collect()
}

/// Resolve a (type, version) pair or fail with a message naming the
/// offending declaration and, for a known type, the versions that exist.
pub fn resolve_spec(kind: &str, version: &str) -> Result<&'static PrereqSpec> {
    if let Some(spec) = lookup(kind, version) {
        return Ok(spec);
    }
    let versions = known_versions(kind);
    if versions.is_empty() {
        bail!("unrecognized prerequisite type '{}'", kind);
    }
    bail!(
        "unknown version '{}' for prerequisite type '{}' (known versions: {})",
        version,
        kind,
        versions.join(", ")
    );
}
