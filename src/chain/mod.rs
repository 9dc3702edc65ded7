//! Bundle Chain Builder.
//!
//! Produces the strict install chain of a multi-package bundle:
//! prerequisites in declared order, then custom exe packages, then the
//! product package(s). Architecture-bearing entries are gated by
//! mutually exclusive install conditions so exactly one variant of a
//! logical package runs on any machine.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::graph::component::IdGen;
use crate::ir::{Arch, Bundle, BuildConfig, Requirement};
use crate::prereq::{self, cache::ResolvedPrereqs};

/// One element of the bootstrap chain, in install order.
#[derive(Debug, Clone)]
pub enum ChainEntry {
    Exe(ExePackageEntry),
    Msi(MsiPackageEntry),
}

/// A prerequisite or custom executable package.
#[derive(Debug, Clone)]
pub struct ExePackageEntry {
    pub id: String,
    pub display_name: String,
    pub source: PathBuf,
    pub install_args: Option<String>,
    /// Skips the package when the dependency is already on the machine.
    pub detect_condition: Option<String>,
    /// Architecture gate; `None` means the entry always runs.
    pub install_condition: Option<String>,
    /// Prerequisites stay behind when the product is uninstalled.
    pub permanent: bool,
}

/// A product package at the end of the chain.
#[derive(Debug, Clone)]
pub struct MsiPackageEntry {
    pub id: String,
    pub source: PathBuf,
    pub install_condition: Option<String>,
    /// Forward the bootstrapper's chosen install location into the
    /// nested package.
    pub forward_install_folder: bool,
}

/// Install condition gating one architecture variant.
///
/// The three conditions are pairwise mutually exclusive and jointly
/// exhaustive: 32-bit machines take the x86 entry, 64-bit Intel/AMD
/// machines the x64 entry, ARM64 machines the arm64 entry.
pub fn arch_condition(arch: Arch) -> &'static str {
    match arch {
        Arch::X86 => "NOT VersionNT64",
        Arch::X64 => "VersionNT64 AND NOT (NativeMachine = 43620)",
        Arch::Arm64 => "NativeMachine = 43620",
    }
}

/// Architectures the bundle's product sources cover.
///
/// A single platform-neutral source covers every architecture. A bundle
/// with neither a neutral source nor any architecture-specific source
/// cannot produce a chain.
pub fn product_arches(bundle: &Bundle) -> Result<Vec<Arch>> {
    if bundle.msi.is_some() {
        return Ok(Arch::ALL.to_vec());
    }
    let mut arches = Vec::new();
    if bundle.msi_x86.is_some() {
        arches.push(Arch::X86);
    }
    if bundle.msi_x64.is_some() {
        arches.push(Arch::X64);
    }
    if bundle.msi_arm64.is_some() {
        arches.push(Arch::Arm64);
    }
    if arches.is_empty() {
        bail!("bundle declares no product package source");
    }
    Ok(arches)
}

/// Build the ordered chain for one bundle.
///
/// `resolved` is the cache output for the bundle's prerequisites; keys
/// missing from it fall back to the conventional prerequisites folder.
pub fn build_chain(
    bundle: &Bundle,
    config: &BuildConfig,
    resolved: &ResolvedPrereqs,
    work_dir: &Path,
) -> Result<Vec<ChainEntry>> {
    let arches = product_arches(bundle)?;
    let fallback_dir = config
        .prereq_dir
        .clone()
        .unwrap_or_else(|| work_dir.join("prereqs"));

    let mut ids = IdGen::new();
    let mut entries = Vec::new();

    for req in &bundle.prerequisites {
        add_prerequisite(
            &mut entries,
            &mut ids,
            req,
            &arches,
            resolved,
            &fallback_dir,
            work_dir,
        )?;
    }

    for exe in &bundle.exe_packages {
        entries.push(ChainEntry::Exe(ExePackageEntry {
            id: ids.next("exe"),
            display_name: exe.name.clone(),
            source: resolve_path(&exe.source, work_dir),
            install_args: exe.install_args.clone(),
            detect_condition: exe.detect_condition.clone(),
            install_condition: None,
            permanent: true,
        }));
    }

    if let Some(source) = &bundle.msi {
        entries.push(ChainEntry::Msi(MsiPackageEntry {
            id: ids.next("msi"),
            source: resolve_path(source, work_dir),
            install_condition: None,
            forward_install_folder: true,
        }));
    } else {
        let sources = [
            (Arch::X86, &bundle.msi_x86),
            (Arch::X64, &bundle.msi_x64),
            (Arch::Arm64, &bundle.msi_arm64),
        ];
        for (arch, source) in sources {
            if let Some(source) = source {
                entries.push(ChainEntry::Msi(MsiPackageEntry {
                    id: ids.next("msi"),
                    source: resolve_path(source, work_dir),
                    install_condition: Some(arch_condition(arch).to_string()),
                    forward_install_folder: true,
                }));
            }
        }
    }

    Ok(entries)
}

fn add_prerequisite(
    entries: &mut Vec<ChainEntry>,
    ids: &mut IdGen,
    req: &Requirement,
    arches: &[Arch],
    resolved: &ResolvedPrereqs,
    fallback_dir: &Path,
    work_dir: &Path,
) -> Result<()> {
    if let Some(source) = &req.source {
        // A custom source makes the requirement opaque: one ungated
        // entry, enriched with catalog metadata when the pair is known.
        let spec = prereq::lookup(&req.kind, &req.version);
        let neutral_detect = spec
            .and_then(|s| s.download_for(None))
            .and_then(|d| d.detect_condition)
            .map(str::to_string);
        entries.push(ChainEntry::Exe(ExePackageEntry {
            id: ids.next("prq"),
            display_name: spec
                .map(|s| s.display_name.to_string())
                .unwrap_or_else(|| format!("{} {}", req.kind, req.version)),
            source: resolved
                .get(&(req.kind.clone(), req.version.clone(), None))
                .cloned()
                .unwrap_or_else(|| resolve_path(source, work_dir)),
            install_args: spec.map(|s| s.install_args.to_string()),
            detect_condition: neutral_detect,
            install_condition: None,
            permanent: true,
        }));
        return Ok(());
    }

    let spec = prereq::resolve_spec(&req.kind, &req.version)?;

    if spec.is_arch_neutral() {
        let Some(download) = spec.download_for(None) else {
            bail!(
                "prerequisite {} {} has no architecture-neutral payload",
                req.kind,
                req.version
            );
        };
        entries.push(ChainEntry::Exe(ExePackageEntry {
            id: ids.next("prq"),
            display_name: spec.display_name.to_string(),
            source: resolved
                .get(&(req.kind.clone(), req.version.clone(), None))
                .cloned()
                .unwrap_or_else(|| fallback_dir.join(download.file_name)),
            install_args: Some(spec.install_args.to_string()),
            detect_condition: download.detect_condition.map(str::to_string),
            install_condition: None,
            permanent: true,
        }));
        return Ok(());
    }

    for arch in Arch::ALL {
        if !arches.contains(&arch) {
            continue;
        }
        let Some(download) = spec.downloads.iter().find(|d| d.arch == Some(arch)) else {
            // The catalog defines no payload for this variant (common
            // for arm64); platform selection simply drops it.
            continue;
        };
        entries.push(ChainEntry::Exe(ExePackageEntry {
            id: ids.next("prq"),
            display_name: format!("{} ({})", spec.display_name, arch),
            source: resolved
                .get(&(req.kind.clone(), req.version.clone(), Some(arch)))
                .cloned()
                .unwrap_or_else(|| fallback_dir.join(download.file_name)),
            install_args: Some(spec.install_args.to_string()),
            detect_condition: download.detect_condition.map(str::to_string),
            install_condition: Some(arch_condition(arch).to_string()),
            permanent: true,
        }));
    }
    Ok(())
}

fn resolve_path(source: &str, work_dir: &Path) -> PathBuf {
    let path = Path::new(source);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        work_dir.join(path)
    }
}
