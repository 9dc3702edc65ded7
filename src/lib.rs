//! Installer materialization engine.
//!
//! Converts a parsed declarative installer description into a Windows
//! Installer style package definition: a directory/component/feature
//! graph and, for multi-package products, an ordered bootstrap chain of
//! prerequisite and product packages. The output is a set of named XML
//! fragments an external renderer folds into a complete source document
//! for the packaging compiler.
//!
//! # Architecture
//!
//! ```text
//! front end (external)
//!     │  parsed description + resolved config
//!     ▼
//! graph::build_graph ──── walks features, items and the file system,
//!     │                   producing directories/components/features
//!     ▼
//! emit::emit_fragments ── renders the graph into fragment strings
//!
//! prereq::cache ───────── resolves (type, version, arch) to local
//!     │                   payloads, downloading on first use
//!     ▼
//! chain::build_chain ──── orders prerequisites, exe packages and
//!     │                   product packages under arch conditions
//!     ▼
//! emit::chain_fragment
//! ```
//!
//! Everything is deterministic: identical input and file-system state
//! produce byte-identical fragments, and install GUIDs are derived by
//! hashing logical source paths so the target format recognizes the
//! same installable unit across product versions.

pub mod chain;
pub mod emit;
pub mod graph;
pub mod ir;
pub mod prereq;

use anyhow::Result;
use std::path::Path;

pub use emit::Fragments;
pub use graph::PackageGraph;
pub use ir::{Arch, BuildConfig, InstallerDescription};
pub use prereq::cache::{PrereqCache, ResolvedPrereqs};

use ir::{Bundle, Requirement};

/// Materialize one description into its output fragments.
///
/// `resolved` is the prerequisite cache output for bundle builds; pass
/// `None` for single-package products or validate-only runs (chain
/// sources then fall back to the conventional prerequisites folder).
pub fn materialize(
    desc: &InstallerDescription,
    config: &BuildConfig,
    work_dir: &Path,
    resolved: Option<&ResolvedPrereqs>,
) -> Result<Fragments> {
    let graph = graph::build_graph(desc, config, work_dir)?;
    let mut fragments = emit::emit_fragments(&graph, config);

    if let Some(bundle) = &desc.bundle {
        let empty = ResolvedPrereqs::new();
        let resolved = resolved.unwrap_or(&empty);
        let mut chained = bundle.clone();
        chained.prerequisites = merged_requirements(desc, bundle);
        let chain = chain::build_chain(&chained, config, resolved, work_dir)?;
        fragments.chain = Some(emit::chain_fragment(&chain));
    }

    Ok(fragments)
}

/// Ensure every prerequisite payload a description's bundle needs is
/// present in the cache, strictly in declaration order.
pub fn resolve_prerequisites(
    desc: &InstallerDescription,
    cache: &PrereqCache,
    work_dir: &Path,
) -> Result<ResolvedPrereqs> {
    let Some(bundle) = &desc.bundle else {
        return Ok(ResolvedPrereqs::new());
    };
    let arches = chain::product_arches(bundle)?;
    let requirements = merged_requirements(desc, bundle);
    prereq::cache::resolve_requirements(cache, &requirements, &arches, work_dir)
}

/// The top-level requirement list and the bundle's own prerequisites
/// form one chain prefix, in that order.
fn merged_requirements(desc: &InstallerDescription, bundle: &Bundle) -> Vec<Requirement> {
    desc.requirements
        .iter()
        .cloned()
        .chain(bundle.prerequisites.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn materialize_end_to_end_with_bundle() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("out")).unwrap();
        fs::write(tmp.path().join("out/app.exe"), b"x").unwrap();

        let desc = InstallerDescription::from_toml_str(
            r#"
            [[items]]
            kind = "files"
            source = "out/app.exe"
            target = "bin"

            [bundle]
            msi_x64 = "out/widget-x64.msi"

            [[bundle.prerequisites]]
            type = "vcredist"
            version = "2022"
            "#,
        )
        .unwrap();
        let config: BuildConfig = toml::from_str(
            r#"
            product_name = "Widget"
            version = "1.0.0"
            manufacturer = "Acme"
            "#,
        )
        .unwrap();

        let fragments = materialize(&desc, &config, tmp.path(), None).unwrap();
        assert!(fragments.directories.contains_key("INSTALLFOLDER"));
        let chain = fragments.chain.unwrap();
        assert!(chain.contains("vc_redist.2022.x64.exe"));
        assert!(chain.contains("widget-x64.msi"));
    }

    #[test]
    fn materialize_without_bundle_has_no_chain() {
        let tmp = TempDir::new().unwrap();
        let desc = InstallerDescription::from_toml_str("").unwrap();
        let config: BuildConfig = toml::from_str(
            r#"
            product_name = "Widget"
            version = "1.0.0"
            manufacturer = "Acme"
            "#,
        )
        .unwrap();
        let fragments = materialize(&desc, &config, tmp.path(), None).unwrap();
        assert!(fragments.chain.is_none());
    }
}
