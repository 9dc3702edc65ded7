//! Package Graph Builder.
//!
//! Walks the parsed installer description and the local file system and
//! produces the directory/component/feature graph plus the ancillary
//! lists (shortcuts, registry-derived components, custom actions) the
//! fragment emitter renders.
//!
//! The build is three passes over the description:
//!
//! 1. **Exclusion collection** - every declared exclusion path, in both
//!    literal and working-directory-relative form, lands in one set used
//!    for membership tests during file walks.
//! 2. **Feature-identifier pre-assignment** - each feature gets a
//!    sequential identifier keyed by its position in the tree (path of
//!    child indices), before any item is processed. The map is immutable
//!    afterwards; item processing and emission only read it.
//! 3. **Item processing** - dispatch on the item variant, creating
//!    directories lazily and attaching components.
//!
//! Attaching a component under feature F also marks F on the directory
//! and every ancestor, so the permission-hardening pass can attribute its
//! synthetic per-directory components to every feature sharing a
//! directory. Output is byte-for-byte deterministic for identical input
//! and file-system state.

pub mod actions;
pub mod component;
pub mod directory;

use anyhow::{anyhow, bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component as PathComponent, Path, PathBuf};
use walkdir::WalkDir;

use crate::graph::actions::{ActionTiming, CustomAction};
use crate::graph::component::{
    short_name, stable_guid, Component, EnvEntry, IdGen, InstallFile, Payload, ServiceInstall,
};
use crate::graph::directory::{parse_target_spec, DirTree, WellKnownRoot};
use crate::ir::{
    BuildConfig, CustomActionDecl, EnvVar, Feature, FileSet, InstallerDescription, Item,
    RegistryValue, Service, Shortcut,
};

/// The fully materialized package graph.
#[derive(Debug)]
pub struct PackageGraph {
    pub dirs: DirTree,
    /// Feature tree with assigned identifiers, mirroring the description.
    pub feature_tree: Vec<FeatureNode>,
    /// Immutable positional-path -> identifier map from pass two.
    pub feature_ids: BTreeMap<Vec<usize>, String>,
    pub registry: Vec<RegistryComponent>,
    pub desktop_shortcuts: Vec<ShortcutComponent>,
    pub start_menu_shortcuts: Vec<ShortcutComponent>,
    /// Declaration order; buckets are separated at emission time.
    pub actions: Vec<CustomAction>,
}

/// One feature with its assigned identifier.
#[derive(Debug, Clone)]
pub struct FeatureNode {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub allow_absent: bool,
    pub children: Vec<FeatureNode>,
}

/// A component whose payload is a registry value (its own key path).
#[derive(Debug, Clone)]
pub struct RegistryComponent {
    pub id: String,
    pub guid: String,
    pub value_id: String,
    /// `HKLM` or `HKCU`.
    pub root: &'static str,
    pub key: String,
    pub name: Option<String>,
    pub value: String,
    pub hardened: bool,
    pub features: Vec<String>,
}

/// A dedicated shortcut component.
///
/// A shortcut cannot be a key path, so the component carries a synthetic
/// registry value to serve as one.
#[derive(Debug, Clone)]
pub struct ShortcutComponent {
    pub component_id: String,
    pub guid: String,
    pub shortcut_id: String,
    pub name: String,
    /// Formatted target path, e.g. `[INSTALLFOLDER]bin/app.exe`.
    pub target: String,
    pub arguments: Option<String>,
    /// Key of the synthetic key-path registry value.
    pub reg_key: String,
    pub features: Vec<String>,
}

/// Build the package graph for one description.
pub fn build_graph(
    desc: &InstallerDescription,
    config: &BuildConfig,
    work_dir: &Path,
) -> Result<PackageGraph> {
    let mut builder = GraphBuilder {
        config,
        work_dir,
        ids: IdGen::new(),
        excluded: BTreeSet::new(),
        seen_targets: BTreeMap::new(),
        seen_guids: BTreeMap::new(),
        dirs: DirTree::new(),
        feature_ids: BTreeMap::new(),
        feature_tree: Vec::new(),
        registry: Vec::new(),
        desktop_shortcuts: Vec::new(),
        start_menu_shortcuts: Vec::new(),
        actions: Vec::new(),
    };

    builder.collect_exclusions(desc);
    builder.feature_tree = builder.assign_feature_ids(&desc.features, &mut Vec::new());

    for item in &desc.items {
        builder.process_item(item, None)?;
    }
    builder.process_features(&desc.features, &mut Vec::new())?;

    builder.finish()
}

struct GraphBuilder<'a> {
    config: &'a BuildConfig,
    work_dir: &'a Path,
    ids: IdGen,
    excluded: BTreeSet<PathBuf>,
    /// (directory index, lower-cased target name) -> attachment count.
    seen_targets: BTreeMap<(usize, String), usize>,
    /// Canonical GUID source -> occurrence count, across payload kinds.
    seen_guids: BTreeMap<String, usize>,
    dirs: DirTree,
    feature_ids: BTreeMap<Vec<usize>, String>,
    feature_tree: Vec<FeatureNode>,
    registry: Vec<RegistryComponent>,
    desktop_shortcuts: Vec<ShortcutComponent>,
    start_menu_shortcuts: Vec<ShortcutComponent>,
    actions: Vec<CustomAction>,
}

impl GraphBuilder<'_> {
    /// Pass one: gather every exclusion in literal and
    /// working-directory-relative form.
    fn collect_exclusions(&mut self, desc: &InstallerDescription) {
        fn walk(builder: &mut GraphBuilder<'_>, items: &[Item], features: &[Feature]) {
            for item in items {
                if let Item::Exclude { path } = item {
                    builder.excluded.insert(normalize(Path::new(path)));
                    builder
                        .excluded
                        .insert(normalize(&builder.work_dir.join(path)));
                }
            }
            for feature in features {
                walk(builder, &feature.items, &feature.features);
            }
        }
        walk(self, &desc.items, &desc.features);
    }

    /// Pass two: assign sequential feature identifiers keyed by the
    /// positional path from the root.
    fn assign_feature_ids(
        &mut self,
        features: &[Feature],
        prefix: &mut Vec<usize>,
    ) -> Vec<FeatureNode> {
        let mut nodes = Vec::with_capacity(features.len());
        for (index, feature) in features.iter().enumerate() {
            prefix.push(index);
            let id = self.ids.next("fea");
            self.feature_ids.insert(prefix.clone(), id.clone());
            let children = self.assign_feature_ids(&feature.features, prefix);
            prefix.pop();
            nodes.push(FeatureNode {
                id,
                name: feature.name.clone(),
                enabled: feature.enabled,
                allow_absent: feature.allow_absent,
                children,
            });
        }
        nodes
    }

    fn process_features(&mut self, features: &[Feature], path: &mut Vec<usize>) -> Result<()> {
        for (index, feature) in features.iter().enumerate() {
            path.push(index);
            let id = self
                .feature_ids
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow!("feature '{}' has no assigned identifier", feature.name))?;
            for item in &feature.items {
                self.process_item(item, Some(&id))?;
            }
            self.process_features(&feature.features, path)?;
            path.pop();
        }
        Ok(())
    }

    /// Pass three: dispatch one item.
    fn process_item(&mut self, item: &Item, feature: Option<&str>) -> Result<()> {
        match item {
            Item::Files(set) => self.add_file_set(set, feature),
            Item::EnvVar(env) => self.add_env_var(env, feature),
            Item::Service(svc) => self.add_service(svc, feature),
            Item::Shortcut(shortcut) => self.add_shortcut(shortcut, feature),
            Item::CustomAction(action) => self.add_custom_action(action),
            Item::Registry(value) => self.add_registry(value, feature),
            // Consumed during pass one.
            Item::Exclude { .. } => Ok(()),
        }
    }

    fn add_file_set(&mut self, set: &FileSet, feature: Option<&str>) -> Result<()> {
        let spec = parse_target_spec(&set.target)
            .with_context(|| format!("file set source '{}'", set.source))?;
        let source = self.resolve_source(&set.source);
        if !source.exists() {
            // Missing sources are skipped so a description can be
            // validated on a machine that lacks the build outputs.
            return Ok(());
        }

        if source.is_file() {
            // Checked before the target chain exists so a fully excluded
            // file leaves no empty directories behind.
            if self.is_excluded(&source, self.work_dir) {
                return Ok(());
            }
            let dir = self.dirs.ensure_chain(spec.root, &spec.subpath, &mut self.ids);
            return self.attach_file(dir, &source, feature);
        }

        let dir = self.dirs.ensure_chain(spec.root, &spec.subpath, &mut self.ids);

        let mut walker = WalkDir::new(&source).sort_by_file_name().into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry
                .with_context(|| format!("walking file set source '{}'", source.display()))?;
            let path = entry.path().to_path_buf();
            if path == source {
                continue;
            }
            if self.is_excluded(&path, &source) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }
            let rel = path
                .strip_prefix(&source)
                .with_context(|| format!("walking file set source '{}'", source.display()))?;
            let segments = utf8_segments(rel, &source)?;
            if entry.file_type().is_dir() {
                self.dirs.descend(dir, &segments, &mut self.ids);
            } else {
                let target = self
                    .dirs
                    .descend(dir, &segments[..segments.len() - 1], &mut self.ids);
                self.attach_file(target, &path, feature)?;
            }
        }
        Ok(())
    }

    /// Attach one file/component pair, synthesizing an 8.3 short name for
    /// the 2nd+ file targeting the same (directory, name) slot.
    fn attach_file(&mut self, dir: usize, source: &Path, feature: Option<&str>) -> Result<()> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("file name of '{}' is not valid UTF-8", source.display()))?
            .to_string();

        let slot = (dir, name.to_lowercase());
        let ordinal = self
            .seen_targets
            .entry(slot)
            .and_modify(|n| *n += 1)
            .or_insert(1);
        let ordinal = *ordinal;

        let dir_path = self.dirs.formatted_path(dir);
        // The ordinal keeps duplicate targets distinguishable; without it
        // two overriding features would share one GUID.
        let guid_source = if ordinal == 1 {
            format!("file/{}/{}", dir_path.to_lowercase(), name.to_lowercase())
        } else {
            format!(
                "file/{}/{}#{}",
                dir_path.to_lowercase(),
                name.to_lowercase(),
                ordinal
            )
        };

        let file = InstallFile {
            id: self.ids.next("fil"),
            short_name: (ordinal > 1).then(|| short_name(&name, ordinal)),
            name,
            source: source.to_path_buf(),
            key_path: true,
        };
        let component = Component {
            id: self.ids.next("cmp"),
            guid: stable_guid(&guid_source),
            payload: Payload::File(file),
            features: feature_vec(feature),
        };
        self.dirs.add_component(dir, component);
        Ok(())
    }

    fn add_env_var(&mut self, env: &EnvVar, feature: Option<&str>) -> Result<()> {
        let dir = self.dirs.root_ix(WellKnownRoot::InstallFolder);
        let entry = EnvEntry {
            id: self.ids.next("env"),
            name: env.name.clone(),
            value: env.value.clone(),
            append: false,
        };
        let guid = self.unique_guid(format!("env/{}", env.name.to_lowercase()));
        let component = Component {
            id: self.ids.next("cmp"),
            guid,
            payload: Payload::EnvVar(entry),
            features: feature_vec(feature),
        };
        self.dirs.add_component(dir, component);
        Ok(())
    }

    fn add_service(&mut self, svc: &Service, feature: Option<&str>) -> Result<()> {
        let spec = parse_target_spec(&svc.executable)
            .with_context(|| format!("service '{}'", svc.name))?;
        let Some((parent, exe_name)) = split_file_target(&spec.subpath) else {
            bail!(
                "service '{}': executable target '{}' does not name a file",
                svc.name,
                svc.executable
            );
        };
        let dir = self.dirs.ensure_chain(spec.root, parent, &mut self.ids);
        let executable = self.formatted_child(dir, exe_name);

        let service = ServiceInstall {
            id: self.ids.next("svc"),
            name: svc.name.clone(),
            display_name: svc.display_name.clone().unwrap_or_else(|| svc.name.clone()),
            description: svc.description.clone(),
            executable,
            auto_start: svc.auto_start,
        };
        let guid = self.unique_guid(format!("service/{}", svc.name.to_lowercase()));
        let component = Component {
            id: self.ids.next("cmp"),
            guid,
            payload: Payload::Service(service),
            features: feature_vec(feature),
        };
        self.dirs.add_component(dir, component);
        Ok(())
    }

    fn add_shortcut(&mut self, shortcut: &Shortcut, feature: Option<&str>) -> Result<()> {
        // All validation happens before any identifier is handed out, so
        // a bad shortcut leaves no dangling component behind.
        let location = shortcut.location.trim().to_ascii_lowercase();
        if location != "desktop" && location != "start-menu" {
            bail!(
                "invalid shortcut destination '{}' for shortcut '{}' \
                 (expected 'desktop' or 'start-menu')",
                shortcut.location,
                shortcut.name
            );
        }
        let spec = parse_target_spec(&shortcut.target)
            .with_context(|| format!("shortcut '{}'", shortcut.name))?;
        let Some((parent, file_name)) = split_file_target(&spec.subpath) else {
            bail!(
                "invalid shortcut target '{}' for shortcut '{}': does not name a file",
                shortcut.target,
                shortcut.name
            );
        };

        let dir = self.dirs.ensure_chain(spec.root, parent, &mut self.ids);
        let target = self.formatted_child(dir, file_name);
        let guid = self.unique_guid(format!(
            "shortcut/{}/{}",
            location,
            shortcut.name.to_lowercase()
        ));
        let entry = ShortcutComponent {
            shortcut_id: self.ids.next("shc"),
            component_id: self.ids.next("cmp"),
            guid,
            name: shortcut.name.clone(),
            target,
            arguments: shortcut.arguments.clone(),
            reg_key: format!(
                "Software\\{}\\{}\\shortcuts",
                self.config.manufacturer, self.config.product_name
            ),
            features: feature_vec(feature),
        };
        if location == "desktop" {
            self.desktop_shortcuts.push(entry);
        } else {
            self.start_menu_shortcuts.push(entry);
        }
        Ok(())
    }

    fn add_custom_action(&mut self, action: &CustomActionDecl) -> Result<()> {
        let timing = ActionTiming::parse(&action.timing)
            .with_context(|| format!("custom action '{}'", action.command))?;
        let working_dir_id = match &action.working_dir {
            Some(target) => {
                let spec = parse_target_spec(target)
                    .with_context(|| format!("custom action '{}'", action.command))?;
                let ix = self.dirs.ensure_chain(spec.root, &spec.subpath, &mut self.ids);
                self.dirs.node(ix).id.clone()
            }
            None => {
                let ix = self.dirs.root_ix(WellKnownRoot::InstallFolder);
                self.dirs.node(ix).id.clone()
            }
        };
        self.actions.push(CustomAction {
            id: self.ids.next("ca"),
            command: action.command.clone(),
            working_dir_id,
            timing,
        });
        Ok(())
    }

    fn add_registry(&mut self, value: &RegistryValue, feature: Option<&str>) -> Result<()> {
        let root = match value.root.trim().to_ascii_uppercase().as_str() {
            "HKLM" => "HKLM",
            "HKCU" => "HKCU",
            other => bail!(
                "invalid registry root '{}' for key '{}' (expected HKLM or HKCU)",
                other,
                value.key
            ),
        };
        let guid = self.unique_guid(format!(
            "registry/{}/{}/{}",
            root.to_lowercase(),
            value.key.to_lowercase(),
            value.name.as_deref().unwrap_or("").to_lowercase()
        ));
        self.registry.push(RegistryComponent {
            id: self.ids.next("cmp"),
            guid,
            value_id: self.ids.next("rgv"),
            root,
            key: value.key.clone(),
            name: value.name.clone(),
            value: value.value.clone(),
            hardened: self.config.registry_permissions,
            features: feature_vec(feature),
        });
        Ok(())
    }

    /// Final step: synthetic components driven by configuration flags.
    fn finish(mut self) -> Result<PackageGraph> {
        if self.config.add_to_path {
            let dir = self.dirs.root_ix(WellKnownRoot::InstallFolder);
            let entry = EnvEntry {
                id: self.ids.next("env"),
                name: "PATH".to_string(),
                value: "[INSTALLFOLDER]".to_string(),
                append: true,
            };
            let guid = self.unique_guid("env/path-append".to_string());
            let component = Component {
                id: self.ids.next("cmp"),
                guid,
                payload: Payload::EnvVar(entry),
                features: Vec::new(),
            };
            self.dirs.add_component(dir, component);
        }

        if self.config.harden_permissions {
            // One synthetic folder component per install directory,
            // referenced by every feature that owns anything beneath it.
            for ix in 0..self.dirs.len() {
                if self.root_of(ix) != Some(WellKnownRoot::InstallFolder) {
                    continue;
                }
                let owners: Vec<String> =
                    self.dirs.node(ix).owners.iter().cloned().collect();
                let path = self.dirs.formatted_path(ix);
                let guid = self.unique_guid(format!("harden/{}", path.to_lowercase()));
                let component = Component {
                    id: self.ids.next("cmp"),
                    guid,
                    payload: Payload::EmptyFolder { hardened: true },
                    features: owners,
                };
                self.dirs.add_component(ix, component);
            }
        }

        Ok(PackageGraph {
            dirs: self.dirs,
            feature_tree: self.feature_tree,
            feature_ids: self.feature_ids,
            registry: self.registry,
            desktop_shortcuts: self.desktop_shortcuts,
            start_menu_shortcuts: self.start_menu_shortcuts,
            actions: self.actions,
        })
    }

    /// GUID for a canonical source string, de-duplicated the same way
    /// file targets are: the 2nd+ component derived from one source gets
    /// an ordinal suffix so no two components share a GUID.
    fn unique_guid(&mut self, source: String) -> String {
        let count = self
            .seen_guids
            .entry(source.clone())
            .and_modify(|n| *n += 1)
            .or_insert(1);
        if *count == 1 {
            stable_guid(&source)
        } else {
            stable_guid(&format!("{}#{}", source, count))
        }
    }

    fn resolve_source(&self, source: &str) -> PathBuf {
        let path = Path::new(source);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    /// Membership test against the exclusion set: the path itself, its
    /// working-directory-relative form, and its file-set-root-relative
    /// form are all checked, each also as a lexical descendant.
    fn is_excluded(&self, path: &Path, set_root: &Path) -> bool {
        let mut candidates = vec![normalize(path)];
        if let Ok(rel) = path.strip_prefix(self.work_dir) {
            candidates.push(rel.to_path_buf());
        }
        if let Ok(rel) = path.strip_prefix(set_root) {
            candidates.push(rel.to_path_buf());
        }
        candidates.iter().any(|candidate| {
            self.excluded
                .iter()
                .any(|excluded| candidate == excluded || candidate.starts_with(excluded))
        })
    }

    fn formatted_child(&self, dir: usize, name: &str) -> String {
        let path = self.dirs.formatted_path(dir);
        if path.ends_with(']') {
            format!("{}{}", path, name)
        } else {
            format!("{}/{}", path, name)
        }
    }

    fn root_of(&self, ix: usize) -> Option<WellKnownRoot> {
        let mut cursor = ix;
        loop {
            let node = self.dirs.node(cursor);
            match node.parent {
                Some(parent) => cursor = parent,
                None => return node.root,
            }
        }
    }
}

fn feature_vec(feature: Option<&str>) -> Vec<String> {
    feature.map(|f| vec![f.to_string()]).unwrap_or_default()
}

/// Split a subpath into (parent, file name); `None` when empty.
fn split_file_target(subpath: &str) -> Option<(&str, &str)> {
    if subpath.is_empty() {
        return None;
    }
    match subpath.rsplit_once('/') {
        Some((parent, name)) => Some((parent, name)),
        None => Some(("", subpath)),
    }
}

/// Lexical path cleanup: drop `.`, resolve `..` upwards.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for part in path.components() {
        match part {
            PathComponent::CurDir => {}
            PathComponent::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn utf8_segments(rel: &Path, source: &Path) -> Result<Vec<String>> {
    rel.components()
        .map(|part| {
            part.as_os_str()
                .to_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    anyhow!("non-UTF-8 file name under '{}'", source.display())
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn test_config() -> BuildConfig {
        toml::from_str(
            r#"
            product_name = "Widget"
            version = "1.2.3"
            manufacturer = "Acme"
            "#,
        )
        .unwrap()
    }

    fn build(desc_toml: &str, work_dir: &Path) -> PackageGraph {
        let desc = InstallerDescription::from_toml_str(desc_toml).unwrap();
        build_graph(&desc, &test_config(), work_dir).unwrap()
    }

    fn file_components(graph: &PackageGraph) -> Vec<(&Component, &InstallFile)> {
        let mut out = Vec::new();
        for ix in 0..graph.dirs.len() {
            for component in &graph.dirs.node(ix).components {
                if let Payload::File(file) = &component.payload {
                    out.push((component, file));
                }
            }
        }
        out
    }

    #[test]
    fn single_file_produces_one_keypathed_component() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("out")).unwrap();
        fs::write(tmp.path().join("out/app.exe"), b"x").unwrap();

        let graph = build(
            r#"
            [[items]]
            kind = "files"
            source = "out/app.exe"
            target = "[INSTALLFOLDER]bin"
            "#,
            tmp.path(),
        );

        let files = file_components(&graph);
        assert_eq!(files.len(), 1);
        let (component, file) = files[0];
        assert!(file.key_path);
        assert!(file.short_name.is_none());
        assert_eq!(file.name, "app.exe");
        assert!(component.features.is_empty());
        // INSTALLFOLDER root plus the bin directory.
        assert_eq!(graph.dirs.len(), 2);
    }

    #[test]
    fn feature_override_collision_gets_short_name() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::create_dir_all(tmp.path().join("b")).unwrap();
        fs::write(tmp.path().join("a/config.xml"), b"a").unwrap();
        fs::write(tmp.path().join("b/config.xml"), b"b").unwrap();

        let graph = build(
            r#"
            [[features]]
            name = "Base"
            [[features.items]]
            kind = "files"
            source = "a/config.xml"
            target = "etc"

            [[features]]
            name = "Override"
            [[features.items]]
            kind = "files"
            source = "b/config.xml"
            target = "etc"
            "#,
            tmp.path(),
        );

        let files = file_components(&graph);
        assert_eq!(files.len(), 2);
        assert!(files[0].1.short_name.is_none());
        assert_eq!(files[1].1.short_name.as_deref(), Some("CONFIG_2.XML"));
        assert_ne!(files[0].0.guid, files[1].0.guid);
    }

    #[test]
    fn directory_source_is_walked_and_exclusions_skip_subtrees() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("payload");
        fs::create_dir_all(src.join("keep")).unwrap();
        fs::create_dir_all(src.join("skip/deep")).unwrap();
        fs::write(src.join("keep/a.txt"), b"a").unwrap();
        fs::write(src.join("skip/b.txt"), b"b").unwrap();
        fs::write(src.join("skip/deep/c.txt"), b"c").unwrap();
        fs::write(src.join("top.txt"), b"t").unwrap();

        let graph = build(
            r#"
            [[items]]
            kind = "exclude"
            path = "skip"

            [[items]]
            kind = "files"
            source = "payload"
            target = "data"
            "#,
            tmp.path(),
        );

        let names: Vec<&str> = file_components(&graph)
            .iter()
            .map(|(_, f)| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["a.txt", "top.txt"]);
    }

    #[test]
    fn duplicate_env_var_declarations_get_distinct_guids() {
        let tmp = TempDir::new().unwrap();
        let graph = build(
            r#"
            [[features]]
            name = "A"
            [[features.items]]
            kind = "env-var"
            name = "WIDGET_MODE"
            value = "a"

            [[features]]
            name = "B"
            [[features.items]]
            kind = "env-var"
            name = "WIDGET_MODE"
            value = "b"
            "#,
            tmp.path(),
        );

        let mut components = Vec::new();
        for ix in 0..graph.dirs.len() {
            for component in &graph.dirs.node(ix).components {
                if matches!(component.payload, Payload::EnvVar(_)) {
                    components.push(component);
                }
            }
        }
        assert_eq!(components.len(), 2);
        assert_ne!(components[0].id, components[1].id);
        assert_ne!(components[0].guid, components[1].guid);
    }

    #[test]
    fn duplicate_registry_values_get_distinct_guids() {
        let tmp = TempDir::new().unwrap();
        let graph = build(
            r#"
            [[features]]
            name = "A"
            [[features.items]]
            kind = "registry"
            root = "HKLM"
            key = "Software\\Acme\\Widget"
            name = "Mode"
            value = "a"

            [[features]]
            name = "B"
            [[features.items]]
            kind = "registry"
            root = "HKLM"
            key = "Software\\Acme\\Widget"
            name = "Mode"
            value = "b"
            "#,
            tmp.path(),
        );

        assert_eq!(graph.registry.len(), 2);
        assert_ne!(graph.registry[0].guid, graph.registry[1].guid);
    }

    #[test]
    fn excluded_single_file_source_creates_no_directories() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("tool.exe"), b"t").unwrap();

        let graph = build(
            r#"
            [[items]]
            kind = "exclude"
            path = "tool.exe"

            [[items]]
            kind = "files"
            source = "tool.exe"
            target = "bin"
            "#,
            tmp.path(),
        );

        assert!(file_components(&graph).is_empty());
        assert!(graph.dirs.is_empty());
    }

    #[test]
    fn missing_file_set_source_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let graph = build(
            r#"
            [[items]]
            kind = "files"
            source = "does/not/exist"
            target = "bin"
            "#,
            tmp.path(),
        );
        assert!(file_components(&graph).is_empty());
    }

    #[test]
    fn feature_ids_are_positional_and_survive_duplicate_names() {
        let tmp = TempDir::new().unwrap();
        let graph = build(
            r#"
            [[features]]
            name = "Tools"
            [[features.features]]
            name = "Tools"

            [[features]]
            name = "Tools"
            "#,
            tmp.path(),
        );

        assert_eq!(graph.feature_ids.len(), 3);
        assert_eq!(graph.feature_ids[&vec![0]], "fea1");
        assert_eq!(graph.feature_ids[&vec![0, 0]], "fea2");
        assert_eq!(graph.feature_ids[&vec![1]], "fea3");
        assert_eq!(graph.feature_tree[0].children[0].id, "fea2");
    }

    #[test]
    fn feature_ownership_propagates_to_ancestor_directories() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("tool.exe"), b"t").unwrap();

        let graph = build(
            r#"
            [[features]]
            name = "Tools"
            [[features.items]]
            kind = "files"
            source = "tool.exe"
            target = "bin/tools"
            "#,
            tmp.path(),
        );

        for ix in 0..graph.dirs.len() {
            assert!(
                graph.dirs.node(ix).owners.contains("fea1"),
                "directory {} missing owner",
                graph.dirs.node(ix).id
            );
        }
    }

    #[test]
    fn invalid_shortcut_destination_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let desc = InstallerDescription::from_toml_str(
            r#"
            [[items]]
            kind = "shortcut"
            name = "Widget"
            target = "[INSTALLFOLDER]bin/app.exe"
            location = "taskbar"
            "#,
        )
        .unwrap();
        let err = build_graph(&desc, &test_config(), tmp.path()).unwrap_err();
        assert!(err.to_string().contains("taskbar"));
    }

    #[test]
    fn shortcut_gets_registry_keypath_and_location_list() {
        let tmp = TempDir::new().unwrap();
        let graph = build(
            r#"
            [[items]]
            kind = "shortcut"
            name = "Widget"
            target = "[INSTALLFOLDER]bin/app.exe"
            location = "start-menu"
            "#,
            tmp.path(),
        );
        assert!(graph.desktop_shortcuts.is_empty());
        assert_eq!(graph.start_menu_shortcuts.len(), 1);
        let shortcut = &graph.start_menu_shortcuts[0];
        assert_eq!(shortcut.target, "[INSTALLFOLDER]bin/app.exe");
        assert_eq!(shortcut.reg_key, "Software\\Acme\\Widget\\shortcuts");
    }

    #[test]
    fn unknown_custom_action_timing_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let desc = InstallerDescription::from_toml_str(
            r#"
            [[items]]
            kind = "custom-action"
            command = "setup.cmd"
            timing = "whenever"
            "#,
        )
        .unwrap();
        let err = build_graph(&desc, &test_config(), tmp.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("whenever"));
    }

    #[test]
    fn hardening_creates_shared_folder_components() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        fs::write(tmp.path().join("b.txt"), b"b").unwrap();

        let desc = InstallerDescription::from_toml_str(
            r#"
            [[features]]
            name = "A"
            [[features.items]]
            kind = "files"
            source = "a.txt"
            target = "shared"

            [[features]]
            name = "B"
            [[features.items]]
            kind = "files"
            source = "b.txt"
            target = "shared"
            "#,
        )
        .unwrap();
        let mut config = test_config();
        config.harden_permissions = true;
        let graph = build_graph(&desc, &config, tmp.path()).unwrap();

        let shared_ix = (0..graph.dirs.len())
            .find(|ix| graph.dirs.node(*ix).name == "shared")
            .unwrap();
        let folder = graph
            .dirs
            .node(shared_ix)
            .components
            .iter()
            .find(|c| matches!(c.payload, Payload::EmptyFolder { .. }))
            .unwrap();
        assert_eq!(folder.features, vec!["fea1".to_string(), "fea2".to_string()]);
    }

    #[test]
    fn hardening_covers_directories_without_feature_owners() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("app.exe"), b"x").unwrap();

        let desc = InstallerDescription::from_toml_str(
            r#"
            [[items]]
            kind = "files"
            source = "app.exe"
            target = "bin"
            "#,
        )
        .unwrap();
        let mut config = test_config();
        config.harden_permissions = true;
        let graph = build_graph(&desc, &config, tmp.path()).unwrap();

        // Top-level items have no owning feature; their directories are
        // still hardened, with the component attached to the synthetic
        // root feature (empty feature list).
        let bin_ix = (0..graph.dirs.len())
            .find(|ix| graph.dirs.node(*ix).name == "bin")
            .unwrap();
        let folder = graph
            .dirs
            .node(bin_ix)
            .components
            .iter()
            .find(|c| matches!(c.payload, Payload::EmptyFolder { .. }))
            .unwrap();
        assert!(folder.features.is_empty());
    }

    #[test]
    fn all_identifiers_are_unique() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("app.exe"), b"x").unwrap();
        fs::write(tmp.path().join("app2.exe"), b"y").unwrap();

        let desc = InstallerDescription::from_toml_str(
            r#"
            [[items]]
            kind = "files"
            source = "app.exe"
            target = "bin"

            [[items]]
            kind = "env-var"
            name = "WIDGET_HOME"
            value = "[INSTALLFOLDER]"

            [[items]]
            kind = "registry"
            root = "HKLM"
            key = "Software\\Acme\\Widget"
            value = "[INSTALLFOLDER]"

            [[items]]
            kind = "shortcut"
            name = "Widget"
            target = "bin/app.exe"
            location = "desktop"

            [[items]]
            kind = "custom-action"
            command = "init.cmd"
            timing = "after-install"

            [[features]]
            name = "Service"
            [[features.items]]
            kind = "files"
            source = "app2.exe"
            target = "bin"
            [[features.items]]
            kind = "service"
            name = "widgetd"
            executable = "bin/app2.exe"
            "#,
        )
        .unwrap();
        let mut config = test_config();
        config.harden_permissions = true;
        config.add_to_path = true;
        let graph = build_graph(&desc, &config, tmp.path()).unwrap();

        let mut ids = Vec::new();
        for ix in 0..graph.dirs.len() {
            let node = graph.dirs.node(ix);
            ids.push(node.id.clone());
            for component in &node.components {
                ids.push(component.id.clone());
                match &component.payload {
                    Payload::File(f) => ids.push(f.id.clone()),
                    Payload::EnvVar(e) => ids.push(e.id.clone()),
                    Payload::Service(s) => ids.push(s.id.clone()),
                    Payload::EmptyFolder { .. } => {}
                }
            }
        }
        for (_, id) in &graph.feature_ids {
            ids.push(id.clone());
        }
        for reg in &graph.registry {
            ids.push(reg.id.clone());
            ids.push(reg.value_id.clone());
        }
        for shortcut in graph
            .desktop_shortcuts
            .iter()
            .chain(&graph.start_menu_shortcuts)
        {
            ids.push(shortcut.component_id.clone());
            ids.push(shortcut.shortcut_id.clone());
        }
        for action in &graph.actions {
            ids.push(action.id.clone());
        }

        let unique: BTreeSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len(), "identifier collision: {:?}", ids);
    }
}
