//! Directory arena for the package graph.
//!
//! Directory nodes form a forest rooted at well-known installation roots.
//! Nodes live in a flat arena and refer to each other by index: the
//! parent edge is a lookup key, the `children` map is the sole ownership
//! edge. Children are keyed by case-folded name, which gives both the
//! case-insensitive matching the target format requires and a
//! deterministic iteration order. Nodes are created lazily while target
//! paths are walked and never removed.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};

use crate::graph::component::{Component, IdGen};

/// The well-known installation roots a target spec may address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WellKnownRoot {
    /// The primary install root; unanchored targets land here.
    InstallFolder,
    ProgramFiles,
    ProgramFiles64,
    Desktop,
    ProgramMenu,
    CommonAppData,
    AppData,
    System,
    Windows,
}

impl WellKnownRoot {
    pub const ALL: [WellKnownRoot; 9] = [
        WellKnownRoot::InstallFolder,
        WellKnownRoot::ProgramFiles,
        WellKnownRoot::ProgramFiles64,
        WellKnownRoot::Desktop,
        WellKnownRoot::ProgramMenu,
        WellKnownRoot::CommonAppData,
        WellKnownRoot::AppData,
        WellKnownRoot::System,
        WellKnownRoot::Windows,
    ];

    /// Identifier of the root in the target format.
    pub fn id(&self) -> &'static str {
        match self {
            WellKnownRoot::InstallFolder => "INSTALLFOLDER",
            WellKnownRoot::ProgramFiles => "ProgramFilesFolder",
            WellKnownRoot::ProgramFiles64 => "ProgramFiles64Folder",
            WellKnownRoot::Desktop => "DesktopFolder",
            WellKnownRoot::ProgramMenu => "ProgramMenuFolder",
            WellKnownRoot::CommonAppData => "CommonAppDataFolder",
            WellKnownRoot::AppData => "AppDataFolder",
            WellKnownRoot::System => "SystemFolder",
            WellKnownRoot::Windows => "WindowsFolder",
        }
    }

    /// Match a root name case-insensitively.
    pub fn from_name(name: &str) -> Option<WellKnownRoot> {
        WellKnownRoot::ALL
            .iter()
            .copied()
            .find(|root| root.id().eq_ignore_ascii_case(name))
    }
}

/// A resolved target spec: which root, and the path beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub root: WellKnownRoot,
    /// Forward-slash separated, possibly empty.
    pub subpath: String,
}

/// Parse a target spec string.
///
/// Three accepted shapes:
/// - `[ROOT]sub/path` — bracketed reference to a well-known root;
/// - `ROOT/sub/path` — bare well-known root name as first segment;
/// - `sub/path` — anything else, anchored under the primary install root.
pub fn parse_target_spec(spec: &str) -> Result<TargetSpec> {
    let spec = spec.trim();
    if let Some(rest) = spec.strip_prefix('[') {
        let Some((name, tail)) = rest.split_once(']') else {
            bail!("malformed target '{}': unterminated root reference", spec);
        };
        let Some(root) = WellKnownRoot::from_name(name) else {
            bail!("malformed target '{}': unknown install root '{}'", spec, name);
        };
        return Ok(TargetSpec {
            root,
            subpath: normalize_subpath(tail),
        });
    }

    let first = spec
        .split(['/', '\\'])
        .next()
        .unwrap_or_default();
    if let Some(root) = WellKnownRoot::from_name(first) {
        return Ok(TargetSpec {
            root,
            subpath: normalize_subpath(&spec[first.len()..]),
        });
    }

    Ok(TargetSpec {
        root: WellKnownRoot::InstallFolder,
        subpath: normalize_subpath(spec),
    })
}

fn normalize_subpath(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// One directory in the graph.
#[derive(Debug)]
pub struct DirNode {
    pub id: String,
    /// Display name; empty on root nodes.
    pub name: String,
    /// Set on root nodes only.
    pub root: Option<WellKnownRoot>,
    pub parent: Option<usize>,
    /// Case-folded child name -> arena index.
    children: BTreeMap<String, usize>,
    pub components: Vec<Component>,
    /// Features that placed a component anywhere in this subtree.
    pub owners: BTreeSet<String>,
}

impl DirNode {
    pub fn children(&self) -> impl Iterator<Item = (&str, usize)> {
        self.children.iter().map(|(name, ix)| (name.as_str(), *ix))
    }
}

/// Arena of directory nodes, one tree per touched well-known root.
#[derive(Debug, Default)]
pub struct DirTree {
    nodes: Vec<DirNode>,
    roots: BTreeMap<WellKnownRoot, usize>,
}

impl DirTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, ix: usize) -> &DirNode {
        &self.nodes[ix]
    }

    pub fn node_mut(&mut self, ix: usize) -> &mut DirNode {
        &mut self.nodes[ix]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Roots that have been touched, in stable order.
    pub fn roots(&self) -> impl Iterator<Item = (WellKnownRoot, usize)> + '_ {
        self.roots.iter().map(|(root, ix)| (*root, *ix))
    }

    /// Arena index of a root node, creating it on first use. Root
    /// identifiers are the well-known names themselves, so no sequential
    /// identifier is spent on them.
    pub fn root_ix(&mut self, root: WellKnownRoot) -> usize {
        if let Some(ix) = self.roots.get(&root) {
            return *ix;
        }
        let ix = self.nodes.len();
        self.nodes.push(DirNode {
            id: root.id().to_string(),
            name: String::new(),
            root: Some(root),
            parent: None,
            children: BTreeMap::new(),
            components: Vec::new(),
            owners: BTreeSet::new(),
        });
        self.roots.insert(root, ix);
        ix
    }

    /// Locate or create the directory chain for `subpath` under `root`.
    ///
    /// Segment matching is case-insensitive: `Bin` and `bin` address the
    /// same node, and the first spelling seen becomes the display name.
    pub fn ensure_chain(
        &mut self,
        root: WellKnownRoot,
        subpath: &str,
        ids: &mut IdGen,
    ) -> usize {
        let base = self.root_ix(root);
        if subpath.is_empty() {
            return base;
        }
        let segments: Vec<String> = subpath
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self.descend(base, &segments, ids)
    }

    /// Walk (creating as needed) from `base` down the given segments.
    pub fn descend(&mut self, base: usize, segments: &[String], ids: &mut IdGen) -> usize {
        let mut current = base;
        for segment in segments {
            let key = segment.to_lowercase();
            if let Some(ix) = self.nodes[current].children.get(&key) {
                current = *ix;
                continue;
            }
            let ix = self.nodes.len();
            self.nodes.push(DirNode {
                id: ids.next("dir"),
                name: segment.clone(),
                root: None,
                parent: Some(current),
                children: BTreeMap::new(),
                components: Vec::new(),
                owners: BTreeSet::new(),
            });
            self.nodes[current].children.insert(key, ix);
            current = ix;
        }
        current
    }

    /// Attach a component to a directory and mark the owning feature on
    /// the node and every ancestor up to the root.
    pub fn add_component(&mut self, ix: usize, component: Component) {
        let features = component.features.clone();
        self.nodes[ix].components.push(component);
        for feature in features {
            let mut cursor = Some(ix);
            while let Some(node_ix) = cursor {
                self.nodes[node_ix].owners.insert(feature.clone());
                cursor = self.nodes[node_ix].parent;
            }
        }
    }

    /// Formatted path of a node, e.g. `[INSTALLFOLDER]bin/tools`.
    pub fn formatted_path(&self, ix: usize) -> String {
        let mut segments = Vec::new();
        let mut cursor = ix;
        let root = loop {
            let node = &self.nodes[cursor];
            match node.parent {
                Some(parent) => {
                    segments.push(node.name.as_str());
                    cursor = parent;
                }
                None => break format!("[{}]", node.id),
            }
        };
        segments.reverse();
        format!("{}{}", root, segments.join("/"))
    }
}
