//! XML fragment emission.
//!
//! Renders the package graph and the bundle chain into the named
//! fragment strings the external renderer folds into a complete source
//! document. Fragments are opaque strings to everything downstream;
//! the only hard requirements here are well-formedness, attribute
//! escaping, and byte-for-byte determinism for identical input.

use std::collections::BTreeMap;

use crate::chain::ChainEntry;
use crate::graph::actions::ActionTiming;
use crate::graph::component::{Component, Payload};
use crate::graph::directory::DirTree;
use crate::graph::{FeatureNode, PackageGraph, ShortcutComponent};
use crate::ir::BuildConfig;

/// The named fragments produced for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragments {
    /// One fragment per well-known installation root that received
    /// content, keyed by root identifier.
    pub directories: BTreeMap<String, String>,
    pub features: String,
    pub registry: String,
    pub desktop_shortcuts: String,
    pub start_menu_shortcuts: String,
    pub custom_actions: String,
    pub install_sequence: String,
    /// Present only for bundle builds.
    pub chain: Option<String>,
}

/// Render every package-graph fragment. The chain fragment is attached
/// separately by the caller when the description declares a bundle.
pub fn emit_fragments(graph: &PackageGraph, config: &BuildConfig) -> Fragments {
    let mut directories = BTreeMap::new();
    for (root, ix) in graph.dirs.roots() {
        directories.insert(root.id().to_string(), directory_fragment(&graph.dirs, ix));
    }

    Fragments {
        directories,
        features: features_fragment(graph, config),
        registry: registry_fragment(graph),
        desktop_shortcuts: shortcut_fragment(&graph.desktop_shortcuts, "DesktopFolder"),
        start_menu_shortcuts: shortcut_fragment(&graph.start_menu_shortcuts, "ProgramMenuFolder"),
        custom_actions: custom_actions_fragment(graph),
        install_sequence: install_sequence_fragment(graph),
        chain: None,
    }
}

fn directory_fragment(dirs: &DirTree, root_ix: usize) -> String {
    let mut out = String::new();
    line(&mut out, 0, "<Fragment>");
    let root = dirs.node(root_ix);
    line(
        &mut out,
        1,
        &format!("<DirectoryRef Id=\"{}\">", xml_escape(&root.id)),
    );
    for component in &root.components {
        render_component(&mut out, 2, component);
    }
    for (_, child) in root.children() {
        render_directory(&mut out, 2, dirs, child);
    }
    line(&mut out, 1, "</DirectoryRef>");
    line(&mut out, 0, "</Fragment>");
    out
}

fn render_directory(out: &mut String, depth: usize, dirs: &DirTree, ix: usize) {
    let node = dirs.node(ix);
    line(
        out,
        depth,
        &format!(
            "<Directory Id=\"{}\" Name=\"{}\">",
            xml_escape(&node.id),
            xml_escape(&node.name)
        ),
    );
    for component in &node.components {
        render_component(out, depth + 1, component);
    }
    for (_, child) in node.children() {
        render_directory(out, depth + 1, dirs, child);
    }
    line(out, depth, "</Directory>");
}

fn render_component(out: &mut String, depth: usize, component: &Component) {
    match &component.payload {
        Payload::File(file) => {
            line(
                out,
                depth,
                &format!(
                    "<Component Id=\"{}\" Guid=\"{}\">",
                    xml_escape(&component.id),
                    component.guid
                ),
            );
            let short = file
                .short_name
                .as_deref()
                .map(|s| format!(" ShortName=\"{}\"", xml_escape(s)))
                .unwrap_or_default();
            line(
                out,
                depth + 1,
                &format!(
                    "<File Id=\"{}\" Name=\"{}\"{} Source=\"{}\" KeyPath=\"yes\" />",
                    xml_escape(&file.id),
                    xml_escape(&file.name),
                    short,
                    xml_escape(&file.source.display().to_string()),
                ),
            );
            line(out, depth, "</Component>");
        }
        Payload::EnvVar(env) => {
            line(
                out,
                depth,
                &format!(
                    "<Component Id=\"{}\" Guid=\"{}\" KeyPath=\"yes\">",
                    xml_escape(&component.id),
                    component.guid
                ),
            );
            let part = if env.append { "last" } else { "all" };
            line(
                out,
                depth + 1,
                &format!(
                    "<Environment Id=\"{}\" Name=\"{}\" Value=\"{}\" \
                     Action=\"set\" Part=\"{}\" System=\"yes\" />",
                    xml_escape(&env.id),
                    xml_escape(&env.name),
                    xml_escape(&env.value),
                    part,
                ),
            );
            line(out, depth, "</Component>");
        }
        Payload::Service(service) => {
            line(
                out,
                depth,
                &format!(
                    "<Component Id=\"{}\" Guid=\"{}\" KeyPath=\"yes\">",
                    xml_escape(&component.id),
                    component.guid
                ),
            );
            let description = service
                .description
                .as_deref()
                .map(|d| format!(" Description=\"{}\"", xml_escape(d)))
                .unwrap_or_default();
            let start = if service.auto_start { "auto" } else { "demand" };
            line(
                out,
                depth + 1,
                &format!(
                    "<ServiceInstall Id=\"{}\" Name=\"{}\" DisplayName=\"{}\"{} \
                     Start=\"{}\" Type=\"ownProcess\" ErrorControl=\"normal\" \
                     Arguments=\"\" Vital=\"yes\" />",
                    xml_escape(&service.id),
                    xml_escape(&service.name),
                    xml_escape(&service.display_name),
                    description,
                    start,
                ),
            );
            line(
                out,
                depth + 1,
                &format!(
                    "<ServiceControl Id=\"{}c\" Name=\"{}\" Stop=\"both\" \
                     Remove=\"uninstall\" Wait=\"yes\" />",
                    xml_escape(&service.id),
                    xml_escape(&service.name),
                ),
            );
            line(out, depth, "</Component>");
        }
        Payload::EmptyFolder { hardened } => {
            line(
                out,
                depth,
                &format!(
                    "<Component Id=\"{}\" Guid=\"{}\" KeyPath=\"yes\">",
                    xml_escape(&component.id),
                    component.guid
                ),
            );
            if *hardened {
                line(out, depth + 1, "<CreateFolder>");
                line(
                    out,
                    depth + 2,
                    "<Permission User=\"Administrators\" GenericAll=\"yes\" />",
                );
                line(
                    out,
                    depth + 2,
                    "<Permission User=\"Users\" GenericRead=\"yes\" GenericExecute=\"yes\" />",
                );
                line(out, depth + 1, "</CreateFolder>");
            } else {
                line(out, depth + 1, "<CreateFolder />");
            }
            line(out, depth, "</Component>");
        }
    }
}

fn features_fragment(graph: &PackageGraph, config: &BuildConfig) -> String {
    // feature id -> component refs, in component creation order; refs
    // without a feature belong to the synthetic root feature.
    let mut refs_owned: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut root_owned: Vec<String> = Vec::new();
    let mut record_ref = |features: &[String], id: &str| {
        if features.is_empty() {
            root_owned.push(id.to_string());
        } else {
            for feature in features {
                refs_owned
                    .entry(feature.clone())
                    .or_default()
                    .push(id.to_string());
            }
        }
    };

    for ix in 0..graph.dirs.len() {
        for component in &graph.dirs.node(ix).components {
            record_ref(&component.features, &component.id);
        }
    }
    for reg in &graph.registry {
        record_ref(&reg.features, &reg.id);
    }
    for shortcut in graph
        .desktop_shortcuts
        .iter()
        .chain(&graph.start_menu_shortcuts)
    {
        record_ref(&shortcut.features, &shortcut.component_id);
    }
    drop(record_ref);

    let mut out = String::new();
    line(&mut out, 0, "<Fragment>");
    line(
        &mut out,
        1,
        &format!(
            "<Feature Id=\"ProductFeature\" Title=\"{}\" Level=\"1\" Absent=\"disallow\">",
            xml_escape(&config.product_name)
        ),
    );
    for id in &root_owned {
        line(
            &mut out,
            2,
            &format!("<ComponentRef Id=\"{}\" />", xml_escape(id)),
        );
    }
    for node in &graph.feature_tree {
        render_feature(&mut out, 2, node, &refs_owned);
    }
    line(&mut out, 1, "</Feature>");
    line(&mut out, 0, "</Fragment>");
    out
}

fn render_feature(
    out: &mut String,
    depth: usize,
    node: &FeatureNode,
    refs: &BTreeMap<String, Vec<String>>,
) {
    // Disabled features use a level above any sensible INSTALLLEVEL so
    // they default to off but stay selectable.
    let level = if node.enabled { "1" } else { "32767" };
    let absent = if node.allow_absent { "allow" } else { "disallow" };
    line(
        out,
        depth,
        &format!(
            "<Feature Id=\"{}\" Title=\"{}\" Level=\"{}\" Absent=\"{}\">",
            xml_escape(&node.id),
            xml_escape(&node.name),
            level,
            absent,
        ),
    );
    if let Some(ids) = refs.get(&node.id) {
        for id in ids {
            line(
                out,
                depth + 1,
                &format!("<ComponentRef Id=\"{}\" />", xml_escape(id)),
            );
        }
    }
    for child in &node.children {
        render_feature(out, depth + 1, child, refs);
    }
    line(out, depth, "</Feature>");
}

fn registry_fragment(graph: &PackageGraph) -> String {
    if graph.registry.is_empty() {
        return "<Fragment />\n".to_string();
    }
    let mut out = String::new();
    line(&mut out, 0, "<Fragment>");
    line(&mut out, 1, "<DirectoryRef Id=\"TARGETDIR\">");
    for reg in &graph.registry {
        line(
            &mut out,
            2,
            &format!(
                "<Component Id=\"{}\" Guid=\"{}\">",
                xml_escape(&reg.id),
                reg.guid
            ),
        );
        let name = reg
            .name
            .as_deref()
            .map(|n| format!(" Name=\"{}\"", xml_escape(n)))
            .unwrap_or_default();
        if reg.hardened {
            line(
                &mut out,
                3,
                &format!(
                    "<RegistryValue Id=\"{}\" Root=\"{}\" Key=\"{}\"{} Value=\"{}\" \
                     Type=\"string\" KeyPath=\"yes\">",
                    xml_escape(&reg.value_id),
                    reg.root,
                    xml_escape(&reg.key),
                    name,
                    xml_escape(&reg.value),
                ),
            );
            line(
                &mut out,
                4,
                "<Permission User=\"Administrators\" GenericAll=\"yes\" />",
            );
            line(&mut out, 3, "</RegistryValue>");
        } else {
            line(
                &mut out,
                3,
                &format!(
                    "<RegistryValue Id=\"{}\" Root=\"{}\" Key=\"{}\"{} Value=\"{}\" \
                     Type=\"string\" KeyPath=\"yes\" />",
                    xml_escape(&reg.value_id),
                    reg.root,
                    xml_escape(&reg.key),
                    name,
                    xml_escape(&reg.value),
                ),
            );
        }
        line(&mut out, 2, "</Component>");
    }
    line(&mut out, 1, "</DirectoryRef>");
    line(&mut out, 0, "</Fragment>");
    out
}

fn shortcut_fragment(shortcuts: &[ShortcutComponent], root: &str) -> String {
    if shortcuts.is_empty() {
        return "<Fragment />\n".to_string();
    }
    let mut out = String::new();
    line(&mut out, 0, "<Fragment>");
    line(
        &mut out,
        1,
        &format!("<DirectoryRef Id=\"{}\">", root),
    );
    for shortcut in shortcuts {
        line(
            &mut out,
            2,
            &format!(
                "<Component Id=\"{}\" Guid=\"{}\">",
                xml_escape(&shortcut.component_id),
                shortcut.guid
            ),
        );
        let arguments = shortcut
            .arguments
            .as_deref()
            .map(|a| format!(" Arguments=\"{}\"", xml_escape(a)))
            .unwrap_or_default();
        line(
            &mut out,
            3,
            &format!(
                "<Shortcut Id=\"{}\" Name=\"{}\" Target=\"{}\"{} />",
                xml_escape(&shortcut.shortcut_id),
                xml_escape(&shortcut.name),
                xml_escape(&shortcut.target),
                arguments,
            ),
        );
        // A shortcut cannot be a key path; a synthetic per-user registry
        // value stands in.
        line(
            &mut out,
            3,
            &format!(
                "<RegistryValue Root=\"HKCU\" Key=\"{}\" Name=\"{}\" Value=\"1\" \
                 Type=\"integer\" KeyPath=\"yes\" />",
                xml_escape(&shortcut.reg_key),
                xml_escape(&shortcut.shortcut_id),
            ),
        );
        line(&mut out, 2, "</Component>");
    }
    line(&mut out, 1, "</DirectoryRef>");
    line(&mut out, 0, "</Fragment>");
    out
}

fn custom_actions_fragment(graph: &PackageGraph) -> String {
    if graph.actions.is_empty() {
        return "<Fragment />\n".to_string();
    }
    let mut out = String::new();
    line(&mut out, 0, "<Fragment>");
    for action in &graph.actions {
        let schedule = action.timing.schedule();
        let (execute, impersonate) = if schedule.deferred {
            ("deferred", "no")
        } else {
            ("immediate", "yes")
        };
        line(
            &mut out,
            1,
            &format!(
                "<CustomAction Id=\"{}\" Directory=\"{}\" ExeCommand=\"{}\" \
                 Execute=\"{}\" Impersonate=\"{}\" Return=\"check\" />",
                xml_escape(&action.id),
                xml_escape(&action.working_dir_id),
                xml_escape(&action.command),
                execute,
                impersonate,
            ),
        );
    }
    line(&mut out, 0, "</Fragment>");
    out
}

fn install_sequence_fragment(graph: &PackageGraph) -> String {
    if graph.actions.is_empty() {
        return "<Fragment />\n".to_string();
    }
    let mut out = String::new();
    line(&mut out, 0, "<Fragment>");
    line(&mut out, 1, "<InstallExecuteSequence>");
    for bucket in ActionTiming::ALL {
        for action in graph.actions.iter().filter(|a| a.timing == bucket) {
            let schedule = bucket.schedule();
            let placement = if schedule.before_anchor {
                format!("Before=\"{}\"", schedule.anchor)
            } else {
                format!("After=\"{}\"", schedule.anchor)
            };
            match schedule.condition {
                Some(condition) => line(
                    &mut out,
                    2,
                    &format!(
                        "<Custom Action=\"{}\" {}>{}</Custom>",
                        xml_escape(&action.id),
                        placement,
                        xml_escape(condition),
                    ),
                ),
                None => line(
                    &mut out,
                    2,
                    &format!("<Custom Action=\"{}\" {} />", xml_escape(&action.id), placement),
                ),
            }
        }
    }
    line(&mut out, 1, "</InstallExecuteSequence>");
    line(&mut out, 0, "</Fragment>");
    out
}

/// Render the bundle chain fragment.
pub fn chain_fragment(chain: &[ChainEntry]) -> String {
    let mut out = String::new();
    line(&mut out, 0, "<Fragment>");
    line(&mut out, 1, "<PackageGroup Id=\"ProductChain\">");
    for entry in chain {
        match entry {
            ChainEntry::Exe(exe) => {
                let mut attrs = format!(
                    "Id=\"{}\" DisplayName=\"{}\" SourceFile=\"{}\"",
                    xml_escape(&exe.id),
                    xml_escape(&exe.display_name),
                    xml_escape(&exe.source.display().to_string()),
                );
                if let Some(args) = &exe.install_args {
                    attrs.push_str(&format!(" InstallCommand=\"{}\"", xml_escape(args)));
                }
                if let Some(detect) = &exe.detect_condition {
                    attrs.push_str(&format!(" DetectCondition=\"{}\"", xml_escape(detect)));
                }
                if let Some(gate) = &exe.install_condition {
                    attrs.push_str(&format!(" InstallCondition=\"{}\"", xml_escape(gate)));
                }
                if exe.permanent {
                    attrs.push_str(" Permanent=\"yes\"");
                }
                line(&mut out, 2, &format!("<ExePackage {} />", attrs));
            }
            ChainEntry::Msi(msi) => {
                let mut attrs = format!(
                    "Id=\"{}\" SourceFile=\"{}\"",
                    xml_escape(&msi.id),
                    xml_escape(&msi.source.display().to_string()),
                );
                if let Some(gate) = &msi.install_condition {
                    attrs.push_str(&format!(" InstallCondition=\"{}\"", xml_escape(gate)));
                }
                if msi.forward_install_folder {
                    line(&mut out, 2, &format!("<MsiPackage {}>", attrs));
                    line(
                        &mut out,
                        3,
                        "<MsiProperty Name=\"INSTALLFOLDER\" Value=\"[InstallFolder]\" />",
                    );
                    line(&mut out, 2, "</MsiPackage>");
                } else {
                    line(&mut out, 2, &format!("<MsiPackage {} />", attrs));
                }
            }
        }
    }
    line(&mut out, 1, "</PackageGroup>");
    line(&mut out, 0, "</Fragment>");
    out
}

fn line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str(text);
    out.push('\n');
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
