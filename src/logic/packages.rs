//! Package Selection Tree
//!
//! Turns the nested package catalog into a selectable tree and flattens the
//! selection into the ordered install list stored in the plan.
//!
//! # Catalog shape
//!
//! ```json
//! {
//!   "Shells": {
//!     "zsh":  { "name": "zsh", "version": "5.9", "dependencies": ["pcre2"] },
//!     "bash": { "name": "bash", "version": "5.2" }
//!   },
//!   "Base": { "pkg": { "name": "pkg", "required": true } }
//! }
//! ```
//!
//! An object with a string `name` is a package; any other object is a
//! category. Catalog order is kept.
//!
//! # Design
//!
//! - **Arena**: nodes live in one `Vec`, linked by `NodeId`
//! - **Iterative**: building and walking use explicit stacks, no recursion
//! - **Deterministic**: same tree and selection give the same install list

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::error::{InstallError, Result};
use crate::hardware::bytes_to_human;
use crate::plan::InstallPlan;

/// Shell packages in preference order
pub const SHELL_PREFERENCE: &[&str] = &["zsh", "bash", "fish"];

/// Shell present on every installed system
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Shells shipped with the base system
pub const BASE_SHELLS: &[&str] = &["/bin/sh", "/bin/csh"];

/// Where third-party shells get installed
fn shell_path(package: &str) -> String {
    format!("/usr/local/bin/{}", package)
}

// ============================================================================
// Catalog
// ============================================================================

/// One installable package
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageDescriptor {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Installed size in bytes
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub description: String,
    /// Hard dependencies, by package name
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Always installed, cannot be deselected
    #[serde(default)]
    pub required: bool,
}

/// Read-only nested catalog snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackageCatalog {
    root: Map<String, Value>,
}

impl PackageCatalog {
    /// Parse a catalog from JSON text; the top level must be an object
    pub fn from_json(json: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(json)? {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(InstallError::catalog("top level must be an object of categories")),
        }
    }

    /// Load a catalog snapshot from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read package catalog from {:?}", path.as_ref()))?;
        let catalog = Self::from_json(&content).context("Failed to parse package catalog")?;
        log::info!("Package catalog: {} top-level categories", catalog.root.len());
        Ok(catalog)
    }
}

// ============================================================================
// Tree
// ============================================================================

/// Stable index of a node in its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Category,
    Package(PackageDescriptor),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// Catalog key
    pub label: String,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    selected: bool,
}

impl TreeNode {
    pub fn package(&self) -> Option<&PackageDescriptor> {
        match &self.kind {
            NodeKind::Package(desc) => Some(desc),
            NodeKind::Category => None,
        }
    }

    pub fn is_category(&self) -> bool {
        matches!(self.kind, NodeKind::Category)
    }

    /// Selected by the caller, or required
    pub fn is_selected(&self) -> bool {
        self.selected || self.package().is_some_and(|p| p.required)
    }
}

/// Arena of categories and packages
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageTree {
    nodes: Vec<TreeNode>,
    roots: Vec<NodeId>,
    /// First node carrying each package name
    by_name: HashMap<String, NodeId>,
}

impl PackageTree {
    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.0)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node of the package called `name`
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Node at a `/`-separated label path, e.g. `Shells/zsh`
    pub fn find_path(&self, path: &str) -> Option<NodeId> {
        let mut level = self.roots.as_slice();
        let mut found = None;
        for label in path.split('/').filter(|s| !s.is_empty()) {
            let id = level.iter().copied().find(|id| self.nodes[id.0].label == label)?;
            level = &self.nodes[id.0].children;
            found = Some(id);
        }
        found
    }

    pub fn descriptor(&self, name: &str) -> Option<&PackageDescriptor> {
        self.find(name).and_then(|id| self.nodes[id.0].package())
    }

    /// Preorder walk starting at `start`
    fn walk(&self, start: &[NodeId]) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack: Vec<NodeId> = start.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    /// Every node in catalog order
    pub fn preorder(&self) -> Vec<NodeId> {
        self.walk(&self.roots)
    }

    /// Select a node; selecting a category selects everything below it
    pub fn select(&mut self, id: NodeId) {
        self.set_selected(id, true);
    }

    /// Deselect a node (and everything below a category). Required packages
    /// stay selected.
    pub fn deselect(&mut self, id: NodeId) {
        self.set_selected(id, false);
    }

    fn set_selected(&mut self, id: NodeId, selected: bool) {
        if id.0 >= self.nodes.len() {
            return;
        }
        for node in self.walk(&[id]) {
            self.nodes[node.0].selected = selected;
        }
    }

    /// Select every node carrying package `name`; false if unknown
    pub fn select_package(&mut self, name: &str) -> bool {
        let ids: Vec<NodeId> = self
            .preorder()
            .into_iter()
            .filter(|id| self.nodes[id.0].package().is_some_and(|p| p.name == name))
            .collect();
        for id in &ids {
            self.select(*id);
        }
        !ids.is_empty()
    }

    pub fn is_selected(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(TreeNode::is_selected)
    }
}

/// Build the selection tree from a catalog.
///
/// # Errors
///
/// `Catalog` if an entry is not an object or a package descriptor is malformed.
pub fn build_tree(catalog: &PackageCatalog) -> Result<PackageTree> {
    let mut tree = PackageTree::default();
    let mut stack: Vec<(Option<NodeId>, &Map<String, Value>)> = vec![(None, &catalog.root)];

    while let Some((parent, entries)) = stack.pop() {
        for (label, value) in entries {
            let Value::Object(object) = value else {
                return Err(InstallError::catalog(format!(
                    "entry '{}' is not a category or package",
                    label
                )));
            };

            let id = NodeId(tree.nodes.len());
            let kind = if object.get("name").is_some_and(Value::is_string) {
                let desc: PackageDescriptor = serde_json::from_value(value.clone())
                    .map_err(|e| InstallError::catalog(format!("package '{}': {}", label, e)))?;
                tree.by_name.entry(desc.name.clone()).or_insert(id);
                NodeKind::Package(desc)
            } else {
                stack.push((Some(id), object));
                NodeKind::Category
            };

            tree.nodes.push(TreeNode {
                label: label.clone(),
                kind,
                parent,
                children: Vec::new(),
                selected: false,
            });
            match parent {
                Some(p) => tree.nodes[p.0].children.push(id),
                None => tree.roots.push(id),
            }
        }
    }

    log::debug!("Package tree: {} nodes, {} packages", tree.nodes.len(), tree.by_name.len());
    Ok(tree)
}

// ============================================================================
// Flattening
// ============================================================================

/// Install list for the current selection.
///
/// Tree order, each package preceded by its not-yet-listed dependency closure.
/// Names appear once; dependency cycles are cut where they close.
pub fn flatten_selection(tree: &PackageTree) -> Vec<String> {
    let mut out = Vec::new();
    let mut emitted = HashSet::new();

    for id in tree.preorder() {
        let node = &tree.nodes[id.0];
        if let (Some(desc), true) = (node.package(), node.is_selected()) {
            push_closure(tree, &desc.name, &mut out, &mut emitted);
        }
    }
    out
}

/// Post-order dependency walk rooted at `name`
fn push_closure(tree: &PackageTree, name: &str, out: &mut Vec<String>, emitted: &mut HashSet<String>) {
    let mut expanding = HashSet::new();
    let mut stack = vec![(name.to_string(), false)];

    while let Some((pkg, deps_done)) = stack.pop() {
        if emitted.contains(&pkg) {
            continue;
        }
        if deps_done {
            emitted.insert(pkg.clone());
            out.push(pkg);
            continue;
        }
        if !expanding.insert(pkg.clone()) {
            continue;
        }
        stack.push((pkg.clone(), true));
        if let Some(desc) = tree.descriptor(&pkg) {
            for dep in desc.dependencies.iter().rev() {
                if !emitted.contains(dep) {
                    stack.push((dep.clone(), false));
                }
            }
        }
    }
}

/// Store the flattened selection in the plan
pub fn set_install_packages(plan: &mut InstallPlan, tree: &PackageTree) {
    let packages = flatten_selection(tree);
    log::info!("Selected {} package(s) for installation", packages.len());
    plan.set_install_packages(packages);
}

/// Total installed size of the flattened selection
pub fn selection_size_bytes(tree: &PackageTree) -> u64 {
    flatten_selection(tree)
        .iter()
        .filter_map(|name| tree.descriptor(name))
        .map(|d| d.size)
        .sum()
}

/// One-line description, e.g. `zsh 5.9 (6.1 MB): The Z shell`
pub fn package_info(tree: &PackageTree, name: &str) -> Option<String> {
    let desc = tree.descriptor(name)?;
    let mut info = desc.name.clone();
    if !desc.version.is_empty() {
        info.push(' ');
        info.push_str(&desc.version);
    }
    if desc.size > 0 {
        info.push_str(&format!(" ({})", bytes_to_human(desc.size)));
    }
    if !desc.description.is_empty() {
        info.push_str(": ");
        info.push_str(&desc.description);
    }
    Some(info)
}

// ============================================================================
// Shells
// ============================================================================

/// Login shells a user may pick: selected catalog shells, then base shells
pub fn available_shells(tree: &PackageTree) -> Vec<String> {
    let selected = flatten_selection(tree);
    let mut shells: Vec<String> = SHELL_PREFERENCE
        .iter()
        .filter(|shell| selected.iter().any(|p| p == *shell))
        .map(|shell| shell_path(shell))
        .collect();
    shells.extend(BASE_SHELLS.iter().map(|s| s.to_string()));
    shells
}

/// Default login shell candidates for new users, most preferred first.
/// Never empty: `/bin/sh` alone when no preferred shell is selected.
pub fn default_user_shell(tree: &PackageTree) -> Vec<String> {
    let selected = flatten_selection(tree);
    let shells: Vec<String> = SHELL_PREFERENCE
        .iter()
        .filter(|shell| selected.iter().any(|p| p == *shell))
        .map(|shell| shell_path(shell))
        .collect();
    if shells.is_empty() {
        vec![FALLBACK_SHELL.to_string()]
    } else {
        shells
    }
}
