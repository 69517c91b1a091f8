// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Read-only device tree model with phandle and property helpers.
// Author: Lukas Bower

//! In-memory device tree.
//!
//! Nodes live in an arena owned by [`DeviceTree`] and are addressed through
//! [`NodeId`]. The tree is populated once, either through the builder methods
//! or from a flattened blob via [`DeviceTree::from_fdt`], and is only read
//! afterwards.

pub mod fdt;
mod phandle;

use std::collections::HashMap;
use std::str;

use thiserror::Error;

pub use phandle::{PhandleArgs, MAX_PHANDLE_ARGS};

/// Errors raised when reading properties or resolving phandle references.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The requested property does not exist on the node.
    #[error("{path}: property '{name}' missing")]
    MissingProperty {
        /// Path of the queried node.
        path: String,
        /// Property name.
        name: String,
    },
    /// The property payload does not match the expected encoding.
    #[error("{path}: property '{name}' malformed")]
    Malformed {
        /// Path of the queried node.
        path: String,
        /// Property name.
        name: String,
    },
    /// The requested list index lies beyond the end of the property.
    #[error("{path}: index {index} out of range for '{name}'")]
    OutOfRange {
        /// Path of the queried node.
        path: String,
        /// Property name.
        name: String,
        /// Requested index.
        index: usize,
    },
    /// A phandle value did not match any node.
    #[error("phandle 0x{0:x} does not resolve to a node")]
    UnknownPhandle(u32),
    /// The referenced node declared more argument cells than supported.
    #[error("{path}: specifier declares {count} cells")]
    TooManyArgs {
        /// Path of the referenced node.
        path: String,
        /// Declared cell count.
        count: u32,
    },
    /// The requested entry is an empty (`phandle = 0`) placeholder.
    #[error("{path}: entry {index} of '{name}' is empty")]
    EmptyEntry {
        /// Path of the queried node.
        path: String,
        /// Property name.
        name: String,
        /// Requested index.
        index: usize,
    },
}

/// Handle to a node stored in a [`DeviceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node inside the owning arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Named property holding a raw big-endian payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: String,
    value: Vec<u8>,
}

impl Property {
    /// Construct a property from its name and raw payload.
    pub fn new(name: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// First cell of the payload, if at least four bytes are present.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        self.cells().next()
    }

    /// Payload read as a 64-bit value; single-cell payloads are widened.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self.value.len() {
            4 => self.as_u32().map(u64::from),
            8 => {
                let mut cells = self.cells();
                let hi = u64::from(cells.next()?);
                let lo = u64::from(cells.next()?);
                Some((hi << 32) | lo)
            }
            _ => None,
        }
    }

    /// Iterate over the payload as big-endian 32-bit cells.
    ///
    /// Trailing bytes that do not form a whole cell are ignored.
    pub fn cells(&self) -> impl Iterator<Item = u32> + '_ {
        self.value
            .chunks_exact(4)
            .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    /// Number of whole cells in the payload.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.value.len() / 4
    }

    /// Split a string-list payload into its NUL-terminated members.
    #[must_use]
    pub fn strings(&self) -> Vec<&str> {
        if self.value.is_empty() {
            return Vec::new();
        }
        let body = self.value.strip_suffix(&[0u8]).unwrap_or(&self.value[..]);
        body.split(|&byte| byte == 0)
            .map(|chunk| str::from_utf8(chunk).unwrap_or(""))
            .collect()
    }
}

/// Device tree node.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    path: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    properties: Vec<Property>,
}

impl Node {
    /// Node name including any unit address (`serial@7e201000`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the node.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Parent node, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child nodes in insertion order.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Properties in insertion order.
    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Lookup a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|prop| prop.name == name)
    }
}

/// Arena-backed device tree with a phandle index.
#[derive(Debug, Clone)]
pub struct DeviceTree {
    nodes: Vec<Node>,
    phandles: HashMap<u32, NodeId>,
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTree {
    /// Create a tree holding only the root node `/`.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: String::new(),
                path: "/".to_owned(),
                parent: None,
                children: Vec::new(),
                properties: Vec::new(),
            }],
            phandles: HashMap::new(),
        }
    }

    /// The root node.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`; the root node is created with the tree.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Borrow a node.
    ///
    /// Panics when `id` was minted by a different tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Append a child node under `parent` and return its handle.
    pub fn add_node(&mut self, parent: NodeId, name: &str) -> NodeId {
        let parent_path = &self.nodes[parent.0].path;
        let path = if parent_path == "/" {
            format!("/{name}")
        } else {
            format!("{parent_path}/{name}")
        };
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_owned(),
            path,
            parent: Some(parent),
            children: Vec::new(),
            properties: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Insert or replace a property, keeping the phandle index current.
    pub fn set_property(&mut self, node: NodeId, name: &str, value: Vec<u8>) {
        if name == "phandle" || name == "linux,phandle" {
            if let Some(handle) = first_cell(&value) {
                self.phandles.insert(handle, node);
            }
        }
        let props = &mut self.nodes[node.0].properties;
        match props.iter_mut().find(|prop| prop.name == name) {
            Some(existing) => existing.value = value,
            None => props.push(Property::new(name, value)),
        }
    }

    /// Store a single-cell property.
    pub fn set_u32(&mut self, node: NodeId, name: &str, value: u32) {
        self.set_property(node, name, value.to_be_bytes().to_vec());
    }

    /// Store a multi-cell property.
    pub fn set_u32s(&mut self, node: NodeId, name: &str, values: &[u32]) {
        let bytes = values.iter().flat_map(|cell| cell.to_be_bytes()).collect();
        self.set_property(node, name, bytes);
    }

    /// Store a string-list property.
    pub fn set_strings(&mut self, node: NodeId, name: &str, values: &[&str]) {
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend_from_slice(value.as_bytes());
            bytes.push(0);
        }
        self.set_property(node, name, bytes);
    }

    /// Borrow a property of `node`.
    #[must_use]
    pub fn property(&self, node: NodeId, name: &str) -> Option<&Property> {
        self.node(node).property(name)
    }

    /// Resolve a phandle value to its node.
    #[must_use]
    pub fn find_by_phandle(&self, phandle: u32) -> Option<NodeId> {
        self.phandles.get(&phandle).copied()
    }

    /// Resolve an absolute path such as `/soc/serial@7e201000`.
    #[must_use]
    pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root();
        for component in path.split('/').filter(|part| !part.is_empty()) {
            current = self
                .node(current)
                .children
                .iter()
                .copied()
                .find(|child| self.node(*child).name == component)?;
        }
        Some(current)
    }

    /// Visit every node once, parents before children, siblings in insertion order.
    pub fn all_nodes(&self) -> AllNodes<'_> {
        AllNodes {
            tree: self,
            stack: vec![self.root()],
        }
    }

    /// Read the first cell of a property.
    pub fn read_u32(&self, node: NodeId, name: &str) -> Result<u32, TreeError> {
        let prop = self.require(node, name)?;
        prop.as_u32().ok_or_else(|| self.malformed(node, name))
    }

    /// Read the `index`-th member of a string-list property.
    pub fn read_string_index(
        &self,
        node: NodeId,
        name: &str,
        index: usize,
    ) -> Result<&str, TreeError> {
        let prop = self.require(node, name)?;
        prop.strings()
            .get(index)
            .copied()
            .ok_or_else(|| TreeError::OutOfRange {
                path: self.node(node).path.clone(),
                name: name.to_owned(),
                index,
            })
    }

    /// Parse the `index`-th `<phandle args...>` specifier of `list_name`.
    ///
    /// The argument count of every entry comes from `cells_name` on the node
    /// the entry points at. A zero phandle is an empty slot that consumes an
    /// index but carries no arguments.
    pub fn parse_phandle_with_args(
        &self,
        node: NodeId,
        list_name: &str,
        cells_name: &str,
        index: usize,
    ) -> Result<PhandleArgs, TreeError> {
        let list = self.require(node, list_name)?;
        if list.value().len() % 4 != 0 {
            return Err(self.malformed(node, list_name));
        }
        let cells: Vec<u32> = list.cells().collect();

        let mut pos = 0;
        let mut current = 0;
        while pos < cells.len() {
            let handle = cells[pos];
            pos += 1;

            let mut target = None;
            let mut count = 0usize;
            if handle != 0 {
                let provider = self
                    .find_by_phandle(handle)
                    .ok_or(TreeError::UnknownPhandle(handle))?;
                let declared = self.read_u32(provider, cells_name)?;
                if declared as usize > MAX_PHANDLE_ARGS {
                    return Err(TreeError::TooManyArgs {
                        path: self.node(provider).path.clone(),
                        count: declared,
                    });
                }
                count = declared as usize;
                if pos + count > cells.len() {
                    return Err(self.malformed(node, list_name));
                }
                target = Some(provider);
            }

            if current == index {
                let provider = target.ok_or_else(|| TreeError::EmptyEntry {
                    path: self.node(node).path.clone(),
                    name: list_name.to_owned(),
                    index,
                })?;
                return Ok(PhandleArgs::new(provider, &cells[pos..pos + count]));
            }

            pos += count;
            current += 1;
        }

        Err(TreeError::OutOfRange {
            path: self.node(node).path.clone(),
            name: list_name.to_owned(),
            index,
        })
    }

    fn require(&self, node: NodeId, name: &str) -> Result<&Property, TreeError> {
        self.property(node, name)
            .ok_or_else(|| TreeError::MissingProperty {
                path: self.node(node).path.clone(),
                name: name.to_owned(),
            })
    }

    fn malformed(&self, node: NodeId, name: &str) -> TreeError {
        TreeError::Malformed {
            path: self.node(node).path.clone(),
            name: name.to_owned(),
        }
    }
}

/// Pre-order iterator returned by [`DeviceTree::all_nodes`].
pub struct AllNodes<'a> {
    tree: &'a DeviceTree,
    stack: Vec<NodeId>,
}

impl Iterator for AllNodes<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.node(id).children.iter().rev().copied());
        Some(id)
    }
}

fn first_cell(value: &[u8]) -> Option<u32> {
    match value {
        [a, b, c, d, ..] => Some(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_tree() -> (DeviceTree, NodeId, NodeId, NodeId) {
        let mut tree = DeviceTree::new();
        let root = tree.root();
        let osc = tree.add_node(root, "osc");
        tree.set_u32(osc, "#clock-cells", 0);
        tree.set_u32(osc, "phandle", 1);
        let cprman = tree.add_node(root, "cprman@7e101000");
        tree.set_u32(cprman, "#clock-cells", 1);
        tree.set_u32(cprman, "phandle", 2);
        let uart = tree.add_node(root, "serial@7e201000");
        (tree, osc, cprman, uart)
    }

    #[test]
    fn paths_are_absolute() {
        let mut tree = DeviceTree::new();
        let soc = tree.add_node(tree.root(), "soc");
        let uart = tree.add_node(soc, "serial@7e201000");
        assert_eq!(tree.node(tree.root()).path(), "/");
        assert_eq!(tree.node(uart).path(), "/soc/serial@7e201000");
        assert_eq!(tree.find_by_path("/soc/serial@7e201000"), Some(uart));
        assert_eq!(tree.find_by_path("/"), Some(tree.root()));
        assert_eq!(tree.find_by_path("/soc/missing"), None);
    }

    #[test]
    fn all_nodes_is_preorder() {
        let mut tree = DeviceTree::new();
        let root = tree.root();
        let a = tree.add_node(root, "a");
        let b = tree.add_node(root, "b");
        let a1 = tree.add_node(a, "a1");
        let b1 = tree.add_node(b, "b1");
        let a2 = tree.add_node(a, "a2");
        let order: Vec<NodeId> = tree.all_nodes().collect();
        assert_eq!(order, vec![root, a, a1, a2, b, b1]);
    }

    #[test]
    fn string_lists_split_on_nul() {
        let mut tree = DeviceTree::new();
        let root = tree.root();
        tree.set_strings(root, "clock-output-names", &["pllc", "plld"]);
        assert_eq!(tree.read_string_index(root, "clock-output-names", 1), Ok("plld"));
        assert!(matches!(
            tree.read_string_index(root, "clock-output-names", 2),
            Err(TreeError::OutOfRange { index: 2, .. })
        ));
    }

    #[test]
    fn wide_properties_read_as_u64() {
        let mut tree = DeviceTree::new();
        let root = tree.root();
        tree.set_u32s(root, "clock-frequency", &[0x1, 0x0000_0002]);
        let prop = tree.property(root, "clock-frequency").unwrap();
        assert_eq!(prop.as_u64(), Some(0x1_0000_0002));
    }

    #[test]
    fn phandle_args_follow_cell_counts() {
        let (mut tree, osc, cprman, uart) = provider_tree();
        tree.set_u32s(uart, "clocks", &[2, 19, 1, 2, 20]);

        let first = tree
            .parse_phandle_with_args(uart, "clocks", "#clock-cells", 0)
            .unwrap();
        assert_eq!(first.node(), cprman);
        assert_eq!(first.args(), &[19]);

        let second = tree
            .parse_phandle_with_args(uart, "clocks", "#clock-cells", 1)
            .unwrap();
        assert_eq!(second.node(), osc);
        assert!(second.args().is_empty());

        let third = tree
            .parse_phandle_with_args(uart, "clocks", "#clock-cells", 2)
            .unwrap();
        assert_eq!(third.first_arg(), Some(20));

        assert!(matches!(
            tree.parse_phandle_with_args(uart, "clocks", "#clock-cells", 3),
            Err(TreeError::OutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn empty_slot_consumes_an_index() {
        let (mut tree, osc, _, uart) = provider_tree();
        tree.set_u32s(uart, "clocks", &[0, 1]);
        assert!(matches!(
            tree.parse_phandle_with_args(uart, "clocks", "#clock-cells", 0),
            Err(TreeError::EmptyEntry { index: 0, .. })
        ));
        let spec = tree
            .parse_phandle_with_args(uart, "clocks", "#clock-cells", 1)
            .unwrap();
        assert_eq!(spec.node(), osc);
    }

    #[test]
    fn truncated_specifier_is_malformed() {
        let (mut tree, _, _, uart) = provider_tree();
        tree.set_u32s(uart, "clocks", &[2]);
        assert!(matches!(
            tree.parse_phandle_with_args(uart, "clocks", "#clock-cells", 0),
            Err(TreeError::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_phandle_is_reported() {
        let (mut tree, _, _, uart) = provider_tree();
        tree.set_u32s(uart, "clocks", &[9]);
        assert_eq!(
            tree.parse_phandle_with_args(uart, "clocks", "#clock-cells", 0),
            Err(TreeError::UnknownPhandle(9))
        );
    }

    #[test]
    fn provider_without_cells_property_fails() {
        let (mut tree, _, _, uart) = provider_tree();
        let bare = tree.add_node(tree.root(), "bare");
        tree.set_u32(bare, "linux,phandle", 7);
        tree.set_u32s(uart, "clocks", &[7]);
        assert!(matches!(
            tree.parse_phandle_with_args(uart, "clocks", "#clock-cells", 0),
            Err(TreeError::MissingProperty { ref name, .. }) if name == "#clock-cells"
        ));
    }
}
