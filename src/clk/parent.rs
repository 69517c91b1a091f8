// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Resolve the producer names feeding each clock input of a node.
// Author: Lukas Bower

use log::trace;

use super::{clock_slot, ClkGuard, ClockProvider};
use crate::devicetree::{DeviceTree, NodeId};

/// Source of per-input parent clock names.
pub trait ParentNameLookup {
    /// Names of the producers feeding `node`, one per clock input, at most
    /// `capacity` entries. The list ends at the first input that has no name.
    fn parent_names(
        &self,
        tree: &DeviceTree,
        clocks: &dyn ClockProvider,
        node: NodeId,
        capacity: usize,
    ) -> Vec<String>;
}

/// Parent-name lookup following the usual device tree naming rules.
///
/// For input `i` the specifier's requested index is remapped through the
/// producer's `clock-indices` and used to pick from `clock-output-names`.
/// When the producer names no outputs, the registered clock's name is used,
/// and failing that the producer node's name when the specifier carries no
/// arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfParentNames;

impl OfParentNames {
    /// Name of the producer feeding input `index` of `node`.
    pub fn parent_name(
        tree: &DeviceTree,
        clocks: &dyn ClockProvider,
        node: NodeId,
        index: usize,
    ) -> Option<String> {
        let spec = tree
            .parse_phandle_with_args(node, "clocks", "#clock-cells", index)
            .ok()?;
        let producer = spec.node();
        let requested = spec.first_arg().unwrap_or(0);
        let Some(slot) = clock_slot(tree, producer, requested) else {
            trace!(
                "{}: index {requested} missing from clock-indices of {}",
                tree.node(node).path(),
                tree.node(producer).path()
            );
            return None;
        };

        if let Ok(name) = tree.read_string_index(producer, "clock-output-names", slot as usize) {
            return Some(name.to_owned());
        }

        match ClkGuard::acquire(clocks, &spec) {
            Ok(clk) => clk.name(),
            Err(_) if spec.args_count() == 0 => Some(tree.node(producer).name().to_owned()),
            Err(err) => {
                trace!("{}: input {index} unnamed: {err}", tree.node(node).path());
                None
            }
        }
    }
}

impl ParentNameLookup for OfParentNames {
    fn parent_names(
        &self,
        tree: &DeviceTree,
        clocks: &dyn ClockProvider,
        node: NodeId,
        capacity: usize,
    ) -> Vec<String> {
        (0..capacity)
            .map_while(|index| Self::parent_name(tree, clocks, node, index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::clk::fixed::DtClockFramework;
    use crate::config::RateEntry;

    fn tree() -> DeviceTree {
        let mut tree = DeviceTree::new();
        let root = tree.root();

        let osc = tree.add_node(root, "osc");
        tree.set_strings(osc, "compatible", &["fixed-clock"]);
        tree.set_u32(osc, "#clock-cells", 0);
        tree.set_u32(osc, "clock-frequency", 54_000_000);
        tree.set_u32(osc, "phandle", 1);

        let plls = tree.add_node(root, "plls");
        tree.set_u32(plls, "#clock-cells", 1);
        tree.set_u32s(plls, "clock-indices", &[10, 20, 30]);
        tree.set_strings(plls, "clock-output-names", &["plla", "pllb", "pllc"]);
        tree.set_u32(plls, "phandle", 2);

        let gates = tree.add_node(root, "gates");
        tree.set_u32(gates, "#clock-cells", 1);
        tree.set_u32(gates, "phandle", 3);

        tree
    }

    fn names(tree: DeviceTree, clocks: &[u32], rates: &[RateEntry]) -> Vec<String> {
        let mut tree = tree;
        let dev = tree.add_node(tree.root(), "dev");
        tree.set_u32s(dev, "clocks", clocks);
        let tree = Arc::new(tree);
        let framework = DtClockFramework::with_rates(Arc::clone(&tree), rates);
        let names = OfParentNames.parent_names(&tree, &framework, dev, 64);
        assert_eq!(framework.outstanding(), 0);
        names
    }

    #[test]
    fn uses_node_name_for_cellless_provider() {
        assert_eq!(names(tree(), &[1], &[]), vec!["osc".to_owned()]);
    }

    #[test]
    fn remaps_through_clock_indices() {
        assert_eq!(
            names(tree(), &[2, 30, 2, 10], &[]),
            vec!["pllc".to_owned(), "plla".to_owned()]
        );
    }

    #[test]
    fn stops_at_unmapped_index() {
        assert_eq!(names(tree(), &[2, 20, 2, 25, 1], &[]), vec!["pllb".to_owned()]);
    }

    #[test]
    fn unnamed_provider_output_ends_the_list() {
        assert!(names(tree(), &[3, 4, 1], &[]).is_empty());
    }

    #[test]
    fn respects_capacity() {
        let mut tree = tree();
        let dev = tree.add_node(tree.root(), "dev");
        tree.set_u32s(dev, "clocks", &[1, 1, 1, 1]);
        let tree = Arc::new(tree);
        let framework = DtClockFramework::new(Arc::clone(&tree));
        assert_eq!(OfParentNames.parent_names(&tree, &framework, dev, 2).len(), 2);
    }
}
