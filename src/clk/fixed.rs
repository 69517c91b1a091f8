// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host-side clock framework derived from device tree clock providers.
// Author: Lukas Bower

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use super::{Clk, ClkError, ClkGuard, ClockProvider, Rate};
use crate::config::RateEntry;
use crate::devicetree::{DeviceTree, NodeId, PhandleArgs};

const MAX_FACTOR_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderKind {
    Fixed,
    FixedFactor,
    Table,
}

/// Clock framework backed by the providers a device tree describes.
///
/// Providers are registered for `fixed-clock` and `fixed-factor-clock`
/// nodes, plus any node named in the configured rate table. Every other
/// node referenced by a `clocks` property looks like an unbound provider and
/// yields [`ClkError::NotFound`].
pub struct DtClockFramework {
    tree: Arc<DeviceTree>,
    rates: HashMap<(NodeId, u32), u64>,
    outstanding: AtomicUsize,
    acquired: AtomicUsize,
}

impl DtClockFramework {
    /// Framework with no measured rates.
    pub fn new(tree: Arc<DeviceTree>) -> Self {
        Self::with_rates(tree, &[])
    }

    /// Framework that also publishes the supplied per-output rates.
    ///
    /// Entries naming a path absent from the tree are skipped with a warning.
    pub fn with_rates(tree: Arc<DeviceTree>, entries: &[RateEntry]) -> Self {
        let mut rates = HashMap::new();
        for entry in entries {
            match tree.find_by_path(&entry.provider) {
                Some(node) => {
                    rates.insert((node, entry.index), entry.hz);
                }
                None => warn!("rate table names unknown provider {}", entry.provider),
            }
        }
        debug!("clock framework registered {} table rates", rates.len());
        Self {
            tree,
            rates,
            outstanding: AtomicUsize::new(0),
            acquired: AtomicUsize::new(0),
        }
    }

    /// Handles currently held by callers.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Handles handed out since construction.
    #[must_use]
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    fn kind(&self, node: NodeId) -> Option<ProviderKind> {
        if let Some(compatible) = self.tree.property(node, "compatible") {
            let strings = compatible.strings();
            if strings.contains(&"fixed-clock") {
                return Some(ProviderKind::Fixed);
            }
            if strings.contains(&"fixed-factor-clock") {
                return Some(ProviderKind::FixedFactor);
            }
        }
        self.rates
            .keys()
            .any(|(provider, _)| *provider == node)
            .then_some(ProviderKind::Table)
    }

    fn compute_rate(&self, node: NodeId, index: u32, depth: usize) -> Rate {
        if let Some(&hz) = self.rates.get(&(node, index)) {
            return Rate::Hz(hz);
        }
        match self.kind(node) {
            Some(ProviderKind::Fixed) => self
                .tree
                .property(node, "clock-frequency")
                .and_then(|prop| prop.as_u64())
                .map_or(Rate::Unknown, Rate::Hz),
            Some(ProviderKind::FixedFactor) => self.factor_rate(node, depth),
            Some(ProviderKind::Table) | None => Rate::Unknown,
        }
    }

    fn factor_rate(&self, node: NodeId, depth: usize) -> Rate {
        if depth >= MAX_FACTOR_DEPTH {
            warn!(
                "{}: fixed-factor chain deeper than {MAX_FACTOR_DEPTH}",
                self.tree.node(node).path()
            );
            return Rate::Unknown;
        }
        let (Ok(mult), Ok(div)) = (
            self.tree.read_u32(node, "clock-mult"),
            self.tree.read_u32(node, "clock-div"),
        ) else {
            return Rate::Unknown;
        };
        if div == 0 {
            return Rate::Unknown;
        }
        let Ok(spec) = self
            .tree
            .parse_phandle_with_args(node, "clocks", "#clock-cells", 0)
        else {
            return Rate::Unknown;
        };
        let Ok(parent) = ClkGuard::acquire(self, &spec) else {
            return Rate::Unknown;
        };
        let Some(clk) = parent.clk() else {
            return Rate::Unknown;
        };
        match self.compute_rate(clk.provider(), clk.index(), depth + 1) {
            Rate::Hz(hz) => hz
                .checked_mul(u64::from(mult))
                .map_or(Rate::Unknown, |scaled| Rate::Hz(scaled / u64::from(div))),
            Rate::Unknown => Rate::Unknown,
        }
    }
}

impl ClockProvider for DtClockFramework {
    fn get(&self, spec: &PhandleArgs) -> Result<Clk, ClkError> {
        let node = spec.node();
        let path = || self.tree.node(node).path().to_owned();
        let kind = self.kind(node).ok_or_else(|| ClkError::NotFound { path: path() })?;
        let index = spec.first_arg().unwrap_or(0);
        let published = match kind {
            ProviderKind::Fixed | ProviderKind::FixedFactor => {
                index == 0 || self.rates.contains_key(&(node, index))
            }
            ProviderKind::Table => self.rates.contains_key(&(node, index)),
        };
        if !published {
            return Err(ClkError::InvalidIndex {
                path: path(),
                index,
            });
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(Clk::new(node, index))
    }

    fn rate(&self, clk: &Clk) -> Rate {
        self.compute_rate(clk.provider(), clk.index(), 0)
    }

    fn name(&self, clk: &Clk) -> Option<String> {
        let node = clk.provider();
        let index = clk.index() as usize;
        if let Ok(name) = self.tree.read_string_index(node, "clock-output-names", index) {
            return Some(name.to_owned());
        }
        (clk.index() == 0).then(|| self.tree.node(node).name().to_owned())
    }

    fn put(&self, _clk: Clk) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |held| held.checked_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_tree() -> Arc<DeviceTree> {
        let mut tree = DeviceTree::new();
        let root = tree.root();

        let osc = tree.add_node(root, "osc");
        tree.set_strings(osc, "compatible", &["fixed-clock"]);
        tree.set_u32(osc, "#clock-cells", 0);
        tree.set_u32(osc, "clock-frequency", 54_000_000);
        tree.set_strings(osc, "clock-output-names", &["osc"]);
        tree.set_u32(osc, "phandle", 1);

        let half = tree.add_node(root, "half");
        tree.set_strings(half, "compatible", &["fixed-factor-clock"]);
        tree.set_u32(half, "#clock-cells", 0);
        tree.set_u32s(half, "clocks", &[1]);
        tree.set_u32(half, "clock-mult", 1);
        tree.set_u32(half, "clock-div", 2);
        tree.set_u32(half, "phandle", 2);

        let cprman = tree.add_node(root, "cprman@7e101000");
        tree.set_strings(cprman, "compatible", &["brcm,bcm2711-cprman"]);
        tree.set_u32(cprman, "#clock-cells", 1);
        tree.set_u32(cprman, "phandle", 3);

        Arc::new(tree)
    }

    fn spec(tree: &DeviceTree, path: &str, args: &[u32]) -> PhandleArgs {
        PhandleArgs::new(tree.find_by_path(path).unwrap(), args)
    }

    #[test]
    fn fixed_clock_reports_frequency() {
        let tree = clock_tree();
        let framework = DtClockFramework::new(Arc::clone(&tree));
        let clk = framework.get(&spec(&tree, "/osc", &[])).unwrap();
        assert_eq!(framework.rate(&clk), Rate::Hz(54_000_000));
        assert_eq!(framework.name(&clk).as_deref(), Some("osc"));
        framework.put(clk);
        assert_eq!(framework.outstanding(), 0);
        assert_eq!(framework.acquired(), 1);
    }

    #[test]
    fn fixed_factor_scales_parent() {
        let tree = clock_tree();
        let framework = DtClockFramework::new(Arc::clone(&tree));
        let clk = framework.get(&spec(&tree, "/half", &[])).unwrap();
        assert_eq!(framework.rate(&clk), Rate::Hz(27_000_000));
        assert_eq!(framework.name(&clk).as_deref(), Some("half"));
        framework.put(clk);
        assert_eq!(framework.outstanding(), 0);
    }

    #[test]
    fn unbound_provider_is_not_found() {
        let tree = clock_tree();
        let framework = DtClockFramework::new(Arc::clone(&tree));
        let err = framework
            .get(&spec(&tree, "/cprman@7e101000", &[19]))
            .unwrap_err();
        assert!(matches!(err, ClkError::NotFound { .. }));
        assert_eq!(framework.outstanding(), 0);
    }

    #[test]
    fn rate_table_registers_provider_outputs() {
        let tree = clock_tree();
        let entries = [RateEntry {
            provider: "/cprman@7e101000".to_owned(),
            index: 19,
            hz: 48_000_000,
        }];
        let framework = DtClockFramework::with_rates(Arc::clone(&tree), &entries);
        let clk = framework
            .get(&spec(&tree, "/cprman@7e101000", &[19]))
            .unwrap();
        assert_eq!(framework.rate(&clk), Rate::Hz(48_000_000));
        assert_eq!(framework.name(&clk), None);
        framework.put(clk);

        let err = framework
            .get(&spec(&tree, "/cprman@7e101000", &[20]))
            .unwrap_err();
        assert_eq!(
            err,
            ClkError::InvalidIndex {
                path: "/cprman@7e101000".to_owned(),
                index: 20
            }
        );
    }

    #[test]
    fn fixed_clock_without_frequency_is_unknown() {
        let mut tree = DeviceTree::new();
        let osc = tree.add_node(tree.root(), "osc");
        tree.set_strings(osc, "compatible", &["fixed-clock"]);
        let tree = Arc::new(tree);
        let framework = DtClockFramework::new(Arc::clone(&tree));
        let clk = framework.get(&spec(&tree, "/osc", &[])).unwrap();
        assert_eq!(framework.rate(&clk), Rate::Unknown);
        framework.put(clk);
    }
}
