// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Resolve a node's clock inputs to producers and their current rates.
// Author: Lukas Bower

use log::trace;

use crate::clk::{clock_slot, ClkGuard, ClockProvider, Rate};
use crate::devicetree::{DeviceTree, NodeId};

/// One resolved clock input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedClock {
    /// Node publishing the clock.
    pub producer: NodeId,
    /// Storage slot at the producer after `clock-indices` remapping.
    pub slot: u32,
    /// Rate reported by the clock framework.
    pub rate: Rate,
}

/// Resolve up to `max_count` clock inputs of `node`, in declaration order.
///
/// Resolution stops at the first input whose specifier cannot be parsed,
/// whose requested index is missing from the producer's `clock-indices`, or
/// whose producer is not registered with `clocks`. The entries gathered
/// before the stop are returned.
pub fn resolve_clocks(
    tree: &DeviceTree,
    clocks: &dyn ClockProvider,
    node: NodeId,
    max_count: usize,
) -> Vec<ResolvedClock> {
    let path = tree.node(node).path();
    let mut resolved = Vec::new();

    for input in 0..max_count {
        let spec = match tree.parse_phandle_with_args(node, "clocks", "#clock-cells", input) {
            Ok(spec) => spec,
            Err(err) => {
                if input > 0 || tree.property(node, "clocks").is_some() {
                    trace!("{path}: clock input {input} stops resolution: {err}");
                }
                break;
            }
        };

        let producer = spec.node();
        let requested = spec.first_arg().unwrap_or(0);
        let Some(slot) = clock_slot(tree, producer, requested) else {
            trace!(
                "{path}: index {requested} not published by {}",
                tree.node(producer).path()
            );
            break;
        };

        let guard = match ClkGuard::acquire(clocks, &spec) {
            Ok(guard) => guard,
            Err(err) => {
                trace!("{path}: clock input {input}: {err}");
                break;
            }
        };
        let rate = guard.rate();
        drop(guard);

        resolved.push(ResolvedClock {
            producer,
            slot,
            rate,
        });
    }

    resolved
}
