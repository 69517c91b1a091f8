// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Parsed `<phandle args...>` specifier.
// Author: Lukas Bower

use heapless::Vec as HeaplessVec;

use super::NodeId;

/// Maximum number of argument cells carried by a single specifier.
pub const MAX_PHANDLE_ARGS: usize = 16;

/// A resolved reference to another node plus its argument cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhandleArgs {
    node: NodeId,
    args: HeaplessVec<u32, MAX_PHANDLE_ARGS>,
}

impl PhandleArgs {
    /// Build a specifier; cells beyond [`MAX_PHANDLE_ARGS`] are dropped.
    pub fn new(node: NodeId, args: &[u32]) -> Self {
        let mut stored = HeaplessVec::new();
        for &cell in args.iter().take(MAX_PHANDLE_ARGS) {
            let _ = stored.push(cell);
        }
        Self { node, args: stored }
    }

    /// Node the specifier points at.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Argument cells.
    #[must_use]
    pub fn args(&self) -> &[u32] {
        &self.args
    }

    /// Number of argument cells.
    #[must_use]
    pub fn args_count(&self) -> usize {
        self.args.len()
    }

    /// First argument cell, conventionally the requested output index.
    #[must_use]
    pub fn first_arg(&self) -> Option<u32> {
        self.args.first().copied()
    }
}
