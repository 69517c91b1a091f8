// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Clock provider interface and scoped producer handles.
// Author: Lukas Bower

//! Clock framework seam.
//!
//! A [`ClockProvider`] turns a parsed clock specifier into a [`Clk`] handle,
//! reports the handle's current rate and takes it back through `put`.
//! Callers hold handles through [`ClkGuard`] so that every acquisition is
//! released exactly once, even on early return.

pub mod fixed;
pub mod parent;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::devicetree::{DeviceTree, NodeId, PhandleArgs};

/// Value emitted in reports when a producer has no known rate.
pub const UNKNOWN_RATE: i64 = -1;

/// Errors returned by clock provider lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClkError {
    /// No provider is registered for the referenced node.
    #[error("no clock provider registered for {path}")]
    NotFound {
        /// Path of the referenced node.
        path: String,
    },
    /// The provider exists but does not publish the requested output.
    #[error("{path} has no clock output {index}")]
    InvalidIndex {
        /// Path of the provider node.
        path: String,
        /// Requested output index.
        index: u32,
    },
}

/// Current frequency of a clock output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rate {
    /// Known frequency in hertz.
    Hz(u64),
    /// The provider could not report a frequency.
    Unknown,
}

impl Rate {
    /// Frequency in hertz when known.
    #[must_use]
    pub const fn hz(self) -> Option<u64> {
        match self {
            Self::Hz(hz) => Some(hz),
            Self::Unknown => None,
        }
    }

    /// Integer written to reports; unknown rates map to [`UNKNOWN_RATE`].
    #[must_use]
    pub fn report_value(self) -> i64 {
        match self {
            Self::Hz(hz) => i64::try_from(hz).unwrap_or(i64::MAX),
            Self::Unknown => UNKNOWN_RATE,
        }
    }

    /// Inverse of [`Rate::report_value`]; negative values are unknown.
    #[must_use]
    pub fn from_report_value(value: i64) -> Self {
        u64::try_from(value).map_or(Self::Unknown, Self::Hz)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.report_value())
    }
}

/// Handle to one output of a registered clock provider.
///
/// Not `Clone`: a handle is consumed by [`ClockProvider::put`].
#[derive(Debug, PartialEq, Eq)]
pub struct Clk {
    provider: NodeId,
    index: u32,
}

impl Clk {
    /// Mint a handle for `index` on the provider node. Only providers should call this.
    pub fn new(provider: NodeId, index: u32) -> Self {
        Self { provider, index }
    }

    /// Provider node.
    #[must_use]
    pub fn provider(&self) -> NodeId {
        self.provider
    }

    /// Output index at the provider.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Platform clock framework consulted during resolution.
pub trait ClockProvider {
    /// Look up the clock output referenced by `spec`.
    fn get(&self, spec: &PhandleArgs) -> Result<Clk, ClkError>;

    /// Current rate of the output.
    fn rate(&self, clk: &Clk) -> Rate;

    /// Registered name of the output, if the provider names it.
    fn name(&self, clk: &Clk) -> Option<String>;

    /// Release a handle obtained from [`ClockProvider::get`].
    fn put(&self, clk: Clk);
}

impl<T: ClockProvider + ?Sized> ClockProvider for Arc<T> {
    fn get(&self, spec: &PhandleArgs) -> Result<Clk, ClkError> {
        (**self).get(spec)
    }

    fn rate(&self, clk: &Clk) -> Rate {
        (**self).rate(clk)
    }

    fn name(&self, clk: &Clk) -> Option<String> {
        (**self).name(clk)
    }

    fn put(&self, clk: Clk) {
        (**self).put(clk)
    }
}

/// Scoped producer handle; the clock is returned to its provider on drop.
pub struct ClkGuard<'p> {
    provider: &'p dyn ClockProvider,
    clk: Option<Clk>,
}

impl<'p> ClkGuard<'p> {
    /// Acquire the output referenced by `spec`.
    pub fn acquire(provider: &'p dyn ClockProvider, spec: &PhandleArgs) -> Result<Self, ClkError> {
        let clk = provider.get(spec)?;
        Ok(Self {
            provider,
            clk: Some(clk),
        })
    }

    /// Borrow the held handle.
    #[must_use]
    pub fn clk(&self) -> Option<&Clk> {
        self.clk.as_ref()
    }

    /// Current rate of the held output.
    #[must_use]
    pub fn rate(&self) -> Rate {
        self.clk
            .as_ref()
            .map_or(Rate::Unknown, |clk| self.provider.rate(clk))
    }

    /// Registered name of the held output.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.clk.as_ref().and_then(|clk| self.provider.name(clk))
    }
}

impl Drop for ClkGuard<'_> {
    fn drop(&mut self) {
        if let Some(clk) = self.clk.take() {
            self.provider.put(clk);
        }
    }
}

/// Map a requested published index to the producer's storage slot.
///
/// Without a `clock-indices` property the index is its own slot. With one,
/// the slot is the position of the matching entry; `None` when no entry
/// matches.
#[must_use]
pub fn clock_slot(tree: &DeviceTree, producer: NodeId, requested: u32) -> Option<u32> {
    match tree.property(producer, "clock-indices") {
        None => Some(requested),
        Some(indices) => indices
            .cells()
            .position(|published| published == requested)
            .and_then(|slot| u32::try_from(slot).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;

    struct CountingProvider {
        gets: Cell<usize>,
        puts: Cell<usize>,
    }

    impl ClockProvider for CountingProvider {
        fn get(&self, spec: &PhandleArgs) -> Result<Clk, ClkError> {
            self.gets.set(self.gets.get() + 1);
            Ok(Clk::new(spec.node(), spec.first_arg().unwrap_or(0)))
        }

        fn rate(&self, clk: &Clk) -> Rate {
            Rate::Hz(u64::from(clk.index()) * 1_000)
        }

        fn name(&self, _clk: &Clk) -> Option<String> {
            None
        }

        fn put(&self, _clk: Clk) {
            self.puts.set(self.puts.get() + 1);
        }
    }

    #[test]
    fn guard_releases_on_drop() {
        let tree = DeviceTree::new();
        let provider = CountingProvider {
            gets: Cell::new(0),
            puts: Cell::new(0),
        };
        let spec = PhandleArgs::new(tree.root(), &[3]);
        {
            let guard = ClkGuard::acquire(&provider, &spec).expect("acquire");
            assert_eq!(guard.rate(), Rate::Hz(3_000));
            assert_eq!(provider.puts.get(), 0);
        }
        assert_eq!(provider.gets.get(), 1);
        assert_eq!(provider.puts.get(), 1);
    }

    #[test]
    fn report_values_round_trip() {
        assert_eq!(Rate::Hz(24_000_000).report_value(), 24_000_000);
        assert_eq!(Rate::Unknown.report_value(), UNKNOWN_RATE);
        assert_eq!(Rate::from_report_value(-1), Rate::Unknown);
        assert_eq!(Rate::from_report_value(54), Rate::Hz(54));
        assert_eq!(Rate::Hz(u64::MAX).report_value(), i64::MAX);
    }

    #[test]
    fn clock_indices_remap_to_storage_slot() {
        let mut tree = DeviceTree::new();
        let root = tree.root();
        assert_eq!(clock_slot(&tree, root, 7), Some(7));
        tree.set_u32s(root, "clock-indices", &[4, 9, 2]);
        assert_eq!(clock_slot(&tree, root, 9), Some(1));
        assert_eq!(clock_slot(&tree, root, 2), Some(2));
        assert_eq!(clock_slot(&tree, root, 5), None);
        tree.set_u32s(root, "clock-indices", &[]);
        assert_eq!(clock_slot(&tree, root, 0), None);
    }
}
