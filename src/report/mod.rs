// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Stream the per-node clock parent report.
// Author: Lukas Bower

//! Topology report generation.
//!
//! The report is a JSON object keyed by node path. Every value is a list with
//! one object per clock input, carrying `parent_name` and/or `rate`:
//!
//! ```text
//! {
//! "/soc/serial@7e201000":
//!   [
//!     {"parent_name": "uart"},
//!     {"parent_name": "vpu"}
//!   ]
//! }
//! ```
//!
//! Output is written node by node while the tree is walked.

pub mod mapping;
pub mod scratch;

use std::fmt::{self, Write};
use std::io;

use log::debug;

use crate::clk::parent::ParentNameLookup;
use crate::clk::{ClockProvider, Rate};
use crate::config::ReportConfig;
use crate::devicetree::{DeviceTree, NodeId};
use crate::resolver::resolve_clocks;

use self::scratch::Scratch;

/// Capacity of the per-field formatting buffer.
pub const SCRATCH_CAPACITY: usize = 1024;

type FieldBuf = Scratch<SCRATCH_CAPACITY>;

/// Merged clock inputs of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    node: NodeId,
    parent_names: Vec<String>,
    rates: Vec<Rate>,
}

impl ReportEntry {
    /// Node the entry describes.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Parent names in input order.
    #[must_use]
    pub fn parent_names(&self) -> &[String] {
        &self.parent_names
    }

    /// Resolved rates in input order.
    #[must_use]
    pub fn rates(&self) -> &[Rate] {
        &self.rates
    }

    /// Number of sub-entries: the longer of the two lists.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.parent_names.len().max(self.rates.len())
    }

    /// Fields of sub-entry `index`.
    #[must_use]
    pub fn item(&self, index: usize) -> (Option<&str>, Option<Rate>) {
        (
            self.parent_names.get(index).map(String::as_str),
            self.rates.get(index).copied(),
        )
    }
}

/// Walks a device tree and renders its clock topology.
pub struct TopologyReporter<'a> {
    tree: &'a DeviceTree,
    clocks: &'a dyn ClockProvider,
    parents: &'a dyn ParentNameLookup,
    config: &'a ReportConfig,
}

impl<'a> TopologyReporter<'a> {
    /// Reporter over `tree` using the given collaborators.
    pub fn new(
        tree: &'a DeviceTree,
        clocks: &'a dyn ClockProvider,
        parents: &'a dyn ParentNameLookup,
        config: &'a ReportConfig,
    ) -> Self {
        Self {
            tree,
            clocks,
            parents,
            config,
        }
    }

    /// Merge parent names and rates for `node`; `None` when it has neither.
    ///
    /// Rates are only resolved when `resolve_frequencies` is enabled.
    #[must_use]
    pub fn entry(&self, node: NodeId) -> Option<ReportEntry> {
        let capacity = self.config.max_clocks;
        let parent_names = self
            .parents
            .parent_names(self.tree, self.clocks, node, capacity);
        let rates: Vec<Rate> = if self.config.resolve_frequencies {
            resolve_clocks(self.tree, self.clocks, node, capacity)
                .into_iter()
                .map(|clock| clock.rate)
                .collect()
        } else {
            Vec::new()
        };

        let entry = ReportEntry {
            node,
            parent_names,
            rates,
        };
        (entry.item_count() > 0).then_some(entry)
    }

    /// Every non-empty entry in walk order.
    pub fn entries(&self) -> impl Iterator<Item = ReportEntry> + '_ {
        self.tree.all_nodes().filter_map(move |node| self.entry(node))
    }

    /// Stream the report into `out`.
    pub fn write_report<W: Write + ?Sized>(&self, out: &mut W) -> fmt::Result {
        out.write_str("{\n")?;
        let mut first = true;
        for node in self.tree.all_nodes() {
            debug!("extracting from node {}", self.tree.node(node).path());
            let Some(entry) = self.entry(node) else {
                continue;
            };
            if !first {
                out.write_str(",\n")?;
            }
            first = false;
            self.write_entry(out, &entry)?;
        }
        out.write_str("\n}\n")
    }

    /// Stream the report into an I/O sink.
    pub fn write_report_io<W: io::Write>(&self, out: W) -> io::Result<()> {
        let mut adapter = IoAdapter {
            inner: out,
            error: None,
        };
        match self.write_report(&mut adapter) {
            Ok(()) => adapter.inner.flush(),
            Err(fmt::Error) => Err(adapter
                .error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "report formatting failed"))),
        }
    }

    /// Render the whole report into a string.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = String::new();
        let _ = self.write_report(&mut text);
        text
    }

    fn write_entry<W: Write + ?Sized>(&self, out: &mut W, entry: &ReportEntry) -> fmt::Result {
        let path = self.tree.node(entry.node).path();
        let header = FieldBuf::format(format_args!("\"{}\":\n", Escaped(path)));
        out.write_str(header.as_str())?;
        out.write_str("  [\n")?;

        let items = entry.item_count();
        for index in 0..items {
            out.write_str("    {")?;
            let (name, rate) = entry.item(index);
            if let Some(name) = name {
                let field = FieldBuf::format(format_args!("\"parent_name\": \"{}\"", Escaped(name)));
                out.write_str(field.as_str())?;
                if rate.is_some() {
                    out.write_str(", ")?;
                }
            }
            if let Some(rate) = rate {
                let field = FieldBuf::format(format_args!("\"rate\": {rate}"));
                out.write_str(field.as_str())?;
            }
            out.write_str(if index + 1 < items { "},\n" } else { "}\n" })?;
        }
        out.write_str("  ]")
    }
}

/// Escapes `"`, `\` and control characters for a JSON string body.
struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ch in self.0.chars() {
            match ch {
                '"' => f.write_str("\\\"")?,
                '\\' => f.write_str("\\\\")?,
                c if u32::from(c) < 0x20 => write!(f, "\\u{:04x}", u32::from(c))?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

struct IoAdapter<W> {
    inner: W,
    error: Option<io::Error>,
}

impl<W: io::Write> Write for IoAdapter<W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.inner.write_all(s.as_bytes()).map_err(|err| {
            self.error = Some(err);
            fmt::Error
        })
    }
}
