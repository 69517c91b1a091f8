// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Device-tree clock topology extraction and reporting.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Device-tree clock topology extraction.
//!
//! Walks every node of a flattened device tree, asks the clock framework
//! which producers feed each node's `clocks` inputs and publishes the result
//! as a JSON report in a read-only diagnostic file.
//!
//! ```
//! use std::sync::Arc;
//!
//! use clock_topology::{ClockExtractor, ClockTopology, DeviceTree, DiagFs, ExtractConfig};
//!
//! let mut tree = DeviceTree::new();
//! let osc = tree.add_node(tree.root(), "osc");
//! tree.set_strings(osc, "compatible", &["fixed-clock"]);
//! tree.set_u32(osc, "#clock-cells", 0);
//! tree.set_u32(osc, "clock-frequency", 19_200_000);
//! tree.set_u32(osc, "phandle", 1);
//! let uart = tree.add_node(tree.root(), "uart");
//! tree.set_u32s(uart, "clocks", &[1]);
//!
//! let config = ExtractConfig::default();
//! let topology = ClockTopology::from_config(Arc::new(tree), &config);
//! let mut fs = DiagFs::new();
//! let extractor = ClockExtractor::load(&mut fs, &config.mount, topology).unwrap();
//! let report = fs.open(&extractor.file_path()).unwrap();
//! assert!(report.as_str().contains("\"parent_name\": \"osc\""));
//! extractor.unload(&mut fs).unwrap();
//! ```

pub mod clk;
pub mod config;
pub mod devicetree;
pub mod diagfs;
pub mod extractor;
pub mod report;
pub mod resolver;

pub use clk::fixed::DtClockFramework;
pub use clk::parent::{OfParentNames, ParentNameLookup};
pub use clk::{Clk, ClkError, ClkGuard, ClockProvider, Rate, UNKNOWN_RATE};
pub use config::{ConfigError, ExtractConfig, MountConfig, RateEntry, ReportConfig};
pub use devicetree::fdt::FdtError;
pub use devicetree::{DeviceTree, NodeId, PhandleArgs, TreeError};
pub use diagfs::{DiagFs, FsError, SeqFile, ShowAttribute};
pub use extractor::{ClockExtractor, ClockTopology};
pub use report::mapping::{ClockMapping, ParentClockInfo};
pub use report::TopologyReporter;
pub use resolver::{resolve_clocks, ResolvedClock};
