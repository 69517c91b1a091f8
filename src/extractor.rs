// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Register the clock report file and tear it down again.
// Author: Lukas Bower

use std::fmt;
use std::sync::Arc;

use log::{info, warn};

use crate::clk::fixed::DtClockFramework;
use crate::clk::parent::{OfParentNames, ParentNameLookup};
use crate::clk::ClockProvider;
use crate::config::{ExtractConfig, MountConfig, ReportConfig};
use crate::devicetree::DeviceTree;
use crate::diagfs::{Dentry, DiagFs, FsError, ShowAttribute};
use crate::report::TopologyReporter;

/// Permission bits of the report file.
pub const REPORT_FILE_MODE: u16 = 0o444;

/// Device tree plus the clock collaborators needed to render a report.
pub struct ClockTopology {
    tree: Arc<DeviceTree>,
    clocks: Box<dyn ClockProvider>,
    parents: Box<dyn ParentNameLookup>,
    config: ReportConfig,
}

impl ClockTopology {
    /// Bundle a tree with explicit collaborators.
    pub fn new(
        tree: Arc<DeviceTree>,
        clocks: Box<dyn ClockProvider>,
        parents: Box<dyn ParentNameLookup>,
        config: ReportConfig,
    ) -> Self {
        Self {
            tree,
            clocks,
            parents,
            config,
        }
    }

    /// Host clock framework and standard parent naming, configured from `config`.
    pub fn from_config(tree: Arc<DeviceTree>, config: &ExtractConfig) -> Self {
        let clocks = DtClockFramework::with_rates(Arc::clone(&tree), &config.rates);
        Self::new(
            tree,
            Box::new(clocks),
            Box::new(OfParentNames),
            config.report.clone(),
        )
    }

    /// Reporter borrowing this topology.
    #[must_use]
    pub fn reporter(&self) -> TopologyReporter<'_> {
        TopologyReporter::new(
            &self.tree,
            self.clocks.as_ref(),
            self.parents.as_ref(),
            &self.config,
        )
    }
}

impl ShowAttribute for ClockTopology {
    fn show(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.reporter().write_report(out)
    }
}

/// Live registration of the report file; hand it back to [`ClockExtractor::unload`].
#[derive(Debug)]
pub struct ClockExtractor {
    dir: Dentry,
    file: Dentry,
}

impl ClockExtractor {
    /// Create `/<dir>/<file>` in `fs`, serving reports of `topology`.
    ///
    /// When the file cannot be created the directory is removed again before
    /// the error is returned.
    pub fn load(
        fs: &mut DiagFs,
        mount: &MountConfig,
        topology: ClockTopology,
    ) -> Result<Self, FsError> {
        let dir = fs.create_dir(&mount.dir, None)?;
        let file = match fs.create_file(&mount.file, REPORT_FILE_MODE, Some(&dir), Box::new(topology)) {
            Ok(file) => file,
            Err(err) => {
                warn!("cannot create {}/{}: {err}", dir.path(), mount.file);
                if let Err(cleanup) = fs.remove_recursive(&dir) {
                    warn!("rollback of {} failed: {cleanup}", dir.path());
                }
                return Err(err);
            }
        };
        info!("clock report available at {}", file.path());
        Ok(Self { dir, file })
    }

    /// Absolute path of the report file.
    #[must_use]
    pub fn file_path(&self) -> String {
        self.file.path()
    }

    /// Absolute path of the mount directory.
    #[must_use]
    pub fn dir_path(&self) -> String {
        self.dir.path()
    }

    /// Remove the mount directory and everything below it.
    pub fn unload(self, fs: &mut DiagFs) -> Result<(), FsError> {
        info!("removing clock report {}", self.file.path());
        fs.remove_recursive(&self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::report::mapping::ClockMapping;

    fn topology() -> ClockTopology {
        let mut tree = DeviceTree::new();
        let osc = tree.add_node(tree.root(), "osc");
        tree.set_strings(osc, "compatible", &["fixed-clock"]);
        tree.set_u32(osc, "#clock-cells", 0);
        tree.set_u32(osc, "clock-frequency", 19_200_000);
        tree.set_u32(osc, "phandle", 1);
        let timer = tree.add_node(tree.root(), "timer");
        tree.set_u32s(timer, "clocks", &[1]);
        ClockTopology::from_config(Arc::new(tree), &ExtractConfig::default())
    }

    #[test]
    fn load_read_unload() {
        let mut fs = DiagFs::new();
        let extractor = ClockExtractor::load(&mut fs, &MountConfig::default(), topology()).unwrap();
        assert_eq!(extractor.file_path(), "/autojail/clocks");
        assert_eq!(fs.mode("/autojail/clocks").unwrap(), REPORT_FILE_MODE);

        let report = fs.open("/autojail/clocks").unwrap();
        let mapping = ClockMapping::parse(report.as_str()).unwrap();
        let inputs = mapping.get("/timer").expect("/timer entry");
        assert_eq!(inputs[0].parent_name.as_deref(), Some("osc"));

        extractor.unload(&mut fs).unwrap();
        assert!(!fs.exists("/autojail"));
        assert_eq!(fs.entry_count(), 0);
    }

    #[test]
    fn failed_file_creation_rolls_back_directory() {
        let mut fs = DiagFs::with_capacity(1);
        let err = ClockExtractor::load(&mut fs, &MountConfig::default(), topology()).unwrap_err();
        assert_eq!(err, FsError::NoSpace("/autojail/clocks".to_owned()));
        assert!(!fs.exists("/autojail"));
    }

    #[test]
    fn second_load_collides() {
        let mut fs = DiagFs::new();
        let first = ClockExtractor::load(&mut fs, &MountConfig::default(), topology()).unwrap();
        let err = ClockExtractor::load(&mut fs, &MountConfig::default(), topology()).unwrap_err();
        assert_eq!(err, FsError::Exists("/autojail".to_owned()));
        first.unload(&mut fs).unwrap();
    }
}
