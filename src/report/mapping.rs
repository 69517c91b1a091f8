// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Parse captured clock reports back into an ordered node mapping.
// Author: Lukas Bower

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::clk::Rate;

/// One clock input of a node as read back from a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParentClockInfo {
    /// Name of the producer feeding the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    /// Rate of the input in hertz; `-1` marks an unknown rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<i64>,
}

impl ParentClockInfo {
    /// Typed view of the rate field.
    #[must_use]
    pub fn rate(&self) -> Option<Rate> {
        self.rate.map(Rate::from_report_value)
    }
}

/// Node path to clock inputs, in report order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockMapping {
    entries: Vec<(String, Vec<ParentClockInfo>)>,
}

impl ClockMapping {
    /// Parse report text.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Entries in report order.
    #[must_use]
    pub fn entries(&self) -> &[(String, Vec<ParentClockInfo>)] {
        &self.entries
    }

    /// Inputs recorded for `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&[ParentClockInfo]> {
        self.entries
            .iter()
            .find(|(node, _)| node == path)
            .map(|(_, inputs)| inputs.as_slice())
    }

    /// Number of nodes in the report.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the report listed no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten into `(path, parent_name, rate)` triples in report order.
    pub fn triples(&self) -> impl Iterator<Item = (&str, Option<&str>, Option<i64>)> + '_ {
        self.entries.iter().flat_map(|(path, inputs)| {
            inputs
                .iter()
                .map(move |info| (path.as_str(), info.parent_name.as_deref(), info.rate))
        })
    }
}

impl<'de> Deserialize<'de> for ClockMapping {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MappingVisitor;

        impl<'de> Visitor<'de> for MappingVisitor {
            type Value = ClockMapping;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of node paths to clock input lists")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((path, inputs)) = map.next_entry::<String, Vec<ParentClockInfo>>()? {
                    entries.push((path, inputs));
                }
                Ok(ClockMapping { entries })
            }
        }

        deserializer.deserialize_map(MappingVisitor)
    }
}
