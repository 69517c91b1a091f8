// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Flattened device tree parsing into the in-memory model.
// Author: Lukas Bower

use std::mem::size_of;
use std::ops::Range;
use std::str;

use log::trace;
use thiserror::Error;

use super::{DeviceTree, NodeId};

const FDT_MAGIC: u32 = 0xD00D_FEED;
const FDT_HEADER_LEN: usize = 10 * size_of::<u32>();
const FDT_PROP_MAX_LEN: usize = 4 << 20;

const FDT_BEGIN_NODE: u32 = 0x0000_0001;
const FDT_END_NODE: u32 = 0x0000_0002;
const FDT_PROP: u32 = 0x0000_0003;
const FDT_NOP: u32 = 0x0000_0004;
const FDT_END: u32 = 0x0000_0009;

/// Errors encountered when parsing a flattened device tree blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FdtError {
    /// Fewer bytes than a header.
    #[error("DTB shorter than header")]
    TooShort,
    /// Magic is not `0xd00dfeed`.
    #[error("DTB magic mismatch")]
    BadMagic,
    /// An offset or size points outside `totalsize`.
    #[error("DTB section exceeds bounds")]
    Bounds,
    /// The structure block ends mid-token.
    #[error("DTB structure truncated")]
    Truncated,
    /// A name runs off the end of its block without a NUL.
    #[error("DTB string missing terminator")]
    UnterminatedString,
    /// A name is not valid UTF-8.
    #[error("DTB string invalid UTF-8")]
    BadString,
    /// A property payload exceeds the 4 MiB cap.
    #[error("DTB property too large")]
    PropertyTooLarge,
    /// Unknown structure token.
    #[error("DTB token 0x{0:08x} invalid")]
    InvalidToken(u32),
    /// `FDT_END` or `FDT_END_NODE` at the wrong depth.
    #[error("DTB structure ended prematurely")]
    UnexpectedEnd,
    /// A property appeared outside of any node.
    #[error("DTB property outside of a node")]
    OrphanProperty,
    /// A second top-level node followed the root.
    #[error("DTB declares more than one root node")]
    MultipleRoots,
}

/// Header fields needed to locate the blob's blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdtHeader {
    totalsize: u32,
    off_dt_struct: u32,
    off_dt_strings: u32,
    size_dt_struct: u32,
    size_dt_strings: u32,
}

impl FdtHeader {
    /// Declared blob length.
    #[must_use]
    pub fn totalsize(&self) -> usize {
        self.totalsize as usize
    }

    /// Where the structure block starts.
    #[must_use]
    pub fn structure_offset(&self) -> usize {
        self.off_dt_struct as usize
    }

    /// Where the strings block starts.
    #[must_use]
    pub fn strings_offset(&self) -> usize {
        self.off_dt_strings as usize
    }
}

/// Blob whose header and block bounds were checked.
pub struct Fdt<'a> {
    header: FdtHeader,
    blob: &'a [u8],
    structure_range: Range<usize>,
    strings_range: Range<usize>,
}

impl<'a> Fdt<'a> {
    /// Header of the blob.
    #[must_use]
    pub fn header(&self) -> FdtHeader {
        self.header
    }

    /// Structure block bytes.
    #[must_use]
    pub fn structure_block(&self) -> &'a [u8] {
        &self.blob[self.structure_range.clone()]
    }

    /// Strings block bytes.
    #[must_use]
    pub fn strings_block(&self) -> &'a [u8] {
        &self.blob[self.strings_range.clone()]
    }

    /// Cursor positioned at the first structure token.
    #[must_use]
    pub fn structure_cursor(&self) -> StructureCursor<'a> {
        StructureCursor::new(self.structure_block(), self.strings_block())
    }
}

fn read_be_u32(blob: &[u8], offset: usize) -> Result<u32, FdtError> {
    let end = offset.checked_add(size_of::<u32>()).ok_or(FdtError::Bounds)?;
    match blob.get(offset..end) {
        Some(&[a, b, c, d]) => Ok(u32::from_be_bytes([a, b, c, d])),
        _ => Err(FdtError::TooShort),
    }
}

fn bounded_range(len: usize, offset: u32, size: u32) -> Result<Range<usize>, FdtError> {
    let start = usize::try_from(offset).map_err(|_| FdtError::Bounds)?;
    let span = usize::try_from(size).map_err(|_| FdtError::Bounds)?;
    let end = start.checked_add(span).ok_or(FdtError::Bounds)?;
    if end > len {
        return Err(FdtError::Bounds);
    }
    Ok(start..end)
}

/// Validate the FDT header at the start of `blob`.
pub fn parse_fdt(blob: &[u8]) -> Result<Fdt<'_>, FdtError> {
    if blob.len() < FDT_HEADER_LEN {
        return Err(FdtError::TooShort);
    }

    let magic = read_be_u32(blob, 0)?;
    if magic != FDT_MAGIC {
        return Err(FdtError::BadMagic);
    }

    let totalsize = read_be_u32(blob, 4)?;
    let off_dt_struct = read_be_u32(blob, 8)?;
    let off_dt_strings = read_be_u32(blob, 12)?;
    let size_dt_strings = read_be_u32(blob, 32)?;
    let size_dt_struct = read_be_u32(blob, 36)?;

    let header = FdtHeader {
        totalsize,
        off_dt_struct,
        off_dt_strings,
        size_dt_struct,
        size_dt_strings,
    };

    let blob_len = usize::try_from(totalsize).map_err(|_| FdtError::Bounds)?;
    if blob_len == 0 || blob_len > blob.len() {
        return Err(FdtError::Bounds);
    }

    let structure_range = bounded_range(blob_len, off_dt_struct, size_dt_struct)?;
    let strings_range = bounded_range(blob_len, off_dt_strings, size_dt_strings)?;

    Ok(Fdt {
        header,
        blob: &blob[..blob_len],
        structure_range,
        strings_range,
    })
}

fn align_up(value: usize, align: usize) -> Result<usize, FdtError> {
    if align == 0 || !align.is_power_of_two() {
        return Err(FdtError::Bounds);
    }
    let mask = align - 1;
    value
        .checked_add(mask)
        .map(|aligned| aligned & !mask)
        .ok_or(FdtError::Bounds)
}

fn read_cstr(blob: &[u8], offset: usize) -> Result<&str, FdtError> {
    let tail = blob.get(offset..).filter(|tail| !tail.is_empty()).ok_or(FdtError::Bounds)?;
    let len = tail
        .iter()
        .position(|&byte| byte == 0)
        .ok_or(FdtError::UnterminatedString)?;
    str::from_utf8(&tail[..len]).map_err(|_| FdtError::BadString)
}

/// Token reader over a structure block.
pub struct StructureCursor<'a> {
    structure: &'a [u8],
    strings: &'a [u8],
    offset: usize,
    finished: bool,
    depth: usize,
}

/// Item read by [`StructureCursor`].
#[derive(Debug, PartialEq, Eq)]
pub enum StructureItem<'a> {
    /// `FDT_BEGIN_NODE` with the node's unit name.
    BeginNode(&'a str),
    /// A node has ended.
    EndNode,
    /// `FDT_PROP` with its name looked up in the strings block.
    Property {
        /// Property name from the strings block.
        name: &'a str,
        /// Raw payload.
        value: &'a [u8],
    },
}

impl<'a> StructureCursor<'a> {
    const ALIGNMENT: usize = 4;

    fn new(structure: &'a [u8], strings: &'a [u8]) -> Self {
        Self {
            structure,
            strings,
            offset: 0,
            finished: false,
            depth: 0,
        }
    }

    fn read_u32(&self, offset: usize) -> Result<u32, FdtError> {
        match read_be_u32(self.structure, offset) {
            Err(FdtError::TooShort) => Err(FdtError::Truncated),
            other => other,
        }
    }

    fn align_offset(&mut self, value: usize) -> Result<(), FdtError> {
        self.offset = align_up(value, Self::ALIGNMENT)?;
        if self.offset > self.structure.len() {
            return Err(FdtError::Truncated);
        }
        Ok(())
    }

    /// Next node or property; `None` once `FDT_END` was read.
    pub fn next_item(&mut self) -> Result<Option<StructureItem<'a>>, FdtError> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if self.offset >= self.structure.len() {
                return Err(FdtError::Truncated);
            }

            let token = self.read_u32(self.offset)?;
            self.offset = self
                .offset
                .checked_add(size_of::<u32>())
                .ok_or(FdtError::Bounds)?;

            return match token {
                FDT_BEGIN_NODE => self.handle_begin_node(),
                FDT_END_NODE => self.handle_end_node(),
                FDT_PROP => self.handle_property(),
                FDT_NOP => continue,
                FDT_END => self.handle_end(),
                other => Err(FdtError::InvalidToken(other)),
            };
        }
    }

    fn handle_begin_node(&mut self) -> Result<Option<StructureItem<'a>>, FdtError> {
        let name_start = self.offset;
        let name_len = self.structure[name_start..]
            .iter()
            .position(|&byte| byte == 0)
            .ok_or(FdtError::UnterminatedString)?;
        let name_end = name_start.checked_add(name_len).ok_or(FdtError::Bounds)?;
        let name = str::from_utf8(&self.structure[name_start..name_end])
            .map_err(|_| FdtError::BadString)?;
        self.align_offset(name_end + 1)?;
        self.depth = self.depth.checked_add(1).ok_or(FdtError::Bounds)?;
        Ok(Some(StructureItem::BeginNode(name)))
    }

    fn handle_end_node(&mut self) -> Result<Option<StructureItem<'a>>, FdtError> {
        if self.depth == 0 {
            return Err(FdtError::UnexpectedEnd);
        }
        self.depth -= 1;
        Ok(Some(StructureItem::EndNode))
    }

    fn handle_property(&mut self) -> Result<Option<StructureItem<'a>>, FdtError> {
        let base = self.offset;
        let len_u32 = self.read_u32(base)?;
        let nameoff_u32 = self.read_u32(base + size_of::<u32>())?;
        self.offset = base
            .checked_add(2 * size_of::<u32>())
            .ok_or(FdtError::Bounds)?;

        let len = usize::try_from(len_u32).map_err(|_| FdtError::Bounds)?;
        if len > FDT_PROP_MAX_LEN {
            return Err(FdtError::PropertyTooLarge);
        }
        let nameoff = usize::try_from(nameoff_u32).map_err(|_| FdtError::Bounds)?;

        let data_end = self.offset.checked_add(len).ok_or(FdtError::Bounds)?;
        if data_end > self.structure.len() {
            return Err(FdtError::Truncated);
        }
        let name = read_cstr(self.strings, nameoff)?;
        let value = &self.structure[self.offset..data_end];
        self.align_offset(data_end)?;
        Ok(Some(StructureItem::Property { name, value }))
    }

    fn handle_end(&mut self) -> Result<Option<StructureItem<'a>>, FdtError> {
        if self.depth != 0 {
            return Err(FdtError::UnexpectedEnd);
        }
        self.finished = true;
        Ok(None)
    }
}

impl DeviceTree {
    /// Build a tree from a flattened device tree blob.
    ///
    /// The first node of the structure block becomes `/`; its name is ignored.
    pub fn from_fdt(blob: &[u8]) -> Result<Self, FdtError> {
        let fdt = parse_fdt(blob)?;
        let mut cursor = fdt.structure_cursor();
        let mut tree = DeviceTree::new();
        let mut open: Vec<NodeId> = Vec::new();
        let mut seen_root = false;

        while let Some(item) = cursor.next_item()? {
            match item {
                StructureItem::BeginNode(name) => {
                    let id = match open.last() {
                        Some(&parent) => tree.add_node(parent, name),
                        None if seen_root => return Err(FdtError::MultipleRoots),
                        None => {
                            seen_root = true;
                            tree.root()
                        }
                    };
                    open.push(id);
                }
                StructureItem::EndNode => {
                    open.pop();
                }
                StructureItem::Property { name, value } => {
                    let &node = open.last().ok_or(FdtError::OrphanProperty)?;
                    tree.set_property(node, name, value.to_vec());
                }
            }
        }

        trace!("parsed DTB with {} nodes", tree.len());
        Ok(tree)
    }
}
