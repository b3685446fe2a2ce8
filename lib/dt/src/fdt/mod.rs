//! This module provides functionalities to resolve a flattened device tree

use alloc::vec::Vec;
use core::{fmt, ops::Range, str};
use log::debug;
use num_enum::TryFromPrimitive;
use utils::{
    endian::{read_be32, read_be64},
    num::AlignableTo,
};

pub mod reader;
pub mod writer;

/// Decoded Flattened Device Tree header.
///
/// The blob stores these fields as big-endian 32-bit words, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdtHeader {
    pub magic: u32,
    pub totalsize: u32,
    pub off_dt_struct: u32,
    pub off_dt_strings: u32,
    pub off_mem_rsvmap: u32,
    pub version: u32,
    pub last_comp_version: u32,
    pub boot_cpuid_phys: u32,
    pub size_dt_strings: u32,
    pub size_dt_struct: u32,
}

impl FdtHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 40;

    fn parse(blob: &[u8]) -> Result<FdtHeader, FdtError> {
        let word = |idx: usize| read_be32(blob, idx * 4).ok_or(FdtError::Truncated { offset: idx * 4 });
        Ok(FdtHeader {
            magic: word(0)?,
            totalsize: word(1)?,
            off_dt_struct: word(2)?,
            off_dt_strings: word(3)?,
            off_mem_rsvmap: word(4)?,
            version: word(5)?,
            last_comp_version: word(6)?,
            boot_cpuid_phys: word(7)?,
            size_dt_strings: word(8)?,
            size_dt_struct: word(9)?,
        })
    }
}

/// Tokens found in the FDT structure block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum FdtToken {
    /// Begin a node (followed by its name string)
    BeginNode = 0x01,
    /// End a node
    EndNode = 0x02,
    /// A property entry (length, nameoff, data)
    Prop = 0x03,
    /// No-op padding word
    Nop = 0x04,
    /// End of the structure block
    End = 0x09,
}

/// A validated flattened device tree.
///
/// Nodes are addressed by their byte offset inside the structure block, so a node reference is
/// a plain integer. The whole structure block is checked once in [FlatTree::new]; the walkers
/// below still bound-check every access and answer `None` rather than panic.
pub struct FlatTree {
    blob: &'static [u8],
    header: FdtHeader,
    root: usize,
}

impl FlatTree {
    /// Expected FDT magic number (0xd00dfeed).
    pub const FDT_MAGIC: u32 = 0xd00dfeed;
    /// The FDT version this parser targets.
    pub const FDT_VERSION: u32 = 17;
    /// The last compatible FDT version accepted by this parser.
    pub const LAST_COMP_VERSION: u32 = 16;

    /// Validate `blob` and wrap it.
    pub fn new(blob: &'static [u8]) -> Result<FlatTree, FdtError> {
        let header = FdtHeader::parse(blob)?;

        // 1. Check the magic number
        if header.magic != Self::FDT_MAGIC {
            return Err(FdtError::InvalidMagic {
                magic: header.magic as usize,
            });
        }

        // 2. Check the fdt version. We use version 17, and the last compatible version is 16
        if header.version < Self::LAST_COMP_VERSION
            || header.last_comp_version > Self::FDT_VERSION
        {
            return Err(FdtError::IncompatibleVersion {
                version: header.version as usize,
            });
        }

        // 3. Every block must sit inside the blob
        let total = header.totalsize as usize;
        if total > blob.len() {
            return Err(FdtError::Truncated { offset: blob.len() });
        }
        let struct_end = header.off_dt_struct as usize + header.size_dt_struct as usize;
        let strings_end = header.off_dt_strings as usize + header.size_dt_strings as usize;
        if struct_end > total || strings_end > total || header.off_mem_rsvmap as usize > total {
            return Err(FdtError::Truncated { offset: total });
        }

        let mut tree = FlatTree {
            blob: &blob[..total],
            header,
            root: 0,
        };
        tree.root = tree.validate_structure()?;
        debug!(
            "FDT v{}: {} bytes, {} reserved regions.",
            header.version,
            total,
            tree.reserved_regions().len()
        );
        Ok(tree)
    }

    pub fn header(&self) -> &FdtHeader {
        &self.header
    }

    /// Offset of the root node.
    pub fn root(&self) -> usize {
        self.root
    }

    fn structure(&self) -> &'static [u8] {
        let start = self.header.off_dt_struct as usize;
        &self.blob[start..start + self.header.size_dt_struct as usize]
    }

    fn strings(&self) -> &'static [u8] {
        let start = self.header.off_dt_strings as usize;
        &self.blob[start..start + self.header.size_dt_strings as usize]
    }

    /// Read the NUL-terminated string starting at `offset` of `data`.
    fn cstr_at(data: &'static [u8], offset: usize) -> Option<&'static str> {
        let tail = data.get(offset..)?;
        let len = tail.iter().position(|b| *b == 0)?;
        str::from_utf8(&tail[..len]).ok()
    }

    /// Decode the token at `offset` and return it with the offset of the token that follows.
    fn token_at(&self, offset: usize) -> Option<(FdtToken, usize)> {
        let data = self.structure();
        let token = FdtToken::try_from(read_be32(data, offset)?).ok()?;
        let next = match token {
            FdtToken::BeginNode => {
                let name = Self::cstr_at(data, offset + 4)?;
                (offset + 4 + name.len() + 1).align_up(4)
            }
            FdtToken::Prop => {
                let len = read_be32(data, offset + 4)? as usize;
                (offset + 12 + len).align_up(4)
            }
            FdtToken::EndNode | FdtToken::Nop | FdtToken::End => offset + 4,
        };
        Some((token, next))
    }

    fn skip_nops(&self, mut offset: usize) -> Option<(FdtToken, usize)> {
        loop {
            let (token, next) = self.token_at(offset)?;
            if token != FdtToken::Nop {
                return Some((token, offset));
            }
            offset = next;
        }
    }

    /// Walk the complete structure block once, checking nesting, string references and the
    /// final `FDT_END`. Returns the root node offset.
    fn validate_structure(&self) -> Result<usize, FdtError> {
        let invalid = |offset: usize| FdtError::Truncated { offset };
        let (token, root) = self.skip_nops(0).ok_or(invalid(0))?;
        if token != FdtToken::BeginNode {
            return Err(FdtError::InvalidNodeType {
                node_type: token as usize,
                cursor: root,
            });
        }
        let mut depth = 0usize;
        let mut offset = root;
        loop {
            let (token, next) = self.token_at(offset).ok_or(invalid(offset))?;
            match token {
                FdtToken::BeginNode => depth += 1,
                FdtToken::EndNode => {
                    if depth == 0 {
                        return Err(FdtError::InvalidNodeType {
                            node_type: token as usize,
                            cursor: offset,
                        });
                    }
                    depth -= 1;
                }
                FdtToken::Prop => {
                    let len = read_be32(self.structure(), offset + 4).ok_or(invalid(offset))?;
                    let name_off = read_be32(self.structure(), offset + 8).ok_or(invalid(offset))?;
                    if offset + 12 + len as usize > self.structure().len() {
                        return Err(invalid(offset));
                    }
                    Self::cstr_at(self.strings(), name_off as usize)
                        .ok_or(FdtError::BadString { offset: name_off as usize })?;
                }
                FdtToken::Nop => {}
                FdtToken::End => {
                    if depth != 0 {
                        return Err(FdtError::InvalidNodeType {
                            node_type: token as usize,
                            cursor: offset,
                        });
                    }
                    return Ok(root);
                }
            }
            offset = next;
        }
    }

    /// The node name including its unit address; the root node has an empty name.
    pub fn name(&self, node: usize) -> Option<&'static str> {
        Self::cstr_at(self.structure(), node + 4)
    }

    /// Iterate the properties of `node` as `(name, data)` pairs.
    pub fn properties(&self, node: usize) -> FlatPropIter<'_> {
        let cursor = self.token_at(node).map(|(_, next)| next);
        FlatPropIter { tree: self, cursor }
    }

    pub fn get_property(&self, node: usize, name: &str) -> Option<&'static [u8]> {
        self.properties(node)
            .find(|(prop, _)| *prop == name)
            .map(|(_, data)| data)
    }

    pub fn first_subnode(&self, node: usize) -> Option<usize> {
        let (_, mut offset) = self.token_at(node)?;
        loop {
            let (token, next) = self.token_at(offset)?;
            match token {
                FdtToken::Prop | FdtToken::Nop => offset = next,
                FdtToken::BeginNode => return Some(offset),
                _ => return None,
            }
        }
    }

    /// Offset just past the `FDT_END_NODE` that closes `node`.
    fn node_end(&self, node: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut offset = node;
        loop {
            let (token, next) = self.token_at(offset)?;
            match token {
                FdtToken::BeginNode => depth += 1,
                FdtToken::EndNode => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(next);
                    }
                }
                FdtToken::End => return None,
                _ => {}
            }
            offset = next;
        }
    }

    pub fn next_subnode(&self, node: usize) -> Option<usize> {
        let (token, offset) = self.skip_nops(self.node_end(node)?)?;
        (token == FdtToken::BeginNode).then_some(offset)
    }

    /// Every node offset in document order.
    pub fn nodes(&self) -> Vec<usize> {
        let mut res = Vec::new();
        let mut offset = self.root;
        while let Some((token, next)) = self.token_at(offset) {
            match token {
                FdtToken::BeginNode => res.push(offset),
                FdtToken::End => break,
                _ => {}
            }
            offset = next;
        }
        res
    }

    /// Find the parent of `node` by walking from the root. The root has no parent.
    pub fn parent(&self, node: usize) -> Option<usize> {
        let mut stack: Vec<usize> = Vec::new();
        let mut offset = self.root;
        while let Some((token, next)) = self.token_at(offset) {
            match token {
                FdtToken::BeginNode => {
                    if offset == node {
                        return stack.last().copied();
                    }
                    stack.push(offset);
                }
                FdtToken::EndNode => {
                    stack.pop();
                }
                FdtToken::End => break,
                _ => {}
            }
            offset = next;
        }
        None
    }

    pub fn subnode(&self, node: usize, name: &str) -> Option<usize> {
        let mut child = self.first_subnode(node);
        let mut by_base = None;
        while let Some(offset) = child {
            let child_name = self.name(offset)?;
            if child_name == name {
                return Some(offset);
            }
            if by_base.is_none() && child_name.split('@').next() == Some(name) {
                by_base = Some(offset);
            }
            child = self.next_subnode(offset);
        }
        by_base
    }

    /// Resolve an absolute path such as `/soc/uart@1000`.
    pub fn path_offset(&self, path: &str) -> Option<usize> {
        let mut node = self.root;
        for section in path.split('/') {
            if section.trim().is_empty() {
                continue;
            }
            node = self.subnode(node, section)?;
        }
        Some(node)
    }

    pub fn node_by_phandle(&self, phandle: u32) -> Option<usize> {
        self.nodes().into_iter().find(|node| {
            self.get_property(*node, "phandle")
                .or_else(|| self.get_property(*node, "linux,phandle"))
                .and_then(|data| read_be32(data, 0))
                == Some(phandle)
        })
    }

    /// The memory reservation map, as `start..end` ranges.
    pub fn reserved_regions(&self) -> Vec<Range<u64>> {
        let mut res = Vec::new();
        let mut offset = self.header.off_mem_rsvmap as usize;
        while let (Some(addr), Some(size)) = (read_be64(self.blob, offset), read_be64(self.blob, offset + 8)) {
            if addr == 0 && size == 0 {
                break;
            }
            res.push(addr..addr + size);
            offset += 16;
        }
        res
    }
}

/// Iterator over the properties of one flat node.
pub struct FlatPropIter<'a> {
    tree: &'a FlatTree,
    cursor: Option<usize>,
}

impl Iterator for FlatPropIter<'_> {
    type Item = (&'static str, &'static [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let offset = self.cursor?;
            let (token, next) = self.tree.token_at(offset)?;
            match token {
                FdtToken::Nop => self.cursor = Some(next),
                FdtToken::Prop => {
                    self.cursor = Some(next);
                    let data = self.tree.structure();
                    let len = read_be32(data, offset + 4)? as usize;
                    let name_off = read_be32(data, offset + 8)? as usize;
                    let name = FlatTree::cstr_at(self.tree.strings(), name_off)?;
                    let value = data.get(offset + 12..offset + 12 + len)?;
                    return Some((name, value));
                }
                _ => {
                    self.cursor = None;
                    return None;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdtError {
    InvalidNodeType { node_type: usize, cursor: usize },
    InvalidMagic { magic: usize },
    IncompatibleVersion { version: usize },
    Truncated { offset: usize },
    BadString { offset: usize },
    Unbalanced,
}

impl fmt::Display for FdtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdtError::InvalidNodeType { node_type, cursor } => {
                write!(f, "unexpected token {:#x} at {:#x}", node_type, cursor)
            }
            FdtError::InvalidMagic { magic } => write!(f, "bad magic {:#x}", magic),
            FdtError::IncompatibleVersion { version } => write!(f, "unsupported version {}", version),
            FdtError::Truncated { offset } => write!(f, "blob truncated at {:#x}", offset),
            FdtError::BadString { offset } => write!(f, "bad string reference {:#x}", offset),
            FdtError::Unbalanced => f.write_str("unbalanced node nesting"),
        }
    }
}
