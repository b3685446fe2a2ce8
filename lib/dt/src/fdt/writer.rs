//! Sequential flattened device tree writer.
//!
//! Nodes are emitted in document order: `begin_node`, properties, children, `end_node`. The
//! first node opened is the root and must be named `""`.
use super::{FdtError, FdtHeader, FdtToken, FlatTree};
use alloc::{boxed::Box, vec::Vec};
use utils::endian::push_be32;

pub struct FdtWriter {
    structure: Vec<u8>,
    strings: Vec<u8>,
    string_offsets: Vec<(Box<str>, u32)>,
    reservations: Vec<(u64, u64)>,
    depth: usize,
    roots: usize,
    boot_cpuid: u32,
}

impl FdtWriter {
    pub fn new() -> FdtWriter {
        FdtWriter {
            structure: Vec::new(),
            strings: Vec::new(),
            string_offsets: Vec::new(),
            reservations: Vec::new(),
            depth: 0,
            roots: 0,
            boot_cpuid: 0,
        }
    }

    fn pad(&mut self) {
        while self.structure.len() % 4 != 0 {
            self.structure.push(0);
        }
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        if let Some((_, off)) = self.string_offsets.iter().find(|(s, _)| s.as_ref() == name) {
            return *off;
        }
        let off = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        self.string_offsets.push((Box::from(name), off));
        off
    }

    pub fn set_boot_cpuid(&mut self, cpuid: u32) {
        self.boot_cpuid = cpuid;
    }

    pub fn add_reservation(&mut self, addr: u64, size: u64) {
        self.reservations.push((addr, size));
    }

    pub fn begin_node(&mut self, name: &str) {
        if self.depth == 0 {
            self.roots += 1;
        }
        push_be32(&mut self.structure, FdtToken::BeginNode as u32);
        self.structure.extend_from_slice(name.as_bytes());
        self.structure.push(0);
        self.pad();
        self.depth += 1;
    }

    pub fn end_node(&mut self) {
        push_be32(&mut self.structure, FdtToken::EndNode as u32);
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn property(&mut self, name: &str, data: &[u8]) {
        let name_off = self.string_offset(name);
        push_be32(&mut self.structure, FdtToken::Prop as u32);
        push_be32(&mut self.structure, data.len() as u32);
        push_be32(&mut self.structure, name_off);
        self.structure.extend_from_slice(data);
        self.pad();
    }

    pub fn property_u32(&mut self, name: &str, value: u32) {
        self.property(name, &value.to_be_bytes());
    }

    pub fn property_u64(&mut self, name: &str, value: u64) {
        self.property(name, &value.to_be_bytes());
    }

    pub fn property_u32_array(&mut self, name: &str, values: &[u32]) {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.property(name, &data);
    }

    pub fn property_string(&mut self, name: &str, value: &str) {
        self.property_strings(name, &[value]);
    }

    pub fn property_strings(&mut self, name: &str, values: &[&str]) {
        let mut data = Vec::new();
        for value in values {
            data.extend_from_slice(value.as_bytes());
            data.push(0);
        }
        self.property(name, &data);
    }

    /// An empty property, read back as boolean `true`.
    pub fn property_flag(&mut self, name: &str) {
        self.property(name, &[]);
    }

    /// Assemble the blob: header, reservation map, structure block, strings block.
    pub fn finish(mut self) -> Result<Vec<u8>, FdtError> {
        if self.depth != 0 || self.roots != 1 {
            return Err(FdtError::Unbalanced);
        }
        push_be32(&mut self.structure, FdtToken::End as u32);

        let off_mem_rsvmap = FdtHeader::SIZE;
        let rsv_size = (self.reservations.len() + 1) * 16;
        let off_dt_struct = off_mem_rsvmap + rsv_size;
        let off_dt_strings = off_dt_struct + self.structure.len();
        let totalsize = off_dt_strings + self.strings.len();

        let mut blob = Vec::with_capacity(totalsize);
        for word in [
            FlatTree::FDT_MAGIC,
            totalsize as u32,
            off_dt_struct as u32,
            off_dt_strings as u32,
            off_mem_rsvmap as u32,
            FlatTree::FDT_VERSION,
            FlatTree::LAST_COMP_VERSION,
            self.boot_cpuid,
            self.strings.len() as u32,
            self.structure.len() as u32,
        ] {
            push_be32(&mut blob, word);
        }
        for (addr, size) in self.reservations.iter().chain(core::iter::once(&(0, 0))) {
            blob.extend_from_slice(&addr.to_be_bytes());
            blob.extend_from_slice(&size.to_be_bytes());
        }
        blob.extend_from_slice(&self.structure);
        blob.extend_from_slice(&self.strings);
        Ok(blob)
    }
}

impl Default for FdtWriter {
    fn default() -> Self {
        Self::new()
    }
}
