//! The one-shot relocation fixup.
//!
//! When the image runs at a different address than it was linked for, every code and table
//! address recorded for the registries moves by the same offset. Calls never go through the
//! recorded values; the record only has to stay truthful, and it must be moved exactly once.
use crate::{
    driver::{Driver, DriverInfo, UclassDriver},
    error::{DmError, DmResult},
    model::Dm,
    uclass_id::UclassId,
};
use alloc::vec::Vec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverAddrs {
    pub name: &'static str,
    pub ops: Option<usize>,
    pub of_match: Option<usize>,
    pub hooks: [Option<usize>; 9],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UclassAddrs {
    pub id: UclassId,
    pub hooks: [Option<usize>; 9],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoAddrs {
    pub name: &'static str,
    pub plat: Option<usize>,
}

pub struct RelocTable {
    drivers: Vec<DriverAddrs>,
    uclasses: Vec<UclassAddrs>,
    infos: Vec<InfoAddrs>,
    applied: Option<isize>,
}

fn shift(addr: &mut Option<usize>, offset: isize) {
    if let Some(addr) = addr {
        *addr = addr.wrapping_add_signed(offset);
    }
}

impl RelocTable {
    pub(crate) fn record(
        drivers: &[&'static Driver],
        uclasses: &[&'static UclassDriver],
        infos: &[DriverInfo],
    ) -> RelocTable {
        RelocTable {
            drivers: drivers
                .iter()
                .map(|&d| DriverAddrs {
                    name: d.name,
                    ops: d.ops.addr(),
                    of_match: (!d.of_match.is_empty()).then(|| d.of_match.as_ptr() as usize),
                    hooks: d.hooks(),
                })
                .collect(),
            uclasses: uclasses
                .iter()
                .map(|u| UclassAddrs {
                    id: u.id,
                    hooks: u.hooks(),
                })
                .collect(),
            infos: infos
                .iter()
                .map(|i| InfoAddrs {
                    name: i.name,
                    plat: i.plat.map(|f| f as usize),
                })
                .collect(),
            applied: None,
        }
    }

    /// Move every recorded address by `offset`. Refused once an offset has been applied.
    pub fn apply(&mut self, offset: isize) -> DmResult {
        if self.applied.is_some() {
            return Err(DmError::AlreadyRelocated);
        }
        for d in self.drivers.iter_mut() {
            shift(&mut d.ops, offset);
            shift(&mut d.of_match, offset);
            d.hooks.iter_mut().for_each(|h| shift(h, offset));
        }
        for u in self.uclasses.iter_mut() {
            u.hooks.iter_mut().for_each(|h| shift(h, offset));
        }
        for i in self.infos.iter_mut() {
            shift(&mut i.plat, offset);
        }
        self.applied = Some(offset);
        Ok(())
    }

    /// The offset applied, if any.
    pub fn offset(&self) -> Option<isize> {
        self.applied
    }

    pub fn driver(&self, name: &str) -> Option<&DriverAddrs> {
        self.drivers.iter().find(|d| d.name == name)
    }

    pub fn drivers(&self) -> &[DriverAddrs] {
        &self.drivers
    }

    pub fn uclasses(&self) -> &[UclassAddrs] {
        &self.uclasses
    }

    pub fn infos(&self) -> &[InfoAddrs] {
        &self.infos
    }
}

impl Dm {
    /// Apply the relocation offset to the registries.
    ///
    /// Must run before the first bind; fails with [DmError::Busy] once any device exists and
    /// with [DmError::AlreadyRelocated] on a second call.
    pub fn relocate(&mut self, offset: isize) -> DmResult {
        if self.device_count() != 0 {
            return Err(DmError::Busy);
        }
        self.registry.reloc.apply(offset)?;
        debug_ex!("Relocated driver tables by {:#x}.", offset);
        Ok(())
    }
}
