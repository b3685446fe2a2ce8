//! Device records and their handles.
use crate::{
    driver::{Driver, DriverFlags, Storage},
    uclass_id::UclassId,
};
use alloc::{string::String, vec::Vec};
use bitflags::bitflags;
use core::fmt;
use dt::OfNode;

/// Handle to a device.
///
/// The generation counter makes handles to unbound devices stale: they never resolve again,
/// even once the arena slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

bitflags! {
    pub struct DeviceFlags: u32 {
        const BOUND = 1 << 0;
        const ACTIVATED = 1 << 1;
        /// `of_to_plat` has filled the `plat` block.
        const PLAT_VALID = 1 << 2;
        const PRE_RELOC = 1 << 3;
        const OS_PREPARE = 1 << 4;
        const ACTIVE_DMA = 1 << 5;
        const VITAL = 1 << 6;
        const PROBE_AFTER_BIND = 1 << 7;
    }
}

impl DeviceFlags {
    /// Flags a device inherits from its driver when it is bound.
    pub fn inherited(driver: DriverFlags) -> DeviceFlags {
        let mut flags = DeviceFlags::empty();
        for (from, to) in [
            (DriverFlags::PRE_RELOC, DeviceFlags::PRE_RELOC),
            (DriverFlags::OS_PREPARE, DeviceFlags::OS_PREPARE),
            (DriverFlags::ACTIVE_DMA, DeviceFlags::ACTIVE_DMA),
            (DriverFlags::VITAL, DeviceFlags::VITAL),
            (DriverFlags::PROBE_AFTER_BIND, DeviceFlags::PROBE_AFTER_BIND),
        ] {
            if driver.contains(from) {
                flags.insert(to);
            }
        }
        flags
    }
}

/// One device of the object graph.
pub struct Udevice {
    pub name: String,
    pub driver: &'static Driver,
    pub uclass_id: UclassId,
    pub parent: Option<DeviceId>,
    pub children: Vec<DeviceId>,
    pub node: Option<OfNode>,
    /// Tag of the match-table entry that bound this device.
    pub driver_data: usize,
    pub seq: Option<u32>,
    pub flags: DeviceFlags,
    pub(crate) plat: Option<Storage>,
    pub(crate) priv_: Option<Storage>,
    pub(crate) uclass_priv: Option<Storage>,
    pub(crate) parent_plat: Option<Storage>,
}

impl Udevice {
    pub fn is_active(&self) -> bool {
        self.flags.contains(DeviceFlags::ACTIVATED)
    }

    pub fn is_bound(&self) -> bool {
        self.flags.contains(DeviceFlags::BOUND)
    }

    pub fn has_plat(&self) -> bool {
        self.plat.is_some()
    }

    pub fn has_priv(&self) -> bool {
        self.priv_.is_some()
    }

    pub fn has_uclass_priv(&self) -> bool {
        self.uclass_priv.is_some()
    }

    pub fn has_parent_plat(&self) -> bool {
        self.parent_plat.is_some()
    }
}

impl fmt::Debug for Udevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Udevice")
            .field("name", &self.name)
            .field("driver", &self.driver.name)
            .field("uclass_id", &self.uclass_id)
            .field("seq", &self.seq)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Arena slot. `dev` is `None` while the slot is free.
pub(crate) struct Slot {
    pub(crate) generation: u32,
    pub(crate) dev: Option<Udevice>,
}
