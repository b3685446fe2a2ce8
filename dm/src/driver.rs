//! Static descriptors: drivers, uclass drivers and static device-info entries.
//!
//! Descriptors are plain `static` items. Optional fields are filled in with struct-update syntax
//! from [Driver::DEFAULT] / [UclassDriver::DEFAULT]:
//!
//! ```ignore
//! static MY_DRIVER: Driver = Driver {
//!     name: "my_gpio",
//!     id: UclassId::Gpio,
//!     of_match: &[UdeviceId::new("vendor,my-gpio")],
//!     ops: Ops::Gpio(&MyGpio),
//!     probe: Some(my_probe),
//!     ..Driver::DEFAULT
//! };
//! ```
use crate::{
    class::{gpio::GpioOps, i2c::I2cOps, regulator::RegulatorOps},
    device::DeviceId,
    error::DmResult,
    model::Dm,
    uclass_id::UclassId,
};
use alloc::boxed::Box;
use bitflags::bitflags;
use core::{any::Any, fmt, mem::size_of, ptr};

/// A type-erased storage block owned by one device or uclass instance.
pub type Storage = Box<dyn Any + Send>;

/// Per-device lifecycle callback.
pub type DevFn = fn(&mut Dm, DeviceId) -> DmResult;

/// Per-uclass-instance callback (`init` / `destroy`).
pub type UclassFn = fn(&mut Dm, UclassId) -> DmResult;

/// Declares that a storage block of type `T` is allocated automatically.
#[derive(Clone, Copy)]
pub struct Auto {
    pub size: usize,
    pub new: fn() -> Storage,
}

fn new_storage<T: Default + Send + 'static>() -> Storage {
    Box::new(T::default())
}

impl Auto {
    pub const fn of<T: Default + Send + 'static>() -> Auto {
        Auto {
            size: size_of::<T>(),
            new: new_storage::<T>,
        }
    }

    pub fn alloc(&self) -> Storage {
        (self.new)()
    }
}

impl fmt::Debug for Auto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Auto({} bytes)", self.size)
    }
}

/// One `compatible` string handled by a driver, with the tag stored in the bound device.
#[derive(Debug, Clone, Copy)]
pub struct UdeviceId {
    pub compatible: &'static str,
    pub data: usize,
}

impl UdeviceId {
    pub const fn new(compatible: &'static str) -> UdeviceId {
        UdeviceId { compatible, data: 0 }
    }

    pub const fn with_data(compatible: &'static str, data: usize) -> UdeviceId {
        UdeviceId { compatible, data }
    }
}

/// The operations table of a driver, shaped by its uclass.
#[derive(Clone, Copy)]
pub enum Ops {
    None,
    Gpio(&'static dyn GpioOps),
    I2c(&'static dyn I2cOps),
    Regulator(&'static dyn RegulatorOps),
}

impl Ops {
    /// Address of the operations entry inside its `static` descriptor, `None` for drivers
    /// without one. Operation types are often zero-sized, so the entry stands in for the table.
    pub fn addr(&'static self) -> Option<usize> {
        match self {
            Ops::None => None,
            _ => Some(ptr::from_ref(self) as usize),
        }
    }
}

bitflags! {
    pub struct DriverFlags: u32 {
        /// Bind this driver before relocation.
        const PRE_RELOC = 1 << 0;
        /// Remove devices before handing over to an operating system.
        const OS_PREPARE = 1 << 1;
        /// Devices may have DMA in flight while activated.
        const ACTIVE_DMA = 1 << 2;
        /// Keep devices through a non-vital remove.
        const VITAL = 1 << 3;
        /// Probe devices as soon as the scan is over.
        const PROBE_AFTER_BIND = 1 << 4;
    }
}

pub struct Driver {
    pub name: &'static str,
    pub id: UclassId,
    pub of_match: &'static [UdeviceId],
    pub ops: Ops,
    pub flags: DriverFlags,
    pub bind: Option<DevFn>,
    pub probe: Option<DevFn>,
    pub remove: Option<DevFn>,
    pub unbind: Option<DevFn>,
    /// Fill the `plat` block from the tree node. Runs at the first probe after binding.
    pub of_to_plat: Option<DevFn>,
    pub child_post_bind: Option<DevFn>,
    pub child_pre_probe: Option<DevFn>,
    pub child_post_remove: Option<DevFn>,
    pub child_pre_unbind: Option<DevFn>,
    pub plat_auto: Option<Auto>,
    pub priv_auto: Option<Auto>,
    /// `parent_plat` of every child of this driver's devices.
    pub per_child_plat_auto: Option<Auto>,
}

impl Driver {
    pub const DEFAULT: Driver = Driver {
        name: "",
        id: UclassId::Root,
        of_match: &[],
        ops: Ops::None,
        flags: DriverFlags::empty(),
        bind: None,
        probe: None,
        remove: None,
        unbind: None,
        of_to_plat: None,
        child_post_bind: None,
        child_pre_probe: None,
        child_post_remove: None,
        child_pre_unbind: None,
        plat_auto: None,
        priv_auto: None,
        per_child_plat_auto: None,
    };

    /// The match entry for `compat`, if this driver handles it.
    pub fn match_compatible(&self, compat: &str) -> Option<&'static UdeviceId> {
        self.of_match.iter().find(|entry| entry.compatible == compat)
    }

    pub(crate) fn hooks(&self) -> [Option<usize>; 9] {
        [
            self.bind,
            self.probe,
            self.remove,
            self.unbind,
            self.of_to_plat,
            self.child_post_bind,
            self.child_pre_probe,
            self.child_post_remove,
            self.child_pre_unbind,
        ]
        .map(|hook| hook.map(|f| f as usize))
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("flags", &self.flags)
            .finish()
    }
}

bitflags! {
    pub struct UclassFlags: u32 {
        /// Take sequence numbers from `/aliases` entries named after the uclass.
        const SEQ_ALIAS = 1 << 0;
        /// Devices get no sequence number.
        const NO_AUTO_SEQ = 1 << 1;
    }
}

/// Describes a capability class and the hooks run around each of its devices.
pub struct UclassDriver {
    pub name: &'static str,
    pub id: UclassId,
    pub flags: UclassFlags,
    pub post_bind: Option<DevFn>,
    pub pre_unbind: Option<DevFn>,
    pub pre_probe: Option<DevFn>,
    pub post_probe: Option<DevFn>,
    pub pre_remove: Option<DevFn>,
    pub child_post_bind: Option<DevFn>,
    pub child_pre_probe: Option<DevFn>,
    pub init: Option<UclassFn>,
    pub destroy: Option<UclassFn>,
    /// Class-wide private block, allocated with the uclass instance.
    pub priv_auto: Option<Auto>,
    /// `uclass_priv` of every device in the class.
    pub per_device_auto: Option<Auto>,
    /// `parent_plat` of children of devices in this class, unless their driver declares one.
    pub per_child_plat_auto: Option<Auto>,
}

impl UclassDriver {
    pub const DEFAULT: UclassDriver = UclassDriver {
        name: "",
        id: UclassId::Root,
        flags: UclassFlags::empty(),
        post_bind: None,
        pre_unbind: None,
        pre_probe: None,
        post_probe: None,
        pre_remove: None,
        child_post_bind: None,
        child_pre_probe: None,
        init: None,
        destroy: None,
        priv_auto: None,
        per_device_auto: None,
        per_child_plat_auto: None,
    };

    pub(crate) fn hooks(&self) -> [Option<usize>; 9] {
        [
            self.post_bind.map(|f| f as usize),
            self.pre_unbind.map(|f| f as usize),
            self.pre_probe.map(|f| f as usize),
            self.post_probe.map(|f| f as usize),
            self.pre_remove.map(|f| f as usize),
            self.child_post_bind.map(|f| f as usize),
            self.child_pre_probe.map(|f| f as usize),
            self.init.map(|f| f as usize),
            self.destroy.map(|f| f as usize),
        ]
    }
}

impl fmt::Debug for UclassDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UclassDriver")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

/// A device declared statically instead of through the tree.
#[derive(Debug)]
pub struct DriverInfo {
    /// Name of the driver to bind, which also names the device.
    pub name: &'static str,
    /// Builds the device's `plat` block.
    pub plat: Option<fn() -> Storage>,
    /// Index of the parent entry in the same table; `None` binds under the root.
    pub parent_idx: Option<usize>,
}
