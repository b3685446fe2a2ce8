//! Driver model core.
//!
//! Drivers and uclasses (capability classes) are described by static descriptors collected into a
//! [registry::Registry]. A [Dm] owns the runtime object graph: it binds tree nodes to drivers,
//! probes devices on demand (parents first), removes them (children first) and unbinds them.
//!
//! Typical flow:
//! 1. build a [registry::Registry] from the linked-in tables;
//! 2. [Dm::init_and_scan] with the hardware description tree;
//! 3. look devices up through the uclass consumer API, e.g. [Dm::uclass_get_device].
#![cfg_attr(not(test), no_std)]
extern crate alloc;

#[macro_use]
pub mod console;
#[macro_use]
pub mod logging;

pub mod bind;
pub mod class;
pub mod config;
pub mod device;
pub mod driver;
pub mod drivers;
pub mod dump;
pub mod error;
pub mod global;
pub mod lists;
pub mod model;
pub mod probe;
pub mod registry;
pub mod reloc;
pub mod root;
pub mod uclass;
pub mod uclass_id;

#[cfg(test)]
mod testing;

pub use config::DmConfig;
pub use device::{DeviceFlags, DeviceId, Udevice};
pub use driver::{Auto, DevFn, Driver, DriverFlags, DriverInfo, Ops, Storage, UclassDriver, UclassFlags, UdeviceId};
pub use dt::{OfNode, OfTree};
pub use error::{DmError, DmResult};
pub use model::Dm;
pub use probe::RemoveFlags;
pub use registry::Registry;
pub use uclass::Uclass;
pub use uclass_id::UclassId;
