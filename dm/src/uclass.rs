//! Uclass instances and the consumer-facing lookup API.
//!
//! The `uclass_find_*` functions only look; the `uclass_get_*` and `*_get_*` functions probe the
//! device they return.
use crate::{
    device::DeviceId,
    driver::{Storage, UclassDriver},
    error::{DmError, DmResult},
    model::Dm,
    uclass_id::UclassId,
};
use alloc::vec::Vec;
use core::fmt;
use dt::OfNode;

/// A live capability class: its descriptor, class-wide storage and member devices.
pub struct Uclass {
    pub id: UclassId,
    pub driver: &'static UclassDriver,
    pub(crate) priv_: Option<Storage>,
    pub devices: Vec<DeviceId>,
}

impl fmt::Debug for Uclass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uclass")
            .field("id", &self.id)
            .field("name", &self.driver.name)
            .field("devices", &self.devices.len())
            .finish()
    }
}

/// Uclass instances
impl Dm {
    /// The instance for `id`, created (and its `init` hook run) on first use.
    pub fn uclass_get(&mut self, id: UclassId) -> DmResult<&Uclass> {
        let index = match self.uclasses.iter().position(|uc| uc.id == id) {
            Some(index) => index,
            None => self.uclass_add(id)?,
        };
        Ok(&self.uclasses[index])
    }

    fn uclass_add(&mut self, id: UclassId) -> DmResult<usize> {
        let driver = self.registry.find_uclass(id).ok_or_else(|| {
            debug_ex!("Cannot find uclass for id {:?}.", id);
            DmError::NoUclass
        })?;
        self.uclasses.push(Uclass {
            id,
            driver,
            priv_: driver.priv_auto.map(|a| a.alloc()),
            devices: Vec::new(),
        });
        if let Some(init) = driver.init {
            if let Err(err) = init(self, id) {
                self.uclasses.retain(|uc| uc.id != id);
                return Err(err);
            }
        }
        Ok(self.uclasses.len() - 1)
    }

    /// The instance for `id` if it already exists.
    pub fn uclass_find(&self, id: UclassId) -> Option<&Uclass> {
        self.uclasses.iter().find(|uc| uc.id == id)
    }

    /// Live instances in creation order.
    pub fn uclasses(&self) -> &[Uclass] {
        &self.uclasses
    }

    /// Members of a uclass in bind order.
    pub fn uclass_devices(&self, id: UclassId) -> Vec<DeviceId> {
        self.uclass_find(id).map(|uc| uc.devices.clone()).unwrap_or_default()
    }

    /// Resolve a uclass name such as `"gpio"`.
    pub fn uclass_get_by_name(&self, name: &str) -> Option<UclassId> {
        self.registry
            .uclasses()
            .iter()
            .find(|uc| uc.name == name)
            .map(|uc| uc.id)
    }

    /// Run every instance's `destroy` hook and drop all instances.
    pub(crate) fn uclass_destroy_all(&mut self) -> DmResult {
        let mut first_err = None;
        let ids: Vec<UclassId> = self.uclasses.iter().map(|uc| uc.id).collect();
        for id in ids {
            if let Some(uc) = self.uclass_find(id) {
                if !uc.devices.is_empty() {
                    first_err.get_or_insert(DmError::Busy);
                    continue;
                }
                if let Some(destroy) = uc.driver.destroy {
                    if let Err(err) = destroy(self, id) {
                        first_err.get_or_insert(err);
                    }
                }
            }
            self.uclasses.retain(|uc| uc.id != id || !uc.devices.is_empty());
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Lookup without probing
impl Dm {
    pub fn uclass_find_device(&self, id: UclassId, index: usize) -> DmResult<DeviceId> {
        self.uclass_find(id)
            .and_then(|uc| uc.devices.get(index).copied())
            .ok_or(DmError::NoDevice)
    }

    pub fn uclass_find_first_device(&self, id: UclassId) -> Option<DeviceId> {
        self.uclass_find_device(id, 0).ok()
    }

    pub fn uclass_find_device_by_name(&self, id: UclassId, name: &str) -> DmResult<DeviceId> {
        self.uclass_find(id)
            .ok_or(DmError::NoDevice)?
            .devices
            .iter()
            .copied()
            .find(|d| self.device(*d).is_ok_and(|dev| dev.name == name))
            .ok_or(DmError::NoDevice)
    }

    pub fn uclass_find_device_by_seq(&self, id: UclassId, seq: u32) -> DmResult<DeviceId> {
        self.uclass_find(id)
            .ok_or(DmError::NoDevice)?
            .devices
            .iter()
            .copied()
            .find(|d| self.seq(*d).ok().flatten() == Some(seq))
            .ok_or(DmError::NoDevice)
    }

    pub fn uclass_find_device_by_ofnode(&self, id: UclassId, node: OfNode) -> DmResult<DeviceId> {
        self.uclass_find(id)
            .ok_or(DmError::NoDevice)?
            .devices
            .iter()
            .copied()
            .find(|d| self.device(*d).is_ok_and(|dev| dev.node == Some(node)))
            .ok_or(DmError::NoDevice)
    }

    /// The device bound to `node` in any uclass.
    pub fn device_find_global_by_ofnode(&self, node: OfNode) -> Option<DeviceId> {
        self.devices()
            .find(|d| self.device(*d).is_ok_and(|dev| dev.node == Some(node)))
    }

    pub fn device_find_child_by_name(&self, parent: DeviceId, name: &str) -> DmResult<DeviceId> {
        self.device(parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.device(*c).is_ok_and(|dev| dev.name == name))
            .ok_or(DmError::NoDevice)
    }

    pub fn device_find_first_child(&self, parent: DeviceId) -> Option<DeviceId> {
        self.device(parent).ok()?.children.first().copied()
    }

    /// Search the whole tree by device name.
    pub fn device_find_by_name(&self, name: &str) -> Option<DeviceId> {
        self.devices()
            .find(|d| self.device(*d).is_ok_and(|dev| dev.name == name))
    }
}

/// Lookup with probing
impl Dm {
    fn probed(&mut self, id: DeviceId) -> DmResult<DeviceId> {
        self.probe(id)?;
        Ok(id)
    }

    /// The `index`th device of a uclass, probed.
    pub fn uclass_get_device(&mut self, id: UclassId, index: usize) -> DmResult<DeviceId> {
        let dev = self.uclass_find_device(id, index)?;
        self.probed(dev)
    }

    pub fn uclass_get_device_by_name(&mut self, id: UclassId, name: &str) -> DmResult<DeviceId> {
        let dev = self.uclass_find_device_by_name(id, name)?;
        self.probed(dev)
    }

    pub fn uclass_get_device_by_seq(&mut self, id: UclassId, seq: u32) -> DmResult<DeviceId> {
        let dev = self.uclass_find_device_by_seq(id, seq)?;
        self.probed(dev)
    }

    pub fn uclass_get_device_by_ofnode(&mut self, id: UclassId, node: OfNode) -> DmResult<DeviceId> {
        let dev = self.uclass_find_device_by_ofnode(id, node)?;
        self.probed(dev)
    }

    /// The first device of a uclass bound to the driver named `drv_name`, probed.
    pub fn uclass_get_device_by_driver(&mut self, id: UclassId, drv_name: &str) -> DmResult<DeviceId> {
        let dev = self
            .uclass_devices(id)
            .into_iter()
            .find(|d| self.driver_of(*d).is_ok_and(|drv| drv.name == drv_name))
            .ok_or(DmError::NoDevice)?;
        self.probed(dev)
    }

    /// The first device of a uclass that probes successfully.
    pub fn uclass_first_device(&mut self, id: UclassId) -> Option<DeviceId> {
        self.probe_from(id, 0)
    }

    /// The next device after `prev` in its uclass that probes successfully.
    pub fn uclass_next_device(&mut self, prev: DeviceId) -> Option<DeviceId> {
        let id = self.device(prev).ok()?.uclass_id;
        let pos = self.uclass_find(id)?.devices.iter().position(|d| *d == prev)?;
        self.probe_from(id, pos + 1)
    }

    fn probe_from(&mut self, id: UclassId, start: usize) -> Option<DeviceId> {
        let devices = self.uclass_devices(id);
        devices
            .into_iter()
            .skip(start)
            .find(|dev| self.probe(*dev).is_ok())
    }

    /// Probe every device of a uclass. Returns the first error after trying them all.
    pub fn uclass_probe_all(&mut self, id: UclassId) -> DmResult {
        let mut first_err = None;
        for dev in self.uclass_devices(id) {
            if let Err(err) = self.probe(dev) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// A device anywhere in the tree by name, probed.
    pub fn get_device_by_name(&mut self, name: &str) -> DmResult<DeviceId> {
        let dev = self.device_find_by_name(name).ok_or(DmError::NoDevice)?;
        self.probed(dev)
    }

    /// The device bound to `node`, probed.
    pub fn device_get_global_by_ofnode(&mut self, node: OfNode) -> DmResult<DeviceId> {
        let dev = self.device_find_global_by_ofnode(node).ok_or(DmError::NoDevice)?;
        self.probed(dev)
    }

    /// The `index`th child of `parent`, probed.
    pub fn device_get_child(&mut self, parent: DeviceId, index: usize) -> DmResult<DeviceId> {
        let child = self
            .device(parent)?
            .children
            .get(index)
            .copied()
            .ok_or(DmError::NoDevice)?;
        self.probed(child)
    }

    pub fn device_get_child_by_name(&mut self, parent: DeviceId, name: &str) -> DmResult<DeviceId> {
        let child = self.device_find_child_by_name(parent, name)?;
        self.probed(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FAIL_PROBE_DRIVER, LEAF_DRIVER, new_dm};

    #[test]
    fn instances_are_created_lazily() {
        let mut dm = new_dm();
        assert!(dm.uclass_find(UclassId::Test).is_none());
        assert_eq!(dm.uclass_get(UclassId::Test).unwrap().driver.name, "test");
        assert!(dm.uclass_find(UclassId::Test).is_some());
        assert_eq!(dm.uclass_get(UclassId::I2c).err(), Some(DmError::NoUclass));
        assert_eq!(dm.uclass_get_by_name("test"), Some(UclassId::Test));
        assert_eq!(dm.uclass_get_by_name("nope"), None);
    }

    #[test]
    fn lookups_probe_only_when_asked() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        let root = dm.root().unwrap();
        let a = dm.bind(Some(root), &LEAF_DRIVER, "a", None, 0, None).unwrap();
        let b = dm.bind(Some(root), &LEAF_DRIVER, "b", None, 0, None).unwrap();
        assert_eq!(dm.uclass_find_device(UclassId::Test, 1), Ok(b));
        assert!(!dm.is_active(b));
        assert_eq!(dm.uclass_get_device(UclassId::Test, 1), Ok(b));
        assert!(dm.is_active(b));
        assert_eq!(dm.uclass_get_device_by_name(UclassId::Test, "a"), Ok(a));
        assert_eq!(dm.uclass_get_device(UclassId::Test, 2).err(), Some(DmError::NoDevice));
        assert_eq!(dm.get_device_by_name("b"), Ok(b));
        assert_eq!(dm.device_get_child(root, 0), Ok(a));
        assert_eq!(dm.device_find_child_by_name(root, "zz").err(), Some(DmError::NoDevice));
        assert_eq!(dm.uclass_get_device_by_driver(UclassId::Test, "test_leaf"), Ok(a));
    }

    #[test]
    fn sequence_numbers_count_up() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        let root = dm.root().unwrap();
        let a = dm.bind(Some(root), &LEAF_DRIVER, "a", None, 0, None).unwrap();
        let b = dm.bind(Some(root), &LEAF_DRIVER, "b", None, 0, None).unwrap();
        assert_eq!(dm.seq(a), Ok(Some(0)));
        assert_eq!(dm.seq(b), Ok(Some(1)));
        assert_eq!(dm.uclass_get_device_by_seq(UclassId::Test, 1), Ok(b));
        dm.unbind(a).unwrap();
        let c = dm.bind(Some(root), &LEAF_DRIVER, "c", None, 0, None).unwrap();
        assert_eq!(dm.seq(c), Ok(Some(2)));
    }

    #[test]
    fn iteration_skips_devices_that_fail() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        let root = dm.root().unwrap();
        dm.bind(Some(root), &FAIL_PROBE_DRIVER, "bad", None, 0, None).unwrap();
        let a = dm.bind(Some(root), &LEAF_DRIVER, "a", None, 0, None).unwrap();
        dm.bind(Some(root), &FAIL_PROBE_DRIVER, "bad2", None, 0, None).unwrap();
        let b = dm.bind(Some(root), &LEAF_DRIVER, "b", None, 0, None).unwrap();
        assert_eq!(dm.uclass_first_device(UclassId::Test), Some(a));
        assert_eq!(dm.uclass_next_device(a), Some(b));
        assert_eq!(dm.uclass_next_device(b), None);
        assert_eq!(dm.uclass_probe_all(UclassId::Test), Err(DmError::Io));
    }
}
