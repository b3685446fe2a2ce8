//! The [Dm] object graph: an arena of devices plus the live uclass instances.
use crate::{
    config::DmConfig,
    device::{DeviceFlags, DeviceId, Slot, Udevice},
    driver::{Driver, Storage, UclassDriver},
    error::{DmError, DmResult},
    registry::Registry,
    uclass::Uclass,
    uclass_id::UclassId,
};
use alloc::vec::Vec;
use dt::OfTree;

/// Device model state: registries, tree, devices and uclass instances.
///
/// Everything is mutated through `&mut Dm`. Lifecycle callbacks receive the same `&mut Dm`, so
/// a probe may bind, probe or look up other devices.
pub struct Dm {
    pub(crate) registry: Registry,
    pub(crate) config: DmConfig,
    pub(crate) tree: Option<OfTree>,
    pub(crate) slots: Vec<Slot>,
    pub(crate) free_slots: Vec<u32>,
    pub(crate) uclasses: Vec<Uclass>,
    pub(crate) root: Option<DeviceId>,
    pub(crate) pre_reloc_only: bool,
}

fn downcast<T: 'static>(block: &Option<Storage>) -> DmResult<&T> {
    block
        .as_deref()
        .and_then(|b| b.downcast_ref::<T>())
        .ok_or(DmError::NoData)
}

fn downcast_mut<T: 'static>(block: &mut Option<Storage>) -> DmResult<&mut T> {
    block
        .as_deref_mut()
        .and_then(|b| b.downcast_mut::<T>())
        .ok_or(DmError::NoData)
}

impl Dm {
    pub fn new(registry: Registry, config: DmConfig) -> Dm {
        Dm {
            registry,
            pre_reloc_only: config.pre_reloc_only,
            config,
            tree: None,
            slots: Vec::new(),
            free_slots: Vec::new(),
            uclasses: Vec::new(),
            root: None,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &DmConfig {
        &self.config
    }

    /// The tree the model was initialised with.
    pub fn tree(&self) -> Option<OfTree> {
        self.tree
    }

    pub fn root(&self) -> Option<DeviceId> {
        self.root
    }

    pub fn device(&self, id: DeviceId) -> DmResult<&Udevice> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.dev.as_ref())
            .ok_or(DmError::NoDevice)
    }

    pub(crate) fn device_mut(&mut self, id: DeviceId) -> DmResult<&mut Udevice> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.dev.as_mut())
            .ok_or(DmError::NoDevice)
    }

    /// Whether `id` still names a bound device.
    pub fn is_valid(&self, id: DeviceId) -> bool {
        self.device(id).is_ok()
    }

    pub fn is_active(&self, id: DeviceId) -> bool {
        self.device(id).is_ok_and(|dev| dev.is_active())
    }

    /// All bound devices in arena order.
    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.dev.as_ref().map(|_| DeviceId {
                index: index as u32,
                generation: slot.generation,
            })
        })
    }

    pub fn device_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.dev.is_some()).count()
    }

    pub(crate) fn alloc_slot(&mut self, dev: Udevice) -> DeviceId {
        match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.dev = Some(dev);
                DeviceId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    dev: Some(dev),
                });
                DeviceId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn free_slot(&mut self, id: DeviceId) -> Option<Udevice> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let dev = slot.dev.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        Some(dev)
    }

    /// Detach a device from its parent and its uclass, then release its slot and storage.
    pub(crate) fn unlink_and_free(&mut self, id: DeviceId) {
        let Some(dev) = self.free_slot(id) else {
            return;
        };
        if let Some(parent) = dev.parent.and_then(|p| self.device_mut(p).ok()) {
            parent.children.retain(|c| *c != id);
        }
        if let Some(uc) = self.uclasses.iter_mut().find(|uc| uc.id == dev.uclass_id) {
            uc.devices.retain(|d| *d != id);
        }
        if self.root == Some(id) {
            self.root = None;
        }
    }

    pub fn driver_of(&self, id: DeviceId) -> DmResult<&'static Driver> {
        Ok(self.device(id)?.driver)
    }

    pub fn uclass_driver_of(&self, id: DeviceId) -> DmResult<&'static UclassDriver> {
        let uclass_id = self.device(id)?.uclass_id;
        self.registry.find_uclass(uclass_id).ok_or(DmError::NoUclass)
    }

    pub fn parent(&self, id: DeviceId) -> DmResult<Option<DeviceId>> {
        Ok(self.device(id)?.parent)
    }

    pub fn seq(&self, id: DeviceId) -> DmResult<Option<u32>> {
        Ok(self.device(id)?.seq)
    }

    pub fn has_flags(&self, id: DeviceId, flags: DeviceFlags) -> bool {
        self.device(id).is_ok_and(|dev| dev.flags.contains(flags))
    }
}

/// Storage blocks
impl Dm {
    pub fn plat<T: 'static>(&self, id: DeviceId) -> DmResult<&T> {
        downcast(&self.device(id)?.plat)
    }

    pub fn plat_mut<T: 'static>(&mut self, id: DeviceId) -> DmResult<&mut T> {
        downcast_mut(&mut self.device_mut(id)?.plat)
    }

    pub fn priv_data<T: 'static>(&self, id: DeviceId) -> DmResult<&T> {
        downcast(&self.device(id)?.priv_)
    }

    pub fn priv_data_mut<T: 'static>(&mut self, id: DeviceId) -> DmResult<&mut T> {
        downcast_mut(&mut self.device_mut(id)?.priv_)
    }

    pub fn uclass_priv<T: 'static>(&self, id: DeviceId) -> DmResult<&T> {
        downcast(&self.device(id)?.uclass_priv)
    }

    pub fn uclass_priv_mut<T: 'static>(&mut self, id: DeviceId) -> DmResult<&mut T> {
        downcast_mut(&mut self.device_mut(id)?.uclass_priv)
    }

    pub fn parent_plat<T: 'static>(&self, id: DeviceId) -> DmResult<&T> {
        downcast(&self.device(id)?.parent_plat)
    }

    pub fn parent_plat_mut<T: 'static>(&mut self, id: DeviceId) -> DmResult<&mut T> {
        downcast_mut(&mut self.device_mut(id)?.parent_plat)
    }

    /// The class-wide private block of a live uclass instance.
    pub fn uclass_class_priv<T: 'static>(&self, id: UclassId) -> DmResult<&T> {
        let uc = self.uclass_find(id).ok_or(DmError::NoUclass)?;
        downcast(&uc.priv_)
    }

    pub fn uclass_class_priv_mut<T: 'static>(&mut self, id: UclassId) -> DmResult<&mut T> {
        let uc = self
            .uclasses
            .iter_mut()
            .find(|uc| uc.id == id)
            .ok_or(DmError::NoUclass)?;
        downcast_mut(&mut uc.priv_)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LEAF_DRIVER, TestPlat, new_dm};

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        let root = dm.root().unwrap();
        let a = dm.bind(Some(root), &LEAF_DRIVER, "a", None, 0, None).unwrap();
        dm.unbind(a).unwrap();
        assert_eq!(dm.device(a).err(), Some(DmError::NoDevice));
        let b = dm.bind(Some(root), &LEAF_DRIVER, "b", None, 0, None).unwrap();
        assert_eq!(a.index, b.index);
        assert_ne!(a, b);
        assert!(!dm.is_valid(a));
        assert_eq!(dm.device(b).unwrap().name, "b");
    }

    #[test]
    fn storage_downcasts_check_the_type() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        let root = dm.root().unwrap();
        let a = dm.bind(Some(root), &LEAF_DRIVER, "a", None, 0, None).unwrap();
        dm.plat_mut::<TestPlat>(a).unwrap().value = 5;
        assert_eq!(dm.plat::<TestPlat>(a).unwrap().value, 5);
        assert_eq!(dm.plat::<u64>(a).err(), Some(DmError::NoData));
        assert_eq!(dm.priv_data::<TestPlat>(a).err(), Some(DmError::NoData));
    }
}
