//! Bind and unbind: creating and destroying device records.
use crate::{
    device::{DeviceFlags, DeviceId, Udevice},
    driver::{Auto, Driver, Storage, UclassDriver, UclassFlags},
    error::{DmError, DmResult},
    model::Dm,
    probe::RemoveFlags,
};
use alloc::{string::String, vec::Vec};
use dt::OfNode;
use log::warn;

impl Dm {
    /// Create a device for `driver` under `parent`.
    ///
    /// `plat` supplies a ready-made config block (static device-info); otherwise the driver's
    /// `plat_auto` is allocated. Only the root device may have no parent. On failure nothing of
    /// the device remains.
    pub fn bind(
        &mut self,
        parent: Option<DeviceId>,
        driver: &'static Driver,
        name: &str,
        node: Option<OfNode>,
        driver_data: usize,
        plat: Option<Storage>,
    ) -> DmResult<DeviceId> {
        match parent {
            Some(parent) => {
                self.device(parent)?;
            }
            None if self.root.is_some() => return Err(DmError::Invalid),
            None => {}
        }
        let uc_drv = self.uclass_get(driver.id)?.driver;

        let plat = plat.or_else(|| driver.plat_auto.map(|a| a.alloc()));
        let parent_plat = match parent {
            Some(parent) => self.per_child_plat_auto(parent)?.map(|a| a.alloc()),
            None => None,
        };
        let seq = self.assign_seq(uc_drv, node);
        let mut flags = DeviceFlags::inherited(driver.flags) | DeviceFlags::BOUND;
        if node.is_some_and(|n| n.pre_reloc()) {
            flags.insert(DeviceFlags::PRE_RELOC);
        }

        let id = self.alloc_slot(Udevice {
            name: String::from(name),
            driver,
            uclass_id: driver.id,
            parent,
            children: Vec::new(),
            node,
            driver_data,
            seq,
            flags,
            plat,
            priv_: None,
            uclass_priv: None,
            parent_plat,
        });
        match parent {
            Some(parent) => self.device_mut(parent)?.children.push(id),
            None => self.root = Some(id),
        }
        if let Some(uc) = self.uclasses.iter_mut().find(|uc| uc.id == driver.id) {
            uc.devices.push(id);
        }
        debug_ex!("Bound '{}' to driver '{}'.", name, driver.name);

        if let Err(err) = self.run_bind_hooks(id, driver, uc_drv, parent) {
            debug_ex!("Bind of '{}' failed: {}", name, err);
            self.discard(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Bind a device without a tree node, looking the driver up by name.
    pub fn bind_by_name(&mut self, parent: DeviceId, drv_name: &str, dev_name: &str) -> DmResult<DeviceId> {
        let driver = self.registry.find_driver(drv_name).ok_or(DmError::NoDriver)?;
        self.bind(Some(parent), driver, dev_name, None, 0, None)
    }

    /// Bind a device for `node` with a known driver, bypassing `compatible` matching.
    pub fn bind_with_node(
        &mut self,
        parent: DeviceId,
        drv_name: &str,
        dev_name: &str,
        node: OfNode,
    ) -> DmResult<DeviceId> {
        let driver = self.registry.find_driver(drv_name).ok_or(DmError::NoDriver)?;
        self.bind(Some(parent), driver, dev_name, Some(node), 0, None)
    }

    fn per_child_plat_auto(&self, parent: DeviceId) -> DmResult<Option<Auto>> {
        let driver = self.driver_of(parent)?;
        Ok(driver
            .per_child_plat_auto
            .or_else(|| self.uclass_driver_of(parent).ok()?.per_child_plat_auto))
    }

    /// Pick a sequence number: the `/aliases` entry if free, else one past everything in use.
    fn assign_seq(&self, uc_drv: &UclassDriver, node: Option<OfNode>) -> Option<u32> {
        if uc_drv.flags.contains(UclassFlags::NO_AUTO_SEQ) {
            return None;
        }
        let used: Vec<u32> = self
            .uclass_find(uc_drv.id)
            .map(|uc| {
                uc.devices
                    .iter()
                    .filter_map(|d| self.device(*d).ok()?.seq)
                    .collect()
            })
            .unwrap_or_default();
        let aliases = uc_drv
            .flags
            .contains(UclassFlags::SEQ_ALIAS)
            .then_some(self.tree)
            .flatten();

        if let (Some(tree), Some(node)) = (aliases, node) {
            if let Some(seq) = tree.alias_seq(uc_drv.name, node) {
                if !used.contains(&seq) {
                    return Some(seq);
                }
            }
        }
        let highest_alias = aliases.and_then(|tree| tree.highest_alias(uc_drv.name));
        let highest_used = used.iter().copied().max();
        Some(
            highest_alias
                .max(highest_used)
                .map_or(0, |seq| seq + 1),
        )
    }

    fn run_bind_hooks(
        &mut self,
        id: DeviceId,
        driver: &'static Driver,
        uc_drv: &'static UclassDriver,
        parent: Option<DeviceId>,
    ) -> DmResult {
        if let Some(bind) = driver.bind {
            bind(self, id)?;
        }
        if let Some(post_bind) = uc_drv.post_bind {
            post_bind(self, id)?;
        }
        if let Some(parent) = parent {
            if let Some(hook) = self.driver_of(parent)?.child_post_bind {
                hook(self, id)?;
            }
            if let Some(hook) = self.uclass_driver_of(parent)?.child_post_bind {
                hook(self, id)?;
            }
        }
        Ok(())
    }

    /// Undo a partial bind. Children a failed hook managed to create go too.
    fn discard(&mut self, id: DeviceId) {
        let children = self
            .device(id)
            .map(|dev| dev.children.clone())
            .unwrap_or_default();
        for child in children {
            if let Err(err) = self.remove(child, RemoveFlags::NORMAL) {
                let name = self.device(child).map_or("?", |dev| dev.name.as_str());
                warn!("Remove of '{}' during rollback failed: {}", name, err);
            }
            if self.unbind(child).is_err() {
                self.discard(child);
            }
        }
        self.unlink_and_free(id);
    }

    /// Destroy a device that is bound but not activated, with all of its descendants.
    pub fn unbind(&mut self, id: DeviceId) -> DmResult {
        let dev = self.device(id)?;
        if dev.is_active() {
            return Err(DmError::Busy);
        }
        if !dev.is_bound() {
            return Err(DmError::Invalid);
        }
        let (driver, parent) = (dev.driver, dev.parent);
        let uc_drv = self.uclass_driver_of(id)?;

        self.unbind_children(id, None)?;

        if let Some(parent) = parent {
            if let Some(hook) = self.driver_of(parent)?.child_pre_unbind {
                hook(self, id)?;
            }
        }
        if let Some(unbind) = driver.unbind {
            unbind(self, id)?;
        }
        if let Some(pre_unbind) = uc_drv.pre_unbind {
            pre_unbind(self, id)?;
        }

        let dev = self.device_mut(id)?;
        dev.flags.remove(DeviceFlags::BOUND);
        debug_ex!("Unbound '{}'.", dev.name);
        self.unlink_and_free(id);
        Ok(())
    }

    /// Unbind the children of `id`, all of them or those bound to `driver`.
    ///
    /// Keeps going after a failure and returns the first error.
    pub fn unbind_children(&mut self, id: DeviceId, driver: Option<&'static Driver>) -> DmResult {
        let children = self.device(id)?.children.clone();
        let mut first_err = None;
        for child in children {
            if let Some(driver) = driver {
                if !core::ptr::eq(self.driver_of(child)?, driver) {
                    continue;
                }
            }
            if let Err(err) = self.unbind(child) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
