//! Probe and remove: activating and deactivating bound devices.
use crate::{
    device::{DeviceFlags, DeviceId},
    driver::DriverFlags,
    error::{DmError, DmResult},
    model::Dm,
};
use bitflags::bitflags;
use log::warn;

bitflags! {
    /// Selects which devices a remove call deactivates.
    pub struct RemoveFlags: u32 {
        /// Remove every device.
        const NORMAL = 1 << 0;
        /// Remove devices whose driver has [DriverFlags::ACTIVE_DMA].
        const ACTIVE_DMA = 1 << 1;
        /// Remove devices whose driver has [DriverFlags::OS_PREPARE].
        const OS_PREPARE = 1 << 2;
        /// Keep devices whose driver has [DriverFlags::VITAL].
        const NON_VITAL = 1 << 3;
        const ACTIVE_ALL = Self::ACTIVE_DMA.bits | Self::OS_PREPARE.bits;
    }
}

impl RemoveFlags {
    /// Whether a device of a driver with `drv_flags` is removed under these flags.
    pub fn selects(self, drv_flags: DriverFlags) -> bool {
        let matched = self.contains(RemoveFlags::NORMAL)
            || (self.contains(RemoveFlags::ACTIVE_DMA) && drv_flags.contains(DriverFlags::ACTIVE_DMA))
            || (self.contains(RemoveFlags::OS_PREPARE) && drv_flags.contains(DriverFlags::OS_PREPARE));
        matched && !(self.contains(RemoveFlags::NON_VITAL) && drv_flags.contains(DriverFlags::VITAL))
    }
}

impl Dm {
    /// Activate a device, probing its ancestors first.
    ///
    /// Probing an activated device does nothing. On failure the device stays bound and
    /// inactive and may be probed again later.
    pub fn probe(&mut self, id: DeviceId) -> DmResult {
        let dev = self.device(id)?;
        if dev.is_active() {
            return Ok(());
        }
        if let Some(parent) = dev.parent {
            self.probe(parent)?;
            // The parent's probe may have probed us already.
            if self.is_active(id) {
                return Ok(());
            }
        }

        // Set early so a callback probing this device again returns at once.
        self.device_mut(id)?.flags.insert(DeviceFlags::ACTIVATED);
        match self.run_probe(id) {
            Ok(()) => {
                debug_ex!("Probed '{}'.", self.device(id)?.name);
                Ok(())
            }
            Err(err) => {
                let dev = self.device_mut(id)?;
                warn!("Probe of '{}' failed: {}", dev.name, err);
                dev.priv_ = None;
                dev.uclass_priv = None;
                dev.flags.remove(DeviceFlags::ACTIVATED);
                Err(err)
            }
        }
    }

    fn run_probe(&mut self, id: DeviceId) -> DmResult {
        let uc_drv = self.uclass_driver_of(id)?;
        let dev = self.device_mut(id)?;
        let (driver, parent) = (dev.driver, dev.parent);
        dev.priv_ = driver.priv_auto.map(|a| a.alloc());
        dev.uclass_priv = uc_drv.per_device_auto.map(|a| a.alloc());

        if dev.node.is_some() && !dev.flags.contains(DeviceFlags::PLAT_VALID) {
            if let Some(of_to_plat) = driver.of_to_plat {
                of_to_plat(self, id)?;
            }
            self.device_mut(id)?.flags.insert(DeviceFlags::PLAT_VALID);
        }

        if let Some(pre_probe) = uc_drv.pre_probe {
            pre_probe(self, id)?;
        }
        if let Some(parent) = parent {
            if let Some(hook) = self.uclass_driver_of(parent)?.child_pre_probe {
                hook(self, id)?;
            }
            if let Some(hook) = self.driver_of(parent)?.child_pre_probe {
                hook(self, id)?;
            }
        }
        if let Some(probe) = driver.probe {
            probe(self, id)?;
        }
        if let Some(post_probe) = uc_drv.post_probe {
            post_probe(self, id)?;
        }
        Ok(())
    }

    /// Deactivate a device and its activated descendants, children first.
    ///
    /// Returns [DmError::Rejected] when `flags` keep the device, or keep one of its children.
    /// If the driver declines, the device stays activated.
    pub fn remove(&mut self, id: DeviceId, flags: RemoveFlags) -> DmResult {
        let dev = self.device(id)?;
        if !dev.is_active() {
            return Ok(());
        }
        let (driver, parent) = (dev.driver, dev.parent);
        let children = dev.children.clone();

        let mut kept_child = false;
        for child in children {
            match self.remove(child, flags) {
                Ok(()) => {}
                Err(DmError::Rejected) => kept_child = true,
                Err(err) => return Err(err),
            }
        }
        if kept_child || !flags.selects(driver.flags) {
            return Err(DmError::Rejected);
        }

        let uc_drv = self.uclass_driver_of(id)?;
        if let Some(pre_remove) = uc_drv.pre_remove {
            pre_remove(self, id)?;
        }
        if let Some(remove) = driver.remove {
            if let Err(err) = remove(self, id) {
                // The device stays up; let the uclass restore what pre_remove tore down.
                if let Some(post_probe) = uc_drv.post_probe {
                    let _ = post_probe(self, id);
                }
                return Err(err);
            }
        }
        if let Some(parent) = parent {
            if let Some(hook) = self.driver_of(parent)?.child_post_remove {
                if let Err(err) = hook(self, id) {
                    warn!("child_post_remove of '{}' failed: {}", self.device(id)?.name, err);
                }
            }
        }

        let dev = self.device_mut(id)?;
        dev.priv_ = None;
        dev.uclass_priv = None;
        dev.flags.remove(DeviceFlags::ACTIVATED);
        debug_ex!("Removed '{}'.", dev.name);
        Ok(())
    }

    /// Remove, from the root down, every device selected by `flags`. Devices kept by the flags
    /// are not an error.
    pub fn remove_devices_flags(&mut self, flags: RemoveFlags) -> DmResult {
        let Some(root) = self.root else {
            return Ok(());
        };
        match self.remove(root, flags) {
            Err(DmError::Rejected) => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        BUS_DRIVER, DMA_DRIVER, FAIL_PROBE_DRIVER, LEAF_DRIVER, OS_PREPARE_DRIVER, REFUSE_REMOVE_DRIVER,
        TestPlat, TestPriv, clear_events, events, flat_tree, new_dm,
    };

    fn config_tree() -> dt::OfTree {
        flat_tree(|w| {
            w.begin_node("cfg");
            w.property_string("compatible", "test,config");
            w.property_u32("value", 42);
            w.end_node();
            w.begin_node("blank");
            w.property_string("compatible", "test,config");
            w.end_node();
        })
    }

    #[test]
    fn remove_flag_selection() {
        let none = DriverFlags::empty();
        assert!(RemoveFlags::NORMAL.selects(none));
        assert!(!RemoveFlags::OS_PREPARE.selects(none));
        assert!(RemoveFlags::OS_PREPARE.selects(DriverFlags::OS_PREPARE));
        assert!(RemoveFlags::ACTIVE_ALL.selects(DriverFlags::ACTIVE_DMA));
        assert!(!(RemoveFlags::NORMAL | RemoveFlags::NON_VITAL).selects(DriverFlags::VITAL));
        assert!(RemoveFlags::NORMAL.selects(DriverFlags::VITAL));
    }

    #[test]
    fn probe_runs_parent_first_and_once() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        let root = dm.root().unwrap();
        let bus = dm.bind(Some(root), &BUS_DRIVER, "bus", None, 0, None).unwrap();
        let a = dm.bind(Some(bus), &LEAF_DRIVER, "a", None, 0, None).unwrap();
        clear_events(&mut dm);
        dm.probe(a).unwrap();
        assert!(dm.is_active(bus));
        assert!(dm.device(a).unwrap().has_priv());
        assert!(dm.device(a).unwrap().has_uclass_priv());
        assert_eq!(
            events(&dm),
            ["uclass pre_probe a", "bus child_pre_probe a", "probe a", "uclass post_probe a"]
        );
        dm.probe(a).unwrap();
        assert_eq!(events(&dm).len(), 4);
        assert_eq!(dm.priv_data::<TestPriv>(a).unwrap().probe_count, 1);
    }

    #[test]
    fn config_is_read_once_at_first_probe() {
        let mut dm = new_dm();
        dm.init_and_scan(Some(config_tree())).unwrap();
        let cfg = dm.device_find_by_name("cfg").unwrap();
        assert!(!events(&dm).iter().any(|e| e.starts_with("of_to_plat")));
        assert_eq!(dm.plat::<TestPlat>(cfg).unwrap().value, 0);
        assert!(!dm.has_flags(cfg, DeviceFlags::PLAT_VALID));

        clear_events(&mut dm);
        dm.probe(cfg).unwrap();
        assert_eq!(
            events(&dm),
            ["of_to_plat cfg", "uclass pre_probe cfg", "probe cfg", "uclass post_probe cfg"]
        );
        assert_eq!(dm.plat::<TestPlat>(cfg).unwrap().value, 42);
        assert!(dm.has_flags(cfg, DeviceFlags::PLAT_VALID));

        dm.remove(cfg, RemoveFlags::NORMAL).unwrap();
        clear_events(&mut dm);
        dm.probe(cfg).unwrap();
        assert_eq!(events(&dm), ["uclass pre_probe cfg", "probe cfg", "uclass post_probe cfg"]);
        assert_eq!(dm.plat::<TestPlat>(cfg).unwrap().value, 42);
    }

    #[test]
    fn failed_config_read_is_retried() {
        let mut dm = new_dm();
        dm.init_and_scan(Some(config_tree())).unwrap();
        let blank = dm.device_find_by_name("blank").unwrap();
        clear_events(&mut dm);
        assert!(dm.probe(blank).is_err());
        assert_eq!(events(&dm), ["of_to_plat blank"]);
        let dev = dm.device(blank).unwrap();
        assert!(dev.is_bound() && !dev.is_active());
        assert!(!dev.has_priv());
        assert!(!dm.has_flags(blank, DeviceFlags::PLAT_VALID));

        clear_events(&mut dm);
        assert!(dm.probe(blank).is_err());
        assert_eq!(events(&dm), ["of_to_plat blank"]);
        assert!(dm.is_active(dm.root().unwrap()));
    }

    #[test]
    fn failed_probe_keeps_device_bound() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        let root = dm.root().unwrap();
        let bad = dm.bind(Some(root), &FAIL_PROBE_DRIVER, "bad", None, 0, None).unwrap();
        let good = dm.bind(Some(root), &LEAF_DRIVER, "good", None, 0, None).unwrap();
        assert_eq!(dm.probe(bad), Err(DmError::Io));
        let dev = dm.device(bad).unwrap();
        assert!(dev.is_bound() && !dev.is_active());
        assert!(!dev.has_priv() && !dev.has_uclass_priv());
        assert!(dev.has_plat());
        dm.probe(good).unwrap();
        assert!(dm.is_active(root));
        // A second attempt runs the callbacks again.
        assert_eq!(dm.probe(bad), Err(DmError::Io));
    }

    #[test]
    fn failed_parent_probe_propagates() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        let root = dm.root().unwrap();
        let bad = dm.bind(Some(root), &FAIL_PROBE_DRIVER, "bad", None, 0, None).unwrap();
        let child = dm.bind(Some(bad), &LEAF_DRIVER, "child", None, 0, None).unwrap();
        assert_eq!(dm.probe(child), Err(DmError::Io));
        assert!(!dm.is_active(child));
    }

    #[test]
    fn remove_goes_children_first() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        let root = dm.root().unwrap();
        let bus = dm.bind(Some(root), &BUS_DRIVER, "bus", None, 0, None).unwrap();
        let a = dm.bind(Some(bus), &LEAF_DRIVER, "a", None, 0, None).unwrap();
        let b = dm.bind(Some(bus), &LEAF_DRIVER, "b", None, 0, None).unwrap();
        dm.probe(a).unwrap();
        dm.probe(b).unwrap();
        clear_events(&mut dm);
        dm.remove(bus, RemoveFlags::NORMAL).unwrap();
        for id in [bus, a, b] {
            assert!(!dm.is_active(id));
            assert!(dm.is_valid(id));
        }
        assert!(!dm.device(a).unwrap().has_priv());
        assert!(dm.device(a).unwrap().has_plat());
        assert_eq!(
            events(&dm),
            [
                "uclass pre_remove a",
                "remove a",
                "bus child_post_remove a",
                "uclass pre_remove b",
                "remove b",
                "bus child_post_remove b",
            ]
        );
        assert!(dm.is_active(root));
    }

    #[test]
    fn declined_remove_keeps_device_active() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        let root = dm.root().unwrap();
        let dev = dm.bind(Some(root), &REFUSE_REMOVE_DRIVER, "stuck", None, 0, None).unwrap();
        dm.probe(dev).unwrap();
        clear_events(&mut dm);
        assert_eq!(dm.remove(dev, RemoveFlags::NORMAL), Err(DmError::Busy));
        assert!(dm.is_active(dev));
        assert!(dm.device(dev).unwrap().has_priv());
        assert_eq!(
            events(&dm),
            ["uclass pre_remove stuck", "uclass post_probe stuck"]
        );
    }

    #[test]
    fn flags_select_what_goes() {
        let mut dm = new_dm();
        dm.init(None).unwrap();
        let root = dm.root().unwrap();
        let plain = dm.bind(Some(root), &LEAF_DRIVER, "plain", None, 0, None).unwrap();
        let os = dm.bind(Some(root), &OS_PREPARE_DRIVER, "os", None, 0, None).unwrap();
        let dma = dm.bind(Some(root), &DMA_DRIVER, "dma", None, 0, None).unwrap();
        for id in [plain, os, dma] {
            dm.probe(id).unwrap();
        }
        dm.remove_devices_flags(RemoveFlags::OS_PREPARE).unwrap();
        assert!(dm.is_active(plain));
        assert!(!dm.is_active(os));
        assert!(dm.is_active(dma));
        // The root keeps its activated children, so it stays up as well.
        assert!(dm.is_active(root));
        dm.remove_devices_flags(RemoveFlags::ACTIVE_ALL).unwrap();
        assert!(!dm.is_active(dma));
        dm.remove_devices_flags(RemoveFlags::NORMAL).unwrap();
        assert!(!dm.is_active(plain));
        assert!(!dm.is_active(root));
    }
}
