//! The root device, model start-up and tree scanning.
use crate::{
    device::{DeviceFlags, DeviceId},
    driver::{Driver, UclassDriver},
    error::{DmError, DmResult},
    model::Dm,
    probe::RemoveFlags,
    uclass_id::UclassId,
};
use alloc::vec::Vec;
use dt::{OfNode, OfTree};
use log::{error, info, warn};

pub static ROOT_DRIVER: Driver = Driver {
    name: "root_driver",
    id: UclassId::Root,
    ..Driver::DEFAULT
};

pub static ROOT_UCLASS: UclassDriver = UclassDriver {
    name: "root",
    id: UclassId::Root,
    ..UclassDriver::DEFAULT
};

impl Dm {
    /// Create and probe the root device for `tree`.
    ///
    /// Installs the console logger at the configured level and applies the configured
    /// relocation offset first. Any error is fatal: without a root no other operation means
    /// anything.
    pub fn init(&mut self, tree: Option<OfTree>) -> DmResult {
        if self.root.is_some() {
            error!("Virtual root driver already exists!");
            return Err(DmError::Invalid);
        }
        // Busy means a logger is already installed; it keeps its level.
        match crate::logging::init(self.config.log_level) {
            Ok(()) | Err(DmError::Busy) => {}
            Err(err) => return Err(err),
        }
        if let Some(offset) = self.config.reloc_offset.filter(|off| *off != 0) {
            if self.registry.reloc.offset().is_none() {
                self.relocate(offset)?;
            }
        }
        self.tree = tree;
        let node = tree.map(|t| t.root());
        let root = self
            .bind(None, &ROOT_DRIVER, ROOT_DRIVER.name, node, 0, None)
            .inspect_err(|err| error!("Cannot bind the root device: {}", err))?;
        self.probe(root)
            .inspect_err(|err| error!("Cannot probe the root device: {}", err))?;
        Ok(())
    }

    /// Bind the enabled children of `node` under `parent`.
    ///
    /// Children already bound to a device are left alone, and the scan does not descend into
    /// the children it binds: drivers that want their subtree scanned call [Dm::scan_dev]. A
    /// failing child is logged and skipped; the first error is returned at the end.
    pub fn scan_node(&mut self, parent: DeviceId, node: OfNode, pre_reloc_only: bool) -> DmResult {
        let mut first_err = None;
        for child in node.children() {
            if !child.is_enabled() {
                debug_ex!("   - ignoring disabled device '{}'", child.name());
                continue;
            }
            if self.device_find_global_by_ofnode(child).is_some() {
                continue;
            }
            if let Err(err) = self.lists_bind_fdt(parent, child, pre_reloc_only) {
                warn!("Failed to bind '{}': {}", child.full_path(), err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Scan the subtree of a bound device's own node.
    pub fn scan_dev(&mut self, dev: DeviceId) -> DmResult {
        let node = self.device(dev)?.node;
        match node {
            Some(node) => self.scan_node(dev, node, self.pre_reloc_only),
            None => Ok(()),
        }
    }

    /// Scan the tree from its root, then the configured auxiliary paths.
    pub fn scan_fdt(&mut self, pre_reloc_only: bool) -> DmResult {
        let Some(tree) = self.tree else {
            return Ok(());
        };
        let root = self.root.ok_or(DmError::NoDevice)?;
        let mut first_err = self.scan_node(root, tree.root(), pre_reloc_only).err();
        for path in self.config.scan_paths {
            let Some(node) = tree.path(path) else {
                continue;
            };
            if let Err(err) = self.scan_node(root, node, pre_reloc_only) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Bind static entries, then scan the tree. Returns the first error after doing both.
    pub fn scan(&mut self, pre_reloc_only: bool) -> DmResult {
        self.pre_reloc_only = pre_reloc_only;
        let plat = self.scan_plat(pre_reloc_only);
        let fdt = self.scan_fdt(pre_reloc_only);
        plat.and(fdt)
    }

    /// Probe every device whose driver asked to be probed right after binding.
    pub fn probe_devices(&mut self) -> DmResult {
        let mut first_err = None;
        for dev in self.walk() {
            if self.has_flags(dev, DeviceFlags::PROBE_AFTER_BIND) {
                if let Err(err) = self.probe(dev) {
                    first_err.get_or_insert(err);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Start the model: root device, static entries, tree scan, early probes.
    ///
    /// `Err` means the model could not start. `Ok(Some(err))` means it did but some devices
    /// were lost; `err` is the first such failure.
    pub fn init_and_scan(&mut self, tree: Option<OfTree>) -> DmResult<Option<DmError>> {
        self.init(tree)?;
        let pre_reloc_only = self.config.pre_reloc_only;
        let mut partial = self.scan(pre_reloc_only).err();
        if self.config.probe_after_bind {
            if let Err(err) = self.probe_devices() {
                partial.get_or_insert(err);
            }
        }
        info!(
            "Device model up: {} devices in {} uclasses.",
            self.device_count(),
            self.uclasses.len()
        );
        Ok(partial)
    }

    /// Tear everything down: remove and unbind all devices, then destroy the uclass instances.
    pub fn uninit(&mut self) -> DmResult {
        if let Some(root) = self.root {
            self.remove(root, RemoveFlags::NORMAL)?;
            self.unbind(root)?;
        }
        self.uclass_destroy_all()?;
        self.tree = None;
        Ok(())
    }

    /// Devices in depth-first order from the root, parents before children.
    pub fn walk(&self) -> Vec<DeviceId> {
        let mut order = Vec::with_capacity(self.device_count());
        let mut stack: Vec<DeviceId> = self.root.into_iter().collect();
        while let Some(dev) = stack.pop() {
            order.push(dev);
            if let Ok(dev) = self.device(dev) {
                stack.extend(dev.children.iter().rev());
            }
        }
        order
    }
}
