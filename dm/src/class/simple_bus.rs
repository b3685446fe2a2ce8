//! Transparent buses (`simple-bus`, `simple-mfd`) whose children are ordinary devices.
use crate::{
    device::DeviceId,
    driver::{Auto, Driver, DriverFlags, UclassDriver, UdeviceId},
    error::DmResult,
    model::Dm,
    uclass_id::UclassId,
};
use log::warn;

/// The first `ranges` entry of the bus: child addresses `[base, base + size)` map to `target`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimpleBusPlat {
    pub base: u64,
    pub size: u64,
    pub target: u64,
}

fn fold_cells(cells: &[u32]) -> u64 {
    cells.iter().fold(0, |acc, cell| (acc << 32) | *cell as u64)
}

fn simple_bus_post_bind(dm: &mut Dm, dev: DeviceId) -> DmResult {
    let Some(node) = dm.device(dev)?.node else {
        return Ok(());
    };
    if let Ok(cells) = node.read_u32_array("ranges") {
        let child_cells = node.address_cells() as usize;
        let parent_cells = node.parent().map_or(2, |p| p.address_cells()) as usize;
        let size_cells = node.size_cells() as usize;
        if cells.len() >= child_cells + parent_cells + size_cells {
            if let Ok(plat) = dm.plat_mut::<SimpleBusPlat>(dev) {
                plat.base = fold_cells(&cells[..child_cells]);
                plat.target = fold_cells(&cells[child_cells..child_cells + parent_cells]);
                plat.size = fold_cells(&cells[child_cells + parent_cells..][..size_cells]);
            }
        }
    }
    // A child that fails to bind stays out of the tree; the bus and its other children remain.
    if let Err(err) = dm.scan_dev(dev) {
        warn!("Scan under '{}' incomplete: {}", dm.device(dev)?.name, err);
    }
    Ok(())
}

/// Translate a child bus address to the parent's address space.
pub fn simple_bus_translate(dm: &Dm, dev: DeviceId, addr: u64) -> DmResult<u64> {
    let plat = dm.plat::<SimpleBusPlat>(dev)?;
    Ok(addr.wrapping_sub(plat.base).wrapping_add(plat.target))
}

pub static SIMPLE_BUS_UCLASS: UclassDriver = UclassDriver {
    name: "simple_bus",
    id: UclassId::SimpleBus,
    post_bind: Some(simple_bus_post_bind),
    ..UclassDriver::DEFAULT
};

pub static SIMPLE_BUS_DRIVER: Driver = Driver {
    name: "simple_bus",
    id: UclassId::SimpleBus,
    of_match: &[UdeviceId::new("simple-bus"), UdeviceId::new("simple-mfd")],
    flags: DriverFlags::PRE_RELOC,
    plat_auto: Some(Auto::of::<SimpleBusPlat>()),
    ..Driver::DEFAULT
};
