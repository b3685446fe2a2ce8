//! Drivers, uclasses and trees shared by the unit tests.
//!
//! Every logging hook appends `"<event> <device name>"` to the class-wide storage of the test
//! uclass, so a test can assert the order in which the core called them.
use crate::{
    DmConfig,
    device::DeviceId,
    driver::{Auto, Driver, DriverFlags, UclassDriver, UdeviceId},
    drivers::{DEFAULT_DRIVERS, DEFAULT_UCLASSES},
    error::{DmError, DmResult},
    model::Dm,
    registry::Registry,
    uclass_id::UclassId,
};
use alloc::{boxed::Box, format, string::String, vec::Vec};
use dt::{FdtWriter, FlatTree, OfTree};

#[derive(Debug, Default)]
pub struct TestLog(pub Vec<String>);

#[derive(Debug, Default)]
pub struct TestPlat {
    pub value: u32,
}

#[derive(Debug, Default)]
pub struct TestPriv {
    pub probe_count: u32,
}

/// Per-child config the test bus hands its children.
#[derive(Debug, Default)]
pub struct TestParentPlat {
    pub bound_by: &'static str,
}

fn log_event(dm: &mut Dm, event: &str, dev: DeviceId) -> DmResult {
    let name = dm.device(dev)?.name.clone();
    dm.uclass_get(UclassId::Test)?;
    dm.uclass_class_priv_mut::<TestLog>(UclassId::Test)?
        .0
        .push(format!("{} {}", event, name));
    Ok(())
}

pub fn events(dm: &Dm) -> Vec<String> {
    dm.uclass_class_priv::<TestLog>(UclassId::Test)
        .map(|log| log.0.clone())
        .unwrap_or_default()
}

pub fn clear_events(dm: &mut Dm) {
    if let Ok(log) = dm.uclass_class_priv_mut::<TestLog>(UclassId::Test) {
        log.0.clear();
    }
}

fn leaf_bind(dm: &mut Dm, dev: DeviceId) -> DmResult {
    log_event(dm, "bind", dev)
}

fn leaf_probe(dm: &mut Dm, dev: DeviceId) -> DmResult {
    dm.priv_data_mut::<TestPriv>(dev)?.probe_count += 1;
    log_event(dm, "probe", dev)
}

fn leaf_remove(dm: &mut Dm, dev: DeviceId) -> DmResult {
    log_event(dm, "remove", dev)
}

fn leaf_unbind(dm: &mut Dm, dev: DeviceId) -> DmResult {
    log_event(dm, "unbind", dev)
}

pub static LEAF_DRIVER: Driver = Driver {
    name: "test_leaf",
    id: UclassId::Test,
    of_match: &[UdeviceId::with_data("test,leaf", 7), UdeviceId::new("test,picky")],
    bind: Some(leaf_bind),
    probe: Some(leaf_probe),
    remove: Some(leaf_remove),
    unbind: Some(leaf_unbind),
    plat_auto: Some(Auto::of::<TestPlat>()),
    priv_auto: Some(Auto::of::<TestPriv>()),
    ..Driver::DEFAULT
};

fn picky_bind(_dm: &mut Dm, _dev: DeviceId) -> DmResult {
    Err(DmError::NoDevice)
}

/// Matches `test,picky` first but never takes the node.
pub static PICKY_DRIVER: Driver = Driver {
    name: "test_picky",
    id: UclassId::Test,
    of_match: &[UdeviceId::new("test,picky")],
    bind: Some(picky_bind),
    ..Driver::DEFAULT
};

fn bus_bind(dm: &mut Dm, dev: DeviceId) -> DmResult {
    dm.scan_dev(dev)
}

fn bus_child_post_bind(dm: &mut Dm, child: DeviceId) -> DmResult {
    dm.parent_plat_mut::<TestParentPlat>(child)?.bound_by = "test_bus";
    log_event(dm, "bus child_post_bind", child)
}

fn bus_child_pre_probe(dm: &mut Dm, child: DeviceId) -> DmResult {
    log_event(dm, "bus child_pre_probe", child)
}

fn bus_child_post_remove(dm: &mut Dm, child: DeviceId) -> DmResult {
    log_event(dm, "bus child_post_remove", child)
}

fn bus_child_pre_unbind(dm: &mut Dm, child: DeviceId) -> DmResult {
    log_event(dm, "bus child_pre_unbind", child)
}

pub static BUS_DRIVER: Driver = Driver {
    name: "test_bus",
    id: UclassId::TestBus,
    of_match: &[UdeviceId::new("test,bus")],
    bind: Some(bus_bind),
    child_post_bind: Some(bus_child_post_bind),
    child_pre_probe: Some(bus_child_pre_probe),
    child_post_remove: Some(bus_child_post_remove),
    child_pre_unbind: Some(bus_child_pre_unbind),
    per_child_plat_auto: Some(Auto::of::<TestParentPlat>()),
    ..Driver::DEFAULT
};

/// Copies `value` from the node into [TestPlat]; fails when the node has none.
fn config_of_to_plat(dm: &mut Dm, dev: DeviceId) -> DmResult {
    log_event(dm, "of_to_plat", dev)?;
    let node = dm.device(dev)?.node.ok_or(DmError::Invalid)?;
    let value = node.read_u32("value")?;
    dm.plat_mut::<TestPlat>(dev)?.value = value;
    Ok(())
}

pub static CONFIG_DRIVER: Driver = Driver {
    name: "test_config",
    id: UclassId::Test,
    of_match: &[UdeviceId::new("test,config")],
    bind: Some(leaf_bind),
    probe: Some(leaf_probe),
    remove: Some(leaf_remove),
    of_to_plat: Some(config_of_to_plat),
    plat_auto: Some(Auto::of::<TestPlat>()),
    priv_auto: Some(Auto::of::<TestPriv>()),
    ..Driver::DEFAULT
};

fn fail_probe(_dm: &mut Dm, _dev: DeviceId) -> DmResult {
    Err(DmError::Io)
}

pub static FAIL_PROBE_DRIVER: Driver = Driver {
    name: "test_fail_probe",
    id: UclassId::Test,
    probe: Some(fail_probe),
    plat_auto: Some(Auto::of::<TestPlat>()),
    priv_auto: Some(Auto::of::<TestPriv>()),
    ..Driver::DEFAULT
};

fn fail_bind(_dm: &mut Dm, _dev: DeviceId) -> DmResult {
    Err(DmError::Driver { info: "bind refused" })
}

pub static FAIL_BIND_DRIVER: Driver = Driver {
    name: "test_fail_bind",
    id: UclassId::Test,
    bind: Some(fail_bind),
    plat_auto: Some(Auto::of::<TestPlat>()),
    ..Driver::DEFAULT
};

fn refuse_remove(_dm: &mut Dm, _dev: DeviceId) -> DmResult {
    Err(DmError::Busy)
}

pub static REFUSE_REMOVE_DRIVER: Driver = Driver {
    name: "test_refuse_remove",
    id: UclassId::Test,
    remove: Some(refuse_remove),
    priv_auto: Some(Auto::of::<TestPriv>()),
    ..Driver::DEFAULT
};

pub static OS_PREPARE_DRIVER: Driver = Driver {
    name: "test_os_prepare",
    id: UclassId::Test,
    flags: DriverFlags::OS_PREPARE,
    ..Driver::DEFAULT
};

pub static DMA_DRIVER: Driver = Driver {
    name: "test_dma",
    id: UclassId::Test,
    flags: DriverFlags::ACTIVE_DMA,
    ..Driver::DEFAULT
};

pub static EAGER_DRIVER: Driver = Driver {
    name: "test_eager",
    id: UclassId::Test,
    of_match: &[UdeviceId::new("test,eager")],
    flags: DriverFlags::PROBE_AFTER_BIND,
    ..Driver::DEFAULT
};

fn uc_post_bind(dm: &mut Dm, dev: DeviceId) -> DmResult {
    log_event(dm, "uclass post_bind", dev)
}

fn uc_pre_unbind(dm: &mut Dm, dev: DeviceId) -> DmResult {
    log_event(dm, "uclass pre_unbind", dev)
}

fn uc_pre_probe(dm: &mut Dm, dev: DeviceId) -> DmResult {
    log_event(dm, "uclass pre_probe", dev)
}

fn uc_post_probe(dm: &mut Dm, dev: DeviceId) -> DmResult {
    log_event(dm, "uclass post_probe", dev)
}

fn uc_pre_remove(dm: &mut Dm, dev: DeviceId) -> DmResult {
    log_event(dm, "uclass pre_remove", dev)
}

pub static TEST_UCLASS: UclassDriver = UclassDriver {
    name: "test",
    id: UclassId::Test,
    post_bind: Some(uc_post_bind),
    pre_unbind: Some(uc_pre_unbind),
    pre_probe: Some(uc_pre_probe),
    post_probe: Some(uc_post_probe),
    pre_remove: Some(uc_pre_remove),
    priv_auto: Some(Auto::of::<TestLog>()),
    per_device_auto: Some(Auto::of::<TestPriv>()),
    ..UclassDriver::DEFAULT
};

pub static TEST_BUS_UCLASS: UclassDriver = UclassDriver {
    name: "test_bus",
    id: UclassId::TestBus,
    ..UclassDriver::DEFAULT
};

pub static TEST_DRIVERS: &[&Driver] = &[
    &PICKY_DRIVER,
    &LEAF_DRIVER,
    &BUS_DRIVER,
    &FAIL_PROBE_DRIVER,
    &FAIL_BIND_DRIVER,
    &REFUSE_REMOVE_DRIVER,
    &OS_PREPARE_DRIVER,
    &DMA_DRIVER,
    &EAGER_DRIVER,
    &CONFIG_DRIVER,
];

pub static TEST_UCLASSES: &[&UclassDriver] = &[&TEST_UCLASS, &TEST_BUS_UCLASS];

/// A model with only the test drivers (plus the built-in root and simple-bus).
pub fn new_dm() -> Dm {
    Dm::new(Registry::new(TEST_DRIVERS, TEST_UCLASSES, &[]), DmConfig::default())
}

/// A model with the test drivers and the bundled class drivers.
pub fn new_full_dm() -> Dm {
    let drivers: Vec<&'static Driver> = TEST_DRIVERS.iter().chain(DEFAULT_DRIVERS).copied().collect();
    let uclasses: Vec<&'static UclassDriver> =
        TEST_UCLASSES.iter().chain(DEFAULT_UCLASSES).copied().collect();
    Dm::new(Registry::new(&drivers, &uclasses, &[]), DmConfig::default())
}

/// Build a flattened tree whose root has one-cell addresses and sizes; `body` writes the
/// root's children. The blob lives for the rest of the test run.
pub fn flat_tree(body: impl FnOnce(&mut FdtWriter)) -> OfTree {
    let mut w = FdtWriter::new();
    w.begin_node("");
    w.property_u32("#address-cells", 1);
    w.property_u32("#size-cells", 1);
    body(&mut w);
    w.end_node();
    let blob: &'static [u8] = Box::leak(w.finish().unwrap().into_boxed_slice());
    let flat: &'static FlatTree = Box::leak(Box::new(FlatTree::new(blob).unwrap()));
    OfTree::Flat(flat)
}
