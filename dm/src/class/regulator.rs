//! Voltage regulators.
//!
//! Constraints come from the standard tree properties (`regulator-name`,
//! `regulator-min-microvolt`, `regulator-max-microvolt`, `regulator-always-on`,
//! `regulator-boot-on`) and are enforced here, before a driver is asked to act.
use crate::{
    device::DeviceId,
    driver::{Auto, Ops, UclassDriver},
    error::{DmError, DmResult},
    model::Dm,
    uclass_id::UclassId,
};
use alloc::string::String;
use log::{debug, warn};

/// Constraints of one regulator, read when it is probed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegulatorUcPriv {
    pub name: String,
    pub min_uv: Option<i32>,
    pub max_uv: Option<i32>,
    pub always_on: bool,
    pub boot_on: bool,
}

pub trait RegulatorOps: Sync {
    /// Output voltage in microvolts.
    fn get_value(&self, _dm: &mut Dm, _dev: DeviceId) -> DmResult<i32> {
        Err(DmError::Unsupported)
    }

    fn set_value(&self, _dm: &mut Dm, _dev: DeviceId, _uv: i32) -> DmResult {
        Err(DmError::Unsupported)
    }

    fn get_enable(&self, dm: &mut Dm, dev: DeviceId) -> DmResult<bool>;
    fn set_enable(&self, dm: &mut Dm, dev: DeviceId, enable: bool) -> DmResult;
}

pub fn regulator_get_ops(dm: &Dm, dev: DeviceId) -> DmResult<&'static dyn RegulatorOps> {
    match dm.driver_of(dev)?.ops {
        Ops::Regulator(ops) => Ok(ops),
        _ => Err(DmError::Unsupported),
    }
}

/// `regulator-name`, falling back to the device name.
pub fn regulator_name(dm: &Dm, dev: DeviceId) -> DmResult<String> {
    let device = dm.device(dev)?;
    Ok(device
        .node
        .and_then(|node| node.read_string("regulator-name").ok())
        .map_or_else(|| device.name.clone(), String::from))
}

fn regulator_post_bind(dm: &mut Dm, dev: DeviceId) -> DmResult {
    let name = regulator_name(dm, dev)?;
    for other in dm.uclass_devices(UclassId::Regulator) {
        if other != dev && regulator_name(dm, other)? == name {
            warn!("Regulator name '{}' is not unique.", name);
            return Err(DmError::Invalid);
        }
    }
    Ok(())
}

fn regulator_pre_probe(dm: &mut Dm, dev: DeviceId) -> DmResult {
    let name = regulator_name(dm, dev)?;
    let node = dm.device(dev)?.node;
    let uc_priv = dm.uclass_priv_mut::<RegulatorUcPriv>(dev)?;
    uc_priv.name = name;
    if let Some(node) = node {
        uc_priv.min_uv = node.read_u32("regulator-min-microvolt").ok().map(|v| v as i32);
        uc_priv.max_uv = node.read_u32("regulator-max-microvolt").ok().map(|v| v as i32);
        uc_priv.always_on = node.read_bool("regulator-always-on");
        uc_priv.boot_on = node.read_bool("regulator-boot-on");
    }
    Ok(())
}

pub static REGULATOR_UCLASS: UclassDriver = UclassDriver {
    name: "regulator",
    id: UclassId::Regulator,
    post_bind: Some(regulator_post_bind),
    pre_probe: Some(regulator_pre_probe),
    per_device_auto: Some(Auto::of::<RegulatorUcPriv>()),
    ..UclassDriver::DEFAULT
};

fn probed_ops(dm: &mut Dm, dev: DeviceId) -> DmResult<&'static dyn RegulatorOps> {
    dm.probe(dev)?;
    regulator_get_ops(dm, dev)
}

pub fn regulator_get_value(dm: &mut Dm, dev: DeviceId) -> DmResult<i32> {
    probed_ops(dm, dev)?.get_value(dm, dev)
}

/// Set the output voltage. Values outside the constraints fail with [DmError::Invalid].
pub fn regulator_set_value(dm: &mut Dm, dev: DeviceId, uv: i32) -> DmResult {
    let ops = probed_ops(dm, dev)?;
    let uc_priv = dm.uclass_priv::<RegulatorUcPriv>(dev)?;
    if uc_priv.min_uv.is_some_and(|min| uv < min) || uc_priv.max_uv.is_some_and(|max| uv > max) {
        return Err(DmError::Invalid);
    }
    ops.set_value(dm, dev, uv)
}

pub fn regulator_get_enable(dm: &mut Dm, dev: DeviceId) -> DmResult<bool> {
    probed_ops(dm, dev)?.get_enable(dm, dev)
}

/// Switch the output. An always-on regulator refuses to turn off with [DmError::Busy].
pub fn regulator_set_enable(dm: &mut Dm, dev: DeviceId, enable: bool) -> DmResult {
    let ops = probed_ops(dm, dev)?;
    if !enable && dm.uclass_priv::<RegulatorUcPriv>(dev)?.always_on {
        return Err(DmError::Busy);
    }
    ops.set_enable(dm, dev, enable)
}

/// The regulator whose `regulator-name` (or device name) is `name`, probed.
pub fn regulator_get_by_platname(dm: &mut Dm, name: &str) -> DmResult<DeviceId> {
    for dev in dm.uclass_devices(UclassId::Regulator) {
        if regulator_name(dm, dev)? == name {
            dm.probe(dev)?;
            return Ok(dev);
        }
    }
    debug!("Regulator '{}' not found.", name);
    Err(DmError::NoDevice)
}

pub fn regulator_get_by_devname(dm: &mut Dm, devname: &str) -> DmResult<DeviceId> {
    dm.uclass_get_device_by_name(UclassId::Regulator, devname)
}

/// Apply the boot-time constraints: a fixed voltage is set and the output enabled.
///
/// Regulators that are neither always-on nor boot-on are left alone.
pub fn regulator_autoset(dm: &mut Dm, dev: DeviceId) -> DmResult {
    probed_ops(dm, dev)?;
    let uc_priv = dm.uclass_priv::<RegulatorUcPriv>(dev)?.clone();
    if !uc_priv.always_on && !uc_priv.boot_on {
        return Ok(());
    }
    if let (Some(min), Some(max)) = (uc_priv.min_uv, uc_priv.max_uv) {
        if min == max {
            match regulator_set_value(dm, dev, min) {
                Ok(()) | Err(DmError::Unsupported) => {}
                Err(err) => return Err(err),
            }
        }
    }
    regulator_set_enable(dm, dev, true)
}

/// Run [regulator_autoset] on every regulator. Keeps going on failure and returns the first
/// error.
pub fn regulators_enable_boot_on(dm: &mut Dm) -> DmResult {
    let mut first_err = None;
    for dev in dm.uclass_devices(UclassId::Regulator) {
        if let Err(err) = regulator_autoset(dm, dev) {
            warn!("Cannot set up regulator '{}': {}", dm.device(dev)?.name, err);
            first_err.get_or_insert(err);
        }
    }
    first_err.map_or(Ok(()), Err)
}
