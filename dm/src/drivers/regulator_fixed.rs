//! Fixed-voltage regulator, optionally switched by a GPIO (`gpio`, polarity from
//! `enable-active-high`).
use crate::{
    class::{
        gpio::{GpioDesc, GpioFlags, dm_gpio_get_value, dm_gpio_set_value, gpio_request_by_name},
        regulator::{RegulatorOps, RegulatorUcPriv},
    },
    device::DeviceId,
    driver::{Auto, Driver, Ops, UdeviceId},
    error::{DmError, DmResult},
    model::Dm,
    uclass_id::UclassId,
};
use dt::PropertyError;

#[derive(Debug, Default)]
pub struct FixedRegulatorPriv {
    pub gpio: Option<GpioDesc>,
    /// State of regulators without an enable line.
    pub enabled: bool,
}

struct FixedRegulator;

impl RegulatorOps for FixedRegulator {
    fn get_value(&self, dm: &mut Dm, dev: DeviceId) -> DmResult<i32> {
        dm.uclass_priv::<RegulatorUcPriv>(dev)?.min_uv.ok_or(DmError::NoData)
    }

    fn get_enable(&self, dm: &mut Dm, dev: DeviceId) -> DmResult<bool> {
        let state = dm.priv_data::<FixedRegulatorPriv>(dev)?;
        let (gpio, enabled) = (state.gpio, state.enabled);
        match gpio {
            Some(gpio) => dm_gpio_get_value(dm, &gpio),
            None => Ok(enabled),
        }
    }

    fn set_enable(&self, dm: &mut Dm, dev: DeviceId, enable: bool) -> DmResult {
        let gpio = dm.priv_data::<FixedRegulatorPriv>(dev)?.gpio;
        match gpio {
            Some(gpio) => dm_gpio_set_value(dm, &gpio, enable),
            None if enable => {
                dm.priv_data_mut::<FixedRegulatorPriv>(dev)?.enabled = true;
                Ok(())
            }
            None => Err(DmError::Unsupported),
        }
    }
}

fn fixed_regulator_probe(dm: &mut Dm, dev: DeviceId) -> DmResult {
    let uc_priv = dm.uclass_priv::<RegulatorUcPriv>(dev)?;
    if uc_priv.min_uv != uc_priv.max_uv {
        return Err(DmError::Driver { info: "fixed regulator with a voltage range" });
    }
    let active_high = dm
        .device(dev)?
        .node
        .is_some_and(|node| node.read_bool("enable-active-high"));

    let gpio = match gpio_request_by_name(dm, dev, "gpio", 0, GpioFlags::IS_OUT) {
        Ok(mut desc) => {
            desc.flags.set(GpioFlags::ACTIVE_LOW, !active_high);
            dm_gpio_set_value(dm, &desc, false)?;
            Some(desc)
        }
        Err(DmError::Property(PropertyError::PropNotFound)) => None,
        Err(err) => return Err(err),
    };
    dm.priv_data_mut::<FixedRegulatorPriv>(dev)?.gpio = gpio;
    Ok(())
}

pub static FIXED_REGULATOR_DRIVER: Driver = Driver {
    name: "regulator_fixed",
    id: UclassId::Regulator,
    of_match: &[UdeviceId::new("regulator-fixed")],
    ops: Ops::Regulator(&FixedRegulator),
    probe: Some(fixed_regulator_probe),
    priv_auto: Some(Auto::of::<FixedRegulatorPriv>()),
    ..Driver::DEFAULT
};
