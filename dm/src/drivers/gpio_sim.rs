//! A GPIO bank held in memory, for boards without real pins and for tests.
//!
//! Tree properties: `ngpios` (default 32, at most 64) and `gpio-bank-name` (default: the
//! device name).
use crate::{
    class::gpio::{GpioDevPriv, GpioFunction, GpioOps},
    device::DeviceId,
    driver::{Auto, Driver, Ops, UdeviceId},
    error::{DmError, DmResult},
    model::Dm,
    uclass_id::UclassId,
};
use alloc::string::String;

#[derive(Debug, Default)]
pub struct SimGpioPriv {
    /// Bit set for lines configured as outputs.
    pub dir_out: u64,
    pub values: u64,
}

struct SimGpio;

fn bit(offset: u32) -> u64 {
    1 << offset
}

impl GpioOps for SimGpio {
    fn direction_input(&self, dm: &mut Dm, dev: DeviceId, offset: u32) -> DmResult {
        dm.priv_data_mut::<SimGpioPriv>(dev)?.dir_out &= !bit(offset);
        Ok(())
    }

    fn direction_output(&self, dm: &mut Dm, dev: DeviceId, offset: u32, value: bool) -> DmResult {
        let state = dm.priv_data_mut::<SimGpioPriv>(dev)?;
        state.dir_out |= bit(offset);
        if value {
            state.values |= bit(offset);
        } else {
            state.values &= !bit(offset);
        }
        Ok(())
    }

    fn get_value(&self, dm: &mut Dm, dev: DeviceId, offset: u32) -> DmResult<bool> {
        Ok(dm.priv_data::<SimGpioPriv>(dev)?.values & bit(offset) != 0)
    }

    fn set_value(&self, dm: &mut Dm, dev: DeviceId, offset: u32, value: bool) -> DmResult {
        let state = dm.priv_data_mut::<SimGpioPriv>(dev)?;
        if state.dir_out & bit(offset) == 0 {
            return Err(DmError::Invalid);
        }
        if value {
            state.values |= bit(offset);
        } else {
            state.values &= !bit(offset);
        }
        Ok(())
    }

    fn get_function(&self, dm: &mut Dm, dev: DeviceId, offset: u32) -> DmResult<GpioFunction> {
        if dm.priv_data::<SimGpioPriv>(dev)?.dir_out & bit(offset) != 0 {
            Ok(GpioFunction::Output)
        } else {
            Ok(GpioFunction::Input)
        }
    }
}

fn sim_gpio_probe(dm: &mut Dm, dev: DeviceId) -> DmResult {
    let device = dm.device(dev)?;
    let (count, bank_name) = match device.node {
        Some(node) => (
            node.read_u32_default("ngpios", 32),
            node.read_string("gpio-bank-name")
                .map_or_else(|_| device.name.clone(), String::from),
        ),
        None => (32, device.name.clone()),
    };
    if count > 64 {
        return Err(DmError::Driver { info: "too many lines for a simulated bank" });
    }
    let uc_priv = dm.uclass_priv_mut::<GpioDevPriv>(dev)?;
    uc_priv.gpio_count = count;
    uc_priv.bank_name = bank_name;
    Ok(())
}

pub static SIM_GPIO_DRIVER: Driver = Driver {
    name: "gpio_sim",
    id: UclassId::Gpio,
    of_match: &[UdeviceId::new("sim,gpio-bank")],
    ops: Ops::Gpio(&SimGpio),
    probe: Some(sim_gpio_probe),
    priv_auto: Some(Auto::of::<SimGpioPriv>()),
    ..Driver::DEFAULT
};
