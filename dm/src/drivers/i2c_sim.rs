//! An I2C controller with register-file chips behind it.
//!
//! Each address listed in `sim,chips` answers with 256 byte-wide registers. A write sets the
//! register pointer from its first byte and stores the rest; a read continues from the pointer.
use crate::{
    class::i2c::{I2C_SPEED_FAST_RATE, I2cChipFlags, I2cMsg, I2cMsgFlags, I2cOps},
    device::DeviceId,
    driver::{Auto, Driver, Ops, UdeviceId},
    error::{DmError, DmResult},
    model::Dm,
    uclass_id::UclassId,
};
use alloc::vec::Vec;

pub struct SimChip {
    pub addr: u16,
    pub regs: [u8; 256],
    pub pointer: u8,
}

#[derive(Default)]
pub struct SimI2cPriv {
    pub chips: Vec<SimChip>,
    pub speed_hz: u32,
}

impl SimI2cPriv {
    fn chip(&mut self, addr: u16) -> DmResult<&mut SimChip> {
        self.chips.iter_mut().find(|c| c.addr == addr).ok_or(DmError::Io)
    }
}

struct SimI2c;

impl I2cOps for SimI2c {
    fn transfer(&self, dm: &mut Dm, bus: DeviceId, msgs: &mut [I2cMsg]) -> DmResult {
        let state = dm.priv_data_mut::<SimI2cPriv>(bus)?;
        for msg in msgs.iter_mut() {
            let chip = state.chip(msg.addr)?;
            if msg.flags.contains(I2cMsgFlags::RD) {
                for byte in msg.buf.iter_mut() {
                    *byte = chip.regs[chip.pointer as usize];
                    chip.pointer = chip.pointer.wrapping_add(1);
                }
            } else if let Some((first, rest)) = msg.buf.split_first() {
                chip.pointer = *first;
                for byte in rest {
                    chip.regs[chip.pointer as usize] = *byte;
                    chip.pointer = chip.pointer.wrapping_add(1);
                }
            }
        }
        Ok(())
    }

    fn probe_chip(&self, dm: &mut Dm, bus: DeviceId, chip_addr: u16, _chip_flags: I2cChipFlags) -> DmResult {
        dm.priv_data_mut::<SimI2cPriv>(bus)?.chip(chip_addr).map(|_| ())
    }

    fn set_bus_speed(&self, dm: &mut Dm, bus: DeviceId, speed: u32) -> DmResult {
        if speed > I2C_SPEED_FAST_RATE {
            return Err(DmError::Invalid);
        }
        dm.priv_data_mut::<SimI2cPriv>(bus)?.speed_hz = speed;
        Ok(())
    }

    fn get_bus_speed(&self, dm: &mut Dm, bus: DeviceId) -> DmResult<u32> {
        Ok(dm.priv_data::<SimI2cPriv>(bus)?.speed_hz)
    }
}

fn sim_i2c_probe(dm: &mut Dm, bus: DeviceId) -> DmResult {
    let addrs = match dm.device(bus)?.node {
        Some(node) => node.read_u32_array("sim,chips").unwrap_or_default(),
        None => Vec::new(),
    };
    let chips = addrs
        .into_iter()
        .map(|addr| {
            Ok(SimChip {
                addr: u16::try_from(addr).map_err(|_| DmError::Invalid)?,
                regs: [0; 256],
                pointer: 0,
            })
        })
        .collect::<DmResult<Vec<_>>>()?;
    dm.priv_data_mut::<SimI2cPriv>(bus)?.chips = chips;
    Ok(())
}

pub static SIM_I2C_DRIVER: Driver = Driver {
    name: "i2c_sim",
    id: UclassId::I2c,
    of_match: &[UdeviceId::new("sim,i2c")],
    ops: Ops::I2c(&SimI2c),
    probe: Some(sim_i2c_probe),
    priv_auto: Some(Auto::of::<SimI2cPriv>()),
    ..Driver::DEFAULT
};
