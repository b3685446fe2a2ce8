//! I2C buses and the chips on them.
//!
//! A bus device owns its chips as children. Each chip carries a [DmI2cChip] in its
//! `parent_plat` block, taken from its `reg` property when bound from the tree. Chips that are
//! not described in the tree are bound on demand to the generic chip driver by [i2c_get_chip].
use crate::{
    device::DeviceId,
    driver::{Auto, Driver, Ops, UclassDriver, UclassFlags, UdeviceId},
    error::{DmError, DmResult},
    model::Dm,
    uclass_id::UclassId,
};
use alloc::{format, vec, vec::Vec};
use bitflags::bitflags;
use log::warn;

/// Bus speed used when the tree gives no `clock-frequency`.
pub const I2C_SPEED_STANDARD_RATE: u32 = 100_000;
pub const I2C_SPEED_FAST_RATE: u32 = 400_000;

bitflags! {
    pub struct I2cMsgFlags: u16 {
        const RD = 1 << 0;
        const TEN = 1 << 4;
        const NOSTART = 1 << 14;
        const STOP = 1 << 15;
    }
}

bitflags! {
    /// Chip quirks stored in [DmI2cChip::flags].
    pub struct I2cChipFlags: u32 {
        const TEN_BIT_ADDRESS = 1 << 0;
        /// Send the register offset and read the data in separate transfers.
        const RD_ADDRESS = 1 << 1;
    }
}

/// One segment of a transfer.
#[derive(Debug)]
pub struct I2cMsg<'a> {
    pub addr: u16,
    pub flags: I2cMsgFlags,
    pub buf: &'a mut [u8],
}

/// Per-bus state kept by the uclass.
#[derive(Debug, Default)]
pub struct DmI2cBus {
    pub speed_hz: u32,
}

/// Per-chip settings, held in the chip's `parent_plat`.
#[derive(Debug, Clone, Copy)]
pub struct DmI2cChip {
    pub chip_addr: u16,
    /// Bytes of register offset sent before data.
    pub offset_len: u32,
    pub flags: I2cChipFlags,
}

impl Default for DmI2cChip {
    fn default() -> Self {
        DmI2cChip {
            chip_addr: 0,
            offset_len: 1,
            flags: I2cChipFlags::empty(),
        }
    }
}

pub trait I2cOps: Sync {
    /// Run `msgs` back to back with repeated starts.
    fn transfer(&self, dm: &mut Dm, bus: DeviceId, msgs: &mut [I2cMsg]) -> DmResult;

    /// Check that a chip answers. Without this, [dm_i2c_probe] sends an empty write.
    fn probe_chip(&self, _dm: &mut Dm, _bus: DeviceId, _chip_addr: u16, _chip_flags: I2cChipFlags) -> DmResult {
        Err(DmError::Unsupported)
    }

    fn set_bus_speed(&self, _dm: &mut Dm, _bus: DeviceId, _speed: u32) -> DmResult {
        Ok(())
    }

    /// Without this, the speed last set through the uclass is reported.
    fn get_bus_speed(&self, _dm: &mut Dm, _bus: DeviceId) -> DmResult<u32> {
        Err(DmError::Unsupported)
    }
}

pub fn i2c_get_ops(dm: &Dm, bus: DeviceId) -> DmResult<&'static dyn I2cOps> {
    match dm.driver_of(bus)?.ops {
        Ops::I2c(ops) => Ok(ops),
        _ => Err(DmError::Unsupported),
    }
}

fn i2c_post_bind(dm: &mut Dm, bus: DeviceId) -> DmResult {
    // Chips that fail to bind are skipped; the bus stays usable for the rest.
    if let Err(err) = dm.scan_dev(bus) {
        warn!("Chip scan on '{}' incomplete: {}", dm.device(bus)?.name, err);
    }
    Ok(())
}

fn i2c_post_probe(dm: &mut Dm, bus: DeviceId) -> DmResult {
    let speed = match dm.device(bus)?.node {
        Some(node) => node.read_u32_default("clock-frequency", I2C_SPEED_STANDARD_RATE),
        None => I2C_SPEED_STANDARD_RATE,
    };
    dm_i2c_set_bus_speed(dm, bus, speed)
}

fn i2c_child_post_bind(dm: &mut Dm, chip: DeviceId) -> DmResult {
    let Some(node) = dm.device(chip)?.node else {
        return Ok(());
    };
    let addr = node.read_u32("reg")?;
    let plat = dm.parent_plat_mut::<DmI2cChip>(chip)?;
    plat.chip_addr = u16::try_from(addr).map_err(|_| DmError::Invalid)?;
    plat.offset_len = 1;
    if addr > 0x7f {
        plat.flags.insert(I2cChipFlags::TEN_BIT_ADDRESS);
    }
    Ok(())
}

pub static I2C_UCLASS: UclassDriver = UclassDriver {
    name: "i2c",
    id: UclassId::I2c,
    flags: UclassFlags::SEQ_ALIAS,
    post_bind: Some(i2c_post_bind),
    post_probe: Some(i2c_post_probe),
    child_post_bind: Some(i2c_child_post_bind),
    per_device_auto: Some(Auto::of::<DmI2cBus>()),
    per_child_plat_auto: Some(Auto::of::<DmI2cChip>()),
    ..UclassDriver::DEFAULT
};

pub static I2C_GENERIC_UCLASS: UclassDriver = UclassDriver {
    name: "i2c_generic",
    id: UclassId::I2cGeneric,
    ..UclassDriver::DEFAULT
};

pub static I2C_GENERIC_CHIP_DRIVER: Driver = Driver {
    name: "i2c_generic_chip_drv",
    id: UclassId::I2cGeneric,
    of_match: &[UdeviceId::new("i2c-chip")],
    ..Driver::DEFAULT
};

/// The bus a chip hangs off and the chip's settings.
fn chip_info(dm: &Dm, chip: DeviceId) -> DmResult<(DeviceId, DmI2cChip)> {
    let bus = dm.parent(chip)?.ok_or(DmError::NoDevice)?;
    Ok((bus, *dm.parent_plat::<DmI2cChip>(chip)?))
}

fn offset_bytes(chip: &DmI2cChip, offset: u32) -> DmResult<Vec<u8>> {
    if chip.offset_len > 4 {
        return Err(DmError::Invalid);
    }
    Ok(offset.to_be_bytes()[4 - chip.offset_len as usize..].to_vec())
}

fn msg_flags(chip: &DmI2cChip) -> I2cMsgFlags {
    if chip.flags.contains(I2cChipFlags::TEN_BIT_ADDRESS) {
        I2cMsgFlags::TEN
    } else {
        I2cMsgFlags::empty()
    }
}

/// Run a transfer on a chip's bus. Every message is addressed to the chip.
pub fn dm_i2c_xfer(dm: &mut Dm, chip: DeviceId, msgs: &mut [I2cMsg]) -> DmResult {
    let (bus, info) = chip_info(dm, chip)?;
    dm.probe(chip)?;
    for msg in msgs.iter_mut() {
        msg.addr = info.chip_addr;
    }
    i2c_get_ops(dm, bus)?.transfer(dm, bus, msgs)
}

/// Read `buf.len()` bytes starting at register `offset`.
pub fn dm_i2c_read(dm: &mut Dm, chip: DeviceId, offset: u32, buf: &mut [u8]) -> DmResult {
    let (bus, info) = chip_info(dm, chip)?;
    dm.probe(chip)?;
    let ops = i2c_get_ops(dm, bus)?;
    let mut offset_buf = offset_bytes(&info, offset)?;
    let flags = msg_flags(&info);
    let read = I2cMsg {
        addr: info.chip_addr,
        flags: flags | I2cMsgFlags::RD,
        buf,
    };
    if info.offset_len == 0 {
        return ops.transfer(dm, bus, &mut [read]);
    }
    let write = I2cMsg {
        addr: info.chip_addr,
        flags,
        buf: &mut offset_buf,
    };
    if info.flags.contains(I2cChipFlags::RD_ADDRESS) {
        ops.transfer(dm, bus, &mut [write])?;
        ops.transfer(dm, bus, &mut [read])
    } else {
        ops.transfer(dm, bus, &mut [write, read])
    }
}

/// Write `buf` starting at register `offset`, in one message.
pub fn dm_i2c_write(dm: &mut Dm, chip: DeviceId, offset: u32, buf: &[u8]) -> DmResult {
    let (bus, info) = chip_info(dm, chip)?;
    dm.probe(chip)?;
    let mut data = offset_bytes(&info, offset)?;
    data.extend_from_slice(buf);
    let msg = I2cMsg {
        addr: info.chip_addr,
        flags: msg_flags(&info),
        buf: &mut data,
    };
    i2c_get_ops(dm, bus)?.transfer(dm, bus, &mut [msg])
}

pub fn dm_i2c_reg_read(dm: &mut Dm, chip: DeviceId, offset: u32) -> DmResult<u8> {
    let mut val = [0u8];
    dm_i2c_read(dm, chip, offset, &mut val)?;
    Ok(val[0])
}

pub fn dm_i2c_reg_write(dm: &mut Dm, chip: DeviceId, offset: u32, value: u8) -> DmResult {
    dm_i2c_write(dm, chip, offset, &[value])
}

/// Read-modify-write a register: clear `clear`, then set `set`.
pub fn dm_i2c_reg_clrset(dm: &mut Dm, chip: DeviceId, offset: u32, clear: u8, set: u8) -> DmResult {
    let val = dm_i2c_reg_read(dm, chip, offset)?;
    dm_i2c_reg_write(dm, chip, offset, (val & !clear) | set)
}

/// The chip device at `chip_addr` on `bus`, binding a generic one if the tree has none.
pub fn i2c_get_chip(dm: &mut Dm, bus: DeviceId, chip_addr: u16, offset_len: u32) -> DmResult<DeviceId> {
    let children = dm.device(bus)?.children.clone();
    for child in children {
        if dm
            .parent_plat::<DmI2cChip>(child)
            .is_ok_and(|plat| plat.chip_addr == chip_addr)
        {
            dm.probe(child)?;
            return Ok(child);
        }
    }
    debug_ex!("No chip at {:#x} on bus, binding a generic one.", chip_addr);
    let name = format!("generic_{:x}", chip_addr);
    let chip = dm.bind_by_name(bus, I2C_GENERIC_CHIP_DRIVER.name, &name)?;
    let plat = dm.parent_plat_mut::<DmI2cChip>(chip)?;
    plat.chip_addr = chip_addr;
    plat.offset_len = offset_len;
    if let Err(err) = dm.probe(chip) {
        let _ = dm.unbind(chip);
        return Err(err);
    }
    Ok(chip)
}

/// [i2c_get_chip] on the bus with sequence number `busnum`.
pub fn i2c_get_chip_for_busnum(dm: &mut Dm, busnum: u32, chip_addr: u16, offset_len: u32) -> DmResult<DeviceId> {
    let bus = dm.uclass_get_device_by_seq(UclassId::I2c, busnum)?;
    i2c_get_chip(dm, bus, chip_addr, offset_len)
}

/// Check that a chip answers at `chip_addr`, then return its device.
pub fn dm_i2c_probe(dm: &mut Dm, bus: DeviceId, chip_addr: u16, chip_flags: I2cChipFlags) -> DmResult<DeviceId> {
    dm.probe(bus)?;
    let ops = i2c_get_ops(dm, bus)?;
    match ops.probe_chip(dm, bus, chip_addr, chip_flags) {
        Err(DmError::Unsupported) => {
            let mut empty: [u8; 0] = [];
            let msg = I2cMsg {
                addr: chip_addr,
                flags: I2cMsgFlags::empty(),
                buf: &mut empty,
            };
            ops.transfer(dm, bus, &mut [msg])?;
        }
        other => other?,
    }
    i2c_get_chip(dm, bus, chip_addr, 1)
}

pub fn dm_i2c_set_bus_speed(dm: &mut Dm, bus: DeviceId, speed: u32) -> DmResult {
    i2c_get_ops(dm, bus)?.set_bus_speed(dm, bus, speed)?;
    dm.uclass_priv_mut::<DmI2cBus>(bus)?.speed_hz = speed;
    Ok(())
}

pub fn dm_i2c_get_bus_speed(dm: &mut Dm, bus: DeviceId) -> DmResult<u32> {
    dm.probe(bus)?;
    match i2c_get_ops(dm, bus)?.get_bus_speed(dm, bus) {
        Err(DmError::Unsupported) => Ok(dm.uclass_priv::<DmI2cBus>(bus)?.speed_hz),
        other => other,
    }
}

/// Addresses on `bus` that answer a probe, for bus scans.
pub fn i2c_scan_bus(dm: &mut Dm, bus: DeviceId) -> DmResult<Vec<u16>> {
    dm.probe(bus)?;
    let ops = i2c_get_ops(dm, bus)?;
    let mut found = vec![];
    for addr in 0x08u16..0x78 {
        if ops.probe_chip(dm, bus, addr, I2cChipFlags::empty()).is_ok() {
            found.push(addr);
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{flat_tree, new_full_dm};

    fn i2c_tree() -> dt::OfTree {
        flat_tree(|w| {
            w.begin_node("aliases");
            w.property_string("i2c2", "/i2c@1000");
            w.end_node();
            w.begin_node("i2c@1000");
            w.property_string("compatible", "sim,i2c");
            w.property_u32("#address-cells", 1);
            w.property_u32("#size-cells", 0);
            w.property_u32("clock-frequency", 400_000);
            w.property_u32_array("sim,chips", &[0x50, 0x20]);
            w.begin_node("eeprom@50");
            w.property_string("compatible", "i2c-chip");
            w.property_u32("reg", 0x50);
            w.end_node();
            w.end_node();
        })
    }

    #[test]
    fn chips_are_bound_from_reg() {
        let mut dm = new_full_dm();
        dm.init_and_scan(Some(i2c_tree())).unwrap();
        let bus = dm.uclass_find_first_device(UclassId::I2c).unwrap();
        assert_eq!(dm.seq(bus), Ok(Some(2)));
        let eeprom = dm.device_find_child_by_name(bus, "eeprom@50").unwrap();
        assert_eq!(dm.parent_plat::<DmI2cChip>(eeprom).unwrap().chip_addr, 0x50);
        assert_eq!(i2c_get_chip(&mut dm, bus, 0x50, 1), Ok(eeprom));
    }

    #[test]
    fn broken_chips_leave_the_bus_bound() {
        let tree = flat_tree(|w| {
            w.begin_node("i2c@2000");
            w.property_string("compatible", "sim,i2c");
            w.property_u32("#address-cells", 1);
            w.property_u32("#size-cells", 0);
            w.property_u32_array("sim,chips", &[0x50]);
            w.begin_node("eeprom@50");
            w.property_string("compatible", "i2c-chip");
            w.property_u32("reg", 0x50);
            w.end_node();
            w.begin_node("noreg");
            w.property_string("compatible", "i2c-chip");
            w.end_node();
            w.begin_node("sensor@48");
            w.property_string("compatible", "vendor,absent");
            w.property_u32("reg", 0x48);
            w.end_node();
            w.end_node();
        });
        let mut dm = new_full_dm();
        assert_eq!(dm.init_and_scan(Some(tree)), Ok(None));
        let bus = dm.uclass_find_first_device(UclassId::I2c).unwrap();
        let eeprom = dm.device_find_child_by_name(bus, "eeprom@50").unwrap();
        assert!(dm.device_find_child_by_name(bus, "noreg").is_err());
        assert!(dm.device_find_child_by_name(bus, "sensor@48").is_err());
        dm_i2c_reg_write(&mut dm, eeprom, 0x01, 0x5a).unwrap();
        assert_eq!(dm_i2c_reg_read(&mut dm, eeprom, 0x01), Ok(0x5a));
    }

    #[test]
    fn bus_speed_comes_from_the_tree() {
        let mut dm = new_full_dm();
        dm.init_and_scan(Some(i2c_tree())).unwrap();
        let bus = dm.uclass_get_device(UclassId::I2c, 0).unwrap();
        assert_eq!(dm.uclass_priv::<DmI2cBus>(bus).unwrap().speed_hz, 400_000);
        assert_eq!(dm_i2c_get_bus_speed(&mut dm, bus), Ok(400_000));
        assert_eq!(dm_i2c_set_bus_speed(&mut dm, bus, 1_000_000), Err(DmError::Invalid));
        assert_eq!(dm_i2c_get_bus_speed(&mut dm, bus), Ok(400_000));
    }

    #[test]
    fn register_access_round_trips() {
        let mut dm = new_full_dm();
        dm.init_and_scan(Some(i2c_tree())).unwrap();
        let bus = dm.uclass_get_device_by_seq(UclassId::I2c, 2).unwrap();
        let eeprom = i2c_get_chip(&mut dm, bus, 0x50, 1).unwrap();
        dm_i2c_write(&mut dm, eeprom, 0x10, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        dm_i2c_read(&mut dm, eeprom, 0x10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        dm_i2c_reg_clrset(&mut dm, eeprom, 0x11, 0x02, 0x80).unwrap();
        assert_eq!(dm_i2c_reg_read(&mut dm, eeprom, 0x11), Ok(0x80));
    }

    #[test]
    fn untracked_chips_get_generic_devices() {
        let mut dm = new_full_dm();
        dm.init_and_scan(Some(i2c_tree())).unwrap();
        let bus = dm.uclass_get_device(UclassId::I2c, 0).unwrap();
        let chip = dm_i2c_probe(&mut dm, bus, 0x20, I2cChipFlags::empty()).unwrap();
        assert_eq!(dm.device(chip).unwrap().name, "generic_20");
        assert_eq!(dm.device(chip).unwrap().uclass_id, UclassId::I2cGeneric);
        assert_eq!(
            dm_i2c_probe(&mut dm, bus, 0x21, I2cChipFlags::empty()).err(),
            Some(DmError::Io)
        );
        assert_eq!(i2c_get_chip_for_busnum(&mut dm, 2, 0x20, 1), Ok(chip));
        assert_eq!(i2c_scan_bus(&mut dm, bus), Ok(vec![0x20, 0x50]));
    }
}
