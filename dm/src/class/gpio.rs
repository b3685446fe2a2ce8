//! GPIO controllers.
//!
//! A controller exposes `gpio_count` lines numbered from 0. Consumers name a line with a
//! [GpioDesc], usually obtained from a phandle list such as `enable-gpios = <&bank 3 0>` through
//! [gpio_request_by_name]. Values passed through the `dm_gpio_*` helpers are logical: an
//! active-low line reads `true` when the pin is low.
use crate::{
    device::DeviceId,
    driver::{Auto, Ops, UclassDriver, UclassFlags},
    error::{DmError, DmResult},
    model::Dm,
    uclass_id::UclassId,
};
use alloc::{format, string::String, vec::Vec};
use bitflags::bitflags;
use dt::PropertyError;

/// Cell flags used in tree GPIO specifiers.
pub const GPIO_ACTIVE_LOW: u32 = 1;
pub const GPIO_SINGLE_ENDED: u32 = 2;
pub const GPIO_LINE_OPEN_DRAIN: u32 = 4;
pub const GPIO_PULL_UP: u32 = 16;
pub const GPIO_PULL_DOWN: u32 = 32;

bitflags! {
    /// Request flags of a [GpioDesc].
    pub struct GpioFlags: u32 {
        const IS_OUT = 1 << 0;
        const IS_IN = 1 << 1;
        const ACTIVE_LOW = 1 << 2;
        /// Initial logical value of an output.
        const IS_OUT_ACTIVE = 1 << 3;
        const OPEN_DRAIN = 1 << 4;
        const PULL_UP = 1 << 5;
        const PULL_DOWN = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioFunction {
    Input,
    Output,
    Unused,
    Unknown,
    /// Muxed to a peripheral.
    Func,
}

/// One line of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioDesc {
    pub dev: DeviceId,
    pub offset: u32,
    pub flags: GpioFlags,
}

/// Per-controller state kept by the uclass.
#[derive(Debug, Default)]
pub struct GpioDevPriv {
    /// Prefix for line names, e.g. `"a"` for `a0`..`a31`.
    pub bank_name: String,
    pub gpio_count: u32,
    /// Label of each claimed line.
    pub labels: Vec<Option<String>>,
}

/// Operations every GPIO driver provides. Offsets are checked against `gpio_count` by the
/// helpers in this module before a driver sees them.
pub trait GpioOps: Sync {
    fn direction_input(&self, dm: &mut Dm, dev: DeviceId, offset: u32) -> DmResult;
    fn direction_output(&self, dm: &mut Dm, dev: DeviceId, offset: u32, value: bool) -> DmResult;
    /// Raw pin level.
    fn get_value(&self, dm: &mut Dm, dev: DeviceId, offset: u32) -> DmResult<bool>;
    fn set_value(&self, dm: &mut Dm, dev: DeviceId, offset: u32, value: bool) -> DmResult;

    fn get_function(&self, _dm: &mut Dm, _dev: DeviceId, _offset: u32) -> DmResult<GpioFunction> {
        Err(DmError::Unsupported)
    }

    /// Decode a tree specifier (the cells after the phandle) into `desc`.
    fn xlate(&self, _dm: &mut Dm, _dev: DeviceId, desc: &mut GpioDesc, args: &[u32]) -> DmResult {
        gpio_xlate_offs_flags(desc, args)
    }
}

/// The usual two-cell decoding: `<offset flags>`.
pub fn gpio_xlate_offs_flags(desc: &mut GpioDesc, args: &[u32]) -> DmResult {
    let (&offset, rest) = args.split_first().ok_or(DmError::Invalid)?;
    desc.offset = offset;
    let cell = rest.first().copied().unwrap_or(0);
    if cell & GPIO_ACTIVE_LOW != 0 {
        desc.flags.insert(GpioFlags::ACTIVE_LOW);
    }
    if cell & GPIO_SINGLE_ENDED != 0 && cell & GPIO_LINE_OPEN_DRAIN != 0 {
        desc.flags.insert(GpioFlags::OPEN_DRAIN);
    }
    if cell & GPIO_PULL_UP != 0 {
        desc.flags.insert(GpioFlags::PULL_UP);
    }
    if cell & GPIO_PULL_DOWN != 0 {
        desc.flags.insert(GpioFlags::PULL_DOWN);
    }
    Ok(())
}

pub fn gpio_get_ops(dm: &Dm, dev: DeviceId) -> DmResult<&'static dyn GpioOps> {
    match dm.driver_of(dev)?.ops {
        Ops::Gpio(ops) => Ok(ops),
        _ => Err(DmError::Unsupported),
    }
}

fn gpio_post_probe(dm: &mut Dm, dev: DeviceId) -> DmResult {
    gpio_get_ops(dm, dev)?;
    let uc_priv = dm.uclass_priv_mut::<GpioDevPriv>(dev)?;
    uc_priv.labels = (0..uc_priv.gpio_count).map(|_| None).collect();
    Ok(())
}

fn gpio_pre_remove(dm: &mut Dm, dev: DeviceId) -> DmResult {
    dm.uclass_priv_mut::<GpioDevPriv>(dev)?.labels.clear();
    Ok(())
}

pub static GPIO_UCLASS: UclassDriver = UclassDriver {
    name: "gpio",
    id: UclassId::Gpio,
    flags: UclassFlags::SEQ_ALIAS,
    post_probe: Some(gpio_post_probe),
    pre_remove: Some(gpio_pre_remove),
    per_device_auto: Some(Auto::of::<GpioDevPriv>()),
    ..UclassDriver::DEFAULT
};

/// Probe the controller of `desc` and check the offset.
fn check_desc(dm: &mut Dm, desc: &GpioDesc) -> DmResult<&'static dyn GpioOps> {
    dm.probe(desc.dev)?;
    let ops = gpio_get_ops(dm, desc.dev)?;
    if desc.offset >= dm.uclass_priv::<GpioDevPriv>(desc.dev)?.gpio_count {
        return Err(DmError::Invalid);
    }
    Ok(ops)
}

/// Claim a line. Fails with [DmError::Busy] if someone else holds it.
pub fn dm_gpio_request(dm: &mut Dm, desc: &GpioDesc, label: &str) -> DmResult {
    check_desc(dm, desc)?;
    let slot = dm
        .uclass_priv_mut::<GpioDevPriv>(desc.dev)?
        .labels
        .get_mut(desc.offset as usize)
        .ok_or(DmError::Invalid)?;
    if slot.is_some() {
        return Err(DmError::Busy);
    }
    *slot = Some(String::from(label));
    Ok(())
}

pub fn dm_gpio_free(dm: &mut Dm, desc: &GpioDesc) -> DmResult {
    let slot = dm
        .uclass_priv_mut::<GpioDevPriv>(desc.dev)?
        .labels
        .get_mut(desc.offset as usize)
        .ok_or(DmError::Invalid)?;
    slot.take().map(|_| ()).ok_or(DmError::Invalid)
}

/// The label a line was claimed with.
pub fn gpio_get_label(dm: &Dm, desc: &GpioDesc) -> Option<String> {
    dm.uclass_priv::<GpioDevPriv>(desc.dev)
        .ok()?
        .labels
        .get(desc.offset as usize)?
        .clone()
}

pub fn dm_gpio_get_value(dm: &mut Dm, desc: &GpioDesc) -> DmResult<bool> {
    let ops = check_desc(dm, desc)?;
    let raw = ops.get_value(dm, desc.dev, desc.offset)?;
    Ok(raw ^ desc.flags.contains(GpioFlags::ACTIVE_LOW))
}

pub fn dm_gpio_set_value(dm: &mut Dm, desc: &GpioDesc, value: bool) -> DmResult {
    let ops = check_desc(dm, desc)?;
    ops.set_value(dm, desc.dev, desc.offset, value ^ desc.flags.contains(GpioFlags::ACTIVE_LOW))
}

/// Configure the direction from request flags: outputs start at [GpioFlags::IS_OUT_ACTIVE].
pub fn dm_gpio_set_dir_flags(dm: &mut Dm, desc: &GpioDesc, flags: GpioFlags) -> DmResult {
    let ops = check_desc(dm, desc)?;
    let active_low = desc.flags.contains(GpioFlags::ACTIVE_LOW);
    if flags.contains(GpioFlags::IS_OUT) {
        let value = flags.contains(GpioFlags::IS_OUT_ACTIVE) ^ active_low;
        ops.direction_output(dm, desc.dev, desc.offset, value)
    } else if flags.contains(GpioFlags::IS_IN) {
        ops.direction_input(dm, desc.dev, desc.offset)
    } else {
        Ok(())
    }
}

pub fn gpio_get_function(dm: &mut Dm, dev: DeviceId, offset: u32) -> DmResult<GpioFunction> {
    let desc = GpioDesc {
        dev,
        offset,
        flags: GpioFlags::empty(),
    };
    let ops = check_desc(dm, &desc)?;
    ops.get_function(dm, dev, offset)
}

/// Resolve entry `index` of the phandle list `list_name` of `dev`'s node, claim the line with
/// `dev`'s name as label and apply `flags`.
pub fn gpio_request_by_name(
    dm: &mut Dm,
    dev: DeviceId,
    list_name: &str,
    index: usize,
    flags: GpioFlags,
) -> DmResult<GpioDesc> {
    let device = dm.device(dev)?;
    let node = device.node.ok_or(DmError::Property(PropertyError::PropNotFound))?;
    let label = format!("{}.{}", device.name, list_name);
    let tree = node.tree();

    let cells = node.read_u32_array(list_name)?;
    let mut pos = 0;
    let mut entry = 0;
    let (controller, args) = loop {
        let phandle = *cells.get(pos).ok_or(DmError::NoDevice)?;
        let target = tree
            .node_by_phandle(phandle)
            .ok_or(DmError::Property(PropertyError::DanglingHandle))?;
        let count = target.read_u32_default("#gpio-cells", 2) as usize;
        let args = cells
            .get(pos + 1..pos + 1 + count)
            .ok_or(DmError::Property(PropertyError::InvalidPropFormat))?;
        if entry == index {
            break (target, args);
        }
        pos += 1 + count;
        entry += 1;
    };

    let gpio_dev = dm.uclass_get_device_by_ofnode(UclassId::Gpio, controller)?;
    let mut desc = GpioDesc {
        dev: gpio_dev,
        offset: 0,
        flags: GpioFlags::empty(),
    };
    gpio_get_ops(dm, gpio_dev)?.xlate(dm, gpio_dev, &mut desc, args)?;
    dm_gpio_request(dm, &desc, &label)?;
    desc.flags |= flags;
    if let Err(err) = dm_gpio_set_dir_flags(dm, &desc, flags) {
        let _ = dm_gpio_free(dm, &desc);
        return Err(err);
    }
    Ok(desc)
}

/// Find a line by its name: bank name followed by the offset, e.g. `"a3"`.
pub fn dm_gpio_lookup_name(dm: &mut Dm, name: &str) -> DmResult<GpioDesc> {
    let mut dev = dm.uclass_first_device(UclassId::Gpio);
    while let Some(id) = dev {
        let uc_priv = dm.uclass_priv::<GpioDevPriv>(id)?;
        if let Some(offset) = name
            .strip_prefix(uc_priv.bank_name.as_str())
            .and_then(|rest| rest.parse::<u32>().ok())
        {
            if offset < uc_priv.gpio_count {
                return Ok(GpioDesc {
                    dev: id,
                    offset,
                    flags: GpioFlags::empty(),
                });
            }
        }
        dev = dm.uclass_next_device(id);
    }
    Err(DmError::NoDevice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{flat_tree, new_full_dm};

    fn gpio_tree() -> dt::OfTree {
        flat_tree(|w| {
            w.begin_node("aliases");
            w.property_string("gpio4", "/bank-a");
            w.end_node();
            w.begin_node("bank-a");
            w.property_string("compatible", "sim,gpio-bank");
            w.property_string("gpio-bank-name", "a");
            w.property_u32("ngpios", 8);
            w.property_u32("#gpio-cells", 2);
            w.property_u32("phandle", 1);
            w.end_node();
            w.begin_node("bank-b");
            w.property_string("compatible", "sim,gpio-bank");
            w.property_string("gpio-bank-name", "b");
            w.property_u32("phandle", 2);
            w.end_node();
            w.begin_node("user");
            w.property_string("compatible", "test,leaf");
            w.property_u32_array("led-gpios", &[1, 3, 0, 2, 5, GPIO_ACTIVE_LOW]);
            w.end_node();
        })
    }

    #[test]
    fn banks_take_alias_sequence_numbers() {
        let mut dm = new_full_dm();
        dm.init_and_scan(Some(gpio_tree())).unwrap();
        let a = dm.device_find_by_name("bank-a").unwrap();
        let b = dm.device_find_by_name("bank-b").unwrap();
        assert_eq!(dm.seq(a), Ok(Some(4)));
        assert_eq!(dm.seq(b), Ok(Some(5)));
    }

    #[test]
    fn phandle_lists_resolve_and_claim() {
        let mut dm = new_full_dm();
        dm.init_and_scan(Some(gpio_tree())).unwrap();
        let user = dm.device_find_by_name("user").unwrap();
        let bank_b = dm.device_find_by_name("bank-b").unwrap();

        let led = gpio_request_by_name(&mut dm, user, "led-gpios", 1, GpioFlags::IS_OUT).unwrap();
        assert_eq!(led.dev, bank_b);
        assert_eq!(led.offset, 5);
        assert!(led.flags.contains(GpioFlags::ACTIVE_LOW));
        assert_eq!(gpio_get_label(&dm, &led).as_deref(), Some("user.led-gpios"));
        // Logical 0 on an active-low output drives the pin high.
        assert_eq!(dm_gpio_get_value(&mut dm, &led), Ok(false));
        let raw = GpioDesc { flags: GpioFlags::empty(), ..led };
        assert_eq!(dm_gpio_get_value(&mut dm, &raw), Ok(true));
        dm_gpio_set_value(&mut dm, &led, true).unwrap();
        assert_eq!(dm_gpio_get_value(&mut dm, &raw), Ok(false));
        assert_eq!(gpio_get_function(&mut dm, bank_b, 5), Ok(GpioFunction::Output));
        assert_eq!(gpio_get_function(&mut dm, bank_b, 6), Ok(GpioFunction::Input));

        assert_eq!(
            gpio_request_by_name(&mut dm, user, "led-gpios", 1, GpioFlags::IS_OUT).err(),
            Some(DmError::Busy)
        );
        dm_gpio_free(&mut dm, &led).unwrap();
        assert_eq!(
            gpio_request_by_name(&mut dm, user, "led-gpios", 2, GpioFlags::IS_IN).err(),
            Some(DmError::NoDevice)
        );
    }

    #[test]
    fn offsets_are_bounded_by_the_bank() {
        let mut dm = new_full_dm();
        dm.init_and_scan(Some(gpio_tree())).unwrap();
        let a = dm.device_find_by_name("bank-a").unwrap();
        let desc = GpioDesc { dev: a, offset: 8, flags: GpioFlags::empty() };
        assert_eq!(dm_gpio_get_value(&mut dm, &desc), Err(DmError::Invalid));
        assert_eq!(dm.uclass_priv::<GpioDevPriv>(a).unwrap().gpio_count, 8);
    }

    #[test]
    fn lines_are_found_by_name() {
        let mut dm = new_full_dm();
        dm.init_and_scan(Some(gpio_tree())).unwrap();
        let desc = dm_gpio_lookup_name(&mut dm, "b17").unwrap();
        assert_eq!(Some(desc.dev), dm.device_find_by_name("bank-b"));
        assert_eq!(desc.offset, 17);
        assert_eq!(dm_gpio_lookup_name(&mut dm, "a9").err(), Some(DmError::NoDevice));
        assert_eq!(dm_gpio_lookup_name(&mut dm, "c0").err(), Some(DmError::NoDevice));
    }

    #[test]
    fn xlate_reads_flag_cells() {
        let mut desc = GpioDesc {
            dev: DeviceId { index: 0, generation: 0 },
            offset: 0,
            flags: GpioFlags::empty(),
        };
        gpio_xlate_offs_flags(&mut desc, &[4, GPIO_PULL_UP | GPIO_SINGLE_ENDED | GPIO_LINE_OPEN_DRAIN]).unwrap();
        assert_eq!(desc.offset, 4);
        assert_eq!(desc.flags, GpioFlags::PULL_UP | GpioFlags::OPEN_DRAIN);
        assert_eq!(gpio_xlate_offs_flags(&mut desc, &[]), Err(DmError::Invalid));
    }
}
