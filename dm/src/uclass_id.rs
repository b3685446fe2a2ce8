use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Identifies a capability class. The numeric value orders `dump_tree` when sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum UclassId {
    Root = 0,
    SimpleBus,
    Gpio,
    I2c,
    I2cGeneric,
    Regulator,
    Test,
    TestBus,
}
