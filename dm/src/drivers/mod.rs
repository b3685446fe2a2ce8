//! Software-backed drivers for each capability class, and the default tables.
use crate::{
    class::{
        gpio::GPIO_UCLASS,
        i2c::{I2C_GENERIC_CHIP_DRIVER, I2C_GENERIC_UCLASS, I2C_UCLASS},
        regulator::REGULATOR_UCLASS,
    },
    driver::{Driver, UclassDriver},
    registry::Registry,
};

pub mod gpio_sim;
pub mod i2c_sim;
pub mod regulator_fixed;

pub static DEFAULT_DRIVERS: &[&Driver] = &[
    &gpio_sim::SIM_GPIO_DRIVER,
    &i2c_sim::SIM_I2C_DRIVER,
    &I2C_GENERIC_CHIP_DRIVER,
    &regulator_fixed::FIXED_REGULATOR_DRIVER,
];

pub static DEFAULT_UCLASSES: &[&UclassDriver] = &[
    &GPIO_UCLASS,
    &I2C_UCLASS,
    &I2C_GENERIC_UCLASS,
    &REGULATOR_UCLASS,
];

/// A registry holding only the bundled drivers.
pub fn default_registry() -> Registry {
    Registry::new(DEFAULT_DRIVERS, DEFAULT_UCLASSES, &[])
}
