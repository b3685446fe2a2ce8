//! Capability classes: operation tables, uclass drivers and consumer helpers.
pub mod gpio;
pub mod i2c;
pub mod regulator;
pub mod simple_bus;
