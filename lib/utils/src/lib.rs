//! Small helpers shared by the device-tree library and the device model.
#![cfg_attr(not(test), no_std)]

pub mod endian;
pub mod num;
