//! Device tree support for the device model.
//!
//! Two representations are provided:
//! - [node::DeviceTree], an in-memory ("live") tree whose nodes live in an arena and link to each
//!   other by index;
//! - [fdt::FlatTree], a validated flattened device tree blob addressed by structure-block offsets.
//!
//! [ofnode::OfNode] is the handle the rest of the firmware uses; it hides which representation
//! backs a node.
#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod fdt;
pub mod node;
pub mod ofnode;
pub mod prop;

pub use fdt::{FdtError, FlatTree, reader::FdtReader, writer::FdtWriter};
pub use node::DeviceTree;
pub use ofnode::{OfNode, OfTree};
pub use prop::{Property, PropertyError};
