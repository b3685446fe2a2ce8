//! Error types of the device model.

use core::fmt::{self, Debug, Display, Write};
use dt::{FdtError, PropertyError};

/// An error that can be printed to a string device
pub trait MessageError: Debug {
    /// Print the error message to a writer
    fn print_to_writer(&self, f: &mut dyn Write) {
        if let Err(err) = f.write_fmt(format_args!("{:?}", self)) {
            let _ = f.write_fmt(format_args!("Error on printing error message: {:?}", err));
        }
    }
}

impl Display for dyn MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print_to_writer(f);
        Ok(())
    }
}

/// Errors returned by bind, probe, remove, unbind and the lookup functions.
///
/// Where they come from decides how bad they are:
/// - during a tree scan a bind error only loses that node; the scan carries on;
/// - a probe error leaves the device bound and inactive, and may be retried;
/// - a remove error leaves the device activated;
/// - failing to bind or probe the root device is fatal for [crate::Dm::init].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmError {
    /// The handle is stale, or no device satisfies the lookup.
    NoDevice,
    /// No registered driver matches the node.
    NoDriver,
    /// No uclass descriptor is registered for the requested id.
    NoUclass,
    /// A storage block or table could not be allocated.
    NoMemory,
    /// A storage block is absent or holds a different type.
    NoData,
    /// Bad argument or state.
    Invalid,
    /// The device is in use: activated when unbinding, or a driver declined.
    Busy,
    /// The remove flags did not select this device.
    Rejected,
    /// The relocation fixup has already been applied.
    AlreadyRelocated,
    /// The driver does not implement the operation.
    Unsupported,
    /// Hardware (or its simulation) reported a failure.
    Io,
    /// A tree property was missing or malformed.
    Property(PropertyError),
    /// The tree blob is malformed.
    Fdt(FdtError),
    /// Driver-specific failure.
    Driver { info: &'static str },
}

pub type DmResult<T = ()> = Result<T, DmError>;

impl From<PropertyError> for DmError {
    fn from(err: PropertyError) -> Self {
        DmError::Property(err)
    }
}

impl From<FdtError> for DmError {
    fn from(err: FdtError) -> Self {
        DmError::Fdt(err)
    }
}

impl MessageError for DmError {}

impl Display for DmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmError::NoDevice => f.write_str("no such device"),
            DmError::NoDriver => f.write_str("no matching driver"),
            DmError::NoUclass => f.write_str("uclass not registered"),
            DmError::NoMemory => f.write_str("out of memory"),
            DmError::NoData => f.write_str("storage block missing"),
            DmError::Invalid => f.write_str("invalid argument"),
            DmError::Busy => f.write_str("device busy"),
            DmError::Rejected => f.write_str("not selected by remove flags"),
            DmError::AlreadyRelocated => f.write_str("relocation already applied"),
            DmError::Unsupported => f.write_str("operation not supported"),
            DmError::Io => f.write_str("I/O error"),
            DmError::Property(err) => write!(f, "property error: {}", err),
            DmError::Fdt(err) => write!(f, "fdt error: {}", err),
            DmError::Driver { info } => write!(f, "driver error: {}", info),
        }
    }
}
