//! Error type shared by the disk layer and its drivers.

use alloc::string::String;
use thiserror::Error;

/// Errors reported by the disk layer.
///
/// Drivers return the same type. `UnknownDevice` from a driver's `open`
/// means "this name is not mine" and makes the registry try the next
/// driver; any other driver error aborts the open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiskError {
    /// No registered driver claims the device name.
    #[error("disk `{0}` not found")]
    UnknownDevice(String),
    /// The partition specification does not match a partition on the
    /// device, or no partition prober is installed.
    #[error("no such partition")]
    UnknownPartition,
    /// The driver reported a native sector size outside the supported
    /// range of `[SECTOR_BITS, SECTOR_BITS + CACHE_BITS]` (as log2).
    #[error("sector sizes of {0} bytes aren't supported yet")]
    NotImplemented(u64),
    /// The request extends beyond a partition or beyond the disk.
    #[error("attempt to read or write outside of disk or partition")]
    OutOfRange,
    /// A buffer allocation failed.
    #[error("out of memory")]
    OutOfMemory,
    /// The driver reported an I/O failure.
    #[error("disk I/O error")]
    Io,
    /// The device has no write support.
    #[error("disk is read-only")]
    ReadOnly,
    /// Malformed device name or partition specification.
    #[error("bad argument: {0}")]
    BadArgument(String),
}
