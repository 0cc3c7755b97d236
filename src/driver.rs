//! Block device driver contract and registry.
//!
//! Drivers advertise a class id for their device family and serve
//! sector-granular, fully synchronous reads and writes. The registry is a
//! plain list probed linearly at open time; the most recently registered
//! driver is asked first.

use alloc::{sync::Arc, vec::Vec};
use spin::Mutex;

use crate::{Disk, DiskError};

/// Properties a driver reports for a device it has claimed.
#[derive(Debug, Clone, Copy)]
pub struct DiskParams {
    /// Driver-assigned instance id, unique within the driver's class.
    pub id: u64,
    /// Device size in native sectors, if the driver knows it.
    pub total_sectors: Option<u64>,
    /// Log2 of the native sector size in bytes. Must lie within
    /// `[SECTOR_BITS, SECTOR_BITS + CACHE_BITS]`; `open` rejects the
    /// device otherwise.
    pub log_sector_size: u32,
}

/// A sector-granular block device driver.
///
/// `read` and `write` address the device in *native* sectors of
/// `1 << log_sector_size` bytes; the disk layer performs all translation
/// from logical 512-byte sectors. Both transfer exactly
/// `count << log_sector_size` bytes and complete synchronously. Driver
/// callbacks must not reenter the disk layer for the same disk.
pub trait DiskDriver: Send + Sync {
    /// Driver name, for diagnostics.
    fn name(&self) -> &str;

    /// Identifier of the device family served by this driver.
    fn class_id(&self) -> u32;

    /// Attempt to claim `name`.
    ///
    /// Returns `Err(DiskError::UnknownDevice(_))` when the name does not
    /// designate a device of this driver, in which case the registry tries
    /// the next one. Any other error aborts the whole open.
    fn open(&self, name: &str) -> Result<DiskParams, DiskError>;

    /// Release driver-side state for an open disk.
    fn close(&self, _disk: &Disk) {}

    /// Read `count` native sectors starting at `sector` into `buf`.
    fn read(&self, disk: &Disk, sector: u64, count: u64, buf: &mut [u8])
        -> Result<(), DiskError>;

    /// Write `count` native sectors starting at `sector` from `buf`.
    ///
    /// Drivers for read-only devices keep the default.
    fn write(&self, _disk: &Disk, _sector: u64, _count: u64, _buf: &[u8])
        -> Result<(), DiskError> {
        Err(DiskError::ReadOnly)
    }
}

/// Registered drivers, most recently registered first.
static DRIVERS: Mutex<Vec<Arc<dyn DiskDriver>>> = Mutex::new(Vec::new());

/// Register a block device driver.
///
/// A newly registered driver takes precedence over earlier ones when a
/// device name is resolved.
pub fn register_driver(driver: Arc<dyn DiskDriver>) {
    log::info!("registering disk driver `{}`", driver.name());
    DRIVERS.lock().insert(0, driver);
}

/// Unregister a previously registered driver. No-op if `driver` is not
/// registered.
pub fn unregister_driver(driver: &Arc<dyn DiskDriver>) {
    let mut drivers = DRIVERS.lock();
    if let Some(pos) = drivers.iter().position(|d| Arc::ptr_eq(d, driver)) {
        log::info!("unregistering disk driver `{}`", driver.name());
        drivers.remove(pos);
    }
}

/// Snapshot of the registry, in probe order. Probing happens outside the
/// registry lock so that a driver's `open` may itself open other disks.
pub(crate) fn drivers() -> Vec<Arc<dyn DiskDriver>> {
    DRIVERS.lock().clone()
}
